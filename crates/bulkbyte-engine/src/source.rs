//! Upstream row sources feeding a step.

use std::future::Future;
use std::path::Path;

use bulkbyte_types::error::StepError;
use bulkbyte_types::row::Row;
use bulkbyte_types::row_meta::RowMetadata;
use tokio::sync::mpsc;

use crate::encode::CubeReader;

const CUBE_CHANNEL_CAPACITY: usize = 256;

/// Pull-style row stream. `Ok(None)` signals end of stream.
pub trait RowSource: Send {
    fn next_row(&mut self) -> impl Future<Output = Result<Option<Row>, StepError>> + Send;
}

/// Rows handed over through a bounded channel from a producer task.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Row, StepError>>,
}

/// Bounded producer/consumer pair. Dropping the sender ends the stream.
pub fn row_channel(capacity: usize) -> (mpsc::Sender<Result<Row, StepError>>, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ChannelSource { rx })
}

impl RowSource for ChannelSource {
    async fn next_row(&mut self) -> Result<Option<Row>, StepError> {
        self.rx.recv().await.transpose()
    }
}

/// In-memory rows, mostly for tests and programmatic use.
#[derive(Debug)]
pub struct IterSource<I> {
    rows: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Row> + Send,
{
    pub fn new(rows: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl<I> RowSource for IterSource<I>
where
    I: Iterator<Item = Row> + Send,
{
    async fn next_row(&mut self) -> Result<Option<Row>, StepError> {
        Ok(self.rows.next())
    }
}

/// Cube file read on a blocking thread and streamed through a channel.
pub struct CubeFileSource;

impl CubeFileSource {
    /// Read the header of `path` and start streaming its rows.
    /// A `limit` of `0` reads every row.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or has an invalid header.
    pub fn open(path: &Path, limit: u64) -> Result<(RowMetadata, ChannelSource), StepError> {
        let reader = CubeReader::open(path, limit).map_err(|e| {
            let err: StepError = e.into();
            StepError {
                message: format!("{}: {}", path.display(), err.message),
                ..err
            }
        })?;
        let meta = reader.meta().clone();
        let (tx, source) = row_channel(CUBE_CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || {
            for item in reader {
                let failed = item.is_err();
                if tx.blocking_send(item.map_err(StepError::from)).is_err() || failed {
                    break;
                }
            }
        });
        Ok((meta, source))
    }
}
