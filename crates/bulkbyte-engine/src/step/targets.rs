//! Destinations a step writes encoded rows to.

use std::path::{Path, PathBuf};

use bulkbyte_types::error::StepError;
use bulkbyte_types::mapping::ResolvedMapping;
use bulkbyte_types::result::{ResultFile, ResultFileKind, SinkReport};
use bulkbyte_types::row::Row;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::config::types::{OutputConfig, OutputFormat, StepConfig};
use crate::context::{Context, LogLevel};
use crate::dialect::{LoaderCommand, LoaderSpec};
use crate::encode::{CubeEncoder, RowEncoder, TextEncoder};
use crate::sink::SinkSession;

/// What a target leaves behind after a clean finish.
#[derive(Debug)]
pub(crate) enum Finished {
    Sink(SinkReport),
    File(ResultFile),
}

/// Streams rows through a [`SinkSession`] into the bulk-load process.
pub(crate) struct LoaderTarget {
    session: SinkSession,
    encoder: TextEncoder,
}

impl LoaderTarget {
    /// Provision the channel and start the consumer. The write end is opened
    /// separately so the caller can race the rendezvous against cancellation.
    pub async fn start(
        ctx: &Context,
        config: &StepConfig,
        resolved: &ResolvedMapping,
    ) -> Result<Self, StepError> {
        let loader = &config.loader;
        let dialect = config.connection.as_ref().map(|c| c.family.dialect());
        let null_marker = dialect
            .map(|d| d.null_marker(loader.escape()))
            .unwrap_or_default();
        let encoder = TextEncoder::new(resolved, loader.text_format(null_marker));

        let mut session = SinkSession::new(ctx.clone(), loader.sink_settings());
        session.provision_channel()?;

        let command = match loader_command(config, &session.input_path()) {
            Ok(command) => command,
            Err(e) => {
                session.abort().await;
                return Err(e);
            }
        };
        session.start_consumer(&command).await?;
        Ok(Self { session, encoder })
    }

    pub async fn open(&mut self) -> Result<(), StepError> {
        self.session.open_writer().await
    }
}

fn loader_command(config: &StepConfig, pipe: &Path) -> Result<LoaderCommand, StepError> {
    if let Some(command) = &config.loader.command {
        return Ok(command.build(pipe));
    }
    let Some(connection) = &config.connection else {
        return Err(StepError::config(
            "NO_CONNECTION",
            "a loader needs a connection or loader.command",
        ));
    };
    let params = connection.to_params();
    let columns: Vec<String> = config
        .mapping
        .entries()
        .iter()
        .map(|e| e.column.clone())
        .collect();
    connection.family.dialect().loader_command(&LoaderSpec {
        connection: &params,
        schema: config.target.schema.as_deref(),
        table: &config.target.table,
        columns: &columns,
        pipe,
        delimiter: &config.loader.delimiter,
        enclosure: config.loader.enclosure(),
        escape: config.loader.escape(),
        replace: config.loader.replace,
        ignore_errors: config.loader.ignore_errors,
    })
}

/// Writes rows to a local file, removed again if the step fails.
pub(crate) struct FileTarget {
    path: PathBuf,
    origin: String,
    writer: Option<BufWriter<tokio::fs::File>>,
    encoder: Box<dyn RowEncoder>,
}

impl FileTarget {
    /// Wrap an already created output file. The header is written separately
    /// so a failure there still leaves the target registered for teardown.
    pub fn new(
        ctx: &Context,
        output: &OutputConfig,
        path: PathBuf,
        file: tokio::fs::File,
        config: &StepConfig,
        resolved: &ResolvedMapping,
    ) -> Self {
        let encoder: Box<dyn RowEncoder> = match output.format {
            OutputFormat::Text => Box::new(TextEncoder::new(
                resolved,
                config.loader.text_format(String::new()),
            )),
            OutputFormat::Cube => Box::new(CubeEncoder::new(resolved)),
        };
        ctx.log(
            LogLevel::Debug,
            &format!("writing output to {}", path.display()),
        );
        Self {
            path,
            origin: ctx.step().to_string(),
            writer: Some(BufWriter::new(file)),
            encoder,
        }
    }

    pub async fn write_header(&mut self) -> Result<(), StepError> {
        let mut header = Vec::new();
        self.encoder.write_header(&mut header)?;
        if header.is_empty() {
            return Ok(());
        }
        self.write(&header).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), StepError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(StepError::internal("OUTPUT_CLOSED", "output already closed"));
        };
        writer.write_all(bytes).await.map_err(|e| {
            StepError::resource(
                "OUTPUT_WRITE",
                format!("write to {} failed: {e}", self.path.display()),
            )
        })
    }
}

/// One configured destination.
pub(crate) enum Target {
    Loader(LoaderTarget),
    File(FileTarget),
}

impl Target {
    pub fn name(&self) -> String {
        match self {
            Self::Loader(t) => format!("loader({})", t.session.state()),
            Self::File(t) => format!("file({})", t.path.display()),
        }
    }

    /// Encode `row` into `buf`, replacing its contents.
    pub fn encode(&self, row: &Row, buf: &mut Vec<u8>) -> Result<(), StepError> {
        buf.clear();
        let encoded = match self {
            Self::Loader(t) => t.encoder.encode_row(row, buf),
            Self::File(t) => t.encoder.encode_row(row, buf),
        };
        encoded.map_err(StepError::from)
    }

    /// Write one encoded record as a unit.
    pub async fn write(&mut self, record: &[u8]) -> Result<(), StepError> {
        match self {
            Self::Loader(t) => t.session.write_record(record).await,
            Self::File(t) => t.write(record).await,
        }
    }

    pub async fn finish(&mut self) -> Result<Finished, StepError> {
        match self {
            Self::Loader(t) => t.session.finish().await.map(|o| Finished::Sink(o.into())),
            Self::File(t) => {
                let Some(mut writer) = t.writer.take() else {
                    return Err(StepError::internal("OUTPUT_CLOSED", "output already closed"));
                };
                writer.shutdown().await.map_err(|e| {
                    StepError::resource(
                        "OUTPUT_WRITE",
                        format!("flush of {} failed: {e}", t.path.display()),
                    )
                })?;
                Ok(Finished::File(ResultFile {
                    kind: ResultFileKind::General,
                    path: t.path.clone(),
                    origin: t.origin.clone(),
                }))
            }
        }
    }

    /// Best-effort teardown. Cleanup failures are logged, never returned.
    pub async fn abort(&mut self, ctx: &Context) {
        match self {
            Self::Loader(t) => t.session.abort().await,
            Self::File(t) => {
                drop(t.writer.take());
                match tokio::fs::remove_file(&t.path).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => ctx.log(
                        LogLevel::Warn,
                        &format!("failed to remove partial output {}: {e}", t.path.display()),
                    ),
                    _ => {}
                }
            }
        }
    }
}
