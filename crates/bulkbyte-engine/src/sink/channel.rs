//! Byte-channel provisioning: a named FIFO where the platform has one, or the
//! consumer's standard input fed from a bounded in-process queue.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bulkbyte_types::error::StepError;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::consumer::ConsumerProcess;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Failure allocating a byte channel.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("named pipes are not supported on this platform")]
    UnsupportedPlatform,

    #[error("pipe path {} already exists", path.display())]
    Collision { path: PathBuf },

    #[error("permission denied creating pipe {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("failed to create pipe {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl From<ProvisionError> for StepError {
    fn from(err: ProvisionError) -> Self {
        let code = match &err {
            ProvisionError::UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            ProvisionError::Collision { .. } => "PIPE_COLLISION",
            ProvisionError::PermissionDenied { .. } => "PIPE_PERMISSION",
            ProvisionError::Io { .. } => "PIPE_CREATE",
        };
        StepError::resource(code, err.to_string())
    }
}

/// How the sink's byte channel is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelProvisioner {
    /// A FIFO special file created in `dir`.
    Fifo { dir: PathBuf },
    /// The consumer's stdin, fed by a background writer through a bounded queue.
    Stdin { capacity: usize },
}

impl ChannelProvisioner {
    /// FIFO on unix, stdin queue elsewhere.
    pub fn platform_default(dir: impl Into<PathBuf>) -> Self {
        if cfg!(unix) {
            Self::Fifo { dir: dir.into() }
        } else {
            Self::Stdin {
                capacity: DEFAULT_QUEUE_CAPACITY,
            }
        }
    }

    /// Allocate a channel unique to this process and step.
    ///
    /// # Errors
    ///
    /// Returns a [`ProvisionError`] if the FIFO cannot be created.
    pub(crate) fn provision(&self, step: &str) -> Result<ByteChannel, ProvisionError> {
        match self {
            Self::Fifo { dir } => FifoPath::create(dir, step).map(ByteChannel::Fifo),
            Self::Stdin { capacity } => Ok(ByteChannel::Stdin {
                capacity: (*capacity).max(1),
            }),
        }
    }
}

/// An allocated channel, owned by one sink session.
#[derive(Debug)]
pub(crate) enum ByteChannel {
    Fifo(FifoPath),
    Stdin { capacity: usize },
}

impl ByteChannel {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Fifo(fifo) => Some(fifo.path()),
            Self::Stdin { .. } => None,
        }
    }
}

/// `bulkbyte-<step>-<pid>-<uuid>.fifo`, with the step name reduced to safe characters.
pub fn fifo_file_name(step: &str) -> String {
    let step: String = step
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!(
        "bulkbyte-{}-{}-{}.fifo",
        step,
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    )
}

/// A FIFO on disk, removed when dropped unless already removed.
#[derive(Debug)]
pub(crate) struct FifoPath {
    path: PathBuf,
    removed: bool,
}

impl FifoPath {
    fn create(dir: &Path, step: &str) -> Result<Self, ProvisionError> {
        let path = dir.join(fifo_file_name(step));
        make_fifo(&path).map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => ProvisionError::Collision { path: path.clone() },
            io::ErrorKind::PermissionDenied => ProvisionError::PermissionDenied { path: path.clone() },
            io::ErrorKind::Unsupported => ProvisionError::UnsupportedPlatform,
            _ => ProvisionError::Io {
                path: path.clone(),
                source,
            },
        })?;
        tracing::debug!(pipe = %path.display(), "created fifo");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(&mut self) -> io::Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for FifoPath {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            tracing::warn!(pipe = %self.path.display(), error = %e, "failed to remove fifo");
        }
    }
}

#[cfg(unix)]
fn make_fifo(path: &Path) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pipe path contains NUL"))?;
    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn make_fifo(_path: &Path) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Producer end of the channel.
pub(crate) enum SinkWriter {
    #[cfg(unix)]
    Fifo(tokio::net::unix::pipe::Sender),
    Queue {
        tx: mpsc::Sender<Bytes>,
        pump: JoinHandle<io::Result<()>>,
    },
}

impl SinkWriter {
    /// Open the FIFO for writing, waiting for the consumer to open its read end.
    ///
    /// A non-blocking open fails with `ENXIO` while no reader exists; retry
    /// until `open_timeout`, giving up early if the consumer has exited.
    #[cfg(unix)]
    pub async fn open_fifo(
        path: &Path,
        mut consumer: Option<&mut ConsumerProcess>,
        open_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, StepError> {
        let deadline = tokio::time::Instant::now() + open_timeout;
        loop {
            match tokio::net::unix::pipe::OpenOptions::new().open_sender(path) {
                Ok(sender) => return Ok(Self::Fifo(sender)),
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {}
                Err(e) => {
                    return Err(StepError::resource(
                        "PIPE_OPEN",
                        format!("failed to open {} for writing: {e}", path.display()),
                    ))
                }
            }

            if let Some(consumer) = consumer.as_deref_mut() {
                if let Some(status) = consumer.try_wait()? {
                    return Err(StepError::sink_process(
                        "CONSUMER_EXITED",
                        format!("consumer exited ({status}) before opening the pipe"),
                    ));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(StepError::timeout(
                    "PIPE_OPEN_TIMEOUT",
                    format!(
                        "no reader opened {} within {}ms",
                        path.display(),
                        open_timeout.as_millis()
                    ),
                ));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    #[cfg(not(unix))]
    pub async fn open_fifo(
        _path: &Path,
        _consumer: Option<&mut ConsumerProcess>,
        _open_timeout: Duration,
        _poll_interval: Duration,
    ) -> Result<Self, StepError> {
        Err(ProvisionError::UnsupportedPlatform.into())
    }

    /// Feed `stdin` from a bounded queue drained by a background task.
    pub fn queue(mut stdin: ChildStdin, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Bytes>(capacity);
        let pump = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                stdin.write_all(&chunk).await?;
            }
            stdin.shutdown().await
        });
        Self::Queue { tx, pump }
    }

    /// Write one complete record.
    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Self::Fifo(sender) => sender.write_all(bytes).await,
            Self::Queue { tx, .. } => tx
                .send(Bytes::copy_from_slice(bytes))
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    /// Signal end of input and wait for queued bytes to drain.
    pub async fn close(self) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            Self::Fifo(sender) => {
                drop(sender);
                Ok(())
            }
            Self::Queue { tx, pump } => {
                drop(tx);
                pump.await.map_err(io::Error::other)?
            }
        }
    }
}
