//! Streaming sink bridge: pushes encoded records through a byte channel into
//! an external consumer process without buffering the dataset.
//!
//! Lifecycle:
//!
//! ```text
//! Created -> PipeReady -> ConsumerRunning -> Draining -> Closed
//!     \___________\______________\______________\_____-> Failed
//! ```
//!
//! Entering `Failed` always runs cleanup first: the write end is closed, the
//! consumer is terminated if still running, the collectors are joined, and the
//! FIFO file is removed.

pub mod channel;
pub mod consumer;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bulkbyte_types::error::StepError;
use bulkbyte_types::result::SinkReport;

use crate::context::{Context, LogLevel};
use crate::dialect::LoaderCommand;

pub use channel::{fifo_file_name, ChannelProvisioner, ProvisionError};
pub use consumer::ConsumerProcess;

use channel::{ByteChannel, SinkWriter};

/// Path handed to a consumer that reads its standard input.
pub const STDIN_PATH: &str = "/dev/stdin";

const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_FINISH_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Sink session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkState {
    Created,
    PipeReady,
    ConsumerRunning,
    Draining,
    Closed,
    Failed,
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::PipeReady => "pipe_ready",
            Self::ConsumerRunning => "consumer_running",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Bounds and channel choice for one session.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub provisioner: ChannelProvisioner,
    /// Bound on the write-end rendezvous.
    pub open_timeout: Duration,
    /// Bound on waiting for the consumer to exit after end of input.
    pub finish_timeout: Duration,
    pub poll_interval: Duration,
    /// Time between SIGTERM and SIGKILL when terminating the consumer.
    pub terminate_grace: Duration,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            provisioner: ChannelProvisioner::platform_default(std::env::temp_dir()),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            finish_timeout: DEFAULT_FINISH_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }
}

/// Final report of a cleanly closed session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkOutcome {
    pub exit_code: i32,
    pub records_written: u64,
    pub bytes_written: u64,
    pub stdout: String,
    pub stderr: String,
}

impl From<SinkOutcome> for SinkReport {
    fn from(o: SinkOutcome) -> Self {
        SinkReport {
            exit_code: o.exit_code,
            records_written: o.records_written,
            bytes_written: o.bytes_written,
            stdout: o.stdout,
            stderr: o.stderr,
        }
    }
}

/// One producer-to-consumer bridge, exclusively owned by a step execution.
pub struct SinkSession {
    ctx: Context,
    settings: SinkSettings,
    state: SinkState,
    channel: Option<ByteChannel>,
    consumer: Option<ConsumerProcess>,
    writer: Option<SinkWriter>,
    records_written: u64,
    bytes_written: u64,
}

impl SinkSession {
    pub fn new(ctx: Context, settings: SinkSettings) -> Self {
        Self {
            ctx,
            settings,
            state: SinkState::Created,
            channel: None,
            consumer: None,
            writer: None,
            records_written: 0,
            bytes_written: 0,
        }
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// FIFO path, once provisioned.
    pub fn pipe_path(&self) -> Option<&Path> {
        self.channel.as_ref().and_then(ByteChannel::path)
    }

    /// Path the consumer should read from: the FIFO, or stdin.
    pub fn input_path(&self) -> PathBuf {
        self.pipe_path()
            .map_or_else(|| PathBuf::from(STDIN_PATH), Path::to_path_buf)
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn expect_state(&self, expected: &[SinkState], op: &str) -> Result<(), StepError> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(StepError::internal(
                "SINK_STATE",
                format!("cannot {op} while sink is {}", self.state),
            ))
        }
    }

    /// `Created -> PipeReady`: allocate the byte channel.
    ///
    /// # Errors
    ///
    /// Returns a `resource` error (including `UNSUPPORTED_PLATFORM`) if the
    /// channel cannot be created; the session is then `Failed`.
    pub fn provision_channel(&mut self) -> Result<(), StepError> {
        self.expect_state(&[SinkState::Created], "provision channel")?;
        match self.settings.provisioner.provision(self.ctx.step()) {
            Ok(channel) => {
                if let Some(path) = channel.path() {
                    self.ctx
                        .log(LogLevel::Debug, &format!("pipe ready at {}", path.display()));
                }
                self.channel = Some(channel);
                self.state = SinkState::PipeReady;
                Ok(())
            }
            Err(e) => {
                self.state = SinkState::Failed;
                Err(e.into())
            }
        }
    }

    /// `PipeReady -> ConsumerRunning`: launch the consumer bound to the channel.
    ///
    /// # Errors
    ///
    /// Returns a `sink_process` error if the command cannot be started; the
    /// session is cleaned up and `Failed`.
    pub async fn start_consumer(&mut self, command: &LoaderCommand) -> Result<(), StepError> {
        self.expect_state(&[SinkState::PipeReady], "start consumer")?;
        let pipe_stdin = matches!(self.channel, Some(ByteChannel::Stdin { .. }));
        match ConsumerProcess::spawn(&self.ctx, command, pipe_stdin) {
            Ok(consumer) => {
                self.consumer = Some(consumer);
                self.state = SinkState::ConsumerRunning;
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// `ConsumerRunning -> Draining`: obtain the write end.
    ///
    /// For a FIFO this waits, up to the open timeout, for the consumer to open
    /// the read end. Allowed from `PipeReady` as well, in which case no reader
    /// can appear and the open times out.
    ///
    /// # Errors
    ///
    /// Returns a `timeout` error if no reader appears in time, or a
    /// `sink_process` error if the consumer exits first.
    pub async fn open_writer(&mut self) -> Result<(), StepError> {
        self.expect_state(&[SinkState::PipeReady, SinkState::ConsumerRunning], "open writer")?;
        let opened = match &self.channel {
            Some(ByteChannel::Fifo(fifo)) => {
                let path = fifo.path().to_path_buf();
                SinkWriter::open_fifo(
                    &path,
                    self.consumer.as_mut(),
                    self.settings.open_timeout,
                    self.settings.poll_interval,
                )
                .await
            }
            Some(ByteChannel::Stdin { capacity }) => {
                let capacity = *capacity;
                match self.consumer.as_mut().and_then(ConsumerProcess::take_stdin) {
                    Some(stdin) => Ok(SinkWriter::queue(stdin, capacity)),
                    None => Err(StepError::internal(
                        "SINK_NO_CONSUMER",
                        "stdin channel needs a running consumer",
                    )),
                }
            }
            None => Err(StepError::internal("SINK_NO_CHANNEL", "channel not provisioned")),
        };
        match opened {
            Ok(writer) => {
                self.writer = Some(writer);
                self.state = SinkState::Draining;
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Write one complete encoded record.
    ///
    /// # Errors
    ///
    /// Returns a `sink_process` error if the consumer stopped reading; the
    /// session is cleaned up and `Failed`.
    pub async fn write_record(&mut self, record: &[u8]) -> Result<(), StepError> {
        self.expect_state(&[SinkState::Draining], "write")?;
        let Some(writer) = self.writer.as_mut() else {
            return Err(StepError::internal("SINK_NO_WRITER", "writer missing"));
        };
        match writer.write_all(record).await {
            Ok(()) => {
                self.records_written += 1;
                self.bytes_written += record.len() as u64;
                Ok(())
            }
            Err(e) => {
                let err = StepError::sink_process(
                    "PIPE_WRITE",
                    format!("consumer stopped reading after {} bytes: {e}", self.bytes_written),
                );
                Err(self.fail(err).await)
            }
        }
    }

    /// `Draining -> Closed`: signal end of input and wait for the consumer.
    ///
    /// A session still in `ConsumerRunning` (no records written) opens and
    /// immediately closes the write end so the consumer sees end of input.
    ///
    /// # Errors
    ///
    /// Returns a `timeout` error if the consumer does not exit in time, or a
    /// `sink_process` error carrying captured stderr on non-zero exit.
    pub async fn finish(&mut self) -> Result<SinkOutcome, StepError> {
        if self.state == SinkState::ConsumerRunning {
            self.open_writer().await?;
        }
        self.expect_state(&[SinkState::Draining], "finish")?;

        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                let err = StepError::sink_process("PIPE_CLOSE", format!("closing pipe failed: {e}"));
                return Err(self.fail(err).await);
            }
        }

        let timeout = self.settings.finish_timeout;
        let Some(consumer) = self.consumer.as_mut() else {
            self.remove_pipe();
            self.state = SinkState::Closed;
            return Ok(self.outcome(0, String::new(), String::new()));
        };
        let status = match consumer.wait(timeout).await {
            Ok(status) => status,
            Err(e) => return Err(self.fail(e).await),
        };
        let (stdout, stderr) = consumer.collect_output(timeout).await;
        self.consumer = None;
        self.remove_pipe();

        let exit_code = status.code().unwrap_or(-1);
        if status.success() {
            self.state = SinkState::Closed;
            self.ctx.log(
                LogLevel::Info,
                &format!(
                    "consumer finished: {} records, {} bytes",
                    self.records_written, self.bytes_written
                ),
            );
            Ok(self.outcome(exit_code, stdout, stderr))
        } else {
            self.state = SinkState::Failed;
            let last = stderr.lines().last().unwrap_or("no stderr output");
            Err(StepError::sink_process(
                "CONSUMER_EXIT",
                format!("consumer exited with {status}: {last}"),
            )
            .with_details(serde_json::json!({
                "exit_code": exit_code,
                "stderr": stderr,
                "stdout": stdout,
            })))
        }
    }

    /// Move to `Failed`, running full cleanup. A no-op once `Closed` or `Failed`.
    pub async fn abort(&mut self) {
        if matches!(self.state, SinkState::Closed | SinkState::Failed) {
            return;
        }
        self.ctx.log(LogLevel::Warn, &format!("aborting sink in state {}", self.state));
        self.cleanup().await;
        self.state = SinkState::Failed;
    }

    async fn fail(&mut self, err: StepError) -> StepError {
        self.ctx.log(LogLevel::Error, &err.to_string());
        let stderr = self.cleanup().await.filter(|s| !s.is_empty());
        self.state = SinkState::Failed;
        match stderr {
            Some(stderr) if err.details.is_none() => {
                err.with_details(serde_json::json!({ "stderr": stderr }))
            }
            _ => err,
        }
    }

    /// Close the write end, stop the consumer, join collectors, remove the pipe.
    /// Returns the consumer's stderr tail if one was running.
    async fn cleanup(&mut self) -> Option<String> {
        // Dropping the write end unblocks a consumer waiting for input.
        drop(self.writer.take());

        let stderr = match self.consumer.take() {
            Some(mut consumer) => {
                consumer.terminate(self.settings.terminate_grace).await;
                let (_, stderr) = consumer.collect_output(self.settings.terminate_grace).await;
                Some(stderr)
            }
            None => None,
        };
        self.remove_pipe();
        stderr
    }

    fn remove_pipe(&mut self) {
        if let Some(ByteChannel::Fifo(mut fifo)) = self.channel.take() {
            if let Err(e) = fifo.remove() {
                self.ctx.log(
                    LogLevel::Warn,
                    &format!("failed to remove {}: {e}", fifo.path().display()),
                );
            }
        }
    }

    fn outcome(&self, exit_code: i32, stdout: String, stderr: String) -> SinkOutcome {
        SinkOutcome {
            exit_code,
            records_written: self.records_written,
            bytes_written: self.bytes_written,
            stdout,
            stderr,
        }
    }
}

impl fmt::Debug for SinkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSession")
            .field("step", &self.ctx.step())
            .field("state", &self.state)
            .field("pipe", &self.pipe_path())
            .field("records_written", &self.records_written)
            .finish_non_exhaustive()
    }
}
