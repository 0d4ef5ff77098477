//! External consumer process and its output collectors.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bulkbyte_types::error::StepError;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use crate::context::{Context, LogLevel};
use crate::dialect::LoaderCommand;

/// Bytes of each output stream kept for error reports.
const TAIL_BYTES: usize = 16 * 1024;
const MAX_LINE_CHARS: usize = 2048;

/// Rolling window over the last lines of an output stream.
#[derive(Debug, Default)]
struct OutputTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl OutputTail {
    fn push(&mut self, line: &str) {
        let line: String = line.chars().take(MAX_LINE_CHARS).collect();
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        while self.bytes > TAIL_BYTES {
            match self.lines.pop_front() {
                Some(dropped) => self.bytes -= dropped.len() + 1,
                None => break,
            }
        }
    }

    fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

fn collect<R>(reader: R, stream: &'static str, ctx: Context) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut tail = OutputTail::default();
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end_matches(['\r', '\n']);
                    if stream == "stderr" {
                        tracing::warn!(step = %ctx.step(), stream, "{text}");
                    } else {
                        tracing::debug!(step = %ctx.step(), stream, "{text}");
                    }
                    tail.push(text);
                }
                Err(e) => {
                    ctx.log(LogLevel::Warn, &format!("stopped reading consumer {stream}: {e}"));
                    break;
                }
            }
        }
        tail.into_string()
    })
}

/// A running bulk-load command with stdout/stderr drained in the background.
#[derive(Debug)]
pub struct ConsumerProcess {
    ctx: Context,
    child: Child,
    pid: Option<u32>,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
    exit: Option<ExitStatus>,
}

impl ConsumerProcess {
    /// Launch `command` in its own process group.
    ///
    /// # Errors
    ///
    /// Returns a `sink_process` error if the program cannot be started.
    pub fn spawn(ctx: &Context, command: &LoaderCommand, pipe_stdin: bool) -> Result<Self, StepError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            StepError::sink_process(
                "CONSUMER_SPAWN",
                format!("failed to start '{}': {e}", command.program),
            )
        })?;

        let pid = child.id();
        let stdout = child.stdout.take().map(|s| collect(s, "stdout", ctx.clone()));
        let stderr = child.stderr.take().map(|s| collect(s, "stderr", ctx.clone()));
        ctx.log(
            LogLevel::Info,
            &format!("started consumer (pid {}): {}", pid.unwrap_or(0), command.display()),
        );

        Ok(Self {
            ctx: ctx.clone(),
            child,
            pid,
            stdout,
            stderr,
            exit: None,
        })
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Non-blocking exit check.
    ///
    /// # Errors
    ///
    /// Returns a `sink_process` error if the status cannot be queried.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, StepError> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        let status = self
            .child
            .try_wait()
            .map_err(|e| StepError::sink_process("CONSUMER_WAIT", e.to_string()))?;
        self.exit = status;
        Ok(status)
    }

    /// Wait for exit, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a `timeout` error if the process is still running at the deadline.
    pub async fn wait(&mut self, timeout: Duration) -> Result<ExitStatus, StepError> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit = Some(status);
                Ok(status)
            }
            Ok(Err(e)) => Err(StepError::sink_process("CONSUMER_WAIT", e.to_string())),
            Err(_) => Err(StepError::timeout(
                "CONSUMER_EXIT_TIMEOUT",
                format!("consumer still running after {}ms", timeout.as_millis()),
            )),
        }
    }

    /// Join both collectors and return `(stdout, stderr)` tails.
    ///
    /// Collectors that do not finish within `timeout` are aborted and
    /// contribute an empty tail.
    pub async fn collect_output(&mut self, timeout: Duration) -> (String, String) {
        let deadline = tokio::time::Instant::now() + timeout;
        let stdout = join_collector(self.stdout.take(), deadline, &self.ctx).await;
        let stderr = join_collector(self.stderr.take(), deadline, &self.ctx).await;
        (stdout, stderr)
    }

    /// SIGTERM the process group, then kill it if it outlives `grace`.
    pub async fn terminate(&mut self, grace: Duration) {
        if matches!(self.try_wait(), Ok(Some(_))) {
            return;
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            // SAFETY: signalling our own child's process group.
            unsafe {
                libc::kill(-pid, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        if self.wait(grace).await.is_ok() {
            return;
        }
        self.ctx
            .log(LogLevel::Warn, "consumer ignored SIGTERM; killing");
        #[cfg(unix)]
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            // SAFETY: as above.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
        match self.child.kill().await {
            Ok(()) => self.exit = self.child.try_wait().ok().flatten(),
            Err(e) => self
                .ctx
                .log(LogLevel::Warn, &format!("failed to kill consumer: {e}")),
        }
    }
}

async fn join_collector(
    handle: Option<JoinHandle<String>>,
    deadline: tokio::time::Instant,
    ctx: &Context,
) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) => {
            ctx.log(LogLevel::Warn, &format!("output collector failed: {e}"));
            String::new()
        }
        Err(_) => {
            handle.abort();
            ctx.log(LogLevel::Warn, "output collector did not finish; aborted");
            String::new()
        }
    }
}

impl Drop for ConsumerProcess {
    fn drop(&mut self) {
        for handle in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_most_recent_lines() {
        let mut tail = OutputTail::default();
        let line = "x".repeat(1000);
        for _ in 0..40 {
            tail.push(&line);
        }
        tail.push("last");
        assert!(tail.bytes <= TAIL_BYTES);
        assert!(tail.into_string().ends_with("\nlast"));
    }

    #[test]
    fn tail_truncates_long_lines() {
        let mut tail = OutputTail::default();
        tail.push(&"y".repeat(MAX_LINE_CHARS * 2));
        assert_eq!(tail.into_string().len(), MAX_LINE_CHARS);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let ctx = Context::new("test", "consumer");
        let cmd = LoaderCommand {
            program: "sh".into(),
            args: vec!["-c".into(), "echo out; echo oops >&2; exit 3".into()],
            env: vec![],
        };
        let mut consumer = ConsumerProcess::spawn(&ctx, &cmd, false).unwrap();
        let status = consumer.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.code(), Some(3));
        let (stdout, stderr) = consumer.collect_output(Duration::from_secs(5)).await;
        assert_eq!(stdout, "out");
        assert_eq!(stderr, "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_stops_a_sleeping_consumer() {
        let ctx = Context::new("test", "consumer");
        let cmd = LoaderCommand {
            program: "sleep".into(),
            args: vec!["30".into()],
            env: vec![],
        };
        let mut consumer = ConsumerProcess::spawn(&ctx, &cmd, false).unwrap();
        let started = std::time::Instant::now();
        consumer.terminate(Duration::from_secs(2)).await;
        assert!(consumer.exit_status().is_some());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let ctx = Context::new("test", "consumer");
        let cmd = LoaderCommand {
            program: "bulkbyte-definitely-not-a-program".into(),
            ..LoaderCommand::default()
        };
        let err = ConsumerProcess::spawn(&ctx, &cmd, false).unwrap_err();
        assert_eq!(err.code, "CONSUMER_SPAWN");
    }
}
