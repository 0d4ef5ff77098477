//! Step execution context.
//!
//! `Context` carries the identity of the running step and is the only logging
//! handle runtime code uses, so every event is tagged with the step that
//! produced it.

/// Log severity levels used by [`Context::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Identity of one step execution, passed into the runtime at construction.
///
/// ```ignore
/// let ctx = Context::new("nightly", "load customers");
/// ctx.log(LogLevel::Info, "opening pipe");
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    pipeline: String,
    step: String,
}

impl Context {
    pub fn new(pipeline: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            step: step.into(),
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// Derive a context for another step of the same pipeline.
    pub fn with_step(&self, step: impl Into<String>) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            step: step.into(),
        }
    }

    /// Emit a log event tagged with this step's identity.
    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => {
                tracing::error!(pipeline = %self.pipeline, step = %self.step, "{message}");
            }
            LogLevel::Warn => {
                tracing::warn!(pipeline = %self.pipeline, step = %self.step, "{message}");
            }
            LogLevel::Info => {
                tracing::info!(pipeline = %self.pipeline, step = %self.step, "{message}");
            }
            LogLevel::Debug => {
                tracing::debug!(pipeline = %self.pipeline, step = %self.step, "{message}");
            }
        }
    }
}
