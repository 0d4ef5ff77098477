use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bulkbyte_types::mapping::FieldMapping;
use bulkbyte_types::row_meta::{FieldDescriptor, RowMetaError, RowMetadata};
use serde::{Deserialize, Serialize};

use crate::dialect::{AccessMode, ConnectionParams, DatabaseFamily, KeyFields, LoaderCommand};
use crate::encode::TextFormat;
use crate::output::IfExists;
use crate::sink::channel::DEFAULT_QUEUE_CAPACITY;
use crate::sink::{ChannelProvisioner, SinkSettings};

/// Placeholder replaced by the pipe path in custom loader arguments.
pub const PIPE_PLACEHOLDER: &str = "{pipe}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub version: String,
    pub step: String,
    #[serde(default = "default_pipeline")]
    pub pipeline: String,
    #[serde(default)]
    pub input: InputConfig,
    pub connection: Option<ConnectionConfig>,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub mapping: FieldMapping,
    #[serde(default)]
    pub loader: LoaderConfig,
    pub output: Option<OutputConfig>,
    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_pipeline() -> String {
    "bulkbyte".to_string()
}

impl StepConfig {
    /// True when rows are streamed into an external bulk-load process.
    pub fn has_loader(&self) -> bool {
        self.connection.is_some() || self.loader.command.is_some()
    }
}

/// Upstream rows: a cube file, or an inline field list for programmatic sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    pub cube: Option<PathBuf>,
    /// Maximum rows to read; `0` reads everything.
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl InputConfig {
    /// Metadata declared inline, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RowMetaError::DuplicateField`] if two inline fields collide.
    pub fn inline_metadata(&self) -> Result<Option<RowMetadata>, RowMetaError> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        RowMetadata::from_fields(self.fields.iter().cloned()).map(Some)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub family: DatabaseFamily,
    #[serde(default)]
    pub access: AccessMode,
    #[serde(default)]
    pub host: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionConfig {
    pub fn to_params(&self) -> ConnectionParams {
        ConnectionParams {
            access: self.access,
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    pub schema: Option<String>,
    #[serde(default)]
    pub table: String,
    pub technical_key: Option<String>,
    pub primary_key: Option<String>,
}

impl TargetConfig {
    pub fn keys(&self) -> KeyFields {
        KeyFields {
            technical_key: self.technical_key.clone(),
            primary_key: self.primary_key.clone(),
        }
    }
}

/// How the byte channel to the loader is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Fifo,
    Stdin,
}

/// A user-supplied loader command replacing the family default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOverride {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandOverride {
    /// Substitute [`PIPE_PLACEHOLDER`] in every argument.
    pub fn build(&self, pipe: &Path) -> LoaderCommand {
        let pipe = pipe.to_string_lossy();
        LoaderCommand {
            program: self.program.clone(),
            args: self
                .args
                .iter()
                .map(|a| a.replace(PIPE_PLACEHOLDER, &pipe))
                .collect(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Empty disables enclosing.
    #[serde(default = "default_enclosure")]
    pub enclosure: String,
    /// Empty disables escaping.
    #[serde(default = "default_escape")]
    pub escape: String,
    #[serde(default)]
    pub replace: bool,
    #[serde(default)]
    pub ignore_errors: bool,
    /// Overrides the family's null marker.
    pub null_marker: Option<String>,
    #[serde(default = "default_fifo_dir")]
    pub fifo_dir: PathBuf,
    /// Defaults to a FIFO where the platform supports one.
    pub channel: Option<ChannelKind>,
    pub command: Option<CommandOverride>,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_finish_timeout_ms")]
    pub finish_timeout_ms: u64,
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
}

fn default_delimiter() -> String {
    "\t".to_string()
}
fn default_enclosure() -> String {
    "\"".to_string()
}
fn default_escape() -> String {
    "\\".to_string()
}
fn default_fifo_dir() -> PathBuf {
    PathBuf::from("/tmp")
}
fn default_open_timeout_ms() -> u64 {
    10_000
}
fn default_finish_timeout_ms() -> u64 {
    60_000
}
fn default_terminate_grace_ms() -> u64 {
    2_000
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            enclosure: default_enclosure(),
            escape: default_escape(),
            replace: false,
            ignore_errors: false,
            null_marker: None,
            fifo_dir: default_fifo_dir(),
            channel: None,
            command: None,
            open_timeout_ms: default_open_timeout_ms(),
            finish_timeout_ms: default_finish_timeout_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

impl LoaderConfig {
    pub fn enclosure(&self) -> Option<&str> {
        non_empty(&self.enclosure)
    }

    pub fn escape(&self) -> Option<&str> {
        non_empty(&self.escape)
    }

    /// Text encoding rules, with `default_null` used unless overridden.
    pub fn text_format(&self, default_null: String) -> TextFormat {
        TextFormat {
            delimiter: self.delimiter.clone(),
            enclosure: self.enclosure().map(str::to_string),
            escape: self.escape().map(str::to_string),
            null_marker: self.null_marker.clone().unwrap_or(default_null),
            ..TextFormat::default()
        }
    }

    pub fn sink_settings(&self) -> SinkSettings {
        let provisioner = match self.channel {
            Some(ChannelKind::Fifo) => ChannelProvisioner::Fifo {
                dir: self.fifo_dir.clone(),
            },
            Some(ChannelKind::Stdin) => ChannelProvisioner::Stdin {
                capacity: DEFAULT_QUEUE_CAPACITY,
            },
            None => ChannelProvisioner::platform_default(self.fifo_dir.clone()),
        };
        SinkSettings {
            provisioner,
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            finish_timeout: Duration::from_millis(self.finish_timeout_ms),
            terminate_grace: Duration::from_millis(self.terminate_grace_ms),
            ..SinkSettings::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Cube,
}

/// Optional file written alongside (or instead of) the loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub if_exists: IfExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingErrorPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub on_encoding_error: EncodingErrorPolicy,
    /// Count the step as succeeded even when rows were rejected.
    #[serde(default)]
    pub ignore_errors: bool,
}
