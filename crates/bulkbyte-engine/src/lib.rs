//! Bulk-load step engine.
//!
//! Negotiates row metadata against a field mapping, encodes rows as delimited
//! text or cube records, and streams them through a named pipe into an
//! external bulk-load process while draining its output.
//!
//! # Crate structure
//!
//! | Module    | Responsibility |
//! |-----------|----------------|
//! | `config`  | Step YAML types, parsing, validation |
//! | `context` | Step-scoped logging capability |
//! | `dialect` | Per-family URLs, column DDL, loader commands |
//! | `encode`  | Text and cube row encoders, cube reader/writer |
//! | `errors`  | Engine failure type |
//! | `output`  | Existing-output policy |
//! | `sink`    | Byte channel, consumer process, sink session |
//! | `source`  | Upstream row sources |
//! | `step`    | Step runtime |

pub mod config;
pub mod context;
pub mod dialect;
pub mod encode;
pub mod errors;
pub mod output;
pub mod sink;
pub mod source;
pub mod step;

pub use config::{parse_step, parse_step_str, validate_step, StepConfig};
pub use context::{Context, LogLevel};
pub use dialect::{DatabaseFamily, DialectAdapter, LoaderCommand};
pub use encode::{CubeDecoder, CubeEncoder, CubeReader, CubeWriter, RowEncoder, TextEncoder, TextFormat};
pub use errors::StepFailure;
pub use output::{claim_output_path, resolve_output_path, IfExists, OutputClaim, OutputDecision};
pub use sink::{ChannelProvisioner, SinkOutcome, SinkSession, SinkSettings, SinkState};
pub use source::{row_channel, ChannelSource, CubeFileSource, IterSource, RowSource};
pub use step::{NegotiatedFields, StepRuntime};
