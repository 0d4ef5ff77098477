//! Step runtime: negotiates fields, acquires targets, streams rows, and
//! finalizes or tears down every resource it acquired.

mod targets;

use std::path::PathBuf;
use std::time::Instant;

use bulkbyte_types::error::{ErrorCategory, StepError};
use bulkbyte_types::mapping::ResolvedMapping;
use bulkbyte_types::result::StepResult;
use bulkbyte_types::row::Row;
use bulkbyte_types::row_meta::RowMetadata;
use chrono::Local;
use tokio_util::sync::CancellationToken;

use crate::config::types::{EncodingErrorPolicy, StepConfig};
use crate::config::{validate_against_metadata, validate_step};
use crate::context::{Context, LogLevel};
use crate::dialect::add_column_statements;
use crate::errors::StepFailure;
use crate::output::{claim_output_path, OutputClaim};
use crate::source::RowSource;

use targets::{FileTarget, Finished, LoaderTarget, Target};

/// Result of field negotiation: the upstream contract and the output one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFields {
    pub input: RowMetadata,
    pub resolved: ResolvedMapping,
}

impl NegotiatedFields {
    /// Output metadata, in target column order.
    pub fn output(&self) -> &RowMetadata {
        &self.resolved.target
    }
}

/// Why the row loop stopped early.
enum Interrupted {
    Cancelled,
    Failed(StepError),
}

/// One step execution bound to its configuration.
#[derive(Debug)]
pub struct StepRuntime {
    ctx: Context,
    config: StepConfig,
}

impl StepRuntime {
    /// Bind a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a `config` failure listing every validation problem.
    pub fn new(ctx: Context, config: StepConfig) -> Result<Self, StepFailure> {
        validate_step(&config)
            .map_err(|e| StepError::config("INVALID_CONFIG", format!("{e:#}")))?;
        Ok(Self { ctx, config })
    }

    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Build the output contract from `input` and the mapping. Output fields
    /// are renamed copies of the upstream descriptors, with this step as origin.
    ///
    /// # Errors
    ///
    /// Returns a `config` error if a mapped field is missing upstream or two
    /// mapping entries collide on the same column.
    pub fn negotiate_fields(&self, input: &RowMetadata) -> Result<NegotiatedFields, StepError> {
        validate_against_metadata(&self.config, input)?;
        let mut resolved = self.config.mapping.resolve(input)?;
        let mut output = RowMetadata::new();
        output.merge(&resolved.target, self.ctx.step())?;
        resolved.target = output;
        Ok(NegotiatedFields {
            input: input.clone(),
            resolved,
        })
    }

    /// `ALTER TABLE ... ADD` statements for the target columns.
    ///
    /// # Errors
    ///
    /// Returns a `config` error without a connection, or a `schema` error if
    /// any column type is unknown to the dialect.
    pub fn ddl_preview(&self, input: &RowMetadata) -> Result<Vec<String>, StepError> {
        let Some(connection) = &self.config.connection else {
            return Err(StepError::config(
                "NO_CONNECTION",
                "a connection is required to render DDL",
            ));
        };
        let dialect = connection.family.dialect();
        let negotiated = self.negotiate_fields(input)?;
        let table = dialect.schema_table(self.config.target.schema.as_deref(), &self.config.target.table);
        add_column_statements(dialect, &table, negotiated.output(), &self.config.target.keys())
    }

    /// Execute the step over `source`.
    ///
    /// Configuration problems are returned as `Err` before any row is read.
    /// Every other failure, and cancellation, is reported through a failed
    /// [`StepResult`] after all targets have been torn down.
    ///
    /// # Errors
    ///
    /// Returns a `config` failure for mapping or output-policy problems.
    pub async fn run<S: RowSource>(
        &self,
        input: &RowMetadata,
        mut source: S,
        cancel: CancellationToken,
    ) -> Result<StepResult, StepFailure> {
        let start = Instant::now();
        let negotiated = self.negotiate_fields(input)?;
        self.ctx.log(
            LogLevel::Info,
            &format!(
                "starting step: {} fields in, {} columns out",
                negotiated.input.len(),
                negotiated.output().len()
            ),
        );

        let output_file = match &self.config.output {
            Some(output) => match claim_output_path(&output.path, output.if_exists, Local::now()).await {
                Ok(OutputClaim::Created(path, file)) => Some((path, file)),
                Ok(OutputClaim::Skipped(path)) => {
                    self.ctx.log(
                        LogLevel::Info,
                        &format!("output {} exists; skipping it", path.display()),
                    );
                    None
                }
                Err(e) if e.category == ErrorCategory::Config => return Err(e.into()),
                Err(e) => {
                    self.ctx.log(LogLevel::Error, &format!("step failed: {e}"));
                    let mut result = StepResult {
                        error_count: 1,
                        error: Some(e),
                        ..StepResult::default()
                    };
                    result.duration_secs = start.elapsed().as_secs_f64();
                    return Ok(result);
                }
            },
            None => None,
        };
        if output_file.is_none() && !self.config.has_loader() {
            let mut result = StepResult::empty_success();
            result.duration_secs = start.elapsed().as_secs_f64();
            return Ok(result);
        }

        let mut result = StepResult::default();
        let mut targets = Vec::new();
        let outcome = match self
            .acquire(&negotiated.resolved, output_file, &mut targets, &cancel)
            .await
        {
            Ok(()) => {
                self.pump(&negotiated.input, &mut source, &mut targets, &mut result, &cancel)
                    .await
            }
            Err(Interrupted::Failed(e)) if e.category == ErrorCategory::Config => {
                self.teardown(&mut targets).await;
                return Err(e.into());
            }
            Err(interrupted) => Err(interrupted),
        };

        let outcome = match outcome {
            Ok(()) => self.finalize(&mut targets, &mut result).await,
            Err(interrupted) => Err(interrupted),
        };

        match outcome {
            Ok(()) => {
                result.succeeded = result.error_count == 0 || self.config.policy.ignore_errors;
            }
            Err(interrupted) => {
                self.teardown(&mut targets).await;
                result.files.clear();
                result.succeeded = false;
                match interrupted {
                    Interrupted::Cancelled => {
                        self.ctx.log(LogLevel::Warn, "step cancelled");
                        result.cancelled = true;
                        result.error = Some(StepError::cancelled("step cancelled"));
                    }
                    Interrupted::Failed(e) => {
                        self.ctx.log(LogLevel::Error, &format!("step failed: {e}"));
                        result.error_count += 1;
                        result.error = Some(e);
                    }
                }
            }
        }

        result.duration_secs = start.elapsed().as_secs_f64();
        self.ctx.log(
            LogLevel::Info,
            &format!(
                "step finished: succeeded={} read={} written={} errors={}",
                result.succeeded, result.rows_read, result.rows_written, result.error_count
            ),
        );
        Ok(result)
    }

    /// Open every configured target. Targets acquired before a failure are
    /// left in `targets` so the caller can tear them down.
    async fn acquire(
        &self,
        resolved: &ResolvedMapping,
        output_file: Option<(PathBuf, tokio::fs::File)>,
        targets: &mut Vec<Target>,
        cancel: &CancellationToken,
    ) -> Result<(), Interrupted> {
        if let (Some(output), Some((path, file))) = (&self.config.output, output_file) {
            let mut target = FileTarget::new(&self.ctx, output, path, file, &self.config, resolved);
            let header = target.write_header().await;
            targets.push(Target::File(target));
            header.map_err(Interrupted::Failed)?;
        }

        if self.config.has_loader() {
            let loader = LoaderTarget::start(&self.ctx, &self.config, resolved)
                .await
                .map_err(Interrupted::Failed)?;
            targets.push(Target::Loader(loader));
            let Some(Target::Loader(loader)) = targets.last_mut() else {
                return Err(Interrupted::Failed(StepError::internal(
                    "TARGET_MISSING",
                    "loader target vanished",
                )));
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Interrupted::Cancelled),
                opened = loader.open() => opened.map_err(Interrupted::Failed)?,
            }
        }
        Ok(())
    }

    /// Pull rows until end of stream, checking each against `input`,
    /// encoding it once per target, and writing it in arrival order.
    async fn pump<S: RowSource>(
        &self,
        input: &RowMetadata,
        source: &mut S,
        targets: &mut [Target],
        result: &mut StepResult,
        cancel: &CancellationToken,
    ) -> Result<(), Interrupted> {
        let mut buffers: Vec<Vec<u8>> = targets.iter().map(|_| Vec::new()).collect();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Interrupted::Cancelled),
                next = source.next_row() => next,
            };
            let row: Row = match next {
                Ok(Some(row)) => row,
                Ok(None) => return Ok(()),
                Err(e) => return Err(Interrupted::Failed(e)),
            };
            result.rows_read += 1;

            let encoded = input
                .check_row(&row)
                .map_err(|e| StepError::encoding("ROW_MISMATCH", e.to_string()))
                .and_then(|()| encode_all(targets, &row, &mut buffers));
            if let Err(e) = encoded {
                if e.is_row_scoped() && self.config.policy.on_encoding_error == EncodingErrorPolicy::Skip {
                    result.error_count += 1;
                    self.ctx.log(
                        LogLevel::Warn,
                        &format!("skipping row {}: {e}", result.rows_read),
                    );
                    continue;
                }
                return Err(Interrupted::Failed(e));
            }

            for (target, record) in targets.iter_mut().zip(&buffers) {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Interrupted::Cancelled),
                    written = target.write(record) => written.map_err(Interrupted::Failed)?,
                }
            }
            result.rows_written += 1;
        }
    }

    async fn finalize(
        &self,
        targets: &mut [Target],
        result: &mut StepResult,
    ) -> Result<(), Interrupted> {
        for target in targets.iter_mut() {
            match target.finish().await {
                Ok(Finished::Sink(report)) => result.sink = Some(report),
                Ok(Finished::File(file)) => result.files.push(file),
                Err(e) => {
                    self.ctx.log(
                        LogLevel::Error,
                        &format!("finishing {} failed", target.name()),
                    );
                    return Err(Interrupted::Failed(e));
                }
            }
        }
        Ok(())
    }

    async fn teardown(&self, targets: &mut [Target]) {
        for target in targets.iter_mut() {
            target.abort(&self.ctx).await;
        }
    }
}

/// Encode `row` for every target before any byte is written, so a row is
/// either delivered to all targets or to none.
fn encode_all(targets: &[Target], row: &Row, buffers: &mut [Vec<u8>]) -> Result<(), StepError> {
    for (target, buf) in targets.iter().zip(buffers.iter_mut()) {
        target.encode(row, buf)?;
    }
    Ok(())
}
