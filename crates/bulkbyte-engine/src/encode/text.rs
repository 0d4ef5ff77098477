//! Delimited text encoding for bulk loaders.

use bulkbyte_types::mapping::{FormatHint, ResolvedMapping};
use bulkbyte_types::row::{Row, RowValue};

use super::{column_plans, plain_decimal, ColumnPlan, EncodeError, RowEncoder};

const DEFAULT_DATE: &str = "%Y/%m/%d %H:%M:%S%.3f";
const DATE_ONLY: &str = "%Y-%m-%d";
const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";
/// Fractional digits beyond this carry no information for an `f64`.
const MAX_FLOAT_DIGITS: usize = 17;

/// Separator, quoting, and null rules for the text encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFormat {
    pub delimiter: String,
    /// Quote placed around string values.
    pub enclosure: Option<String>,
    /// Escape prefix used by [`FormatHint::StringEscape`].
    pub escape: Option<String>,
    /// Written for null values, never enclosed.
    pub null_marker: String,
    pub line_terminator: String,
}

impl Default for TextFormat {
    fn default() -> Self {
        Self {
            delimiter: "\t".into(),
            enclosure: Some("\"".into()),
            escape: Some("\\".into()),
            null_marker: String::new(),
            line_terminator: "\n".into(),
        }
    }
}

#[derive(Debug, Clone)]
struct TextColumn {
    plan: ColumnPlan,
    hint: FormatHint,
}

/// Encodes rows as one delimited line each, in target column order.
#[derive(Debug, Clone)]
pub struct TextEncoder {
    format: TextFormat,
    columns: Vec<TextColumn>,
}

impl TextEncoder {
    pub fn new(resolved: &ResolvedMapping, format: TextFormat) -> Self {
        let columns = column_plans(resolved)
            .into_iter()
            .zip(resolved.formats.iter().copied())
            .map(|(plan, hint)| TextColumn { plan, hint })
            .collect();
        Self { format, columns }
    }

    pub fn format(&self) -> &TextFormat {
        &self.format
    }

    fn escaped(&self, value: &str) -> String {
        let Some(escape) = self.format.escape.as_deref().filter(|e| !e.is_empty()) else {
            return value.to_string();
        };
        let mut out = value.replace(escape, &format!("{escape}{escape}"));
        match self.format.enclosure.as_deref().filter(|e| !e.is_empty()) {
            Some(enclosure) => {
                out = out.replace(enclosure, &format!("{escape}{enclosure}"));
            }
            None => {
                for special in [self.format.delimiter.as_str(), self.format.line_terminator.as_str()] {
                    if !special.is_empty() {
                        out = out.replace(special, &format!("{escape}{special}"));
                    }
                }
            }
        }
        out
    }

    fn push_string(&self, s: &str, hint: FormatHint, buf: &mut Vec<u8>) {
        let body = match hint {
            FormatHint::StringEscape => self.escaped(s),
            _ => s.to_string(),
        };
        let enclosure = self.format.enclosure.as_deref().unwrap_or("");
        buf.extend_from_slice(enclosure.as_bytes());
        buf.extend_from_slice(body.as_bytes());
        buf.extend_from_slice(enclosure.as_bytes());
    }

    fn push_value(&self, column: &TextColumn, value: &RowValue, buf: &mut Vec<u8>) {
        let precision = column.plan.field.precision;
        match value {
            RowValue::Null => buf.extend_from_slice(self.format.null_marker.as_bytes()),
            RowValue::String(s) => self.push_string(s, column.hint, buf),
            RowValue::Integer(i) => buf.extend_from_slice(i.to_string().as_bytes()),
            RowValue::Number(n) => {
                let text = if n.is_nan() {
                    "NaN".to_string()
                } else if n.is_infinite() {
                    if *n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
                } else {
                    match (column.hint, precision) {
                        (FormatHint::Number, Some(p)) => {
                            format!("{n:.prec$}", prec = (p as usize).min(MAX_FLOAT_DIGITS))
                        }
                        _ => n.to_string(),
                    }
                };
                buf.extend_from_slice(text.as_bytes());
            }
            RowValue::BigNumber(d) => {
                let text = match (column.hint, precision) {
                    (FormatHint::Number, Some(p)) => plain_decimal(&d.round(i64::from(p))),
                    _ => plain_decimal(d),
                };
                buf.extend_from_slice(text.as_bytes());
            }
            RowValue::Date(dt) => {
                let pattern = match column.hint {
                    FormatHint::Date => DATE_ONLY,
                    FormatHint::Timestamp => TIMESTAMP,
                    _ => DEFAULT_DATE,
                };
                buf.extend_from_slice(dt.format(pattern).to_string().as_bytes());
            }
            RowValue::Boolean(b) => buf.push(if *b { b'Y' } else { b'N' }),
            RowValue::Binary(bytes) => buf.extend_from_slice(bytes),
        }
    }
}

impl RowEncoder for TextEncoder {
    fn encode_row(&self, row: &Row, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                buf.extend_from_slice(self.format.delimiter.as_bytes());
            }
            let value = column.plan.value(row)?;
            self.push_value(column, value, buf);
        }
        buf.extend_from_slice(self.format.line_terminator.as_bytes());
        Ok(())
    }
}
