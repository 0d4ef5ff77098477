//! Binary cube row-stream format.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! header  := MAGIC version:u16 field_count:u32 field*
//! field   := name:str tag:u8 length:opt precision:opt origin:str
//! record  := byte_len:u32 value{field_count}
//! value   := 0x00                          (null)
//!          | tag:u8 payload
//! str     := len:u32 utf8-bytes
//! opt     := 0x00 | 0x01 value:u32
//! ```
//!
//! Payloads: string/binary `len:u32 bytes`, integer `i64`, number `f64` bits,
//! big number as a plain decimal `str`, date `secs:i64 nanos:u32`, boolean `u8`.

use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::path::Path;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use bulkbyte_types::error::{ErrorScope, StepError};
use bulkbyte_types::mapping::ResolvedMapping;
use bulkbyte_types::row::{Row, RowValue};
use bulkbyte_types::row_meta::{FieldDescriptor, RowMetaError, RowMetadata};
use bulkbyte_types::value_type::ValueType;
use bytes::BufMut;
use chrono::DateTime;

use super::{column_plans, plain_decimal, ColumnPlan, EncodeError, RowEncoder};

pub const MAGIC: &[u8; 8] = b"BBCUBE\n\0";
pub const VERSION: u16 = 1;

const NULL_TAG: u8 = 0;

/// Failure reading or writing a cube stream.
#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    #[error("cube I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a cube stream (bad magic)")]
    BadMagic,

    #[error("unsupported cube version {0}")]
    UnsupportedVersion(u16),

    #[error("cube stream truncated while reading {0}")]
    Truncated(&'static str),

    #[error("unknown value tag {tag:#04x} for field '{field}'")]
    UnknownTag { field: String, tag: u8 },

    #[error("field '{field}' is {expected} but record holds {actual}")]
    TagMismatch {
        field: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("invalid {0} in cube stream")]
    Invalid(&'static str),

    #[error("record declares {declared} bytes but values span {used}")]
    RecordLength { declared: usize, used: usize },

    #[error(transparent)]
    Metadata(#[from] RowMetaError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl From<CubeError> for StepError {
    fn from(err: CubeError) -> Self {
        match err {
            CubeError::Io(e) => StepError::resource("CUBE_IO", e.to_string()),
            CubeError::Encode(e) => e.into(),
            other => StepError::encoding("CUBE_FORMAT", other.to_string())
                .with_scope(ErrorScope::Step),
        }
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_opt(buf: &mut Vec<u8>, v: Option<u32>) {
    match v {
        Some(v) => {
            buf.put_u8(1);
            buf.put_u32(v);
        }
        None => buf.put_u8(0),
    }
}

/// Serialize `meta` as a cube header.
pub fn encode_header(meta: &RowMetadata, buf: &mut Vec<u8>) {
    buf.put_slice(MAGIC);
    buf.put_u16(VERSION);
    buf.put_u32(meta.len() as u32);
    for field in meta {
        put_str(buf, &field.name);
        buf.put_u8(field.value_type.tag());
        put_opt(buf, field.length);
        put_opt(buf, field.precision);
        put_str(buf, &field.origin);
    }
}

fn encode_value(value: &RowValue, buf: &mut Vec<u8>) {
    let Some(vt) = value.value_type() else {
        buf.put_u8(NULL_TAG);
        return;
    };
    buf.put_u8(vt.tag());
    match value {
        RowValue::Null => {}
        RowValue::String(s) => put_str(buf, s),
        RowValue::Integer(i) => buf.put_i64(*i),
        RowValue::Number(n) => buf.put_f64(*n),
        RowValue::BigNumber(d) => put_str(buf, &plain_decimal(d)),
        RowValue::Date(dt) => {
            let utc = dt.and_utc();
            buf.put_i64(utc.timestamp());
            buf.put_u32(utc.timestamp_subsec_nanos());
        }
        RowValue::Boolean(b) => buf.put_u8(u8::from(*b)),
        RowValue::Binary(bytes) => {
            buf.put_u32(bytes.len() as u32);
            buf.put_slice(bytes);
        }
    }
}

/// Projects rows through a mapping and writes cube records.
#[derive(Debug, Clone)]
pub struct CubeEncoder {
    meta: RowMetadata,
    columns: Vec<ColumnPlan>,
}

impl CubeEncoder {
    pub fn new(resolved: &ResolvedMapping) -> Self {
        Self {
            meta: resolved.target.clone(),
            columns: column_plans(resolved),
        }
    }

    /// Encoder that writes rows of `meta` unchanged.
    pub fn identity(meta: RowMetadata) -> Self {
        let columns = meta
            .iter()
            .enumerate()
            .map(|(source, field)| ColumnPlan {
                source,
                field: field.clone(),
            })
            .collect();
        Self { meta, columns }
    }

    /// Metadata written into the header.
    pub fn meta(&self) -> &RowMetadata {
        &self.meta
    }
}

impl RowEncoder for CubeEncoder {
    fn write_header(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        encode_header(&self.meta, buf);
        Ok(())
    }

    fn encode_row(&self, row: &Row, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        let start = buf.len();
        buf.put_u32(0);
        for column in &self.columns {
            encode_value(column.value(row)?, buf);
        }
        let len = (buf.len() - start - 4) as u32;
        buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8], what: &'static str) -> Result<(), CubeError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => CubeError::Truncated(what),
        _ => CubeError::Io(e),
    })
}

fn read_u32<R: Read>(r: &mut R, what: &'static str) -> Result<u32, CubeError> {
    let mut b = [0u8; 4];
    read_exact(r, &mut b, what)?;
    Ok(u32::from_be_bytes(b))
}

fn read_opt<R: Read>(r: &mut R, what: &'static str) -> Result<Option<u32>, CubeError> {
    let mut marker = [0u8; 1];
    read_exact(r, &mut marker, what)?;
    match marker[0] {
        0 => Ok(None),
        1 => read_u32(r, what).map(Some),
        _ => Err(CubeError::Invalid("optional marker")),
    }
}

/// Read exactly `len` bytes, growing the buffer only as data arrives so a
/// corrupt length prefix cannot force a large allocation.
fn read_bytes<R: Read>(r: &mut R, len: u32, what: &'static str) -> Result<Vec<u8>, CubeError> {
    let mut bytes = Vec::new();
    r.by_ref().take(u64::from(len)).read_to_end(&mut bytes)?;
    if bytes.len() != len as usize {
        return Err(CubeError::Truncated(what));
    }
    Ok(bytes)
}

fn read_string<R: Read>(r: &mut R, what: &'static str) -> Result<String, CubeError> {
    let len = read_u32(r, what)?;
    let bytes = read_bytes(r, len, what)?;
    String::from_utf8(bytes).map_err(|_| CubeError::Invalid("utf-8 text"))
}

/// Record-length prefix, or `None` at a clean end of stream.
fn read_record_len<R: Read>(r: &mut R) -> Result<Option<u32>, CubeError> {
    let mut b = [0u8; 4];
    let mut filled = 0;
    while filled < b.len() {
        match r.read(&mut b[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(CubeError::Truncated("record length")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(u32::from_be_bytes(b)))
}

/// Bounds-checked reads over one record's bytes.
struct Record<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Record<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], CubeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(CubeError::Truncated(what))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], CubeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn bytes(&mut self, what: &'static str) -> Result<&'a [u8], CubeError> {
        let len = u32::from_be_bytes(self.array(what)?) as usize;
        self.take(len, what)
    }

    fn text(&mut self, what: &'static str) -> Result<&'a str, CubeError> {
        std::str::from_utf8(self.bytes(what)?).map_err(|_| CubeError::Invalid("utf-8 text"))
    }

    fn value(&mut self, field: &FieldDescriptor) -> Result<RowValue, CubeError> {
        let [tag] = self.array::<1>("value tag")?;
        if tag == NULL_TAG {
            return Ok(RowValue::Null);
        }
        let actual = ValueType::from_tag(tag).ok_or_else(|| CubeError::UnknownTag {
            field: field.name.clone(),
            tag,
        })?;
        if actual != field.value_type {
            return Err(CubeError::TagMismatch {
                field: field.name.clone(),
                expected: field.value_type,
                actual,
            });
        }
        Ok(match actual {
            ValueType::String => RowValue::String(self.text("string")?.to_string()),
            ValueType::Integer => RowValue::Integer(i64::from_be_bytes(self.array("integer")?)),
            ValueType::Number => RowValue::Number(f64::from_be_bytes(self.array("number")?)),
            ValueType::BigNumber => RowValue::BigNumber(
                BigDecimal::from_str(self.text("big number")?)
                    .map_err(|_| CubeError::Invalid("big number"))?,
            ),
            ValueType::Date => {
                let secs = i64::from_be_bytes(self.array("date")?);
                let nanos = u32::from_be_bytes(self.array("date")?);
                let dt = DateTime::from_timestamp(secs, nanos).ok_or(CubeError::Invalid("date"))?;
                RowValue::Date(dt.naive_utc())
            }
            ValueType::Boolean => {
                let [b] = self.array::<1>("boolean")?;
                RowValue::Boolean(b != 0)
            }
            ValueType::Binary => RowValue::Binary(self.bytes("binary")?.to_vec()),
            ValueType::None => {
                return Err(CubeError::UnknownTag {
                    field: field.name.clone(),
                    tag,
                })
            }
        })
    }
}

/// Reads cube headers and records from any byte stream.
#[derive(Debug, Clone)]
pub struct CubeDecoder {
    meta: RowMetadata,
}

impl CubeDecoder {
    /// Read and validate the header, reconstructing the stream's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`CubeError::BadMagic`], [`CubeError::UnsupportedVersion`],
    /// or a truncation/format error.
    pub fn read_header<R: Read>(reader: &mut R) -> Result<Self, CubeError> {
        let mut magic = [0u8; 8];
        read_exact(reader, &mut magic, "magic")?;
        if &magic != MAGIC {
            return Err(CubeError::BadMagic);
        }
        let mut version = [0u8; 2];
        read_exact(reader, &mut version, "version")?;
        let version = u16::from_be_bytes(version);
        if version != VERSION {
            return Err(CubeError::UnsupportedVersion(version));
        }

        let count = read_u32(reader, "field count")?;
        let mut meta = RowMetadata::new();
        for _ in 0..count {
            let name = read_string(reader, "field name")?;
            let mut tag = [0u8; 1];
            read_exact(reader, &mut tag, "field type")?;
            let value_type =
                ValueType::from_tag(tag[0]).ok_or_else(|| CubeError::UnknownTag {
                    field: name.clone(),
                    tag: tag[0],
                })?;
            let length = read_opt(reader, "field length")?;
            let precision = read_opt(reader, "field precision")?;
            let origin = read_string(reader, "field origin")?;
            meta.add_field(FieldDescriptor {
                name,
                value_type,
                length,
                precision,
                origin,
            })?;
        }
        Ok(Self { meta })
    }

    pub fn meta(&self) -> &RowMetadata {
        &self.meta
    }

    /// Read the next record; `Ok(None)` at a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns a truncation or format error if the record is malformed.
    pub fn read_row<R: Read>(&self, reader: &mut R) -> Result<Option<Row>, CubeError> {
        let Some(len) = read_record_len(reader)? else {
            return Ok(None);
        };
        let data = read_bytes(reader, len, "record body")?;

        let mut record = Record {
            data: &data,
            pos: 0,
        };
        let mut values = Vec::with_capacity(self.meta.len());
        for field in &self.meta {
            values.push(record.value(field)?);
        }
        if record.pos != data.len() {
            return Err(CubeError::RecordLength {
                declared: data.len(),
                used: record.pos,
            });
        }
        Ok(Some(Row::new(values)))
    }
}

/// Streaming cube file reader with an optional row limit.
pub struct CubeReader<R> {
    reader: R,
    decoder: CubeDecoder,
    limit: Option<u64>,
    read: u64,
}

impl CubeReader<BufReader<std::fs::File>> {
    /// Open a cube file. A `limit` of `0` means unlimited.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its header is invalid.
    pub fn open(path: &Path, limit: u64) -> Result<Self, CubeError> {
        let file = std::fs::File::open(path)?;
        Self::new(BufReader::new(file), limit)
    }
}

impl<R: Read> CubeReader<R> {
    /// Read the header from `reader`. A `limit` of `0` means unlimited.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid.
    pub fn new(mut reader: R, limit: u64) -> Result<Self, CubeError> {
        let decoder = CubeDecoder::read_header(&mut reader)?;
        Ok(Self {
            reader,
            decoder,
            limit: (limit > 0).then_some(limit),
            read: 0,
        })
    }

    pub fn meta(&self) -> &RowMetadata {
        self.decoder.meta()
    }

    /// Next row, honoring the limit.
    ///
    /// # Errors
    ///
    /// Returns a format or I/O error.
    pub fn read_row(&mut self) -> Result<Option<Row>, CubeError> {
        if self.limit.is_some_and(|limit| self.read >= limit) {
            return Ok(None);
        }
        let row = self.decoder.read_row(&mut self.reader)?;
        if row.is_some() {
            self.read += 1;
        }
        Ok(row)
    }
}

impl<R: Read> Iterator for CubeReader<R> {
    type Item = Result<Row, CubeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_row().transpose()
    }
}

/// Writes a header followed by conforming rows.
pub struct CubeWriter<W: Write> {
    writer: W,
    encoder: CubeEncoder,
    scratch: Vec<u8>,
    rows: u64,
}

impl<W: Write> CubeWriter<W> {
    /// Write the header for `meta`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the header cannot be written.
    pub fn new(mut writer: W, meta: RowMetadata) -> Result<Self, CubeError> {
        let encoder = CubeEncoder::identity(meta);
        let mut scratch = Vec::new();
        encoder.write_header(&mut scratch)?;
        writer.write_all(&scratch)?;
        Ok(Self {
            writer,
            encoder,
            scratch,
            rows: 0,
        })
    }

    /// Append one row.
    ///
    /// # Errors
    ///
    /// Returns [`CubeError::Metadata`] if the row does not conform, or an I/O error.
    pub fn write_row(&mut self, row: &Row) -> Result<(), CubeError> {
        self.encoder.meta().check_row(row)?;
        self.scratch.clear();
        self.encoder.encode_row(row, &mut self.scratch)?;
        self.writer.write_all(&self.scratch)?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Flush and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if flushing fails.
    pub fn finish(mut self) -> Result<W, CubeError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
