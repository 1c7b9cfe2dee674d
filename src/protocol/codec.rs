//! Request packing and fixed-layout reply unpacking.
//!
//! Every request is the 4-byte command code followed by the command's
//! arguments; every successful reply body is a fixed sequence of fields.
//! All integers are little-endian, strings are fixed width and NUL padded.

use super::types::CommandCode;
use crate::error::{DetectorError, Result};

/// One request argument.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    I32(i32),
    I64(i64),
    /// Zero-padded to `width` bytes.
    Str { value: &'a str, width: usize },
}

impl Arg<'_> {
    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Arg::I32(_) => 4,
            Arg::I64(_) => 8,
            Arg::Str { width, .. } => *width,
        }
    }
}

/// Shape of one reply field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    I32,
    I64,
    Str(usize),
}

impl FieldKind {
    pub const fn size(self) -> usize {
        match self {
            FieldKind::I32 => 4,
            FieldKind::I64 => 8,
            FieldKind::Str(width) => width,
        }
    }
}

/// Total byte width of a reply layout.
pub fn layout_size(layout: &[FieldKind]) -> usize {
    layout.iter().map(|kind| kind.size()).sum()
}

/// One decoded reply field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    I32(i32),
    I64(i64),
    Str(String),
}

/// Decoded reply fields in layout order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<Value>);

impl Fields {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Integer field at `index`.
    pub fn i32(&self, index: usize) -> Result<i32> {
        match self.0.get(index) {
            Some(Value::I32(v)) => Ok(*v),
            other => Err(mismatch(index, "i32", other)),
        }
    }

    /// 64-bit integer field at `index`.
    pub fn i64(&self, index: usize) -> Result<i64> {
        match self.0.get(index) {
            Some(Value::I64(v)) => Ok(*v),
            other => Err(mismatch(index, "i64", other)),
        }
    }

    /// String field at `index`.
    pub fn str(&self, index: usize) -> Result<&str> {
        match self.0.get(index) {
            Some(Value::Str(v)) => Ok(v),
            other => Err(mismatch(index, "string", other)),
        }
    }
}

fn mismatch(index: usize, expected: &str, found: Option<&Value>) -> DetectorError {
    DetectorError::decode(format!("reply field {index}: expected {expected}, found {found:?}"))
}

/// Append packed arguments to `out`.
pub fn pack(args: &[Arg<'_>], out: &mut Vec<u8>) {
    for arg in args {
        match *arg {
            Arg::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Arg::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Arg::Str { value, width } => {
                let bytes = value.as_bytes();
                debug_assert!(bytes.len() <= width, "string argument wider than its field");
                let used = bytes.len().min(width);
                out.extend_from_slice(&bytes[..used]);
                out.resize(out.len() + (width - used), 0);
            }
        }
    }
}

/// Build a request: command code first, then the arguments.
pub fn encode(code: CommandCode, args: &[Arg<'_>]) -> Vec<u8> {
    let size = 4 + args.iter().map(Arg::size).sum::<usize>();
    let mut request = Vec::with_capacity(size);
    request.extend_from_slice(&code.as_i32().to_le_bytes());
    pack(args, &mut request);
    request
}

/// Unpack a reply body laid out as `layout`.
///
/// `bytes` must be exactly `layout_size(layout)` long.
pub fn decode(layout: &[FieldKind], bytes: &[u8]) -> Result<Fields> {
    let expected = layout_size(layout);
    if bytes.len() != expected {
        return Err(DetectorError::decode(format!(
            "reply body is {} bytes, layout needs {expected}",
            bytes.len()
        )));
    }

    let mut values = Vec::with_capacity(layout.len());
    let mut offset = 0;
    for kind in layout {
        let field = &bytes[offset..offset + kind.size()];
        let value = match kind {
            FieldKind::I32 => Value::I32(i32::from_le_bytes([field[0], field[1], field[2], field[3]])),
            FieldKind::I64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(field);
                Value::I64(i64::from_le_bytes(raw))
            }
            FieldKind::Str(_) => Value::Str(trim_nul(field)),
        };
        values.push(value);
        offset += kind.size();
    }

    Ok(Fields(values))
}

/// Text up to the first NUL byte.
pub(crate) fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
