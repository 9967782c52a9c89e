//! Defines the physical layout of `.npy` files and parses their header.
//!
//! # Layout
//!
//! ```text
//! [ \x93NUMPY ] [ major u8 ] [ minor u8 ] [ header_len u16|u32 LE ] [ metadata ] [ row data ]
//! ```
//!
//! The metadata block is a Python dict literal, for example
//! `{'descr': '<f4', 'fortran_order': False, 'shape': (5, 3), }`, padded with spaces
//! and terminated by `\n` so that row data starts on an aligned offset.

use std::io::{self, Read};

use serde::Serialize;
use tracing::warn;

use crate::dtype::DType;
use crate::error::{DiskNpyError, Result};

/// Magic bytes identifying the file format.
pub const MAGIC_BYTES: [u8; 6] = *b"\x93NUMPY";

/// Magic(6) + Major(1) + Minor(1).
pub const PREAMBLE_SIZE: usize = 8;

/// Alignment that every known writer pads the header to (64 today, 16 historically).
pub const MIN_HEADER_ALIGNMENT: u64 = 16;

/// Upper bound on the metadata block we are willing to buffer.
pub const MAX_HEADER_LEN: usize = 1 << 20;

/// The parsed header of a `.npy` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    /// Format version `(major, minor)`.
    pub version: (u8, u8),
    /// Element descriptor.
    pub dtype: DType,
    /// Always `false` for headers returned by [`parse_header`].
    pub fortran_order: bool,
    /// The array dimensions; `shape[0]` is the row count.
    pub shape: Vec<usize>,
    /// Length of the metadata block, padding included.
    pub header_len: usize,
    /// Absolute offset of row 0.
    pub data_offset: u64,
}

/// Width in bytes of the length field for a given major version.
fn length_field_width(major: u8, minor: u8) -> Result<usize> {
    match (major, minor) {
        (1, 0) => Ok(2),
        (2, 0) | (3, 0) => Ok(4),
        _ => Err(DiskNpyError::format(format!(
            "Unsupported format version: {major}.{minor}"
        ))),
    }
}

fn read_exact_or_format<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            DiskNpyError::format(format!("File truncated while reading {what}"))
        } else {
            DiskNpyError::from(e)
        }
    })
}

/// Reads and validates a header from the start of `reader`.
///
/// Only header bytes are consumed; on success the reader is positioned at
/// `data_offset`.
pub fn parse_header<R: Read>(reader: &mut R) -> Result<Header> {
    let mut preamble = [0u8; PREAMBLE_SIZE];
    read_exact_or_format(reader, &mut preamble, "preamble")?;

    if preamble[..6] != MAGIC_BYTES {
        return Err(DiskNpyError::format("Invalid Magic Bytes"));
    }
    let (major, minor) = (preamble[6], preamble[7]);
    let width = length_field_width(major, minor)?;

    let mut len_bytes = [0u8; 4];
    read_exact_or_format(reader, &mut len_bytes[..width], "header length")?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if header_len > MAX_HEADER_LEN {
        return Err(DiskNpyError::format(format!(
            "Header length {header_len} exceeds limit of {MAX_HEADER_LEN} bytes"
        )));
    }

    let mut raw = vec![0u8; header_len];
    read_exact_or_format(reader, &mut raw, "header metadata")?;

    let text = if major >= 3 {
        String::from_utf8(raw)
            .map_err(|_| DiskNpyError::format("Header metadata is not valid UTF-8"))?
    } else {
        // Latin-1: every byte is its own code point.
        raw.iter().map(|&b| char::from(b)).collect()
    };

    let meta = parse_metadata(&text)?;
    let data_offset = (PREAMBLE_SIZE + width + header_len) as u64;
    if data_offset % MIN_HEADER_ALIGNMENT != 0 {
        warn!(data_offset, "npy data offset is not 16-byte aligned");
    }

    Ok(Header {
        version: (major, minor),
        dtype: meta.dtype,
        fortran_order: false,
        shape: meta.shape,
        header_len,
        data_offset,
    })
}

struct Metadata {
    dtype: DType,
    shape: Vec<usize>,
}

fn parse_metadata(text: &str) -> Result<Metadata> {
    let mut parser = LiteralParser::new(text);
    let entries = parser.parse_dict()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(DiskNpyError::format("Trailing characters after header dict"));
    }

    let mut descr = None;
    let mut fortran_order = None;
    let mut shape = None;

    for (key, value) in entries {
        match (key.as_str(), value) {
            ("descr", Literal::Str(s)) => descr = Some(s),
            ("descr", _) => {
                return Err(DiskNpyError::format(
                    "Structured or non-string 'descr' is not supported",
                ));
            }
            ("fortran_order", Literal::Bool(b)) => fortran_order = Some(b),
            ("shape", Literal::Seq(items)) => {
                let dims = items
                    .into_iter()
                    .map(|item| match item {
                        Literal::Int(n) => usize::try_from(n)
                            .map_err(|_| DiskNpyError::format("Dimension does not fit in usize")),
                        _ => Err(DiskNpyError::format("Shape must contain only integers")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                shape = Some(dims);
            }
            (other, _) => {
                return Err(DiskNpyError::format(format!(
                    "Unexpected or ill-typed header key '{other}'"
                )));
            }
        }
    }

    let descr = descr.ok_or_else(|| DiskNpyError::format("Header is missing 'descr'"))?;
    let fortran_order =
        fortran_order.ok_or_else(|| DiskNpyError::format("Header is missing 'fortran_order'"))?;
    let shape = shape.ok_or_else(|| DiskNpyError::format("Header is missing 'shape'"))?;

    if fortran_order {
        return Err(DiskNpyError::format(
            "Column-major (fortran_order) arrays are not supported",
        ));
    }
    if shape.is_empty() {
        return Err(DiskNpyError::format("Zero-dimensional arrays have no rows"));
    }
    if shape[1..].contains(&0) {
        return Err(DiskNpyError::format(format!(
            "Trailing dimensions must be positive, got {shape:?}"
        )));
    }

    Ok(Metadata {
        dtype: DType::parse(&descr)?,
        shape,
    })
}

#[derive(Debug)]
enum Literal {
    Str(String),
    Bool(bool),
    Int(u64),
    Seq(Vec<Literal>),
}

/// A parser for the small subset of Python literals `.npy` headers use.
struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == want => {
                self.pos += c.len_utf8();
                Ok(())
            }
            found => Err(DiskNpyError::format(format!(
                "Malformed header: expected '{want}' at byte {}, found {found:?}",
                self.pos
            ))),
        }
    }

    /// Consumes `c` if it is next; returns whether it did.
    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn parse_dict(&mut self) -> Result<Vec<(String, Literal)>> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            if self.eat('}') {
                return Ok(entries);
            }
            let key = match self.parse_value()? {
                Literal::Str(s) => s,
                other => {
                    return Err(DiskNpyError::format(format!(
                        "Header dict key must be a string, got {other:?}"
                    )));
                }
            };
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(DiskNpyError::format(format!("Duplicate header key '{key}'")));
            }
            self.expect(':')?;
            let value = self.parse_value()?;
            entries.push((key, value));
            if !self.eat(',') {
                self.expect('}')?;
                return Ok(entries);
            }
        }
    }

    fn parse_seq(&mut self, close: char) -> Result<Literal> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(Literal::Seq(items));
            }
            items.push(self.parse_value()?);
            if !self.eat(',') {
                self.expect(close)?;
                return Ok(Literal::Seq(items));
            }
        }
    }

    fn parse_value(&mut self) -> Result<Literal> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('\'' | '"')) => {
                self.pos += 1;
                let end = self.rest().find(q).ok_or_else(|| {
                    DiskNpyError::format("Malformed header: unterminated string")
                })?;
                let s = self.rest()[..end].to_string();
                self.pos += end + 1;
                Ok(Literal::Str(s))
            }
            Some('(') => {
                self.pos += 1;
                self.parse_seq(')')
            }
            Some('[') => {
                self.pos += 1;
                self.parse_seq(']')
            }
            Some(c) if c.is_ascii_digit() => {
                let digits = self.rest().bytes().take_while(u8::is_ascii_digit).count();
                let n = self.rest()[..digits]
                    .parse::<u64>()
                    .map_err(|_| DiskNpyError::format("Malformed header: integer overflow"))?;
                self.pos += digits;
                // Python 2 long suffix.
                if matches!(self.peek(), Some('L' | 'l')) {
                    self.pos += 1;
                }
                Ok(Literal::Int(n))
            }
            _ if self.rest().starts_with("True") => {
                self.pos += 4;
                Ok(Literal::Bool(true))
            }
            _ if self.rest().starts_with("False") => {
                self.pos += 5;
                Ok(Literal::Bool(false))
            }
            found => Err(DiskNpyError::format(format!(
                "Malformed header: unexpected {found:?} at byte {}",
                self.pos
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{ByteOrder, ElementType};
    use std::io::Cursor;

    fn npy_bytes(major: u8, dict: &str) -> Vec<u8> {
        let width = if major == 1 { 2 } else { 4 };
        let unpadded = PREAMBLE_SIZE + width + dict.len() + 1;
        let pad = (64 - unpadded % 64) % 64;
        let mut meta = dict.to_string();
        meta.push_str(&" ".repeat(pad));
        meta.push('\n');

        let mut out = MAGIC_BYTES.to_vec();
        out.extend_from_slice(&[major, 0]);
        if major == 1 {
            out.extend_from_slice(&(meta.len() as u16).to_le_bytes());
        } else {
            out.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        }
        out.extend_from_slice(meta.as_bytes());
        out
    }

    #[test]
    fn parses_v1_header() {
        let bytes = npy_bytes(1, "{'descr': '<f4', 'fortran_order': False, 'shape': (5, 3), }");
        let header = parse_header(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.version, (1, 0));
        assert_eq!(header.dtype.element, ElementType::F32);
        assert_eq!(header.dtype.byte_order, ByteOrder::Little);
        assert_eq!(header.shape, vec![5, 3]);
        assert_eq!(header.data_offset, bytes.len() as u64);
        assert_eq!(header.data_offset % 64, 0);
    }

    #[test]
    fn parses_v2_and_v3_headers() {
        for major in [2, 3] {
            let bytes = npy_bytes(major, "{'descr': '|u1', 'fortran_order': False, 'shape': (7,)}");
            let header = parse_header(&mut Cursor::new(&bytes)).unwrap();
            assert_eq!(header.version, (major, 0));
            assert_eq!(header.shape, vec![7]);
            assert_eq!(header.data_offset, bytes.len() as u64);
        }
    }

    #[test]
    fn accepts_key_order_and_py2_longs() {
        let bytes = npy_bytes(1, "{\"shape\": (4L, 2L, 3L), \"fortran_order\": False, \"descr\": \">i2\"}");
        let header = parse_header(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.shape, vec![4, 2, 3]);
        assert_eq!(header.dtype.byte_order, ByteOrder::Big);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = npy_bytes(1, "{'descr': '<f4', 'fortran_order': False, 'shape': (5, 3), }");
        bytes[1] = b'X';
        let err = parse_header(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, DiskNpyError::Format(ref m) if m.contains("Magic")));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = npy_bytes(1, "{'descr': '<f4', 'fortran_order': False, 'shape': (5, 3), }");
        bytes[6] = 4;
        let err = parse_header(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, DiskNpyError::Format(ref m) if m.contains("version")));
    }

    #[test]
    fn rejects_fortran_order() {
        let bytes = npy_bytes(1, "{'descr': '<f4', 'fortran_order': True, 'shape': (5, 3), }");
        let err = parse_header(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, DiskNpyError::Format(ref m) if m.contains("fortran_order")));
    }

    #[test]
    fn rejects_bad_shapes_and_descriptors() {
        for dict in [
            "{'descr': '<f4', 'fortran_order': False, 'shape': ()}",
            "{'descr': '<f4', 'fortran_order': False, 'shape': (5, 0)}",
            "{'descr': '<c16', 'fortran_order': False, 'shape': (5,)}",
            "{'descr': [('a', '<f4')], 'fortran_order': False, 'shape': (5,)}",
            "{'descr': '<f4', 'shape': (5,)}",
            "{'descr': '<f4', 'fortran_order': False, 'shape': (5,), 'extra': 1}",
            "{'descr': '<f4', 'fortran_order': False, 'shape': (5,",
        ] {
            let bytes = npy_bytes(1, dict);
            assert!(
                matches!(parse_header(&mut Cursor::new(&bytes)), Err(DiskNpyError::Format(_))),
                "{dict} should be rejected"
            );
        }
    }

    #[test]
    fn allows_zero_rows() {
        let bytes = npy_bytes(1, "{'descr': '<f8', 'fortran_order': False, 'shape': (0, 4), }");
        let header = parse_header(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.shape, vec![0, 4]);
    }

    #[test]
    fn truncated_preamble_is_a_format_error() {
        let err = parse_header(&mut Cursor::new(&b"\x93NUM"[..])).unwrap_err();
        assert!(matches!(err, DiskNpyError::Format(ref m) if m.contains("truncated")));
    }
}
