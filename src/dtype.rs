//! Element types, byte order, and element conversion.
//!
//! A `.npy` descriptor such as `<f4` or `|u1` names a byte order and an element
//! type. Only fixed-width booleans, integers and IEEE floats are readable; all other
//! descriptors (complex, strings, objects, records) are rejected at open time.

use std::fmt;

use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::{DiskNpyError, Result};

/// The element types a feature array can be stored in or converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// `b1`, one byte, zero or one.
    Bool,
    /// `i1`
    I8,
    /// `i2`
    I16,
    /// `i4`
    I32,
    /// `i8`
    I64,
    /// `u1`
    U8,
    /// `u2`
    U16,
    /// `u4`
    U32,
    /// `u8`
    U64,
    /// `f2`, IEEE half precision.
    F16,
    /// `f4`
    F32,
    /// `f8`
    F64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Int,
    UInt,
    Float,
}

impl ElementType {
    /// Width of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 | Self::F16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// The NumPy type code without byte order, e.g. `f4`.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Bool => "b1",
            Self::I8 => "i1",
            Self::I16 => "i2",
            Self::I32 => "i4",
            Self::I64 => "i8",
            Self::U8 => "u1",
            Self::U16 => "u2",
            Self::U32 => "u4",
            Self::U64 => "u8",
            Self::F16 => "f2",
            Self::F32 => "f4",
            Self::F64 => "f8",
        }
    }

    fn kind(self) -> Kind {
        match self {
            Self::Bool => Kind::Bool,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 => Kind::Int,
            Self::U8 | Self::U16 | Self::U32 | Self::U64 => Kind::UInt,
            Self::F16 | Self::F32 | Self::F64 => Kind::Float,
        }
    }

    fn from_code(kind: char, size: usize) -> Option<Self> {
        Some(match (kind, size) {
            ('b', 1) | ('?', 1) => Self::Bool,
            ('i', 1) => Self::I8,
            ('i', 2) => Self::I16,
            ('i', 4) => Self::I32,
            ('i', 8) => Self::I64,
            ('u', 1) => Self::U8,
            ('u', 2) => Self::U16,
            ('u', 4) => Self::U32,
            ('u', 8) => Self::U64,
            ('f', 2) => Self::F16,
            ('f', 4) => Self::F32,
            ('f', 8) => Self::F64,
            _ => return None,
        })
    }

    /// Whether every value of `self` converts to `target` under `policy`.
    pub fn can_cast_to(self, target: ElementType, policy: CastPolicy) -> bool {
        if self == target || policy == CastPolicy::Lossy {
            return true;
        }
        let (from, to) = (self.size(), target.size());
        match (self.kind(), target.kind()) {
            (Kind::Bool, _) => true,
            (_, Kind::Bool) => false,
            (Kind::Int, Kind::Int) | (Kind::UInt, Kind::UInt) | (Kind::Float, Kind::Float) => {
                to >= from
            }
            (Kind::UInt, Kind::Int) => to > from,
            (Kind::Int, Kind::UInt) => false,
            // Integers are exact in a float whose mantissa covers them.
            (Kind::Int | Kind::UInt, Kind::Float) => match target {
                ElementType::F16 => from == 1,
                ElementType::F32 => from <= 2,
                _ => from <= 4,
            },
            (Kind::Float, Kind::Int | Kind::UInt) => false,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::U64 => "uint64",
            Self::F16 => "float16",
            Self::F32 => "float32",
            Self::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Byte order of stored elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteOrder {
    /// `<`
    Little,
    /// `>`
    Big,
    /// `|`, single-byte elements.
    NotApplicable,
}

impl ByteOrder {
    /// The byte order of the running machine.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    const fn swapped_native() -> Self {
        match Self::native() {
            Self::Big => Self::Little,
            _ => Self::Big,
        }
    }

    const fn prefix(self) -> char {
        match self {
            Self::Little => '<',
            Self::Big => '>',
            Self::NotApplicable => '|',
        }
    }
}

/// A parsed `.npy` element descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DType {
    /// Element type.
    pub element: ElementType,
    /// Byte order of the stored elements.
    pub byte_order: ByteOrder,
}

impl DType {
    /// Parses a descriptor string such as `<f4`, `|b1` or `=i8`.
    pub fn parse(descr: &str) -> Result<Self> {
        let unknown = || DiskNpyError::format(format!("Unrecognized element descriptor '{descr}'"));

        let mut chars = descr.chars();
        let first = chars.next().ok_or_else(unknown)?;
        let (order, rest) = match first {
            '<' => (Some(ByteOrder::Little), chars.as_str()),
            '>' => (Some(ByteOrder::Big), chars.as_str()),
            '|' => (Some(ByteOrder::NotApplicable), chars.as_str()),
            '=' => (Some(ByteOrder::native()), chars.as_str()),
            _ => (None, descr),
        };

        let mut rest_chars = rest.chars();
        let kind = rest_chars.next().ok_or_else(unknown)?;
        let size: usize = rest_chars.as_str().parse().map_err(|_| unknown())?;
        let element = ElementType::from_code(kind, size).ok_or_else(unknown)?;

        let byte_order = if element.size() == 1 {
            ByteOrder::NotApplicable
        } else {
            match order {
                Some(ByteOrder::NotApplicable) => {
                    return Err(DiskNpyError::format(format!(
                        "Descriptor '{descr}' has no byte order for a multi-byte element"
                    )));
                }
                Some(o) => o,
                None => ByteOrder::native(),
            }
        };

        Ok(Self { element, byte_order })
    }

    /// Width of one element in bytes.
    pub fn size(&self) -> usize {
        self.element.size()
    }

    /// Whether stored bytes can be used without swapping.
    pub fn is_native_order(&self) -> bool {
        self.byte_order != ByteOrder::swapped_native()
    }

    /// Canonical descriptor string, e.g. `<f4`.
    pub fn descr(&self) -> String {
        format!("{}{}", self.byte_order.prefix(), self.element.code())
    }
}

/// Which element conversions `index_select` may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastPolicy {
    /// Only conversions that preserve every value (`u8 -> f32`, `f32 -> f64`, ...).
    #[default]
    Lossless,
    /// Any numeric conversion, with Rust `as` semantics (saturating float to int,
    /// wrapping int to int, nonzero to `true`).
    Lossy,
}

/// Reverses the bytes of every `width`-byte element in `buf`, in place.
pub(crate) fn swap_byte_order(buf: &mut [u8], width: usize) {
    if width > 1 {
        for element in buf.chunks_exact_mut(width) {
            element.reverse();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

fn ne<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn decode(bytes: &[u8], ty: ElementType) -> Scalar {
    match ty {
        ElementType::Bool => Scalar::Bool(bytes[0] != 0),
        ElementType::I8 => Scalar::Int(i64::from(i8::from_ne_bytes(ne(bytes)))),
        ElementType::I16 => Scalar::Int(i64::from(i16::from_ne_bytes(ne(bytes)))),
        ElementType::I32 => Scalar::Int(i64::from(i32::from_ne_bytes(ne(bytes)))),
        ElementType::I64 => Scalar::Int(i64::from_ne_bytes(ne(bytes))),
        ElementType::U8 => Scalar::UInt(u64::from(bytes[0])),
        ElementType::U16 => Scalar::UInt(u64::from(u16::from_ne_bytes(ne(bytes)))),
        ElementType::U32 => Scalar::UInt(u64::from(u32::from_ne_bytes(ne(bytes)))),
        ElementType::U64 => Scalar::UInt(u64::from_ne_bytes(ne(bytes))),
        ElementType::F16 => Scalar::Float(f16::from_ne_bytes(ne(bytes)).to_f64()),
        ElementType::F32 => Scalar::Float(f64::from(f32::from_ne_bytes(ne(bytes)))),
        ElementType::F64 => Scalar::Float(f64::from_ne_bytes(ne(bytes))),
    }
}

macro_rules! encode_as {
    ($value:expr, $t:ty, $out:expr) => {{
        let v: $t = match $value {
            Scalar::Bool(b) => u8::from(b) as $t,
            Scalar::Int(i) => i as $t,
            Scalar::UInt(u) => u as $t,
            Scalar::Float(f) => f as $t,
        };
        $out.extend_from_slice(&v.to_ne_bytes());
    }};
}

fn encode(value: Scalar, ty: ElementType, out: &mut Vec<u8>) {
    match ty {
        ElementType::Bool => {
            let b = match value {
                Scalar::Bool(b) => b,
                Scalar::Int(i) => i != 0,
                Scalar::UInt(u) => u != 0,
                Scalar::Float(f) => f != 0.0,
            };
            out.push(u8::from(b));
        }
        ElementType::I8 => encode_as!(value, i8, out),
        ElementType::I16 => encode_as!(value, i16, out),
        ElementType::I32 => encode_as!(value, i32, out),
        ElementType::I64 => encode_as!(value, i64, out),
        ElementType::U8 => encode_as!(value, u8, out),
        ElementType::U16 => encode_as!(value, u16, out),
        ElementType::U32 => encode_as!(value, u32, out),
        ElementType::U64 => encode_as!(value, u64, out),
        ElementType::F16 => {
            let h = match value {
                Scalar::Bool(b) => f16::from_f32(f32::from(u8::from(b))),
                Scalar::Int(i) => f16::from_f64(i as f64),
                Scalar::UInt(u) => f16::from_f64(u as f64),
                Scalar::Float(f) => f16::from_f64(f),
            };
            out.extend_from_slice(&h.to_ne_bytes());
        }
        ElementType::F32 => encode_as!(value, f32, out),
        ElementType::F64 => encode_as!(value, f64, out),
    }
}

/// Converts a native-order buffer of `from` elements into `to` elements.
///
/// The caller has already checked legality with [`ElementType::can_cast_to`].
/// Allocation failure of the output is reported as `OutOfMemory`.
pub(crate) fn convert(src: &[u8], from: ElementType, to: ElementType) -> Result<Vec<u8>> {
    let count = src.len() / from.size();
    let bytes = count
        .checked_mul(to.size())
        .ok_or(DiskNpyError::OutOfMemory { bytes: None })?;
    let mut out = Vec::new();
    out.try_reserve_exact(bytes)
        .map_err(|_| DiskNpyError::OutOfMemory { bytes: Some(bytes) })?;

    for element in src.chunks_exact(from.size()) {
        encode(decode(element, from), to, &mut out);
    }
    Ok(out)
}

mod sealed {
    pub trait Sealed {}
}

/// Rust types that a [`FeatureBatch`](crate::FeatureBatch) can be decoded into.
pub trait Element: Copy + sealed::Sealed {
    /// The element type tag matching `Self`.
    const TYPE: ElementType;

    /// Reads one value from `TYPE.size()` native-order bytes.
    fn from_ne_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $tag:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}
            impl Element for $t {
                const TYPE: ElementType = ElementType::$tag;
                fn from_ne_slice(bytes: &[u8]) -> Self {
                    <$t>::from_ne_bytes(ne(bytes))
                }
            }
        )*
    };
}

impl_element!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f16 => F16, f32 => F32, f64 => F64,
);

impl sealed::Sealed for bool {}
impl Element for bool {
    const TYPE: ElementType = ElementType::Bool;
    fn from_ne_slice(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}
