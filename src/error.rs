//! Centralized error handling for disknpy.
//!
//! Every failure in the crate is reported through [`DiskNpyError`]; the library
//! never panics on bad input, bad files, or failed reads.
//!
//! ## Error Categories
//!
//! - **I/O Errors** ([`DiskNpyError::Io`]): open failures, failed or exhausted reads, timeouts
//! - **Format Errors** ([`DiskNpyError::Format`]): malformed headers, unsupported layouts or casts
//! - **Index Errors** ([`DiskNpyError::Index`]): a requested row outside `[0, rows)`
//! - **Out of Memory** ([`DiskNpyError::OutOfMemory`]): the result buffer cannot be allocated
//! - **Config Errors** ([`DiskNpyError::Config`]): an invalid [`ReaderConfig`](crate::ReaderConfig)
//! - **Internal Errors** ([`DiskNpyError::Internal`]): broken engine invariants (please report)
//!
//! A call either succeeds with every requested row populated, or fails with one
//! of these variants and no output. Errors never poison a
//! [`FeatureArray`](crate::FeatureArray); the next call starts from a clean slate.
//!
//! ## Usage
//!
//! ```rust
//! use disknpy::{DiskNpyError, FeatureArray};
//!
//! match FeatureArray::open("does-not-exist.npy") {
//!     Ok(_) => unreachable!(),
//!     Err(DiskNpyError::Io(e)) => eprintln!("cannot open: {e}"),
//!     Err(e) => eprintln!("other error: {e}"),
//! }
//! ```

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// A specialized `Result` type for disknpy operations.
pub type Result<T> = std::result::Result<T, DiskNpyError>;

/// The master error enum covering all failure domains in disknpy.
///
/// This type is `Clone`; I/O errors are wrapped in `Arc` so that one failure can be
/// handed to several observers without re-creating it.
#[derive(Debug, Clone, Error)]
pub enum DiskNpyError {
    /// Low-level I/O failure.
    ///
    /// Covers file-open failures, read errors reported by the source, short reads that
    /// exhausted their continuation budget (`UnexpectedEof`) and expired deadlines
    /// (`TimedOut`).
    #[error("I/O Error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The file header is malformed or describes something this crate does not read.
    ///
    /// ## Common Causes
    ///
    /// - Wrong magic bytes (not `\x93NUMPY`)
    /// - Unsupported format version
    /// - `fortran_order: True` (column-major data)
    /// - Unknown element descriptor (complex, strings, records, ...)
    /// - Empty shape or a zero trailing dimension
    /// - File shorter than the header claims
    /// - A requested element conversion the cast policy forbids
    #[error("Format Error: {0}")]
    Format(String),

    /// A requested row lies outside `[0, rows)`.
    ///
    /// Raised before any read is issued.
    #[error("Index Error: row {index} is out of bounds for array with {rows} rows")]
    Index {
        /// The offending index, as passed by the caller.
        index: i64,
        /// Number of rows in the array.
        rows: usize,
    },

    /// The result buffer could not be allocated.
    ///
    /// `bytes` is `None` when the size itself overflows `usize`.
    #[error("Out of Memory: cannot allocate {}", describe_bytes(.bytes))]
    OutOfMemory {
        /// Requested allocation size, when representable.
        bytes: Option<usize>,
    },

    /// The reader configuration is invalid.
    #[error("Config Error: {0}")]
    Config(String),

    /// Logic error in the I/O engine (should not occur in production).
    #[error("Internal Logic Error: {0}")]
    Internal(String),
}

fn describe_bytes(bytes: &Option<usize>) -> String {
    match bytes {
        Some(n) => format!("{n} bytes"),
        None => "a buffer larger than the address space".to_string(),
    }
}

impl DiskNpyError {
    /// Returns the kind of the wrapped I/O error, if this is an I/O failure.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }
}

impl From<io::Error> for DiskNpyError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
