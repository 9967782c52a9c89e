//! Derived, immutable facts about where rows live in the file.

use serde::Serialize;

use crate::dtype::{DType, ElementType};
use crate::error::{DiskNpyError, Result};
use crate::format::Header;

/// Geometry of a row-major array on disk, computed once from its [`Header`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayLayout {
    dtype: DType,
    shape: Vec<usize>,
    word_size: usize,
    feat_dim: usize,
    row_bytes: usize,
    data_offset: u64,
    row_count: usize,
}

impl ArrayLayout {
    /// Builds the layout and checks that every row lies within `file_size`.
    pub fn from_header(header: &Header, file_size: u64) -> Result<Self> {
        let (&row_count, trailing) = header
            .shape
            .split_first()
            .ok_or_else(|| DiskNpyError::format("Zero-dimensional arrays have no rows"))?;

        let overflow = || DiskNpyError::format(format!("Shape {:?} overflows", header.shape));

        let word_size = header.dtype.size();
        let feat_dim = trailing
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(overflow)?;
        if feat_dim == 0 {
            return Err(DiskNpyError::format("Rows must contain at least one element"));
        }
        let row_bytes = feat_dim.checked_mul(word_size).ok_or_else(overflow)?;

        let data_bytes = (row_bytes as u64)
            .checked_mul(row_count as u64)
            .and_then(|n| n.checked_add(header.data_offset))
            .ok_or_else(overflow)?;
        if data_bytes > file_size {
            return Err(DiskNpyError::format(format!(
                "File truncated: header declares {data_bytes} bytes but file has {file_size}"
            )));
        }

        Ok(Self {
            dtype: header.dtype,
            shape: header.shape.clone(),
            word_size,
            feat_dim,
            row_bytes,
            data_offset: header.data_offset,
            row_count,
        })
    }

    /// The full dimension list, exactly as stored in the header.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The stored element descriptor.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The stored element type.
    pub fn element_type(&self) -> ElementType {
        self.dtype.element
    }

    /// Bytes per element.
    pub fn word_size(&self) -> usize {
        self.word_size
    }

    /// Elements per row: the product of every dimension after the first.
    pub fn feat_dim(&self) -> usize {
        self.feat_dim
    }

    /// Bytes per row.
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Absolute offset of row 0.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Number of rows, `shape()[0]`.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Total bytes of row data.
    pub fn data_len(&self) -> u64 {
        self.row_bytes as u64 * self.row_count as u64
    }

    /// Absolute file offset of `row`. The caller guarantees `row < row_count`.
    pub fn row_offset(&self, row: usize) -> u64 {
        self.data_offset + row as u64 * self.row_bytes as u64
    }
}
