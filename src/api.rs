//! One-shot entry points.
//!
//! Each call opens the file, does its work, and closes the file again. Callers
//! that issue more than one request against the same file should keep a
//! [`FeatureArray`] instead.

use std::path::Path;

use crate::dtype::ElementType;
use crate::error::Result;
use crate::gather::FeatureBatch;
use crate::reader::FeatureArray;

/// The main entry point for one-shot access to `.npy` feature files.
#[derive(Debug)]
pub struct DiskNpy;

impl DiskNpy {
    /// Opens a reusable handle with the default configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FeatureArray> {
        FeatureArray::open(path)
    }

    /// Returns the shape stored in the file header. Reads no row data.
    pub fn feature_shape<P: AsRef<Path>>(path: P) -> Result<Vec<usize>> {
        Ok(FeatureArray::open(path)?.shape().to_vec())
    }

    /// Gathers `indices` from `path` as `dtype` values.
    ///
    /// # Arguments
    /// * `path`: The `.npy` file.
    /// * `indices`: Rows to fetch, in output order; duplicates allowed.
    /// * `dtype`: Element type of the result.
    pub fn index_select<P: AsRef<Path>>(
        path: P,
        indices: &[i64],
        dtype: ElementType,
    ) -> Result<FeatureBatch> {
        FeatureArray::open(path)?.index_select(indices, dtype)
    }
}
