// src/inspector.rs

//! Tools for inspecting the physical structure of `.npy` files, useful for
//! checking what a file declares before serving reads from it.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Serialize;

use crate::dtype::ElementType;
use crate::error::Result;
use crate::format::{self, Header};
use crate::layout::ArrayLayout;

/// A structural report of a `.npy` file.
#[derive(Debug, Serialize)]
pub struct NpyReport {
    /// Total size of the file on disk.
    pub file_size: u64,
    /// The parsed header.
    pub header: Header,
    /// Stored element type.
    pub element_type: ElementType,
    /// Elements per row.
    pub feat_dim: usize,
    /// Bytes per row.
    pub row_bytes: usize,
    /// Bytes of row data the header declares.
    pub data_bytes: u64,
    /// Bytes after the declared data (zero for files written by NumPy).
    pub trailing_bytes: u64,
}

/// The `.npy` inspector tool.
#[derive(Debug)]
pub struct NpyInspector;

impl NpyInspector {
    /// Parses the header of `path` and reports its layout. Reads no row data.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<NpyReport> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let header = format::parse_header(&mut BufReader::new(file))?;
        let layout = ArrayLayout::from_header(&header, file_size)?;
        let data_bytes = layout.data_len();

        Ok(NpyReport {
            file_size,
            element_type: layout.element_type(),
            feat_dim: layout.feat_dim(),
            row_bytes: layout.row_bytes(),
            data_bytes,
            trailing_bytes: file_size - layout.data_offset() - data_bytes,
            header,
        })
    }
}

impl fmt::Display for NpyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor) = self.header.version;
        writeln!(f, "=== NPY INSPECTOR REPORT ===")?;
        writeln!(f, "Version:        {major}.{minor}")?;
        writeln!(f, "File Size:      {}b", self.file_size)?;
        writeln!(f, "Header Length:  {}b", self.header.header_len)?;
        writeln!(f, "Data Offset:    {}", self.header.data_offset)?;
        writeln!(
            f,
            "Element:        {} ({})",
            self.element_type,
            self.header.dtype.descr()
        )?;
        writeln!(f, "Shape:          {:?}", self.header.shape)?;
        writeln!(
            f,
            "Rows:           {} x {} elements ({}b each)",
            self.header.shape[0], self.feat_dim, self.row_bytes
        )?;
        write!(f, "Data:           {}b", self.data_bytes)?;
        if self.trailing_bytes > 0 {
            write!(f, " (+{}b trailing)", self.trailing_bytes)?;
        }
        writeln!(f)
    }
}
