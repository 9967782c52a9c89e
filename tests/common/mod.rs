#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use disknpy::{FileSource, ReadAt};

/// Routes library logs to the test harness; `RUST_LOG=disknpy=trace` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds the bytes of a `.npy` file the way NumPy writes them.
pub fn npy_bytes(major: u8, descr: &str, fortran_order: bool, shape: &[usize], data: &[u8]) -> Vec<u8> {
    let dims = match shape {
        [single] => format!("({single},)"),
        _ => format!(
            "({})",
            shape.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        ),
    };
    let order = if fortran_order { "True" } else { "False" };
    let dict = format!("{{'descr': '{descr}', 'fortran_order': {order}, 'shape': {dims}, }}");

    let width = if major == 1 { 2 } else { 4 };
    let unpadded = 8 + width + dict.len() + 1;
    let pad = (64 - unpadded % 64) % 64;
    let meta = format!("{dict}{}\n", " ".repeat(pad));

    let mut out = b"\x93NUMPY".to_vec();
    out.extend_from_slice(&[major, 0]);
    if major == 1 {
        out.extend_from_slice(&(meta.len() as u16).to_le_bytes());
    } else {
        out.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    }
    out.extend_from_slice(meta.as_bytes());
    out.extend_from_slice(data);
    out
}

pub fn write_npy(path: &Path, descr: &str, shape: &[usize], data: &[u8]) -> io::Result<()> {
    std::fs::write(path, npy_bytes(1, descr, false, shape, data))
}

pub fn f32_le(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
    values.into_iter().flat_map(f32::to_le_bytes).collect()
}

/// The `(5, 3)` float32 array `[[0,1,2], [3,4,5], ..., [12,13,14]]`.
pub fn write_five_by_three(path: &Path) -> io::Result<()> {
    write_npy(path, "<f4", &[5, 3], &f32_le((0..15).map(|v| v as f32)))
}

/// Wraps a file source and records every read it serves.
#[derive(Debug)]
pub struct CountingSource {
    inner: FileSource,
    pub reads: AtomicUsize,
    /// Highest byte offset any read asked for (exclusive end).
    pub max_end: AtomicU64,
}

impl CountingSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            inner: FileSource::open(path)?,
            reads: AtomicUsize::new(0),
            max_end: AtomicU64::new(0),
        })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ReadAt for CountingSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.max_end
            .fetch_max(offset + buf.len() as u64, Ordering::SeqCst);
        self.inner.read_at(buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }
}

/// Serves at most `chunk` bytes per read, like a slow device returning partial data.
#[derive(Debug)]
pub struct ChunkedSource {
    pub inner: FileSource,
    pub chunk: usize,
}

impl ReadAt for ChunkedSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let len = buf.len().min(self.chunk);
        self.inner.read_at(&mut buf[..len], offset)
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }
}
