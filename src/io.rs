//! Positioned-read sources.
//!
//! Every read names its own absolute offset; no source keeps a shared cursor, so
//! one source can serve any number of concurrent gathers.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use memmap2::Mmap;

/// A read-only byte source supporting concurrent positioned reads.
///
/// `read_at` may return fewer bytes than requested (a short read); returning `0`
/// means no bytes are available at `offset`. Implementations must be safe to call
/// from many threads at once.
pub trait ReadAt: Send + Sync + fmt::Debug {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Total size of the source in bytes.
    fn size(&self) -> io::Result<u64>;
}

/// A file read with `pread`-style positioned reads.
#[derive(Debug)]
pub struct FileSource {
    #[cfg(any(unix, windows))]
    file: File,
    #[cfg(not(any(unix, windows)))]
    file: std::sync::Mutex<File>,
    len: u64,
}

impl FileSource {
    /// Opens `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            #[cfg(any(unix, windows))]
            file,
            #[cfg(not(any(unix, windows)))]
            file: std::sync::Mutex::new(file),
            len,
        })
    }
}

impl ReadAt for FileSource {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(&self.file, buf, offset)
    }

    // Without positioned reads the seek and the read must happen under one lock.
    #[cfg(not(any(unix, windows)))]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::io::Seek;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "FileSource Mutex poisoned"))?;
        file.seek(io::SeekFrom::Start(offset))?;
        file.read(buf)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len)
    }
}

/// A memory-mapped file. Reads are copies out of the map and never come back short
/// unless they run past the end of the file.
pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    /// Maps `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        // Safety: the map is only valid while no other process truncates the file.
        // The handle is read-only infrastructure over files treated as immutable.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl fmt::Debug for MmapSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapSource")
            .field("len", &self.mmap.len())
            .finish()
    }
}

impl ReadAt for MmapSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let available = self.mmap.get(start..).unwrap_or(&[]);
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.mmap.len() as u64)
    }
}

/// Sequential [`Read`] over a [`ReadAt`], used to feed the header parser.
pub(crate) struct SourceReader<'a> {
    source: &'a dyn ReadAt,
    pos: u64,
}

impl<'a> SourceReader<'a> {
    pub(crate) fn new(source: &'a dyn ReadAt) -> Self {
        Self { source, pos: 0 }
    }
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn file_source_reads_at_offsets() {
        let file = scratch(b"0123456789");
        let source = FileSource::open(file.path()).unwrap();
        assert_eq!(source.size().unwrap(), 10);

        let mut buf = [0u8; 3];
        assert_eq!(source.read_at(&mut buf, 4).unwrap(), 3);
        assert_eq!(&buf, b"456");
        // Order of reads does not matter.
        assert_eq!(source.read_at(&mut buf, 0).unwrap(), 3);
        assert_eq!(&buf, b"012");
        assert_eq!(source.read_at(&mut buf, 10).unwrap(), 0);
    }

    #[test]
    fn mmap_source_truncates_at_end() {
        let file = scratch(b"abcdef");
        let source = MmapSource::open(file.path()).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(source.read_at(&mut buf, 4).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(source.read_at(&mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn source_reader_is_sequential() {
        let file = scratch(b"hello world");
        let source = FileSource::open(file.path()).unwrap();
        let mut reader = SourceReader::new(&source);
        let mut first = [0u8; 5];
        reader.read_exact(&mut first).unwrap();
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(&first, b"hello");
        assert_eq!(rest, " world");
    }
}
