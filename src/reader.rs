//! The Read-Side Handle.
//!
//! [`FeatureArray`] opens a `.npy` file once, validates its header, and then serves
//! any number of `index_select` calls, from any number of threads, over the same
//! read-only file resource.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::{EngineKind, ReaderConfig, SourceKind};
use crate::dtype::ElementType;
use crate::engine::{self, InlineEngine, IoEngine, ThreadPoolEngine};
use crate::error::Result;
use crate::format::{self, Header};
use crate::gather::{self, FeatureBatch};
use crate::io::{FileSource, MmapSource, ReadAt, SourceReader};
use crate::layout::ArrayLayout;

/// A read-only handle to an on-disk feature array.
///
/// The handle is `Send + Sync`; share it by reference (or in an `Arc`) across
/// threads. Calls never mutate it, and a failed call leaves it fully usable.
///
/// ```rust,no_run
/// use disknpy::{ElementType, FeatureArray};
///
/// let features = FeatureArray::open("features.npy")?;
/// println!("shape: {:?}", features.shape());
/// let batch = features.index_select(&[4, 0, 2], ElementType::F32)?;
/// let values: Vec<f32> = batch.to_vec()?;
/// # Ok::<(), disknpy::DiskNpyError>(())
/// ```
pub struct FeatureArray {
    path: PathBuf,
    source: Arc<dyn ReadAt>,
    header: Header,
    layout: ArrayLayout,
    engine: Arc<dyn IoEngine>,
    config: ReaderConfig,
}

impl FeatureArray {
    /// Opens `path` with the default [`ReaderConfig`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReaderConfig::default())
    }

    /// Opens `path` with an explicit configuration.
    pub fn open_with<P: AsRef<Path>>(path: P, config: ReaderConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate()?;
        let source: Arc<dyn ReadAt> = match config.source {
            SourceKind::File => Arc::new(FileSource::open(path)?),
            SourceKind::Mmap => Arc::new(MmapSource::open(path)?),
        };
        Self::from_source(path, source, config)
    }

    /// Builds a handle over any positioned-read source.
    ///
    /// `name` is only used for reporting.
    pub fn from_source<P: Into<PathBuf>>(
        name: P,
        source: Arc<dyn ReadAt>,
        config: ReaderConfig,
    ) -> Result<Self> {
        config.validate()?;
        let engine = build_engine(&config)?;
        Self::with_engine(name, source, engine, config)
    }

    /// Builds a handle that submits its reads to `engine`.
    pub fn with_engine<P: Into<PathBuf>>(
        name: P,
        source: Arc<dyn ReadAt>,
        engine: Arc<dyn IoEngine>,
        config: ReaderConfig,
    ) -> Result<Self> {
        config.validate()?;
        let path = name.into();
        let header = format::parse_header(&mut SourceReader::new(source.as_ref()))?;
        let layout = ArrayLayout::from_header(&header, source.size()?)?;

        debug!(
            path = %path.display(),
            shape = ?layout.shape(),
            descr = %header.dtype.descr(),
            data_offset = layout.data_offset(),
            engine = engine.name(),
            "opened feature array"
        );

        Ok(Self {
            path,
            source,
            header,
            layout,
            engine,
            config,
        })
    }

    /// The full dimension list, exactly as stored in the file.
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.layout.row_count()
    }

    /// Whether the array has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements per row.
    pub fn feat_dim(&self) -> usize {
        self.layout.feat_dim()
    }

    /// The stored element type.
    pub fn element_type(&self) -> ElementType {
        self.layout.element_type()
    }

    /// The derived layout.
    pub fn layout(&self) -> &ArrayLayout {
        &self.layout
    }

    /// The parsed header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The path (or name) the handle was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Gathers `indices` (duplicates allowed, any order) as `dtype` values.
    ///
    /// The result has shape `(indices.len(), trailing dims...)` and rows in the order
    /// given. Any index outside `[0, len())` fails the whole call before a single
    /// read is issued.
    pub fn index_select(&self, indices: &[i64], dtype: ElementType) -> Result<FeatureBatch> {
        gather::gather(
            &self.layout,
            self.source.as_ref(),
            self.engine.as_ref(),
            &self.config,
            indices,
            dtype,
        )
    }

    /// Gathers `indices` in the stored element type.
    pub fn index_select_native(&self, indices: &[i64]) -> Result<FeatureBatch> {
        self.index_select(indices, self.element_type())
    }
}

impl fmt::Debug for FeatureArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureArray")
            .field("path", &self.path)
            .field("shape", &self.layout.shape())
            .field("descr", &self.header.dtype.descr())
            .field("engine", &self.engine)
            .finish()
    }
}

fn build_engine(config: &ReaderConfig) -> Result<Arc<dyn IoEngine>> {
    let built: Arc<dyn IoEngine> = match config.engine {
        EngineKind::Inline => Arc::new(InlineEngine),
        EngineKind::ThreadPool if config.io_threads == 0 => engine::shared_engine()?,
        EngineKind::ThreadPool => Arc::new(ThreadPoolEngine::new(config.io_threads)?),
    };
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn handle_is_shareable() {
        assert_send_sync::<FeatureArray>();
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = FeatureArray::open("/definitely/not/here.npy").unwrap_err();
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::NotFound));
    }

    #[test]
    fn invalid_config_is_rejected_before_opening() {
        let config = ReaderConfig {
            queue_depth: 0,
            ..ReaderConfig::default()
        };
        let err = FeatureArray::open_with("/definitely/not/here.npy", config).unwrap_err();
        assert!(matches!(err, crate::DiskNpyError::Config(_)));
    }
}
