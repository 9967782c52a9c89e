//! Reader configuration.
//!
//! Every knob has a documented default; `ReaderConfig::default()` is what
//! [`FeatureArray::open`](crate::FeatureArray::open) uses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dtype::CastPolicy;
use crate::error::{DiskNpyError, Result};

/// Default number of reads kept in flight per gather.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Default number of continuation reads allowed per row after a short read.
pub const DEFAULT_MAX_SHORT_READ_RETRIES: u32 = 3;

/// How the file is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Positioned reads on an open file descriptor.
    #[default]
    File,
    /// Copies out of a read-only memory map.
    Mmap,
}

/// Which engine executes the reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// A rayon thread pool overlapping blocking reads.
    #[default]
    ThreadPool,
    /// Reads run synchronously on the calling thread.
    Inline,
}

/// Configuration for a [`FeatureArray`](crate::FeatureArray).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Maximum reads in flight per `index_select` call. Must be at least 1.
    pub queue_depth: usize,
    /// Continuation reads allowed per row after short reads.
    pub max_short_read_retries: u32,
    /// Abandon a gather that has not finished within this duration.
    pub timeout: Option<Duration>,
    /// Worker threads for a private I/O pool. `0` shares the process-wide pool.
    pub io_threads: usize,
    /// Which element conversions are permitted.
    pub cast_policy: CastPolicy,
    /// How the file is accessed.
    pub source: SourceKind,
    /// Which engine executes the reads.
    pub engine: EngineKind,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_short_read_retries: DEFAULT_MAX_SHORT_READ_RETRIES,
            timeout: None,
            io_threads: 0,
            cast_policy: CastPolicy::Lossless,
            source: SourceKind::File,
            engine: EngineKind::ThreadPool,
        }
    }
}

impl ReaderConfig {
    /// Starts a builder from the defaults.
    pub fn builder() -> ReaderConfigBuilder {
        ReaderConfigBuilder::default()
    }

    /// Checks invariants the reader relies on.
    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(DiskNpyError::Config("queue_depth must be at least 1".into()));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(DiskNpyError::Config("timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Fluent builder for [`ReaderConfig`].
#[derive(Debug, Clone, Default)]
pub struct ReaderConfigBuilder {
    config: ReaderConfig,
}

impl ReaderConfigBuilder {
    /// Sets the maximum number of reads in flight.
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.queue_depth = depth;
        self
    }

    /// Sets the continuation budget for short reads.
    pub fn max_short_read_retries(mut self, retries: u32) -> Self {
        self.config.max_short_read_retries = retries;
        self
    }

    /// Sets a per-call deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Gives the handle a private pool of `threads` workers.
    pub fn io_threads(mut self, threads: usize) -> Self {
        self.config.io_threads = threads;
        self
    }

    /// Sets the cast policy.
    pub fn cast_policy(mut self, policy: CastPolicy) -> Self {
        self.config.cast_policy = policy;
        self
    }

    /// Sets how the file is accessed.
    pub fn source(mut self, source: SourceKind) -> Self {
        self.config.source = source;
        self
    }

    /// Sets the read engine.
    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.config.engine = engine;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ReaderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ReaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.cast_policy, CastPolicy::Lossless);
    }

    #[test]
    fn builder_rejects_zero_queue_depth() {
        let err = ReaderConfig::builder().queue_depth(0).build().unwrap_err();
        assert!(matches!(err, DiskNpyError::Config(_)));
    }

    #[test]
    fn builder_sets_fields() {
        let config = ReaderConfig::builder()
            .queue_depth(8)
            .max_short_read_retries(1)
            .timeout(Duration::from_secs(2))
            .source(SourceKind::Mmap)
            .engine(EngineKind::Inline)
            .cast_policy(CastPolicy::Lossy)
            .build()
            .unwrap();
        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.source, SourceKind::Mmap);
        assert_eq!(config.engine, EngineKind::Inline);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ReaderConfig =
            serde_json::from_str(r#"{"queue_depth": 16, "source": "mmap", "cast_policy": "lossy"}"#)
                .unwrap();
        assert_eq!(config.queue_depth, 16);
        assert_eq!(config.source, SourceKind::Mmap);
        assert_eq!(config.cast_policy, CastPolicy::Lossy);
        assert_eq!(config.max_short_read_retries, DEFAULT_MAX_SHORT_READ_RETRIES);
    }
}
