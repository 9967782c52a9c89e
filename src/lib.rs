//! # disknpy
//!
//! Random-access row gathering from NumPy `.npy` feature arrays that stay on disk.
//!
//! ## Overview
//!
//! Feature tables for large graphs are often too big, or too rarely touched, to keep
//! resident in memory. `disknpy` opens such a table once, parses its header, and then
//! answers requests of the form "give me rows `[4, 0, 2, 2, ...]`" by reading exactly
//! those rows from the file and packing them, in request order, into one dense buffer.
//!
//! ### Key Features
//!
//! *   **Overlapped Reads:** Each request becomes a batch of independent positioned
//!     reads kept in flight on a dedicated rayon pool, so wall-clock time tracks the
//!     slowest read rather than the sum of all reads.
//! *   **Order Preserving:** Reads complete in any order, but each one owns a disjoint
//!     slot of the output buffer, so rows always come back in the order requested.
//! *   **Fail Fast:** Out-of-range indices are rejected before a single read is issued.
//! *   **Concurrent:** A [`FeatureArray`] is `Send + Sync`; many threads may gather from
//!     one handle at once.
//! *   **Robust I/O:** Short reads are continued, a deadline can bound a call, and a
//!     call either returns every row or an error, never a partial result.
//!
//! ## Architecture
//!
//! ```text
//! open(path) ──► format::parse_header ──► ArrayLayout ──► FeatureArray
//!
//! index_select(indices, dtype)
//!   ├─ validate indices            (IndexError, no I/O)
//!   ├─ carve output into row slots
//!   ├─ IoEngine::run ─► submit / wait, ≤ queue_depth in flight, short-read continuation
//!   ├─ byte-order fix-up
//!   └─ element conversion          (per CastPolicy)
//! ```
//!
//! ### Engines
//!
//! The [`engine`] module abstracts the asynchronous read facility behind
//! [`IoEngine`]/[`IoQueue`]: submit a positioned read, wait for any completion.
//! [`ThreadPoolEngine`] overlaps blocking reads on a rayon pool; [`InlineEngine`]
//! runs them one by one on the calling thread.
//!
//! ### Sources
//!
//! The [`io`] module defines [`ReadAt`], a cursor-free positioned read.
//! [`FileSource`] uses `pread`-style calls; [`MmapSource`] copies from a memory map.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use disknpy::{ElementType, FeatureArray};
//!
//! let features = FeatureArray::open("node_feat.npy")?;
//! assert_eq!(features.shape()[1..], [128]);
//!
//! let batch = features.index_select(&[4, 0, 2], ElementType::F32)?;
//! assert_eq!(batch.shape(), &[3, 128]);
//! # Ok::<(), disknpy::DiskNpyError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** `unsafe` is used only to create the memory map in
//!   [`MmapSource`].
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to a [`DiskNpyError`] variant.

#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod config;
pub mod dtype;
pub mod error;
pub mod format;
pub mod inspector;
pub mod layout;
pub mod reader;

// --- I/O MACHINERY ---
pub mod engine;
pub mod io;

// Private modules
mod gather;

// --- RE-EXPORTS ---

pub use api::DiskNpy;
pub use config::{EngineKind, ReaderConfig, ReaderConfigBuilder, SourceKind};
pub use dtype::{ByteOrder, CastPolicy, DType, Element, ElementType};
pub use engine::{InlineEngine, IoEngine, IoQueue, ThreadPoolEngine};
pub use error::{DiskNpyError, Result};
pub use gather::FeatureBatch;
pub use inspector::{NpyInspector, NpyReport};
pub use io::{FileSource, MmapSource, ReadAt};
pub use layout::ArrayLayout;
pub use reader::FeatureArray;

// Half-precision element type used by `ElementType::F16` batches.
pub use half::f16;
