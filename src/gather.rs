//! The gather path: indexed rows in, one dense buffer out.
//!
//! A gather validates every index up front, carves the output buffer into one
//! disjoint slot per requested row, and keeps up to `queue_depth` positioned reads
//! in flight on the engine. Reads complete in any order; each writes only its own
//! slot, so the result is in request order without any reordering pass.

use std::io;
use std::time::Instant;

use tracing::{trace, warn};

use crate::config::ReaderConfig;
use crate::dtype::{self, Element, ElementType};
use crate::engine::{Completion, IoEngine, ReadOp};
use crate::error::{DiskNpyError, Result};
use crate::io::ReadAt;
use crate::layout::ArrayLayout;

/// Rows gathered by one `index_select` call.
///
/// Shaped `(indices.len(), trailing dims...)`, in the order the indices were given,
/// with values in native byte order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBatch {
    data: Vec<u8>,
    shape: Vec<usize>,
    element_type: ElementType,
}

impl FeatureBatch {
    /// Logical shape of the batch.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type of the values in the buffer.
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    /// Bytes per row.
    pub fn row_bytes(&self) -> usize {
        self.shape[1..].iter().product::<usize>() * self.element_type.size()
    }

    /// Raw bytes of row `i`, or `None` past the end.
    pub fn row(&self, i: usize) -> Option<&[u8]> {
        let width = self.row_bytes();
        let start = i.checked_mul(width)?;
        self.data.get(start..start.checked_add(width)?)
    }

    /// The whole buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the batch, returning the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Decodes the buffer into typed values.
    ///
    /// Fails with a format error if `T` is not the batch's element type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::TYPE != self.element_type {
            return Err(DiskNpyError::format(format!(
                "Batch holds {} values, not {}",
                self.element_type,
                T::TYPE
            )));
        }
        Ok(self
            .data
            .chunks_exact(self.element_type.size())
            .map(T::from_ne_slice)
            .collect())
    }
}

/// Checks every index against `[0, rows)` before any I/O is issued.
pub(crate) fn validate_indices(indices: &[i64], rows: usize) -> Result<Vec<usize>> {
    indices
        .iter()
        .map(|&index| match usize::try_from(index) {
            Ok(row) if row < rows => Ok(row),
            _ => Err(DiskNpyError::Index { index, rows }),
        })
        .collect()
}

fn alloc_zeroed(bytes: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.try_reserve_exact(bytes)
        .map_err(|_| DiskNpyError::OutOfMemory { bytes: Some(bytes) })?;
    out.resize(bytes, 0);
    Ok(out)
}

/// Outcome of handling one completion.
enum Step<'buf> {
    /// The slot is full.
    Done,
    /// The slot needs another read.
    Resubmit(ReadOp<'buf>),
}

fn settle<'buf>(completion: Completion<'buf>, max_retries: u32) -> Result<Step<'buf>> {
    let Completion { mut op, result } = completion;
    let wanted = op.buf.len();
    match result {
        Ok(n) if n >= wanted => Ok(Step::Done),
        Ok(n) => {
            if op.attempt >= max_retries {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "row slot {} still missing {} bytes at offset {} after {} continuation reads",
                        op.slot,
                        wanted - n,
                        op.offset + n as u64,
                        op.attempt
                    ),
                )
                .into());
            }
            warn!(
                slot = op.slot,
                offset = op.offset,
                got = n,
                wanted,
                attempt = op.attempt + 1,
                "short read, submitting continuation"
            );
            let (_, rest) = std::mem::take(&mut op.buf).split_at_mut(n);
            Ok(Step::Resubmit(ReadOp {
                slot: op.slot,
                offset: op.offset + n as u64,
                buf: rest,
                attempt: op.attempt + 1,
            }))
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted && op.attempt < max_retries => {
            op.attempt += 1;
            Ok(Step::Resubmit(op))
        }
        Err(e) => Err(e.into()),
    }
}

/// Reads `indices` from `source` and assembles them into a [`FeatureBatch`].
pub(crate) fn gather(
    layout: &ArrayLayout,
    source: &dyn ReadAt,
    engine: &dyn IoEngine,
    config: &ReaderConfig,
    indices: &[i64],
    target: ElementType,
) -> Result<FeatureBatch> {
    let rows = validate_indices(indices, layout.row_count())?;

    let stored = layout.element_type();
    if !stored.can_cast_to(target, config.cast_policy) {
        return Err(DiskNpyError::format(format!(
            "Cannot convert {stored} to {target} under {:?} cast policy",
            config.cast_policy
        )));
    }

    let row_bytes = layout.row_bytes();
    let total = rows
        .len()
        .checked_mul(row_bytes)
        .ok_or(DiskNpyError::OutOfMemory { bytes: None })?;
    let mut out = alloc_zeroed(total)?;

    trace!(
        rows = rows.len(),
        bytes = total,
        engine = engine.name(),
        "gathering rows"
    );

    if !rows.is_empty() {
        let depth = config.queue_depth.max(1);
        let max_retries = config.max_short_read_retries;
        // A timeout past the end of the clock means no deadline.
        let deadline = config.timeout.and_then(|t| Instant::now().checked_add(t));

        let mut pending = rows
            .iter()
            .zip(out.chunks_mut(row_bytes))
            .enumerate()
            .map(|(slot, (&row, buf))| ReadOp {
                slot,
                offset: layout.row_offset(row),
                buf,
                attempt: 0,
            });

        engine.run(source, &mut |queue| {
            while queue.in_flight() < depth {
                match pending.next() {
                    Some(op) => queue.submit(op),
                    None => break,
                }
            }
            while queue.in_flight() > 0 {
                match settle(queue.wait(deadline)?, max_retries)? {
                    Step::Resubmit(op) => queue.submit(op),
                    Step::Done => {
                        if let Some(op) = pending.next() {
                            queue.submit(op);
                        }
                    }
                }
            }
            Ok(())
        })?;
    }

    if !layout.dtype().is_native_order() {
        dtype::swap_byte_order(&mut out, layout.word_size());
    }
    if target != stored {
        out = dtype::convert(&out, stored, target)?;
    }

    let mut shape = Vec::with_capacity(layout.shape().len());
    shape.push(rows.len());
    shape.extend_from_slice(&layout.shape()[1..]);

    Ok(FeatureBatch {
        data: out,
        shape,
        element_type: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::engine::{InlineEngine, ThreadPoolEngine};
    use crate::format::Header;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rows of `width` bytes, each filled with its row number, after a 16-byte prefix.
    #[derive(Debug)]
    struct Rows {
        width: usize,
        rows: usize,
        max_chunk: usize,
        stall_after: Option<usize>,
        reads: AtomicUsize,
    }

    impl Rows {
        fn new(width: usize, rows: usize) -> Self {
            Self { width, rows, max_chunk: usize::MAX, stall_after: None, reads: AtomicUsize::new(0) }
        }
    }

    impl ReadAt for Rows {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            let call = self.reads.fetch_add(1, Ordering::SeqCst);
            if self.stall_after.is_some_and(|after| call >= after) {
                return Ok(0);
            }
            let len = buf.len().min(self.max_chunk);
            for (i, b) in buf[..len].iter_mut().enumerate() {
                let pos = offset as usize + i - 16;
                *b = (pos / self.width) as u8;
            }
            Ok(len)
        }
        fn size(&self) -> io::Result<u64> {
            Ok((16 + self.width * self.rows) as u64)
        }
    }

    fn layout(rows: usize, cols: usize) -> ArrayLayout {
        let header = Header {
            version: (1, 0),
            dtype: DType::parse("|u1").unwrap(),
            fortran_order: false,
            shape: vec![rows, cols],
            header_len: 6,
            data_offset: 16,
        };
        ArrayLayout::from_header(&header, (16 + rows * cols) as u64).unwrap()
    }

    #[test]
    fn gathers_in_request_order_with_duplicates() {
        let source = Rows::new(4, 10);
        let engine = ThreadPoolEngine::new(4).unwrap();
        let config = ReaderConfig::builder().queue_depth(3).build().unwrap();
        let batch = gather(&layout(10, 4), &source, &engine, &config, &[7, 2, 2, 9, 0], ElementType::U8)
            .unwrap();
        assert_eq!(batch.shape(), &[5, 4]);
        let firsts: Vec<u8> = (0..5).map(|i| batch.row(i).unwrap()[0]).collect();
        assert_eq!(firsts, vec![7, 2, 2, 9, 0]);
        assert!(batch.row(5).is_none());
    }

    #[test]
    fn invalid_index_issues_no_reads() {
        let source = Rows::new(4, 10);
        for bad in [10, -1] {
            let err = gather(&layout(10, 4), &source, &InlineEngine, &ReaderConfig::default(), &[1, bad, 2], ElementType::U8)
                .unwrap_err();
            assert!(matches!(err, DiskNpyError::Index { index, rows: 10 } if index == bad));
        }
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn short_reads_are_continued() {
        let mut source = Rows::new(8, 4);
        source.max_chunk = 3;
        let config = ReaderConfig::builder().max_short_read_retries(2).build().unwrap();
        let batch = gather(&layout(4, 8), &source, &InlineEngine, &config, &[3, 1], ElementType::U8).unwrap();
        assert_eq!(batch.as_bytes(), &[3, 3, 3, 3, 3, 3, 3, 3, 1, 1, 1, 1, 1, 1, 1, 1]);
        // 8 bytes in chunks of 3: one read and two continuations per row.
        assert_eq!(source.reads.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn exhausted_retries_fail_with_io_error() {
        let mut source = Rows::new(8, 4);
        source.max_chunk = 3;
        let config = ReaderConfig::builder().max_short_read_retries(1).build().unwrap();
        let err = gather(&layout(4, 8), &source, &InlineEngine, &config, &[0], ElementType::U8).unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn stalled_source_fails_on_thread_pool() {
        let mut source = Rows::new(4, 10);
        source.stall_after = Some(2);
        let engine = ThreadPoolEngine::new(2).unwrap();
        let err = gather(&layout(10, 4), &source, &engine, &ReaderConfig::default(), &[0, 1, 2, 3, 4], ElementType::U8)
            .unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn empty_request_returns_empty_batch() {
        let source = Rows::new(4, 10);
        let batch = gather(&layout(10, 4), &source, &InlineEngine, &ReaderConfig::default(), &[], ElementType::U8).unwrap();
        assert_eq!(batch.shape(), &[0, 4]);
        assert!(batch.as_bytes().is_empty());
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn casts_after_assembly() {
        let source = Rows::new(2, 10);
        let batch = gather(&layout(10, 2), &source, &InlineEngine, &ReaderConfig::default(), &[5, 9], ElementType::F32)
            .unwrap();
        assert_eq!(batch.to_vec::<f32>().unwrap(), vec![5.0, 5.0, 9.0, 9.0]);
        assert!(batch.to_vec::<u8>().is_err());
    }

    #[test]
    fn forbidden_cast_is_a_format_error_before_io() {
        let source = Rows::new(2, 10);
        let err = gather(&layout(10, 2), &source, &InlineEngine, &ReaderConfig::default(), &[1], ElementType::Bool)
            .unwrap_err();
        assert!(matches!(err, DiskNpyError::Format(_)));
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unbounded_timeout_behaves_like_no_deadline() {
        let source = Rows::new(4, 10);
        let config = ReaderConfig::builder().timeout(std::time::Duration::MAX).build().unwrap();
        for engine in [&InlineEngine as &dyn IoEngine, &ThreadPoolEngine::new(2).unwrap()] {
            let batch = gather(&layout(10, 4), &source, engine, &config, &[7, 2], ElementType::U8).unwrap();
            assert_eq!(batch.as_bytes(), &[7, 7, 7, 7, 2, 2, 2, 2]);
        }
    }

    #[test]
    fn row_past_the_end_is_none() {
        let source = Rows::new(3, 10);
        let batch = gather(&layout(10, 3), &source, &InlineEngine, &ReaderConfig::default(), &[4], ElementType::U8).unwrap();
        assert_eq!(batch.row(0), Some(&[4u8, 4, 4][..]));
        assert_eq!(batch.row(1), None);
        assert_eq!(batch.row(usize::MAX / 3 + 1), None);
        assert_eq!(batch.row(usize::MAX), None);
    }

    #[test]
    fn validate_indices_reports_first_violation() {
        let err = validate_indices(&[0, 5, -2], 3).unwrap_err();
        assert!(matches!(err, DiskNpyError::Index { index: 5, rows: 3 }));
        assert_eq!(validate_indices(&[2, 0, 2], 3).unwrap(), vec![2, 0, 2]);
    }
}
