//! The asynchronous read engines.
//!
//! An engine runs one gather at a time per [`IoEngine::run`] call. Inside `run`
//! the caller gets an [`IoQueue`]: it submits positioned reads and drains their
//! completions one by one, in whatever order the reads finish. Each read owns the
//! output slot it fills, so completions can be handled without any locking.
//!
//! `run` is the scoped acquisition of the engine: when it returns, on success or
//! on any error, every submitted read has finished and released its slot.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tracing::debug;

use crate::error::{DiskNpyError, Result};
use crate::io::ReadAt;

/// One positioned read into a caller-owned slot.
#[derive(Debug)]
pub struct ReadOp<'buf> {
    /// Output slot (row position in the request) this read fills.
    pub slot: usize,
    /// Absolute file offset of `buf[0]`.
    pub offset: u64,
    /// Destination bytes. Exclusive to this operation until it completes.
    pub buf: &'buf mut [u8],
    /// Continuations already issued for this slot.
    pub attempt: u32,
}

/// A finished [`ReadOp`], handed back with its slot.
#[derive(Debug)]
pub struct Completion<'buf> {
    /// The operation, including its destination slice.
    pub op: ReadOp<'buf>,
    /// Bytes read, or the error the source reported.
    pub result: io::Result<usize>,
}

/// Submission and completion side of one engine run.
pub trait IoQueue<'buf> {
    /// Queues a read. Returns immediately; the result arrives through [`IoQueue::wait`].
    fn submit(&mut self, op: ReadOp<'buf>);

    /// Number of submitted reads whose completion has not been returned yet.
    fn in_flight(&self) -> usize;

    /// Blocks until any in-flight read completes.
    ///
    /// Fails with an I/O `TimedOut` error once `deadline` passes; the queue is then
    /// aborted and reads that have not started yet are skipped.
    fn wait(&mut self, deadline: Option<Instant>) -> Result<Completion<'buf>>;
}

/// A facility that executes positioned reads asynchronously.
pub trait IoEngine: Send + Sync + fmt::Debug {
    /// Runs `body` with a fresh queue over `source`.
    ///
    /// Returns after `body` has returned and every read it submitted has finished.
    fn run<'buf>(
        &self,
        source: &'buf dyn ReadAt,
        body: &mut dyn FnMut(&mut dyn IoQueue<'buf>) -> Result<()>,
    ) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "read skipped: gather aborted")
}

fn timed_out() -> DiskNpyError {
    io::Error::new(io::ErrorKind::TimedOut, "gather deadline expired").into()
}

fn nothing_in_flight() -> DiskNpyError {
    DiskNpyError::Internal("wait() called with no reads in flight".into())
}

// --- Thread pool engine ---

/// Executes reads on a dedicated rayon pool, overlapping many blocking positioned
/// reads. Safe for concurrent use: each `run` opens its own rayon scope.
pub struct ThreadPoolEngine {
    pool: rayon::ThreadPool,
}

impl ThreadPoolEngine {
    /// Builds a pool with `threads` workers (0 picks rayon's default).
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("disknpy-io-{i}"))
            .build()
            .map_err(|e| DiskNpyError::Internal(format!("cannot start I/O pool: {e}")))?;
        debug!(threads = pool.current_num_threads(), "started I/O thread pool");
        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl fmt::Debug for ThreadPoolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolEngine")
            .field("threads", &self.threads())
            .finish()
    }
}

struct PoolQueue<'a, 'scope, 'buf> {
    scope: &'a rayon::Scope<'scope>,
    source: &'buf dyn ReadAt,
    abort: &'scope AtomicBool,
    tx: Sender<Completion<'buf>>,
    rx: Receiver<Completion<'buf>>,
    in_flight: usize,
}

impl<'buf: 'scope, 'scope> IoQueue<'buf> for PoolQueue<'_, 'scope, 'buf> {
    fn submit(&mut self, op: ReadOp<'buf>) {
        let tx = self.tx.clone();
        let source = self.source;
        let abort = self.abort;
        self.in_flight += 1;
        self.scope.spawn(move |_| {
            let result = if abort.load(Ordering::Relaxed) {
                Err(aborted())
            } else {
                source.read_at(op.buf, op.offset)
            };
            // The receiver is gone only after an abort; nobody needs this result.
            let _ = tx.send(Completion { op, result });
        });
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn wait(&mut self, deadline: Option<Instant>) -> Result<Completion<'buf>> {
        if self.in_flight == 0 {
            return Err(nothing_in_flight());
        }
        let completion = match deadline {
            None => self
                .rx
                .recv()
                .map_err(|_| DiskNpyError::Internal("completion channel closed".into()))?,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.rx.recv_timeout(remaining) {
                    Ok(c) => c,
                    Err(RecvTimeoutError::Timeout) => {
                        self.abort.store(true, Ordering::SeqCst);
                        return Err(timed_out());
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(DiskNpyError::Internal("completion channel closed".into()));
                    }
                }
            }
        };
        self.in_flight -= 1;
        Ok(completion)
    }
}

impl IoEngine for ThreadPoolEngine {
    fn run<'buf>(
        &self,
        source: &'buf dyn ReadAt,
        body: &mut dyn FnMut(&mut dyn IoQueue<'buf>) -> Result<()>,
    ) -> Result<()> {
        let abort = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel();

        // The scope joins every spawned read before returning, on every path.
        self.pool.in_place_scope(|scope| {
            let mut queue = PoolQueue {
                scope,
                source,
                abort: &abort,
                tx,
                rx,
                in_flight: 0,
            };
            let result = body(&mut queue);
            if result.is_err() {
                abort.store(true, Ordering::SeqCst);
            }
            result
        })
    }

    fn name(&self) -> &'static str {
        "thread-pool"
    }
}

/// The process-wide engine shared by handles that do not bring their own.
///
/// Created on first use with rayon's default thread count.
pub fn shared_engine() -> Result<Arc<ThreadPoolEngine>> {
    static SHARED: OnceLock<std::result::Result<Arc<ThreadPoolEngine>, DiskNpyError>> =
        OnceLock::new();
    SHARED
        .get_or_init(|| ThreadPoolEngine::new(0).map(Arc::new))
        .clone()
}

// --- Inline engine ---

/// Executes each read synchronously at submission time.
///
/// The fallback for platforms or callers that cannot spare threads; completions
/// are returned in submission order.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineEngine;

struct InlineQueue<'buf> {
    source: &'buf dyn ReadAt,
    done: VecDeque<Completion<'buf>>,
    aborted: bool,
}

impl<'buf> IoQueue<'buf> for InlineQueue<'buf> {
    fn submit(&mut self, op: ReadOp<'buf>) {
        let result = if self.aborted {
            Err(aborted())
        } else {
            self.source.read_at(op.buf, op.offset)
        };
        self.done.push_back(Completion { op, result });
    }

    fn in_flight(&self) -> usize {
        self.done.len()
    }

    fn wait(&mut self, deadline: Option<Instant>) -> Result<Completion<'buf>> {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            self.aborted = true;
            return Err(timed_out());
        }
        self.done.pop_front().ok_or_else(nothing_in_flight)
    }
}

impl IoEngine for InlineEngine {
    fn run<'buf>(
        &self,
        source: &'buf dyn ReadAt,
        body: &mut dyn FnMut(&mut dyn IoQueue<'buf>) -> Result<()>,
    ) -> Result<()> {
        let mut queue = InlineQueue {
            source,
            done: VecDeque::new(),
            aborted: false,
        };
        body(&mut queue)
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}
