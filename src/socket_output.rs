use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::{Async, Future, Poll};
use futures::sync::oneshot;
use futures_cpupool::CpuPool;
use tokio_io::AsyncWrite;

use block::{Block, BlockPool};
use connection::Connection;
use errors::SocketOutputError;
use event_loop::EventLoop;
use pipeline::Pipeline;
use stream::ManagedStream;
use tracer::Tracer;
use write_context::WriteContext;

/// Bounds how many batches can be admitted ahead of the stream at once: once this many are
/// outstanding (queued or actually executing), `schedule_drain` stops pulling new batches
/// off `next_write_context` and leaves further writes to keep accumulating there instead.
/// The stream itself is still written to by exactly one `Pipeline` at a time — see
/// `Shared::write_queue`/`executing` — so this bounds concurrent *admission*, not
/// concurrent *I/O*, the same way the original's per-socket send queue let several writes
/// be outstanding against a handle while the kernel serialized their bytes underneath.
pub const MAX_PENDING_WRITES: usize = 3;

/// A write counts toward `num_bytes_pre_completed` from the moment its promise settles
/// (immediately, in the common case) until its bytes actually leave the stream. Once the
/// running total would exceed this many bytes, further writes stop pre-completing and
/// instead queue behind the ones already in flight.
pub const MAX_BYTES_PRE_COMPLETED: i64 = 65536;

/// A write that couldn't be pre-completed immediately: its bytes are already queued for
/// the next `Pipeline`, but its promise won't settle until an earlier write frees up
/// enough of the byte budget.
struct PendingTask {
    bytes: usize,
    complete: oneshot::Sender<Result<(), SocketOutputError>>,
}

/// State shared between every clone of a `SocketOutput` and the loop thread draining it.
///
/// Protected by a single mutex. Every method below holds it only long enough to update
/// counters and move an already-built `WriteContext`/`Block` in or out; the actual I/O
/// and block copying both happen outside the lock.
struct Shared {
    /// Number of batches admitted (moved out of `next_write_context`) but not yet
    /// completed — whether still sitting in `write_queue` awaiting their turn or actively
    /// executing as a `Pipeline`. Bounded by `MAX_PENDING_WRITES`.
    writes_pending: usize,
    num_bytes_pre_completed: i64,
    last_write_error: Option<SocketOutputError>,
    next_write_context: Option<WriteContext>,
    /// FIFO of writes that were admitted but not pre-completed, in admission order. Freed
    /// as earlier writes' bytes actually leave the stream and the byte budget reopens;
    /// deliberately independent of which `Pipeline` batch eventually frees them, since a
    /// write can be queued across several drains before it's its turn.
    tasks_pending: VecDeque<PendingTask>,
    /// Batches admitted into flight (counted in `writes_pending`) but not yet executing,
    /// because an earlier batch is still writing to the stream. This is the per-stream
    /// write cursor: popped strictly in order, one at a time, so several batches can be
    /// outstanding at once without their bytes ever interleaving on the wire.
    write_queue: VecDeque<WriteContext>,
    /// True while the batch at the front of `write_queue` is a `Pipeline` actually
    /// running against the stream. A second `Pipeline` is never started until the first
    /// settles; only admission (growing `write_queue` up to `MAX_PENDING_WRITES`) runs
    /// ahead of it.
    executing: bool,
}

impl Shared {
    fn new() -> Shared {
        Shared {
            writes_pending: 0,
            num_bytes_pre_completed: 0,
            last_write_error: None,
            next_write_context: None,
            tasks_pending: VecDeque::new(),
            write_queue: VecDeque::new(),
            executing: false,
        }
    }
}

/// What kind of end-of-connection action `end` requests.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EndType {
    /// Half-close the send side once queued writes drain (`FIN`).
    ShutdownSend,
    /// Tear the connection down outright once queued writes drain.
    Disconnect,
}

/// The future returned by `write_async`.
///
/// `Done` covers every case where `SocketOutput` can resolve the write without waiting on
/// the loop at all: an empty buffer, a connection with an already-latched error, a
/// buffered (non-immediate) write, or an immediate write that fits inside the
/// pre-completion budget. `Pending` covers a write that was admitted but had to queue
/// behind the budget; it settles once an earlier write's bytes actually leave the stream
/// and free up room.
pub enum WriteFuture {
    Done(Option<Result<(), SocketOutputError>>),
    Pending(oneshot::Receiver<Result<(), SocketOutputError>>),
}

impl Future for WriteFuture {
    type Item = ();
    type Error = SocketOutputError;

    fn poll(&mut self) -> Poll<(), SocketOutputError> {
        match *self {
            WriteFuture::Done(ref mut result) => {
                match result.take().expect("poll must not be called after completion") {
                    Ok(()) => Ok(Async::Ready(())),
                    Err(e) => Err(e),
                }
            }
            WriteFuture::Pending(ref mut rx) => {
                match rx.poll() {
                    Ok(Async::Ready(Ok(()))) => Ok(Async::Ready(())),
                    Ok(Async::Ready(Err(e))) => Err(e),
                    Ok(Async::NotReady) => Ok(Async::NotReady),
                    Err(_canceled) => {
                        Err(SocketOutputError::Scheduling("write promise dropped".into()))
                    }
                }
            }
        }
    }
}

/// The backpressure-aware, buffered, cross-thread-safe outbound write path of a single
/// connection.
///
/// Cheap to clone: every clone shares the same locked state and the same underlying
/// stream. Producers on any thread call `write_async`/`write`/`end`; only the event loop
/// named at construction ever actually touches the stream.
pub struct SocketOutput<S> {
    shared: Arc<Mutex<Shared>>,
    stream: Arc<ManagedStream<S>>,
    pool: BlockPool,
    loop_: Arc<EventLoop>,
    connection: Arc<Connection>,
    tracer: Arc<Tracer>,
    cpu_pool: CpuPool,
}

impl<S> Clone for SocketOutput<S> {
    fn clone(&self) -> SocketOutput<S> {
        SocketOutput {
            shared: self.shared.clone(),
            stream: self.stream.clone(),
            pool: self.pool.clone(),
            loop_: self.loop_.clone(),
            connection: self.connection.clone(),
            tracer: self.tracer.clone(),
            cpu_pool: self.cpu_pool.clone(),
        }
    }
}

impl<S> SocketOutput<S>
    where S: io::Read + io::Write + AsyncWrite + Send + Sync + 'static
{
    pub fn new(stream: Arc<ManagedStream<S>>,
               pool: BlockPool,
               loop_: Arc<EventLoop>,
               connection: Arc<Connection>,
               tracer: Arc<Tracer>,
               cpu_pool: CpuPool)
               -> SocketOutput<S> {
        SocketOutput {
            shared: Arc::new(Mutex::new(Shared::new())),
            stream: stream,
            pool: pool,
            loop_: loop_,
            connection: connection,
            tracer: tracer,
            cpu_pool: cpu_pool,
        }
    }

    /// Queues `buf` for writing and returns a future that, in the common case, is already
    /// resolved: the write is optimistically pre-completed as soon as it's admitted,
    /// trusting that the bytes will actually leave the stream shortly after. Only backs
    /// off to a future that waits on the real write once the pre-completion budget is
    /// full, a prior write has failed, or another write is already queued ahead of it.
    pub fn write_async(&self, buf: Bytes) -> WriteFuture {
        self.write_async_with(buf, true, false, false)
    }

    /// Queues `buf` for writing without ever pre-completing it on its own.
    ///
    /// Meant for a write that is always immediately followed by a second, `immediate`
    /// write whose completion the caller actually cares about (for example, a header
    /// written just ahead of a body): batching the header's bytes into the budget without
    /// promising it separately avoids a promise nobody needs to observe.
    pub fn write_async_buffered(&self, buf: Bytes) -> WriteFuture {
        self.write_async_with(buf, false, false, false)
    }

    /// Common implementation behind `write_async`, `write_async_buffered`, and `end`: all
    /// three are really one operation (append some bytes, OR in some end-of-connection
    /// flags, decide how the resulting promise settles) with different argument shapes at
    /// the public boundary.
    fn write_async_with(&self,
                         buf: Bytes,
                         immediate: bool,
                         shutdown_send: bool,
                         disconnect: bool)
                         -> WriteFuture {
        let n = buf.len() as i64;
        let mut blocks = self.pool.copy_into_blocks(&buf);
        for block in blocks.iter_mut() {
            block.pin();
        }

        let mut shared = self.shared.lock().unwrap();

        {
            let ctx = shared.next_write_context.get_or_insert_with(WriteContext::new);
            ctx.blocks.extend(blocks);
            if shutdown_send {
                ctx.shutdown_send = true;
            }
            if disconnect {
                ctx.disconnect = true;
            }
        }

        // A write after a latched error is deliberately *not* refused here: it still
        // merges its blocks into the batch above and still queues below, settling once
        // `on_write_completed` next runs its budget-release loop (which drains
        // `tasks_pending` unconditionally once an error is latched, regardless of
        // budget). This keeps every producer promise flowing through the same FIFO
        // instead of special-casing the already-failed case. An empty buffer takes the
        // same path and so is naturally refused the same way once an error is latched.
        let mut future = if !immediate {
            shared.num_bytes_pre_completed += n;
            WriteFuture::Done(Some(Ok(())))
        } else if shared.last_write_error.is_none() && shared.tasks_pending.is_empty() &&
                  shared.num_bytes_pre_completed + n <= MAX_BYTES_PRE_COMPLETED {
            shared.num_bytes_pre_completed += n;
            WriteFuture::Done(Some(Ok(())))
        } else {
            let (tx, rx) = oneshot::channel();
            shared.tasks_pending.push_back(PendingTask {
                bytes: n as usize,
                complete: tx,
            });
            WriteFuture::Pending(rx)
        };

        if n > 0 {
            self.tracer.connection_write(n as usize);
        }

        let needs_abort = self.schedule_drain(&mut shared);
        // If scheduling itself just failed, the bytes this call admitted are already
        // gone and `future` may be holding a promise that optimistically pre-completed
        // as `Ok` moments ago; replace it with the now-latched error so the caller never
        // observes success for a write that will never reach the stream.
        let fallback_error = if needs_abort {
            shared.last_write_error.clone()
        } else {
            None
        };
        drop(shared);

        if needs_abort {
            self.tracer.connection_stop();
            self.connection.abort();
            if let Some(err) = fallback_error {
                future = WriteFuture::Done(Some(Err(err)));
            }
        }

        future
    }

    /// Blocking convenience wrapper over `write_async`, for producer threads that are
    /// not themselves driven by a reactor.
    pub fn write(&self, buf: Bytes) -> Result<(), SocketOutputError> {
        self.write_async(buf).wait()
    }

    /// Number of batches currently admitted and not yet completed — queued behind the
    /// stream's write cursor or actively executing. Bounded by `MAX_PENDING_WRITES`.
    pub fn pending_writes(&self) -> usize {
        self.shared.lock().unwrap().writes_pending
    }

    /// Requests an end-of-connection action once all queued writes have drained.
    ///
    /// Fire-and-forget, like `write_async_buffered`: the actual half-close or disconnect
    /// happens asynchronously once earlier writes drain. Only reports an error here if
    /// one was available synchronously (an already-latched error, or a scheduling
    /// failure caused by this very call).
    pub fn end(&self, end_type: EndType) -> Result<(), SocketOutputError> {
        let (shutdown_send, disconnect) = match end_type {
            EndType::ShutdownSend => (true, false),
            EndType::Disconnect => (false, true),
        };
        match self.write_async_with(Bytes::new(), true, shutdown_send, disconnect) {
            WriteFuture::Done(Some(result)) => result,
            WriteFuture::Done(None) => unreachable!("write_async_with always sets its result"),
            WriteFuture::Pending(_) => Ok(()),
        }
    }
}

impl<S> SocketOutput<S>
    where S: io::Read + io::Write + AsyncWrite + Send + Sync + 'static
{
    /// Admits whatever has accumulated in `next_write_context` into `write_queue`, then,
    /// if nothing is already executing, posts the head of that queue to the loop as a
    /// `Pipeline`.
    ///
    /// Must be called with `shared` locked. Admission is never skipped for an empty batch
    /// (an `immediate` write of zero bytes with no end-of-connection flags still gets
    /// admitted and posted) — a trivial `Pipeline` with nothing to do simply completes
    /// immediately once it runs; this is `drain`'s own documented no-op path, not a
    /// shortcut taken here. Returns `true` the first time this call observes (or causes)
    /// a terminal error, so the caller can invoke `Connection::abort` after releasing the
    /// lock.
    fn schedule_drain(&self, shared: &mut Shared) -> bool {
        if shared.writes_pending < MAX_PENDING_WRITES {
            if let Some(ctx) = shared.next_write_context.take() {
                shared.writes_pending += 1;
                shared.write_queue.push_back(ctx);
            }
        }

        if shared.executing {
            return false;
        }
        let ctx = match shared.write_queue.pop_front() {
            Some(ctx) => ctx,
            None => return false,
        };

        if self.loop_.is_closed() {
            shared.writes_pending = shared.writes_pending.saturating_sub(1);
            let first = self.settle_dead(shared, ctx);
            let recursed = self.schedule_drain(shared);
            return first || recursed;
        }

        shared.executing = true;

        let ctx_bytes: i64 = ctx.blocks.iter().map(|b| b.len() as i64).sum();
        let shutdown_send = ctx.shutdown_send;
        let output = self.clone();

        // Settling promises and re-scheduling the next drain means taking the lock,
        // releasing blocks back to the pool, and potentially calling `Connection::abort`
        // (arbitrary teardown code supplied by whatever owns the connection). None of
        // that is loop work, so it's handed to the worker pool instead of run inline on
        // the reactor thread that just finished the write.
        let on_complete = Box::new(move |blocks: VecDeque<Block>, error: Option<SocketOutputError>| {
            let output = output.clone();
            output.cpu_pool.clone().spawn_fn(move || {
                    let released: i64 = blocks.iter().map(|b| b.len() as i64).sum();
                    for block in blocks {
                        output.pool.release(block);
                    }
                    output.tracer.connection_write_callback(if error.is_some() { -1 } else { 0 });
                    if shutdown_send && error.is_none() {
                        output.tracer.connection_wrote_fin();
                    }

                    let to_abort = Self::on_write_completed(&output.shared, released, error);

                    let mut shared = output.shared.lock().unwrap();
                    shared.executing = false;
                    shared.writes_pending = shared.writes_pending.saturating_sub(1);
                    let needs_abort = output.schedule_drain(&mut shared);
                    drop(shared);

                    if to_abort || needs_abort {
                        output.tracer.connection_stop();
                        output.connection.abort();
                    }
                    Ok(()) as Result<(), ()>
                })
                .forget();
        });

        let pipeline = Pipeline::new(self.stream.clone(), ctx, on_complete);
        if self.loop_.post(Box::new(pipeline)).is_err() {
            // The context (and the blocks it owned) is already gone with the dropped
            // future; unwind the accounting exactly as if the write itself had failed, so
            // every promise still settles instead of hanging forever. Whatever else is
            // still in `write_queue` behind it gets the same treatment by recursing: a
            // loop that just rejected one post is not expected to accept the next.
            shared.executing = false;
            shared.writes_pending = shared.writes_pending.saturating_sub(1);
            shared.num_bytes_pre_completed -= ctx_bytes;
            let first = shared.last_write_error.is_none();
            if first {
                shared.last_write_error =
                    Some(SocketOutputError::Scheduling("event loop rejected the write".into()));
            }
            self.fail_all_pending(shared);
            let recursed = self.schedule_drain(shared);
            return first || recursed;
        }

        false
    }

    /// Settles a context's blocks/byte budget as if a `Pipeline` had run and failed,
    /// without ever building or posting one. Used once the loop is already known to be
    /// shut down, since nothing would ever poll it anyway.
    fn settle_dead(&self, shared: &mut Shared, ctx: WriteContext) -> bool {
        let first = shared.last_write_error.is_none();
        if first {
            shared.last_write_error =
                Some(SocketOutputError::Scheduling("event loop is shut down".into()));
        }
        let bytes: i64 = ctx.blocks.iter().map(|b| b.len() as i64).sum();
        shared.num_bytes_pre_completed -= bytes;
        for mut block in ctx.blocks {
            block.unpin();
            self.pool.release(block);
        }
        self.fail_all_pending(shared);
        first
    }

    /// Resolves every write still queued behind the byte budget with the connection's
    /// latched error. Called once the connection is known dead, since nothing will ever
    /// free up budget to complete them otherwise.
    fn fail_all_pending(&self, shared: &mut Shared) {
        let result = Err(shared.last_write_error
            .clone()
            .expect("fail_all_pending called without a latched error"));
        for task in shared.tasks_pending.split_off(0) {
            let _ = task.complete.send(result.clone());
        }
    }

    /// Accounts for one `Pipeline`'s completion: releases `released_bytes` back out of
    /// the pre-completion budget, latches `error` as the connection's terminal error on
    /// its first occurrence, and releases as many queued writes as the freed-up budget
    /// now allows, in the order they were admitted. Returns whether this call latched the
    /// error for the first time.
    fn on_write_completed(shared_handle: &Arc<Mutex<Shared>>,
                           released_bytes: i64,
                           error: Option<SocketOutputError>)
                           -> bool {
        let mut shared = shared_handle.lock().unwrap();

        let to_abort = if error.is_some() && shared.last_write_error.is_none() {
            shared.last_write_error = error;
            true
        } else {
            false
        };

        shared.num_bytes_pre_completed -= released_bytes;

        let result: Result<(), SocketOutputError> = match shared.last_write_error {
            Some(ref e) => Err(e.clone()),
            None => Ok(()),
        };

        loop {
            let fits = match shared.tasks_pending.front() {
                Some(task) => {
                    result.is_err() ||
                    shared.num_bytes_pre_completed + task.bytes as i64 <= MAX_BYTES_PRE_COMPLETED
                }
                None => break,
            };
            if !fits {
                break;
            }
            let task = shared.tasks_pending.pop_front().unwrap();
            if result.is_ok() {
                shared.num_bytes_pre_completed += task.bytes as i64;
            }
            let _ = task.complete.send(result.clone());
        }

        to_abort
    }
}
