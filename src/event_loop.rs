use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use futures::sync::oneshot;
use futures::Future;
use tokio_core::net::TcpStream;
use tokio_core::reactor::{Core, Remote};

use errors::SocketOutputError;

/// Schedules work onto the event loop that drives a connection's I/O.
///
/// `SocketOutput` never touches the loop's reactor directly: every blocking write or
/// shutdown call is wrapped in a future and handed to `post`, which is `Send`able and
/// callable from any producer thread.
pub trait EventLoop: Send + Sync {
    fn post(&self, job: Box<Future<Item = (), Error = ()> + Send>) -> Result<(), SocketOutputError>;

    /// Best-effort check of whether `post` would currently fail. Callers use this to
    /// avoid building work that would only be dropped unpolled; `post`'s own result is
    /// still authoritative since the loop can shut down between the two calls.
    fn is_closed(&self) -> bool {
        false
    }
}

/// An `EventLoop` backed by a `tokio_core::reactor::Remote`.
///
/// `Remote` is the `Send + Sync` handle to a reactor running on some other thread;
/// `Handle`, by contrast, is tied to the thread that created it and can't be shared this
/// way. `RemoteEventLoop` tracks whether the loop has been shut down so that `post` after
/// shutdown fails fast instead of silently dropping the job.
pub struct RemoteEventLoop {
    remote: Remote,
    closed: Arc<AtomicBool>,
}

impl RemoteEventLoop {
    pub fn new(remote: Remote) -> RemoteEventLoop {
        RemoteEventLoop {
            remote: remote,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns a reactor on a dedicated background thread and returns a loop handle for
    /// it along with a guard that signals shutdown on drop.
    pub fn run_background(name: &str) -> io::Result<(RemoteEventLoop, ShutdownGuard)> {
        let (tx, rx) = mpsc::channel();
        let closed_for_thread = Arc::new(AtomicBool::new(false));
        let closed = closed_for_thread.clone();
        let handle = thread::Builder::new().name(name.to_owned()).spawn(move || {
            let mut core = match Core::new() {
                Ok(core) => core,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            let _ = tx.send(Ok(core.remote()));
            // Parked forever; the loop is driven by futures posted via `Remote::spawn`.
            let (_forever_tx, forever_rx) = oneshot::channel::<()>();
            let _: Result<(), ()> = core.run(forever_rx.map_err(|_| ()));
            closed_for_thread.store(true, Ordering::SeqCst);
        })?;
        let remote = rx.recv().map_err(|_| {
            io::Error::new(io::ErrorKind::Other, "reactor thread died before starting")
        })??;
        Ok((RemoteEventLoop {
                remote: remote,
                closed: closed.clone(),
            },
            ShutdownGuard { handle: Some(handle), closed: closed }))
    }

    /// Connects a `TcpStream` on this loop's own reactor thread and blocks the caller
    /// until the connection completes or fails.
    ///
    /// A stream is only ever safe to drive from the reactor that registered it with the
    /// OS poller, so unlike a plain write job, connecting genuinely needs a `Handle` and
    /// not just a `Remote` — this is the one place that distinction surfaces in this
    /// crate's public API.
    pub fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let (tx, rx) = mpsc::channel();
        self.remote.spawn(move |handle| {
            TcpStream::connect(&addr, handle).then(move |result| {
                let _ = tx.send(result);
                Ok(())
            })
        });
        rx.recv()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "event loop dropped the connect job"))?
    }
}

impl EventLoop for RemoteEventLoop {
    fn post(&self, job: Box<Future<Item = (), Error = ()> + Send>) -> Result<(), SocketOutputError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketOutputError::Scheduling("event loop is shut down".into()));
        }
        self.remote.spawn(move |_handle| job);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Joins the background reactor thread spawned by `RemoteEventLoop::run_background` when
/// dropped. Does not itself request shutdown; callers arrange that by completing the
/// loop's driving future before dropping the guard.
pub struct ShutdownGuard {
    handle: Option<thread::JoinHandle<()>>,
    closed: Arc<AtomicBool>,
}

impl ShutdownGuard {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
