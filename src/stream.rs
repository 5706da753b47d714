use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures::{Async, Poll};
use tokio_io::AsyncWrite;

/// Wraps a bidirectional stream with the `is_closed`/`dispose` contract that
/// `SocketOutput` needs from its stream handle.
///
/// `dispose` is a synchronous, idempotent close: the underlying stream is dropped and
/// every later `write`/`shutdown` call becomes a no-op. Guarded by a mutex rather than a
/// `RefCell` because producer threads may race to construct a `SocketOutput` around the
/// same managed stream, even though, by contract, only the loop thread ever calls
/// `write` or `shutdown` once the connection is running.
pub struct ManagedStream<S> {
    inner: Mutex<Option<S>>,
    closed: AtomicBool,
}

impl<S> ManagedStream<S>
    where S: Read + Write + AsyncWrite
{
    pub fn new(stream: S) -> ManagedStream<S> {
        ManagedStream {
            inner: Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Synchronously closes the stream. Idempotent.
    pub fn dispose(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.inner.lock().unwrap() = None;
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match *self.inner.lock().unwrap() {
            Some(ref mut s) => s.write(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "stream disposed")),
        }
    }

    pub fn shutdown(&self) -> Poll<(), io::Error> {
        match *self.inner.lock().unwrap() {
            Some(ref mut s) => s.shutdown(),
            None => Ok(Async::Ready(())),
        }
    }
}

/// A pass-through decorator over a generic bidirectional byte stream.
///
/// Delegates every operation to the wrapped stream unchanged. This is the seam where a
/// surrounding server would inject TLS or other filtering; `SocketOutput` itself never
/// needs more than what this trivial decorator provides.
pub struct FilterStream<S> {
    inner: S,
}

impl<S> FilterStream<S> {
    pub fn new(inner: S) -> FilterStream<S> {
        FilterStream { inner: inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read> Read for FilterStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<S: Write> Write for FilterStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: AsyncWrite> AsyncWrite for FilterStream<S> {
    fn shutdown(&mut self) -> Poll<(), io::Error> {
        self.inner.shutdown()
    }
}
