use std::sync::Arc;

use tokio_io::AsyncWrite;
use std::io::{Read, Write};

use stream::ManagedStream;

/// The owning connection that `SocketOutput` reports unrecoverable errors to.
///
/// `SocketOutput` never tears a connection down itself; on the first write error it
/// latches the error and calls `abort` exactly once, leaving the actual teardown
/// (removing the connection from any registries, freeing other per-connection state) to
/// whatever implements this trait.
pub trait Connection: Send + Sync {
    fn abort(&self);
}

/// A `Connection` that aborts by disposing the managed stream it owns.
pub struct StreamConnection<S> {
    stream: Arc<ManagedStream<S>>,
}

impl<S> StreamConnection<S>
    where S: Read + Write + AsyncWrite
{
    pub fn new(stream: Arc<ManagedStream<S>>) -> StreamConnection<S> {
        StreamConnection { stream: stream }
    }
}

impl<S> Connection for StreamConnection<S>
    where S: Read + Write + AsyncWrite + Send + Sync
{
    fn abort(&self) {
        self.stream.dispose();
    }
}
