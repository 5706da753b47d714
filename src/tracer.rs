/// Observability hooks fired at the points the original implementation logs, kept as a
/// trait so tests can assert on call sequences without scraping log output.
pub trait Tracer: Send + Sync {
    /// A write of `len` bytes was handed to the loop.
    fn connection_write(&self, len: usize);

    /// A previously scheduled write completed, successfully or not.
    fn connection_write_callback(&self, status: i32);

    /// The send half of the connection was shut down.
    fn connection_wrote_fin(&self);

    /// The connection was aborted.
    fn connection_stop(&self);
}

/// Routes trace events through `log!` at debug level, mirroring the density of logging
/// the rest of the write path's collaborators use.
pub struct LogTracer {
    pub connection_id: u64,
}

impl Tracer for LogTracer {
    fn connection_write(&self, len: usize) {
        debug!("[{}] write {}B", self.connection_id, len);
    }

    fn connection_write_callback(&self, status: i32) {
        debug!("[{}] write callback status={}", self.connection_id, status);
    }

    fn connection_wrote_fin(&self) {
        debug!("[{}] wrote fin", self.connection_id);
    }

    fn connection_stop(&self) {
        debug!("[{}] stop", self.connection_id);
    }
}

/// A `Tracer` that discards every event. Used where no observer is wired up.
pub struct NullTracer;

impl Tracer for NullTracer {
    fn connection_write(&self, _len: usize) {}
    fn connection_write_callback(&self, _status: i32) {}
    fn connection_wrote_fin(&self) {}
    fn connection_stop(&self) {}
}
