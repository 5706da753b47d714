#[macro_use]
extern crate log;
extern crate env_logger;
extern crate bytes;
extern crate futures;
extern crate futures_cpupool;
extern crate tokio_core;
extern crate tokio_io;

mod block;
mod connection;
mod errors;
mod event_loop;
mod pipeline;
mod socket_output;
mod stream;
mod tracer;
mod write_context;

pub use block::{Block, BlockPool, BLOCK_CAPACITY};
pub use connection::{Connection, StreamConnection};
pub use errors::SocketOutputError;
pub use event_loop::{EventLoop, RemoteEventLoop, ShutdownGuard};
pub use socket_output::{EndType, SocketOutput, WriteFuture, MAX_BYTES_PRE_COMPLETED,
                         MAX_PENDING_WRITES};
pub use stream::{FilterStream, ManagedStream};
pub use tracer::{LogTracer, NullTracer, Tracer};
