#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate bytes;
extern crate env_logger;
extern crate futures_cpupool;
extern crate socket_output;
extern crate tokio_core;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use clap::{App, Arg};
use futures_cpupool::CpuPool;
use tokio_core::net::TcpStream;

use socket_output::{BlockPool, Connection, EndType, LogTracer, ManagedStream, RemoteEventLoop,
                     SocketOutput, StreamConnection};

static ADDR_ARG: &'static str = "ADDR";
static MESSAGE_ARG: &'static str = "MESSAGE";

fn mk_app() -> App<'static, 'static> {
    App::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(Arg::with_name(ADDR_ARG)
            .required(true)
            .index(1)
            .help("Address to connect to, e.g. 127.0.0.1:7000"))
        .arg(Arg::with_name(MESSAGE_ARG)
            .required(true)
            .index(2)
            .help("Message to write before half-closing the connection."))
}

fn main() {
    drop(env_logger::init());

    let opts = mk_app().get_matches();
    let addr: SocketAddr = opts.value_of(ADDR_ARG).unwrap().parse().expect("invalid address");
    let message = opts.value_of(MESSAGE_ARG).unwrap().to_owned();

    let (event_loop, _guard) = RemoteEventLoop::run_background("socket-output-demo")
        .expect("could not start event loop");
    let event_loop = Arc::new(event_loop);

    let stream: TcpStream = event_loop.connect(addr).expect("could not connect");
    let managed = Arc::new(ManagedStream::new(stream));
    let connection: Arc<Connection> = Arc::new(StreamConnection::new(managed.clone()));
    let tracer = Arc::new(LogTracer { connection_id: 1 });
    let pool = BlockPool::new();
    let cpu_pool = CpuPool::new(1);

    let output: SocketOutput<TcpStream> =
        SocketOutput::new(managed, pool, event_loop, connection, tracer, cpu_pool);

    match output.write(Bytes::from(message.into_bytes())) {
        Ok(()) => info!("wrote message"),
        Err(e) => error!("write failed: {}", e),
    }

    if let Err(e) = output.end(EndType::ShutdownSend) {
        error!("shutdown failed: {}", e);
    }

    // `write`/`end` only block until their work is queued, not until it has actually gone
    // out over the wire; give the loop a moment to drain before tearing down. The loop's
    // background thread otherwise runs forever, so exit directly rather than letting
    // `_guard`'s drop join it.
    thread::sleep(Duration::from_millis(200));
    process::exit(0);
}
