extern crate futures;
extern crate socket_output;
extern crate tokio_io;

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use self::futures::Future;
use self::socket_output::{Connection, EventLoop, SocketOutputError};
use self::tokio_io::AsyncWrite;

/// An in-memory stand-in for a socket: writes land in a shared byte sink, and a queue of
/// scripted responses lets tests force `WouldBlock` or a terminal error at a specific
/// point in the write sequence.
#[derive(Clone)]
pub struct MockStream {
    pub sink: Arc<Mutex<Vec<u8>>>,
    scripted: Arc<Mutex<VecDeque<io::ErrorKind>>>,
    pub shutdowns: Arc<AtomicUsize>,
}

impl MockStream {
    pub fn new() -> MockStream {
        MockStream {
            sink: Arc::new(Mutex::new(Vec::new())),
            scripted: Arc::new(Mutex::new(VecDeque::new())),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The next `write` call returns this error kind instead of writing.
    pub fn script_error(&self, kind: io::ErrorKind) {
        self.scripted.lock().unwrap().push_back(kind);
    }

    pub fn written(&self) -> Vec<u8> {
        self.sink.lock().unwrap().clone()
    }
}

impl Read for MockStream {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.scripted.lock().unwrap().pop_front() {
            return Err(io::Error::new(kind, "scripted"));
        }
        self.sink.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncWrite for MockStream {
    fn shutdown(&mut self) -> futures::Poll<(), io::Error> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(futures::Async::Ready(()))
    }
}

/// A minimal `EventLoop` that runs every posted job to completion on a single background
/// thread, in submission order. Good enough for tests, which never need real
/// non-blocking I/O readiness: `MockStream` either completes a write immediately or
/// returns a scripted error, never a genuine `WouldBlock` that depends on a reactor to
/// wake it back up.
///
/// Can be paused so a test can observe state (queued bytes, a write's future variant)
/// before the background thread has a chance to run and settle anything.
pub struct MockEventLoop {
    tx: mpsc::Sender<Box<Future<Item = (), Error = ()> + Send>>,
    closed: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    held: Arc<Mutex<VecDeque<Box<Future<Item = (), Error = ()> + Send>>>>,
}

impl MockEventLoop {
    pub fn new() -> MockEventLoop {
        let (tx, rx) = mpsc::channel::<Box<Future<Item = (), Error = ()> + Send>>();
        thread::Builder::new()
            .name("mock-event-loop".into())
            .spawn(move || {
                for job in rx {
                    let _ = job.wait();
                }
            })
            .expect("could not spawn mock event loop thread");
        MockEventLoop {
            tx: tx,
            closed: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            held: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Jobs posted while paused are held in submission order rather than run.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Unpauses and releases every held job to the background thread, in order.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let mut held = self.held.lock().unwrap();
        for job in held.split_off(0) {
            let _ = self.tx.send(job);
        }
    }
}

impl EventLoop for MockEventLoop {
    fn post(&self,
            job: Box<Future<Item = (), Error = ()> + Send>)
            -> Result<(), SocketOutputError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketOutputError::Scheduling("mock loop closed".into()));
        }
        if self.paused.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push_back(job);
            return Ok(());
        }
        self.tx
            .send(job)
            .map_err(|_| SocketOutputError::Scheduling("mock loop thread gone".into()))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A `Connection` that just counts aborts, for asserting abort-exactly-once.
pub struct CountingConnection {
    pub aborts: Arc<AtomicUsize>,
}

impl CountingConnection {
    pub fn new() -> CountingConnection {
        CountingConnection { aborts: Arc::new(AtomicUsize::new(0)) }
    }
}

impl Connection for CountingConnection {
    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}
