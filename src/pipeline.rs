use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use futures::{Async, Future, Poll};
use tokio_io::AsyncWrite;

use block::Block;
use errors::SocketOutputError;
use stream::ManagedStream;
use write_context::WriteContext;

enum Stage {
    Write,
    ShutdownSend,
    Disconnect,
    Done,
}

/// Drives one `WriteContext` to completion against a stream: writes every block in
/// order, then (if requested) half-closes the send side, then (if requested) disposes
/// the stream outright.
///
/// Mirrors the Write -> shutdown-send -> disconnect -> complete progression of the
/// original callback-based pipeline, but as a poll-driven state machine, which is the
/// more idiomatic shape for a `futures` 0.1 future.
pub struct Pipeline<S> {
    stream: Arc<ManagedStream<S>>,
    remaining: VecDeque<Block>,
    written: VecDeque<Block>,
    front_offset: usize,
    shutdown_send: bool,
    disconnect: bool,
    stage: Stage,
    error: Option<io::Error>,
    on_complete: Option<Box<FnMut(VecDeque<Block>, Option<SocketOutputError>) + Send>>,
}

impl<S> Pipeline<S>
    where S: io::Read + io::Write + AsyncWrite
{
    pub fn new(stream: Arc<ManagedStream<S>>,
               ctx: WriteContext,
               on_complete: Box<FnMut(VecDeque<Block>, Option<SocketOutputError>) + Send>)
               -> Pipeline<S> {
        Pipeline {
            stream: stream,
            remaining: ctx.blocks,
            written: VecDeque::new(),
            front_offset: 0,
            shutdown_send: ctx.shutdown_send,
            disconnect: ctx.disconnect,
            stage: Stage::Write,
            error: None,
            on_complete: Some(on_complete),
        }
    }

    /// Writes as much of `remaining` as the stream will currently accept.
    ///
    /// Returns `Ok(true)` once every block has been fully written, `Ok(false)` if the
    /// stream would block and the caller should return `NotReady`, or the write error
    /// that stopped progress.
    fn drive_write(&mut self) -> io::Result<bool> {
        loop {
            let block_len = match self.remaining.front() {
                Some(block) => block.len(),
                None => return Ok(true),
            };
            let n = {
                let block = self.remaining.front().unwrap();
                let slice = &block.as_slice()[self.front_offset..];
                match self.stream.write(slice) {
                    Ok(n) => n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) => return Err(e),
                }
            };
            self.front_offset += n;
            if self.front_offset == block_len {
                self.front_offset = 0;
                let mut block = self.remaining.pop_front().unwrap();
                block.unpin();
                self.written.push_back(block);
            }
        }
    }

    fn finish(&mut self, error: Option<io::Error>) {
        self.error = error;
        self.stage = Stage::Done;
    }
}

impl<S> Future for Pipeline<S>
    where S: io::Read + io::Write + AsyncWrite
{
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        loop {
            match self.stage {
                Stage::Write => {
                    // A stream already disposed (e.g. by `Connection::abort()` racing in
                    // from the read side) short-circuits straight past the write: its
                    // blocks were never going anywhere, and there is nothing to report as
                    // a fresh write error.
                    let next = if self.stream.is_closed() {
                        Ok(true)
                    } else {
                        self.drive_write()
                    };
                    match next {
                        Ok(true) => {
                            self.stage = if self.shutdown_send {
                                Stage::ShutdownSend
                            } else if self.disconnect {
                                Stage::Disconnect
                            } else {
                                Stage::Done
                            };
                        }
                        Ok(false) => return Ok(Async::NotReady),
                        Err(e) => self.finish(Some(e)),
                    }
                }
                Stage::ShutdownSend => {
                    let next = if self.stream.is_closed() {
                        Ok(Async::Ready(()))
                    } else {
                        self.stream.shutdown()
                    };
                    match next {
                        Ok(Async::Ready(())) => {
                            self.stage = if self.disconnect { Stage::Disconnect } else { Stage::Done };
                        }
                        Ok(Async::NotReady) => return Ok(Async::NotReady),
                        Err(e) => self.finish(Some(e)),
                    }
                }
                Stage::Disconnect => {
                    self.stream.dispose();
                    self.stage = Stage::Done;
                }
                Stage::Done => {
                    let error = self.error.take().map(SocketOutputError::from);
                    // Blocks left in `remaining` on an error path were never started;
                    // unpin them too so none leak out of the pool.
                    for block in self.remaining.iter_mut() {
                        if block.is_pinned() {
                            block.unpin();
                        }
                    }
                    let mut done = self.written.split_off(0);
                    done.append(&mut self.remaining);
                    if let Some(mut cb) = self.on_complete.take() {
                        cb(done, error);
                    }
                    return Ok(Async::Ready(()));
                }
            }
        }
    }
}
