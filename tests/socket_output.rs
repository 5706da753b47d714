extern crate bytes;
extern crate futures;
extern crate futures_cpupool;
extern crate socket_output;

mod support;

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use futures::{Async, Future};
use futures_cpupool::CpuPool;

use socket_output::{BlockPool, EndType, ManagedStream, NullTracer, SocketOutput,
                     BLOCK_CAPACITY};
use support::{CountingConnection, MockEventLoop, MockStream};

fn wait_for<F: Fn() -> bool>(f: F) {
    for _ in 0..200 {
        if f() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition never became true");
}

fn harness() -> (SocketOutput<MockStream>, MockStream, Arc<MockEventLoop>, Arc<CountingConnection>) {
    let (output, stream, event_loop, connection, _managed) = harness_with_managed();
    (output, stream, event_loop, connection)
}

/// Like `harness`, but also returns the `ManagedStream` handle directly, for tests that
/// need to dispose the stream out from under a pending write.
fn harness_with_managed()
    -> (SocketOutput<MockStream>,
        MockStream,
        Arc<MockEventLoop>,
        Arc<CountingConnection>,
        Arc<ManagedStream<MockStream>>)
{
    let stream = MockStream::new();
    let managed = Arc::new(ManagedStream::new(stream.clone()));
    let event_loop = Arc::new(MockEventLoop::new());
    let connection = Arc::new(CountingConnection::new());
    let tracer = Arc::new(NullTracer);
    let pool = BlockPool::new();
    let cpu_pool = CpuPool::new(1);

    let output = SocketOutput::new(managed.clone(),
                                    pool,
                                    event_loop.clone(),
                                    connection.clone() as Arc<socket_output::Connection>,
                                    tracer,
                                    cpu_pool);
    (output, stream, event_loop, connection, managed)
}

#[test]
fn single_small_write_round_trips() {
    // `write` blocks until the write is admitted, not until its bytes actually leave the
    // stream: a small write pre-completes as soon as it's queued, so the assertion below
    // has to wait for the loop to actually run the pipeline.
    let (output, stream, _loop, _conn) = harness();
    output.write(Bytes::from_static(b"hello")).expect("write should succeed");
    wait_for(|| stream.written().len() == 5);
    assert_eq!(b"hello".to_vec(), stream.written());
}

#[test]
fn large_write_is_split_into_blocks_and_reassembled_in_order() {
    let (output, stream, _loop, _conn) = harness();
    let payload: Vec<u8> = (0..(BLOCK_CAPACITY * 3 + 17)).map(|i| (i % 251) as u8).collect();
    output.write(Bytes::from(payload.clone())).expect("write should succeed");
    wait_for(|| stream.written().len() == payload.len());
    assert_eq!(payload, stream.written());
}

#[test]
fn many_small_writes_stay_ordered_under_the_pre_completion_budget() {
    // 50 * 1500 bytes comfortably exceeds `MAX_BYTES_PRE_COMPLETED`, so some of these
    // writes will pre-complete immediately and some will have to queue behind the byte
    // budget until earlier ones actually leave the stream. Either way every write's
    // future eventually resolves `Ok`, and ordering must hold across the whole run.
    let (output, stream, _loop, _conn) = harness();
    let mut expected = Vec::new();
    let mut pending = Vec::new();
    for i in 0..50u8 {
        let chunk = vec![i; 1500];
        pending.push(output.write_async(Bytes::from(chunk.clone())));
        expected.extend_from_slice(&chunk);
    }
    for write in pending {
        write.wait().expect("every admitted write settles successfully");
    }
    wait_for(|| stream.written().len() == expected.len());
    assert_eq!(expected, stream.written());
}

#[test]
fn writes_past_the_byte_budget_queue_instead_of_pre_completing() {
    let (output, stream, event_loop, _conn) = harness();
    // Pause the loop so nothing settles out from under this test while it inspects the
    // state of two back-to-back writes.
    event_loop.pause();

    // The first write fits entirely within the budget and pre-completes immediately,
    // without the loop having run at all.
    let almost_full = vec![0u8; (socket_output::MAX_BYTES_PRE_COMPLETED - 1) as usize];
    let first = output.write_async(Bytes::from(almost_full.clone()));
    assert!(first.wait().is_ok(), "a write within budget pre-completes immediately");

    // A second write that would push the running total past the budget has to queue
    // instead: its future is not already resolved.
    let mut second = output.write_async(Bytes::from_static(b"ab"));
    match second.poll() {
        Ok(Async::NotReady) => {}
        other => panic!("write past the byte budget should still be pending, got {:?}",
                         other.map(|_| ())),
    }

    event_loop.resume();
    second.wait().expect("the queued write settles once the first one's bytes drain");
    wait_for(|| stream.written().len() == almost_full.len() + 2);
}

#[test]
fn writes_pending_reaches_the_concurrent_drain_cap() {
    let (output, stream, event_loop, _conn) = harness();
    // Pause the loop so none of these batches actually execute; each write_async call
    // still runs schedule_drain synchronously and admits its own batch into flight.
    event_loop.pause();

    let mut expected = Vec::new();
    let mut futures = Vec::new();
    for i in 0..socket_output::MAX_PENDING_WRITES {
        let chunk = vec![i as u8; 4];
        futures.push(output.write_async(Bytes::from(chunk.clone())));
        expected.extend_from_slice(&chunk);
    }
    assert_eq!(socket_output::MAX_PENDING_WRITES, output.pending_writes());

    // A further write is still admitted into the next batch (and still pre-completes, if
    // it fits the byte budget), but does not grow `pending_writes` past the cap: there is
    // nowhere to queue it until an earlier batch frees a slot.
    let chunk = vec![9u8; 4];
    let extra = output.write_async(Bytes::from(chunk.clone()));
    expected.extend_from_slice(&chunk);
    assert_eq!(socket_output::MAX_PENDING_WRITES, output.pending_writes());

    event_loop.resume();
    for future in futures {
        future.wait().expect("every admitted batch eventually settles");
    }
    extra.wait().expect("the batch left behind the cap settles once a slot frees up");

    wait_for(|| output.pending_writes() == 0);
    wait_for(|| stream.written().len() == expected.len());
    assert_eq!(expected, stream.written());
}

#[test]
fn an_empty_immediate_write_still_schedules_a_drain() {
    let (output, _stream, event_loop, _conn) = harness();
    event_loop.pause();

    let empty = output.write_async(Bytes::new());
    // The batch was admitted and posted (held, since the loop is paused) rather than
    // short-circuited away for carrying no blocks and no end-of-connection flags.
    assert_eq!(1, output.pending_writes());

    event_loop.resume();
    empty.wait().expect("an empty write still completes once its trivial drain runs");
    wait_for(|| output.pending_writes() == 0);
}

#[test]
fn write_against_a_disposed_stream_short_circuits_instead_of_erroring() {
    // `write_async`'s own future pre-completes on admission regardless of how the batch's
    // `Pipeline` eventually fares, so the observable difference between short-circuiting
    // and surfacing a stale `NotConnected` as a write error is whether the connection
    // gets aborted, not what this call's future resolves to.
    let (output, stream, event_loop, conn, managed) = harness_with_managed();
    event_loop.pause();

    let write = output.write_async(Bytes::from_static(b"never sent"));
    managed.dispose();
    event_loop.resume();

    wait_for(|| output.pending_writes() == 0);
    let _ = write.wait();
    assert!(stream.written().is_empty(), "disposed stream must not observe the write");
    assert_eq!(0,
               conn.aborts.load(::std::sync::atomic::Ordering::SeqCst),
               "a stream closed out from under a pending batch must short-circuit, not surface as a write error");
}

#[test]
fn writes_after_a_latched_error_are_refused_immediately() {
    let (output, _stream, _loop, _conn) = harness();
    _stream.script_error(io::ErrorKind::Other);

    // A small write fits the pre-completion budget and resolves successfully on
    // admission; the scripted failure only surfaces once the loop actually tries to
    // write it out, latching the error for everything after.
    let _ = output.write(Bytes::from_static(b"a"));

    wait_for(|| output.write(Bytes::from_static(b"b")).is_err());
    for _ in 0..3 {
        let result = output.write(Bytes::from_static(b"b"));
        assert!(result.is_err(), "every write after the latch should be refused immediately");
    }
}

#[test]
fn write_error_aborts_the_connection_exactly_once() {
    let (output, _stream, _loop, conn) = harness();
    _stream.script_error(io::ErrorKind::BrokenPipe);

    let _ = output.write(Bytes::from_static(b"x"));
    let _ = output.write(Bytes::from_static(b"y"));
    let _ = output.write(Bytes::from_static(b"z"));

    wait_for(|| conn.aborts.load(::std::sync::atomic::Ordering::SeqCst) >= 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(1, conn.aborts.load(::std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn end_shutdown_send_half_closes_after_pending_writes_drain() {
    let (output, stream, _loop, _conn) = harness();
    output.write(Bytes::from_static(b"payload")).expect("write should succeed");
    output.end(EndType::ShutdownSend).expect("end should succeed");
    wait_for(|| stream.shutdowns.load(::std::sync::atomic::Ordering::SeqCst) == 1);
    assert_eq!(b"payload".to_vec(), stream.written());
}

#[test]
fn empty_write_resolves_immediately_without_touching_the_stream() {
    let (output, stream, _loop, _conn) = harness();
    output.write(Bytes::new()).expect("empty write always succeeds");
    assert!(stream.written().is_empty());
}
