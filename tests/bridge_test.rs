/*!
 * Foreign-Future Bridge Tests
 * Exactly-once delivery from a real foreign runtime into the owner thread
 */

use oarlock::{bridge_io_task, ForeignFuture, ForeignOutcome, OutcomeKind, RuntimeContext, RuntimeError};
use pretty_assertions::assert_eq;
use std::io::{Error, ErrorKind};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn foreign_engine() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn test_bridged_task_delivers_on_owner_thread() {
    let runtime = RuntimeContext::spawn().unwrap();
    let engine = foreign_engine();

    let future = bridge_io_task(engine.handle(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<u32, Error>(42)
    });

    let (tx, rx) = flume::unbounded();
    future.on_complete(
        runtime.context().dispatcher(),
        Box::new(move |outcome| {
            if let ForeignOutcome::Success(value) = outcome {
                tx.send(value).unwrap();
            }
        }),
    );

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 42);
    assert!(future.is_done());

    runtime.shutdown();
}

#[test]
fn test_bridged_failure_normalizes_closed_channel() {
    let runtime = RuntimeContext::spawn().unwrap();
    let engine = foreign_engine();

    let future = bridge_io_task(engine.handle(), async {
        Err::<(), Error>(Error::new(ErrorKind::ConnectionReset, "peer reset"))
    });

    let (tx, rx) = flume::unbounded();
    future.on_complete(
        runtime.context().dispatcher(),
        Box::new(move |outcome| {
            if let ForeignOutcome::Failed(err) = outcome {
                tx.send(err).unwrap();
            }
        }),
    );

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), RuntimeError::ClosedChannel);

    runtime.shutdown();
}

#[test]
fn test_double_fire_from_foreign_threads_delivers_once() {
    let runtime = RuntimeContext::spawn().unwrap();
    let engine = foreign_engine();

    let future: ForeignFuture<u32> = ForeignFuture::new();
    let (tx, rx) = flume::unbounded();
    future.on_complete(
        runtime.context().dispatcher(),
        Box::new(move |outcome| {
            tx.send(outcome.kind()).unwrap();
        }),
    );

    // A buggy foreign library may notify the same completion twice, from
    // different threads.
    for i in 0..2u32 {
        let notifier = future.clone();
        engine.spawn(async move {
            notifier.complete(ForeignOutcome::Success(i));
        });
    }

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), OutcomeKind::Success);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    runtime.shutdown();
}

#[test]
fn test_blocking_wait_off_owner_thread() {
    let engine = foreign_engine();

    let future = bridge_io_task(engine.handle(), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok::<&'static str, Error>("finished")
    });

    assert_eq!(future.wait_timeout(Duration::from_millis(1)), None);
    assert_eq!(future.wait(), OutcomeKind::Success);
    assert_eq!(
        future.wait_timeout(Duration::from_millis(1)),
        Some(OutcomeKind::Success)
    );
}

#[test]
fn test_cancelled_foreign_task_classified() {
    let runtime = RuntimeContext::spawn().unwrap();
    let engine = foreign_engine();

    let future = bridge_io_task(engine.handle(), async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<(), Error>(())
    });

    let (tx, rx) = flume::unbounded();
    future.on_complete(
        runtime.context().dispatcher(),
        Box::new(move |outcome| {
            tx.send(outcome.kind()).unwrap();
        }),
    );

    future.cancel();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), OutcomeKind::Cancelled);

    runtime.shutdown();
}
