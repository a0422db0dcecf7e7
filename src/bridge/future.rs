/*!
 * Foreign-Future Adapter
 * Exactly-once bridging of a foreign engine's completion into owner-thread delivery
 */

use crate::core::RuntimeError;
use crate::dispatch::Dispatcher;
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Final outcome of one foreign asynchronous operation
pub enum ForeignOutcome<T> {
    Success(T),
    Failed(RuntimeError),
    Cancelled,
}

impl<T> ForeignOutcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ForeignOutcome::Success(_) => OutcomeKind::Success,
            ForeignOutcome::Failed(_) => OutcomeKind::Failed,
            ForeignOutcome::Cancelled => OutcomeKind::Cancelled,
        }
    }
}

/// Payload-free outcome summary, kept for blocking accessors after the
/// payload itself has been handed to the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Failed,
    Cancelled,
}

impl OutcomeKind {
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Success)
    }
}

/// Runtime-side listener for one foreign operation; invoked at most once,
/// on the owner thread
pub type ForeignListener<T> = Box<dyn FnOnce(ForeignOutcome<T>) + Send>;

struct State<T> {
    /// Outcome parked here until a listener claims it
    outcome: Option<ForeignOutcome<T>>,
    listener: Option<(Dispatcher, ForeignListener<T>)>,
    kind: Option<OutcomeKind>,
}

struct Shared<T> {
    completed: AtomicBool,
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// Bridges one foreign asynchronous operation into the runtime's
/// completion-handler contract.
///
/// `complete` may be invoked from any foreign thread and, thanks to
/// foreign-library quirks, more than once; only the first transition from
/// pending to completed counts, so the runtime-side listener observes at
/// most one delivery. Delivery is marshaled through the owner-thread
/// dispatcher like every other completion in the system.
pub struct ForeignFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ForeignFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> ForeignFuture<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                completed: AtomicBool::new(false),
                state: Mutex::new(State {
                    outcome: None,
                    listener: None,
                    kind: None,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Record the foreign outcome. Returns `true` if this call won the
    /// pending-to-completed edge; redundant notifications are coalesced
    /// into no-ops.
    pub fn complete(&self, outcome: ForeignOutcome<T>) -> bool {
        if self
            .shared
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Coalesced redundant foreign completion");
            return false;
        }

        let mut state = self.shared.state.lock();
        state.kind = Some(outcome.kind());
        if let Some((dispatcher, listener)) = state.listener.take() {
            dispatcher.dispatch(move || listener(outcome));
        } else {
            state.outcome = Some(outcome);
        }
        self.shared.cond.notify_all();
        true
    }

    /// Classify and record a fallible I/O outcome. Closed-channel-class
    /// errors normalize into the same `ClosedChannel` taxonomy the native
    /// selector path uses.
    pub fn complete_io(&self, result: Result<T, std::io::Error>) -> bool {
        match result {
            Ok(value) => self.complete(ForeignOutcome::Success(value)),
            Err(e) => self.complete(ForeignOutcome::Failed(RuntimeError::from_io(&e))),
        }
    }

    /// Best-effort local cancellation; a no-op if the operation already
    /// completed
    pub fn cancel(&self) -> bool {
        self.complete(ForeignOutcome::Cancelled)
    }

    pub fn is_done(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Register the runtime-side listener. If the foreign operation has
    /// already completed, delivery happens now (still via the dispatcher).
    /// Re-registering before delivery replaces the previous listener.
    pub fn on_complete(&self, dispatcher: &Dispatcher, listener: ForeignListener<T>) {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = state.outcome.take() {
            dispatcher.dispatch(move || listener(outcome));
            return;
        }
        if state.listener.is_some() {
            debug!("Replacing foreign-future listener before completion");
        }
        state.listener = Some((dispatcher.clone(), listener));
    }

    /// Block until the foreign operation completes and return the outcome
    /// summary.
    ///
    /// Must never be called from the owner thread: the listener delivery
    /// runs there, so waiting on it from that thread deadlocks. This is a
    /// usage contract, not internally enforced.
    pub fn wait(&self) -> OutcomeKind {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(kind) = state.kind {
                return kind;
            }
            self.shared.cond.wait(&mut state);
        }
    }

    /// Like [`wait`](Self::wait), bounded by `timeout`. Returns `None` if
    /// the operation is still pending when the timeout elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<OutcomeKind> {
        let mut state = self.shared.state.lock();
        if state.kind.is_none() {
            self.shared.cond.wait_for(&mut state, timeout);
        }
        state.kind
    }
}

impl<T: Send + 'static> Default for ForeignFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a fallible I/O future on the foreign engine and wire its
/// completion (including cancellation of the spawned task) into a
/// [`ForeignFuture`].
pub fn bridge_io_task<T, F>(runtime: &tokio::runtime::Handle, future: F) -> ForeignFuture<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, std::io::Error>> + Send + 'static,
{
    let bridge = ForeignFuture::new();
    let completer = bridge.clone();
    let join = runtime.spawn(future);
    runtime.spawn(async move {
        match join.await {
            Ok(result) => {
                completer.complete_io(result);
            }
            Err(e) if e.is_cancelled() => {
                completer.complete(ForeignOutcome::Cancelled);
            }
            Err(e) => {
                completer.complete(ForeignOutcome::Failed(RuntimeError::io(e.to_string())));
            }
        }
    });
    bridge
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::owner_channel;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_double_fire_delivers_once() {
        let (dispatcher, mut owner) = owner_channel();
        let future: ForeignFuture<u32> = ForeignFuture::new();
        let (tx, rx) = flume::unbounded();

        future.on_complete(
            &dispatcher,
            Box::new(move |outcome| {
                tx.send(outcome.kind()).unwrap();
            }),
        );

        assert!(future.complete(ForeignOutcome::Success(7)));
        assert!(!future.complete(ForeignOutcome::Success(8)));
        assert!(!future.cancel());

        owner.run_until_idle();
        assert_eq!(rx.try_recv().unwrap(), OutcomeKind::Success);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_listener_after_completion_still_fires() {
        let (dispatcher, mut owner) = owner_channel();
        let future: ForeignFuture<&'static str> = ForeignFuture::new();
        future.complete(ForeignOutcome::Success("done"));
        assert!(future.is_done());

        let (tx, rx) = flume::unbounded();
        future.on_complete(
            &dispatcher,
            Box::new(move |outcome| {
                if let ForeignOutcome::Success(value) = outcome {
                    tx.send(value).unwrap();
                }
            }),
        );

        owner.run_until_idle();
        assert_eq!(rx.try_recv().unwrap(), "done");
    }

    #[test]
    fn test_closed_channel_normalization() {
        let (dispatcher, mut owner) = owner_channel();
        let future: ForeignFuture<()> = ForeignFuture::new();
        let (tx, rx) = flume::unbounded();

        future.on_complete(
            &dispatcher,
            Box::new(move |outcome| {
                if let ForeignOutcome::Failed(err) = outcome {
                    tx.send(err).unwrap();
                }
            }),
        );
        future.complete_io(Err(Error::new(ErrorKind::BrokenPipe, "peer gone")));

        owner.run_until_idle();
        assert_eq!(rx.try_recv().unwrap(), RuntimeError::ClosedChannel);
    }

    #[test]
    fn test_blocking_wait() {
        let future: ForeignFuture<u8> = ForeignFuture::new();
        assert_eq!(future.wait_timeout(Duration::from_millis(10)), None);

        let completer = future.clone();
        let handle = std::thread::spawn(move || {
            completer.complete(ForeignOutcome::Success(1));
        });
        assert_eq!(future.wait(), OutcomeKind::Success);
        handle.join().unwrap();

        // Post-completion waits return immediately
        assert_eq!(
            future.wait_timeout(Duration::from_millis(1)),
            Some(OutcomeKind::Success)
        );
    }

    #[test]
    fn test_cancel_classification() {
        let future: ForeignFuture<u8> = ForeignFuture::new();
        assert!(future.cancel());
        assert_eq!(future.wait(), OutcomeKind::Cancelled);
    }
}
