/*!
 * Owner-Thread Dispatcher
 * Single marshaling point for completions from selector and foreign threads
 */

use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A unit of work to run on the owner thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Shutdown,
}

/// Sending half: enqueues tasks for the owner thread.
///
/// `dispatch` never blocks the caller and never executes the task inline on
/// the calling thread. Tasks dispatched from one source run in dispatch
/// order; tasks from different sources interleave only at whole-task
/// granularity. After the owner loop has torn down, dispatch is a silent
/// no-op.
#[derive(Clone)]
pub struct Dispatcher {
    tx: flume::Sender<Message>,
    live: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Enqueue a task for execution on the owner thread
    pub fn dispatch(&self, task: impl FnOnce() + Send + 'static) {
        if !self.live.load(Ordering::Acquire) {
            trace!("Dropping task dispatched after owner loop teardown");
            return;
        }
        // The receiver may have gone away between the check and the send;
        // a failed send is the same silent no-op.
        let _ = self.tx.send(Message::Run(Box::new(task)));
    }

    /// Stop the owner loop. Tasks still queued behind the stop marker are
    /// dropped, as are any dispatched afterwards.
    pub fn shutdown(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Message::Shutdown);
        }
    }

    /// Whether the owner loop is still accepting tasks
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// Receiving half: drained by the interpreter/owner thread.
pub struct OwnerLoop {
    rx: flume::Receiver<Message>,
    live: Arc<AtomicBool>,
}

impl OwnerLoop {
    /// Run tasks until shutdown is requested or every dispatcher is gone.
    /// This is the owner thread's main loop.
    pub fn run(self) {
        while let Ok(msg) = self.rx.recv() {
            match msg {
                Message::Run(task) => task(),
                Message::Shutdown => break,
            }
        }
        self.live.store(false, Ordering::Release);
    }

    /// Drain currently queued tasks without blocking. Returns the number of
    /// tasks executed. Intended for embedders that interleave script
    /// execution with task draining, and for tests.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                Message::Run(task) => {
                    task();
                    ran += 1;
                }
                Message::Shutdown => {
                    self.live.store(false, Ordering::Release);
                    break;
                }
            }
        }
        ran
    }
}

/// Create a connected dispatcher / owner-loop pair
pub fn owner_channel() -> (Dispatcher, OwnerLoop) {
    let (tx, rx) = flume::unbounded();
    let live = Arc::new(AtomicBool::new(true));
    (
        Dispatcher {
            tx,
            live: Arc::clone(&live),
        },
        OwnerLoop { rx, live },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_tasks_run_in_dispatch_order() {
        let (dispatcher, mut owner) = owner_channel();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..32 {
            let seen = Arc::clone(&seen);
            dispatcher.dispatch(move || seen.lock().unwrap().push(i));
        }

        assert_eq!(owner.run_until_idle(), 32);
        assert_eq!(*seen.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_dispatch_never_runs_inline() {
        let (dispatcher, mut owner) = owner_channel();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        dispatcher.dispatch(move || flag.store(true, Ordering::SeqCst));
        assert!(!ran.load(Ordering::SeqCst));

        owner.run_until_idle();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dispatch_after_shutdown_is_noop() {
        let (dispatcher, owner) = owner_channel();
        dispatcher.shutdown();
        owner.run();

        // Must neither panic nor execute
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        dispatcher.dispatch(move || flag.store(true, Ordering::SeqCst));
        assert!(!dispatcher.is_live());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_exits_when_dispatchers_drop() {
        let (dispatcher, owner) = owner_channel();
        let handle = std::thread::spawn(move || owner.run());
        drop(dispatcher);
        handle.join().unwrap();
    }
}
