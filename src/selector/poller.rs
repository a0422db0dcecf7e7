/*!
 * Selector Thread
 * Owns the mio poll loop and routes readiness events to registered callbacks
 */

use ahash::RandomState;
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use log::{debug, error, trace, warn};
use mio::{Events, Poll, Token, Waker};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Token reserved for the shutdown waker
const WAKER_TOKEN: Token = Token(usize::MAX);

/// Readiness flags reported for one descriptor.
///
/// Peer-closed notifications are folded into the corresponding readiness
/// bit: a half-closed descriptor still needs one more drain to observe the
/// close at the syscall level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    fn from_event(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable() || event.is_write_closed(),
        }
    }
}

/// Plain closure invoked on the selector thread when a descriptor becomes
/// ready. Implementations must only forward the event (normally into the
/// owner-thread dispatcher), never touch handle state directly.
pub type ReadyCallback = Arc<dyn Fn(Readiness) + Send + Sync>;

/// Per-context readiness multiplexer.
///
/// One instance per runtime context; the poll loop runs on a dedicated
/// thread. Tokens are allocated from an atomic counter with a lock-free
/// free-list so long-lived contexts do not exhaust the token space.
pub struct Selector {
    registry: mio::Registry,
    callbacks: DashMap<usize, ReadyCallback, RandomState>,
    waker: Waker,
    next_token: AtomicUsize,
    free_tokens: SegQueue<usize>,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Selector {
    /// Create the poll instance and start the selector thread
    pub fn spawn(event_capacity: usize) -> io::Result<Arc<Self>> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        let selector = Arc::new(Self {
            registry,
            callbacks: DashMap::with_hasher(RandomState::new()),
            waker,
            next_token: AtomicUsize::new(0),
            free_tokens: SegQueue::new(),
            running: AtomicBool::new(true),
            thread: Mutex::new(None),
        });

        let this = Arc::clone(&selector);
        let handle = std::thread::Builder::new()
            .name("oarlock-selector".to_string())
            .spawn(move || this.poll_loop(poll, event_capacity))?;
        *selector.thread.lock() = Some(handle);

        debug!(
            "Selector thread started (event capacity {})",
            event_capacity
        );
        Ok(selector)
    }

    fn poll_loop(self: Arc<Self>, mut poll: Poll, event_capacity: usize) {
        let mut events = Events::with_capacity(event_capacity);

        while self.running.load(Ordering::Acquire) {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("Selector poll failed: {}", e);
                break;
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKER_TOKEN {
                    continue;
                }
                // Clone out of the map before invoking so a callback that
                // mutates registrations cannot deadlock against the shard.
                let callback = self
                    .callbacks
                    .get(&token.0)
                    .map(|entry| Arc::clone(entry.value()));
                match callback {
                    Some(callback) => callback(Readiness::from_event(event)),
                    None => trace!("Readiness for unregistered token {}", token.0),
                }
            }
        }
        debug!("Selector thread exiting");
    }

    /// Install a readiness callback and allocate its token (recycled when
    /// available, lock-free)
    pub(crate) fn register_callback(&self, callback: ReadyCallback) -> Token {
        let raw = self
            .free_tokens
            .pop()
            .unwrap_or_else(|| self.next_token.fetch_add(1, Ordering::SeqCst));
        self.callbacks.insert(raw, callback);
        trace!("Allocated selector token {}", raw);
        Token(raw)
    }

    /// Remove a callback and recycle its token (lock-free)
    pub(crate) fn remove_callback(&self, token: Token) {
        if self.callbacks.remove(&token.0).is_some() {
            self.free_tokens.push(token.0);
            trace!("Recycled selector token {}", token.0);
        }
    }

    /// The shared mio registry used for (re/de)registration
    pub(crate) fn registry(&self) -> &mio::Registry {
        &self.registry
    }

    /// Number of live descriptor registrations
    pub fn registered_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Stop and join the selector thread. Idempotent; must not be called
    /// from the selector thread itself.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake selector for shutdown: {}", e);
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("Selector thread panicked");
            }
        }
    }
}

