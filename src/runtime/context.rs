/*!
 * Runtime Context
 * Explicit per-context object owning the selector thread, dispatcher, and handle registry
 */

use crate::core::RuntimeResult;
use crate::dispatch::{owner_channel, Dispatcher, OwnerLoop};
use crate::handles::datagram::{DatagramHandle, MAX_RECV_BUFFER};
use crate::handles::registry::{Handle, HandleRegistry, RegistryStats};
use crate::net::NetworkPolicy;
use crate::selector::Selector;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// One runtime's worth of I/O infrastructure: the selector thread, the
/// owner-thread dispatcher, and the registry of open handles. Every handle
/// is constructed against exactly one context; nothing here is
/// process-global.
pub struct RuntimeContext {
    selector: Arc<Selector>,
    dispatcher: Dispatcher,
    registry: HandleRegistry,
    policy: Option<Arc<dyn NetworkPolicy>>,
    recv_ceiling: usize,
    shut_down: AtomicBool,
}

impl RuntimeContext {
    pub fn builder() -> RuntimeContextBuilder {
        RuntimeContextBuilder::default()
    }

    /// Create a context and hand back the owner loop for the embedder's
    /// interpreter thread to drain
    pub fn build() -> RuntimeResult<(Arc<Self>, OwnerLoop)> {
        Self::builder().build()
    }

    /// Create a context with a dedicated owner thread (tools and tests)
    pub fn spawn() -> RuntimeResult<SpawnedRuntime> {
        Self::builder().spawn()
    }

    /// Create a datagram handle owned by this context. The handle is
    /// tracked until closed.
    pub fn new_datagram_handle(self: &Arc<Self>) -> Arc<DatagramHandle> {
        let id = self.registry.allocate_id();
        let handle = DatagramHandle::new(
            id,
            self.dispatcher.clone(),
            Arc::clone(&self.selector),
            self.registry.clone(),
            self.policy.clone(),
            self.recv_ceiling,
        );
        self.registry.track(Handle::Datagram(Arc::clone(&handle)));
        handle
    }

    /// The marshaling point for completions bound for the owner thread
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn open_handles(&self) -> usize {
        self.registry.open_count()
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Close every open handle and stop the selector thread and owner
    /// loop. Idempotent. Pending queued writes fail with `ClosedChannel`;
    /// tasks dispatched afterwards are silently dropped.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Runtime context shutting down");
        self.registry.close_all();
        self.dispatcher.shutdown();
        self.selector.shutdown();
    }
}

/// Configuration for a runtime context
pub struct RuntimeContextBuilder {
    policy: Option<Arc<dyn NetworkPolicy>>,
    event_capacity: usize,
    recv_ceiling: usize,
}

impl Default for RuntimeContextBuilder {
    fn default() -> Self {
        Self {
            policy: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            recv_ceiling: MAX_RECV_BUFFER,
        }
    }
}

impl RuntimeContextBuilder {
    /// Install a network policy consulted before bind/send
    pub fn with_policy(mut self, policy: Arc<dyn NetworkPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Selector event batch capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Ceiling for per-handle receive scratch buffers
    pub fn with_recv_ceiling(mut self, ceiling: usize) -> Self {
        self.recv_ceiling = ceiling.max(1);
        self
    }

    /// Start the selector thread and hand back the context plus the owner
    /// loop for the embedder to drain on its interpreter thread
    pub fn build(self) -> RuntimeResult<(Arc<RuntimeContext>, OwnerLoop)> {
        let selector = Selector::spawn(self.event_capacity)?;
        let (dispatcher, owner) = owner_channel();
        let context = Arc::new(RuntimeContext {
            selector,
            dispatcher,
            registry: HandleRegistry::new(),
            policy: self.policy,
            recv_ceiling: self.recv_ceiling,
            shut_down: AtomicBool::new(false),
        });
        info!("Runtime context started");
        Ok((context, owner))
    }

    /// Like [`build`](Self::build), but with a dedicated owner thread
    pub fn spawn(self) -> RuntimeResult<SpawnedRuntime> {
        let (context, owner) = self.build()?;
        let thread = std::thread::Builder::new()
            .name("oarlock-owner".to_string())
            .spawn(move || owner.run())
            .map_err(|e| crate::core::RuntimeError::from_io(&e))?;
        Ok(SpawnedRuntime {
            context,
            owner: Some(thread),
        })
    }
}

/// A context whose owner loop runs on a dedicated thread. Dropping (or
/// calling [`shutdown`](Self::shutdown)) tears the whole runtime down and
/// joins both threads.
pub struct SpawnedRuntime {
    context: Arc<RuntimeContext>,
    owner: Option<JoinHandle<()>>,
}

impl SpawnedRuntime {
    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    /// Tear down the runtime: close handles, stop the owner loop and the
    /// selector thread, and join them
    pub fn shutdown(self) {
        // Teardown runs in Drop.
    }
}

impl Drop for SpawnedRuntime {
    fn drop(&mut self) {
        self.context.shutdown();
        if let Some(thread) = self.owner.take() {
            if thread.join().is_err() {
                warn!("Owner thread panicked during teardown");
            }
        }
    }
}
