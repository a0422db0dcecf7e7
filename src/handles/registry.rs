/*!
 * Handle Registry
 * Per-context tracking of open handles for cleanup and diagnostics
 */

use crate::core::HandleId;
use crate::handles::datagram::DatagramHandle;
use ahash::RandomState;
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use log::{info, trace};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Closed set of handle variants owned by a runtime context.
///
/// The variant tag is the handle kind; readiness routing goes through the
/// per-registration closure, so this enum only needs the shared
/// identify/close capabilities.
#[derive(Clone)]
pub enum Handle {
    Datagram(Arc<DatagramHandle>),
}

impl Handle {
    pub fn id(&self) -> HandleId {
        match self {
            Handle::Datagram(handle) => handle.id(),
        }
    }

    /// Handle kind name for logging
    pub fn kind_name(&self) -> &'static str {
        match self {
            Handle::Datagram(_) => "Datagram",
        }
    }

    pub fn close(&self) {
        match self {
            Handle::Datagram(handle) => handle.close(),
        }
    }
}

/// Registry of open handles for one runtime context.
///
/// Ids are allocated from an atomic counter with a lock-free free-list so
/// long-lived contexts do not exhaust the id space. Cheap to clone; clones
/// share storage.
pub struct HandleRegistry {
    next_id: Arc<AtomicU64>,
    handles: Arc<DashMap<HandleId, Handle, RandomState>>,
    free_ids: Arc<SegQueue<HandleId>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            handles: Arc::new(DashMap::with_hasher(RandomState::new())),
            free_ids: Arc::new(SegQueue::new()),
        }
    }

    /// Allocate a handle id (recycled when available, lock-free)
    pub fn allocate_id(&self) -> HandleId {
        if let Some(recycled) = self.free_ids.pop() {
            trace!("Recycled handle id {}", recycled);
            recycled
        } else {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        }
    }

    /// Record an open handle
    pub fn track(&self, handle: Handle) {
        trace!("Tracking {} handle {}", handle.kind_name(), handle.id());
        self.handles.insert(handle.id(), handle);
    }

    /// Remove a handle and recycle its id (no-op if already removed)
    pub fn untrack(&self, id: HandleId) {
        if self.handles.remove(&id).is_some() {
            self.free_ids.push(id);
            trace!("Untracked handle {}", id);
        }
    }

    pub fn get(&self, id: HandleId) -> Option<Handle> {
        self.handles.get(&id).map(|entry| entry.value().clone())
    }

    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    /// Close every tracked handle (context shutdown). Returns the number
    /// of handles closed.
    pub fn close_all(&self) -> usize {
        let snapshot: Vec<Handle> = self
            .handles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let count = snapshot.len();
        for handle in snapshot {
            handle.close();
        }
        if count > 0 {
            info!("Closed {} open handles", count);
        }
        count
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        let mut datagram_handles = 0;
        for entry in self.handles.iter() {
            match entry.value() {
                Handle::Datagram(_) => datagram_handles += 1,
            }
        }
        RegistryStats {
            open_handles: self.handles.len(),
            datagram_handles,
            recycled_ids_available: self.free_ids.len(),
        }
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for HandleRegistry {
    fn clone(&self) -> Self {
        Self {
            next_id: Arc::clone(&self.next_id),
            handles: Arc::clone(&self.handles),
            free_ids: Arc::clone(&self.free_ids),
        }
    }
}

/// Registry statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub open_handles: usize,
    pub datagram_handles: usize,
    pub recycled_ids_available: usize,
}
