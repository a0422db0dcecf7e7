/*!
 * Write Queue
 * Ordered pending-write backlog with byte accounting and partial-write resumption
 */

use crate::core::{Completion, RuntimeResult};
use crate::dispatch::Dispatcher;
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::net::SocketAddr;

/// One pending outbound operation.
///
/// The payload is transferred into the queue at enqueue time and consumed
/// incrementally; the recorded `length` stays at the total so byte
/// accounting and the completion value are stable across partial writes.
pub struct QueuedWrite {
    buf: Bytes,
    address: Option<SocketAddr>,
    handler: Option<Completion<usize>>,
    length: usize,
    shutdown: bool,
}

impl QueuedWrite {
    pub fn new(buf: Bytes, address: Option<SocketAddr>, handler: Completion<usize>) -> Self {
        let length = buf.len();
        Self {
            buf,
            address,
            handler: Some(handler),
            length,
            shutdown: false,
        }
    }

    /// Marker entry meaning "no more data after this". Stream-family
    /// handles enqueue one before half-closing; it carries no payload.
    pub fn shutdown_marker(handler: Completion<usize>) -> Self {
        Self {
            buf: Bytes::new(),
            address: None,
            handler: Some(handler),
            length: 0,
            shutdown: true,
        }
    }

    /// Total length recorded at enqueue time
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Bytes not yet accepted by the OS
    pub fn remaining(&self) -> &[u8] {
        &self.buf
    }

    pub fn has_remaining(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Record that the OS accepted `n` bytes
    pub fn advance(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// Fire this write's completion handler on the owner thread.
    /// Subsequent calls are no-ops; the handler fires at most once.
    pub fn complete(&mut self, dispatcher: &Dispatcher, result: RuntimeResult<usize>) {
        if let Some(handler) = self.handler.take() {
            dispatcher.dispatch(move || handler(result));
        }
    }
}

/// FIFO backlog of pending writes for one handle.
///
/// `queued_bytes` is diagnostics/backpressure signaling only; ordering
/// correctness comes from FIFO draining. Every dequeue decrements by
/// exactly the length recorded at enqueue, so the total returns to zero
/// once the queue fully drains.
#[derive(Default)]
pub struct WriteQueue {
    entries: VecDeque<QueuedWrite>,
    queued_bytes: usize,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, write: QueuedWrite) {
        self.queued_bytes += write.length;
        self.entries.push_back(write);
    }

    /// Put a partially-written entry back at the head, preserving order
    pub fn push_front(&mut self, write: QueuedWrite) {
        self.queued_bytes += write.length;
        self.entries.push_front(write);
    }

    pub fn pop_front(&mut self) -> Option<QueuedWrite> {
        let write = self.entries.pop_front()?;
        debug_assert!(self.queued_bytes >= write.length);
        self.queued_bytes = self.queued_bytes.saturating_sub(write.length);
        Some(write)
    }

    /// Remove every pending entry (close path); accounting resets to zero
    pub fn drain(&mut self) -> Vec<QueuedWrite> {
        self.queued_bytes = 0;
        self.entries.drain(..).collect()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
