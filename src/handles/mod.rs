/*!
 * Handles Module
 * Async I/O handles: write queueing, the datagram instance, and open-handle tracking
 */

pub mod datagram;
pub mod registry;
pub mod write_queue;

// Re-export for convenience
pub use datagram::{DatagramHandle, ReceivedDatagram, MAX_RECV_BUFFER};
pub use registry::{Handle, HandleRegistry, RegistryStats};
pub use write_queue::{QueuedWrite, WriteQueue};
