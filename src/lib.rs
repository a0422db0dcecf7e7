/*!
 * Oarlock Runtime Library
 * Asynchronous I/O handles and completion bridging for a single-threaded
 * event-driven scripting runtime
 */

pub mod bridge;
pub mod core;
pub mod dispatch;
pub mod handles;
pub mod net;
pub mod runtime;
pub mod selector;

// Re-exports
pub use crate::core::{Completion, HandleId, ReadHandler, RuntimeError, RuntimeResult};
pub use bridge::{bridge_io_task, ForeignFuture, ForeignOutcome, OutcomeKind};
pub use dispatch::{Dispatcher, OwnerLoop};
pub use handles::{DatagramHandle, HandleRegistry, ReceivedDatagram, MAX_RECV_BUFFER};
pub use net::{AllowAll, NetworkPolicy};
pub use runtime::{RuntimeContext, RuntimeContextBuilder, SpawnedRuntime};
