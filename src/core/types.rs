/*!
 * Core Types
 * Common types used across the runtime
 */

/// Handle identifier type
pub type HandleId = u64;

/// Common result type for runtime operations
pub type RuntimeResult<T> = Result<T, super::errors::RuntimeError>;

/// One-shot completion handler for a single asynchronous operation.
///
/// Invoked exactly once per logical operation, always on the owner thread.
/// The `Result` carries both the payload and the error-kind channel, so no
/// unwinding ever crosses the dispatch boundary.
pub type Completion<T> = Box<dyn FnOnce(RuntimeResult<T>) + Send>;

/// Repeated-delivery handler for inbound datagrams.
///
/// Invoked once per received datagram, always on the owner thread, only
/// while reading is enabled on the handle.
pub type ReadHandler<T> = Box<dyn FnMut(RuntimeResult<T>) + Send>;
