/*!
 * Bridge Module
 * Adapts foreign async-engine completions into the runtime's handler contract
 */

pub mod future;

pub use future::{bridge_io_task, ForeignFuture, ForeignListener, ForeignOutcome, OutcomeKind};
