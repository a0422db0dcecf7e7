/*!
 * Selector Module
 * Readiness multiplexing: per-context poll thread and descriptor registration
 */

pub mod poller;
pub mod registration;

pub use poller::{Readiness, ReadyCallback, Selector};
pub use registration::Registration;
