/*!
 * Dispatch Module
 * Owner-thread task marshaling for completion delivery
 */

pub mod dispatcher;

pub use dispatcher::{owner_channel, Dispatcher, OwnerLoop, Task};
