/*!
 * Runtime Module
 * Per-context ownership of the selector, dispatcher, and open handles
 */

pub mod context;

pub use context::{RuntimeContext, RuntimeContextBuilder, SpawnedRuntime};
