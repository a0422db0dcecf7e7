/*!
 * Net Module
 * Network policy seam consulted before bind/connect/send
 */

pub mod policy;

pub use policy::{AllowAll, NetworkPolicy};
