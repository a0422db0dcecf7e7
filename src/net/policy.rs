/*!
 * Network Policy
 * Embedder hook that can veto listening and outbound destinations
 */

use std::net::SocketAddr;

/// Consulted before any bind or send to an externally-controlled address.
/// A `false` result surfaces as `RuntimeError::PolicyViolation` before the
/// operation touches the socket.
pub trait NetworkPolicy: Send + Sync {
    /// May the runtime bind/listen on this local address?
    fn allow_listening(&self, _addr: &SocketAddr) -> bool {
        true
    }

    /// May the runtime send/connect to this remote address?
    fn allow_connecting(&self, _addr: &SocketAddr) -> bool {
        true
    }
}

/// Default policy: everything is permitted
pub struct AllowAll;

impl NetworkPolicy for AllowAll {}
