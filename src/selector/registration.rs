/*!
 * Selector Registration
 * One descriptor's registration with the readiness multiplexer
 */

use super::poller::{ReadyCallback, Selector};
use log::debug;
use mio::unix::SourceFd;
use mio::{Interest, Token};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Associates one non-blocking descriptor with the selector and tracks its
/// current interest set.
///
/// A freshly created registration has zero interest: the callback is
/// installed but the descriptor is not yet armed with the OS poller (mio
/// cannot express an empty interest set, so the first `add_interest`
/// performs the actual registration and removing the last interest
/// deregisters). `add_interest` and `remove_interest` are idempotent:
/// adding a present flag or removing an absent one is a no-op, not an
/// error.
pub struct Registration {
    selector: Arc<Selector>,
    token: Token,
    fd: RawFd,
    interests: Option<Interest>,
}

impl Registration {
    /// Install `callback` for this descriptor and allocate a token.
    /// No interest is registered yet.
    pub fn new(selector: Arc<Selector>, fd: RawFd, callback: ReadyCallback) -> Self {
        let token = selector.register_callback(callback);
        Self {
            selector,
            token,
            fd,
            interests: None,
        }
    }

    /// Current interest set (`None` while unarmed)
    pub fn interests(&self) -> Option<Interest> {
        self.interests
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Add an interest flag; no-op if already present
    pub fn add_interest(&mut self, interest: Interest) -> io::Result<()> {
        match self.interests {
            Some(current) if (current | interest) == current => Ok(()),
            Some(current) => {
                let merged = current | interest;
                self.selector
                    .registry()
                    .reregister(&mut SourceFd(&self.fd), self.token, merged)?;
                self.interests = Some(merged);
                Ok(())
            }
            None => {
                self.selector
                    .registry()
                    .register(&mut SourceFd(&self.fd), self.token, interest)?;
                self.interests = Some(interest);
                Ok(())
            }
        }
    }

    /// Remove an interest flag; no-op if absent. Removing the last flag
    /// deregisters the descriptor from the OS poller.
    pub fn remove_interest(&mut self, interest: Interest) -> io::Result<()> {
        let Some(current) = self.interests else {
            return Ok(());
        };
        match current.remove(interest) {
            Some(remaining) if remaining == current => Ok(()),
            Some(remaining) => {
                self.selector
                    .registry()
                    .reregister(&mut SourceFd(&self.fd), self.token, remaining)?;
                self.interests = Some(remaining);
                Ok(())
            }
            None => {
                self.selector
                    .registry()
                    .deregister(&mut SourceFd(&self.fd))?;
                self.interests = None;
                Ok(())
            }
        }
    }

    /// Drop any registered interest. Errors are logged and suppressed:
    /// cleanup proceeds unconditionally and the descriptor may already be
    /// closed underneath us.
    pub fn deregister(&mut self) {
        if self.interests.take().is_some() {
            if let Err(e) = self.selector.registry().deregister(&mut SourceFd(&self.fd)) {
                debug!("Error deregistering fd {}: {}", self.fd, e);
            }
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.deregister();
        self.selector.remove_callback(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn test_socket() -> std::net::UdpSocket {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        socket
    }

    fn noop_callback() -> ReadyCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn test_add_interest_is_idempotent() {
        let selector = Selector::spawn(8).unwrap();
        let socket = test_socket();
        let mut reg = Registration::new(Arc::clone(&selector), socket.as_raw_fd(), noop_callback());

        assert_eq!(reg.interests(), None);
        reg.add_interest(Interest::READABLE).unwrap();
        reg.add_interest(Interest::READABLE).unwrap();
        assert_eq!(reg.interests(), Some(Interest::READABLE));

        reg.add_interest(Interest::WRITABLE).unwrap();
        assert_eq!(
            reg.interests(),
            Some(Interest::READABLE | Interest::WRITABLE)
        );

        drop(reg);
        selector.shutdown();
    }

    #[test]
    fn test_remove_interest_is_idempotent() {
        let selector = Selector::spawn(8).unwrap();
        let socket = test_socket();
        let mut reg = Registration::new(Arc::clone(&selector), socket.as_raw_fd(), noop_callback());

        // Removing from an unarmed registration is a no-op
        reg.remove_interest(Interest::WRITABLE).unwrap();

        reg.add_interest(Interest::READABLE | Interest::WRITABLE)
            .unwrap();
        reg.remove_interest(Interest::WRITABLE).unwrap();
        assert_eq!(reg.interests(), Some(Interest::READABLE));
        reg.remove_interest(Interest::WRITABLE).unwrap();
        assert_eq!(reg.interests(), Some(Interest::READABLE));

        // Removing the last flag deregisters entirely
        reg.remove_interest(Interest::READABLE).unwrap();
        assert_eq!(reg.interests(), None);
        reg.remove_interest(Interest::READABLE).unwrap();

        // And the descriptor can be re-armed afterwards
        reg.add_interest(Interest::READABLE).unwrap();
        assert_eq!(reg.interests(), Some(Interest::READABLE));

        drop(reg);
        selector.shutdown();
    }

    #[test]
    fn test_tokens_recycled_across_registrations() {
        let selector = Selector::spawn(8).unwrap();
        let socket = test_socket();

        let first = {
            let reg =
                Registration::new(Arc::clone(&selector), socket.as_raw_fd(), noop_callback());
            reg.token()
        };
        let reg = Registration::new(Arc::clone(&selector), socket.as_raw_fd(), noop_callback());
        assert_eq!(reg.token(), first);

        drop(reg);
        selector.shutdown();
    }
}
