/*!
 * Datagram Handle
 * Non-blocking UDP socket driven by selector readiness and completion callbacks
 */

use crate::core::{Completion, HandleId, ReadHandler, RuntimeError, RuntimeResult};
use crate::dispatch::Dispatcher;
use crate::handles::registry::HandleRegistry;
use crate::handles::write_queue::{QueuedWrite, WriteQueue};
use crate::net::NetworkPolicy;
use crate::selector::{Readiness, ReadyCallback, Registration, Selector};
use bytes::Bytes;
use log::{debug, info, trace, warn};
use mio::net::UdpSocket;
use mio::Interest;
use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::{Arc, Weak};

/// Actual UDP packets on the Internet are rarely gigantic.
pub const MAX_RECV_BUFFER: usize = 8192;

/// An immutable inbound packet: a freshly-copied payload plus the sender's
/// address. Owned by the read handler once delivered.
#[derive(Debug, Clone)]
pub struct ReceivedDatagram {
    buf: Bytes,
    address: SocketAddr,
}

impl ReceivedDatagram {
    pub(crate) fn new(buf: Bytes, address: SocketAddr) -> Self {
        Self { buf, address }
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buf
    }

    pub fn into_buffer(self) -> Bytes {
        self.buf
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

struct Inner {
    socket: Option<Arc<UdpSocket>>,
    registration: Option<Registration>,
    local_addr: Option<SocketAddr>,
    queue: WriteQueue,
    write_ready: bool,
    read_started: bool,
    read_handler: Option<ReadHandler<ReceivedDatagram>>,
    receive_buf: Option<Vec<u8>>,
    closed: bool,
}

/// One open non-blocking datagram socket.
///
/// All mutable state is touched only by owner-thread tasks: the selector
/// thread forwards readiness into the dispatcher instead of driving the
/// drains itself, and every completion handler fires on the owner thread.
/// The inner mutex is therefore uncontended; it exists so the handle can be
/// shared with the selector callback and with `close()` from cleanup paths.
pub struct DatagramHandle {
    id: HandleId,
    dispatcher: Dispatcher,
    selector: Arc<Selector>,
    registry: HandleRegistry,
    policy: Option<Arc<dyn NetworkPolicy>>,
    recv_ceiling: usize,
    inner: Mutex<Inner>,
}

impl DatagramHandle {
    pub(crate) fn new(
        id: HandleId,
        dispatcher: Dispatcher,
        selector: Arc<Selector>,
        registry: HandleRegistry,
        policy: Option<Arc<dyn NetworkPolicy>>,
        recv_ceiling: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            dispatcher,
            selector,
            registry,
            policy,
            recv_ceiling,
            inner: Mutex::new(Inner {
                socket: None,
                registration: None,
                local_addr: None,
                queue: WriteQueue::new(),
                // A fresh datagram socket is writable until a send proves
                // otherwise.
                write_ready: true,
                read_started: false,
                read_handler: None,
                receive_buf: None,
                closed: false,
            }),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Open the socket, optionally bind a specific local address, and
    /// install the selector registration with zero initial interest.
    ///
    /// The socket is committed to handle state only after every fallible
    /// step has succeeded; an early return drops it again, so a failed
    /// bind leaves no descriptor and no dangling registration behind.
    pub fn bind(self: &Arc<Self>, address: Option<&str>, port: u16) -> RuntimeResult<()> {
        let target = resolve_bind_addr(address, port)?;

        if let Some(policy) = &self.policy {
            if !policy.allow_listening(&target) {
                debug!("Address {} not allowed by network policy", target);
                return Err(RuntimeError::policy_violation(target.to_string()));
            }
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RuntimeError::ClosedChannel);
        }
        if inner.socket.is_some() {
            return Err(RuntimeError::io("handle is already bound"));
        }

        let socket = UdpSocket::bind(target).map_err(|e| {
            debug!("Error binding {}: {}", target, e);
            RuntimeError::from_io(&e)
        })?;
        let local = socket.local_addr().map_err(|e| RuntimeError::from_io(&e))?;

        let socket = Arc::new(socket);
        let registration = Registration::new(
            Arc::clone(&self.selector),
            socket.as_raw_fd(),
            self.ready_callback(),
        );

        inner.local_addr = Some(local);
        inner.registration = Some(registration);
        inner.socket = Some(socket);

        info!("Datagram handle {} bound to {}", self.id, local);
        Ok(())
    }

    /// OS-assigned local endpoint, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
    }

    /// Bytes currently sitting in the write backlog (diagnostics /
    /// backpressure signaling)
    pub fn queued_bytes(&self) -> usize {
        self.inner.lock().queue.queued_bytes()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Resolve `host:port` and send; see [`send`](Self::send)
    pub fn send_to(
        &self,
        host: &str,
        port: u16,
        buf: Bytes,
        handler: Completion<usize>,
    ) -> RuntimeResult<usize> {
        let dest = (host, port)
            .to_socket_addrs()
            .map_err(|e| RuntimeError::invalid_address(format!("{}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| RuntimeError::invalid_address(format!("{}:{}", host, port)))?;
        self.send(dest, buf, handler)
    }

    /// Queue one datagram for `dest`. Returns the number of bytes accepted
    /// into the operation (the full payload length).
    ///
    /// If the backlog is empty an immediate non-blocking send is attempted
    /// and, on full success, the handler fires through the owner-thread
    /// dispatcher. Otherwise the write joins the FIFO backlog and WRITE
    /// interest is registered; the payload must not be touched again until
    /// the handler fires.
    pub fn send(
        &self,
        dest: SocketAddr,
        buf: Bytes,
        handler: Completion<usize>,
    ) -> RuntimeResult<usize> {
        if let Some(policy) = &self.policy {
            if !policy.allow_connecting(&dest) {
                debug!("Address {} not allowed by network policy", dest);
                return Err(RuntimeError::policy_violation(dest.to_string()));
            }
        }

        let mut inner = self.inner.lock();
        if inner.closed || inner.socket.is_none() {
            return Err(RuntimeError::ClosedChannel);
        }

        let write = QueuedWrite::new(buf, Some(dest), handler);
        let accepted = write.length();
        self.offer_write(&mut inner, write);
        Ok(accepted)
    }

    fn offer_write(&self, inner: &mut Inner, mut write: QueuedWrite) {
        let immediate = inner.queue.is_empty() && inner.write_ready && !write.is_shutdown();
        if !immediate {
            self.queue_write(inner, write);
            return;
        }

        let (socket, dest) = match (inner.socket.as_ref(), write.address()) {
            (Some(socket), Some(dest)) => (Arc::clone(socket), dest),
            (None, _) => {
                write.complete(&self.dispatcher, Err(RuntimeError::ClosedChannel));
                return;
            }
            (_, None) => {
                write.complete(
                    &self.dispatcher,
                    Err(RuntimeError::invalid_address("send has no destination")),
                );
                return;
            }
        };

        match socket.send_to(write.remaining(), dest) {
            Ok(written) => {
                trace!(
                    "Wrote {} of {} bytes immediately to {}",
                    written,
                    write.length(),
                    dest
                );
                if written < write.remaining().len() {
                    write.advance(written);
                    inner.write_ready = false;
                    self.queue_write(inner, write);
                } else {
                    let total = write.length();
                    write.complete(&self.dispatcher, Ok(total));
                }
            }
            Err(e) => {
                // The immediate attempt failed before the completion
                // contract was armed; fall back to the queued path and let
                // the next drain surface any persistent failure.
                debug!("Immediate send to {} failed, queueing: {}", dest, e);
                self.queue_write(inner, write);
            }
        }
    }

    fn queue_write(&self, inner: &mut Inner, write: QueuedWrite) {
        inner.queue.push_back(write);
        if let Some(registration) = inner.registration.as_mut() {
            if let Err(e) = registration.add_interest(Interest::WRITABLE) {
                warn!("Failed to register write interest: {}", e);
            }
        }
    }

    /// Drain the write backlog; runs on the owner thread when the selector
    /// reports WRITE readiness.
    pub(crate) fn process_writes(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.write_ready = true;
        if let Some(registration) = inner.registration.as_mut() {
            if let Err(e) = registration.remove_interest(Interest::WRITABLE) {
                debug!("Error removing write interest: {}", e);
            }
        }

        let socket = match inner.socket.as_ref() {
            Some(socket) => Arc::clone(socket),
            // Closed underneath us; close() fails the backlog.
            None => return,
        };

        loop {
            let Some(mut write) = inner.queue.pop_front() else {
                break;
            };

            if write.is_shutdown() {
                write.complete(&self.dispatcher, Ok(0));
                continue;
            }
            let Some(dest) = write.address() else {
                write.complete(
                    &self.dispatcher,
                    Err(RuntimeError::invalid_address("queued write has no destination")),
                );
                continue;
            };

            match socket.send_to(write.remaining(), dest) {
                Ok(written) => {
                    trace!("Drained {} of {} bytes to {}", written, write.length(), dest);
                    if written < write.remaining().len() {
                        // Didn't write the whole thing -- keep it at the
                        // head and wait for the next readiness event.
                        write.advance(written);
                        inner.write_ready = false;
                        inner.queue.push_front(write);
                        if let Some(registration) = inner.registration.as_mut() {
                            if let Err(e) = registration.add_interest(Interest::WRITABLE) {
                                warn!("Failed to re-register write interest: {}", e);
                            }
                        }
                        break;
                    }
                    let total = write.length();
                    write.complete(&self.dispatcher, Ok(total));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Accepted nothing this cycle.
                    inner.write_ready = false;
                    inner.queue.push_front(write);
                    if let Some(registration) = inner.registration.as_mut() {
                        if let Err(e) = registration.add_interest(Interest::WRITABLE) {
                            warn!("Failed to re-register write interest: {}", e);
                        }
                    }
                    break;
                }
                Err(e) => {
                    let err = RuntimeError::from_io(&e);
                    if err.is_closed() {
                        debug!("Channel closed mid-drain");
                        write.complete(&self.dispatcher, Err(err));
                        // Remaining entries are failed on explicit close.
                        break;
                    }
                    debug!("Error on write to {}: {}", dest, e);
                    write.complete(&self.dispatcher, Err(err));
                    // One bad datagram must not stall the rest of the queue.
                }
            }
        }
    }

    /// Begin delivering inbound datagrams to `handler`. Idempotent: while
    /// reading is already started the handler installed first stays in
    /// place and this call is a no-op.
    pub fn start_reading_datagrams(
        &self,
        handler: ReadHandler<ReceivedDatagram>,
    ) -> RuntimeResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RuntimeError::ClosedChannel);
        }
        let Some(socket) = inner.socket.as_ref().map(Arc::clone) else {
            return Err(RuntimeError::ClosedChannel);
        };
        if inner.read_started {
            return Ok(());
        }

        inner.read_handler = Some(handler);
        if inner.receive_buf.is_none() {
            inner.receive_buf = Some(vec![0u8; self.recv_buffer_size(&socket)]);
        }
        if let Some(registration) = inner.registration.as_mut() {
            registration
                .add_interest(Interest::READABLE)
                .map_err(|e| RuntimeError::from_io(&e))?;
        }
        inner.read_started = true;
        trace!("Datagram handle {} started reading", self.id);
        Ok(())
    }

    /// Stop delivering datagrams. Idempotent; the handler reference is
    /// retained but will not fire again until reading restarts.
    pub fn stop_reading(&self) {
        let mut inner = self.inner.lock();
        if !inner.read_started {
            return;
        }
        if let Some(registration) = inner.registration.as_mut() {
            if let Err(e) = registration.remove_interest(Interest::READABLE) {
                debug!("Error removing read interest: {}", e);
            }
        }
        inner.read_started = false;
        trace!("Datagram handle {} stopped reading", self.id);
    }

    /// Drain every datagram the OS has buffered; runs on the owner thread
    /// when the selector reports READ readiness. Each packet is copied out
    /// of the scratch buffer into its own allocation so the scratch can be
    /// reused immediately.
    pub(crate) fn process_reads(self: &Arc<Self>) {
        let (socket, mut buf, mut handler) = {
            let mut inner = self.inner.lock();
            if !inner.read_started || inner.closed {
                return;
            }
            let Some(socket) = inner.socket.as_ref().map(Arc::clone) else {
                return;
            };
            let Some(handler) = inner.read_handler.take() else {
                return;
            };
            let buf = inner
                .receive_buf
                .take()
                .unwrap_or_else(|| vec![0u8; self.recv_buffer_size(&socket)]);
            (socket, buf, handler)
        };

        loop {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    trace!("Received {} bytes from {}", n, from);
                    let datagram = ReceivedDatagram::new(Bytes::copy_from_slice(&buf[..n]), from);
                    handler(Ok(datagram));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    // Transient; the selector will notify again if the
                    // socket stays readable.
                    debug!("Error reading from channel: {}", e);
                    break;
                }
            }
            // The handler may have stopped reading mid-loop.
            if !self.inner.lock().read_started {
                break;
            }
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if inner.receive_buf.is_none() {
            inner.receive_buf = Some(buf);
        }
        // A restart during delivery may have installed a fresh handler;
        // the older one is superseded.
        if inner.read_handler.is_none() {
            inner.read_handler = Some(handler);
        }
    }

    /// Close the handle: deregister from the selector, close the
    /// descriptor, and fail every pending queued write with
    /// `ClosedChannel`. Safe to call multiple times and from any thread;
    /// OS-level close errors are suppressed since the resource is gone
    /// either way.
    pub fn close(&self) {
        let (mut pending, had_socket) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.read_started = false;
            inner.read_handler = None;
            inner.receive_buf = None;
            if let Some(mut registration) = inner.registration.take() {
                registration.deregister();
            }
            let had_socket = inner.socket.take().is_some();
            (inner.queue.drain(), had_socket)
        };

        for write in pending.iter_mut() {
            write.complete(&self.dispatcher, Err(RuntimeError::ClosedChannel));
        }
        self.registry.untrack(self.id);
        if had_socket {
            info!("Datagram handle {} closed", self.id);
        }
    }

    pub fn set_broadcast(&self, on: bool) -> RuntimeResult<()> {
        self.with_socket(|socket| socket.set_broadcast(on))
    }

    pub fn set_multicast_ttl(&self, ttl: u32) -> RuntimeResult<()> {
        self.with_socket(|socket| socket.set_multicast_ttl_v4(ttl))
    }

    pub fn set_multicast_loopback(&self, on: bool) -> RuntimeResult<()> {
        self.with_socket(|socket| socket.set_multicast_loop_v4(on))
    }

    fn with_socket(&self, f: impl FnOnce(&UdpSocket) -> io::Result<()>) -> RuntimeResult<()> {
        let inner = self.inner.lock();
        let Some(socket) = inner.socket.as_ref() else {
            return Err(RuntimeError::ClosedChannel);
        };
        f(socket).map_err(map_option_error)
    }

    /// Scratch receive buffer size: the OS receive-buffer size capped at a
    /// fixed ceiling.
    fn recv_buffer_size(&self, socket: &UdpSocket) -> usize {
        // The fd is owned by `socket`, which outlives this borrow.
        let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
        nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::RcvBuf)
            .map(|v| v as usize)
            .unwrap_or(self.recv_ceiling)
            .min(self.recv_ceiling)
    }

    fn ready_callback(self: &Arc<Self>) -> ReadyCallback {
        let weak = Arc::downgrade(self);
        let dispatcher = self.dispatcher.clone();
        Arc::new(move |readiness: Readiness| {
            let weak = Weak::clone(&weak);
            dispatcher.dispatch(move || {
                if let Some(handle) = weak.upgrade() {
                    if readiness.writable {
                        handle.process_writes();
                    }
                    if readiness.readable {
                        handle.process_reads();
                    }
                }
            });
        })
    }
}

fn resolve_bind_addr(address: Option<&str>, port: u16) -> RuntimeResult<SocketAddr> {
    match address {
        None => Ok(SocketAddr::from(([0, 0, 0, 0], port))),
        Some(host) => (host, port)
            .to_socket_addrs()
            .map_err(|e| RuntimeError::invalid_address(format!("{}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| RuntimeError::invalid_address(format!("{}:{}", host, port))),
    }
}

/// `EAFNOSUPPORT`/`ENOPROTOOPT`-class failures mean the option does not
/// exist for this socket family on this platform, which callers handle
/// differently from an I/O failure.
fn map_option_error(e: io::Error) -> RuntimeError {
    match e.raw_os_error() {
        Some(code)
            if code == nix::libc::EAFNOSUPPORT
                || code == nix::libc::ENOPROTOOPT
                || code == nix::libc::EOPNOTSUPP =>
        {
            RuntimeError::unsupported(e.to_string())
        }
        _ if e.kind() == io::ErrorKind::Unsupported => RuntimeError::unsupported(e.to_string()),
        _ => RuntimeError::Io(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_bind_addr() {
        let addr = resolve_bind_addr(None, 0).unwrap();
        assert!(addr.ip().is_unspecified());

        let addr = resolve_bind_addr(Some("127.0.0.1"), 4100).unwrap();
        assert_eq!(addr.port(), 4100);

        assert!(matches!(
            resolve_bind_addr(Some(""), 0),
            Err(RuntimeError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_option_error_classification() {
        let err = map_option_error(io::Error::from_raw_os_error(nix::libc::ENOPROTOOPT));
        assert!(matches!(err, RuntimeError::Unsupported(_)));

        let err = map_option_error(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(matches!(err, RuntimeError::Io(_)));
    }
}
