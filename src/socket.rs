//! The datagram primitive the pipelines send and receive on.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Longest a receive call may block before returning a timeout.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A bound datagram socket.
///
/// The pipelines never create sockets, they are handed one. `recv_from`
/// must return within a bounded time (an error of kind `WouldBlock` or
/// `TimedOut` on expiry) so the receive thread notices [`close`](Self::close).
pub trait DatagramSocket: Send + Sync {
    /// Send one datagram to `target`.
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram into `buf`.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Stop the socket. Later calls fail.
    fn close(&self);
}

/// [`DatagramSocket`] over a [`std::net::UdpSocket`].
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Wrap a bound socket, capping blocking reads at `poll_interval`.
    ///
    /// The interval is clamped to [`MAX_POLL_INTERVAL`].
    pub fn new(socket: UdpSocket, poll_interval: Duration) -> io::Result<Self> {
        let timeout = poll_interval.clamp(Duration::from_millis(1), MAX_POLL_INTERVAL);
        socket.set_read_timeout(Some(timeout))?;

        Ok(UdpTransport {
            socket,
            closed: AtomicBool::new(false),
        })
    }

    /// Bind a new socket on `addr`.
    pub fn bind(addr: SocketAddr, poll_interval: Duration) -> io::Result<Self> {
        UdpTransport::new(UdpSocket::bind(addr)?, poll_interval)
    }

    /// The local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        Ok(())
    }
}

impl DatagramSocket for UdpTransport {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.check_open()?;
        self.socket.send_to(buf, target)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.check_open()?;
        self.socket.recv_from(buf)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use super::*;

    fn local() -> SocketAddr {
        (Ipv4Addr::LOCALHOST, 0).into()
    }

    #[test]
    fn udp_send_and_receive() {
        let a = UdpTransport::bind(local(), Duration::from_millis(50)).unwrap();
        let b = UdpTransport::bind(local(), Duration::from_millis(50)).unwrap();

        a.send_to(&[1, 2, 3], b.local_addr().unwrap()).unwrap();

        let mut buf = [0; 16];
        let (n, from) = b.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[test]
    fn receive_times_out() {
        let a = UdpTransport::bind(local(), Duration::from_millis(10)).unwrap();
        let mut buf = [0; 16];
        let err = a.recv_from(&mut buf).unwrap_err();
        assert!(is_timeout(&err));
    }

    #[test]
    fn closed_socket_fails() {
        let a = UdpTransport::bind(local(), Duration::from_millis(10)).unwrap();
        a.close();
        let mut buf = [0; 16];
        let err = a.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(a.send_to(&[1], a.local_addr().unwrap()).is_err());
    }
}
