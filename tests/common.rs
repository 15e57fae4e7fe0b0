#![allow(unused)]
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use rtp_pipe::DatagramSocket;

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::new(10, 0, 0, 1), port))
}

/// Builds an RTP packet with the given numbering and payload.
pub fn rtp(seq: u16, ts: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    let mut v = vec![0x80, 96];
    v.extend_from_slice(&seq.to_be_bytes());
    v.extend_from_slice(&ts.to_be_bytes());
    v.extend_from_slice(&ssrc.to_be_bytes());
    v.extend_from_slice(payload);
    v
}

enum Inbound {
    Datagram(Vec<u8>, SocketAddr),
    Fail,
}

/// In-memory socket.
///
/// Sends are recorded with their time, or fail when told to. Received
/// datagrams are fed in through [`MockSocket::deliver`].
pub struct MockSocket {
    sent: Mutex<Vec<(Vec<u8>, SocketAddr, Instant)>>,
    fail_send: AtomicBool,
    inbound_tx: Mutex<Sender<Inbound>>,
    inbound_rx: Mutex<Receiver<Inbound>>,
    closed: AtomicBool,
    poll: Duration,
}

impl MockSocket {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel();
        Arc::new(MockSocket {
            sent: Mutex::new(vec![]),
            fail_send: AtomicBool::new(false),
            inbound_tx: Mutex::new(tx),
            inbound_rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
            poll: Duration::from_millis(20),
        })
    }

    pub fn failing() -> Arc<Self> {
        let s = MockSocket::new();
        s.set_fail_send(true);
        s
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn deliver(&self, data: &[u8], from: SocketAddr) {
        let _ = self
            .inbound_tx
            .lock()
            .unwrap()
            .send(Inbound::Datagram(data.to_vec(), from));
    }

    /// Make the next receive fail with a non-timeout error.
    pub fn fail_receive(&self) {
        let _ = self.inbound_tx.lock().unwrap().send(Inbound::Fail);
    }

    pub fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        let sent = self.sent.lock().unwrap();
        sent.iter().map(|(d, a, _)| (d.clone(), *a)).collect()
    }

    pub fn sent_times(&self) -> Vec<Instant> {
        let sent = self.sent.lock().unwrap();
        sent.iter().map(|(_, _, t)| *t).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until `n` datagrams were sent, or the timeout passes.
    pub fn wait_sent(&self, n: usize, timeout: Duration) -> bool {
        wait_for(timeout, || self.sent.lock().unwrap().len() >= n)
    }
}

impl DatagramSocket for MockSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "mock"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((buf.to_vec(), target, Instant::now()));
        Ok(buf.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::NotConnected.into());
        }

        let rx = self.inbound_rx.lock().unwrap();
        match rx.recv_timeout(self.poll) {
            Ok(Inbound::Datagram(data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, from))
            }
            Ok(Inbound::Fail) => Err(io::ErrorKind::ConnectionReset.into()),
            Err(RecvTimeoutError::Timeout) => Err(io::ErrorKind::WouldBlock.into()),
            Err(RecvTimeoutError::Disconnected) => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + timeout;
    while Instant::now() < until {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
