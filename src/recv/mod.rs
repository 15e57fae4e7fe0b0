//! Receiving packets on a dedicated thread.
//!
//! The receive thread filters raw datagrams, copies accepted ones into pooled
//! packets and keeps only the most recent one for the consumer. A consumer
//! that falls behind misses packets rather than building up latency.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::ReceiveConfig;
use crate::packet::PacketView;
use crate::pool::PacketPool;
use crate::socket::{is_timeout, DatagramSocket};
use crate::util::is_log_sample;

mod filter;
pub use filter::{DatagramFilter, LogSampler, SourceFilter, VersionFilter};

mod slot;
use slot::LatestSlot;

/// Errors from reading a [`ReceivePipeline`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecvError {
    /// The pipeline is closed or its socket failed, and nothing is pending.
    #[error("End of stream")]
    EndOfStream,

    /// The caller's buffer can't hold the pending packet.
    #[error("Buffer of {buffer} bytes too small for packet of {packet} bytes")]
    BufferTooSmall {
        /// Length of the pending packet.
        packet: usize,
        /// Length of the caller's buffer.
        buffer: usize,
    },
}

/// Counters of a [`ReceivePipeline`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Packets accepted and handed to the consumer.
    pub received: u64,
    /// Datagrams rejected by a filter or because the pipeline was disabled.
    pub rejected: u64,
    /// Accepted datagrams too malformed to be packets.
    pub invalid: u64,
    /// Unread packets replaced by a newer one.
    pub overwritten: u64,
}

/// Called on the receive thread after each new packet.
pub type Consumer = Box<dyn FnMut() + Send>;

struct Shared {
    pool: Arc<PacketPool>,
    filters: Vec<Box<dyn DatagramFilter>>,
    slot: LatestSlot,
    consumer: Mutex<Option<Consumer>>,
    enabled: AtomicBool,
    closed: AtomicBool,
    errored: AtomicBool,
    received: AtomicU64,
    rejected: AtomicU64,
    invalid: AtomicU64,
}

impl Shared {
    fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        if !self.enabled.load(Ordering::Relaxed) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if !self.filters.iter().all(|f| f.accept(data, from)) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut packet = self.pool.checkout(data.len());
        packet.set_data(data);

        if packet.is_invalid() {
            let n = self.invalid.fetch_add(1, Ordering::Relaxed) + 1;
            trace!("Drop invalid packet of {} bytes from {}", data.len(), from);
            if is_log_sample(n) {
                debug!("Dropped {} invalid packets", n);
            }
            self.pool.return_(packet);
            return;
        }

        self.received.fetch_add(1, Ordering::Relaxed);

        if let Some(old) = self.slot.store(packet) {
            self.pool.return_(old);
        }

        if let Some(consumer) = self.consumer.lock().as_mut() {
            consumer();
        }
    }

    fn is_ended(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.errored.load(Ordering::Acquire)
    }
}

/// Receives packets from a socket on a dedicated thread.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// use rtp_pipe::{DatagramFilter, PacketPool, ReceiveConfig, ReceivePipeline};
/// use rtp_pipe::{UdpTransport, VersionFilter};
///
/// let socket = UdpTransport::bind("0.0.0.0:5004".parse().unwrap(), Duration::from_millis(100))?;
/// let filters: Vec<Box<dyn DatagramFilter>> = vec![Box::new(VersionFilter)];
///
/// let recv = ReceivePipeline::new(
///     Some(Arc::new(socket)),
///     Arc::new(PacketPool::default()),
///     filters,
///     ReceiveConfig::new(),
/// );
///
/// let mut buf = [0; 1500];
/// let n = recv.read(&mut buf)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ReceivePipeline {
    shared: Arc<Shared>,
    socket: Option<Arc<dyn DatagramSocket>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReceivePipeline {
    /// Start receiving on `socket`, running each datagram through `filters`
    /// in order.
    ///
    /// Without a socket the pipeline starts out closed. Panics on an invalid
    /// config.
    pub fn new(
        socket: Option<Arc<dyn DatagramSocket>>,
        pool: Arc<PacketPool>,
        filters: Vec<Box<dyn DatagramFilter>>,
        config: ReceiveConfig,
    ) -> Self {
        config.validate();

        let shared = Arc::new(Shared {
            pool,
            filters,
            slot: LatestSlot::default(),
            consumer: Mutex::new(None),
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(socket.is_none()),
            errored: AtomicBool::new(false),
            received: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
        });

        let handle = socket.as_ref().and_then(|socket| {
            let shared = shared.clone();
            let socket = socket.clone();
            let size = config.recv_buffer_size();

            let spawned = thread::Builder::new()
                .name("rtp-recv".into())
                .spawn(move || run(shared, socket, size));

            match spawned {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Failed to start receive thread: {:?}", e);
                    None
                }
            }
        });

        if socket.is_some() && handle.is_none() {
            shared.errored.store(true, Ordering::Release);
        }

        ReceivePipeline {
            shared,
            socket,
            handle: Mutex::new(handle),
        }
    }

    /// Register the callback told about each new packet.
    ///
    /// The callback runs on the receive thread and must not call
    /// `set_consumer` itself.
    pub fn set_consumer(&self, consumer: Consumer) {
        *self.shared.consumer.lock() = Some(consumer);
    }

    /// Copy the pending packet into `buf` and recycle it.
    ///
    /// Returns 0 when nothing is pending. A packet that doesn't fit is left
    /// pending. Once the pipeline is closed or its socket failed, the last
    /// pending packet can still be read, after which this returns
    /// [`RecvError::EndOfStream`].
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, RecvError> {
        let packet = match self.shared.slot.take_fitting(buf.len()) {
            Ok(Some(v)) => v,
            Ok(None) if self.shared.is_ended() => return Err(RecvError::EndOfStream),
            Ok(None) => return Ok(0),
            Err(len) => {
                return Err(RecvError::BufferTooSmall {
                    packet: len,
                    buffer: buf.len(),
                })
            }
        };

        let n = packet.len();
        buf[..n].copy_from_slice(packet.as_slice());
        self.shared.pool.return_(packet);

        Ok(n)
    }

    /// Take ownership of the pending packet.
    ///
    /// The caller should hand it back with [`PacketPool::return_`] when done.
    pub fn take(&self) -> Option<PacketView> {
        self.shared.slot.take()
    }

    /// Toggle receiving. While disabled, every datagram is rejected.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether receiving is enabled.
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Relaxed)
    }

    /// Whether the pipeline is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Whether the socket failed, ending the stream.
    pub fn is_errored(&self) -> bool {
        self.shared.errored.load(Ordering::Acquire)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ReceiveStats {
        ReceiveStats {
            received: self.shared.received.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            invalid: self.shared.invalid.load(Ordering::Relaxed),
            overwritten: self.shared.slot.overwritten(),
        }
    }

    /// Close the socket and stop the receive thread. Closing twice does nothing.
    ///
    /// May be called from any thread, including the consumer callback.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Close receive pipeline");

        if let Some(socket) = &self.socket {
            socket.close();
        }

        let Some(handle) = self.handle.lock().take() else {
            return;
        };

        // Joining from the receive thread would never return.
        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            warn!("Receive thread panicked");
        }
    }
}

impl Drop for ReceivePipeline {
    fn drop(&mut self) {
        self.close();
        if let Some(packet) = self.shared.slot.take() {
            self.shared.pool.return_(packet);
        }
    }
}

fn run(shared: Arc<Shared>, socket: Arc<dyn DatagramSocket>, size: usize) {
    let mut buf = vec![0; size];

    while !shared.closed.load(Ordering::Acquire) {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                if !shared.closed.load(Ordering::Acquire) {
                    warn!("Receive failed, ending stream: {}", e);
                    shared.errored.store(true, Ordering::Release);
                }
                break;
            }
        };

        shared.handle_datagram(&buf[..n], from);
    }

    debug!("Receive thread exit");
}
