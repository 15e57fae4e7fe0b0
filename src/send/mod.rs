//! Fan-out sending of packets to a set of destinations.
//!
//! Written bytes are turned into packets by a [`Packetizer`], then either sent
//! right away on the calling thread or queued for a pacing thread that
//! enforces a rate limit.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::SendConfig;
use crate::packet::PacketView;
use crate::pool::PacketPool;
use crate::socket::DatagramSocket;
use crate::util::{is_log_sample, Bitrate, BitrateTracker, DataSize};

mod pacer;
use pacer::Pacer;
pub use pacer::PacketQueue;

/// Errors from a [`SendPipeline`].
#[derive(Debug, Error)]
pub enum SendError {
    /// The pipeline was closed.
    #[error("Send pipeline is closed")]
    Closed,

    /// The socket failed to send to a destination.
    #[error("Failed to send to {target}: {source}")]
    Transmit {
        /// Destination the send failed for.
        target: SocketAddr,
        /// The socket error.
        #[source]
        source: io::Error,
    },
}

/// Turns written bytes into packets.
///
/// Implementations may split or transform the data into several packets, for
/// instance to fragment a frame or to add forward error correction.
pub trait Packetizer: Send + Sync {
    /// Caller data passed through [`SendPipeline::write`] unchanged.
    type Context;

    /// Produce packets for `data` into `out`, taking buffers from `pool`.
    fn packetize(
        &self,
        pool: &PacketPool,
        data: &[u8],
        context: &Self::Context,
        out: &mut Vec<PacketView>,
    );
}

/// Wraps the written bytes in a single packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePacket;

impl Packetizer for SinglePacket {
    type Context = ();

    fn packetize(&self, pool: &PacketPool, data: &[u8], _: &(), out: &mut Vec<PacketView>) {
        let mut packet = pool.checkout(data.len());
        packet.set_data(data);
        out.push(packet);
    }
}

/// Counters of a [`SendPipeline`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStats {
    /// Packets sent to all destinations.
    pub packets_sent: u64,
    /// Bytes put on the wire, counting each destination.
    pub bytes_sent: u64,
    /// Packets evicted from a full pacing queue.
    pub dropped: u64,
    /// Failed socket sends.
    pub transmit_errors: u64,
}

/// The part of the pipeline shared with the pacing thread.
struct Dispatch {
    socket: Arc<dyn DatagramSocket>,
    pool: Arc<PacketPool>,
    targets: Mutex<Vec<SocketAddr>>,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    transmit_errors: AtomicU64,
    bitrate: Mutex<BitrateTracker>,
}

impl Dispatch {
    /// Send one packet to every destination, stopping at the first failure.
    ///
    /// Counters and bitrate are only updated when all destinations were reached.
    fn transmit(&self, packet: &PacketView) -> Result<(), SendError> {
        let data = packet.as_slice();
        let targets = self.targets.lock();

        for target in targets.iter() {
            if let Err(e) = self.socket.send_to(data, *target) {
                self.transmit_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Send to {} failed: {}", target, e);
                return Err(SendError::Transmit {
                    target: *target,
                    source: e,
                });
            }
        }

        let bytes = (data.len() * targets.len()) as u64;
        let count = targets.len();
        drop(targets);

        if count == 0 {
            return Ok(());
        }

        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.bitrate
            .lock()
            .record(Instant::now(), DataSize::bytes(bytes));

        let n = self.packets_sent.fetch_add(1, Ordering::Relaxed) + 1;
        if is_log_sample(n) {
            debug!(
                "Sent packet {}: seq={} ssrc={} len={} destinations={}",
                n,
                packet.sequence_number(),
                packet.ssrc(),
                packet.len(),
                count
            );
        }

        Ok(())
    }
}

/// Sends packets to a set of destinations, optionally paced.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// use rtp_pipe::{PacketPool, SendConfig, SendPipeline, UdpTransport};
///
/// let socket = UdpTransport::bind("0.0.0.0:0".parse().unwrap(), Duration::from_millis(100))?;
/// let pool = Arc::new(PacketPool::default());
/// let send = SendPipeline::new(Arc::new(socket), pool, SendConfig::new());
///
/// send.add_target("127.0.0.1:5004".parse().unwrap());
/// send.write(&[0x80, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1], &())?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct SendPipeline<P: Packetizer = SinglePacket> {
    packetizer: P,
    dispatch: Arc<Dispatch>,
    pacer: Option<Pacer>,
    enabled: AtomicBool,
    closed: AtomicBool,
}

impl SendPipeline<SinglePacket> {
    /// Create a pipeline sending each write as one packet.
    ///
    /// Panics on an invalid pacing config.
    pub fn new(socket: Arc<dyn DatagramSocket>, pool: Arc<PacketPool>, config: SendConfig) -> Self {
        SendPipeline::with_packetizer(socket, pool, config, SinglePacket)
    }
}

impl<P: Packetizer> SendPipeline<P> {
    /// Create a pipeline with a custom packetizer.
    ///
    /// Panics on an invalid pacing config.
    pub fn with_packetizer(
        socket: Arc<dyn DatagramSocket>,
        pool: Arc<PacketPool>,
        config: SendConfig,
        packetizer: P,
    ) -> Self {
        let dispatch = Arc::new(Dispatch {
            socket,
            pool: pool.clone(),
            targets: Mutex::new(Vec::new()),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            transmit_errors: AtomicU64::new(0),
            bitrate: Mutex::new(BitrateTracker::new(config.bitrate_window())),
        });

        let pacer = config.pacing().map(|pacing| {
            let dispatch = dispatch.clone();
            Pacer::new(
                pacing,
                pool,
                Box::new(move |packet: PacketView| {
                    if let Err(e) = dispatch.transmit(&packet) {
                        warn!("Paced send failed: {}", e);
                    }
                    dispatch.pool.return_(packet);
                }),
            )
        });

        SendPipeline {
            packetizer,
            dispatch,
            pacer,
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a destination. Adding one already present does nothing.
    pub fn add_target(&self, target: SocketAddr) {
        let mut targets = self.dispatch.targets.lock();
        if !targets.contains(&target) {
            debug!("Add send target: {}", target);
            targets.push(target);
        }
    }

    /// Remove a destination.
    pub fn remove_target(&self, target: SocketAddr) {
        let mut targets = self.dispatch.targets.lock();
        if let Some(i) = targets.iter().position(|t| *t == target) {
            debug!("Remove send target: {}", target);
            targets.swap_remove(i);
        }
    }

    /// Remove all destinations.
    pub fn clear_targets(&self) {
        self.dispatch.targets.lock().clear();
    }

    /// The current destinations.
    pub fn targets(&self) -> Vec<SocketAddr> {
        self.dispatch.targets.lock().clone()
    }

    /// Packetize `data` and send it to all destinations.
    ///
    /// While disabled, nothing is sent and the full length is reported as
    /// written. With pacing, packets are queued and the result says nothing
    /// about delivery. Without pacing, the first failed socket send aborts the
    /// whole write: packets not yet sent are recycled unsent.
    pub fn write(&self, data: &[u8], context: &P::Context) -> Result<usize, SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(data.len());
        }

        let pool = &self.dispatch.pool;
        let mut batch = pool.checkout_batch();
        self.packetizer.packetize(pool, data, context, &mut batch);

        let result = self.send_batch(&mut batch);
        pool.return_batch(batch);

        result.map(|_| data.len())
    }

    /// Send an already built packet, for instance one forwarded from a
    /// [`ReceivePipeline`][crate::ReceivePipeline].
    ///
    /// The packet ends up back in the pool either way.
    pub fn send_packet(&self, packet: PacketView) -> Result<(), SendError> {
        let pool = &self.dispatch.pool;

        if self.closed.load(Ordering::Acquire) {
            pool.return_(packet);
            return Err(SendError::Closed);
        }
        if !self.enabled.load(Ordering::Relaxed) {
            pool.return_(packet);
            return Ok(());
        }

        let mut batch = pool.checkout_batch();
        batch.push(packet);
        let result = self.send_batch(&mut batch);
        pool.return_batch(batch);

        result
    }

    fn send_batch(&self, batch: &mut Vec<PacketView>) -> Result<(), SendError> {
        if let Some(pacer) = &self.pacer {
            for packet in batch.drain(..) {
                pacer.push(packet);
            }
            return Ok(());
        }

        let pool = &self.dispatch.pool;
        let mut result = Ok(());

        for packet in batch.drain(..) {
            if result.is_ok() {
                result = self.dispatch.transmit(&packet);
            }
            pool.return_(packet);
        }

        result
    }

    /// Toggle sending. A disabled pipeline reports writes as successful.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether sending is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Change the pacing rate. 0 removes the limit.
    ///
    /// Has no effect on a pipeline created without pacing.
    pub fn set_max_per_interval(&self, max: usize) {
        match &self.pacer {
            Some(pacer) => pacer.set_max_per_interval(max),
            None => debug!("Ignore pacing rate on unpaced send pipeline"),
        }
    }

    /// The current pacing rate, `None` without pacing.
    pub fn max_per_interval(&self) -> Option<usize> {
        self.pacer.as_ref().map(|p| p.max_per_interval())
    }

    /// Sent bitrate averaged over the configured window, as seen at `now`.
    pub fn bitrate(&self, now: Instant) -> Bitrate {
        self.dispatch.bitrate.lock().rate(now)
    }

    /// Log the current sent bitrate.
    pub fn log_bitrate(&self, now: Instant) {
        let rate = self.bitrate(now);
        let stats = self.stats();
        info!(
            "Send bitrate: {} packets={} bytes={}",
            rate, stats.packets_sent, stats.bytes_sent
        );
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SendStats {
        SendStats {
            packets_sent: self.dispatch.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.dispatch.bytes_sent.load(Ordering::Relaxed),
            dropped: self.pacer.as_ref().map(|p| p.dropped()).unwrap_or(0),
            transmit_errors: self.dispatch.transmit_errors.load(Ordering::Relaxed),
        }
    }

    /// Close the pipeline. Later writes fail with [`SendError::Closed`].
    ///
    /// Destinations are cleared, the pacing thread is stopped and queued
    /// packets are recycled unsent. Closing twice does nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Close send pipeline");

        if let Some(pacer) = &self.pacer {
            pacer.close();
        }
        self.clear_targets();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<P: Packetizer> Drop for SendPipeline<P> {
    fn drop(&mut self) {
        self.close();
    }
}
