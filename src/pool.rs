//! Bounded pools of reusable packets.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;

use crate::config::PoolConfig;
use crate::packet::PacketView;

/// Pool of packets and packet batches shared between the network threads
/// and the media pipeline.
///
/// Packets are moved out on [`checkout`](Self::checkout) and moved back on
/// [`return_`](Self::return_), so a pooled buffer is never reachable from two
/// places at once. The pool is advisory: checkouts fall back to allocation
/// when it is empty and returns beyond capacity are dropped.
#[derive(Debug)]
pub struct PacketPool {
    config: PoolConfig,
    packets: ArrayQueue<PacketView>,
    batches: ArrayQueue<Vec<PacketView>>,
    allocations: AtomicU64,
    reuses: AtomicU64,
    discards: AtomicU64,
}

/// Counters of a [`PacketPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Checkouts that had to allocate a new buffer.
    pub allocations: u64,
    /// Checkouts served from the pool.
    pub reuses: u64,
    /// Returns dropped because the pool was full.
    pub discards: u64,
}

impl PacketPool {
    /// Create an empty pool.
    ///
    /// Panics if a capacity in the config is zero.
    pub fn new(config: PoolConfig) -> Self {
        config.validate();

        PacketPool {
            packets: ArrayQueue::new(config.packet_capacity()),
            batches: ArrayQueue::new(config.batch_capacity()),
            config,
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            discards: AtomicU64::new(0),
        }
    }

    /// Take a packet whose buffer holds at least `min_capacity` bytes.
    ///
    /// The packet is empty (offset and length 0, no flags). A pooled packet
    /// that is too small is dropped and replaced by a fresh allocation.
    pub fn checkout(&self, min_capacity: usize) -> PacketView {
        if let Some(packet) = self.packets.pop() {
            if packet.capacity() >= min_capacity {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                return packet;
            }
        }

        self.allocations.fetch_add(1, Ordering::Relaxed);
        let size = min_capacity.max(self.config.default_buffer_size());
        let mut packet = PacketView::from_vec(vec![0; size]);
        packet.reset();
        packet
    }

    /// Give a packet back for reuse.
    pub fn return_(&self, mut packet: PacketView) {
        packet.reset();

        if self.packets.push(packet).is_err() {
            self.discards.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take an empty container for a packetizer producing several packets.
    pub fn checkout_batch(&self) -> Vec<PacketView> {
        self.batches.pop().unwrap_or_default()
    }

    /// Give a batch container back, returning any packets still in it.
    pub fn return_batch(&self, mut batch: Vec<PacketView>) {
        for packet in batch.drain(..) {
            self.return_(packet);
        }

        // full batch pool, the container is dropped
        let _ = self.batches.push(batch);
    }

    /// Number of idle packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether there are no idle packets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The config the pool was created with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
        }
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        PacketPool::new(PoolConfig::default())
    }
}
