//! Construction-time configuration for pools and pipelines.
//!
//! All configs are plain values read once when the component is built.
//!
//! ```
//! use rtp_pipe::{PacingConfig, SendConfig};
//!
//! let config = SendConfig::new()
//!     .set_pacing(Some(PacingConfig::new().set_max_per_interval(50)));
//!
//! assert!(config.pacing().is_some());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Size of a receive buffer big enough for any MTU-bound datagram.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4096;

/// Bounds for a [`PacketPool`][crate::PacketPool].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    packet_capacity: usize,
    batch_capacity: usize,
    default_buffer_size: usize,
}

impl PoolConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        PoolConfig::default()
    }

    /// Max number of idle packets held by the pool.
    pub fn packet_capacity(&self) -> usize {
        self.packet_capacity
    }

    /// Set the max number of idle packets held by the pool.
    ///
    /// Defaults to 256.
    pub fn set_packet_capacity(mut self, capacity: usize) -> Self {
        self.packet_capacity = capacity;
        self
    }

    /// Max number of idle packet batches held by the pool.
    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    /// Set the max number of idle packet batches.
    ///
    /// Defaults to 32.
    pub fn set_batch_capacity(mut self, capacity: usize) -> Self {
        self.batch_capacity = capacity;
        self
    }

    /// Buffer size for freshly allocated packets.
    pub fn default_buffer_size(&self) -> usize {
        self.default_buffer_size
    }

    /// Set the buffer size of freshly allocated packets.
    ///
    /// A checkout asking for more still gets a big enough buffer.
    /// Defaults to 1500.
    pub fn set_default_buffer_size(mut self, size: usize) -> Self {
        self.default_buffer_size = size;
        self
    }

    /// Panics on capacities a pool can't be built with.
    pub(crate) fn validate(&self) {
        assert!(
            self.packet_capacity > 0 && self.batch_capacity > 0,
            "Pool capacities must be non-zero"
        );
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            packet_capacity: 256,
            batch_capacity: 32,
            default_buffer_size: 1500,
        }
    }
}

/// Rate limit for a paced [`SendPipeline`][crate::SendPipeline].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    max_per_interval: usize,
    interval_ms: u64,
    queue_capacity: usize,
}

impl PacingConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        PacingConfig::default()
    }

    /// Max packets dispatched per interval. 0 means unlimited.
    pub fn max_per_interval(&self) -> usize {
        self.max_per_interval
    }

    /// Set the max packets dispatched per interval.
    ///
    /// Defaults to 0, no limit.
    pub fn set_max_per_interval(mut self, max: usize) -> Self {
        self.max_per_interval = max;
        self
    }

    /// The rate limit interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Set the rate limit interval in milliseconds.
    ///
    /// Defaults to 10ms.
    pub fn set_interval_ms(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }

    /// Number of packets the pacing queue holds before dropping the oldest.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Set the pacing queue capacity.
    ///
    /// Defaults to 1000.
    pub fn set_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Panics on settings that can never work.
    pub(crate) fn validate(&self) {
        assert!(
            self.queue_capacity > 0,
            "Pacing queue capacity must be non-zero"
        );
        assert!(
            self.max_per_interval == 0 || self.interval_ms > 0,
            "Pacing interval must be non-zero when a rate is set"
        );
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_per_interval: 0,
            interval_ms: 10,
            queue_capacity: 1000,
        }
    }
}

/// Config for a [`SendPipeline`][crate::SendPipeline].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    pacing: Option<PacingConfig>,
    bitrate_window_ms: u64,
}

impl SendConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        SendConfig::default()
    }

    /// Pacing settings, `None` for sending on the caller thread.
    pub fn pacing(&self) -> Option<PacingConfig> {
        self.pacing
    }

    /// Run sends through a pacing thread.
    ///
    /// Defaults to `None`.
    pub fn set_pacing(mut self, pacing: Option<PacingConfig>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Window the sent bitrate is averaged over.
    pub fn bitrate_window(&self) -> Duration {
        Duration::from_millis(self.bitrate_window_ms)
    }

    /// Set the bitrate window in milliseconds.
    ///
    /// Defaults to 1000ms.
    pub fn set_bitrate_window_ms(mut self, ms: u64) -> Self {
        self.bitrate_window_ms = ms;
        self
    }
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            pacing: None,
            bitrate_window_ms: 1000,
        }
    }
}

/// Config for a [`ReceivePipeline`][crate::ReceivePipeline].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveConfig {
    recv_buffer_size: usize,
}

impl ReceiveConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        ReceiveConfig::default()
    }

    /// Size of the buffer datagrams are received into.
    pub fn recv_buffer_size(&self) -> usize {
        self.recv_buffer_size
    }

    /// Set the receive buffer size. Longer datagrams are truncated.
    ///
    /// Defaults to 4096.
    pub fn set_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub(crate) fn validate(&self) {
        assert!(
            self.recv_buffer_size > 0,
            "Receive buffer size must be non-zero"
        );
    }
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}
