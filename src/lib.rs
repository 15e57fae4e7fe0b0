//! RTP/RTCP transport core.
//!
//! This crate moves RTP and RTCP packets between the network and a media
//! pipeline with as little allocation as possible. It has four parts:
//!
//! * [`PacketView`] is a packet over an owned byte buffer. Header fields are
//!   read and written in place, and CSRC lists and RFC 8285 header extensions
//!   can be inserted and removed.
//! * [`PacketPool`] recycles packets between the network threads and the
//!   media pipeline. Packets move in and out of the pool by value, so a
//!   buffer is never shared between two owners.
//! * [`SendPipeline`] fans written data out to a set of destinations, either
//!   directly on the calling thread or through a pacing thread enforcing a
//!   rate limit. [`ReceivePipeline`] runs a receive thread that filters
//!   datagrams and keeps the most recent packet for a consumer.
//! * [`StreamRewriter`] rewrites sequence numbers and timestamps so that a
//!   forwarded stream stays contiguous when packets are dropped from it, for
//!   instance when switching simulcast layers.
//!
//! # Sockets
//!
//! The pipelines are handed an already bound [`DatagramSocket`]. The crate
//! provides [`UdpTransport`] over [`std::net::UdpSocket`], but anything that
//! can send and receive datagrams will do.
//!
//! # Forwarding
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! use rtp_pipe::{DatagramFilter, PacketPool, ReceiveConfig, ReceivePipeline};
//! use rtp_pipe::{SendConfig, SendPipeline, StreamRewriter, UdpTransport, VersionFilter};
//!
//! let pool = Arc::new(PacketPool::default());
//! let poll = Duration::from_millis(100);
//!
//! let inbound = UdpTransport::bind("0.0.0.0:5004".parse().unwrap(), poll)?;
//! let outbound = UdpTransport::bind("0.0.0.0:0".parse().unwrap(), poll)?;
//!
//! let filters: Vec<Box<dyn DatagramFilter>> = vec![Box::new(VersionFilter)];
//! let recv = ReceivePipeline::new(Some(Arc::new(inbound)), pool.clone(), filters, ReceiveConfig::new());
//! let send = SendPipeline::new(Arc::new(outbound), pool.clone(), SendConfig::new());
//! send.add_target("10.0.0.2:5004".parse().unwrap());
//!
//! let mut rewriter = StreamRewriter::new();
//!
//! loop {
//!     let Some(mut packet) = recv.take() else {
//!         std::thread::sleep(Duration::from_millis(5));
//!         continue;
//!     };
//!
//!     // Forward every other layer, say.
//!     let accept = packet.payload_type() == 96;
//!     rewriter.rewrite_rtp_packet(accept, &mut packet);
//!
//!     if accept {
//!         send.send_packet(packet)?;
//!     } else {
//!         pool.return_(packet);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Logging
//!
//! The crate logs with [`tracing`]. Sent and received packets are sampled at
//! packet counts 1, 300, 500, 1000 and every 5000th after that. Dropped
//! packets are warned about every 100th drop up to 1000, then every 1000th.
#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]
#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

use thiserror::Error;

mod config;
pub use config::{PacingConfig, PoolConfig, ReceiveConfig, SendConfig};
pub use config::DEFAULT_RECV_BUFFER_SIZE;

pub mod packet;
pub use packet::PacketView;

mod pool;
pub use pool::{PacketPool, PoolStats};

mod send;
pub use send::{PacketQueue, Packetizer, SendPipeline, SendStats, SinglePacket};

mod recv;
pub use recv::{Consumer, DatagramFilter, LogSampler, ReceivePipeline, ReceiveStats};
pub use recv::{SourceFilter, VersionFilter};

mod rewrite;
pub use rewrite::StreamRewriter;

mod socket;
pub use socket::{DatagramSocket, UdpTransport, MAX_POLL_INTERVAL};

mod util;
pub use util::{is_newer_u16, is_newer_u32, Bitrate, BitrateTracker, DataSize};

/// Various error types.
pub mod error {
    pub use crate::packet::PacketError;
    pub use crate::recv::RecvError;
    pub use crate::send::SendError;
}

/// Errors for the whole transport core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipeError {
    /// Packet manipulation errors.
    #[error("{0}")]
    Packet(#[from] error::PacketError),

    /// Send pipeline errors.
    #[error("{0}")]
    Send(#[from] error::SendError),

    /// Receive pipeline errors.
    #[error("{0}")]
    Recv(#[from] error::RecvError),

    /// Other IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
