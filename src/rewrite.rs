//! Sequence number and timestamp rewriting for forwarded streams.

use crate::packet::PacketView;
use crate::util::{is_newer_u16, is_newer_u32};

/// Keeps a forwarded stream's numbering contiguous while packets are dropped.
///
/// The forwarding path decides per packet whether it is forwarded
/// (`accept = true`) or dropped. Dropped packets pull the deltas forward so
/// that the next forwarded packet follows directly after the last one sent.
/// Forwarded packets only apply the current deltas.
///
/// One rewriter per forwarded stream, used from one thread at a time.
///
/// ```
/// use rtp_pipe::StreamRewriter;
///
/// let mut r = StreamRewriter::new();
/// assert_eq!(r.rewrite_sequence(true, 10), 10);
/// r.rewrite_sequence(false, 11);
/// r.rewrite_sequence(false, 12);
/// assert_eq!(r.rewrite_sequence(true, 13), 11);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRewriter {
    seq_delta: u16,
    highest_seq_sent: Option<u16>,
    ts_delta: u32,
    highest_ts_sent: Option<u32>,
}

macro_rules! mk_rewrite {
    ($name:ident, $t:ty, $delta:ident, $highest:ident, $newer:ident) => {
        /// Rewrite a value of a forwarded (`accept`) or dropped packet.
        ///
        /// Dropped packets get their value back unchanged.
        pub fn $name(&mut self, accept: bool, v: $t) -> $t {
            if accept {
                let out = v.wrapping_sub(self.$delta);
                match self.$highest {
                    Some(h) if !$newer(out, h) => {}
                    _ => self.$highest = Some(out),
                }
                return out;
            }

            // Nothing forwarded yet, there is no gap to close.
            let Some(h) = self.$highest else {
                return v;
            };

            let candidate = v.wrapping_sub(h);
            if $newer(candidate, self.$delta) {
                self.$delta = candidate;
            }

            v
        }
    };
}

impl StreamRewriter {
    /// Create a rewriter with zero deltas.
    pub fn new() -> Self {
        StreamRewriter::default()
    }

    mk_rewrite!(rewrite_sequence, u16, seq_delta, highest_seq_sent, is_newer_u16);
    mk_rewrite!(rewrite_timestamp, u32, ts_delta, highest_ts_sent, is_newer_u32);

    /// Rewrite sequence number and timestamp of `packet` in place.
    ///
    /// Returns whether either changed.
    pub fn rewrite_rtp_packet(&mut self, accept: bool, packet: &mut PacketView) -> bool {
        if packet.is_invalid() {
            return false;
        }

        let seq = packet.sequence_number();
        let ts = packet.timestamp();

        let new_seq = self.rewrite_sequence(accept, seq);
        let new_ts = self.rewrite_timestamp(accept, ts);

        let mut changed = false;
        if new_seq != seq {
            changed |= packet.set_sequence_number(new_seq).is_ok();
        }
        if new_ts != ts {
            changed |= packet.set_timestamp(new_ts).is_ok();
        }
        changed
    }

    /// Undo [`rewrite_rtp_packet`](Self::rewrite_rtp_packet) on a forwarded
    /// packet, giving back its original numbering.
    pub fn restore_rtp_packet(&self, packet: &mut PacketView) -> bool {
        if packet.is_invalid() || (self.seq_delta == 0 && self.ts_delta == 0) {
            return false;
        }

        let seq = packet.sequence_number().wrapping_add(self.seq_delta);
        let ts = packet.timestamp().wrapping_add(self.ts_delta);

        packet.set_sequence_number(seq).is_ok() && packet.set_timestamp(ts).is_ok()
    }

    /// Shift the RTP timestamp of each sender report in an RTCP packet by the
    /// timestamp delta, `rewriting` to the forwarded numbering or back.
    ///
    /// Returns whether anything changed.
    pub fn process_rtcp_sender_info(&self, rewriting: bool, packet: &mut PacketView) -> bool {
        if self.ts_delta == 0 || !packet.is_rtcp() {
            return false;
        }

        let delta = self.ts_delta;
        let changed = packet.map_sender_report_rtp_time(|ts| {
            if rewriting {
                ts.wrapping_sub(delta)
            } else {
                ts.wrapping_add(delta)
            }
        });

        changed > 0
    }

    /// Amount subtracted from forwarded sequence numbers.
    pub fn seq_delta(&self) -> i16 {
        self.seq_delta as i16
    }

    /// Amount subtracted from forwarded timestamps.
    pub fn ts_delta(&self) -> i32 {
        self.ts_delta as i32
    }

    /// Highest sequence number forwarded, after rewriting.
    pub fn highest_seq_sent(&self) -> Option<u16> {
        self.highest_seq_sent
    }

    /// Highest timestamp forwarded, after rewriting.
    pub fn highest_ts_sent(&self) -> Option<u32> {
        self.highest_ts_sent
    }
}
