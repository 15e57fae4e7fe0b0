use super::header::RTP_VERSION;
use super::PacketView;

const RTCP_HEADER_SIZE: usize = 4;

// header 4, ssrc 4, ntp time 8
const SR_RTP_TIME_OFFSET: usize = 16;
const SR_MIN_SIZE: usize = 28;

/// Type of RTCP packet, the second byte of the RTCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpType {
    /// RFC 3550 sender report.
    SenderReport = 200,
    /// RFC 3550 receiver report.
    ReceiverReport = 201,
    /// RFC 3550 source description.
    SourceDescription = 202,
    /// RFC 3550 goodbye.
    Goodbye = 203,
    /// RFC 3550 application defined.
    ApplicationDefined = 204,
    /// RFC 4585 transport layer feedback.
    TransportLayerFeedback = 205,
    /// RFC 4585 payload specific feedback.
    PayloadSpecificFeedback = 206,
    /// RFC 3611 extended report.
    ExtendedReport = 207,
}

impl TryFrom<u8> for RtcpType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use RtcpType::*;
        Ok(match value {
            200 => SenderReport,
            201 => ReceiverReport,
            202 => SourceDescription,
            203 => Goodbye,
            204 => ApplicationDefined,
            205 => TransportLayerFeedback,
            206 => PayloadSpecificFeedback,
            207 => ExtendedReport,
            _ => return Err(value),
        })
    }
}

/// Header of one RTCP packet inside a (possibly compound) RTCP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeaderView {
    /// Raw packet type byte.
    pub packet_type: u8,
    /// The 5 bit count/format field.
    pub count: u8,
    /// Start of this RTCP packet relative to the datagram start.
    pub start: usize,
    /// Length of this RTCP packet in bytes, including the header.
    pub length: usize,
}

impl RtcpHeaderView {
    /// Packet type, if it is a known one.
    pub fn rtcp_type(&self) -> Option<RtcpType> {
        RtcpType::try_from(self.packet_type).ok()
    }
}

/// Iterator over the packets of a compound RTCP datagram.
///
/// Stops at the first header that is malformed or overruns the datagram.
pub struct RtcpPackets<'a> {
    packet: &'a PacketView,
    pos: usize,
}

impl<'a> Iterator for RtcpPackets<'a> {
    type Item = RtcpHeaderView;

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.packet.rtcp_header_at(self.pos)?;
        self.pos += header.length;
        Some(header)
    }
}

impl PacketView {
    // Payload types 72-79 with the marker bit set collide with RTCP, which
    // is why RTP payload types avoid that range (RFC 5761).
    pub(crate) fn looks_like_rtcp(&self) -> bool {
        let Some(pt) = self.read_u8(1) else {
            return false;
        };
        (200..=211).contains(&pt)
    }

    /// Whether the packet is a version 2 RTCP packet.
    pub fn is_rtcp(&self) -> bool {
        self.len() >= RTCP_HEADER_SIZE + 4 && self.version() == RTP_VERSION && self.looks_like_rtcp()
    }

    /// Raw packet type of the first RTCP packet.
    pub fn rtcp_packet_type(&self) -> Option<u8> {
        self.read_u8(1)
    }

    /// Length in bytes of the first RTCP packet, from its length field.
    pub fn rtcp_length(&self) -> Option<usize> {
        self.read_u16(2).map(|w| (w as usize + 1) * 4)
    }

    /// SSRC of the sender of the first RTCP packet.
    pub fn rtcp_ssrc(&self) -> Option<u32> {
        self.read_u32(4)
    }

    /// The packets of a compound RTCP datagram.
    pub fn rtcp_packets(&self) -> RtcpPackets<'_> {
        RtcpPackets {
            packet: self,
            pos: 0,
        }
    }

    fn rtcp_header_at(&self, pos: usize) -> Option<RtcpHeaderView> {
        let b0 = self.read_u8(pos)?;
        if b0 >> 6 != RTP_VERSION {
            return None;
        }
        let packet_type = self.read_u8(pos + 1)?;
        let words = self.read_u16(pos + 2)?;
        let length = (words as usize + 1) * 4;
        if pos + length > self.len() {
            trace!("RTCP length {} overruns datagram of {}", length, self.len());
            return None;
        }
        Some(RtcpHeaderView {
            packet_type,
            count: b0 & 0b0001_1111,
            start: pos,
            length,
        })
    }

    /// Apply `f` to the RTP timestamp of every sender report in the datagram.
    ///
    /// Returns the number of sender reports changed.
    pub fn map_sender_report_rtp_time(&mut self, mut f: impl FnMut(u32) -> u32) -> usize {
        let mut changed = 0;
        let mut pos = 0;

        while let Some(header) = self.rtcp_header_at(pos) {
            pos += header.length;

            if header.rtcp_type() != Some(RtcpType::SenderReport) || header.length < SR_MIN_SIZE {
                continue;
            }

            let at = header.start + SR_RTP_TIME_OFFSET;
            let Some(ts) = self.read_u32(at) else {
                break;
            };
            let next = f(ts);
            if next != ts && self.write_u32(at, next).is_ok() {
                changed += 1;
            }
        }

        changed
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sender_report(ssrc: u32, rtp_time: u32) -> Vec<u8> {
        let mut v = vec![0x80, 200, 0, 6];
        v.extend_from_slice(&ssrc.to_be_bytes());
        v.extend_from_slice(&[0xe0, 0, 0, 0, 0, 0, 0, 0]);
        v.extend_from_slice(&rtp_time.to_be_bytes());
        v.extend_from_slice(&10_u32.to_be_bytes());
        v.extend_from_slice(&1000_u32.to_be_bytes());
        v
    }

    fn receiver_report(ssrc: u32) -> Vec<u8> {
        let mut v = vec![0x80, 201, 0, 1];
        v.extend_from_slice(&ssrc.to_be_bytes());
        v
    }

    #[test]
    fn rtcp_predicates() {
        let p = PacketView::from_vec(sender_report(7, 1000));
        assert!(p.is_rtcp());
        assert!(!p.is_rtp());
        assert_eq!(p.rtcp_packet_type(), Some(200));
        assert_eq!(p.rtcp_length(), Some(28));
        assert_eq!(p.rtcp_ssrc(), Some(7));
    }

    #[test]
    fn iterate_compound() {
        let mut v = receiver_report(1);
        v.extend(sender_report(2, 5));
        let p = PacketView::from_vec(v);

        let headers: Vec<_> = p.rtcp_packets().collect();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].rtcp_type(), Some(RtcpType::ReceiverReport));
        assert_eq!(headers[0].start, 0);
        assert_eq!(headers[0].length, 8);
        assert_eq!(headers[1].rtcp_type(), Some(RtcpType::SenderReport));
        assert_eq!(headers[1].start, 8);
        assert_eq!(headers[1].length, 28);
    }

    #[test]
    fn iterate_stops_at_overrun() {
        let mut v = receiver_report(1);
        // claims 10 words but has only one
        v.extend_from_slice(&[0x80, 201, 0, 10, 0, 0, 0, 1]);
        let p = PacketView::from_vec(v);
        assert_eq!(p.rtcp_packets().count(), 1);
    }

    #[test]
    fn map_sender_report_time() {
        let mut v = receiver_report(1);
        v.extend(sender_report(2, 5000));
        v.extend(sender_report(3, 7000));
        let mut p = PacketView::from_vec(v);

        let n = p.map_sender_report_rtp_time(|ts| ts.wrapping_sub(100));
        assert_eq!(n, 2);
        assert_eq!(p.read_u32(8 + 16), Some(4900));
        assert_eq!(p.read_u32(8 + 28 + 16), Some(6900));
    }
}
