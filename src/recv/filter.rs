use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::packet::RTP_VERSION;
use crate::util::is_log_sample;

/// Decides whether a received datagram enters the pipeline.
///
/// Filters see the raw datagram before it is copied into a packet, so a
/// rejection costs no allocation.
pub trait DatagramFilter: Send + Sync {
    /// Return `false` to drop the datagram.
    fn accept(&self, data: &[u8], from: SocketAddr) -> bool;
}

impl<F> DatagramFilter for F
where
    F: Fn(&[u8], SocketAddr) -> bool + Send + Sync,
{
    fn accept(&self, data: &[u8], from: SocketAddr) -> bool {
        (self)(data, from)
    }
}

/// Accepts only datagrams carrying RTP/RTCP version 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionFilter;

impl DatagramFilter for VersionFilter {
    fn accept(&self, data: &[u8], from: SocketAddr) -> bool {
        let ok = data.first().map(|b| b >> 6) == Some(RTP_VERSION);
        if !ok {
            trace!("Drop datagram from {} with bad version", from);
        }
        ok
    }
}

/// Accepts only datagrams from a set of source addresses.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    allowed: Vec<IpAddr>,
}

impl SourceFilter {
    /// Filter allowing the given addresses.
    pub fn new(allowed: impl IntoIterator<Item = IpAddr>) -> Self {
        SourceFilter {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Allow another address.
    pub fn allow(&mut self, ip: IpAddr) {
        if !self.allowed.contains(&ip) {
            self.allowed.push(ip);
        }
    }
}

impl DatagramFilter for SourceFilter {
    fn accept(&self, _: &[u8], from: SocketAddr) -> bool {
        self.allowed.contains(&from.ip())
    }
}

/// Accepts everything, logging a sample of the received datagrams.
#[derive(Debug, Default)]
pub struct LogSampler {
    count: AtomicU64,
}

impl LogSampler {
    /// Create a sampler.
    pub fn new() -> Self {
        LogSampler::default()
    }

    /// Datagrams seen so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl DatagramFilter for LogSampler {
    fn accept(&self, data: &[u8], from: SocketAddr) -> bool {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;

        if is_log_sample(n) {
            let field = |at: usize, size: usize| {
                data.get(at..at + size)
                    .map(|b| b.iter().fold(0_u32, |acc, x| acc << 8 | *x as u32))
                    .unwrap_or(0)
            };
            debug!(
                "Received packet {}: seq={} ssrc={} len={} from={}",
                n,
                field(2, 2),
                field(8, 4),
                data.len(),
                from
            );
        }

        true
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use super::*;

    fn from(ip: [u8; 4]) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::from(ip), 5000))
    }

    #[test]
    fn version_filter() {
        let f = VersionFilter;
        assert!(f.accept(&[0x80, 0, 0, 0], from([1, 1, 1, 1])));
        assert!(!f.accept(&[0x40, 0, 0, 0], from([1, 1, 1, 1])));
        assert!(!f.accept(&[], from([1, 1, 1, 1])));
    }

    #[test]
    fn source_filter() {
        let mut f = SourceFilter::new([IpAddr::from([10, 0, 0, 1])]);
        assert!(f.accept(&[], from([10, 0, 0, 1])));
        assert!(!f.accept(&[], from([10, 0, 0, 2])));

        f.allow(IpAddr::from([10, 0, 0, 2]));
        assert!(f.accept(&[], from([10, 0, 0, 2])));
    }

    #[test]
    fn closures_are_filters() {
        let f = |data: &[u8], _: SocketAddr| data.len() > 2;
        assert!(f.accept(&[1, 2, 3], from([1, 1, 1, 1])));
        assert!(!DatagramFilter::accept(&f, &[1], from([1, 1, 1, 1])));
    }

    #[test]
    fn sampler_counts_and_accepts() {
        let s = LogSampler::new();
        for _ in 0..10 {
            assert!(s.accept(&[0x80, 0, 0, 1], from([1, 1, 1, 1])));
        }
        assert_eq!(s.count(), 10);
    }
}
