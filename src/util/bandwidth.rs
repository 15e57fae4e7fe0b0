use std::fmt;
use std::ops::{AddAssign, Div, SubAssign};
use std::time::Duration;

/// A send rate in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Bitrate(f64);

impl Bitrate {
    /// Zero bits per second.
    pub const ZERO: Self = Self::new(0);

    /// Create a bitrate from bits per second.
    pub const fn new(bps: u64) -> Self {
        Bitrate(bps as f64)
    }

    /// The rate rounded up to whole bits per second.
    pub fn as_u64(&self) -> u64 {
        self.0.ceil() as u64
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 4] = ["kbit/s", "Mbit/s", "Gbit/s", "Tbit/s"];

        let mut rate = self.0;
        if rate < 1000.0 {
            return write!(f, "{rate}bit/s");
        }

        let mut unit = 0;
        rate /= 1000.0;
        while rate >= 1000.0 && unit < UNITS.len() - 1 {
            rate /= 1000.0;
            unit += 1;
        }

        write!(f, "{:.3}{}", rate, UNITS[unit])
    }
}

/// Bytes put on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataSize(u64);

impl DataSize {
    /// No data.
    pub const ZERO: Self = DataSize::bytes(0);

    /// Create a size from a number of bytes.
    pub const fn bytes(bytes: u64) -> DataSize {
        Self(bytes)
    }
}

/// Average rate of sending this much data over a duration. Zero for a zero
/// duration.
impl Div<Duration> for DataSize {
    type Output = Bitrate;

    fn div(self, rhs: Duration) -> Self::Output {
        if rhs.is_zero() {
            return Bitrate::ZERO;
        }

        Bitrate(self.0 as f64 * 8.0 / rhs.as_secs_f64())
    }
}

impl AddAssign<DataSize> for DataSize {
    fn add_assign(&mut self, rhs: DataSize) {
        self.0 += rhs.0;
    }
}

/// Saturates at zero.
impl SubAssign<DataSize> for DataSize {
    fn sub_assign(&mut self, rhs: DataSize) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{Bitrate, DataSize};

    #[test]
    fn bitrate_display() {
        assert_eq!(Bitrate::ZERO.to_string(), "0bit/s");
        assert_eq!(Bitrate::new(12).to_string(), "12bit/s");
        assert_eq!(Bitrate::new(12_345).to_string(), "12.345kbit/s");
        assert_eq!(Bitrate::new(1_234_567).to_string(), "1.235Mbit/s");
        assert_eq!(Bitrate::new(2_500_000).to_string(), "2.500Mbit/s");
    }

    #[test]
    fn rate_of_size_over_duration() {
        let size = DataSize::bytes(2_500_000);
        assert_eq!((size / Duration::from_secs(1)).as_u64(), 20_000_000);
        assert_eq!((size / Duration::from_millis(500)).as_u64(), 40_000_000);
        assert_eq!(size / Duration::ZERO, Bitrate::ZERO);
    }

    #[test]
    fn sub_saturates() {
        let mut size = DataSize::bytes(10);
        size -= DataSize::bytes(25);
        assert_eq!(size, DataSize::ZERO);

        size += DataSize::bytes(7);
        assert_eq!(size, DataSize::bytes(7));
    }
}
