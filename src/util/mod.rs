mod bandwidth;
pub use bandwidth::{Bitrate, DataSize};

mod rate;
pub use rate::BitrateTracker;

macro_rules! mk_newer {
    ($id:ident, $t:ty, $signed:ty) => {
        /// Whether `a` comes after `b` in the circular number space of the type.
        ///
        /// Values exactly half the space apart are ambiguous and are treated as
        /// "newer" when `a` is numerically larger, which keeps the relation
        /// antisymmetric.
        pub fn $id(a: $t, b: $t) -> bool {
            let diff = a.wrapping_sub(b);
            if diff == <$t>::MAX / 2 + 1 {
                return a > b;
            }
            diff != 0 && (diff as $signed) > 0
        }
    };
}

mk_newer!(is_newer_u16, u16, i16);
mk_newer!(is_newer_u32, u32, i32);

/// Packet counts at which a sent/received packet is sampled into the log.
///
/// 1, 300, 500, 1000 and every 5000th thereafter.
pub(crate) fn is_log_sample(count: u64) -> bool {
    matches!(count, 1 | 300 | 500 | 1000) || (count > 0 && count % 5000 == 0)
}

/// Decaying cadence for drop warnings: every 100th drop up to 1000, then
/// every 1000th.
pub(crate) fn is_drop_warning(count: u64) -> bool {
    if count == 0 {
        return false;
    }
    if count <= 1000 {
        count % 100 == 0
    } else {
        count % 1000 == 0
    }
}
