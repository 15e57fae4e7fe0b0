use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::packet::PacketView;
use crate::util::is_drop_warning;

/// Holds the most recent packet until the consumer takes it.
///
/// Storing over an unread packet hands the old one back for recycling.
#[derive(Debug, Default)]
pub(crate) struct LatestSlot {
    slot: Mutex<Option<PacketView>>,
    overwritten: AtomicU64,
}

impl LatestSlot {
    /// Store `packet`, returning the unread packet it replaces.
    pub fn store(&self, packet: PacketView) -> Option<PacketView> {
        let prev = self.slot.lock().replace(packet);

        if prev.is_some() {
            let n = self.overwritten.fetch_add(1, Ordering::Relaxed) + 1;
            if is_drop_warning(n) {
                warn!("Consumer too slow, overwrote {} unread packets", n);
            }
        }

        prev
    }

    pub fn take(&self) -> Option<PacketView> {
        self.slot.lock().take()
    }

    /// Take the packet if it fits in `max_len` bytes.
    ///
    /// `Err` with the packet length leaves the packet in place.
    pub fn take_fitting(&self, max_len: usize) -> Result<Option<PacketView>, usize> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(p) if p.len() > max_len => Err(p.len()),
            _ => Ok(slot.take()),
        }
    }

    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}
