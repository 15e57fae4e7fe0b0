use std::collections::VecDeque;
use std::iter;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

use crate::config::PacingConfig;
use crate::packet::PacketView;
use crate::pool::PacketPool;
use crate::util::is_drop_warning;

/// Bounded FIFO of packets waiting to be paced out.
///
/// When full, pushing evicts the oldest packet, so the queue always holds the
/// most recent `capacity` packets in their original order. Pushes and pops
/// may come from any thread.
#[derive(Debug)]
pub struct PacketQueue {
    queue: ArrayQueue<PacketView>,
    dropped: AtomicU64,
}

impl PacketQueue {
    /// Create a queue holding at most `capacity` packets.
    ///
    /// Panics if the capacity is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Packet queue capacity must be non-zero");
        PacketQueue {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Add a packet at the tail, returning the evicted head if the queue was full.
    pub fn push(&self, packet: PacketView) -> Option<PacketView> {
        let evicted = self.queue.force_push(packet);

        if evicted.is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if is_drop_warning(dropped) {
                warn!("Pacing queue full, dropped {} packets", dropped);
            }
        }

        evicted
    }

    /// Take the oldest packet.
    pub fn pop(&self) -> Option<PacketView> {
        self.queue.pop()
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Max number of queued packets.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Total packets evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remove all queued packets, oldest first.
    pub fn drain(&self) -> impl Iterator<Item = PacketView> + '_ {
        iter::from_fn(move || self.queue.pop())
    }
}

/// Sends a packet and hands it back to the pool.
pub(crate) type Transmit = Box<dyn FnMut(PacketView) + Send>;

struct Shared {
    queue: PacketQueue,
    // Guards only the sleep/wake handshake, never the queue.
    wakeup: Mutex<()>,
    cond: Condvar,
    closed: AtomicBool,
    max_per_interval: AtomicUsize,
    interval: Duration,
}

/// Rate limiter running on its own thread.
///
/// The queue is the only state shared with the writers. The record of recent
/// dispatches lives on the pacing thread.
pub(crate) struct Pacer {
    shared: Arc<Shared>,
    pool: Arc<PacketPool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Pacer {
    /// Start the pacing thread.
    ///
    /// Panics on an invalid config.
    pub fn new(config: PacingConfig, pool: Arc<PacketPool>, transmit: Transmit) -> Self {
        config.validate();

        let shared = Arc::new(Shared {
            queue: PacketQueue::new(config.queue_capacity()),
            wakeup: Mutex::new(()),
            cond: Condvar::new(),
            closed: AtomicBool::new(false),
            max_per_interval: AtomicUsize::new(config.max_per_interval()),
            interval: config.interval(),
        });

        let handle = {
            let shared = shared.clone();
            let pool = pool.clone();
            thread::Builder::new()
                .name("rtp-pacer".into())
                .spawn(move || run(shared, pool, transmit))
        };

        let handle = match handle {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Failed to start pacing thread: {:?}", e);
                shared.closed.store(true, Ordering::Release);
                None
            }
        };

        Pacer {
            shared,
            pool,
            handle: Mutex::new(handle),
        }
    }

    /// Queue a packet for sending.
    pub fn push(&self, packet: PacketView) {
        if self.shared.closed.load(Ordering::Acquire) {
            self.pool.return_(packet);
            return;
        }

        if let Some(p) = self.shared.queue.push(packet) {
            self.pool.return_(p);
        }

        // Raced with close, which may already have drained.
        if self.shared.closed.load(Ordering::Acquire) {
            self.recycle_queued();
            return;
        }

        self.shared.wake(false);
    }

    pub fn set_max_per_interval(&self, max: usize) {
        assert!(
            max == 0 || !self.shared.interval.is_zero(),
            "Pacing interval must be non-zero when a rate is set"
        );
        self.shared.max_per_interval.store(max, Ordering::Relaxed);
        self.shared.wake(false);
    }

    pub fn max_per_interval(&self) -> usize {
        self.shared.max_per_interval.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.shared.queue.dropped()
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stop the thread and recycle everything still queued, unsent.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wake(true);

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Pacing thread panicked");
            }
        }

        let n = self.recycle_queued();
        if n > 0 {
            debug!("Pacer closed with {} unsent packets", n);
        }
    }

    fn recycle_queued(&self) -> usize {
        let mut n = 0;
        for packet in self.shared.queue.drain() {
            self.pool.return_(packet);
            n += 1;
        }
        n
    }
}

impl Shared {
    fn wake(&self, all: bool) {
        // Taking the lock orders this after a pacer that checked the queue
        // and is about to wait.
        drop(self.wakeup.lock());
        if all {
            self.cond.notify_all();
        } else {
            self.cond.notify_one();
        }
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(shared: Arc<Shared>, pool: Arc<PacketPool>, mut transmit: Transmit) {
    // Dispatch times of the most recent packets, at most max_per_interval.
    let mut recent: VecDeque<Instant> = VecDeque::new();

    loop {
        let Some(packet) = next_packet(&shared, &mut recent) else {
            break;
        };

        if shared.closed.load(Ordering::Acquire) {
            pool.return_(packet);
            break;
        }

        transmit(packet);

        if shared.max_per_interval.load(Ordering::Relaxed) > 0 {
            recent.push_back(Instant::now());
        }
    }

    debug!("Pacing thread exit");
}

/// Wait for a packet that may be sent right now. `None` when closed.
fn next_packet(shared: &Shared, recent: &mut VecDeque<Instant>) -> Option<PacketView> {
    let mut guard = shared.wakeup.lock();

    loop {
        if shared.closed.load(Ordering::Acquire) {
            return None;
        }

        if shared.queue.is_empty() {
            shared.cond.wait(&mut guard);
            continue;
        }

        let max = shared.max_per_interval.load(Ordering::Relaxed);
        if max == 0 {
            recent.clear();
            match shared.queue.pop() {
                Some(p) => return Some(p),
                None => continue,
            }
        }

        let now = Instant::now();
        while recent.len() > max {
            recent.pop_front();
        }
        while let Some(t) = recent.front() {
            if now.saturating_duration_since(*t) >= shared.interval {
                recent.pop_front();
            } else {
                break;
            }
        }

        if recent.len() < max {
            match shared.queue.pop() {
                Some(p) => return Some(p),
                None => continue,
            }
        }

        // Full window, sleep until the oldest dispatch leaves it.
        if let Some(t) = recent.front() {
            let until = *t + shared.interval;
            shared.cond.wait_until(&mut guard, until);
        }
    }
}
