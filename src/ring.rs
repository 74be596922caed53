//! Single-producer/single-consumer ring of LIDAR range samples.
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use once_cell::sync::Lazy;

#[cfg(target_os = "macos")]
use mach::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};

/// Cursor block kept apart from the slot storage so the writer's stores do not share a
/// cache line with anything the render thread touches per frame.
#[repr(C, align(64))]
struct RingHeader {
    write_index: AtomicU64,
    last_timestamp_ns: AtomicU64,
}

impl RingHeader {
    fn new() -> Self {
        Self {
            write_index: AtomicU64::new(0),
            last_timestamp_ns: AtomicU64::new(0),
        }
    }
}

/// Fixed-capacity overwrite-oldest ring of `i32` samples.
///
/// One thread pushes, any number of threads read. Each slot is an atomic and the
/// write cursor is published with `Release` after the slot store, so a reader that
/// observes cursor `n` with `Acquire` also observes every sample pushed before it.
/// Readers never wait on the writer; a push that lands between a reader's cursor load
/// and its slot load simply hands the reader a newer sample.
pub struct RangeRing {
    header: RingHeader,
    slots: Box<[AtomicI32]>,
}

impl RangeRing {
    /// Create an empty ring. A zero capacity is bumped to one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| AtomicI32::new(0)).collect();
        Self {
            header: RingHeader::new(),
            slots,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Samples currently retained (saturates at capacity).
    pub fn len(&self) -> usize {
        let written = self.header.write_index.load(Ordering::Acquire);
        written.min(self.slots.len() as u64) as usize
    }

    /// True until the first push.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of samples ever pushed.
    pub fn total_written(&self) -> u64 {
        self.header.write_index.load(Ordering::Acquire)
    }

    /// Append a sample, overwriting the oldest one when full.
    ///
    /// Only one thread may push. [`crate::feed::FeedWriter`] is the single owner that
    /// calls this in the running instrument.
    pub(crate) fn push(&self, value: i32) {
        let capacity = self.slots.len() as u64;
        let write_index = self.header.write_index.load(Ordering::Relaxed);
        let slot = (write_index % capacity) as usize;
        self.slots[slot].store(value, Ordering::Relaxed);
        self.header
            .write_index
            .store(write_index + 1, Ordering::Release);
        self.header
            .last_timestamp_ns
            .store(monotonic_timestamp_ns(), Ordering::Release);
    }

    /// Read the sample at logical `index`, where 0 is the oldest retained sample.
    /// Returns `None` when `index` is past the retained samples.
    pub fn get(&self, index: usize) -> Option<i32> {
        let capacity = self.slots.len() as u64;
        let write_index = self.header.write_index.load(Ordering::Acquire);
        let len = write_index.min(capacity);
        if index as u64 >= len {
            return None;
        }
        let start = write_index - len;
        let slot = ((start + index as u64) % capacity) as usize;
        Some(self.slots[slot].load(Ordering::Relaxed))
    }

    /// Copy of the retained samples, oldest first. Allocates; not for the audio thread.
    pub fn snapshot(&self) -> Vec<i32> {
        let capacity = self.slots.len() as u64;
        let write_index = self.header.write_index.load(Ordering::Acquire);
        let len = write_index.min(capacity);
        let start = write_index - len;
        (0..len)
            .map(|offset| {
                let slot = ((start + offset) % capacity) as usize;
                self.slots[slot].load(Ordering::Relaxed)
            })
            .collect()
    }

    /// Fraction of the ring holding real samples (0.0 - 1.0).
    pub fn fill_ratio(&self) -> f32 {
        self.len() as f32 / self.slots.len() as f32
    }

    /// Timestamp of the last push, or 0 before the first one.
    pub fn last_timestamp_ns(&self) -> u64 {
        self.header.last_timestamp_ns.load(Ordering::Acquire)
    }
}

#[cfg(target_os = "macos")]
fn timebase() -> (u64, u64) {
    static TIMEBASE: Lazy<(u64, u64)> = Lazy::new(|| unsafe {
        let mut info = mach_timebase_info_data_t::default();
        mach_timebase_info(&mut info);
        (info.numer as u64, info.denom as u64)
    });
    *TIMEBASE
}

/// Monotonic timestamp in nanoseconds.
pub fn monotonic_timestamp_ns() -> u64 {
    #[cfg(target_os = "macos")]
    {
        let host_time = unsafe { mach_absolute_time() };
        let (numer, denom) = timebase();
        ((host_time as u128 * numer as u128) / denom as u128) as u64
    }
    #[cfg(not(target_os = "macos"))]
    {
        static START: Lazy<std::time::Instant> = Lazy::new(std::time::Instant::now);
        // Offset by one so a recorded push is never confused with "never written".
        START.elapsed().as_nanos() as u64 + 1
    }
}
