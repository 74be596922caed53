//! Sensor state shared between the ingest thread and the render thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::ring::RangeRing;

/// Weight of the previous average in each update.
pub const AVERAGE_BETA: f32 = 0.9;
/// Added to each sample before averaging so the render path's divisor moves away from zero.
/// Each update therefore lifts the average by `(1 - β) · ε = 1.0`.
pub const AVERAGE_EPSILON: f32 = 10.0;
/// Samples above this distance are treated as glitches and clamped by the render path.
pub const OUTLIER_CEILING: i32 = 1000;

/// Exponential moving average stored as `f32` bits.
pub struct MovingAverage {
    bits: AtomicU32,
}

impl MovingAverage {
    fn new() -> Self {
        Self {
            bits: AtomicU32::new(0.0f32.to_bits()),
        }
    }

    /// Current average.
    pub fn value(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Fold one sample in. Single writer, so load-then-store is not a lost update.
    fn update(&self, sample: i32) -> f32 {
        let next = AVERAGE_BETA * self.value()
            + (1.0 - AVERAGE_BETA) * (sample as f32 + AVERAGE_EPSILON);
        self.bits.store(next.to_bits(), Ordering::Release);
        next
    }
}

/// Ring buffer plus moving average, read by the render engine.
pub struct SensorFeed {
    ring: RangeRing,
    average: MovingAverage,
}

impl SensorFeed {
    /// Create the shared feed together with its only writer.
    pub fn new(capacity: usize) -> (Arc<SensorFeed>, FeedWriter) {
        let feed = Arc::new(SensorFeed {
            ring: RangeRing::new(capacity),
            average: MovingAverage::new(),
        });
        let writer = FeedWriter { feed: feed.clone() };
        (feed, writer)
    }

    /// Underlying ring.
    pub fn ring(&self) -> &RangeRing {
        &self.ring
    }

    /// Ring capacity in samples.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Sample at logical ring index, `None` when out of range.
    pub fn sample_at(&self, index: usize) -> Option<i32> {
        self.ring.get(index)
    }

    /// Current moving average.
    pub fn average(&self) -> f32 {
        self.average.value()
    }
}

/// Exclusive write side of a [`SensorFeed`]. Not `Clone`, which keeps the ring single-producer.
pub struct FeedWriter {
    feed: Arc<SensorFeed>,
}

impl FeedWriter {
    /// Append one distance sample and fold it into the average. Returns the new average.
    pub fn push(&mut self, distance: i32) -> f32 {
        self.feed.ring.push(distance);
        self.feed.average.update(distance)
    }

    /// Read-side view of the feed this writer fills.
    pub fn feed(&self) -> &Arc<SensorFeed> {
        &self.feed
    }
}
