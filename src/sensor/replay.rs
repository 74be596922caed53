//! Prerecorded scans played back as a sensor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Scan, SensorDevice, SensorError};

/// Device that plays back prerecorded scans.
///
/// A one-shot replay reports [`SensorError::Exhausted`] after the last scan; a cycling
/// replay starts over forever. An optional interval sleeps before each scan to stand in
/// for the rotation period of real hardware.
pub struct ReplayDevice {
    scans: Vec<Scan>,
    index: usize,
    cycle: bool,
    interval: Option<Duration>,
    scanning: bool,
    released: Arc<AtomicBool>,
}

impl ReplayDevice {
    /// Play `scans` once.
    pub fn once(scans: Vec<Scan>) -> Self {
        Self::build(scans, false)
    }

    /// Play `scans` in a loop. An empty list behaves like an exhausted one-shot replay.
    pub fn cycling(scans: Vec<Scan>) -> Self {
        Self::build(scans, true)
    }

    fn build(scans: Vec<Scan>, cycle: bool) -> Self {
        Self {
            scans,
            index: 0,
            cycle,
            interval: None,
            scanning: false,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sleep this long before handing out each scan.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Flag set once `stop_scanning` has run, for observing release from another thread.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }

    /// Scans handed out so far.
    pub fn scans_served(&self) -> usize {
        self.index
    }
}

impl SensorDevice for ReplayDevice {
    fn start_scanning(&mut self) -> Result<(), SensorError> {
        self.scanning = true;
        Ok(())
    }

    fn get_scan(&mut self) -> Result<Scan, SensorError> {
        if !self.scanning {
            return Err(SensorError::Scan("device is not scanning".to_string()));
        }
        if self.scans.is_empty() || (!self.cycle && self.index >= self.scans.len()) {
            return Err(SensorError::Exhausted);
        }
        if let Some(interval) = self.interval {
            std::thread::sleep(interval);
        }
        let scan = self.scans[self.index % self.scans.len()].clone();
        self.index += 1;
        Ok(scan)
    }

    fn stop_scanning(&mut self) -> Result<(), SensorError> {
        self.scanning = false;
        self.released.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_replay_exhausts() {
        let mut device = ReplayDevice::once(vec![Scan::from_distances([1, 2])]);
        assert!(matches!(device.get_scan(), Err(SensorError::Scan(_))));
        device.start_scanning().unwrap();
        assert_eq!(device.get_scan().unwrap().samples.len(), 2);
        assert!(matches!(device.get_scan(), Err(SensorError::Exhausted)));
    }

    #[test]
    fn cycling_replay_wraps_and_reports_release() {
        let mut device = ReplayDevice::cycling(vec![
            Scan::from_distances([1]),
            Scan::from_distances([2]),
        ]);
        let released = device.released_flag();
        device.start_scanning().unwrap();
        let distances: Vec<i32> = (0..5)
            .map(|_| device.get_scan().unwrap().samples[0].distance)
            .collect();
        assert_eq!(distances, vec![1, 2, 1, 2, 1]);
        assert_eq!(device.scans_served(), 5);
        device.stop_scanning().unwrap();
        assert!(released.load(Ordering::Acquire));
    }
}
