//! Scanning range sensor abstraction.
//!
//! The driver itself lives outside this crate. [`SensorDevice`] is the seam the ingest
//! loop polls; [`ReplayDevice`] feeds recorded scans for tests, and the `sweep` feature
//! binds the vendor's C library.

mod replay;
#[cfg(feature = "sweep")]
mod sweep;

pub use replay::ReplayDevice;
#[cfg(feature = "sweep")]
pub use sweep::SweepDevice;

/// One reading within a scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    /// Bearing in milli-degrees.
    pub angle_millideg: i32,
    /// Range reading in device units (centimeters for the Sweep scanner).
    pub distance: i32,
    /// Return signal strength, 0-255.
    pub signal_strength: i32,
}

impl Sample {
    /// Sample carrying only a distance.
    pub fn from_distance(distance: i32) -> Self {
        Self {
            distance,
            ..Self::default()
        }
    }
}

/// One full rotation's worth of samples, in device order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scan {
    /// Ordered samples.
    pub samples: Vec<Sample>,
}

impl Scan {
    /// Build a scan from bare distances.
    pub fn from_distances(distances: impl IntoIterator<Item = i32>) -> Self {
        Self {
            samples: distances.into_iter().map(Sample::from_distance).collect(),
        }
    }
}

/// Errors raised by a sensor device. These end the ingest thread and never reach the
/// render path.
#[derive(thiserror::Error, Debug)]
pub enum SensorError {
    /// Device could not be opened.
    #[error("failed to open sensor at {path}: {reason}")]
    Open {
        /// Path handed to the opener.
        path: String,
        /// Driver supplied reason.
        reason: String,
    },
    /// A scan could not be fetched.
    #[error("scan failed: {0}")]
    Scan(String),
    /// A finite source ran out of scans.
    #[error("sensor has no more scans")]
    Exhausted,
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Blocking scanning range sensor.
pub trait SensorDevice {
    /// Begin continuous scanning.
    fn start_scanning(&mut self) -> Result<(), SensorError>;

    /// Block until the next full scan is available.
    fn get_scan(&mut self) -> Result<Scan, SensorError>;

    /// Stop scanning and release the device. Called once when the ingest loop exits.
    fn stop_scanning(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
}

impl<D: SensorDevice + ?Sized> SensorDevice for Box<D> {
    fn start_scanning(&mut self) -> Result<(), SensorError> {
        (**self).start_scanning()
    }

    fn get_scan(&mut self) -> Result<Scan, SensorError> {
        (**self).get_scan()
    }

    fn stop_scanning(&mut self) -> Result<(), SensorError> {
        (**self).stop_scanning()
    }
}
