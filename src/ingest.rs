//! Background thread that drains the sensor into the shared feed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use tracing::{error, info, trace, warn};

use crate::feed::FeedWriter;
use crate::sensor::{SensorDevice, SensorError};

const INGEST_THREAD_NAME: &str = "lidar-ingest";
const EVENT_QUEUE_DEPTH: usize = 16;

/// Cooperative cancellation flag shared with the ingest thread.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    /// Fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the ingest loop to exit at the top of its next iteration.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Counters returned when the loop exits normally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Scans fetched.
    pub scans: u64,
    /// Samples pushed into the feed.
    pub samples: u64,
}

/// Lifecycle notifications from the ingest thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestEvent {
    /// Device opened and scanning.
    Running,
    /// Loop exited on the stop token.
    Stopped(IngestSummary),
    /// Device error ended the loop.
    Faulted(String),
}

/// Last known state of the ingest thread.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum IngestStatus {
    /// Thread spawned, device not open yet.
    #[default]
    Starting,
    /// Scanning.
    Running,
    /// Exited on request.
    Stopped,
    /// Exited on a device error.
    Faulted(String),
}

/// Poll `device` until `stop` is set, pushing every sample into `writer`.
///
/// The token is checked before each scan, so a stop requested mid-fetch takes effect
/// once that scan has been folded in. Device errors are returned as-is; the device is
/// released with `stop_scanning` on every exit path that got past `start_scanning`.
pub fn run_ingest<D: SensorDevice + ?Sized>(
    device: &mut D,
    writer: &mut FeedWriter,
    stop: &StopToken,
) -> Result<IngestSummary, SensorError> {
    device.start_scanning()?;
    let result = poll_scans(device, writer, stop);
    let released = device.stop_scanning();
    let summary = result?;
    released?;
    Ok(summary)
}

fn poll_scans<D: SensorDevice + ?Sized>(
    device: &mut D,
    writer: &mut FeedWriter,
    stop: &StopToken,
) -> Result<IngestSummary, SensorError> {
    let mut summary = IngestSummary::default();
    while !stop.is_stopped() {
        let scan = device.get_scan()?;
        for sample in &scan.samples {
            let average = writer.push(sample.distance);
            trace!(
                distance = sample.distance,
                angle = sample.angle_millideg,
                average,
                "range sample"
            );
        }
        summary.scans += 1;
        summary.samples += scan.samples.len() as u64;
    }
    Ok(summary)
}

/// Handle to a detached ingest thread.
///
/// Dropping the handle sets the stop token and returns immediately; the thread is never
/// joined and may still be inside a blocking fetch when the drop completes.
pub struct IngestHandle {
    stop: StopToken,
    thread: JoinHandle<()>,
    events: Receiver<IngestEvent>,
    status: Mutex<IngestStatus>,
}

impl IngestHandle {
    /// Request cooperative shutdown.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Token shared with the thread.
    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// Whether the thread has returned.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Latest status, folding in any events received since the last call. Never blocks
    /// on the ingest thread.
    pub fn status(&self) -> IngestStatus {
        let mut status = self.status.lock();
        while let Ok(event) = self.events.try_recv() {
            *status = match event {
                IngestEvent::Running => IngestStatus::Running,
                IngestEvent::Stopped(_) => IngestStatus::Stopped,
                IngestEvent::Faulted(reason) => IngestStatus::Faulted(reason),
            };
        }
        status.clone()
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Spawn the ingest thread. `open` runs on the new thread, so a device that cannot be
/// opened ends only that thread and is reported as [`IngestStatus::Faulted`].
pub fn spawn_ingest<D, F>(
    path: String,
    open: F,
    mut writer: FeedWriter,
    stop: StopToken,
) -> std::io::Result<IngestHandle>
where
    D: SensorDevice,
    F: FnOnce(&str) -> Result<D, SensorError> + Send + 'static,
{
    let (tx, rx) = bounded(EVENT_QUEUE_DEPTH);
    let thread_stop = stop.clone();
    let thread = std::thread::Builder::new()
        .name(INGEST_THREAD_NAME.to_string())
        .spawn(move || {
            let outcome = open(&path).and_then(|mut device| {
                info!(path = %path, "sensor opened");
                notify(&tx, IngestEvent::Running);
                run_ingest(&mut device, &mut writer, &thread_stop)
            });
            match outcome {
                Ok(summary) => {
                    info!(scans = summary.scans, samples = summary.samples, "ingest stopped");
                    notify(&tx, IngestEvent::Stopped(summary));
                }
                Err(err) => {
                    error!(path = %path, "ingest terminated: {err}");
                    notify(&tx, IngestEvent::Faulted(err.to_string()));
                }
            }
        })?;
    Ok(IngestHandle {
        stop,
        thread,
        events: rx,
        status: Mutex::new(IngestStatus::Starting),
    })
}

fn notify(tx: &Sender<IngestEvent>, event: IngestEvent) {
    if tx.try_send(event).is_err() {
        warn!("ingest event dropped, status reader is not draining");
    }
}
