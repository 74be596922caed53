//! Bindings to libsweep, the Scanse Sweep scanner's C driver.

use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;

use tracing::warn;

use super::{Sample, Scan, SensorDevice, SensorError};

type SweepError = *mut c_void;
type SweepDeviceHandle = *mut c_void;
type SweepScanHandle = *mut c_void;

#[link(name = "sweep")]
unsafe extern "C" {
    fn sweep_error_message(error: SweepError) -> *const c_char;
    fn sweep_error_destruct(error: SweepError);
    fn sweep_device_construct_simple(
        port: *const c_char,
        error: *mut SweepError,
    ) -> SweepDeviceHandle;
    fn sweep_device_destruct(device: SweepDeviceHandle);
    fn sweep_device_start_scanning(device: SweepDeviceHandle, error: *mut SweepError);
    fn sweep_device_stop_scanning(device: SweepDeviceHandle, error: *mut SweepError);
    fn sweep_device_get_scan(device: SweepDeviceHandle, error: *mut SweepError) -> SweepScanHandle;
    fn sweep_scan_get_number_of_samples(scan: SweepScanHandle) -> i32;
    fn sweep_scan_get_angle(scan: SweepScanHandle, sample: i32) -> i32;
    fn sweep_scan_get_distance(scan: SweepScanHandle, sample: i32) -> i32;
    fn sweep_scan_get_signal_strength(scan: SweepScanHandle, sample: i32) -> i32;
    fn sweep_scan_destruct(scan: SweepScanHandle);
}

/// Take ownership of a libsweep error, returning its message.
fn take_error(error: SweepError) -> Option<String> {
    if error.is_null() {
        return None;
    }
    let message = unsafe {
        let raw = sweep_error_message(error);
        let message = if raw.is_null() {
            "unknown sweep error".to_string()
        } else {
            CStr::from_ptr(raw).to_string_lossy().into_owned()
        };
        sweep_error_destruct(error);
        message
    };
    Some(message)
}

/// Scanse Sweep scanner opened over its serial port.
pub struct SweepDevice {
    handle: SweepDeviceHandle,
    scanning: bool,
}

// The handle is only used from the thread that owns the device.
unsafe impl Send for SweepDevice {}

impl SweepDevice {
    /// Open the scanner at `path`, e.g. `/dev/cu.usbserial-DM00KVQW`.
    pub fn open(path: &str) -> Result<Self, SensorError> {
        let port = CString::new(path).map_err(|_| SensorError::Open {
            path: path.to_string(),
            reason: "path contains an interior NUL byte".to_string(),
        })?;
        let mut error: SweepError = ptr::null_mut();
        let handle = unsafe { sweep_device_construct_simple(port.as_ptr(), &mut error) };
        if let Some(reason) = take_error(error) {
            return Err(SensorError::Open {
                path: path.to_string(),
                reason,
            });
        }
        if handle.is_null() {
            return Err(SensorError::Open {
                path: path.to_string(),
                reason: "driver returned no device".to_string(),
            });
        }
        Ok(Self {
            handle,
            scanning: false,
        })
    }
}

impl SensorDevice for SweepDevice {
    fn start_scanning(&mut self) -> Result<(), SensorError> {
        let mut error: SweepError = ptr::null_mut();
        unsafe { sweep_device_start_scanning(self.handle, &mut error) };
        if let Some(reason) = take_error(error) {
            return Err(SensorError::Scan(reason));
        }
        self.scanning = true;
        Ok(())
    }

    fn get_scan(&mut self) -> Result<Scan, SensorError> {
        let mut error: SweepError = ptr::null_mut();
        let raw = unsafe { sweep_device_get_scan(self.handle, &mut error) };
        if let Some(reason) = take_error(error) {
            return Err(SensorError::Scan(reason));
        }
        if raw.is_null() {
            return Err(SensorError::Scan("driver returned no scan".to_string()));
        }
        let samples = unsafe {
            let count = sweep_scan_get_number_of_samples(raw).max(0);
            let samples = (0..count)
                .map(|i| Sample {
                    angle_millideg: sweep_scan_get_angle(raw, i),
                    distance: sweep_scan_get_distance(raw, i),
                    signal_strength: sweep_scan_get_signal_strength(raw, i),
                })
                .collect();
            sweep_scan_destruct(raw);
            samples
        };
        Ok(Scan { samples })
    }

    fn stop_scanning(&mut self) -> Result<(), SensorError> {
        if !self.scanning {
            return Ok(());
        }
        let mut error: SweepError = ptr::null_mut();
        unsafe { sweep_device_stop_scanning(self.handle, &mut error) };
        self.scanning = false;
        match take_error(error) {
            Some(reason) => Err(SensorError::Scan(reason)),
            None => Ok(()),
        }
    }
}

impl Drop for SweepDevice {
    fn drop(&mut self) {
        if let Err(err) = self.stop_scanning() {
            warn!("sweep stop on drop failed: {err}");
        }
        unsafe { sweep_device_destruct(self.handle) };
    }
}
