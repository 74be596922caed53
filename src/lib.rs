#![deny(missing_docs)]

//! Real-time instrument core that turns LIDAR range scans into sound.
//!
//! A detached ingest thread polls a [`SensorDevice`](sensor::SensorDevice) and pushes
//! every distance into a lock-free [`RangeRing`](ring::RangeRing) alongside an
//! exponential moving average. The [`Instrument`] reads that feed from the host's audio
//! callback without locking or allocating: each voice scans the ring at its pitch and
//! emits the samples normalized against the average, shaped by a per-note envelope.
//! Voice allocation, release and stealing live in [`pool::VoicePool`].

use std::ffi::{CStr, c_char};
use std::ops::Range;
use std::ptr;
use std::slice;
use std::sync::{Arc, Once};

use tracing::{debug, trace, warn};

#[cfg(target_os = "macos")]
use coreaudio_sys::{AudioBufferList, OSStatus};

use crate::feed::{FeedWriter, SensorFeed};
use crate::ingest::{IngestHandle, IngestStatus, StopToken, spawn_ingest};
use crate::midi::MidiMessage;
use crate::params::{ParameterId, Parameters};
use crate::pool::{DEFAULT_MAX_ACTIVE, DEFAULT_VOICE_SLOTS, NoteEnded, VoicePool};
use crate::sensor::{SensorDevice, SensorError};
use crate::voice::{BlockParams, NoteId};

pub mod feed;
pub mod ingest;
pub mod midi;
pub mod params;
pub mod pool;
pub mod ring;
pub mod sensor;
pub mod voice;

#[cfg(test)]
mod tests;

/// Ring slots the render path indexes into.
pub const DEFAULT_RING_CAPACITY: usize = 128;
/// Serial port of the scanner the instrument was built around.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/cu.usbserial-DM00KVQW";
const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;
const RENDER_FAILED: i32 = -1;

static TRACING_INIT: Once = Once::new();

/// Install the fmt subscriber once. Later calls, or a subscriber installed by the host,
/// win silently.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// Errors raised while building or wiring up an [`Instrument`].
#[derive(thiserror::Error, Debug)]
pub enum SynthError {
    /// The ingest thread could not be spawned.
    #[error("failed to spawn ingest thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// The feed already has a writer running.
    #[error("sensor ingest already started")]
    IngestAlreadyStarted,
    /// The device path handed over the C ABI is not UTF-8.
    #[error("device path is not valid UTF-8")]
    InvalidPath,
}

/// Output buffers rejected before any voice renders.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RenderError {
    /// Only mono and stereo are rendered.
    #[error("unsupported channel count {0}, only mono or stereo")]
    UnsupportedChannels(u32),
    /// Planar channels must be the same length.
    #[error("channel length mismatch: left {left}, right {right}")]
    ChannelLengthMismatch {
        /// Left channel frames.
        left: usize,
        /// Right channel frames.
        right: usize,
    },
    /// A buffer pointer handed over the C ABI was null.
    #[error("null output buffer")]
    NullBuffer,
}

/// Planar mono or stereo output for one host block.
pub struct OutputBuffer<'a> {
    left: &'a mut [f32],
    right: Option<&'a mut [f32]>,
}

impl<'a> OutputBuffer<'a> {
    /// Single channel.
    pub fn mono(left: &'a mut [f32]) -> Self {
        Self { left, right: None }
    }

    /// Two channels of equal length.
    pub fn stereo(left: &'a mut [f32], right: &'a mut [f32]) -> Result<Self, RenderError> {
        if left.len() != right.len() {
            return Err(RenderError::ChannelLengthMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        Ok(Self {
            left,
            right: Some(right),
        })
    }

    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// 1 or 2.
    pub fn channels(&self) -> u32 {
        if self.right.is_some() { 2 } else { 1 }
    }

    fn clear(&mut self) {
        self.left.fill(0.0);
        if let Some(right) = self.right.as_deref_mut() {
            right.fill(0.0);
        }
    }

    fn slice_mut(&mut self, range: Range<usize>) -> (&mut [f32], Option<&mut [f32]>) {
        let right = self.right.as_deref_mut().map(|right| &mut right[range.clone()]);
        (&mut self.left[range], right)
    }
}

/// Construction settings.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentConfig {
    /// Host sample rate in Hz, clamped to 8 kHz - 192 kHz.
    pub sample_rate: f64,
    /// Range samples kept for the render path.
    pub ring_capacity: usize,
    /// Voice slots allocated up front.
    pub voice_slots: usize,
    /// Voices that may sound before a note-on steals one.
    pub max_active_voices: usize,
    /// Path handed to the sensor opener.
    pub device_path: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            ring_capacity: DEFAULT_RING_CAPACITY,
            voice_slots: DEFAULT_VOICE_SLOTS,
            max_active_voices: DEFAULT_MAX_ACTIVE,
            device_path: DEFAULT_DEVICE_PATH.to_string(),
        }
    }
}

impl InstrumentConfig {
    fn sanitized(mut self) -> Self {
        self.sample_rate = if self.sample_rate.is_finite() {
            self.sample_rate.clamp(8_000.0, 192_000.0)
        } else {
            DEFAULT_SAMPLE_RATE
        };
        self.ring_capacity = self.ring_capacity.max(1);
        self.voice_slots = self.voice_slots.max(1);
        self.max_active_voices = self.max_active_voices.clamp(1, self.voice_slots);
        self
    }
}

/// Diagnostics snapshot for tooling. Not for the audio thread; it may lock.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentStatus {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Voices not free.
    pub active_voices: usize,
    /// Active-voice limit.
    pub max_active_voices: usize,
    /// Fraction of the ring holding real samples.
    pub ring_fill: f32,
    /// Samples pushed since start.
    pub samples_received: u64,
    /// Current moving average.
    pub moving_average: f32,
    /// Ingest thread state, `None` when no sensor was attached.
    pub ingest: Option<IngestStatus>,
}

/// The instrument: shared sensor feed, global parameters and the voice pool.
pub struct Instrument {
    config: InstrumentConfig,
    feed: Arc<SensorFeed>,
    writer: Option<FeedWriter>,
    params: Arc<Parameters>,
    pool: VoicePool,
    ingest: Option<IngestHandle>,
}

impl Instrument {
    /// Instrument with no sensor attached. The feed writer stays with the instrument
    /// until [`Instrument::start_ingest`] hands it to a thread.
    pub fn new(config: InstrumentConfig) -> Self {
        let config = config.sanitized();
        let (feed, writer) = SensorFeed::new(config.ring_capacity);
        let pool = VoicePool::new(
            config.voice_slots,
            config.max_active_voices,
            config.sample_rate,
        );
        Self {
            config,
            feed,
            writer: Some(writer),
            params: Arc::new(Parameters::new()),
            pool,
            ingest: None,
        }
    }

    /// Instrument whose ingest thread opens its sensor with `open`.
    pub fn with_sensor<D, F>(config: InstrumentConfig, open: F) -> Result<Self, SynthError>
    where
        D: SensorDevice,
        F: FnOnce(&str) -> Result<D, SensorError> + Send + 'static,
    {
        let mut instrument = Self::new(config);
        instrument.start_ingest(open)?;
        Ok(instrument)
    }

    /// Move the feed writer onto a detached ingest thread that opens the device at the
    /// configured path.
    pub fn start_ingest<D, F>(&mut self, open: F) -> Result<(), SynthError>
    where
        D: SensorDevice,
        F: FnOnce(&str) -> Result<D, SensorError> + Send + 'static,
    {
        let writer = self.writer.take().ok_or(SynthError::IngestAlreadyStarted)?;
        let path = self.config.device_path.clone();
        debug!(path = %path, "starting sensor ingest");
        let handle = spawn_ingest(path, open, writer, StopToken::new())?;
        self.ingest = Some(handle);
        Ok(())
    }

    /// Settings after clamping.
    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Shared sensor feed.
    pub fn feed(&self) -> &Arc<SensorFeed> {
        &self.feed
    }

    /// Feed writer, while no ingest thread owns it. Lets offline callers drive the feed.
    pub fn feed_writer(&mut self) -> Option<&mut FeedWriter> {
        self.writer.as_mut()
    }

    /// Ingest thread, if one was started.
    pub fn ingest(&self) -> Option<&IngestHandle> {
        self.ingest.as_ref()
    }

    /// Parameter store; clone the `Arc` to set values from another thread.
    pub fn parameters(&self) -> &Arc<Parameters> {
        &self.params
    }

    /// Current value of a parameter.
    pub fn parameter(&self, id: ParameterId) -> f32 {
        self.params.get(id)
    }

    /// Set a parameter, clamped to its range. Returns the stored value.
    pub fn set_parameter(&self, id: ParameterId, value: f32) -> f32 {
        self.params.set(id, value)
    }

    /// Voice pool, for inspection.
    pub fn voices(&self) -> &VoicePool {
        &self.pool
    }

    /// Allocate and start a note.
    pub fn note_on(&mut self, pitch: f32, velocity: u8) -> NoteId {
        self.pool.note_on(pitch, velocity)
    }

    /// Key up.
    pub fn note_release(&mut self, id: NoteId) -> bool {
        self.pool.release(id)
    }

    /// Host-driven steal.
    pub fn note_fast_release(&mut self, id: NoteId) -> bool {
        self.pool.fast_release(id)
    }

    /// Deallocate at once; no further audio and no end report.
    pub fn note_kill(&mut self, id: NoteId) -> bool {
        self.pool.kill(id)
    }

    /// Apply a MIDI message now.
    pub fn handle_midi(&mut self, message: MidiMessage) {
        match message {
            MidiMessage::NoteOn { key, velocity } => {
                self.pool.note_on(key as f32, velocity);
            }
            MidiMessage::NoteOff { key } => {
                self.pool.release_key(key);
            }
            MidiMessage::Sustain(down) => self.pool.set_sustain(down),
            MidiMessage::Sostenuto(down) => self.pool.set_sostenuto(down),
            MidiMessage::AllNotesOff => self.pool.release_all(),
            MidiMessage::AllSoundOff => self.pool.kill_all(),
        }
    }

    /// Notes that ended during the last render call, frames relative to its block.
    pub fn ended_notes(&self) -> &[NoteEnded] {
        self.pool.ended()
    }

    /// Render one block. The buffer is cleared and every active voice mixed in.
    /// Returns frames rendered.
    pub fn render(&mut self, out: &mut OutputBuffer<'_>) -> usize {
        self.process(&[], out)
    }

    /// Render one block, applying each `(frame_offset, message)` at its frame.
    /// Events must be sorted by offset; an offset behind an earlier one applies at the
    /// earlier position and one past the block applies at the end.
    pub fn process(
        &mut self,
        events: &[(usize, MidiMessage)],
        out: &mut OutputBuffer<'_>,
    ) -> usize {
        let frames = out.frames();
        let block = self.block_params();
        self.pool.begin_block();
        out.clear();

        let mut cursor = 0usize;
        for &(offset, message) in events {
            let offset = offset.clamp(cursor, frames);
            if offset > cursor {
                render_slice(&mut self.pool, &self.feed, &block, out, cursor..offset);
                cursor = offset;
            }
            self.handle_midi(message);
        }
        if cursor < frames {
            render_slice(&mut self.pool, &self.feed, &block, out, cursor..frames);
        }
        trace!(frames, voices = self.pool.active_count(), "render");
        frames
    }

    fn block_params(&self) -> BlockParams {
        let params = self.params.snapshot();
        BlockParams {
            sample_rate: self.config.sample_rate,
            volume: params.volume as f64,
            attack_time: params.attack_time as f64,
            release_time: params.release_time as f64,
        }
    }

    /// Diagnostics snapshot.
    pub fn status(&self) -> InstrumentStatus {
        InstrumentStatus {
            sample_rate: self.config.sample_rate,
            active_voices: self.pool.active_count(),
            max_active_voices: self.pool.max_active(),
            ring_fill: self.feed.ring().fill_ratio(),
            samples_received: self.feed.ring().total_written(),
            moving_average: self.feed.average(),
            ingest: self.ingest.as_ref().map(IngestHandle::status),
        }
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        if let Some(ingest) = &self.ingest {
            ingest.stop();
            debug!("instrument dropped, ingest asked to stop");
        }
    }
}

fn render_slice(
    pool: &mut VoicePool,
    feed: &SensorFeed,
    block: &BlockParams,
    out: &mut OutputBuffer<'_>,
    range: Range<usize>,
) {
    let offset = range.start;
    let (left, right) = out.slice_mut(range);
    pool.render(block, feed, left, right, offset);
}

/// Planar render arguments for hosts that do not pass an `AudioBufferList`.
#[repr(C)]
pub struct RenderArgs {
    /// Left (or only) channel, `frames` floats.
    pub left: *mut f32,
    /// Right channel, or null for mono.
    pub right: *mut f32,
    /// Frames to render.
    pub frames: u32,
}

#[cfg(feature = "sweep")]
fn build_instrument(config: InstrumentConfig) -> Result<Instrument, SynthError> {
    Instrument::with_sensor(config, sensor::SweepDevice::open)
}

#[cfg(not(feature = "sweep"))]
fn build_instrument(config: InstrumentConfig) -> Result<Instrument, SynthError> {
    warn!("built without a sensor driver, the range feed stays empty");
    Ok(Instrument::new(config))
}

/// Create an instrument and start sensor ingest. `device_path` may be null for the
/// default port. Returns null on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_create(
    device_path: *const c_char,
    sample_rate: f64,
) -> *mut Instrument {
    init_tracing();
    let built = unsafe { config_from_raw(device_path, sample_rate) }.and_then(build_instrument);
    match built {
        Ok(instrument) => Box::into_raw(Box::new(instrument)),
        Err(err) => {
            warn!("instrument creation failed: {err}");
            ptr::null_mut()
        }
    }
}

/// # Safety
/// A non-null `device_path` must point at a NUL-terminated string.
unsafe fn config_from_raw(
    device_path: *const c_char,
    sample_rate: f64,
) -> Result<InstrumentConfig, SynthError> {
    let mut config = InstrumentConfig {
        sample_rate,
        ..InstrumentConfig::default()
    };
    if !device_path.is_null() {
        let path = unsafe { CStr::from_ptr(device_path) }
            .to_str()
            .map_err(|_| SynthError::InvalidPath)?;
        config.device_path = path.to_string();
    }
    Ok(config)
}

/// Destroy an instrument. The ingest thread is signalled, not joined.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_destroy(handle: *mut Instrument) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
    }
}

/// Start a note. Returns its id, or 0 for a null handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_note_on(
    handle: *mut Instrument,
    pitch: f32,
    velocity: u8,
) -> u32 {
    if handle.is_null() {
        return 0;
    }
    let instrument = unsafe { &mut *handle };
    instrument.note_on(pitch, velocity).raw()
}

/// Release a note.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_note_release(handle: *mut Instrument, note_id: u32) -> bool {
    if handle.is_null() {
        return false;
    }
    let instrument = unsafe { &mut *handle };
    instrument.note_release(NoteId::from(note_id))
}

/// Fast-release a note that is being stolen.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_note_fast_release(
    handle: *mut Instrument,
    note_id: u32,
) -> bool {
    if handle.is_null() {
        return false;
    }
    let instrument = unsafe { &mut *handle };
    instrument.note_fast_release(NoteId::from(note_id))
}

/// Kill a note immediately.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_note_kill(handle: *mut Instrument, note_id: u32) -> bool {
    if handle.is_null() {
        return false;
    }
    let instrument = unsafe { &mut *handle };
    instrument.note_kill(NoteId::from(note_id))
}

/// Apply a raw MIDI message. Returns `false` for null input or ignored messages.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_midi(
    handle: *mut Instrument,
    data: *const u8,
    len: usize,
) -> bool {
    if handle.is_null() || data.is_null() {
        return false;
    }
    let bytes = unsafe { slice::from_raw_parts(data, len) };
    let Some(message) = MidiMessage::parse(bytes) else {
        return false;
    };
    let instrument = unsafe { &mut *handle };
    instrument.handle_midi(message);
    true
}

/// Set a parameter by raw id. Returns `false` for unknown ids.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_set_parameter(
    handle: *mut Instrument,
    parameter_id: u32,
    value: f32,
) -> bool {
    if handle.is_null() {
        return false;
    }
    let Ok(id) = ParameterId::try_from(parameter_id) else {
        return false;
    };
    let instrument = unsafe { &*handle };
    instrument.set_parameter(id, value);
    true
}

/// Read a parameter by raw id into `value_out`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_get_parameter(
    handle: *mut Instrument,
    parameter_id: u32,
    value_out: *mut f32,
) -> bool {
    if handle.is_null() || value_out.is_null() {
        return false;
    }
    let Ok(id) = ParameterId::try_from(parameter_id) else {
        return false;
    };
    unsafe {
        *value_out = (*handle).parameter(id);
    }
    true
}

/// Render one block into planar buffers. Returns 0 on success, -1 on a rejected buffer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_render(
    handle: *mut Instrument,
    args: *const RenderArgs,
) -> i32 {
    if handle.is_null() || args.is_null() {
        return RENDER_FAILED;
    }
    let (instrument, args) = unsafe { (&mut *handle, &*args) };
    let result = unsafe { render_planar(instrument, args.left, args.right, args.frames) };
    translate_status(result)
}

/// Render one block into a CoreAudio buffer list of one (mono) or two (stereo)
/// non-interleaved float buffers.
#[cfg(target_os = "macos")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidar_synth_render_buffer_list(
    handle: *mut Instrument,
    buffer_list: *mut AudioBufferList,
    frames: u32,
) -> OSStatus {
    if handle.is_null() || buffer_list.is_null() {
        return RENDER_FAILED;
    }
    let instrument = unsafe { &mut *handle };
    let list = unsafe { &mut *buffer_list };
    let count = list.mNumberBuffers;
    if count == 0 || count > 2 {
        return translate_status(Err(RenderError::UnsupportedChannels(count)));
    }
    let buffers = unsafe { slice::from_raw_parts_mut(list.mBuffers.as_mut_ptr(), count as usize) };
    let needed_bytes = frames as usize * std::mem::size_of::<f32>();
    for buffer in buffers.iter() {
        if buffer.mNumberChannels != 1 {
            return translate_status(Err(RenderError::UnsupportedChannels(buffer.mNumberChannels)));
        }
        if (buffer.mDataByteSize as usize) < needed_bytes {
            return translate_status(Err(RenderError::ChannelLengthMismatch {
                left: frames as usize,
                right: buffer.mDataByteSize as usize / std::mem::size_of::<f32>(),
            }));
        }
    }
    let left = buffers[0].mData as *mut f32;
    let right = buffers
        .get(1)
        .map(|buffer| buffer.mData as *mut f32)
        .unwrap_or(ptr::null_mut());
    let result = unsafe { render_planar(instrument, left, right, frames) };
    translate_status(result)
}

/// # Safety
/// `left` and a non-null `right` must each point at `frames` writable floats.
unsafe fn render_planar(
    instrument: &mut Instrument,
    left: *mut f32,
    right: *mut f32,
    frames: u32,
) -> Result<usize, RenderError> {
    if frames == 0 {
        return Ok(0);
    }
    if left.is_null() {
        return Err(RenderError::NullBuffer);
    }
    let left = unsafe { slice::from_raw_parts_mut(left, frames as usize) };
    let mut out = if right.is_null() || ptr::eq(right, left.as_ptr()) {
        OutputBuffer::mono(left)
    } else {
        let right = unsafe { slice::from_raw_parts_mut(right, frames as usize) };
        OutputBuffer::stereo(left, right)?
    };
    Ok(instrument.render(&mut out))
}

fn translate_status(result: Result<usize, RenderError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => {
            debug!("render rejected: {err}");
            RENDER_FAILED
        }
    }
}
