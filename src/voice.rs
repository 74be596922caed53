//! One synthesized note and its envelope state machine.

use std::f64::consts::TAU;

use crate::feed::{OUTLIER_CEILING, SensorFeed};

/// Identifier handed back by note allocation. Never reused within one pool.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(u32);

impl NoteId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value, as passed over the C ABI.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for NoteId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Lifecycle of a voice slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoiceState {
    /// Slot unused.
    Free,
    /// Key held; ramping to and holding max amplitude.
    Attacked,
    /// Key released while the sustain pedal is down; renders like `Attacked`.
    Sustained,
    /// Key held when the sostenuto pedal went down; latched until the pedal lifts.
    Sostenuto,
    /// Key released while latched by the sostenuto pedal.
    ReleasedSostenuto,
    /// Ramping down at the release-time rate.
    Released,
    /// Stolen; ramping down at the fixed fast slope.
    FastReleased,
}

impl VoiceState {
    /// Anything but `Free`.
    pub fn is_active(self) -> bool {
        self != VoiceState::Free
    }
}

/// Per-block values every voice renders with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockParams {
    /// Host sample rate in Hz.
    pub sample_rate: f64,
    /// Output gain.
    pub volume: f64,
    /// Attack seconds.
    pub attack_time: f64,
    /// Release seconds.
    pub release_time: f64,
}

/// Peak amplitude for a MIDI velocity.
pub fn max_amplitude(velocity: u8) -> f64 {
    0.4 * (velocity.min(127) as f64 / 127.0).powi(3)
}

/// Frequency in Hz of a (possibly fractional) MIDI pitch.
pub fn pitch_to_frequency(pitch: f32) -> f64 {
    440.0 * 2f64.powf((pitch as f64 - 69.0) / 12.0)
}

/// A single voice slot.
#[derive(Clone, Debug)]
pub struct Voice {
    id: NoteId,
    pitch: f32,
    frequency: f64,
    velocity: u8,
    state: VoiceState,
    phase: f64,
    amp: f64,
    max_amp: f64,
    fast_release_slope: f64,
    sequence: u64,
}

impl Voice {
    pub(crate) fn idle() -> Self {
        Self {
            id: NoteId(0),
            pitch: 0.0,
            frequency: 0.0,
            velocity: 0,
            state: VoiceState::Free,
            phase: 0.0,
            amp: 0.0,
            max_amp: 0.0,
            fast_release_slope: 0.0,
            sequence: 0,
        }
    }

    pub(crate) fn start(
        &mut self,
        id: NoteId,
        pitch: f32,
        velocity: u8,
        sample_rate: f64,
        sequence: u64,
    ) {
        let max_amp = max_amplitude(velocity);
        *self = Self {
            id,
            pitch,
            frequency: pitch_to_frequency(pitch),
            velocity,
            state: VoiceState::Attacked,
            phase: 0.0,
            amp: 0.0,
            max_amp,
            fast_release_slope: max_amp / (0.005 * sample_rate),
            sequence,
        };
    }

    /// Note id; meaningless while the slot is free.
    pub fn id(&self) -> NoteId {
        self.id
    }

    /// Lifecycle state.
    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Pitch the note was started with.
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Oscillator frequency in Hz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Note-on velocity.
    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// Current envelope amplitude.
    pub fn amplitude(&self) -> f64 {
        self.amp
    }

    /// Envelope target.
    pub fn max_amplitude(&self) -> f64 {
        self.max_amp
    }

    /// Oscillator phase in radians.
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Allocation order; lower is older.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Key up. Held voices go to `Sustained` when `pedal_down`, otherwise `Released`.
    /// A sostenuto-latched voice stays latched.
    pub(crate) fn release(&mut self, pedal_down: bool) -> bool {
        let next = match (self.state, pedal_down) {
            (VoiceState::Attacked, true) => VoiceState::Sustained,
            (VoiceState::Attacked, false) | (VoiceState::Sustained, false) => VoiceState::Released,
            (VoiceState::Sostenuto, _) => VoiceState::ReleasedSostenuto,
            _ => return false,
        };
        self.state = next;
        true
    }

    /// Release regardless of either pedal.
    pub(crate) fn release_held(&mut self) -> bool {
        match self.state {
            VoiceState::Attacked
            | VoiceState::Sustained
            | VoiceState::Sostenuto
            | VoiceState::ReleasedSostenuto => {
                self.state = VoiceState::Released;
                true
            }
            _ => false,
        }
    }

    /// Sostenuto pedal down: latch a held key.
    pub(crate) fn latch_sostenuto(&mut self) -> bool {
        if self.state == VoiceState::Attacked {
            self.state = VoiceState::Sostenuto;
            true
        } else {
            false
        }
    }

    /// Sostenuto pedal up. A key still down goes back to `Attacked`; a released key
    /// falls to the sustain pedal, or releases when that is up too.
    pub(crate) fn unlatch_sostenuto(&mut self, sustain_down: bool) -> bool {
        let next = match (self.state, sustain_down) {
            (VoiceState::Sostenuto, _) => VoiceState::Attacked,
            (VoiceState::ReleasedSostenuto, true) => VoiceState::Sustained,
            (VoiceState::ReleasedSostenuto, false) => VoiceState::Released,
            _ => return false,
        };
        self.state = next;
        true
    }

    /// Voice is being stolen.
    pub(crate) fn fast_release(&mut self) -> bool {
        match self.state {
            VoiceState::Attacked
            | VoiceState::Sustained
            | VoiceState::Sostenuto
            | VoiceState::ReleasedSostenuto
            | VoiceState::Released => {
                self.state = VoiceState::FastReleased;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn free(&mut self) {
        self.state = VoiceState::Free;
        self.amp = 0.0;
    }

    /// Add this voice into `left` (and `right` when present). Returns the frame at which
    /// a releasing voice reached zero amplitude.
    pub(crate) fn render(
        &mut self,
        block: &BlockParams,
        feed: &SensorFeed,
        left: &mut [f32],
        mut right: Option<&mut [f32]>,
    ) -> Option<usize> {
        let phase_step = self.frequency * TAU / block.sample_rate;
        match self.state {
            VoiceState::Free => None,
            VoiceState::Attacked
            | VoiceState::Sustained
            | VoiceState::Sostenuto
            | VoiceState::ReleasedSostenuto => {
                let up_slope = self.max_amp / (block.sample_rate * block.attack_time);
                for frame in 0..left.len() {
                    if self.amp < self.max_amp {
                        self.amp += up_slope;
                    }
                    if self.amp > self.max_amp {
                        self.amp = self.max_amp;
                    }
                    let out = self.sonify(feed, block.volume);
                    self.phase += phase_step;
                    if self.phase > TAU {
                        self.phase -= TAU;
                    }
                    mix(left, right.as_deref_mut(), frame, out);
                }
                None
            }
            VoiceState::Released | VoiceState::FastReleased => {
                let down_slope = if self.state == VoiceState::Released {
                    self.max_amp / (block.sample_rate * block.release_time)
                } else {
                    self.fast_release_slope
                };
                let mut end_frame = None;
                for frame in 0..left.len() {
                    if self.amp > 0.0 {
                        self.amp = (self.amp - down_slope).max(0.0);
                    } else if end_frame.is_none() {
                        end_frame = Some(frame);
                    }
                    let out = self.sonify(feed, block.volume);
                    // No wrap while releasing: once past 2π the ring index runs off the end.
                    self.phase += phase_step;
                    mix(left, right.as_deref_mut(), frame, out);
                }
                end_frame
            }
        }
    }

    fn sonify(&self, feed: &SensorFeed, volume: f64) -> f32 {
        let index = (self.phase / TAU * feed.capacity() as f64) as usize;
        let sample = feed
            .sample_at(index)
            .map(|value| value.min(OUTLIER_CEILING))
            .unwrap_or(0) as f32;
        let average = feed.average();
        let normalized = (sample - average) / average;
        (normalized as f64 * self.amp * volume) as f32
    }
}

fn mix(left: &mut [f32], right: Option<&mut [f32]>, frame: usize, out: f32) {
    left[frame] += out;
    if let Some(right) = right {
        right[frame] += out;
    }
}
