//! Fixed pool of voices with note stealing.

use tracing::{debug, trace};

use crate::feed::SensorFeed;
use crate::voice::{BlockParams, NoteId, Voice, VoiceState};

/// Voice slots allocated up front.
pub const DEFAULT_VOICE_SLOTS: usize = 12;
/// Voices allowed to sound before a note-on steals one.
pub const DEFAULT_MAX_ACTIVE: usize = 8;

/// Buckets searched, in order, when a note-on exceeds the active limit. Fast-released
/// voices are already on their way out and are left alone.
const SOFT_STEAL_ORDER: [VoiceState; 5] = [
    VoiceState::Released,
    VoiceState::Sustained,
    VoiceState::ReleasedSostenuto,
    VoiceState::Sostenuto,
    VoiceState::Attacked,
];

/// Buckets searched, in order, when every slot is taken.
const HARD_STEAL_ORDER: [VoiceState; 6] = [
    VoiceState::FastReleased,
    VoiceState::Released,
    VoiceState::Sustained,
    VoiceState::ReleasedSostenuto,
    VoiceState::Sostenuto,
    VoiceState::Attacked,
];

/// A voice that finished its release during a render call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteEnded {
    /// Note that ended.
    pub id: NoteId,
    /// Frame within the rendered block at which amplitude reached zero.
    pub frame: usize,
}

/// Owns every voice slot and drives their lifecycle.
pub struct VoicePool {
    voices: Vec<Voice>,
    max_active: usize,
    sample_rate: f64,
    next_id: u32,
    next_sequence: u64,
    pedal_down: bool,
    sostenuto_down: bool,
    ended: Vec<NoteEnded>,
    end_report_limit: usize,
    dropped_end_reports: usize,
}

impl VoicePool {
    /// Pool with `slots` voices, at most `max_active` sounding before stealing starts.
    pub fn new(slots: usize, max_active: usize, sample_rate: f64) -> Self {
        let slots = slots.max(1);
        Self {
            voices: vec![Voice::idle(); slots],
            max_active: max_active.clamp(1, slots),
            sample_rate,
            next_id: 1,
            next_sequence: 0,
            pedal_down: false,
            sostenuto_down: false,
            // A slot can end, be restarted and end again inside one block.
            ended: Vec::with_capacity(slots * 2),
            end_report_limit: slots * 2,
            dropped_end_reports: 0,
        }
    }

    /// All slots, free ones included.
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Active voice with `id`.
    pub fn voice(&self, id: NoteId) -> Option<&Voice> {
        self.voices
            .iter()
            .find(|v| v.state().is_active() && v.id() == id)
    }

    fn voice_mut(&mut self, id: NoteId) -> Option<&mut Voice> {
        self.voices
            .iter_mut()
            .find(|v| v.state().is_active() && v.id() == id)
    }

    /// Voices in any state but `Free`.
    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.state().is_active()).count()
    }

    /// Active-voice limit.
    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Sustain pedal state.
    pub fn pedal_down(&self) -> bool {
        self.pedal_down
    }

    /// Notes that ended since the last [`VoicePool::begin_block`].
    pub fn ended(&self) -> &[NoteEnded] {
        &self.ended
    }

    /// Start a note. When the active limit is reached the lowest-priority voice is
    /// fast-released first; when no slot is free at all, one is killed and reused.
    pub fn note_on(&mut self, pitch: f32, velocity: u8) -> NoteId {
        if self.active_count() >= self.max_active {
            if let Some(index) = self.pick_victim(&SOFT_STEAL_ORDER) {
                let victim = &mut self.voices[index];
                debug!(
                    id = victim.id().raw(),
                    state = ?victim.state(),
                    "fast-releasing stolen voice"
                );
                victim.fast_release();
            }
        }

        let slot = match self.voices.iter().position(|v| !v.state().is_active()) {
            Some(slot) => slot,
            None => {
                let index = self.pick_victim(&HARD_STEAL_ORDER).unwrap_or(0);
                debug!(id = self.voices[index].id().raw(), "killing voice to free a slot");
                self.voices[index].free();
                index
            }
        };

        let id = NoteId::new(self.next_id);
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.voices[slot].start(id, pitch, velocity, self.sample_rate, sequence);
        debug!(id = id.raw(), pitch, velocity, slot, "note on");
        id
    }

    /// Lowest-priority voice in the first non-empty bucket: quietest, then oldest.
    fn pick_victim(&self, order: &[VoiceState]) -> Option<usize> {
        order.iter().find_map(|&state| {
            self.voices
                .iter()
                .enumerate()
                .filter(|(_, v)| v.state() == state)
                .min_by(|(_, a), (_, b)| {
                    a.amplitude()
                        .total_cmp(&b.amplitude())
                        .then(a.sequence().cmp(&b.sequence()))
                })
                .map(|(index, _)| index)
        })
    }

    /// Key up for one note. Held by the pedal when it is down.
    pub fn release(&mut self, id: NoteId) -> bool {
        let pedal_down = self.pedal_down;
        self.voice_mut(id)
            .map(|voice| voice.release(pedal_down))
            .unwrap_or(false)
    }

    /// Steal one note: ramp it out at the fixed fast slope.
    pub fn fast_release(&mut self, id: NoteId) -> bool {
        self.voice_mut(id)
            .map(|voice| voice.fast_release())
            .unwrap_or(false)
    }

    /// Drop a note immediately without reporting an end.
    pub fn kill(&mut self, id: NoteId) -> bool {
        match self.voice_mut(id) {
            Some(voice) => {
                voice.free();
                true
            }
            None => false,
        }
    }

    /// Key up for every held voice started at `key`. Returns how many changed state.
    pub fn release_key(&mut self, key: u8) -> usize {
        let pedal_down = self.pedal_down;
        self.voices
            .iter_mut()
            .filter(|v| {
                matches!(v.state(), VoiceState::Attacked | VoiceState::Sostenuto)
                    && v.pitch() == key as f32
            })
            .map(|v| v.release(pedal_down))
            .filter(|changed| *changed)
            .count()
    }

    /// Sustain pedal. Lifting it releases every voice it was holding.
    pub fn set_sustain(&mut self, down: bool) {
        self.pedal_down = down;
        if !down {
            for voice in self
                .voices
                .iter_mut()
                .filter(|v| v.state() == VoiceState::Sustained)
            {
                voice.release(false);
            }
        }
    }

    /// Sostenuto pedal. Going down latches the keys held at that moment; notes started
    /// later are unaffected. Lifting it lets latched keys go, subject to the sustain pedal.
    pub fn set_sostenuto(&mut self, down: bool) {
        if down == self.sostenuto_down {
            return;
        }
        self.sostenuto_down = down;
        let sustain_down = self.pedal_down;
        for voice in &mut self.voices {
            if down {
                voice.latch_sostenuto();
            } else {
                voice.unlatch_sostenuto(sustain_down);
            }
        }
    }

    /// Whether the sostenuto pedal is down.
    pub fn sostenuto_down(&self) -> bool {
        self.sostenuto_down
    }

    /// Release every held, sustained or latched voice, ignoring both pedals.
    pub fn release_all(&mut self) {
        for voice in &mut self.voices {
            voice.release_held();
        }
    }

    /// Silence everything at once.
    pub fn kill_all(&mut self) {
        for voice in &mut self.voices {
            voice.free();
        }
    }

    /// Forget end reports from the previous block.
    pub fn begin_block(&mut self) {
        self.ended.clear();
        self.dropped_end_reports = 0;
    }

    #[cfg(test)]
    pub(crate) fn end_report_capacity(&self) -> usize {
        self.ended.capacity()
    }

    /// End reports that did not fit the preallocated buffer during the last block.
    /// The voices still ended and were freed.
    pub fn dropped_end_reports(&self) -> usize {
        self.dropped_end_reports
    }

    /// Render every active voice into the given slices, which start at `frame_offset`
    /// within the host block. Voices that finish are freed and reported in
    /// [`VoicePool::ended`].
    pub fn render(
        &mut self,
        block: &BlockParams,
        feed: &SensorFeed,
        left: &mut [f32],
        mut right: Option<&mut [f32]>,
        frame_offset: usize,
    ) {
        for voice in self.voices.iter_mut().filter(|v| v.state().is_active()) {
            if let Some(end) = voice.render(block, feed, left, right.as_deref_mut()) {
                let ended = NoteEnded {
                    id: voice.id(),
                    frame: frame_offset + end,
                };
                trace!(id = ended.id.raw(), frame = ended.frame, "note ended");
                voice.free();
                if self.ended.len() < self.end_report_limit {
                    self.ended.push(ended);
                } else {
                    self.dropped_end_reports += 1;
                }
            }
        }
    }
}
