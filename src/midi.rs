//! The subset of channel-voice MIDI the instrument responds to.

const SUSTAIN_PEDAL: u8 = 64;
const SOSTENUTO_PEDAL: u8 = 66;
const ALL_SOUND_OFF: u8 = 120;
const ALL_NOTES_OFF: u8 = 123;

/// Decoded MIDI message. Channel is ignored; the instrument is monotimbral.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiMessage {
    /// Key down with a non-zero velocity.
    NoteOn {
        /// Key number.
        key: u8,
        /// Velocity 1-127.
        velocity: u8,
    },
    /// Key up, including note-on with velocity 0.
    NoteOff {
        /// Key number.
        key: u8,
    },
    /// CC 64.
    Sustain(bool),
    /// CC 66.
    Sostenuto(bool),
    /// CC 120: silence immediately.
    AllSoundOff,
    /// CC 123: release every note.
    AllNotesOff,
}

impl MidiMessage {
    /// Decode a raw message. Returns `None` for anything the instrument ignores.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        let data1 = *data.first()? & 0x7f;
        let data2 = data.get(1).copied().unwrap_or(0) & 0x7f;
        match status & 0xf0 {
            0x90 if data2 > 0 => Some(MidiMessage::NoteOn {
                key: data1,
                velocity: data2,
            }),
            0x80 | 0x90 => Some(MidiMessage::NoteOff { key: data1 }),
            0xb0 => match data1 {
                SUSTAIN_PEDAL => Some(MidiMessage::Sustain(data2 >= 64)),
                SOSTENUTO_PEDAL => Some(MidiMessage::Sostenuto(data2 >= 64)),
                ALL_SOUND_OFF => Some(MidiMessage::AllSoundOff),
                ALL_NOTES_OFF => Some(MidiMessage::AllNotesOff),
                _ => None,
            },
            _ => None,
        }
    }
}
