use crate::midi::MidiMessage;
use crate::params::ParameterId;
use crate::voice::max_amplitude;
use crate::{Instrument, InstrumentConfig, OutputBuffer};

const SAMPLE_RATE: f64 = 48_000.0;
const BLOCK_FRAMES: usize = 256;

fn instrument_with_terrain() -> Instrument {
    let mut instrument = Instrument::new(InstrumentConfig {
        sample_rate: SAMPLE_RATE,
        ..InstrumentConfig::default()
    });
    let writer = instrument.feed_writer().expect("writer before ingest");
    for n in 0..512 {
        writer.push(if n % 2 == 0 { 200 } else { 400 });
    }
    instrument
}

fn render_block(instrument: &mut Instrument) -> Vec<f32> {
    let mut left = vec![0.0f32; BLOCK_FRAMES];
    let mut out = OutputBuffer::mono(&mut left);
    assert_eq!(instrument.render(&mut out), BLOCK_FRAMES);
    left
}

/// First frame of a default-length release at which amplitude reaches zero, stepping
/// exactly as a voice does.
fn release_end_frame(velocity: u8) -> usize {
    let max = max_amplitude(velocity);
    let slope = max / (SAMPLE_RATE * ParameterId::ReleaseTime.info().default as f64);
    let mut amp = max;
    let mut frames = 0;
    while amp > 0.0 {
        amp = (amp - slope).max(0.0);
        frames += 1;
    }
    frames
}

fn peak(block: &[f32]) -> f32 {
    block.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

#[test]
fn selftest_note_sounds_then_ends_after_release() {
    let mut instrument = instrument_with_terrain();
    let id = instrument.note_on(69.0, 127);

    let mut sounding = Vec::new();
    for _ in 0..4 {
        sounding.extend(render_block(&mut instrument));
    }
    assert!(sounding.iter().all(|s| s.is_finite()));
    let level = peak(&sounding);
    assert!(level > 0.01, "note is silent: {level}");
    assert!(level < 0.4, "note is louder than its envelope allows: {level}");
    assert_eq!(instrument.status().active_voices, 1);

    assert!(instrument.note_release(id));
    let _ = render_block(&mut instrument);
    let ended = instrument.ended_notes();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].id, id);
    assert_eq!(ended[0].frame, release_end_frame(127));

    let tail = render_block(&mut instrument);
    assert_eq!(peak(&tail), 0.0);
    assert_eq!(instrument.status().active_voices, 0);
}

#[test]
fn selftest_events_apply_at_their_frame() {
    let mut instrument = instrument_with_terrain();
    let mut left = vec![0.0f32; BLOCK_FRAMES];
    let mut out = OutputBuffer::mono(&mut left);
    instrument.process(
        &[(100, MidiMessage::NoteOn { key: 69, velocity: 100 })],
        &mut out,
    );
    assert_eq!(peak(&left[..100]), 0.0);
    assert!(peak(&left[100..]) > 0.0);

    let mut left = vec![0.0f32; BLOCK_FRAMES];
    let mut out = OutputBuffer::mono(&mut left);
    instrument.process(&[(64, MidiMessage::NoteOff { key: 69 })], &mut out);
    let ended = instrument.ended_notes();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].frame, 64 + release_end_frame(100));
    assert_eq!(peak(&left[120..]), 0.0);
}

#[test]
fn selftest_stereo_channels_match_and_volume_scales() {
    let mut instrument = instrument_with_terrain();
    instrument.note_on(57.0, 127);
    let _ = render_block(&mut instrument);

    let mut left = vec![0.0f32; BLOCK_FRAMES];
    let mut right = vec![0.0f32; BLOCK_FRAMES];
    let mut out = OutputBuffer::stereo(&mut left, &mut right).expect("equal lengths");
    instrument.render(&mut out);
    assert_eq!(left, right);
    let full = peak(&left);

    instrument.set_parameter(ParameterId::Volume, 0.0);
    let muted = render_block(&mut instrument);
    assert!(full > 0.0);
    assert_eq!(peak(&muted), 0.0);
}

#[test]
fn selftest_all_sound_off_silences_immediately() {
    let mut instrument = instrument_with_terrain();
    for key in [60u8, 64, 67] {
        instrument.handle_midi(MidiMessage::NoteOn { key, velocity: 90 });
    }
    let _ = render_block(&mut instrument);
    assert_eq!(instrument.status().active_voices, 3);

    instrument.handle_midi(MidiMessage::AllSoundOff);
    assert_eq!(instrument.status().active_voices, 0);
    assert_eq!(peak(&render_block(&mut instrument)), 0.0);
    assert!(instrument.ended_notes().is_empty());
}

#[test]
fn selftest_busy_block_keeps_end_reports_preallocated() {
    let mut instrument = instrument_with_terrain();
    let capacity = instrument.voices().end_report_capacity();
    let events: Vec<(usize, MidiMessage)> = (0..40)
        .flat_map(|n| {
            [
                (n * 100, MidiMessage::NoteOn { key: 60, velocity: 100 }),
                (n * 100 + 50, MidiMessage::NoteOff { key: 60 }),
            ]
        })
        .collect();
    let mut left = vec![0.0f32; 4096];
    let mut out = OutputBuffer::mono(&mut left);
    instrument.process(&events, &mut out);

    let pool = instrument.voices();
    assert_eq!(pool.end_report_capacity(), capacity);
    assert_eq!(pool.ended().len() + pool.dropped_end_reports(), 40);
    assert_eq!(pool.active_count(), 0);
    assert!(left.iter().all(|s| s.is_finite()));
}

#[test]
fn selftest_sostenuto_pedal_over_midi() {
    let mut instrument = instrument_with_terrain();
    instrument.handle_midi(MidiMessage::NoteOn { key: 60, velocity: 100 });
    instrument.handle_midi(MidiMessage::Sostenuto(true));
    instrument.handle_midi(MidiMessage::NoteOn { key: 67, velocity: 100 });
    instrument.handle_midi(MidiMessage::NoteOff { key: 60 });
    instrument.handle_midi(MidiMessage::NoteOff { key: 67 });
    let _ = render_block(&mut instrument);
    assert_eq!(instrument.status().active_voices, 1);

    instrument.handle_midi(MidiMessage::Sostenuto(false));
    let _ = render_block(&mut instrument);
    assert_eq!(instrument.status().active_voices, 0);
}
