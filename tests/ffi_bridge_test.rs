#![cfg(not(feature = "sweep"))]

use std::ptr;

use lidar_synth::{
    RenderArgs, lidar_synth_create, lidar_synth_destroy, lidar_synth_get_parameter,
    lidar_synth_midi, lidar_synth_note_kill, lidar_synth_note_on, lidar_synth_note_release,
    lidar_synth_render, lidar_synth_set_parameter,
};

const SAMPLE_RATE: f64 = 48_000.0;
const BLOCK_FRAMES: u32 = 256;

#[test]
fn bridge_renders_a_note_into_planar_stereo() {
    let handle = unsafe { lidar_synth_create(ptr::null(), SAMPLE_RATE) };
    assert!(!handle.is_null(), "expected instrument handle");

    let instrument = unsafe { &mut *handle };
    let writer = instrument.feed_writer().expect("no ingest without a driver");
    for n in 0..256 {
        writer.push(180 + (n % 16) * 10);
    }

    let id = unsafe { lidar_synth_note_on(handle, 60.0, 120) };
    assert_ne!(id, 0);

    let mut left = vec![0.0f32; BLOCK_FRAMES as usize];
    let mut right = vec![0.0f32; BLOCK_FRAMES as usize];
    let args = RenderArgs {
        left: left.as_mut_ptr(),
        right: right.as_mut_ptr(),
        frames: BLOCK_FRAMES,
    };
    assert_eq!(unsafe { lidar_synth_render(handle, &args) }, 0);
    assert!(left.iter().any(|s| *s != 0.0));
    assert_eq!(left, right);

    assert!(unsafe { lidar_synth_note_release(handle, id) });
    assert!(!unsafe { lidar_synth_note_release(handle, id) });
    assert_eq!(unsafe { lidar_synth_render(handle, &args) }, 0);
    assert!(!unsafe { lidar_synth_note_kill(handle, id) });

    unsafe { lidar_synth_destroy(handle) };
}

#[test]
fn bridge_parameters_round_trip_with_clamping() {
    let handle = unsafe { lidar_synth_create(ptr::null(), SAMPLE_RATE) };
    assert!(!handle.is_null());

    let mut value = -1.0f32;
    assert!(unsafe { lidar_synth_get_parameter(handle, 0, &mut value) });
    assert_eq!(value, 1.0);

    assert!(unsafe { lidar_synth_set_parameter(handle, 1, 0.25) });
    assert!(unsafe { lidar_synth_get_parameter(handle, 1, &mut value) });
    assert_eq!(value, 0.25);

    assert!(unsafe { lidar_synth_set_parameter(handle, 2, 60.0) });
    assert!(unsafe { lidar_synth_get_parameter(handle, 2, &mut value) });
    assert_eq!(value, 5.0);

    assert!(!unsafe { lidar_synth_set_parameter(handle, 3, 0.5) });
    assert!(!unsafe { lidar_synth_get_parameter(handle, 3, &mut value) });

    unsafe { lidar_synth_destroy(handle) };
}

#[test]
fn bridge_midi_and_null_inputs() {
    let handle = unsafe { lidar_synth_create(ptr::null(), SAMPLE_RATE) };
    assert!(!handle.is_null());

    let note_on = [0x90u8, 64, 100];
    assert!(unsafe { lidar_synth_midi(handle, note_on.as_ptr(), note_on.len()) });
    assert_eq!(unsafe { &*handle }.status().active_voices, 1);

    let pitch_bend = [0xe0u8, 0, 64];
    assert!(!unsafe { lidar_synth_midi(handle, pitch_bend.as_ptr(), pitch_bend.len()) });

    let all_sound_off = [0xb0u8, 120, 0];
    assert!(unsafe { lidar_synth_midi(handle, all_sound_off.as_ptr(), all_sound_off.len()) });
    assert_eq!(unsafe { &*handle }.status().active_voices, 0);

    let mut left = vec![0.0f32; 8];
    let null_left = RenderArgs {
        left: ptr::null_mut(),
        right: left.as_mut_ptr(),
        frames: 8,
    };
    assert_eq!(unsafe { lidar_synth_render(handle, &null_left) }, -1);
    assert_eq!(unsafe { lidar_synth_render(ptr::null_mut(), &null_left) }, -1);
    assert_eq!(unsafe { lidar_synth_render(handle, ptr::null()) }, -1);
    assert_eq!(unsafe { lidar_synth_note_on(ptr::null_mut(), 60.0, 100) }, 0);

    unsafe { lidar_synth_destroy(handle) };
    unsafe { lidar_synth_destroy(ptr::null_mut()) };
}

#[cfg(target_os = "macos")]
#[test]
fn bridge_buffer_list_accepts_mono_and_rejects_interleaved() {
    use coreaudio_sys::{AudioBuffer, AudioBufferList};
    use lidar_synth::lidar_synth_render_buffer_list;

    let handle = unsafe { lidar_synth_create(ptr::null(), SAMPLE_RATE) };
    assert!(!handle.is_null());
    let writer = unsafe { &mut *handle }.feed_writer().expect("writer");
    for n in 0..128 {
        writer.push(200 + n);
    }
    unsafe { lidar_synth_note_on(handle, 69.0, 127) };

    let mut output = vec![0.0f32; BLOCK_FRAMES as usize];
    let mut list = AudioBufferList {
        mNumberBuffers: 1,
        mBuffers: [AudioBuffer {
            mNumberChannels: 1,
            mDataByteSize: (output.len() * std::mem::size_of::<f32>()) as u32,
            mData: output.as_mut_ptr() as *mut _,
        }],
    };
    assert_eq!(unsafe { lidar_synth_render_buffer_list(handle, &mut list, BLOCK_FRAMES) }, 0);
    assert!(output.iter().any(|s| *s != 0.0));

    list.mBuffers[0].mNumberChannels = 2;
    assert_eq!(unsafe { lidar_synth_render_buffer_list(handle, &mut list, BLOCK_FRAMES) }, -1);

    unsafe { lidar_synth_destroy(handle) };
}
