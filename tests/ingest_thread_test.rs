use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use lidar_synth::ingest::IngestStatus;
use lidar_synth::sensor::{ReplayDevice, Scan, SensorError};
use lidar_synth::{Instrument, InstrumentConfig, SynthError};

const WAIT: Duration = Duration::from_secs(5);

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn replayed_scans_fill_the_ring_then_fault_on_exhaustion() {
    let scans = vec![
        Scan::from_distances(0..100),
        Scan::from_distances(100..200),
    ];
    let device = ReplayDevice::once(scans);
    let released = device.released_flag();
    let instrument =
        Instrument::with_sensor(InstrumentConfig::default(), move |_path| Ok(device))
            .expect("spawn ingest");

    assert!(wait_for(|| matches!(
        instrument.status().ingest,
        Some(IngestStatus::Faulted(_))
    )));
    let status = instrument.status();
    assert_eq!(status.samples_received, 200);
    assert_eq!(status.ring_fill, 1.0);
    assert_eq!(
        instrument.feed().ring().snapshot(),
        (72..200).collect::<Vec<i32>>()
    );
    assert!(status.moving_average > 150.0 && status.moving_average < 200.0);
    assert!(released.load(Ordering::Acquire));
}

#[test]
fn open_failure_faults_only_the_ingest_thread() {
    let instrument = Instrument::with_sensor(
        InstrumentConfig {
            device_path: "/dev/missing".to_string(),
            ..InstrumentConfig::default()
        },
        |path| {
            Err::<ReplayDevice, _>(SensorError::Open {
                path: path.to_string(),
                reason: "no such device".to_string(),
            })
        },
    )
    .expect("spawn ingest");

    assert!(wait_for(|| instrument.ingest().is_some_and(|h| h.is_finished())));
    match instrument.status().ingest {
        Some(IngestStatus::Faulted(reason)) => assert!(reason.contains("/dev/missing")),
        other => panic!("expected fault, got {other:?}"),
    }
    assert_eq!(instrument.status().samples_received, 0);
}

#[test]
fn dropping_the_instrument_stops_a_running_sensor() {
    let device = ReplayDevice::cycling(vec![Scan::from_distances([300, 310, 320])])
        .with_interval(Duration::from_millis(1));
    let released = device.released_flag();
    let instrument =
        Instrument::with_sensor(InstrumentConfig::default(), move |_path| Ok(device))
            .expect("spawn ingest");

    assert!(wait_for(|| instrument.status().samples_received >= 30));
    assert_eq!(instrument.status().ingest, Some(IngestStatus::Running));
    drop(instrument);
    assert!(wait_for(|| released.load(Ordering::Acquire)));
}

#[test]
fn ingest_starts_once() {
    let mut instrument = Instrument::new(InstrumentConfig::default());
    instrument
        .start_ingest(|_path| Ok(ReplayDevice::once(Vec::new())))
        .expect("first start");
    assert!(instrument.feed_writer().is_none());
    let again = instrument.start_ingest(|_path| Ok(ReplayDevice::once(Vec::new())));
    assert!(matches!(again, Err(SynthError::IngestAlreadyStarted)));
}

#[test]
fn render_runs_while_the_ingest_thread_writes() {
    use lidar_synth::OutputBuffer;

    let scans: Vec<Scan> = (0..8)
        .map(|n| Scan::from_distances((0..32).map(move |i| 200 + n * 20 + i)))
        .collect();
    let device = ReplayDevice::cycling(scans).with_interval(Duration::from_micros(200));
    let mut instrument =
        Instrument::with_sensor(InstrumentConfig::default(), move |_path| Ok(device))
            .expect("spawn ingest");
    assert!(wait_for(|| instrument.feed().ring().len() == 128));

    for key in [48u8, 55, 60, 64, 67] {
        instrument.note_on(key as f32, 110);
    }
    let mut left = vec![0.0f32; 256];
    let mut right = vec![0.0f32; 256];
    let mut advanced = 0;
    let mut last_written = instrument.status().samples_received;
    for _ in 0..400 {
        let mut out = OutputBuffer::stereo(&mut left, &mut right).expect("equal lengths");
        instrument.render(&mut out);
        assert!(left.iter().chain(&right).all(|s| s.is_finite()));
        let written = instrument.status().samples_received;
        assert!(written >= last_written);
        if written > last_written {
            advanced += 1;
        }
        last_written = written;
        std::thread::sleep(Duration::from_micros(250));
    }
    assert!(advanced > 10, "feed advanced during only {advanced} blocks");
    assert!(left.iter().any(|s| *s != 0.0));
    assert_eq!(instrument.status().ingest, Some(IngestStatus::Running));
}
