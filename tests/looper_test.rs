//! End-to-end looper scenarios driven through the command ring and the
//! audio callback, the way a host would drive the engine.

use looper_backend::audio::constants::{MAX_PLAYBACK_SPEED, MAX_UNDO_LAYERS};
use looper_backend::{AudioEvent, Command, Engine, LooperState, RawMidiMessage};

const SAMPLE_RATE: u32 = 48000;
const BLOCK: usize = 512;
const CHANNELS: usize = 2;

struct Harness {
    engine: Engine,
    command_tx: rtrb::Producer<Command>,
    event_rx: rtrb::Consumer<AudioEvent>,
    midi_tx: rtrb::Producer<RawMidiMessage>,
    input_phase: u64,
    output: Vec<f32>,
}

impl Harness {
    fn new(num_tracks: usize, max_seconds: usize) -> Self {
        let (command_tx, command_rx) = rtrb::RingBuffer::new(1024);
        let (event_tx, event_rx) = rtrb::RingBuffer::new(4096);
        let (midi_tx, midi_rx) = rtrb::RingBuffer::new(64);

        let mut engine = Engine::new(command_rx, event_tx);
        engine
            .prepare(SAMPLE_RATE, BLOCK, CHANNELS, num_tracks, max_seconds, MAX_UNDO_LAYERS)
            .unwrap();
        engine.set_midi_rx(midi_rx);

        Self {
            engine,
            command_tx,
            event_rx,
            midi_tx,
            input_phase: 0,
            output: vec![0.0; BLOCK * CHANNELS],
        }
    }

    fn send(&mut self, cmd: Command) {
        self.command_tx.push(cmd).unwrap();
    }

    fn send_midi(&mut self, data: [u8; 3]) {
        self.midi_tx.push(RawMidiMessage::new(data)).unwrap();
    }

    /// Run one block with a sine input at `freq`; returns the output block.
    fn process_sine(&mut self, freq: f32, frames: usize) -> &[f32] {
        let mut input = vec![0.0f32; frames * CHANNELS];
        for frame in 0..frames {
            let t = (self.input_phase + frame as u64) as f32 / SAMPLE_RATE as f32;
            let sample = 0.5 * (2.0 * std::f32::consts::PI * freq * t).sin();
            for ch in 0..CHANNELS {
                input[frame * CHANNELS + ch] = sample;
            }
        }
        self.input_phase += frames as u64;
        self.output.resize(frames * CHANNELS, 0.0);
        self.engine.process(&input, &mut self.output[..frames * CHANNELS]);
        &self.output[..frames * CHANNELS]
    }

    fn process_silence(&mut self, frames: usize) -> &[f32] {
        let input = vec![0.0f32; frames * CHANNELS];
        self.output.resize(frames * CHANNELS, 0.0);
        self.engine.process(&input, &mut self.output[..frames * CHANNELS]);
        &self.output[..frames * CHANNELS]
    }

    /// Feed exactly `total` frames of sine input.
    fn feed_sine(&mut self, freq: f32, total: usize) {
        let mut remaining = total;
        while remaining > 0 {
            let frames = remaining.min(BLOCK);
            self.process_sine(freq, frames);
            remaining -= frames;
        }
    }

    fn drain_events(&mut self) -> Vec<AudioEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.pop() {
            events.push(event);
        }
        events
    }

    fn sine_at(&self, freq: f32, frame: u64) -> f32 {
        let t = frame as f32 / SAMPLE_RATE as f32;
        0.5 * (2.0 * std::f32::consts::PI * freq * t).sin()
    }
}

fn rms(samples: &[f32]) -> f32 {
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

#[test]
fn test_invalid_configuration_rejected() {
    let (_tx, command_rx) = rtrb::RingBuffer::<Command>::new(16);
    let (event_tx, _rx) = rtrb::RingBuffer::<AudioEvent>::new(16);
    let mut engine = Engine::new(command_rx, event_tx);
    assert!(engine.prepare(0, BLOCK, CHANNELS, 1, 10, 5).is_err());
    assert!(engine.prepare(SAMPLE_RATE, 0, CHANNELS, 1, 10, 5).is_err());
    assert!(engine.prepare(SAMPLE_RATE, BLOCK, CHANNELS, 0, 10, 5).is_err());
    assert_eq!(engine.state(), LooperState::Idle);
}

#[test]
fn test_basic_record_and_play() {
    let mut h = Harness::new(1, 10);
    const LOOP_FRAMES: usize = 480000;

    h.send(Command::ToggleRecord);
    h.feed_sine(440.0, LOOP_FRAMES);
    assert_eq!(h.engine.state(), LooperState::Recording);

    h.send(Command::Stop);
    h.process_silence(BLOCK);

    assert_eq!(h.engine.state(), LooperState::Playing);
    assert_eq!(h.engine.track(0).unwrap().length(), LOOP_FRAMES);

    // Playback RMS over one full loop within 1% of the recorded input RMS
    let mut playback = Vec::with_capacity(LOOP_FRAMES);
    let mut remaining = LOOP_FRAMES;
    while remaining > 0 {
        let frames = remaining.min(BLOCK);
        let out = h.process_silence(frames);
        for frame in 0..frames {
            playback.push(out[frame * CHANNELS]);
        }
        remaining -= frames;
    }
    let expected = 0.5 / 2.0f32.sqrt();
    let actual = rms(&playback);
    assert!(
        (actual - expected).abs() / expected < 0.01,
        "playback RMS {actual} vs recorded {expected}"
    );
}

#[test]
fn test_overdub_then_undo_restores_first_layer() {
    let mut h = Harness::new(1, 10);
    const LOOP_FRAMES: usize = 480000;

    h.send(Command::ToggleRecord);
    h.feed_sine(440.0, LOOP_FRAMES);
    h.send(Command::Stop);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.state(), LooperState::Playing);

    // Play the rest of the first loop pass so the cursor sits back at the
    // loop start, then overdub one exact pass of 880 Hz with its phase
    // restarted to line up with the loop
    let mut remaining = LOOP_FRAMES - BLOCK;
    while remaining > 0 {
        let frames = remaining.min(BLOCK);
        h.process_silence(frames);
        remaining -= frames;
    }
    assert_eq!(h.engine.track(0).unwrap().read_position(), 0);
    h.input_phase = 0;
    h.send(Command::ToggleRecord);
    h.feed_sine(880.0, LOOP_FRAMES);
    assert_eq!(h.engine.state(), LooperState::Overdubbing);
    h.send(Command::ToggleRecord);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.state(), LooperState::Playing);

    // Interior samples hold both layers (the seam itself is crossfaded)
    let track = h.engine.track(0).unwrap();
    for &frame in &[1000usize, 100_000, 250_000, 400_000] {
        let expected = h.sine_at(440.0, frame as u64) + h.sine_at(880.0, frame as u64);
        let actual = track.buffer().channel(0)[frame];
        assert!(
            (actual - expected).abs() < 1e-5,
            "frame {frame}: {actual} vs {expected}"
        );
    }

    h.send(Command::Undo(0));
    h.process_silence(BLOCK);
    let track = h.engine.track(0).unwrap();
    for &frame in &[1000usize, 100_000, 250_000, 400_000] {
        let expected = h.sine_at(440.0, frame as u64);
        let actual = track.buffer().channel(0)[frame];
        assert!(
            (actual - expected).abs() < 1e-5,
            "after undo, frame {frame}: {actual} vs {expected}"
        );
    }

    h.send(Command::Redo(0));
    h.process_silence(BLOCK);
    let track = h.engine.track(0).unwrap();
    let frame = 100_000usize;
    let expected = h.sine_at(440.0, frame as u64) + h.sine_at(880.0, frame as u64);
    assert!((track.buffer().channel(0)[frame] - expected).abs() < 1e-5);
}

#[test]
fn test_variable_speed_half_rate_wraps_once() {
    let mut h = Harness::new(1, 10);
    const LOOP_FRAMES: usize = 48000;

    h.send(Command::ToggleRecord);
    h.feed_sine(440.0, LOOP_FRAMES);
    h.send(Command::Stop);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.track(0).unwrap().length(), LOOP_FRAMES);

    h.send(Command::TogglePitchLock(0));
    h.send(Command::SetPlaybackSpeed(0, 0.5));
    h.process_silence(BLOCK);
    h.drain_events();

    // 48000 output frames at 0.5x advance the read cursor by ~24000 without
    // wrapping. One block was already processed above.
    let mut produced = BLOCK;
    while produced < LOOP_FRAMES {
        let frames = (LOOP_FRAMES - produced).min(BLOCK);
        h.process_silence(frames);
        produced += frames;
    }
    let read = h.engine.track(0).unwrap().read_position() as f64;
    assert!(
        (read - 24000.0).abs() <= BLOCK as f64,
        "read cursor at {read}, expected ~24000"
    );
    let wraps = h
        .drain_events()
        .iter()
        .filter(|e| matches!(e, AudioEvent::LoopWrapped(0, _)))
        .count();
    assert_eq!(wraps, 0);

    // The next 48000 output frames wrap exactly once
    let mut produced = 0;
    while produced < LOOP_FRAMES {
        let frames = (LOOP_FRAMES - produced).min(BLOCK);
        h.process_silence(frames);
        produced += frames;
    }
    let wraps = h
        .drain_events()
        .iter()
        .filter(|e| matches!(e, AudioEvent::LoopWrapped(0, _)))
        .count();
    assert_eq!(wraps, 1);
}

#[test]
fn test_multi_track_sync_quantizes_second_track() {
    let mut h = Harness::new(2, 10);
    const MASTER_FRAMES: usize = 96000;

    h.send(Command::ToggleSinglePlayMode); // multi-track play
    h.send(Command::ToggleRecord);
    h.feed_sine(220.0, MASTER_FRAMES);
    h.send(Command::Stop);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.track(0).unwrap().length(), MASTER_FRAMES);
    assert_eq!(h.engine.state(), LooperState::Playing);

    h.send(Command::ToggleSyncTrack(0));

    // Arbitrary phase into the master loop
    h.feed_sine(0.0, BLOCK * 37);

    h.send(Command::SelectTrack(1));
    h.send(Command::ToggleRecord);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.state(), LooperState::PendingTrackChange);

    // Run until the switch lands at the master's wrap and recording starts
    let mut guard = 0;
    while h.engine.state() != LooperState::Recording && guard < 400 {
        h.process_sine(440.0, BLOCK);
        guard += 1;
    }
    assert_eq!(h.engine.state(), LooperState::Recording);
    assert_eq!(h.engine.active_track_index(), 1);

    // Record for roughly 1.6 master loops, then stop: the commit defers to
    // the master's next wrap and the length quantizes to its grid
    h.feed_sine(440.0, MASTER_FRAMES + MASTER_FRAMES / 2 + 12345);
    h.send(Command::Stop);
    let mut guard = 0;
    while h.engine.state() == LooperState::Recording && guard < 400 {
        h.process_sine(440.0, BLOCK);
        guard += 1;
    }
    assert_eq!(h.engine.state(), LooperState::Playing);

    let length = h.engine.track(1).unwrap().length();
    assert!(length > 0);
    assert_eq!(
        length % MASTER_FRAMES,
        0,
        "track 1 length {length} is not a multiple of {MASTER_FRAMES}"
    );
}

#[test]
fn test_midi_note_and_cc_dispatch() {
    let mut h = Harness::new(2, 10);

    // Note 60 toggles recording
    h.send_midi([0x90, 60, 100]);
    h.process_sine(440.0, BLOCK);
    assert_eq!(h.engine.state(), LooperState::Recording);

    // CC 1 at full value pushes playback speed to the maximum
    h.send_midi([0xB0, 1, 127]);
    h.process_sine(440.0, BLOCK);
    assert_eq!(h.engine.track(0).unwrap().playback_speed(), MAX_PLAYBACK_SPEED);

    // Note 60 again stops and finalizes
    h.send_midi([0x90, 60, 100]);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.state(), LooperState::Playing);
    assert!(h.engine.track(0).unwrap().length() > 0);
}

#[test]
fn test_midi_learn_rebinds_command() {
    let mut h = Harness::new(1, 10);
    use looper_backend::audio::midi_map::{MidiLearnTarget, MidiNoteCommand};

    h.send(Command::StartMidiLearn(MidiLearnTarget::Note(MidiNoteCommand::ToggleRecord)));
    h.process_silence(BLOCK);

    // The learned note must not trigger the command it is being bound to
    h.send_midi([0x90, 36, 100]);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.state(), LooperState::Idle);
    let learned = h
        .drain_events()
        .iter()
        .any(|e| matches!(e, AudioEvent::MidiMappingLearned(_, 36)));
    assert!(learned);

    // New binding works, old one is gone
    h.send_midi([0x90, 36, 100]);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.state(), LooperState::Recording);
    h.send_midi([0x90, 36, 100]);
    h.process_silence(BLOCK);
    h.send_midi([0x90, 60, 100]);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.state(), LooperState::Playing);
}

#[test]
fn test_all_tracks_muted_is_exact_silence() {
    let mut h = Harness::new(2, 10);

    h.send(Command::ToggleSinglePlayMode);
    h.send(Command::ToggleRecord);
    h.feed_sine(440.0, 48000);
    h.send(Command::Stop);
    h.process_silence(BLOCK);

    h.send(Command::ToggleMute(0));
    h.send(Command::ToggleMute(1));
    h.process_silence(BLOCK);

    let out = h.process_silence(BLOCK);
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn test_mute_cycle_restores_volume() {
    let mut h = Harness::new(1, 10);
    h.send(Command::SetTrackVolume(0, 0.65));
    h.send(Command::ToggleMute(0));
    h.send(Command::ToggleMute(0));
    h.process_silence(BLOCK);
    assert!((h.engine.track(0).unwrap().track_volume() - 0.65).abs() < 1e-6);
}

#[test]
fn test_record_to_capacity_stays_valid() {
    // One second of capacity; record one block short, exactly at, and one
    // block past the preallocated buffer
    for extra in [-1i64, 0, 1] {
        let mut h = Harness::new(1, 1);
        let capacity = h.engine.track(0).unwrap().capacity_frames();
        let frames = (capacity as i64 + extra * BLOCK as i64) as usize;

        h.send(Command::ToggleRecord);
        h.feed_sine(440.0, frames);
        h.send(Command::Stop);
        h.process_silence(BLOCK);

        assert_eq!(h.engine.state(), LooperState::Playing, "extra={extra}");
        let length = h.engine.track(0).unwrap().length();
        assert!(length > 0 && length <= capacity, "extra={extra}, length={length}");
    }
}

#[test]
fn test_speed_zero_clamps_instead_of_freezing() {
    let mut h = Harness::new(1, 10);
    h.send(Command::ToggleRecord);
    h.feed_sine(440.0, 48000);
    h.send(Command::Stop);
    h.process_silence(BLOCK);

    h.send(Command::SetPlaybackSpeed(0, 0.0));
    h.process_silence(BLOCK);
    let before = h.engine.track(0).unwrap().read_position();
    h.process_silence(BLOCK);
    let after = h.engine.track(0).unwrap().read_position();
    assert_ne!(before, after, "playback must keep moving at the clamped speed");
}

#[test]
fn test_export_clear_import_round_trip() {
    let mut h = Harness::new(1, 10);
    const LOOP_FRAMES: usize = 48000;

    let (command_tx, command_rx) = rtrb::RingBuffer::new(16);
    let (event_tx, event_rx) = rtrb::RingBuffer::new(16);
    // Unused second pair; the controller rides on the harness engine
    drop((command_rx, event_tx));
    let mut controller = h.engine.controller(command_tx, event_rx);

    h.send(Command::ToggleRecord);
    h.feed_sine(440.0, LOOP_FRAMES);
    h.send(Command::Stop);
    h.process_silence(BLOCK);

    // Capture the committed loop (crossfade included), then export it. A few
    // extra blocks let the bridge stage and publish the snapshot.
    let committed: Vec<f32> = h.engine.track(0).unwrap().buffer().channel(0)[..LOOP_FRAMES].to_vec();
    for _ in 0..4 {
        h.process_silence(BLOCK);
    }
    let path = std::env::temp_dir().join("looper_round_trip_test.wav");
    controller.save_track_wav(0, &path).unwrap();

    h.send(Command::Clear(0));
    h.process_silence(BLOCK);
    assert_eq!(h.engine.track(0).unwrap().length(), 0);

    // Import the exported file and verify sample fidelity to 16-bit depth
    let (restored, rate) = looper_backend::io::export::read_wav(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(rate, SAMPLE_RATE);
    h.send(Command::LoadAudio(0, restored));
    h.process_silence(BLOCK);

    let track = h.engine.track(0).unwrap();
    assert_eq!(track.length(), LOOP_FRAMES);
    assert_eq!(h.engine.state(), LooperState::Playing);
    for &frame in &[100usize, 10_000, 30_000, 47_000] {
        let diff = (track.buffer().channel(0)[frame] - committed[frame]).abs();
        assert!(diff < 2e-4, "frame {frame} differs by {diff}");
    }
}

#[test]
fn test_fast_path_round_trip_after_slow_path() {
    let mut h = Harness::new(1, 10);
    h.send(Command::ToggleRecord);
    h.feed_sine(440.0, 48000);
    h.send(Command::Stop);
    h.process_silence(BLOCK);

    let before: Vec<f32> = h.engine.track(0).unwrap().buffer().channel(0)[..48000].to_vec();

    // Through the slow path and back to the fast path
    h.send(Command::SetPlaybackSpeed(0, 1.5));
    h.send(Command::TogglePitchLock(0));
    for _ in 0..32 {
        h.process_silence(BLOCK);
    }
    h.send(Command::SetPlaybackSpeed(0, 1.0));
    h.send(Command::TogglePitchLock(0));
    for _ in 0..32 {
        h.process_silence(BLOCK);
    }

    // Playback never mutates a stable loop
    let after = h.engine.track(0).unwrap().buffer().channel(0);
    for (i, (a, b)) in after[..48000].iter().zip(&before).enumerate() {
        assert!((a - b).abs() < 1e-7, "sample {i} changed");
    }
}

#[test]
fn test_automation_follows_loop_wraps() {
    use looper_backend::audio::automation::{
        AutomationCurve, AutomationMode, AutomationTarget, Breakpoint,
    };

    let (command_tx, command_rx) = rtrb::RingBuffer::new(1024);
    let (event_tx, event_rx) = rtrb::RingBuffer::new(4096);
    let mut engine = Engine::new(command_rx, event_tx);
    engine
        .prepare(SAMPLE_RATE, BLOCK, CHANNELS, 1, 10, MAX_UNDO_LAYERS)
        .unwrap();
    let mut controller = engine.controller(command_tx, event_rx);

    // Each loop pass steps the playback speed down
    let mut curve = AutomationCurve::new(AutomationTarget::PlaybackSpeed, 0, AutomationMode::LoopBased);
    curve.add_breakpoint(Breakpoint::new(0.0, 1.0));
    curve.add_breakpoint(Breakpoint::new(1.0, 0.5));
    controller.automation_mut().register_curve("speed-steps", curve);

    let mut input = vec![0.0f32; BLOCK * CHANNELS];
    let mut output = vec![0.0f32; BLOCK * CHANNELS];
    for sample in input.iter_mut() {
        *sample = 0.25;
    }

    controller.send(Command::ToggleRecord);
    for _ in 0..94 {
        engine.process(&input, &mut output);
    }
    controller.send(Command::Stop);
    engine.process(&input, &mut output);
    assert_eq!(engine.state(), LooperState::Playing);
    let loop_len = engine.track(0).unwrap().length();

    // Play through one full loop so the wrap event fires
    let mut frames = BLOCK;
    while frames <= loop_len {
        engine.process(&input, &mut output);
        frames += BLOCK;
    }
    controller.poll_events(|_| {});
    engine.process(&input, &mut output);

    assert_eq!(engine.track(0).unwrap().playback_speed(), 0.5);

    // Time-based automation rides a parameter continuously
    let mut fade = AutomationCurve::new(AutomationTarget::TrackVolume, 0, AutomationMode::TimeBased);
    fade.add_breakpoint(Breakpoint::new(0.0, 1.0));
    fade.add_breakpoint(Breakpoint::new(1.0, 0.0));
    controller.automation_mut().register_curve("fade-out", fade);
    controller.automation_mut().start_time_based("fade-out");
    controller.tick_automation(SAMPLE_RATE as u64 / 2);
    engine.process(&input, &mut output);
    assert!((engine.track(0).unwrap().track_volume() - 0.5).abs() < 1e-6);
}

#[test]
fn test_select_track_defers_until_wrap() {
    let mut h = Harness::new(2, 10);
    h.send(Command::ToggleRecord);
    h.feed_sine(440.0, 48000);
    h.send(Command::Stop);
    h.process_silence(BLOCK);
    assert_eq!(h.engine.state(), LooperState::Playing);

    // Partway through the loop, ask for track 1
    h.feed_sine(0.0, BLOCK * 10);
    h.send(Command::SelectTrack(1));
    h.process_silence(BLOCK);
    assert_eq!(h.engine.state(), LooperState::PendingTrackChange);
    assert_eq!(h.engine.active_track_index(), 0);

    let mut guard = 0;
    while h.engine.active_track_index() == 0 && guard < 200 {
        h.process_silence(BLOCK);
        guard += 1;
    }
    assert_eq!(h.engine.active_track_index(), 1);
    // Track 1 is empty, so the looper lands in Idle-equivalent rest state
    assert!(matches!(h.engine.state(), LooperState::Stopped | LooperState::Idle));
}
