use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use looper_backend::audio::constants::{MAX_UNDO_LAYERS, MESSAGE_RING_SIZE, MIDI_RING_SIZE, NUM_TRACKS};
use looper_backend::{AudioEvent, Command, Engine, MidiInputManager, RawMidiMessage};
use std::io::{self, BufRead, Write};

const BLOCK_SIZE: usize = 512;
const MAX_LOOP_SECONDS: usize = 60;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("looper - multi-track live looper\n");

    // Audio device setup
    let host = cpal::default_host();
    let output_device = host
        .default_output_device()
        .ok_or("No output device available")?;
    println!("Output device: {}", output_device.name()?);

    let output_config = output_device.default_output_config()?;
    let sample_rate = output_config.sample_rate().0;
    let channels = output_config.channels() as usize;
    let stream_config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    println!("Engine: {} Hz, {} channels, {} tracks", sample_rate, channels, NUM_TRACKS);

    // Lock-free rings between the threads
    let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(MESSAGE_RING_SIZE);
    let (event_tx, event_rx) = rtrb::RingBuffer::<AudioEvent>::new(MESSAGE_RING_SIZE);
    let (midi_tx, midi_rx) = rtrb::RingBuffer::<RawMidiMessage>::new(MIDI_RING_SIZE);
    let (input_tx, mut input_rx) = rtrb::RingBuffer::<f32>::new(sample_rate as usize);

    // Engine
    let mut engine = Engine::new(command_rx, event_tx);
    engine.prepare(sample_rate, BLOCK_SIZE, channels, NUM_TRACKS, MAX_LOOP_SECONDS, MAX_UNDO_LAYERS)?;
    engine.set_midi_rx(midi_rx);
    let mut controller = engine.controller(command_tx, event_rx);

    // External MIDI devices feed the raw MIDI ring
    let _midi_input = match MidiInputManager::new(midi_tx) {
        Ok(manager) => Some(manager),
        Err(e) => {
            log::warn!("MIDI input unavailable: {}", e);
            None
        }
    };
    if let Err(e) = controller.load_midi_mappings() {
        log::info!("using default MIDI mappings ({})", e);
    }

    // Microphone input stream feeds the input ring
    let input_stream = host.default_input_device().and_then(|device| {
        let name = device.name().unwrap_or_default();
        let config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let mut input_tx = input_tx;
        match device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                for &sample in data {
                    if input_tx.push(sample).is_err() {
                        break;
                    }
                }
            },
            |e| log::error!("input stream error: {}", e),
            None,
        ) {
            Ok(stream) => {
                println!("Input device: {}", name);
                Some(stream)
            }
            Err(e) => {
                log::warn!("no input stream ({}): playback only", e);
                None
            }
        }
    });
    if let Some(stream) = &input_stream {
        stream.play()?;
    }

    // Output stream drives the engine
    let mut input_block = vec![0.0f32; BLOCK_SIZE * channels];
    let output_stream = output_device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _| {
            // The device buffer may be larger than the engine block
            for chunk in data.chunks_mut(BLOCK_SIZE * channels) {
                for sample in input_block[..chunk.len()].iter_mut() {
                    *sample = input_rx.pop().unwrap_or(0.0);
                }
                engine.process(&input_block[..chunk.len()], chunk);
            }
        },
        |e| log::error!("output stream error: {}", e),
        None,
    )?;
    output_stream.play()?;

    // Preload backing tracks from the command line
    for (i, path) in std::env::args().skip(1).take(NUM_TRACKS).enumerate() {
        match controller.load_audio_file(i, &path) {
            Ok(()) => println!("Loaded {} into track {}", path, i),
            Err(e) => eprintln!("Failed to load {}: {}", path, e),
        }
    }

    print_help();

    // Simple control loop on stdin
    let stdin = io::stdin();
    loop {
        controller.poll_events(|event| match event {
            AudioEvent::RecordingStateChanged(on) => println!("  [recording: {}]", on),
            AudioEvent::PlaybackStateChanged(on) => println!("  [playing: {}]", on),
            AudioEvent::ActiveTrackChanged(t) => println!("  [active track: {}]", t),
            AudioEvent::TrackCleared(t) => println!("  [track {} cleared]", t),
            AudioEvent::FreezeStateChanged(on) => println!("  [freeze: {}]", on),
            _ => {}
        });

        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let mut parts = line.split_whitespace();
        let cmd = match parts.next() {
            Some(cmd) => cmd,
            None => continue,
        };
        let arg = parts.next();

        match cmd {
            "rec" | "r" => {
                controller.send(Command::ToggleRecord);
            }
            "play" | "p" => {
                controller.send(Command::TogglePlay);
            }
            "stop" | "s" => {
                controller.send(Command::Stop);
            }
            "undo" | "u" => {
                let state = controller.engine_state();
                controller.send(Command::Undo(state.active_track));
            }
            "redo" => {
                let state = controller.engine_state();
                controller.send(Command::Redo(state.active_track));
            }
            "clear" => {
                let state = controller.engine_state();
                controller.send(Command::Clear(state.active_track));
            }
            "track" | "t" => {
                if let Some(n) = arg.and_then(|a| a.parse().ok()) {
                    controller.send(Command::SelectTrack(n));
                }
            }
            "speed" => {
                if let Some(speed) = arg.and_then(|a| a.parse().ok()) {
                    let state = controller.engine_state();
                    controller.send(Command::SetPlaybackSpeed(state.active_track, speed));
                }
            }
            "reverse" => {
                let state = controller.engine_state();
                controller.send(Command::ToggleReverse(state.active_track));
            }
            "pitchlock" => {
                let state = controller.engine_state();
                controller.send(Command::TogglePitchLock(state.active_track));
            }
            "freeze" | "f" => {
                controller.send(Command::ToggleFreeze);
            }
            "metro" | "m" => {
                let enable = arg != Some("off");
                controller.send(Command::SetMetronomeEnabled(enable));
            }
            "bpm" => {
                if let Some(bpm) = arg.and_then(|a| a.parse().ok()) {
                    controller.send(Command::SetMetronomeBpm(bpm));
                }
            }
            "mode" => {
                controller.send(Command::ToggleSinglePlayMode);
            }
            "save" => {
                let state = controller.engine_state();
                let path = arg.unwrap_or("loop.wav");
                match controller.save_track_wav(state.active_track, path) {
                    Ok(()) => println!("Saved {}", path),
                    Err(e) => eprintln!("{}", e),
                }
            }
            "state" => {
                let snap = controller.engine_state();
                println!(
                    "  state={:?} active={} pending={:?} single_play={}",
                    snap.state, snap.active_track, snap.pending_track, snap.single_play_mode
                );
            }
            "quit" | "q" => break,
            "help" | "h" | "?" => print_help(),
            other => println!("unknown command {:?} (try 'help')", other),
        }
    }

    // Persist any MIDI-learned bindings
    if let Err(e) = controller.save_midi_mappings() {
        log::warn!("failed to save MIDI mappings: {}", e);
    }

    Ok(())
}

fn print_help() {
    println!(
        "commands:\n\
         \x20 rec | play | stop     transport (record toggles overdub on a loop)\n\
         \x20 undo | redo | clear   layer edits on the active track\n\
         \x20 track <n>             select track\n\
         \x20 speed <x>             playback speed 0.5..2.0\n\
         \x20 reverse | pitchlock   playback direction / pitch preservation\n\
         \x20 freeze                granular freeze on/off\n\
         \x20 metro [off] | bpm <n> metronome\n\
         \x20 mode                  single-track vs multi-track play\n\
         \x20 save [path]           export active loop as WAV\n\
         \x20 state | help | quit"
    );
}
