//! Top-level looper engine: owns the tracks, the state machine, the shared
//! metronome and freeze, and the lock-free rings that connect the audio
//! thread to the rest of the program.
//!
//! `Engine::process` is the audio callback body. Everything it does is
//! allocation-free and lock-free; commands, MIDI and events all travel over
//! rtrb rings, and UI-visible state leaves through the bridges.

use crate::audio::automation::AutomationEngine;
use crate::audio::bridge::{AudioToUIBridge, EngineStateBridge, EngineStateSnapshot};
use crate::audio::buffer::AudioBuffer;
use crate::audio::constants::*;
use crate::audio::freeze::GranularFreeze;
use crate::audio::meter::LevelMeter;
use crate::audio::metronome::Metronome;
use crate::audio::midi_map::{
    MidiCcControl, MidiLearnTarget, MidiMappings, MidiNoteCommand, RawMidiMessage,
};
use crate::audio::state::{LooperState, StateContext, StateMachine};
use crate::audio::track::LoopTrack;
use crate::command::{AudioEvent, Command};
use crate::io::audio_file::AudioFile;
use crate::io::export;
use crate::io::midi_mappings as mapping_store;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A state change scheduled to execute at a loop seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingActionKind {
    #[default]
    None,
    SwitchTrack,
    CancelRecording,
    FinalizeRecording,
}

#[derive(Debug, Clone, Copy, Default)]
struct PendingAction {
    kind: PendingActionKind,
    target_track: usize,
    wait_for_wrap: bool,
    /// Begin a first-pass recording on the target right after switching
    record_after_switch: bool,
}

impl PendingAction {
    fn is_active(&self) -> bool {
        self.kind != PendingActionKind::None
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

pub struct Engine {
    tracks: Vec<LoopTrack>,
    state_machine: StateMachine,
    state: LooperState,
    pending_action: PendingAction,

    metronome: Metronome,
    freeze: GranularFreeze,
    midi_mappings: MidiMappings,
    midi_learn: Option<MidiLearnTarget>,

    command_rx: rtrb::Consumer<Command>,
    event_tx: rtrb::Producer<AudioEvent>,
    midi_rx: Option<rtrb::Consumer<RawMidiMessage>>,

    bridges: Vec<Arc<AudioToUIBridge>>,
    bridge_initialized: Vec<bool>,
    state_bridge: Arc<EngineStateBridge>,
    input_meter: Arc<LevelMeter>,
    output_meter: Arc<LevelMeter>,

    input_gain: f32,
    output_gain: f32,
    single_play_mode: bool,
    active_track_index: usize,
    sync_master: Option<usize>,

    sample_rate: u32,
    block_size: usize,
    channels: usize,
    num_tracks: usize,
    prepared: bool,

    input_buffer: AudioBuffer,
    output_buffer: AudioBuffer,
    audible: Vec<bool>,
    wrapped: Vec<bool>,
    loop_counts: Vec<u32>,
}

impl Engine {
    pub fn new(command_rx: rtrb::Consumer<Command>, event_tx: rtrb::Producer<AudioEvent>) -> Self {
        Self {
            tracks: Vec::new(),
            state_machine: StateMachine::new(),
            state: LooperState::Idle,
            pending_action: PendingAction::default(),
            metronome: Metronome::new(),
            freeze: GranularFreeze::new(),
            midi_mappings: MidiMappings::new(),
            midi_learn: None,
            command_rx,
            event_tx,
            midi_rx: None,
            bridges: Vec::new(),
            bridge_initialized: Vec::new(),
            state_bridge: Arc::new(EngineStateBridge::new()),
            input_meter: Arc::new(LevelMeter::new()),
            output_meter: Arc::new(LevelMeter::new()),
            input_gain: DEFAULT_INPUT_GAIN,
            output_gain: DEFAULT_OUTPUT_GAIN,
            single_play_mode: true,
            active_track_index: 0,
            sync_master: None,
            sample_rate: 0,
            block_size: 0,
            channels: 0,
            num_tracks: 0,
            prepared: false,
            input_buffer: AudioBuffer::default(),
            output_buffer: AudioBuffer::default(),
            audible: Vec::new(),
            wrapped: Vec::new(),
            loop_counts: Vec::new(),
        }
    }

    /// Allocate the whole engine. Invalid parameters leave the engine
    /// unprepared and stuck in Idle.
    pub fn prepare(
        &mut self,
        sample_rate: u32,
        block_size: usize,
        channels: usize,
        num_tracks: usize,
        max_seconds: usize,
        max_undo_layers: usize,
    ) -> Result<(), String> {
        if sample_rate == 0 || block_size == 0 || channels == 0 || num_tracks == 0 {
            return Err(format!(
                "invalid engine configuration: rate={sample_rate} block={block_size} \
                 channels={channels} tracks={num_tracks}"
            ));
        }

        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.channels = channels;
        self.num_tracks = num_tracks;

        self.tracks = (0..num_tracks)
            .map(|_| {
                let mut track = LoopTrack::new();
                track.prepare(sample_rate, block_size, channels, max_seconds, max_undo_layers);
                track
            })
            .collect();
        let capacity = self.tracks[0].capacity_frames();

        self.bridges = (0..num_tracks)
            .map(|_| {
                let bridge = Arc::new(AudioToUIBridge::new());
                bridge.prepare(channels, capacity);
                bridge
            })
            .collect();
        self.bridge_initialized = vec![false; num_tracks];

        let mut input_meter = LevelMeter::new();
        input_meter.prepare(channels);
        self.input_meter = Arc::new(input_meter);
        let mut output_meter = LevelMeter::new();
        output_meter.prepare(channels);
        self.output_meter = Arc::new(output_meter);

        self.metronome.prepare(sample_rate);
        self.freeze.prepare(sample_rate, channels);

        self.input_buffer.resize(channels, block_size);
        self.output_buffer.resize(channels, block_size);
        self.audible = vec![false; num_tracks];
        self.wrapped = vec![false; num_tracks];
        self.loop_counts = vec![0; num_tracks];

        self.state = LooperState::Idle;
        self.active_track_index = 0;
        self.pending_action.clear();
        self.prepared = true;
        Ok(())
    }

    pub fn set_midi_rx(&mut self, midi_rx: rtrb::Consumer<RawMidiMessage>) {
        self.midi_rx = Some(midi_rx);
    }

    /// Control-side handle sharing the bridges and meters.
    pub fn controller(
        &self,
        command_tx: rtrb::Producer<Command>,
        event_rx: rtrb::Consumer<AudioEvent>,
    ) -> EngineController {
        let mut automation = AutomationEngine::new();
        automation.prepare(self.sample_rate);
        EngineController {
            command_tx,
            event_rx,
            bridges: self.bridges.clone(),
            state_bridge: Arc::clone(&self.state_bridge),
            input_meter: Arc::clone(&self.input_meter),
            output_meter: Arc::clone(&self.output_meter),
            mappings_mirror: MidiMappings::new(),
            automation,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn state(&self) -> LooperState {
        self.state
    }

    pub fn active_track_index(&self) -> usize {
        self.active_track_index
    }

    pub fn track(&self, index: usize) -> Option<&LoopTrack> {
        self.tracks.get(index)
    }

    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }

    /// Audio callback body: one block of interleaved input to interleaved
    /// output.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        output.fill(0.0);
        if !self.prepared {
            return;
        }
        let n = (output.len() / self.channels).min(self.block_size);
        if n == 0 {
            return;
        }

        // 1. Input gain and input metering
        let input_frames = (input.len() / self.channels).min(n);
        self.input_buffer.clear_range(n);
        self.input_buffer.copy_from_interleaved(input, self.channels, input_frames);
        if (self.input_gain - 1.0).abs() > f32::EPSILON {
            self.input_buffer.apply_gain(self.input_gain, n);
        }
        self.input_meter.process(&self.input_buffer, n);

        // 2. Commands from the control thread (bounded per block)
        for _ in 0..MAX_COMMANDS_PER_BLOCK {
            match self.command_rx.pop() {
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => break,
            }
        }

        // 3. MIDI events
        loop {
            let msg = match self.midi_rx.as_mut() {
                Some(rx) => rx.pop().ok(),
                None => None,
            };
            match msg {
                Some(msg) => self.handle_midi(msg),
                None => break,
            }
        }

        // 4. Deferred actions (evaluated against last block's wrap flags)
        self.process_pending_action();

        // 5. Per-state audio action
        self.output_buffer.clear_range(n);
        self.update_audible_mask();
        let was_recording = self.tracks[self.active_track_index].is_currently_recording();
        {
            let mut ctx = StateContext {
                tracks: &mut self.tracks,
                active_index: self.active_track_index,
                input: &self.input_buffer,
                output: &mut self.output_buffer,
                num_frames: n,
                audible: &self.audible,
            };
            self.state_machine.process_audio(self.state, &mut ctx);
        }

        // A quantized pass that hit the seam finalized itself; follow it out
        // of the recording state
        if self.state.is_recording()
            && was_recording
            && !self.tracks[self.active_track_index].is_currently_recording()
        {
            let idx = self.active_track_index;
            let target =
                if self.tracks[idx].length() > 0 { LooperState::Playing } else { LooperState::Stopped };
            self.transition_to(target);
            self.after_finalize(idx, false);
        }

        // 6. Wrap detection feeds pending actions and loop-indexed events
        for i in 0..self.num_tracks {
            self.wrapped[i] = self.tracks[i].has_wrapped_around();
            if self.wrapped[i] && self.tracks[i].length() > 0 && self.state.is_playing() {
                self.loop_counts[i] = self.loop_counts[i].wrapping_add(1);
                let _ = self.event_tx.push(AudioEvent::LoopWrapped(i, self.loop_counts[i]));
            }
        }

        // 7. Metronome
        if let Some(beat) = self.metronome.process(&mut self.output_buffer, n) {
            let _ = self.event_tx.push(AudioEvent::MetronomeBeatOccurred(beat));
        }

        // 8. Granular freeze (captures input history even while disengaged)
        self.freeze.process_block(&self.input_buffer, &mut self.output_buffer, n);

        // 9. Output gain and output metering
        if (self.output_gain - 1.0).abs() > f32::EPSILON {
            self.output_buffer.apply_gain(self.output_gain, n);
        }
        self.output_meter.process(&self.output_buffer, n);
        self.output_buffer.write_interleaved(output, self.channels, n);

        // 10-11. Bridges
        self.update_bridges(n, was_recording);
    }

    fn update_audible_mask(&mut self) {
        for i in 0..self.num_tracks {
            self.audible[i] = if self.single_play_mode {
                i == self.active_track_index
            } else {
                !self.tracks[i].is_muted()
            };
        }
    }

    fn update_bridges(&mut self, block_frames: usize, was_recording: bool) {
        let idx = self.active_track_index;
        let track = &self.tracks[idx];
        let bridge = &self.bridges[idx];
        let now_recording = track.is_currently_recording();

        if !self.bridge_initialized[idx] && track.length() > 0 {
            bridge.signal_waveform_changed();
            self.bridge_initialized[idx] = true;
        }

        if was_recording && !now_recording {
            bridge.signal_waveform_changed();
            bridge.reset_recording_counter();
        }

        if now_recording && bridge.should_update_while_recording(block_frames, self.sample_rate) {
            bridge.signal_waveform_changed();
        }

        let mut length_to_show = track.length();
        if length_to_show == 0 && now_recording {
            length_to_show = (track.write_position() + 200).min(track.capacity_frames());
        }

        bridge.update_from_audio(
            track.buffer(),
            length_to_show,
            track.read_position(),
            now_recording,
            self.state.is_playing(),
        );

        let pending = (self.pending_action.kind == PendingActionKind::SwitchTrack)
            .then_some(self.pending_action.target_track);
        self.state_bridge
            .update_from_audio(self.state, idx, pending, self.single_play_mode);
    }

    fn transition_to(&mut self, target: LooperState) -> bool {
        let before = self.state;
        let changed = self.state_machine.transition(
            &mut self.state,
            target,
            &mut self.tracks,
            self.active_track_index,
        );
        if changed {
            if before.is_recording() != self.state.is_recording() {
                let _ = self
                    .event_tx
                    .push(AudioEvent::RecordingStateChanged(self.state.is_recording()));
            }
            if before.is_playing() != self.state.is_playing() {
                let _ = self
                    .event_tx
                    .push(AudioEvent::PlaybackStateChanged(self.state.is_playing()));
            }
        }
        changed
    }

    fn active_track(&mut self) -> &mut LoopTrack {
        &mut self.tracks[self.active_track_index]
    }

    // --- transport --------------------------------------------------------

    fn record(&mut self) {
        // A record request while a deferred switch is waiting begins the
        // first pass right after the switch lands
        if self.pending_action.kind == PendingActionKind::SwitchTrack
            && self.tracks[self.pending_action.target_track].length() == 0
        {
            self.pending_action.record_after_switch = true;
            return;
        }

        let has_content = self.active_track().length() > 0;
        if has_content {
            if matches!(self.state, LooperState::Playing | LooperState::Stopped) {
                self.transition_to(LooperState::Overdubbing);
            }
        } else if matches!(self.state, LooperState::Idle | LooperState::Stopped) {
            self.loop_counts[self.active_track_index] = 0;
            self.transition_to(LooperState::Recording);
        }
    }

    fn play(&mut self) {
        let idx = self.active_track_index;
        if self.tracks[idx].length() == 0 {
            return;
        }
        if matches!(self.state, LooperState::Stopped | LooperState::Idle)
            && self.transition_to(LooperState::Playing)
        {
            self.loop_counts[idx] = 0;
            let position = self.tracks[idx].read_position();
            self.metronome.sync_to_position(position);
        }
    }

    fn stop(&mut self) {
        match self.state {
            LooperState::Idle | LooperState::Stopped => {}
            LooperState::Recording | LooperState::Overdubbing => {
                // Tempo-aligned stop: with an audible sync master running,
                // defer the commit to the master's next wrap
                if self.sync_deferral_source().is_some() {
                    self.pending_action = PendingAction {
                        kind: PendingActionKind::FinalizeRecording,
                        target_track: self.active_track_index,
                        wait_for_wrap: true,
                        record_after_switch: false,
                    };
                    return;
                }
                self.finalize_recording_now();
            }
            LooperState::Playing | LooperState::PendingTrackChange => {
                let target = if self.active_track().length() > 0 {
                    LooperState::Stopped
                } else {
                    LooperState::Idle
                };
                self.transition_to(target);
                self.pending_action.clear();
                let _ = self.event_tx.push(AudioEvent::PendingTrackChanged(None));
            }
            LooperState::Transitioning => {
                self.transition_to(LooperState::Stopped);
            }
        }
    }

    fn finalize_recording_now(&mut self) {
        let idx = self.active_track_index;
        let was_empty = self.tracks[idx].length() == 0;
        let has_content =
            self.tracks[idx].length() > 0 || self.tracks[idx].provisional_length() > 0;
        let target = if has_content { LooperState::Playing } else { LooperState::Stopped };
        if self.transition_to(target) {
            self.after_finalize(idx, was_empty);
        }
    }

    fn after_finalize(&mut self, track_index: usize, was_empty: bool) {
        // A synced track's first commit quantizes to the master's grid
        if was_empty {
            if let Some(master) = self.sync_master {
                if master != track_index {
                    let master_len = self.tracks[master].length();
                    let len = self.tracks[track_index].length();
                    if master_len > 0 && len > 0 {
                        let multiples = ((len as f64 / master_len as f64).round() as usize).max(1);
                        let quantized =
                            (multiples * master_len).min(self.tracks[track_index].capacity_frames());
                        self.tracks[track_index].set_length(quantized);
                    }
                }
            }
            self.loop_counts[track_index] = 0;
            let position = self.tracks[track_index].read_position();
            self.metronome.sync_to_position(position);
        }
        self.bridges[track_index].signal_waveform_changed();
    }

    fn toggle_record(&mut self) {
        if self.state.is_recording() {
            self.stop();
        } else {
            self.record();
        }
    }

    fn toggle_play(&mut self) {
        if self.state.is_playing() {
            self.stop();
        } else {
            self.play();
        }
    }

    // --- track selection --------------------------------------------------

    fn select_track(&mut self, track_index: usize) {
        if track_index >= self.num_tracks || track_index == self.active_track_index {
            return;
        }

        if self.state.is_recording() {
            // With a sync master running, even the cancel waits for the seam
            if self.sync_deferral_source().is_some() {
                self.pending_action = PendingAction {
                    kind: PendingActionKind::CancelRecording,
                    target_track: track_index,
                    wait_for_wrap: true,
                    record_after_switch: false,
                };
                return;
            }
            self.active_track().cancel_current_recording();
            self.switch_to_track_immediately(track_index);
            return;
        }

        let active_empty = self.active_track().length() == 0;
        if matches!(self.state, LooperState::Idle | LooperState::Stopped) || active_empty {
            self.switch_to_track_immediately(track_index);
            return;
        }

        // Defer to the loop seam for a tempo-aligned switch
        self.pending_action = PendingAction {
            kind: PendingActionKind::SwitchTrack,
            target_track: track_index,
            wait_for_wrap: true,
            record_after_switch: false,
        };
        if self.state == LooperState::Playing {
            self.transition_to(LooperState::PendingTrackChange);
        }
        let _ = self.event_tx.push(AudioEvent::PendingTrackChanged(Some(track_index)));
    }

    fn switch_to_track_immediately(&mut self, track_index: usize) {
        self.active_track_index = track_index;
        let target = if self.tracks[track_index].length() > 0 {
            LooperState::Stopped
        } else {
            LooperState::Idle
        };
        self.transition_to(target);
        let _ = self.event_tx.push(AudioEvent::ActiveTrackChanged(track_index));
    }

    fn select_next_track(&mut self) {
        self.select_track((self.active_track_index + 1) % self.num_tracks);
    }

    fn select_previous_track(&mut self) {
        self.select_track((self.active_track_index + self.num_tracks - 1) % self.num_tracks);
    }

    // --- pending actions --------------------------------------------------

    /// The track whose wrap gates deferred actions: an audible sync master
    /// with content, if one is running.
    fn sync_deferral_source(&self) -> Option<usize> {
        let master = self.sync_master?;
        let master_running = self.state.is_playing() || self.state.is_recording();
        if master != self.active_track_index
            && self.tracks[master].length() > 0
            && self.audible.get(master).copied().unwrap_or(false)
            && master_running
        {
            Some(master)
        } else {
            None
        }
    }

    fn process_pending_action(&mut self) {
        if !self.pending_action.is_active() {
            return;
        }

        if self.pending_action.wait_for_wrap {
            let source = self.sync_deferral_source().unwrap_or(self.active_track_index);
            if !self.wrapped[source] {
                return;
            }
        }

        let action = self.pending_action;
        self.pending_action.clear();

        match action.kind {
            PendingActionKind::None => {}
            PendingActionKind::SwitchTrack => {
                if action.target_track < self.num_tracks
                    && action.target_track != self.active_track_index
                {
                    self.transition_to(LooperState::Transitioning);
                    self.active_track_index = action.target_track;
                    let target = if self.tracks[action.target_track].length() > 0 {
                        LooperState::Playing
                    } else {
                        LooperState::Stopped
                    };
                    self.transition_to(target);
                    let _ = self
                        .event_tx
                        .push(AudioEvent::ActiveTrackChanged(action.target_track));
                    let _ = self.event_tx.push(AudioEvent::PendingTrackChanged(None));

                    if action.record_after_switch && self.tracks[action.target_track].length() == 0
                    {
                        self.loop_counts[action.target_track] = 0;
                        self.transition_to(LooperState::Recording);
                    }
                }
            }
            PendingActionKind::CancelRecording => {
                if self.active_track().is_currently_recording() {
                    self.active_track().cancel_current_recording();
                }
                if action.target_track != self.active_track_index {
                    self.switch_to_track_immediately(action.target_track);
                }
            }
            PendingActionKind::FinalizeRecording => {
                if self.active_track().is_currently_recording() {
                    self.finalize_recording_now();
                }
            }
        }
    }

    // --- per-track edits --------------------------------------------------

    fn undo(&mut self, track_index: usize) {
        let idx = if track_index < self.num_tracks { track_index } else { self.active_track_index };
        if self.state.is_recording() {
            return;
        }
        if self.tracks[idx].undo() {
            self.bridges[idx].signal_waveform_changed();
            if idx == self.active_track_index {
                if self.tracks[idx].length() == 0 {
                    self.transition_to(LooperState::Idle);
                } else if self.state == LooperState::Idle {
                    self.transition_to(LooperState::Stopped);
                }
            }
        }
    }

    fn redo(&mut self, track_index: usize) {
        let idx = if track_index < self.num_tracks { track_index } else { self.active_track_index };
        if self.state.is_recording() {
            return;
        }
        if self.tracks[idx].redo() {
            self.bridges[idx].signal_waveform_changed();
            if idx == self.active_track_index
                && self.state == LooperState::Idle
                && self.tracks[idx].length() > 0
            {
                self.transition_to(LooperState::Stopped);
            }
        }
    }

    fn clear_track(&mut self, track_index: usize) {
        let idx = if track_index < self.num_tracks { track_index } else { self.active_track_index };
        self.tracks[idx].clear();
        self.bridges[idx].clear();
        self.bridge_initialized[idx] = false;
        self.bridges[idx].signal_waveform_changed();
        self.loop_counts[idx] = 0;
        let _ = self.event_tx.push(AudioEvent::TrackCleared(idx));

        if idx == self.active_track_index {
            self.transition_to(LooperState::Stopped);
            self.transition_to(LooperState::Idle);
        }
    }

    fn set_track_soloed(&mut self, track_index: usize, soloed: bool) {
        for i in 0..self.num_tracks {
            if i == track_index {
                self.tracks[i].set_muted(false);
                self.tracks[i].set_soloed(soloed);
            } else {
                self.tracks[i].set_muted(soloed);
            }
        }
        let _ = self.event_tx.push(AudioEvent::TrackSoloChanged(track_index, soloed));
    }

    fn load_audio(&mut self, track_index: usize, content: &AudioBuffer) {
        if track_index >= self.num_tracks {
            return;
        }
        self.tracks[track_index].load_content(content, content.num_frames());
        self.bridges[track_index].signal_waveform_changed();
        self.bridge_initialized[track_index] = false;
        if track_index == self.active_track_index {
            if self.state == LooperState::Playing {
                return;
            }
            self.transition_to(LooperState::Stopped);
            self.play();
        }
    }

    // --- command dispatch -------------------------------------------------

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::TogglePlay => self.toggle_play(),
            Command::ToggleRecord => self.toggle_record(),
            Command::Stop => self.stop(),

            Command::Undo(track) => self.undo(track),
            Command::Redo(track) => self.redo(track),
            Command::Clear(track) => self.clear_track(track),

            Command::NextTrack => self.select_next_track(),
            Command::PreviousTrack => self.select_previous_track(),
            Command::SelectTrack(track) => self.select_track(track),

            Command::SetTrackVolume(track, volume) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.set_track_volume(volume);
                    let actual = t.track_volume();
                    let _ = self.event_tx.push(AudioEvent::TrackVolumeChanged(track, actual));
                }
            }
            Command::SetPlaybackSpeed(track, speed) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.set_playback_speed(speed);
                    let actual = t.playback_speed();
                    let _ = self.event_tx.push(AudioEvent::TrackSpeedChanged(track, actual));
                }
            }
            Command::SetPlaybackPitch(track, semitones) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.set_pitch_semitones(semitones);
                    let actual = t.pitch_semitones();
                    let _ = self.event_tx.push(AudioEvent::TrackPitchChanged(track, actual));
                }
            }
            Command::SetExistingAudioGain(track, gain) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.set_overdub_old_gain(gain);
                }
            }
            Command::SetNewOverdubGain(track, gain) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.set_overdub_new_gain(gain);
                }
            }

            Command::ToggleMute(track) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    let muted = !t.is_muted();
                    t.set_muted(muted);
                    let _ = self.event_tx.push(AudioEvent::TrackMuteChanged(track, muted));
                }
            }
            Command::ToggleSolo(track) => {
                if track < self.num_tracks {
                    let soloed = !self.tracks[track].is_soloed();
                    self.set_track_soloed(track, soloed);
                }
            }
            Command::ToggleSyncTrack(track) => {
                if track < self.num_tracks {
                    let synced = self.sync_master != Some(track);
                    self.sync_master = synced.then_some(track);
                    let _ = self.event_tx.push(AudioEvent::TrackSyncChanged(track, synced));
                }
            }
            Command::TogglePitchLock(track) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    let keep = !t.keep_pitch();
                    t.set_keep_pitch(keep);
                    let _ = self.event_tx.push(AudioEvent::TrackPitchLockChanged(track, keep));
                }
            }
            Command::ToggleReverse(track) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    if t.is_direction_forward() {
                        t.set_direction_backward();
                    } else {
                        t.set_direction_forward();
                    }
                    let reversed = !t.is_direction_forward();
                    let _ = self.event_tx.push(AudioEvent::TrackReverseDirection(track, reversed));
                }
            }
            Command::ToggleVolumeNormalize(track) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.toggle_output_normalization();
                    let on = t.is_normalizing_output();
                    let _ = self.event_tx.push(AudioEvent::VolumeNormalizeChanged(track, on));
                }
            }

            Command::ToggleSinglePlayMode => {
                self.single_play_mode = !self.single_play_mode;
                let _ = self
                    .event_tx
                    .push(AudioEvent::SinglePlayModeChanged(self.single_play_mode));
            }
            Command::ToggleFreeze => {
                self.freeze.toggle();
                let _ = self.event_tx.push(AudioEvent::FreezeStateChanged(self.freeze.is_enabled()));
            }
            Command::SetFreezeLevel(level) => self.freeze.set_level(level),

            Command::LoadAudio(track, content) => self.load_audio(track, &content),

            Command::SetMetronomeEnabled(enabled) => {
                self.metronome.set_enabled(enabled);
                let _ = self.event_tx.push(AudioEvent::MetronomeEnabledChanged(enabled));
            }
            Command::SetMetronomeBpm(bpm) => {
                self.metronome.set_bpm(bpm);
                let _ = self.event_tx.push(AudioEvent::MetronomeBpmChanged(self.metronome.bpm()));
            }
            Command::SetMetronomeVolume(volume) => {
                self.metronome.set_volume(volume);
                let _ = self
                    .event_tx
                    .push(AudioEvent::MetronomeVolumeChanged(self.metronome.volume()));
            }
            Command::SetMetronomeStrongBeat(beat) => {
                self.metronome.set_strong_beat(beat);
                let _ = self
                    .event_tx
                    .push(AudioEvent::MetronomeStrongBeatChanged(self.metronome.strong_beat()));
            }
            Command::SetMetronomeTimeSignature(num, den) => {
                self.metronome.set_time_signature(num, den);
                let (num, den) = self.metronome.time_signature();
                let _ = self.event_tx.push(AudioEvent::MetronomeTimeSignatureChanged(num, den));
            }

            Command::SetSubLoopRegion(track, start, end) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.set_sub_loop_region(start, end);
                }
            }
            Command::ClearSubLoopRegion(track) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.clear_sub_loop_region();
                }
            }

            Command::SetInputGain(gain) => self.input_gain = gain.max(0.0),
            Command::SetOutputGain(gain) => self.output_gain = gain.max(0.0),

            Command::SetPlayheadPosition(track, position) => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.set_read_position(position);
                }
            }

            Command::SetMidiMapping(target, number) => self.midi_mappings.apply(target, number),
            Command::ResetMidiMappings => self.midi_mappings.reset_to_defaults(),
            Command::StartMidiLearn(target) => self.midi_learn = Some(target),
            Command::CancelMidiLearn => self.midi_learn = None,
        }
    }

    // --- MIDI dispatch ----------------------------------------------------

    fn handle_midi(&mut self, msg: RawMidiMessage) {
        // Learn mode captures the next note or controller
        if let Some(target) = self.midi_learn {
            if msg.is_note_on() {
                self.midi_mappings.apply(target, msg.note());
                let _ = self.event_tx.push(AudioEvent::MidiMappingLearned(target, msg.note()));
                self.midi_learn = None;
                return;
            }
            if msg.is_controller() {
                let number = msg.controller_number();
                self.midi_mappings.apply(target, number);
                let _ = self.event_tx.push(AudioEvent::MidiMappingLearned(target, number));
                self.midi_learn = None;
                return;
            }
        }

        if msg.is_note_on() {
            if let Some(command) = self.midi_mappings.command_for_note_on(msg.note()) {
                self.run_note_command(command);
            }
        } else if msg.is_controller() {
            if let Some(control) = self.midi_mappings.control_for_cc(msg.controller_number()) {
                self.run_cc_control(control, msg.controller_value());
            }
        }
    }

    fn run_note_command(&mut self, command: MidiNoteCommand) {
        let active = self.active_track_index;
        match command {
            MidiNoteCommand::ToggleRecord => self.toggle_record(),
            MidiNoteCommand::TogglePlay => self.toggle_play(),
            MidiNoteCommand::Undo => self.undo(active),
            MidiNoteCommand::Redo => self.redo(active),
            MidiNoteCommand::Clear => self.clear_track(active),
            MidiNoteCommand::NextTrack => self.select_next_track(),
            MidiNoteCommand::PrevTrack => self.select_previous_track(),
            MidiNoteCommand::ToggleSolo => {
                let soloed = !self.tracks[active].is_soloed();
                self.set_track_soloed(active, soloed);
            }
            MidiNoteCommand::ToggleMute => self.handle_command(Command::ToggleMute(active)),
            MidiNoteCommand::LoadFile => {
                // File decode lives on the control thread; nothing to do here
                log::debug!("MIDI load-file ignored on the audio thread");
            }
            MidiNoteCommand::ToggleReverse => self.handle_command(Command::ToggleReverse(active)),
            MidiNoteCommand::TogglePitchLock => {
                self.handle_command(Command::TogglePitchLock(active))
            }
        }
    }

    fn run_cc_control(&mut self, control: MidiCcControl, value: u8) {
        let active = self.active_track_index;
        let normalized = value as f32 / 127.0;
        match control {
            MidiCcControl::TrackSelect => self.select_track(value as usize % self.num_tracks),
            MidiCcControl::TrackVolume => {
                self.handle_command(Command::SetTrackVolume(active, normalized))
            }
            MidiCcControl::PlaybackSpeed => {
                let speed =
                    MIN_PLAYBACK_SPEED + normalized * (MAX_PLAYBACK_SPEED - MIN_PLAYBACK_SPEED);
                self.handle_command(Command::SetPlaybackSpeed(active, speed));
            }
            MidiCcControl::OverdubLevel => {
                self.handle_command(Command::SetNewOverdubGain(active, normalized * MAX_OVERDUB_GAIN))
            }
            MidiCcControl::ExistingAudioLevel => self.handle_command(
                Command::SetExistingAudioGain(active, normalized * MAX_OVERDUB_GAIN),
            ),
            MidiCcControl::PitchShift => {
                let semitones = MIN_PLAYBACK_PITCH_SEMITONES
                    + normalized * (MAX_PLAYBACK_PITCH_SEMITONES - MIN_PLAYBACK_PITCH_SEMITONES);
                self.handle_command(Command::SetPlaybackPitch(active, semitones));
            }
            MidiCcControl::MetronomeVolume => {
                self.handle_command(Command::SetMetronomeVolume(normalized))
            }
        }
    }
}

/// Control-thread handle: pushes commands, polls events, reads bridges and
/// owns every file-touching path (decode, export, mapping persistence).
pub struct EngineController {
    command_tx: rtrb::Producer<Command>,
    event_rx: rtrb::Consumer<AudioEvent>,
    bridges: Vec<Arc<AudioToUIBridge>>,
    state_bridge: Arc<EngineStateBridge>,
    input_meter: Arc<LevelMeter>,
    output_meter: Arc<LevelMeter>,
    mappings_mirror: MidiMappings,
    automation: AutomationEngine,
    sample_rate: u32,
    channels: usize,
}

impl EngineController {
    /// Push a command; a full ring drops the command (the engine never
    /// blocks on us, we never block on it).
    pub fn send(&mut self, cmd: Command) -> bool {
        match self.command_tx.push(cmd) {
            Ok(()) => true,
            Err(rtrb::PushError::Full(cmd)) => {
                log::warn!("command ring full, dropping {cmd:?}");
                false
            }
        }
    }

    /// Drain pending engine events into `listener`, feeding loop wraps to
    /// the automation curves along the way. Call at UI rate.
    pub fn poll_events(&mut self, mut listener: impl FnMut(&AudioEvent)) {
        let mut automation_commands = Vec::new();
        while let Ok(event) = self.event_rx.pop() {
            match event {
                AudioEvent::MidiMappingLearned(target, number) => {
                    self.mappings_mirror.apply(target, number);
                }
                AudioEvent::LoopWrapped(track, loop_index) => {
                    self.automation.apply_at_loop_index(track, loop_index, |cmd| {
                        automation_commands.push(cmd)
                    });
                }
                _ => {}
            }
            listener(&event);
        }
        for cmd in automation_commands {
            self.send(cmd);
        }
    }

    /// Advance time-based automation by `frames` and emit its commands.
    pub fn tick_automation(&mut self, frames: u64) {
        let mut commands = Vec::new();
        self.automation.tick(frames, |cmd| commands.push(cmd));
        for cmd in commands {
            self.send(cmd);
        }
    }

    pub fn automation_mut(&mut self) -> &mut AutomationEngine {
        &mut self.automation
    }

    pub fn engine_state(&self) -> EngineStateSnapshot {
        self.state_bridge.snapshot()
    }

    pub fn track_bridge(&self, track_index: usize) -> Option<&Arc<AudioToUIBridge>> {
        self.bridges.get(track_index)
    }

    pub fn input_meter(&self) -> &LevelMeter {
        &self.input_meter
    }

    pub fn output_meter(&self) -> &LevelMeter {
        &self.output_meter
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Decode an audio file and hand its frames to a track.
    pub fn load_audio_file(&mut self, track_index: usize, path: impl AsRef<Path>) -> Result<(), String> {
        let file = AudioFile::load(path)?;
        let content = file.to_planar(self.channels);
        if !self.send(Command::LoadAudio(track_index, content)) {
            return Err("engine command ring is full".to_string());
        }
        Ok(())
    }

    /// Export a track's current loop as 16-bit PCM WAV, sourced from the
    /// bridge snapshot so the audio thread never touches the file system.
    pub fn save_track_wav(&mut self, track_index: usize, path: impl AsRef<Path>) -> Result<(), String> {
        let bridge = self
            .bridges
            .get(track_index)
            .ok_or_else(|| format!("no track {track_index}"))?;

        bridge.signal_waveform_changed();
        let mut snapshot = crate::audio::bridge::WaveformSnapshot::default();
        for _ in 0..200 {
            if bridge.waveform_snapshot(&mut snapshot) && snapshot.length > 0 {
                return export::write_wav(
                    path,
                    &snapshot.buffer,
                    snapshot.length,
                    self.sample_rate,
                )
                .map_err(|e| format!("WAV export failed: {e}"));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Err(format!("no loop content published for track {track_index}"))
    }

    /// Export every non-empty track into `folder` as `track_<n>.wav`.
    pub fn save_all_tracks_wav(&mut self, folder: impl AsRef<Path>) -> Result<Vec<std::path::PathBuf>, String> {
        let folder = folder.as_ref();
        std::fs::create_dir_all(folder).map_err(|e| e.to_string())?;
        let mut written = Vec::new();
        for i in 0..self.bridges.len() {
            let path = folder.join(format!("track_{i}.wav"));
            if self.save_track_wav(i, &path).is_ok() {
                written.push(path);
            }
        }
        Ok(written)
    }

    /// Rebind locally and on the engine, keeping the mirror used for
    /// persistence in sync.
    pub fn set_midi_mapping(&mut self, target: MidiLearnTarget, number: u8) {
        self.mappings_mirror.apply(target, number);
        self.send(Command::SetMidiMapping(target, number));
    }

    /// Persist the current mappings to the user's config directory.
    pub fn save_midi_mappings(&self) -> Result<(), String> {
        mapping_store::save(&self.mappings_mirror)
    }

    /// Load persisted mappings and replay them onto the engine.
    pub fn load_midi_mappings(&mut self) -> Result<(), String> {
        let loaded = mapping_store::load()?;
        self.send(Command::ResetMidiMappings);
        self.mappings_mirror.reset_to_defaults();
        for (target, number) in loaded.bindings() {
            self.set_midi_mapping(target, number);
        }
        Ok(())
    }
}
