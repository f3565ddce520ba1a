//! Engine-wide tuning constants.

/// Default number of loop tracks
pub const NUM_TRACKS: usize = 4;

/// Hard cap on loop length in seconds (10 minutes)
pub const MAX_SECONDS_HARD_LIMIT: usize = 10 * 60;

/// Undo/redo depth in whole-buffer layers
pub const MAX_UNDO_LAYERS: usize = 5;

pub const MIN_PLAYBACK_SPEED: f32 = 0.5;
pub const MAX_PLAYBACK_SPEED: f32 = 2.0;

pub const MIN_PLAYBACK_PITCH_SEMITONES: f32 = -2.0;
pub const MAX_PLAYBACK_PITCH_SEMITONES: f32 = 2.0;

pub const MIN_OVERDUB_GAIN: f32 = 0.0;
pub const MAX_OVERDUB_GAIN: f32 = 2.0;

pub const MIN_TRACK_VOLUME: f32 = 0.0;
pub const MAX_TRACK_VOLUME: f32 = 1.0;
pub const TRACK_DEFAULT_VOLUME: f32 = 1.0;

/// Peak level that output normalization scales to
pub const NORMALIZE_TARGET_LEVEL: f32 = 0.9;

/// Loop-seam crossfade applied on the first commit
pub const CROSSFADE_DEFAULT_LENGTH_SECONDS: f32 = 0.01;

pub const DEFAULT_INPUT_GAIN: f32 = 1.0;
pub const DEFAULT_OUTPUT_GAIN: f32 = 1.0;

// Message bus
pub const MESSAGE_RING_SIZE: usize = 1024;
pub const MIDI_RING_SIZE: usize = 256;
/// Commands drained per audio block (bounded work on the audio thread)
pub const MAX_COMMANDS_PER_BLOCK: usize = 32;

// Metronome
pub const METRONOME_MIN_BPM: u32 = 30;
pub const METRONOME_MAX_BPM: u32 = 300;
pub const METRONOME_DEFAULT_BPM: u32 = 120;
pub const METRONOME_DEFAULT_VOLUME: f32 = 0.8;
pub const METRONOME_STRONG_CLICK_SECONDS: f32 = 0.01;
pub const METRONOME_STRONG_CLICK_FREQUENCY: f32 = 1200.0;
pub const METRONOME_STRONG_CLICK_DECAY: f32 = 200.0;
pub const METRONOME_STRONG_CLICK_GAIN: f32 = 2.0;
pub const METRONOME_WEAK_CLICK_SECONDS: f32 = 0.008;
pub const METRONOME_WEAK_CLICK_FREQUENCY: f32 = 800.0;
pub const METRONOME_WEAK_CLICK_DECAY: f32 = 250.0;
pub const METRONOME_WEAK_CLICK_GAIN: f32 = 1.5;

// Granular freeze
pub const FREEZE_BUFFER_DURATION_SECONDS: f32 = 0.5;
pub const MAX_GRAINS: usize = 64;
pub const GRAIN_LENGTH: usize = 16384;
pub const GRAIN_SPACING: usize = 512;
pub const WINDOW_TABLE_SIZE: usize = 2048;
pub const MOD_TABLE_SIZE: usize = 1024;
pub const MOD_TABLE_MASK: usize = MOD_TABLE_SIZE - 1;
pub const MOD_RATE: f32 = 0.04;
pub const PITCH_MOD_DEPTH: f32 = 0.005;
pub const AMP_MOD_DEPTH: f32 = 0.01;
pub const MIN_AMP_MOD: f32 = 0.7;
pub const MAX_AMP_MOD: f32 = 1.0;
pub const DEFAULT_FREEZE_LEVEL: f32 = 0.8;

// Level meters
pub const METER_DECAY_FACTOR: f32 = 0.95;
