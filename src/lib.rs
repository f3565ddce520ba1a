// Looper Backend
//
// A multi-track live looper engine: per-track loop buffers with overdub
// layers and swap-based undo, variable-speed/reverse/pitch-preserving
// playback, a shared metronome and granular freeze, all driven from a
// real-time audio callback. Uses lock-free command/event rings (rtrb),
// cpal for audio I/O, midir for MIDI input, and symphonia for audio file
// decoding.

pub mod audio;
pub mod command;
pub mod dsp;
pub mod io;

// Re-export commonly used types
pub use audio::{
    AudioBuffer, Engine, EngineController, EngineStateSnapshot, LooperState, LoopTrack,
    WaveformSnapshot,
};
pub use audio::midi_map::RawMidiMessage;
pub use command::{AudioEvent, Command};
pub use io::{AudioFile, MidiInputManager};
