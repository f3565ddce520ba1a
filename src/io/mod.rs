pub mod audio_file;
pub mod export;
pub mod midi_input;
pub mod midi_mappings;

pub use audio_file::AudioFile;
pub use midi_input::MidiInputManager;
