pub mod automation;
pub mod bridge;
pub mod buffer;
pub mod buffer_manager;
pub mod constants;
pub mod engine;
pub mod fifo;
pub mod freeze;
pub mod meter;
pub mod metronome;
pub mod midi_map;
pub mod playback;
pub mod state;
pub mod track;
pub mod undo;
pub mod volume;

pub use bridge::{AudioToUIBridge, EngineStateBridge, EngineStateSnapshot, WaveformSnapshot};
pub use buffer::AudioBuffer;
pub use engine::{Engine, EngineController};
pub use metronome::Metronome;
pub use state::LooperState;
pub use track::LoopTrack;
