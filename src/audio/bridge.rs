//! Lock-free publication of audio-thread state to the UI.
//!
//! `AudioToUIBridge` publishes waveform snapshots through a retire-lock
//! triple buffer: the audio thread copies changed loop content into a
//! staging slot (guarded by a mutex it only ever try-locks, and which is
//! uncontended outside the copy thread's brief hold), a dedicated copy
//! thread moves staging into whichever snapshot slot the UI is not
//! touching, and the UI exchanges its slot index against the freshest one.
//! The three indices are distinct at every instant, so the writer and the
//! reader never alias.
//!
//! `EngineStateBridge` is a plain atomic snapshot of transport and
//! selection state with a monotonic version as the ordering witness.

use crate::audio::buffer::AudioBuffer;
use crate::audio::state::LooperState;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

/// One published copy of a track's loop content.
#[derive(Debug, Default)]
pub struct WaveformSnapshot {
    pub buffer: AudioBuffer,
    pub length: usize,
    pub version: u64,
}

impl WaveformSnapshot {
    fn copy_from(&mut self, source: &WaveformSnapshot) {
        if self.buffer.num_channels() != source.buffer.num_channels()
            || self.buffer.num_frames() < source.length
        {
            self.buffer.resize(source.buffer.num_channels(), source.buffer.num_frames());
        }
        self.buffer.copy_from(&source.buffer, source.length);
        self.length = source.length;
        self.version = source.version;
    }
}

struct BridgeShared {
    loop_length: AtomicUsize,
    read_position: AtomicUsize,
    is_recording: AtomicBool,
    is_playing: AtomicBool,
    state_version: AtomicU64,

    pending_update: AtomicBool,
    staging: Mutex<WaveformSnapshot>,
    staging_filled: AtomicBool,

    slots: [Mutex<WaveformSnapshot>; 3],
    write_index: AtomicUsize,
    read_index: AtomicUsize,
    ui_index: AtomicUsize,

    copy_thread: OnceLock<thread::Thread>,
    should_stop: AtomicBool,
}

pub struct AudioToUIBridge {
    shared: Arc<BridgeShared>,
    handle: Option<thread::JoinHandle<()>>,
    recording_frame_counter: AtomicUsize,
    pub playback_position_changed: AtomicBool,
}

impl AudioToUIBridge {
    pub fn new() -> Self {
        let shared = Arc::new(BridgeShared {
            loop_length: AtomicUsize::new(0),
            read_position: AtomicUsize::new(0),
            is_recording: AtomicBool::new(false),
            is_playing: AtomicBool::new(false),
            state_version: AtomicU64::new(0),
            pending_update: AtomicBool::new(false),
            staging: Mutex::new(WaveformSnapshot::default()),
            staging_filled: AtomicBool::new(false),
            slots: [
                Mutex::new(WaveformSnapshot::default()),
                Mutex::new(WaveformSnapshot::default()),
                Mutex::new(WaveformSnapshot::default()),
            ],
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(1),
            ui_index: AtomicUsize::new(2),
            copy_thread: OnceLock::new(),
            should_stop: AtomicBool::new(false),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::spawn(move || Self::copy_loop(&worker));
        let _ = shared.copy_thread.set(handle.thread().clone());

        Self {
            shared,
            handle: Some(handle),
            recording_frame_counter: AtomicUsize::new(0),
            playback_position_changed: AtomicBool::new(false),
        }
    }

    /// Size the staging slot for the track's channel count and capacity.
    pub fn prepare(&self, channels: usize, frames: usize) {
        let mut staging = self.shared.staging.lock().unwrap();
        staging.buffer.resize(channels, frames);
        staging.length = 0;
    }

    fn copy_loop(shared: &BridgeShared) {
        while !shared.should_stop.load(Ordering::Acquire) {
            thread::park_timeout(Duration::from_millis(100));
            if !shared.staging_filled.swap(false, Ordering::AcqRel) {
                continue;
            }

            let read = shared.read_index.load(Ordering::Acquire);
            let ui = shared.ui_index.load(Ordering::Acquire);
            let free = (0..3).find(|i| *i != read && *i != ui).unwrap_or(0);

            let version = shared.state_version.load(Ordering::Relaxed) + 1;
            {
                let mut staging = shared.staging.lock().unwrap();
                staging.version = version;
                let mut slot = shared.slots[free].lock().unwrap();
                slot.copy_from(&staging);
            }
            shared.write_index.store(free, Ordering::Release);
            shared.state_version.store(version, Ordering::Release);
        }
    }

    /// Mark the loop content changed; the next audio block stages a copy.
    pub fn signal_waveform_changed(&self) {
        self.shared.pending_update.store(true, Ordering::Release);
    }

    /// Audio thread: publish transport fields and, when flagged, stage the
    /// loop content for the copy thread. Never blocks: if the staging slot
    /// is briefly held by the copy thread, the update is retried next block.
    pub fn update_from_audio(
        &self,
        buffer: &AudioBuffer,
        length: usize,
        read_pos: usize,
        recording: bool,
        playing: bool,
    ) {
        let prev = self.shared.read_position.load(Ordering::Relaxed);
        if prev != read_pos {
            self.playback_position_changed.store(true, Ordering::Release);
        }
        self.shared.read_position.store(read_pos, Ordering::Relaxed);
        self.shared.loop_length.store(length, Ordering::Relaxed);
        self.shared.is_recording.store(recording, Ordering::Relaxed);
        self.shared.is_playing.store(playing, Ordering::Relaxed);

        if self.shared.pending_update.swap(false, Ordering::AcqRel) {
            match self.shared.staging.try_lock() {
                Ok(mut staging) => {
                    let copy_len = length.min(staging.buffer.num_frames());
                    staging.buffer.copy_from(buffer, copy_len);
                    staging.length = length;
                    self.shared.staging_filled.store(true, Ordering::Release);
                    if let Some(t) = self.shared.copy_thread.get() {
                        t.unpark();
                    }
                }
                Err(_) => {
                    self.shared.pending_update.store(true, Ordering::Release);
                }
            }
        }
    }

    /// Throttle waveform publishes while recording to roughly 100 ms.
    pub fn should_update_while_recording(&self, block_size: usize, sample_rate: u32) -> bool {
        let frames_per_update = (sample_rate as usize / 10).max(block_size);
        let count = self.recording_frame_counter.fetch_add(block_size, Ordering::Relaxed) + block_size;
        if count >= frames_per_update {
            self.recording_frame_counter.store(0, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn reset_recording_counter(&self) {
        self.recording_frame_counter.store(0, Ordering::Relaxed);
    }

    /// UI thread: `(length, read_pos, recording, playing)`.
    pub fn playback_state(&self) -> (usize, usize, bool, bool) {
        (
            self.shared.loop_length.load(Ordering::Relaxed),
            self.shared.read_position.load(Ordering::Relaxed),
            self.shared.is_recording.load(Ordering::Relaxed),
            self.shared.is_playing.load(Ordering::Relaxed),
        )
    }

    pub fn state_version(&self) -> u64 {
        self.shared.state_version.load(Ordering::Acquire)
    }

    /// UI thread: copy out the freshest snapshot if it is newer than what
    /// `dest` already holds. Returns false when nothing new is published.
    pub fn waveform_snapshot(&self, dest: &mut WaveformSnapshot) -> bool {
        let current = self.shared.state_version.load(Ordering::Acquire);
        if current == 0 || current == dest.version {
            return false;
        }

        let write = self.shared.write_index.load(Ordering::Acquire);
        let prev_ui = self.shared.ui_index.swap(write, Ordering::AcqRel);
        if prev_ui != write {
            self.shared.read_index.store(prev_ui, Ordering::Release);
        }

        let slot = self.shared.slots[write].lock().unwrap();
        if slot.version == current {
            dest.copy_from(&slot);
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        self.shared.loop_length.store(0, Ordering::Relaxed);
        self.shared.read_position.store(0, Ordering::Relaxed);
        self.shared.is_recording.store(false, Ordering::Relaxed);
        self.shared.is_playing.store(false, Ordering::Relaxed);
        self.shared.pending_update.store(false, Ordering::Relaxed);
        self.shared.state_version.fetch_add(1, Ordering::Release);
        self.reset_recording_counter();
    }
}

impl Drop for AudioToUIBridge {
    fn drop(&mut self) {
        self.shared.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Default for AudioToUIBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport and selection snapshot read by the UI every repaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStateSnapshot {
    pub state: LooperState,
    pub active_track: usize,
    pub pending_track: Option<usize>,
    pub single_play_mode: bool,
    pub version: u64,
}

#[derive(Debug)]
pub struct EngineStateBridge {
    state: AtomicU8,
    active_track: AtomicUsize,
    pending_track: AtomicI64,
    single_play_mode: AtomicBool,
    version: AtomicU64,
}

impl EngineStateBridge {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LooperState::Idle as u8),
            active_track: AtomicUsize::new(0),
            pending_track: AtomicI64::new(-1),
            single_play_mode: AtomicBool::new(true),
            version: AtomicU64::new(0),
        }
    }

    pub fn update_from_audio(
        &self,
        state: LooperState,
        active_track: usize,
        pending_track: Option<usize>,
        single_play_mode: bool,
    ) {
        self.state.store(state as u8, Ordering::Relaxed);
        self.active_track.store(active_track, Ordering::Relaxed);
        self.pending_track
            .store(pending_track.map_or(-1, |t| t as i64), Ordering::Relaxed);
        self.single_play_mode.store(single_play_mode, Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn snapshot(&self) -> EngineStateSnapshot {
        let version = self.version.load(Ordering::Acquire);
        let state = match self.state.load(Ordering::Relaxed) {
            0 => LooperState::Idle,
            1 => LooperState::Stopped,
            2 => LooperState::Playing,
            3 => LooperState::Recording,
            4 => LooperState::Overdubbing,
            5 => LooperState::PendingTrackChange,
            _ => LooperState::Transitioning,
        };
        let pending = self.pending_track.load(Ordering::Relaxed);
        EngineStateSnapshot {
            state,
            active_track: self.active_track.load(Ordering::Relaxed),
            pending_track: (pending >= 0).then_some(pending as usize),
            single_play_mode: self.single_play_mode.load(Ordering::Relaxed),
            version,
        }
    }
}

impl Default for EngineStateBridge {
    fn default() -> Self {
        Self::new()
    }
}
