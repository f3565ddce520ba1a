//! Granular freeze: capture a short snapshot of the live input and sustain
//! it as a continuous pad of overlapping grains.
//!
//! The audio thread writes the input history every block and synthesizes
//! grains from its private frozen buffer. A low-priority snapshot thread
//! copies the history into a shared buffer when a freeze is armed; the
//! audio thread swaps that buffer in once it is ready. History access is
//! coordinated by a writer-preferring atomic gate, so the audio thread
//! never blocks; at worst it skips one block's history write.

use crate::audio::buffer::AudioBuffer;
use crate::audio::constants::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Writer-preferring gate over the shared history buffer.
///
/// State word layout: bit 0 = writer active, bit 1 = writer waiting,
/// bits 2.. = active snapshot count. Snapshots only start while no writer
/// is active or waiting; the writer declares intent instead of spinning.
#[derive(Debug, Default)]
pub struct SnapshotGate {
    state: AtomicU32,
}

const LOOP_BIT: u32 = 1;
const WANT_LOOP_BIT: u32 = 1 << 1;
const SNAPSHOT_INC: u32 = 1 << 2;

impl SnapshotGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reader entry: succeeds only while no writer is active or waiting.
    pub fn try_begin_snapshot(&self) -> bool {
        let mut s = self.state.load(Ordering::Acquire);
        loop {
            if s & (LOOP_BIT | WANT_LOOP_BIT) != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                s,
                s + SNAPSHOT_INC,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => s = current,
            }
        }
    }

    pub fn end_snapshot(&self) {
        self.state.fetch_sub(SNAPSHOT_INC, Ordering::AcqRel);
    }

    /// Writer entry: succeeds only while no snapshot is active. On failure
    /// the waiting bit is left set so no new snapshot can start before the
    /// writer's next attempt.
    pub fn try_begin_write(&self) -> bool {
        let mut s = self.state.load(Ordering::Acquire);
        loop {
            if s & !(LOOP_BIT | WANT_LOOP_BIT) != 0 {
                self.state.fetch_or(WANT_LOOP_BIT, Ordering::AcqRel);
                return false;
            }
            match self.state.compare_exchange_weak(
                s,
                (s | LOOP_BIT) & !WANT_LOOP_BIT,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => s = current,
            }
        }
    }

    pub fn end_write(&self) {
        self.state.fetch_and(!LOOP_BIT, Ordering::Release);
    }
}

/// A single grain voice. Fixed pool, no allocation after prepare.
#[derive(Debug, Clone, Copy, Default)]
struct Grain {
    position: f32,
    env_position: f32,
    env_increment: f32,
    increment: f32,
    pitch_mod: f32,
    amp_mod: f32,
    active: bool,
}

struct HistoryRing {
    gate: SnapshotGate,
    buffer: Mutex<(AudioBuffer, usize)>,
}

pub struct GranularFreeze {
    history: Arc<HistoryRing>,
    frozen: AudioBuffer,
    frozen_shared: Arc<Mutex<AudioBuffer>>,
    needs_snapshot: Arc<AtomicBool>,
    snapshot_ready: Arc<AtomicBool>,
    should_stop: Arc<AtomicBool>,
    snapshot_thread: Option<thread::JoinHandle<()>>,

    grains: [Grain; MAX_GRAINS],
    window_table: Vec<f32>,
    pitch_mod_table: Vec<f32>,
    amp_mod_table: Vec<f32>,
    rng: SmallRng,

    buffer_frames: usize,
    buffer_frames_f: f32,
    grain_env_increment: f32,
    next_grain_time: i32,
    mod_phase: f32,
    mod_phase_inc: f32,

    frozen_active: bool,
    waiting_for_snapshot: bool,
    level: f32,
}

impl GranularFreeze {
    pub fn new() -> Self {
        Self {
            history: Arc::new(HistoryRing {
                gate: SnapshotGate::new(),
                buffer: Mutex::new((AudioBuffer::default(), 0)),
            }),
            frozen: AudioBuffer::default(),
            frozen_shared: Arc::new(Mutex::new(AudioBuffer::default())),
            needs_snapshot: Arc::new(AtomicBool::new(false)),
            snapshot_ready: Arc::new(AtomicBool::new(false)),
            should_stop: Arc::new(AtomicBool::new(false)),
            snapshot_thread: None,
            grains: [Grain::default(); MAX_GRAINS],
            window_table: Vec::new(),
            pitch_mod_table: Vec::new(),
            amp_mod_table: Vec::new(),
            rng: SmallRng::seed_from_u64(0x5eed),
            buffer_frames: 0,
            buffer_frames_f: 0.0,
            grain_env_increment: 0.0,
            next_grain_time: 0,
            mod_phase: 0.0,
            mod_phase_inc: 0.0,
            frozen_active: false,
            waiting_for_snapshot: false,
            level: DEFAULT_FREEZE_LEVEL,
        }
    }

    pub fn prepare(&mut self, sample_rate: u32, channels: usize) {
        self.stop_thread();

        let frames = (sample_rate as f32 * FREEZE_BUFFER_DURATION_SECONDS) as usize;
        self.buffer_frames = frames;
        self.buffer_frames_f = frames as f32;
        self.frozen.resize(channels, frames);
        *self.frozen_shared.lock().unwrap() = AudioBuffer::new(channels, frames);
        {
            let mut guard = self.history.buffer.lock().unwrap();
            guard.0.resize(channels, frames);
            guard.1 = 0;
        }

        self.grain_env_increment = 1.0 / GRAIN_LENGTH as f32;
        self.mod_phase_inc = MOD_RATE / sample_rate as f32;
        self.mod_phase = 0.0;
        self.grains = [Grain::default(); MAX_GRAINS];
        self.frozen_active = false;
        self.waiting_for_snapshot = false;

        self.create_window_lookup();
        self.create_modulation_lookup();
        self.start_thread();
    }

    fn create_window_lookup(&mut self) {
        self.window_table = (0..WINDOW_TABLE_SIZE)
            .map(|i| {
                let x = i as f32 / (WINDOW_TABLE_SIZE - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * x).cos())
            })
            .collect();
    }

    fn create_modulation_lookup(&mut self) {
        self.pitch_mod_table = Vec::with_capacity(MOD_TABLE_SIZE);
        self.amp_mod_table = Vec::with_capacity(MOD_TABLE_SIZE);
        for i in 0..MOD_TABLE_SIZE {
            let phase = i as f32 / MOD_TABLE_SIZE as f32;
            let value = (2.0 * std::f32::consts::PI * phase).sin();
            self.pitch_mod_table.push(1.0 + value * PITCH_MOD_DEPTH);
            self.amp_mod_table
                .push((1.0 + value * AMP_MOD_DEPTH).clamp(MIN_AMP_MOD, MAX_AMP_MOD));
        }
    }

    fn start_thread(&mut self) {
        self.should_stop.store(false, Ordering::Relaxed);
        let history = Arc::clone(&self.history);
        let frozen_shared = Arc::clone(&self.frozen_shared);
        let needs_snapshot = Arc::clone(&self.needs_snapshot);
        let snapshot_ready = Arc::clone(&self.snapshot_ready);
        let should_stop = Arc::clone(&self.should_stop);

        self.snapshot_thread = Some(thread::spawn(move || {
            while !should_stop.load(Ordering::Relaxed) {
                if needs_snapshot.load(Ordering::Acquire) && history.gate.try_begin_snapshot() {
                    {
                        let guard = history.buffer.lock().unwrap();
                        let mut frozen = frozen_shared.lock().unwrap();
                        frozen.copy_from(&guard.0, guard.0.num_frames());
                    }
                    history.gate.end_snapshot();
                    needs_snapshot.store(false, Ordering::Release);
                    snapshot_ready.store(true, Ordering::Release);
                }
                thread::sleep(Duration::from_millis(5));
            }
        }));
    }

    fn stop_thread(&mut self) {
        if let Some(handle) = self.snapshot_thread.take() {
            self.should_stop.store(true, Ordering::Relaxed);
            let _ = handle.join();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.frozen_active || self.waiting_for_snapshot
    }

    pub fn set_level(&mut self, level: f32) {
        self.level = level.clamp(0.0, 1.0);
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Arm a snapshot (engage) or release the pad (disengage). Engaging
    /// takes effect once the snapshot thread has copied the history.
    pub fn toggle(&mut self) {
        if self.is_enabled() {
            self.frozen_active = false;
            self.waiting_for_snapshot = false;
            self.needs_snapshot.store(false, Ordering::Release);
            for grain in &mut self.grains {
                grain.active = false;
            }
        } else {
            self.waiting_for_snapshot = true;
            self.snapshot_ready.store(false, Ordering::Release);
            self.needs_snapshot.store(true, Ordering::Release);
            self.next_grain_time = 0;
        }
    }

    /// Record input history and, when frozen, add the granular pad to the
    /// output.
    pub fn process_block(&mut self, input: &AudioBuffer, output: &mut AudioBuffer, n: usize) {
        self.write_history(input, n);

        if self.waiting_for_snapshot && self.snapshot_ready.swap(false, Ordering::AcqRel) {
            if let Ok(mut shared) = self.frozen_shared.try_lock() {
                std::mem::swap(&mut self.frozen, &mut *shared);
                self.frozen_active = true;
                self.waiting_for_snapshot = false;
            }
        }

        if !self.frozen_active || self.buffer_frames == 0 {
            return;
        }
        self.synthesize(output, n);
    }

    fn write_history(&mut self, input: &AudioBuffer, n: usize) {
        if !self.history.gate.try_begin_write() {
            // Snapshot in flight; drop this block's history write
            return;
        }
        if let Ok(mut guard) = self.history.buffer.try_lock() {
            let (history, write_pos) = &mut *guard;
            let frames = history.num_frames();
            if frames > 0 {
                let channels = history.num_channels().min(input.num_channels());
                for ch in 0..channels {
                    let mut pos = *write_pos;
                    for i in 0..n {
                        history.channel_mut(ch)[pos] = input.channel(ch)[i];
                        pos = (pos + 1) % frames;
                    }
                }
                *write_pos = (*write_pos + n) % frames;
            }
        }
        self.history.gate.end_write();
    }

    fn trigger_grain(&mut self) {
        let position = self.rng.gen::<f32>() * self.buffer_frames_f;
        for grain in &mut self.grains {
            if !grain.active {
                *grain = Grain {
                    position,
                    env_position: 0.0,
                    env_increment: self.grain_env_increment,
                    increment: 1.0,
                    pitch_mod: 1.0,
                    amp_mod: 1.0,
                    active: true,
                };
                return;
            }
        }
    }

    fn synthesize(&mut self, output: &mut AudioBuffer, n: usize) {
        let channels = output.num_channels().min(self.frozen.num_channels());
        let frames = self.buffer_frames;

        for i in 0..n {
            self.mod_phase += self.mod_phase_inc;
            if self.mod_phase >= 1.0 {
                self.mod_phase -= 1.0;
            }

            self.next_grain_time -= 1;
            if self.next_grain_time <= 0 {
                self.trigger_grain();
                self.next_grain_time = GRAIN_SPACING as i32;
            }

            let mod_idx = (self.mod_phase * MOD_TABLE_SIZE as f32) as usize & MOD_TABLE_MASK;
            let mut sums = [0.0f32; 8];
            let mut active_count = 0usize;

            for (g, grain) in self.grains.iter_mut().enumerate() {
                if !grain.active {
                    continue;
                }
                active_count += 1;

                let mod_offset = (mod_idx + g * MOD_TABLE_SIZE / MAX_GRAINS) & MOD_TABLE_MASK;
                let pitch_mod = self.pitch_mod_table[mod_offset];
                let amp_mod = self.amp_mod_table[mod_offset];

                let env_idx = (grain.env_position * (WINDOW_TABLE_SIZE - 1) as f32) as usize;
                let env = self.window_table[env_idx.min(WINDOW_TABLE_SIZE - 1)];
                let amp = env * amp_mod;

                let pos1 = grain.position as usize % frames;
                let pos2 = (pos1 + 1) % frames;
                let frac = grain.position - grain.position.floor();

                for (ch, sum) in sums.iter_mut().enumerate().take(channels) {
                    let a = self.frozen.channel(ch)[pos1];
                    let b = self.frozen.channel(ch)[pos2];
                    *sum += (a + frac * (b - a)) * amp;
                }

                grain.position += grain.increment * pitch_mod;
                if grain.position >= self.buffer_frames_f {
                    grain.position -= self.buffer_frames_f;
                }
                grain.env_position += grain.env_increment;
                grain.active = grain.env_position < 1.0;
            }

            if active_count > 0 {
                let scale = 0.25
                    * if active_count == 1 {
                        1.0
                    } else {
                        1.0 / (active_count as f32).sqrt()
                    };
                for (ch, sum) in sums.iter().enumerate().take(channels) {
                    let sample = (sum * scale).clamp(-1.0, 1.0) * self.level;
                    output.channel_mut(ch)[i] += sample;
                }
            }
        }
    }

    #[cfg(test)]
    fn snapshot_now(&mut self) {
        let guard = self.history.buffer.lock().unwrap();
        self.frozen.copy_from(&guard.0, guard.0.num_frames());
        drop(guard);
        self.frozen_active = true;
        self.waiting_for_snapshot = false;
    }
}

impl Drop for GranularFreeze {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

impl Default for GranularFreeze {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_writer_excludes_readers() {
        let gate = SnapshotGate::new();
        assert!(gate.try_begin_write());
        assert!(!gate.try_begin_snapshot());
        gate.end_write();
        assert!(gate.try_begin_snapshot());
        // Writer refuses while a snapshot is active, and leaves its intent
        assert!(!gate.try_begin_write());
        gate.end_snapshot();
        // Intent bit now blocks new snapshots until the writer gets in
        assert!(!gate.try_begin_snapshot());
        assert!(gate.try_begin_write());
        gate.end_write();
    }

    #[test]
    fn test_freeze_produces_pad_from_history() {
        let mut freeze = GranularFreeze::new();
        freeze.prepare(48000, 2);

        let mut input = AudioBuffer::new(2, 512);
        for ch in 0..2 {
            input.channel_mut(ch).fill(0.5);
        }
        let mut output = AudioBuffer::new(2, 512);
        // Fill the whole 0.5 s history with signal, then engage synchronously
        for _ in 0..50 {
            freeze.process_block(&input, &mut output, 512);
        }
        freeze.snapshot_now();

        output.clear();
        let silence = AudioBuffer::new(2, 512);
        // A couple of blocks so grains spawn and ramp up
        for _ in 0..4 {
            freeze.process_block(&silence, &mut output, 512);
        }
        let energy: f32 = output.channel(0).iter().map(|s| s.abs()).sum();
        assert!(energy > 0.0);
        assert!(output.channel(0).iter().all(|&s| s.abs() <= 1.0));
    }

    #[test]
    fn test_disengage_silences_grains() {
        let mut freeze = GranularFreeze::new();
        freeze.prepare(48000, 2);
        let input = AudioBuffer::new(2, 512);
        let mut output = AudioBuffer::new(2, 512);

        freeze.snapshot_now();
        assert!(freeze.is_enabled());
        freeze.toggle();
        assert!(!freeze.is_enabled());

        freeze.process_block(&input, &mut output, 512);
        assert!(output.channel(0).iter().all(|&s| s == 0.0));
    }
}
