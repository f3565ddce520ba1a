//! Variable-speed, variable-pitch loop playback.
//!
//! Unity-speed forward playback takes a raw add-from-buffer fast path. Any
//! speed, pitch or direction change routes through the linearize-and-stretch
//! slow path: the buffer manager produces a contiguous source window, each
//! channel's kernel retimes it, and the retimed audio is mixed into the
//! output. Switching paths or toggling pitch-lock flushes the kernels so no
//! stale segments smear across the transition.

use crate::audio::buffer::AudioBuffer;
use crate::audio::buffer_manager::BufferManager;
use crate::audio::constants::*;
use crate::dsp::Stretcher;

/// Extra source frames linearized beyond the resampling ratio, covering
/// kernel lookahead at the block edge.
const SOURCE_GUARD_FRAMES: usize = 16;
/// Bound on the starvation refeed loop at kernel warm-up
const MAX_REFEEDS: usize = 64;

pub struct PlaybackEngine {
    stretchers: Vec<Stretcher>,
    interpolation: AudioBuffer,
    receive_buf: Vec<f32>,

    playback_speed: f32,
    pitch_semitones: f32,
    keep_pitch: bool,
    direction_forward: bool,

    previous_speed_multiplier: f32,
    previous_keep_pitch: bool,
    was_fast_path: bool,
}

impl PlaybackEngine {
    pub fn new() -> Self {
        Self {
            stretchers: Vec::new(),
            interpolation: AudioBuffer::default(),
            receive_buf: Vec::new(),
            playback_speed: 1.0,
            pitch_semitones: 0.0,
            keep_pitch: false,
            direction_forward: true,
            previous_speed_multiplier: 1.0,
            previous_keep_pitch: false,
            was_fast_path: true,
        }
    }

    pub fn prepare(&mut self, channels: usize, block_size: usize) {
        self.stretchers = (0..channels).map(|_| Stretcher::new()).collect();
        // Worst-case source window: block * max speed + guard
        let window = block_size * MAX_PLAYBACK_SPEED.ceil() as usize + SOURCE_GUARD_FRAMES;
        self.interpolation.resize(channels, window);
        self.receive_buf = vec![0.0; block_size];
        self.clear();
    }

    pub fn clear(&mut self) {
        self.playback_speed = 1.0;
        self.pitch_semitones = 0.0;
        self.direction_forward = true;
        self.previous_speed_multiplier = 1.0;
        self.was_fast_path = true;
        for st in &mut self.stretchers {
            st.clear();
        }
    }

    pub fn playback_speed(&self) -> f32 {
        self.playback_speed
    }

    /// Clamped into the supported range; zero never freezes playback.
    pub fn set_playback_speed(&mut self, speed: f32) {
        self.playback_speed = speed.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED);
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.pitch_semitones
    }

    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        self.pitch_semitones =
            semitones.clamp(MIN_PLAYBACK_PITCH_SEMITONES, MAX_PLAYBACK_PITCH_SEMITONES);
    }

    pub fn keep_pitch(&self) -> bool {
        self.keep_pitch
    }

    /// Pitch-lock: speed drives kernel tempo (pitch preserved) when on,
    /// kernel rate (pitch follows) when off. The kernels are flushed on the
    /// flip to avoid artifacts.
    pub fn set_keep_pitch(&mut self, keep: bool) {
        for st in &mut self.stretchers {
            st.clear();
        }
        self.keep_pitch = keep;
    }

    pub fn is_direction_forward(&self) -> bool {
        self.direction_forward
    }

    pub fn set_direction_forward(&mut self) {
        self.direction_forward = true;
    }

    pub fn set_direction_backward(&mut self) {
        self.direction_forward = false;
    }

    fn use_fast_path(&self) -> bool {
        (self.playback_speed - 1.0).abs() < 0.01
            && self.direction_forward
            && self.pitch_semitones.abs() < 0.01
    }

    /// Mix `n` frames of loop playback into `output`.
    pub fn process_playback(
        &mut self,
        output: &mut AudioBuffer,
        manager: &mut BufferManager,
        n: usize,
        overdub: bool,
    ) {
        if manager.length() == 0 || n == 0 {
            return;
        }

        let fast = self.use_fast_path();
        if fast {
            if !self.was_fast_path {
                for st in &mut self.stretchers {
                    st.clear();
                    st.set_tempo(1.0);
                    st.set_rate(1.0);
                    st.set_pitch_semitones(0.0);
                }
            }
            manager.read_from_buffer(
                |dst, src| {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += *s;
                    }
                },
                output,
                n,
                1.0,
                overdub,
            );
        } else {
            self.process_stretched(output, manager, n, overdub);
        }
        self.was_fast_path = fast;
    }

    fn process_stretched(
        &mut self,
        output: &mut AudioBuffer,
        manager: &mut BufferManager,
        n: usize,
        overdub: bool,
    ) {
        let direction = if self.direction_forward { 1.0 } else { -1.0 };
        let speed_multiplier = self.playback_speed * direction;
        let source_frames =
            ((n as f32 * self.playback_speed).ceil() as usize + SOURCE_GUARD_FRAMES)
                .min(self.interpolation.num_frames());

        let speed_changed = (speed_multiplier - self.previous_speed_multiplier).abs() > 0.001;
        let mode_changed = self.keep_pitch != self.previous_keep_pitch;
        self.previous_speed_multiplier = speed_multiplier;
        self.previous_keep_pitch = self.keep_pitch;

        if !manager.linearize_and_read(
            &mut self.interpolation,
            source_frames,
            n,
            speed_multiplier as f64,
            overdub,
        ) {
            return;
        }

        let channels = output.num_channels().min(self.stretchers.len());
        for ch in 0..channels {
            let st = &mut self.stretchers[ch];
            st.set_pitch_semitones(self.pitch_semitones);
            if speed_changed || mode_changed {
                if self.keep_pitch {
                    st.set_rate(1.0);
                    st.set_tempo(self.playback_speed);
                } else {
                    st.set_tempo(1.0);
                    st.set_rate(self.playback_speed);
                }
            }

            let source = &self.interpolation.channel(ch)[..source_frames];
            st.put_samples(source);
            let mut refeeds = 0;
            while st.available() < n && refeeds < MAX_REFEEDS {
                st.put_samples(source);
                refeeds += 1;
            }

            let received = st.receive_samples(&mut self.receive_buf[..n]);
            // Pad the tail with silence on kernel under-run
            self.receive_buf[received..n].fill(0.0);
            for (dst, src) in output.channel_mut(ch)[..n].iter_mut().zip(&self.receive_buf[..n]) {
                *dst += *src;
            }
        }
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}
