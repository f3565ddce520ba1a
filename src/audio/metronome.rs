//! Shared metronome: click synthesis, beat scheduling and phase sync to the
//! loop position.

use crate::audio::buffer::AudioBuffer;
use crate::audio::constants::*;

pub struct Metronome {
    enabled: bool,
    bpm: u32,
    time_signature: (u32, u32),
    strong_beat_index: Option<u32>,
    volume: f32,

    sample_rate: u32,
    samples_per_beat: usize,
    samples_since_last_beat: usize,
    current_beat: u32,

    // Pre-synthesized click samples (mono)
    strong_click: Vec<f32>,
    weak_click: Vec<f32>,
    playing_strong: bool,
    click_position: usize,
}

impl Metronome {
    pub fn new() -> Self {
        Self {
            enabled: false,
            bpm: METRONOME_DEFAULT_BPM,
            time_signature: (4, 4),
            strong_beat_index: Some(0),
            volume: METRONOME_DEFAULT_VOLUME,
            sample_rate: 0,
            samples_per_beat: 0,
            samples_since_last_beat: 0,
            current_beat: 0,
            strong_click: Vec::new(),
            weak_click: Vec::new(),
            playing_strong: false,
            click_position: usize::MAX,
        }
    }

    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.strong_click = Self::generate_click(
            sample_rate,
            METRONOME_STRONG_CLICK_SECONDS,
            METRONOME_STRONG_CLICK_FREQUENCY,
            METRONOME_STRONG_CLICK_DECAY,
            METRONOME_STRONG_CLICK_GAIN,
        );
        self.weak_click = Self::generate_click(
            sample_rate,
            METRONOME_WEAK_CLICK_SECONDS,
            METRONOME_WEAK_CLICK_FREQUENCY,
            METRONOME_WEAK_CLICK_DECAY,
            METRONOME_WEAK_CLICK_GAIN,
        );
        self.samples_per_beat = self.calculate_samples_per_beat();
        self.reset();
    }

    fn generate_click(
        sample_rate: u32,
        seconds: f32,
        frequency: f32,
        decay: f32,
        gain: f32,
    ) -> Vec<f32> {
        let len = (sample_rate as f32 * seconds) as usize;
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let envelope = (-t * decay).exp();
                (2.0 * std::f32::consts::PI * frequency * t).sin() * envelope * gain
            })
            .collect()
    }

    fn calculate_samples_per_beat(&self) -> usize {
        let beat_duration = (60.0 / self.bpm as f64) * (4.0 / self.time_signature.1 as f64);
        (beat_duration * self.sample_rate as f64) as usize
    }

    pub fn reset(&mut self) {
        self.samples_since_last_beat = 0;
        self.current_beat = 0;
        self.click_position = usize::MAX;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.click_position = usize::MAX;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_bpm(&mut self, bpm: u32) {
        self.bpm = bpm.clamp(METRONOME_MIN_BPM, METRONOME_MAX_BPM);
        self.samples_per_beat = self.calculate_samples_per_beat();
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn set_time_signature(&mut self, numerator: u32, denominator: u32) {
        if numerator == 0 || denominator == 0 {
            return;
        }
        self.time_signature = (numerator, denominator);
        self.samples_per_beat = self.calculate_samples_per_beat();
        self.current_beat %= numerator;
    }

    pub fn time_signature(&self) -> (u32, u32) {
        self.time_signature
    }

    pub fn set_strong_beat(&mut self, beat_index: Option<u32>) {
        self.strong_beat_index = beat_index.filter(|&b| b < self.time_signature.0);
    }

    pub fn strong_beat(&self) -> Option<u32> {
        self.strong_beat_index
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn current_beat(&self) -> u32 {
        self.current_beat
    }

    /// Snap the beat phase onto a loop position so the click lines up with
    /// imported or slowed loops.
    pub fn sync_to_position(&mut self, loop_position_samples: usize) {
        if self.samples_per_beat == 0 {
            return;
        }
        let total_beats = loop_position_samples / self.samples_per_beat;
        self.current_beat = (total_beats as u32) % self.time_signature.0;
        self.samples_since_last_beat = loop_position_samples % self.samples_per_beat;
        self.playing_strong = self.strong_beat_index == Some(self.current_beat);
        self.click_position = 0;
    }

    /// Mix clicks into `n` frames of `output`. Returns the index of the last
    /// beat that fired inside the block, if any.
    pub fn process(&mut self, output: &mut AudioBuffer, n: usize) -> Option<u32> {
        if !self.enabled || self.samples_per_beat == 0 {
            return None;
        }

        let mut fired = None;
        for frame in 0..n {
            if self.samples_since_last_beat >= self.samples_per_beat {
                // Keep the remainder so tempo drift never accumulates
                self.samples_since_last_beat -= self.samples_per_beat;
                self.playing_strong = self.strong_beat_index == Some(self.current_beat);
                self.click_position = 0;
                fired = Some(self.current_beat);
                self.current_beat = (self.current_beat + 1) % self.time_signature.0;
            }

            let click = if self.playing_strong { &self.strong_click } else { &self.weak_click };
            if self.click_position < click.len() {
                let sample = click[self.click_position] * self.volume;
                for ch in 0..output.num_channels() {
                    output.channel_mut(ch)[frame] += sample;
                }
                self.click_position += 1;
            }

            self.samples_since_last_beat += 1;
        }
        fired
    }
}

impl Default for Metronome {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_per_beat() {
        let mut m = Metronome::new();
        m.prepare(48000);
        m.set_bpm(120);
        // 120 bpm in 4/4: half a second per beat
        assert_eq!(m.calculate_samples_per_beat(), 24000);

        m.set_time_signature(6, 8);
        assert_eq!(m.calculate_samples_per_beat(), 12000);
    }

    #[test]
    fn test_bpm_clamped() {
        let mut m = Metronome::new();
        m.prepare(48000);
        m.set_bpm(10);
        assert_eq!(m.bpm(), METRONOME_MIN_BPM);
        m.set_bpm(1000);
        assert_eq!(m.bpm(), METRONOME_MAX_BPM);
    }

    #[test]
    fn test_sync_to_position_beat_math() {
        let mut m = Metronome::new();
        m.prepare(48000);
        m.set_bpm(120); // 24000 samples per beat, 4 beats per bar

        m.sync_to_position(60000);
        // 60000 / 24000 = 2 beats and a half
        assert_eq!(m.current_beat(), 2);

        m.sync_to_position(24000 * 5);
        assert_eq!(m.current_beat(), 1);
    }

    #[test]
    fn test_beats_fire_on_schedule() {
        let mut m = Metronome::new();
        m.prepare(48000);
        m.set_bpm(120);
        m.set_enabled(true);

        let mut out = AudioBuffer::new(2, 24000);
        assert_eq!(m.process(&mut out, 24000), None);
        // The first beat lands exactly at the start of the next block
        assert_eq!(m.process(&mut out, 24000), Some(0));
        assert_eq!(m.process(&mut out, 24000), Some(1));
    }

    #[test]
    fn test_click_mixed_into_output() {
        let mut m = Metronome::new();
        m.prepare(48000);
        m.set_enabled(true);
        m.sync_to_position(0);

        let mut out = AudioBuffer::new(2, 512);
        m.process(&mut out, 512);
        let energy: f32 = out.channel(0).iter().map(|s| s.abs()).sum();
        assert!(energy > 0.0);
    }

    #[test]
    fn test_disabled_is_silent() {
        let mut m = Metronome::new();
        m.prepare(48000);
        let mut out = AudioBuffer::new(2, 512);
        assert_eq!(m.process(&mut out, 512), None);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }
}
