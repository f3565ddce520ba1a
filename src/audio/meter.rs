//! Per-channel peak and RMS metering, readable from any thread.

use crate::audio::buffer::AudioBuffer;
use crate::audio::constants::METER_DECAY_FACTOR;
use std::sync::atomic::{AtomicU32, Ordering};

/// Levels are stored as f32 bit patterns in relaxed atomics; the audio
/// thread writes, the UI reads, no ordering between channels is needed.
#[derive(Debug, Default)]
pub struct LevelMeter {
    peak_levels: Vec<AtomicU32>,
    rms_levels: Vec<AtomicU32>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, channels: usize) {
        self.peak_levels = (0..channels).map(|_| AtomicU32::new(0)).collect();
        self.rms_levels = (0..channels).map(|_| AtomicU32::new(0)).collect();
    }

    pub fn reset(&self) {
        for level in self.peak_levels.iter().chain(self.rms_levels.iter()) {
            level.store(0.0f32.to_bits(), Ordering::Relaxed);
        }
    }

    /// Fold one block into the decaying levels.
    pub fn process(&self, buffer: &AudioBuffer, n: usize) {
        let channels = self.peak_levels.len().min(buffer.num_channels());
        for ch in 0..channels {
            let peak = buffer.magnitude(ch, n);
            let rms = buffer.rms(ch, n);

            let old_peak = f32::from_bits(self.peak_levels[ch].load(Ordering::Relaxed));
            let old_rms = f32::from_bits(self.rms_levels[ch].load(Ordering::Relaxed));
            self.peak_levels[ch]
                .store((old_peak * METER_DECAY_FACTOR).max(peak).to_bits(), Ordering::Relaxed);
            self.rms_levels[ch]
                .store((old_rms * METER_DECAY_FACTOR).max(rms).to_bits(), Ordering::Relaxed);
        }
    }

    pub fn peak_level(&self, channel: usize) -> f32 {
        self.peak_levels
            .get(channel)
            .map_or(0.0, |l| f32::from_bits(l.load(Ordering::Relaxed)))
    }

    pub fn rms_level(&self, channel: usize) -> f32 {
        self.rms_levels
            .get(channel)
            .map_or(0.0, |l| f32::from_bits(l.load(Ordering::Relaxed)))
    }
}
