//! Per-track gain staging: track volume, mute/solo, overdub mix gains,
//! output normalization and the loop-seam crossfade.

use crate::audio::buffer::AudioBuffer;
use crate::audio::constants::*;

#[derive(Debug)]
pub struct VolumeProcessor {
    track_volume: f32,
    previous_track_volume: f32,
    volume_before_mute: f32,
    overdub_new_gain: f32,
    overdub_old_gain: f32,
    normalize_output: bool,
    soloed: bool,
    muted: bool,
    crossfade_len: usize,
}

impl Default for VolumeProcessor {
    fn default() -> Self {
        Self {
            track_volume: TRACK_DEFAULT_VOLUME,
            previous_track_volume: TRACK_DEFAULT_VOLUME,
            volume_before_mute: TRACK_DEFAULT_VOLUME,
            overdub_new_gain: 1.0,
            overdub_old_gain: 1.0,
            normalize_output: false,
            soloed: false,
            muted: false,
            crossfade_len: 0,
        }
    }
}

impl VolumeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, sample_rate: u32) {
        *self = Self::default();
        self.crossfade_len = (CROSSFADE_DEFAULT_LENGTH_SECONDS * sample_rate as f32) as usize;
    }

    pub fn track_volume(&self) -> f32 {
        self.track_volume
    }

    /// Set the track gain. While muted the change is remembered but not
    /// heard until unmute.
    pub fn set_track_volume(&mut self, volume: f32) {
        let volume = volume.clamp(MIN_TRACK_VOLUME, MAX_TRACK_VOLUME);
        if self.muted {
            self.volume_before_mute = volume;
        } else {
            self.track_volume = volume;
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        if muted {
            if !self.muted {
                self.volume_before_mute = self.track_volume;
            }
            self.track_volume = 0.0;
            self.muted = true;
        } else if self.muted {
            self.track_volume = self.volume_before_mute;
            self.muted = false;
        }
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed
    }

    /// Solo is a hint; cross-track muting is resolved by the engine, which
    /// sees every track's solo state.
    pub fn set_soloed(&mut self, soloed: bool) {
        self.soloed = soloed;
    }

    pub fn overdub_new_gain(&self) -> f32 {
        self.overdub_new_gain
    }

    pub fn set_overdub_new_gain(&mut self, gain: f32) {
        self.overdub_new_gain = gain.clamp(MIN_OVERDUB_GAIN, MAX_OVERDUB_GAIN);
    }

    pub fn overdub_old_gain(&self) -> f32 {
        self.overdub_old_gain
    }

    pub fn set_overdub_old_gain(&mut self, gain: f32) {
        self.overdub_old_gain = gain.clamp(MIN_OVERDUB_GAIN, MAX_OVERDUB_GAIN);
    }

    pub fn is_normalizing_output(&self) -> bool {
        self.normalize_output
    }

    pub fn toggle_output_normalization(&mut self) {
        self.normalize_output = !self.normalize_output;
    }

    /// Apply the track gain to `n` frames, ramping across the block when the
    /// gain moved by more than a milli-decibel-ish threshold.
    pub fn apply_volume(&mut self, output: &mut AudioBuffer, n: usize) {
        if (self.track_volume - self.previous_track_volume).abs() > 0.001 {
            output.apply_gain_ramp(0, n, self.previous_track_volume, self.track_volume);
            self.previous_track_volume = self.track_volume;
        } else {
            output.apply_gain(self.track_volume, n);
        }
    }

    /// Record apply-fn: tape-style feedback mix of the existing layer and
    /// the incoming pass. The first pass clears instead of decaying.
    pub fn save_balanced_layers(&self, dst: &mut [f32], src: &[f32], overdub: bool) {
        let old = if overdub { self.overdub_old_gain } else { 0.0 };
        for (d, s) in dst.iter_mut().zip(src) {
            *d = *d * old + *s * self.overdub_new_gain;
        }
    }

    /// Scale the first `length` frames to the normalization target peak.
    pub fn normalize_output(&self, buffer: &mut AudioBuffer, length: usize) {
        if !self.normalize_output {
            return;
        }
        let mut max_sample = 0.0f32;
        for ch in 0..buffer.num_channels() {
            max_sample = max_sample.max(buffer.magnitude(ch, length));
        }
        if max_sample > 0.001 {
            buffer.apply_gain(NORMALIZE_TARGET_LEVEL / max_sample, length);
        }
    }

    /// Fade the first and last samples of the loop to zero to suppress the
    /// seam click on the first commit.
    pub fn apply_crossfade(&self, buffer: &mut AudioBuffer, length: usize) {
        let fade = self.crossfade_len.min(length / 4);
        if fade > 0 {
            buffer.apply_gain_ramp(0, fade, 0.0, 1.0);
            buffer.apply_gain_ramp(length - fade, fade, 1.0, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_cycle_preserves_volume() {
        let mut vol = VolumeProcessor::new();
        vol.set_track_volume(0.7);
        vol.set_muted(true);
        assert_eq!(vol.track_volume(), 0.0);
        vol.set_muted(false);
        assert_eq!(vol.track_volume(), 0.7);
    }

    #[test]
    fn test_volume_set_while_muted_applies_on_unmute() {
        let mut vol = VolumeProcessor::new();
        vol.set_muted(true);
        vol.set_track_volume(0.4);
        assert_eq!(vol.track_volume(), 0.0);
        vol.set_muted(false);
        assert_eq!(vol.track_volume(), 0.4);
    }

    #[test]
    fn test_first_pass_clears_existing_content() {
        let vol = VolumeProcessor::new();
        let mut dst = [0.9f32; 4];
        let src = [0.5f32; 4];
        vol.save_balanced_layers(&mut dst, &src, false);
        assert_eq!(dst, [0.5; 4]);
    }

    #[test]
    fn test_overdub_mixes_with_gains() {
        let mut vol = VolumeProcessor::new();
        vol.set_overdub_old_gain(0.5);
        vol.set_overdub_new_gain(2.0);
        let mut dst = [1.0f32; 4];
        let src = [0.25f32; 4];
        vol.save_balanced_layers(&mut dst, &src, true);
        assert_eq!(dst, [1.0; 4]);
    }

    #[test]
    fn test_normalize_scales_to_target() {
        let mut vol = VolumeProcessor::new();
        vol.toggle_output_normalization();
        let mut buf = AudioBuffer::new(1, 4);
        buf.channel_mut(0).copy_from_slice(&[0.45, -0.3, 0.1, 0.0]);
        vol.normalize_output(&mut buf, 4);
        assert!((buf.magnitude(0, 4) - NORMALIZE_TARGET_LEVEL).abs() < 1e-6);
    }

    #[test]
    fn test_crossfade_zeroes_edges() {
        let mut vol = VolumeProcessor::new();
        vol.prepare(48000);
        let mut buf = AudioBuffer::new(1, 48000);
        buf.channel_mut(0).fill(1.0);
        vol.apply_crossfade(&mut buf, 48000);
        assert_eq!(buf.channel(0)[0], 0.0);
        assert!(buf.channel(0)[47999].abs() < 1e-3);
        assert_eq!(buf.channel(0)[24000], 1.0);
    }
}
