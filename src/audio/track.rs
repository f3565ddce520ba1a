//! One loop track: buffer, cursors, undo stack, playback and gain staging
//! composed into the full record/overdub/playback pipeline.

use crate::audio::buffer::AudioBuffer;
use crate::audio::buffer_manager::BufferManager;
use crate::audio::playback::PlaybackEngine;
use crate::audio::undo::UndoStack;
use crate::audio::volume::VolumeProcessor;

pub struct LoopTrack {
    volume: VolumeProcessor,
    buffer_manager: BufferManager,
    undo: UndoStack,
    playback: PlaybackEngine,
    mix_scratch: AudioBuffer,

    sample_rate: u32,
    block_size: usize,
    channels: usize,
    is_recording: bool,
    staged_for_pass: bool,
}

impl LoopTrack {
    pub fn new() -> Self {
        Self {
            volume: VolumeProcessor::new(),
            buffer_manager: BufferManager::new(),
            undo: UndoStack::new(),
            playback: PlaybackEngine::new(),
            mix_scratch: AudioBuffer::default(),
            sample_rate: 0,
            block_size: 0,
            channels: 0,
            is_recording: false,
            staged_for_pass: false,
        }
    }

    /// Allocate every internal buffer. All later operations are
    /// allocation-free.
    pub fn prepare(
        &mut self,
        sample_rate: u32,
        block_size: usize,
        channels: usize,
        max_seconds: usize,
        max_undo_layers: usize,
    ) {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.channels = channels;

        // Round capacity up to a whole number of blocks
        let raw_frames = max_seconds * sample_rate as usize;
        let aligned_frames = raw_frames.div_ceil(block_size) * block_size;

        self.buffer_manager.prepare(channels, aligned_frames);
        self.undo.prepare(max_undo_layers, channels, aligned_frames);
        self.volume.prepare(sample_rate);
        self.playback.prepare(channels, block_size);
        self.mix_scratch.resize(channels, block_size);
        self.is_recording = false;
        self.staged_for_pass = false;
    }

    /// Record `n` frames of input. Returns true when the pass ended at the
    /// seam because wrapping is disabled (quantized overdub).
    pub fn process_record(&mut self, input: &AudioBuffer, n: usize, overdub: bool) -> bool {
        if n == 0 || input.num_channels() != self.channels {
            return false;
        }

        if !self.staged_for_pass {
            self.undo
                .stage_current_buffer(self.buffer_manager.buffer(), self.buffer_manager.length());
            self.buffer_manager.sync_write_to_read();
            self.staged_for_pass = true;
        }
        self.is_recording = true;

        let volume = &self.volume;
        let prevented_wrap = self.buffer_manager.write_to_buffer(
            |dst, src, od| volume.save_balanced_layers(dst, src, od),
            input,
            n,
            overdub,
            overdub,
        );

        if prevented_wrap {
            self.finalize_layer(overdub);
        }
        prevented_wrap
    }

    /// Mix `n` frames of this track's playback into `output`.
    pub fn process_playback(&mut self, output: &mut AudioBuffer, n: usize, overdub: bool) {
        if self.buffer_manager.length() == 0 {
            return;
        }
        self.mix_scratch.clear_range(n);
        self.playback
            .process_playback(&mut self.mix_scratch, &mut self.buffer_manager, n, overdub);
        self.volume.apply_volume(&mut self.mix_scratch, n);
        self.volume.normalize_output(&mut self.mix_scratch, n);
        output.add_from(&self.mix_scratch, n);
    }

    /// Commit the current pass into the undo ring. The first commit
    /// establishes the loop length and crossfades the seam.
    pub fn finalize_layer(&mut self, overdub: bool) {
        if !self.is_recording && self.buffer_manager.provisional_length() == 0 {
            return;
        }
        let first_commit = self.buffer_manager.length() == 0;
        self.buffer_manager.finalize_layer(overdub);
        if first_commit {
            let length = self.buffer_manager.length();
            self.volume.apply_crossfade(self.buffer_manager.buffer_mut(), length);
        }
        self.undo.finalize_copy_and_push();
        self.is_recording = false;
        self.staged_for_pass = false;
    }

    /// Ensure the pre-pass snapshot is staged and the write cursor is seated
    /// on the playback position. Idempotent within a pass.
    pub fn stage_for_overdub(&mut self) {
        if !self.staged_for_pass {
            self.undo
                .stage_current_buffer(self.buffer_manager.buffer(), self.buffer_manager.length());
            self.buffer_manager.sync_write_to_read();
            self.staged_for_pass = true;
        }
    }

    /// Discard the in-progress pass without committing.
    pub fn cancel_current_recording(&mut self) {
        self.buffer_manager.cancel_provisional();
        self.is_recording = false;
        self.staged_for_pass = false;
    }

    pub fn undo(&mut self) -> bool {
        if self.is_recording {
            return false;
        }
        let live_length = self.buffer_manager.length();
        let manager = &mut self.buffer_manager;
        match self.undo.undo(manager.buffer_mut(), live_length) {
            Some(restored) => {
                manager.set_length(restored);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.is_recording {
            return false;
        }
        let live_length = self.buffer_manager.length();
        let manager = &mut self.buffer_manager;
        match self.undo.redo(manager.buffer_mut(), live_length) {
            Some(restored) => {
                manager.set_length(restored);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.buffer_manager.clear();
        self.undo.clear();
        self.playback.clear();
        self.is_recording = false;
        self.staged_for_pass = false;
    }

    /// Replace the loop with already-decoded content.
    pub fn load_content(&mut self, content: &AudioBuffer, frames: usize) {
        self.undo.clear();
        self.buffer_manager.load_content(content, frames);
        self.is_recording = false;
        self.staged_for_pass = false;
    }

    // --- pass-through accessors -------------------------------------------

    pub fn length(&self) -> usize {
        self.buffer_manager.length()
    }

    pub fn capacity_frames(&self) -> usize {
        self.buffer_manager.capacity_frames()
    }

    pub fn provisional_length(&self) -> usize {
        self.buffer_manager.provisional_length()
    }

    pub fn is_currently_recording(&self) -> bool {
        self.is_recording
    }

    pub fn has_wrapped_around(&mut self) -> bool {
        self.buffer_manager.has_wrapped_around()
    }

    pub fn read_position(&self) -> usize {
        self.buffer_manager.read_position()
    }

    pub fn write_position(&self) -> usize {
        self.buffer_manager.write_position()
    }

    pub fn set_read_position(&mut self, pos: usize) {
        self.buffer_manager.set_read_position(pos);
    }

    pub fn set_wrap_around(&mut self, wrap: bool) {
        self.buffer_manager.set_wrap_around(wrap);
    }

    pub fn set_sub_loop_region(&mut self, start: usize, end: usize) {
        if !self.is_recording {
            self.buffer_manager.set_region(start, end);
        }
    }

    pub fn clear_sub_loop_region(&mut self) {
        self.buffer_manager.clear_region();
    }

    pub fn buffer(&self) -> &AudioBuffer {
        self.buffer_manager.buffer()
    }

    pub fn set_length(&mut self, length: usize) {
        self.buffer_manager.set_length(length);
    }

    pub fn num_channels(&self) -> usize {
        self.channels
    }

    pub fn playback_speed(&self) -> f32 {
        self.playback.playback_speed()
    }

    pub fn set_playback_speed(&mut self, speed: f32) {
        self.playback.set_playback_speed(speed);
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.playback.pitch_semitones()
    }

    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        self.playback.set_pitch_semitones(semitones);
    }

    pub fn keep_pitch(&self) -> bool {
        self.playback.keep_pitch()
    }

    pub fn set_keep_pitch(&mut self, keep: bool) {
        self.playback.set_keep_pitch(keep);
    }

    pub fn is_direction_forward(&self) -> bool {
        self.playback.is_direction_forward()
    }

    pub fn set_direction_forward(&mut self) {
        self.playback.set_direction_forward();
    }

    pub fn set_direction_backward(&mut self) {
        self.playback.set_direction_backward();
    }

    pub fn track_volume(&self) -> f32 {
        self.volume.track_volume()
    }

    pub fn set_track_volume(&mut self, volume: f32) {
        self.volume.set_track_volume(volume);
    }

    pub fn is_muted(&self) -> bool {
        self.volume.is_muted()
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.volume.set_muted(muted);
    }

    pub fn is_soloed(&self) -> bool {
        self.volume.is_soloed()
    }

    pub fn set_soloed(&mut self, soloed: bool) {
        self.volume.set_soloed(soloed);
    }

    pub fn set_overdub_new_gain(&mut self, gain: f32) {
        self.volume.set_overdub_new_gain(gain);
    }

    pub fn set_overdub_old_gain(&mut self, gain: f32) {
        self.volume.set_overdub_old_gain(gain);
    }

    pub fn toggle_output_normalization(&mut self) {
        self.volume.toggle_output_normalization();
    }

    pub fn is_normalizing_output(&self) -> bool {
        self.volume.is_normalizing_output()
    }
}

impl Default for LoopTrack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared_track() -> LoopTrack {
        let mut track = LoopTrack::new();
        track.prepare(48000, 512, 2, 1, 5);
        track
    }

    fn block(frames: usize, value: f32) -> AudioBuffer {
        let mut buf = AudioBuffer::new(2, frames);
        for ch in 0..2 {
            buf.channel_mut(ch).fill(value);
        }
        buf
    }

    #[test]
    fn test_record_then_finalize_sets_length() {
        let mut track = prepared_track();
        let input = block(512, 0.5);
        for _ in 0..4 {
            track.process_record(&input, 512, false);
        }
        assert!(track.is_currently_recording());
        track.finalize_layer(false);
        assert_eq!(track.length(), 2048);
        assert!(!track.is_currently_recording());
    }

    #[test]
    fn test_overdub_mixes_then_undo_restores() {
        let mut track = prepared_track();
        let input = block(512, 0.5);
        track.process_record(&input, 512, false);
        track.finalize_layer(false);

        let overdub = block(512, 0.25);
        track.process_record(&overdub, 512, true);
        track.finalize_layer(true);

        // Interior samples carry both layers (edges are crossfaded)
        let mid = track.length() / 2;
        assert!((track.buffer().channel(0)[mid] - 0.75).abs() < 1e-6);

        assert!(track.undo());
        assert!((track.buffer().channel(0)[mid] - 0.5).abs() < 1e-6);
        assert!(track.redo());
        assert!((track.buffer().channel(0)[mid] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_undo_first_layer_empties_track() {
        let mut track = prepared_track();
        let input = block(512, 0.5);
        track.process_record(&input, 512, false);
        track.finalize_layer(false);
        assert_eq!(track.length(), 512);

        assert!(track.undo());
        assert_eq!(track.length(), 0);
    }

    #[test]
    fn test_cancel_discards_pass() {
        let mut track = prepared_track();
        let input = block(512, 0.5);
        track.process_record(&input, 512, false);
        track.cancel_current_recording();
        track.finalize_layer(false);
        assert_eq!(track.length(), 0);
    }

    #[test]
    fn test_playback_applies_track_volume() {
        let mut track = prepared_track();
        let input = block(512, 0.5);
        track.process_record(&input, 512, false);
        track.finalize_layer(false);

        track.set_track_volume(0.5);
        let mut out = AudioBuffer::new(2, 512);
        // First block ramps from the default gain; later blocks are settled
        track.process_playback(&mut out, 512, false);
        out.clear();
        track.process_playback(&mut out, 512, false);
        let mid = 256;
        assert!((out.channel(0)[mid] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_quantized_overdub_stops_at_seam() {
        let mut track = prepared_track();
        let input = block(512, 0.5);
        track.process_record(&input, 512, false);
        track.finalize_layer(false);
        track.set_wrap_around(false);

        // Walk playback most of the way through the loop, then try to
        // overdub past the seam
        let mut out = AudioBuffer::new(2, 512);
        track.process_playback(&mut out, 384, true);
        let stopped = track.process_record(&block(512, 0.3), 256, true);
        assert!(stopped);
        assert!(!track.is_currently_recording());
    }

    #[test]
    fn test_sub_loop_region_narrows_playback() {
        let mut track = prepared_track();
        let mut input = AudioBuffer::new(2, 512);
        for ch in 0..2 {
            for (i, s) in input.channel_mut(ch).iter_mut().enumerate() {
                *s = i as f32;
            }
        }
        track.process_record(&input, 512, false);
        track.finalize_layer(false);

        // Focus on [200, 210): ten frames loop over and over
        track.set_sub_loop_region(200, 210);
        let mut out = AudioBuffer::new(2, 20);
        track.process_playback(&mut out, 20, false);
        assert_eq!(out.channel(0)[0], 200.0);
        assert_eq!(out.channel(0)[9], 209.0);
        assert_eq!(out.channel(0)[10], 200.0);

        track.clear_sub_loop_region();
        let mut out = AudioBuffer::new(2, 4);
        track.process_playback(&mut out, 4, false);
        assert_eq!(out.channel(0)[0], 0.0);
    }

    #[test]
    fn test_mute_preserves_volume_through_cycle() {
        let mut track = prepared_track();
        track.set_track_volume(0.8);
        track.set_muted(true);
        track.set_muted(false);
        assert!((track.track_volume() - 0.8).abs() < 1e-6);
    }
}
