//! Ownership of one track's loop sample buffer plus the windowed access
//! paths the record/playback pipeline uses.

use crate::audio::buffer::AudioBuffer;
use crate::audio::fifo::LoopFifo;

/// Owns the loop buffer and serves read/write regions through a [`LoopFifo`].
///
/// The caller supplies the per-region apply function, so recording (copy-in)
/// and overdubbing (gain-mix) share one write path without this type knowing
/// about gains.
#[derive(Debug, Default)]
pub struct BufferManager {
    buffer: AudioBuffer,
    scratch: AudioBuffer,
    fifo: LoopFifo,
    length: usize,
    provisional_length: usize,
    previous_read_pos: f64,
    last_playback_rate: f64,
}

impl BufferManager {
    pub fn new() -> Self {
        Self {
            fifo: LoopFifo::new(),
            previous_read_pos: -1.0,
            last_playback_rate: 1.0,
            ..Self::default()
        }
    }

    pub fn prepare(&mut self, channels: usize, buffer_frames: usize) {
        self.buffer.resize(channels, buffer_frames);
        self.scratch.resize(channels, buffer_frames);
        self.clear();
    }

    pub fn clear(&mut self) {
        self.fifo.prepare(self.buffer.num_frames());
        self.buffer.clear();
        self.length = 0;
        self.provisional_length = 0;
        self.previous_read_pos = -1.0;
        self.last_playback_rate = 1.0;
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut AudioBuffer {
        &mut self.buffer
    }

    /// Swap the live buffer with another of the same shape (undo/redo).
    pub fn swap_buffer(&mut self, other: &mut AudioBuffer) {
        std::mem::swap(&mut self.buffer, other);
    }

    pub fn num_channels(&self) -> usize {
        self.buffer.num_channels()
    }

    pub fn capacity_frames(&self) -> usize {
        self.buffer.num_frames()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn set_length(&mut self, length: usize) {
        self.length = length.min(self.capacity_frames());
        if self.length == 0 {
            self.fifo.prepare(self.capacity_frames());
        } else {
            self.fifo.set_musical_length(self.length);
        }
    }

    pub fn provisional_length(&self) -> usize {
        self.provisional_length
    }

    pub fn read_position(&self) -> usize {
        self.fifo.read_pos()
    }

    pub fn write_position(&self) -> usize {
        self.fifo.write_pos()
    }

    pub fn set_read_position(&mut self, pos: usize) {
        self.fifo.set_read_pos(pos);
    }

    pub fn set_wrap_around(&mut self, wrap: bool) {
        self.fifo.set_wrap_around(wrap);
    }

    pub fn set_last_playback_rate(&mut self, rate: f64) {
        self.last_playback_rate = rate;
    }

    /// Narrow playback to `[start, end)` of the committed loop.
    pub fn set_region(&mut self, start: usize, end: usize) {
        if self.length == 0 {
            return;
        }
        self.fifo.set_region(start.min(self.length), end.min(self.length));
    }

    pub fn clear_region(&mut self) {
        self.fifo.clear_region(self.length);
    }

    /// Snap the write cursor onto the read cursor (overdub pass start).
    pub fn sync_write_to_read(&mut self) {
        self.fifo.sync_write_to_read();
    }

    /// Edge-detect a decrease of the read cursor across calls.
    pub fn has_wrapped_around(&mut self) -> bool {
        let current = self.fifo.exact_read_pos();
        let wrapped = current < self.previous_read_pos;
        self.previous_read_pos = current;
        wrapped
    }

    /// Write `n` frames of `source` through `apply(dst, src, overdub)`.
    ///
    /// When the last playback rate was negative the source is reversed into
    /// the scratch buffer first so overdubs land in tape order. Returns true
    /// when a disabled wrap clipped the request, which is the caller's cue
    /// to stop recording at the seam.
    pub fn write_to_buffer<F>(
        &mut self,
        mut apply: F,
        source: &AudioBuffer,
        n: usize,
        overdub: bool,
        sync_write_with_read: bool,
    ) -> bool
    where
        F: FnMut(&mut [f32], &[f32], bool),
    {
        let regions = self.fifo.prepare_write(n);
        let reverse = self.last_playback_rate < 0.0;
        let channels = self.buffer.num_channels().min(source.num_channels());

        for ch in 0..channels {
            let mut src_offset = 0;
            for (start, len) in [(regions.start1, regions.len1), (regions.start2, regions.len2)] {
                if len == 0 {
                    continue;
                }
                if reverse {
                    let scratch = self.scratch.channel_mut(ch);
                    let src = &source.channel(ch)[src_offset..src_offset + len];
                    for (i, s) in src.iter().rev().enumerate() {
                        scratch[i] = *s;
                    }
                }
                let dst = &mut self.buffer.channel_mut(ch)[start..start + len];
                if reverse {
                    apply(dst, &self.scratch.channel(ch)[..len], overdub);
                } else {
                    apply(dst, &source.channel(ch)[src_offset..src_offset + len], overdub);
                }
                src_offset += len;
            }
        }

        let written = regions.len1 + regions.len2;
        if written > 0 {
            self.fifo.finished_write(written, overdub, sync_write_with_read);
        }
        let prevented_wrap = !self.fifo.wrap_around() && regions.len2 == 0 && n > regions.len1;
        if !prevented_wrap {
            self.update_loop_length(written, overdub);
        }
        prevented_wrap
    }

    /// Read `n` frames into `dest` through `apply(dst, src)`.
    ///
    /// Negative speed reads by direct reverse indexing instead of FIFO
    /// regions, preserving phase continuity at the seam.
    pub fn read_from_buffer<F>(
        &mut self,
        mut apply: F,
        dest: &mut AudioBuffer,
        n: usize,
        speed: f64,
        overdub: bool,
    ) -> bool
    where
        F: FnMut(&mut [f32], &[f32]),
    {
        if self.fifo.musical_length() == 0 || n == 0 {
            return false;
        }
        let channels = self.buffer.num_channels().min(dest.num_channels());

        if speed >= 0.0 {
            let regions = self.fifo.prepare_read(n);
            for ch in 0..channels {
                if regions.len1 > 0 {
                    apply(
                        &mut dest.channel_mut(ch)[..regions.len1],
                        &self.buffer.channel(ch)[regions.start1..regions.start1 + regions.len1],
                    );
                }
                if regions.len2 > 0 {
                    apply(
                        &mut dest.channel_mut(ch)[regions.len1..regions.len1 + regions.len2],
                        &self.buffer.channel(ch)[regions.start2..regions.start2 + regions.len2],
                    );
                }
            }
        } else {
            self.fifo.sync_write_to_read();
            for ch in 0..channels {
                for i in 0..n.min(dest.num_frames()) {
                    dest.channel_mut(ch)[i] = self.buffer.channel(ch)[self.fifo.reverse_read_index(i)];
                }
            }
        }

        self.fifo.finished_read(n, speed, overdub);
        self.last_playback_rate = speed;
        true
    }

    /// Produce a contiguous window of `source_frames` across the wrap, then
    /// compensate the read cursor for the resampler's output/input ratio so
    /// the net advance per block is `speed * output_frames`.
    pub fn linearize_and_read(
        &mut self,
        dest: &mut AudioBuffer,
        source_frames: usize,
        output_frames: usize,
        speed: f64,
        overdub: bool,
    ) -> bool {
        if self.length == 0 {
            return false;
        }
        let ok = self.read_from_buffer(
            |dst, src| dst.copy_from_slice(src),
            dest,
            source_frames,
            speed,
            overdub,
        );
        self.adjust_read(output_frames as i64 - source_frames as i64, speed, overdub);
        ok
    }

    /// Commit the current pass. The first commit promotes the provisional
    /// length to the loop length and narrows the FIFO to it.
    pub fn finalize_layer(&mut self, overdub: bool) {
        let current = self.length.max(self.provisional_length);
        if current == 0 {
            return;
        }
        if self.length == 0 {
            self.fifo.set_musical_length(current);
            self.length = current;
        }
        self.provisional_length = 0;
        self.fifo.finished_write(0, overdub, true);
    }

    /// Discard the provisional pass without committing.
    pub fn cancel_provisional(&mut self) {
        self.provisional_length = 0;
        if self.length == 0 {
            self.fifo.prepare(self.buffer.num_frames());
        }
    }

    /// Load already-decoded frames as the committed loop content.
    pub fn load_content(&mut self, source: &AudioBuffer, frames: usize) {
        self.clear();
        let n = frames.min(self.capacity_frames());
        self.buffer.copy_from(source, n);
        self.length = n;
        self.fifo.set_musical_length(n);
    }

    fn update_loop_length(&mut self, written: usize, overdub: bool) {
        let cap = if overdub { self.length } else { self.capacity_frames() };
        self.provisional_length = (self.provisional_length + written).min(cap);
    }

    fn adjust_read(&mut self, frames: i64, speed: f64, overdub: bool) {
        if frames == 0 {
            return;
        }
        if frames > 0 {
            self.fifo.finished_read(frames as usize, speed, overdub);
        } else {
            self.fifo.finished_read((-frames) as usize, -speed, overdub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_block(frames: usize, value: f32) -> AudioBuffer {
        let mut buf = AudioBuffer::new(2, frames);
        for ch in 0..2 {
            buf.channel_mut(ch).fill(value);
        }
        buf
    }

    fn copy_apply(dst: &mut [f32], src: &[f32], _overdub: bool) {
        dst.copy_from_slice(src);
    }

    #[test]
    fn test_first_pass_sets_length_on_finalize() {
        let mut mgr = BufferManager::new();
        mgr.prepare(2, 1024);
        let input = input_block(256, 0.5);
        for _ in 0..3 {
            mgr.write_to_buffer(copy_apply, &input, 256, false, false);
        }
        assert_eq!(mgr.provisional_length(), 768);
        mgr.finalize_layer(false);
        assert_eq!(mgr.length(), 768);
        assert_eq!(mgr.provisional_length(), 0);
    }

    #[test]
    fn test_overdub_does_not_grow_length() {
        let mut mgr = BufferManager::new();
        mgr.prepare(2, 1024);
        let input = input_block(256, 0.5);
        mgr.write_to_buffer(copy_apply, &input, 256, false, false);
        mgr.finalize_layer(false);
        assert_eq!(mgr.length(), 256);

        mgr.write_to_buffer(copy_apply, &input, 256, true, false);
        mgr.finalize_layer(true);
        assert_eq!(mgr.length(), 256);
    }

    #[test]
    fn test_prevented_wrap_reported() {
        let mut mgr = BufferManager::new();
        mgr.prepare(2, 8);
        let input = input_block(8, 0.3);
        mgr.write_to_buffer(copy_apply, &input, 8, false, false);
        mgr.finalize_layer(false);
        mgr.set_wrap_around(false);

        // Read up to position 6, then try to write 4 frames
        let mut out = AudioBuffer::new(2, 8);
        mgr.read_from_buffer(|d, s| d.copy_from_slice(s), &mut out, 6, 1.0, true);
        let prevented = mgr.write_to_buffer(copy_apply, &input, 4, true, false);
        assert!(prevented);
    }

    #[test]
    fn test_linearize_advances_by_speed_times_output() {
        let mut mgr = BufferManager::new();
        mgr.prepare(2, 48000);
        let input = input_block(48000, 0.25);
        mgr.write_to_buffer(copy_apply, &input, 48000, false, false);
        mgr.finalize_layer(false);

        let mut dest = AudioBuffer::new(2, 1024);
        // 0.5x speed: 512 output frames consume 256 source frames
        mgr.linearize_and_read(&mut dest, 256, 512, 0.5, false);
        assert!((mgr.fifo.exact_read_pos() - 256.0).abs() < 1e-6);
    }

    #[test]
    fn test_wrap_detection() {
        let mut mgr = BufferManager::new();
        mgr.prepare(2, 100);
        let input = input_block(100, 1.0);
        mgr.write_to_buffer(copy_apply, &input, 100, false, false);
        mgr.finalize_layer(false);

        let mut out = AudioBuffer::new(2, 60);
        mgr.read_from_buffer(|d, s| d.copy_from_slice(s), &mut out, 60, 1.0, false);
        assert!(!mgr.has_wrapped_around());
        mgr.read_from_buffer(|d, s| d.copy_from_slice(s), &mut out, 60, 1.0, false);
        assert!(mgr.has_wrapped_around());
    }

    #[test]
    fn test_reverse_read_walks_backwards() {
        let mut mgr = BufferManager::new();
        mgr.prepare(1, 8);
        let mut input = AudioBuffer::new(1, 8);
        for (i, s) in input.channel_mut(0).iter_mut().enumerate() {
            *s = i as f32;
        }
        mgr.write_to_buffer(copy_apply, &input, 8, false, false);
        mgr.finalize_layer(false);

        let mut out = AudioBuffer::new(1, 4);
        mgr.read_from_buffer(|d, s| d.copy_from_slice(s), &mut out, 4, -1.0, false);
        // Anchor starts at the read cursor (0) and walks backwards through
        // the loop: 0, 7, 6, 5.
        assert_eq!(out.channel(0), &[0.0, 7.0, 6.0, 5.0]);
    }
}
