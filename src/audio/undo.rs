//! Whole-buffer undo/redo for a loop track.
//!
//! Two fixed rings of full-length buffer slots plus one staging slot. A
//! commit swaps the staged pre-pass snapshot into the undo ring; undo/redo
//! swap whole buffers with the live track buffer. No sample copies happen
//! after staging, which keeps every commit O(1) on the audio thread.

use crate::audio::buffer::AudioBuffer;
use crate::audio::fifo::LoopLifo;

#[derive(Debug, Default)]
pub struct UndoStack {
    undo_lifo: LoopLifo,
    redo_lifo: LoopLifo,
    undo_buffers: Vec<AudioBuffer>,
    redo_buffers: Vec<AudioBuffer>,
    staging: AudioBuffer,
    /// Loop length captured alongside each staged snapshot
    lengths: Vec<usize>,
    redo_lengths: Vec<usize>,
    staged_length: usize,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, layers: usize, channels: usize, buffer_frames: usize) {
        self.undo_lifo.prepare(layers);
        self.redo_lifo.prepare(layers);
        self.undo_buffers = (0..layers).map(|_| AudioBuffer::new(channels, buffer_frames)).collect();
        self.redo_buffers = (0..layers).map(|_| AudioBuffer::new(channels, buffer_frames)).collect();
        self.staging.resize(channels, buffer_frames);
        self.lengths = vec![0; layers];
        self.redo_lengths = vec![0; layers];
        self.staged_length = 0;
    }

    pub fn clear(&mut self) {
        self.undo_lifo.clear();
        self.redo_lifo.clear();
        for buf in &mut self.undo_buffers {
            buf.clear();
        }
        for buf in &mut self.redo_buffers {
            buf.clear();
        }
        self.staging.clear();
        self.staged_length = 0;
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_lifo.active_layers()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_lifo.active_layers()
    }

    /// Capture the pre-pass state of the live buffer into staging. Called
    /// once before an overdub pass (or before the first pass, where it
    /// captures silence).
    pub fn stage_current_buffer(&mut self, source: &AudioBuffer, length: usize) {
        self.staging.copy_from(source, source.num_frames());
        self.staged_length = length;
    }

    /// Swap the staged snapshot into the undo ring. Every fresh commit
    /// invalidates the redo ring.
    pub fn finalize_copy_and_push(&mut self) {
        if let Some(slot) = self.undo_lifo.push() {
            std::mem::swap(&mut self.undo_buffers[slot], &mut self.staging);
            self.lengths[slot] = self.staged_length;
            self.redo_lifo.clear();
        }
    }

    /// Swap the top undo layer into `live`, parking the displaced buffer on
    /// the redo ring. Returns the restored loop length.
    pub fn undo(&mut self, live: &mut AudioBuffer, live_length: usize) -> Option<usize> {
        let u = self.undo_lifo.pop()?;
        if let Some(r) = self.redo_lifo.push() {
            std::mem::swap(&mut self.redo_buffers[r], live);
            self.redo_lengths[r] = live_length;
        }
        std::mem::swap(live, &mut self.undo_buffers[u]);
        Some(self.lengths[u])
    }

    /// Symmetric to [`undo`](Self::undo).
    pub fn redo(&mut self, live: &mut AudioBuffer, live_length: usize) -> Option<usize> {
        let r = self.redo_lifo.pop()?;
        if let Some(u) = self.undo_lifo.push() {
            std::mem::swap(&mut self.undo_buffers[u], live);
            self.lengths[u] = live_length;
        }
        std::mem::swap(live, &mut self.redo_buffers[r]);
        Some(self.redo_lengths[r])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(value: f32, frames: usize) -> AudioBuffer {
        let mut buf = AudioBuffer::new(1, frames);
        buf.channel_mut(0).fill(value);
        buf
    }

    #[test]
    fn test_undo_restores_staged_snapshot() {
        let mut stack = UndoStack::new();
        stack.prepare(3, 1, 8);

        let before = filled(1.0, 8);
        stack.stage_current_buffer(&before, 8);
        stack.finalize_copy_and_push();

        let mut live = filled(2.0, 8);
        let restored = stack.undo(&mut live, 8);
        assert_eq!(restored, Some(8));
        assert_eq!(live.channel(0), filled(1.0, 8).channel(0));
    }

    #[test]
    fn test_undo_empty_is_noop() {
        let mut stack = UndoStack::new();
        stack.prepare(3, 1, 8);
        let mut live = filled(2.0, 8);
        assert_eq!(stack.undo(&mut live, 8), None);
        assert_eq!(live.channel(0), filled(2.0, 8).channel(0));
    }

    #[test]
    fn test_undo_redo_is_identity() {
        let mut stack = UndoStack::new();
        stack.prepare(3, 1, 8);

        stack.stage_current_buffer(&filled(1.0, 8), 8);
        stack.finalize_copy_and_push();

        let mut live = filled(2.0, 8);
        stack.undo(&mut live, 8);
        stack.redo(&mut live, 8);
        assert_eq!(live.channel(0), filled(2.0, 8).channel(0));
        assert_eq!(stack.undo_depth(), 1);
        assert_eq!(stack.redo_depth(), 0);
    }

    #[test]
    fn test_new_commit_clears_redo() {
        let mut stack = UndoStack::new();
        stack.prepare(3, 1, 8);

        stack.stage_current_buffer(&filled(1.0, 8), 8);
        stack.finalize_copy_and_push();

        let mut live = filled(2.0, 8);
        stack.undo(&mut live, 8);
        assert_eq!(stack.redo_depth(), 1);

        stack.stage_current_buffer(&live, 8);
        stack.finalize_copy_and_push();
        assert_eq!(stack.redo_depth(), 0);
    }

    #[test]
    fn test_depth_bounded_by_capacity() {
        let mut stack = UndoStack::new();
        stack.prepare(2, 1, 8);
        for i in 0..5 {
            stack.stage_current_buffer(&filled(i as f32, 8), 8);
            stack.finalize_copy_and_push();
        }
        assert_eq!(stack.undo_depth(), 2);
    }
}
