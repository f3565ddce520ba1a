//! Cursor bookkeeping for the loop buffers.
//!
//! `LoopFifo` tracks read/write positions over one circular loop buffer,
//! including fractional reads for variable-speed playback, reverse indexing
//! and an optional sub-loop window. `LoopLifo` issues slot indices for the
//! undo/redo layer rings. Neither owns any samples.

/// Up to two contiguous index regions returned by a windowed read or write.
///
/// The second region is non-empty only when the request crosses the loop
/// seam and wrapping is permitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Regions {
    pub start1: usize,
    pub len1: usize,
    pub start2: usize,
    pub len2: usize,
}

/// Circular read/write cursor over one loop buffer.
#[derive(Debug, Default)]
pub struct LoopFifo {
    buffer_size: usize,
    musical_length: usize,
    region_start: usize,
    write_pos: usize,
    read_pos: f64,
    wrap_around: bool,
}

impl LoopFifo {
    pub fn new() -> Self {
        Self {
            wrap_around: true,
            ..Self::default()
        }
    }

    /// Reset for a buffer of `total_size` frames. The musical length starts
    /// out equal to the full buffer; it is narrowed once a loop is committed.
    pub fn prepare(&mut self, total_size: usize) {
        self.buffer_size = total_size;
        self.musical_length = total_size;
        self.region_start = 0;
        self.write_pos = 0;
        self.read_pos = 0.0;
    }

    pub fn clear(&mut self) {
        self.prepare(self.buffer_size);
    }

    pub fn set_musical_length(&mut self, length: usize) {
        self.musical_length = length.min(self.buffer_size);
        if self.musical_length > 0 {
            self.write_pos %= self.musical_length;
            self.read_pos = self.read_pos.rem_euclid(self.musical_length as f64);
        }
    }

    pub fn musical_length(&self) -> usize {
        self.musical_length
    }

    pub fn set_wrap_around(&mut self, wrap: bool) {
        self.wrap_around = wrap;
    }

    pub fn wrap_around(&self) -> bool {
        self.wrap_around
    }

    /// Narrow the cursor to the window `[start, end)` of the buffer and
    /// reseat both cursors at the window start.
    pub fn set_region(&mut self, start: usize, end: usize) {
        let end = end.min(self.buffer_size);
        if start >= end {
            return;
        }
        self.region_start = start;
        self.musical_length = end - start;
        self.write_pos = 0;
        self.read_pos = 0.0;
    }

    /// Restore the full window `[0, full_length)`.
    pub fn clear_region(&mut self, full_length: usize) {
        self.region_start = 0;
        self.set_musical_length(full_length);
    }

    pub fn region_start(&self) -> usize {
        self.region_start
    }

    /// Regions for writing up to `n` frames from the write cursor.
    ///
    /// With wrapping disabled the request is clipped at the seam; the caller
    /// detects the clip by comparing `len1 + len2` against `n`.
    pub fn prepare_write(&self, n: usize) -> Regions {
        if self.musical_length == 0 || n == 0 {
            return Regions::default();
        }
        let remaining = self.musical_length - self.write_pos;
        let len1 = n.min(remaining);
        let len2 = if self.wrap_around { n - len1 } else { 0 };
        Regions {
            start1: self.region_start + self.write_pos,
            len1,
            start2: self.region_start,
            len2: len2.min(self.musical_length),
        }
    }

    /// Advance the write cursor by `k` frames. When `sync_write_with_read`
    /// (or overdubbing) the cursor snaps to the read position afterwards so
    /// overdubs stay aligned under speed and direction changes.
    pub fn finished_write(&mut self, k: usize, overdub: bool, sync_write_with_read: bool) {
        if self.musical_length == 0 {
            return;
        }
        self.write_pos = (self.write_pos + k) % self.musical_length;
        if overdub || sync_write_with_read {
            self.write_pos = self.read_pos as usize % self.musical_length;
        }
    }

    /// Regions for reading `n` frames from the read cursor. Reads always
    /// wrap; only writes honor the wrap policy.
    pub fn prepare_read(&self, n: usize) -> Regions {
        if self.musical_length == 0 || n == 0 {
            return Regions::default();
        }
        let start = self.read_pos as usize % self.musical_length;
        let remaining = self.musical_length - start;
        let len1 = n.min(remaining);
        Regions {
            start1: self.region_start + start,
            len1,
            start2: self.region_start,
            len2: (n - len1).min(self.musical_length),
        }
    }

    /// Advance the read cursor by `rate * k` frames (rate may be fractional
    /// and/or negative) and reduce it back into `[0, musical_length)`.
    pub fn finished_read(&mut self, k: usize, rate: f64, overdub: bool) {
        if self.musical_length == 0 {
            return;
        }
        self.read_pos += rate * k as f64;
        self.read_pos = self.read_pos.rem_euclid(self.musical_length as f64);
        if overdub {
            self.write_pos = self.read_pos as usize;
        }
    }

    /// Index for backward traversal: `offset` frames behind the write cursor.
    pub fn reverse_read_index(&self, offset: usize) -> usize {
        if self.musical_length == 0 {
            return self.region_start;
        }
        let idx =
            (self.write_pos as i64 - offset as i64).rem_euclid(self.musical_length as i64) as usize;
        self.region_start + idx
    }

    /// Snap the write cursor onto the current read position.
    pub fn sync_write_to_read(&mut self) {
        if self.musical_length > 0 {
            self.write_pos = self.read_pos as usize % self.musical_length;
        }
    }

    pub fn set_read_pos(&mut self, pos: usize) {
        if self.musical_length > 0 {
            self.read_pos = (pos % self.musical_length) as f64;
        }
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos as usize
    }

    pub fn exact_read_pos(&self) -> f64 {
        self.read_pos
    }
}

/// Bounded stack cursor for the undo/redo layer rings.
///
/// Pushing past capacity silently overwrites the oldest layer; popping an
/// empty stack yields nothing.
#[derive(Debug, Default)]
pub struct LoopLifo {
    capacity: usize,
    slot_to_push: usize,
    active_layers: usize,
}

impl LoopLifo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.slot_to_push = 0;
        self.active_layers = 0;
    }

    /// Slot index for the next layer; advances the cursor.
    pub fn push(&mut self) -> Option<usize> {
        if self.capacity == 0 {
            return None;
        }
        let slot = self.slot_to_push;
        self.slot_to_push = (self.slot_to_push + 1) % self.capacity;
        self.active_layers = (self.active_layers + 1).min(self.capacity);
        Some(slot)
    }

    /// Slot index of the top layer; retreats the cursor.
    pub fn pop(&mut self) -> Option<usize> {
        if self.active_layers == 0 {
            return None;
        }
        self.slot_to_push = (self.slot_to_push + self.capacity - 1) % self.capacity;
        self.active_layers -= 1;
        Some(self.slot_to_push)
    }

    pub fn active_layers(&self) -> usize {
        self.active_layers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_regions_wrap() {
        let mut fifo = LoopFifo::new();
        fifo.prepare(8);
        fifo.finished_write(6, false, false);
        let r = fifo.prepare_write(4);
        assert_eq!(r, Regions { start1: 6, len1: 2, start2: 0, len2: 2 });
    }

    #[test]
    fn test_write_clipped_when_wrap_disabled() {
        let mut fifo = LoopFifo::new();
        fifo.prepare(8);
        fifo.set_wrap_around(false);
        fifo.finished_write(6, false, false);
        let r = fifo.prepare_write(4);
        assert_eq!(r.len1, 2);
        assert_eq!(r.len2, 0);
    }

    #[test]
    fn test_fractional_read_advance() {
        let mut fifo = LoopFifo::new();
        fifo.prepare(100);
        fifo.finished_read(10, 0.5, false);
        assert!((fifo.exact_read_pos() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_rate_wraps_backwards() {
        let mut fifo = LoopFifo::new();
        fifo.prepare(100);
        fifo.finished_read(10, -1.0, false);
        assert!((fifo.exact_read_pos() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_reverse_read_index() {
        let mut fifo = LoopFifo::new();
        fifo.prepare(8);
        fifo.finished_write(3, false, false);
        assert_eq!(fifo.reverse_read_index(0), 3);
        assert_eq!(fifo.reverse_read_index(5), 6);
    }

    #[test]
    fn test_zero_length_short_circuits() {
        let mut fifo = LoopFifo::new();
        fifo.prepare(0);
        assert_eq!(fifo.prepare_write(16), Regions::default());
        assert_eq!(fifo.prepare_read(16), Regions::default());
        fifo.finished_read(16, 1.0, false);
        assert_eq!(fifo.read_pos(), 0);
    }

    #[test]
    fn test_overdub_snaps_write_to_read() {
        let mut fifo = LoopFifo::new();
        fifo.prepare(100);
        fifo.finished_read(10, 1.5, true);
        assert_eq!(fifo.write_pos(), 15);
    }

    #[test]
    fn test_region_window() {
        let mut fifo = LoopFifo::new();
        fifo.prepare(100);
        fifo.set_region(20, 30);
        assert_eq!(fifo.musical_length(), 10);
        let r = fifo.prepare_read(6);
        assert_eq!(r.start1, 20);
        fifo.finished_read(8, 1.0, false);
        let r = fifo.prepare_read(6);
        assert_eq!(r.start1, 28);
        assert_eq!(r.len1, 2);
        assert_eq!(r.start2, 20);
        assert_eq!(r.len2, 4);
        fifo.clear_region(50);
        assert_eq!(fifo.musical_length(), 50);
        assert_eq!(fifo.region_start(), 0);
    }

    #[test]
    fn test_lifo_push_pop_cycle() {
        let mut lifo = LoopLifo::new();
        lifo.prepare(3);
        assert_eq!(lifo.push(), Some(0));
        assert_eq!(lifo.push(), Some(1));
        assert_eq!(lifo.pop(), Some(1));
        assert_eq!(lifo.pop(), Some(0));
        assert_eq!(lifo.pop(), None);
    }

    #[test]
    fn test_lifo_overwrites_oldest_past_capacity() {
        let mut lifo = LoopLifo::new();
        lifo.prepare(2);
        lifo.push();
        lifo.push();
        assert_eq!(lifo.push(), Some(0));
        assert_eq!(lifo.active_layers(), 2);
    }
}
