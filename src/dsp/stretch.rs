//! Single-channel time-stretch / pitch-shift kernel.
//!
//! Two stages: an overlap-add stage that retimes the signal without touching
//! pitch, followed by a linear-interpolation resampler that shifts pitch and
//! speed together. The three user parameters map onto the stages as:
//!
//! - `tempo`: speed change with pitch preserved (OLA stage)
//! - `rate`:  speed change that also shifts pitch (resampler stage)
//! - `pitch`: pitch shift in semitones with duration preserved
//!
//! Net speed is `tempo * rate`; net pitch factor is `rate * 2^(semitones/12)`.
//! With everything neutral the kernel is an exact passthrough after the
//! first segment of warm-up latency.

/// Synthesis segment length in frames
const SEGMENT: usize = 1024;
/// Crossfade overlap between consecutive segments
const OVERLAP: usize = 256;
/// Frames emitted per synthesis cycle
const SYNTH_HOP: usize = SEGMENT - OVERLAP;

pub struct Stretcher {
    tempo: f32,
    rate: f32,
    pitch_semitones: f32,

    // input frames consumed per stretched output frame
    ola_factor: f64,
    resample_step: f64,

    input: Vec<f32>,
    analysis_pos: f64,
    prev_tail: [f32; OVERLAP],
    primed: bool,

    stretched: Vec<f32>,
    resample_phase: f64,

    output: Vec<f32>,
}

impl Stretcher {
    pub fn new() -> Self {
        let mut s = Self {
            tempo: 1.0,
            rate: 1.0,
            pitch_semitones: 0.0,
            ola_factor: 1.0,
            resample_step: 1.0,
            input: Vec::with_capacity(SEGMENT * 16),
            analysis_pos: 0.0,
            prev_tail: [0.0; OVERLAP],
            primed: false,
            stretched: Vec::with_capacity(SEGMENT * 16),
            resample_phase: 0.0,
            output: Vec::with_capacity(SEGMENT * 16),
        };
        s.update_factors();
        s
    }

    pub fn set_tempo(&mut self, tempo: f32) {
        if tempo > 0.0 {
            self.tempo = tempo;
            self.update_factors();
        }
    }

    pub fn set_rate(&mut self, rate: f32) {
        if rate > 0.0 {
            self.rate = rate;
            self.update_factors();
        }
    }

    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        self.pitch_semitones = semitones;
        self.update_factors();
    }

    fn update_factors(&mut self) {
        let pitch_factor = (self.pitch_semitones / 12.0).exp2() as f64;
        self.ola_factor = self.tempo as f64 / pitch_factor;
        self.resample_step = self.rate as f64 * pitch_factor;
    }

    /// Drop all buffered audio and reset phases. Called when the playback
    /// path switches modes so stale segments cannot smear into the new one.
    pub fn clear(&mut self) {
        self.input.clear();
        self.stretched.clear();
        self.output.clear();
        self.analysis_pos = 0.0;
        self.resample_phase = 0.0;
        self.prev_tail = [0.0; OVERLAP];
        self.primed = false;
    }

    /// Feed input frames and run as much of the pipeline as they allow.
    pub fn put_samples(&mut self, samples: &[f32]) {
        // Guard frames fed past the consumption rate accumulate; retire the
        // oldest input rather than growing past the preallocated capacity
        let capacity = self.input.capacity();
        if self.input.len() + samples.len() > capacity {
            let excess = self.input.len() + samples.len() - capacity;
            let drop = excess.min(self.input.len());
            self.input.drain(..drop);
            self.analysis_pos = (self.analysis_pos - drop as f64).max(0.0);
        }
        let room = capacity - self.input.len();
        self.input.extend_from_slice(&samples[..samples.len().min(room)]);
        self.process_pending();
    }

    /// Frames ready to be received.
    pub fn available(&self) -> usize {
        self.output.len()
    }

    /// Pop up to `dest.len()` processed frames; returns how many were written.
    pub fn receive_samples(&mut self, dest: &mut [f32]) -> usize {
        let n = dest.len().min(self.output.len());
        dest[..n].copy_from_slice(&self.output[..n]);
        self.output.drain(..n);
        n
    }

    fn process_pending(&mut self) {
        // OLA stage: synthesize hops while a full segment of input is in view
        while (self.analysis_pos as usize) + SEGMENT <= self.input.len() {
            let seg_start = self.analysis_pos as usize;

            if self.stretched.len() + SYNTH_HOP > self.stretched.capacity() {
                break;
            }

            if self.primed {
                for i in 0..OVERLAP {
                    let t = i as f32 / OVERLAP as f32;
                    let sample = self.prev_tail[i] * (1.0 - t) + self.input[seg_start + i] * t;
                    self.stretched.push(sample);
                }
            } else {
                self.stretched.extend_from_slice(&self.input[seg_start..seg_start + OVERLAP]);
                self.primed = true;
            }
            self.stretched.extend_from_slice(&self.input[seg_start + OVERLAP..seg_start + SYNTH_HOP]);
            self.prev_tail.copy_from_slice(&self.input[seg_start + SYNTH_HOP..seg_start + SEGMENT]);

            self.analysis_pos += SYNTH_HOP as f64 * self.ola_factor;

            // Retire input the analysis window has moved past
            let consumed = self.analysis_pos as usize;
            if consumed > 0 {
                self.input.drain(..consumed);
                self.analysis_pos -= consumed as f64;
            }
        }

        // Resampler stage: one stretched frame of lookahead for interpolation
        while (self.resample_phase as usize) + 1 < self.stretched.len() {
            if self.output.len() == self.output.capacity() {
                break;
            }
            let idx = self.resample_phase as usize;
            let frac = (self.resample_phase - idx as f64) as f32;
            let sample = self.stretched[idx] + frac * (self.stretched[idx + 1] - self.stretched[idx]);
            self.output.push(sample);
            self.resample_phase += self.resample_step;
        }
        let consumed = self.resample_phase as usize;
        if consumed > 0 {
            let consumed = consumed.min(self.stretched.len());
            self.stretched.drain(..consumed);
            self.resample_phase -= consumed as f64;
        }
    }
}

impl Default for Stretcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(st: &mut Stretcher) -> Vec<f32> {
        let mut out = vec![0.0; st.available()];
        st.receive_samples(&mut out);
        out
    }

    #[test]
    fn test_neutral_settings_pass_dc_through() {
        let mut st = Stretcher::new();
        st.put_samples(&[1.0; SEGMENT * 4]);
        let out = drain(&mut st);
        assert!(out.len() >= SYNTH_HOP);
        // Skip warm-up fade, everything after must be unity
        for &s in &out[OVERLAP..] {
            assert!((s - 1.0).abs() < 1e-6, "got {s}");
        }
    }

    #[test]
    fn test_half_tempo_roughly_doubles_output() {
        let mut st = Stretcher::new();
        st.set_tempo(0.5);
        for _ in 0..8 {
            st.put_samples(&[0.5; SEGMENT]);
        }
        let produced = st.available();
        // 8 segments in, roughly 16 segments worth out (minus latency)
        assert!(produced as f64 > SEGMENT as f64 * 12.0, "got {produced}");
    }

    #[test]
    fn test_double_rate_roughly_halves_output() {
        let mut st = Stretcher::new();
        st.set_rate(2.0);
        for _ in 0..8 {
            st.put_samples(&[0.5; SEGMENT]);
        }
        let produced = st.available();
        assert!(produced < SEGMENT * 5, "got {produced}");
        assert!(produced > SEGMENT * 2, "got {produced}");
    }

    #[test]
    fn test_clear_discards_state() {
        let mut st = Stretcher::new();
        st.put_samples(&[1.0; SEGMENT * 2]);
        assert!(st.available() > 0);
        st.clear();
        assert_eq!(st.available(), 0);
    }

    #[test]
    fn test_receive_is_bounded_by_available() {
        let mut st = Stretcher::new();
        st.put_samples(&[1.0; SEGMENT]);
        let mut dest = [0.0; SEGMENT * 4];
        let got = st.receive_samples(&mut dest);
        assert!(got <= SEGMENT * 4);
    }
}
