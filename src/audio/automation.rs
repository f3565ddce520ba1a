//! Breakpoint automation evaluated on the control thread.
//!
//! Curves come in two modes: loop-based curves are sampled by loop pass
//! index whenever the engine reports a wrap, time-based curves are sampled
//! continuously against elapsed time. Either way the evaluated value is
//! turned into an ordinary parameter command and pushed onto the command
//! ring, so the audio thread never knows automation exists.

use crate::command::Command;
use std::collections::HashMap;

/// Which engine parameter a curve drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AutomationTarget {
    TrackVolume,
    PlaybackSpeed,
    PlaybackPitch,
    NewOverdubGain,
    ExistingAudioGain,
    MetronomeVolume,
    OutputGain,
}

impl AutomationTarget {
    fn to_command(self, track_index: usize, value: f32) -> Command {
        match self {
            AutomationTarget::TrackVolume => Command::SetTrackVolume(track_index, value),
            AutomationTarget::PlaybackSpeed => Command::SetPlaybackSpeed(track_index, value),
            AutomationTarget::PlaybackPitch => Command::SetPlaybackPitch(track_index, value),
            AutomationTarget::NewOverdubGain => Command::SetNewOverdubGain(track_index, value),
            AutomationTarget::ExistingAudioGain => Command::SetExistingAudioGain(track_index, value),
            AutomationTarget::MetronomeVolume => Command::SetMetronomeVolume(value),
            AutomationTarget::OutputGain => Command::SetOutputGain(value),
        }
    }
}

/// When a curve's breakpoints are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AutomationMode {
    /// Sampled once per loop pass (speed steps, layered builds)
    LoopBased,
    /// Sampled continuously (fades, metronome rides)
    TimeBased,
}

/// A single automation point: `x` is a loop index or seconds depending on
/// the curve mode.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Breakpoint {
    pub x: f64,
    pub value: f32,
}

impl Breakpoint {
    pub fn new(x: f64, value: f32) -> Self {
        Self { x, value }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AutomationCurve {
    pub target: AutomationTarget,
    pub track_index: usize,
    pub mode: AutomationMode,
    pub enabled: bool,
    /// Elapsed-time origin for time-based curves
    pub start_time: f64,
    breakpoints: Vec<Breakpoint>,
}

impl AutomationCurve {
    pub fn new(target: AutomationTarget, track_index: usize, mode: AutomationMode) -> Self {
        Self {
            target,
            track_index,
            mode,
            enabled: true,
            start_time: 0.0,
            breakpoints: Vec::new(),
        }
    }

    /// Insert keeping breakpoints sorted by `x`; a point at an existing `x`
    /// replaces it.
    pub fn add_breakpoint(&mut self, point: Breakpoint) {
        match self
            .breakpoints
            .binary_search_by(|p| p.x.partial_cmp(&point.x).unwrap_or(std::cmp::Ordering::Equal))
        {
            Ok(idx) => self.breakpoints[idx] = point,
            Err(idx) => self.breakpoints.insert(idx, point),
        }
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Step evaluation by loop pass: the breakpoint at `loop_index`, clamped
    /// to the curve's ends.
    pub fn value_at_loop_index(&self, loop_index: u32) -> Option<f32> {
        if self.breakpoints.is_empty() {
            return None;
        }
        let idx = (loop_index as usize).min(self.breakpoints.len() - 1);
        Some(self.breakpoints[idx].value)
    }

    /// Linear interpolation over elapsed seconds, clamped to the curve's
    /// ends.
    pub fn value_at_time(&self, elapsed_seconds: f64) -> Option<f32> {
        let points = &self.breakpoints;
        if points.is_empty() {
            return None;
        }
        if elapsed_seconds <= points[0].x {
            return Some(points[0].value);
        }
        for pair in points.windows(2) {
            if elapsed_seconds >= pair[0].x && elapsed_seconds < pair[1].x {
                let t = ((elapsed_seconds - pair[0].x) / (pair[1].x - pair[0].x)) as f32;
                return Some(pair[0].value + (pair[1].value - pair[0].value) * t);
            }
        }
        Some(points[points.len() - 1].value)
    }
}

/// Holds all registered curves and turns them into parameter commands.
#[derive(Debug, Default)]
pub struct AutomationEngine {
    curves: HashMap<String, AutomationCurve>,
    sample_rate: u32,
    elapsed_samples: u64,
}

impl AutomationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.elapsed_samples = 0;
    }

    pub fn register_curve(&mut self, param_id: &str, curve: AutomationCurve) {
        self.curves.insert(param_id.to_string(), curve);
    }

    pub fn remove_curve(&mut self, param_id: &str) {
        self.curves.remove(param_id);
    }

    pub fn enable_curve(&mut self, param_id: &str, enabled: bool) {
        if let Some(curve) = self.curves.get_mut(param_id) {
            curve.enabled = enabled;
        }
    }

    /// Restart a time-based curve's clock at the current elapsed time.
    pub fn start_time_based(&mut self, param_id: &str) {
        let now = self.elapsed_seconds();
        if let Some(curve) = self.curves.get_mut(param_id) {
            curve.start_time = now;
        }
    }

    pub fn curves(&self) -> &HashMap<String, AutomationCurve> {
        &self.curves
    }

    pub fn elapsed_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.elapsed_samples as f64 / self.sample_rate as f64
    }

    /// Advance elapsed time and emit commands for time-based curves.
    pub fn tick(&mut self, frames: u64, mut push: impl FnMut(Command)) {
        self.elapsed_samples += frames;
        let elapsed = self.elapsed_seconds();
        for curve in self.curves.values() {
            if !curve.enabled || curve.mode != AutomationMode::TimeBased {
                continue;
            }
            if let Some(value) = curve.value_at_time(elapsed - curve.start_time) {
                push(curve.target.to_command(curve.track_index, value));
            }
        }
    }

    /// Emit commands for a track's loop-based curves at a loop pass index.
    pub fn apply_at_loop_index(
        &self,
        track_index: usize,
        loop_index: u32,
        mut push: impl FnMut(Command),
    ) {
        for curve in self.curves.values() {
            if !curve.enabled
                || curve.mode != AutomationMode::LoopBased
                || curve.track_index != track_index
            {
                continue;
            }
            if let Some(value) = curve.value_at_loop_index(loop_index) {
                push(curve.target.to_command(track_index, value));
            }
        }
    }

    pub fn clear(&mut self) {
        self.curves.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_curve(mode: AutomationMode) -> AutomationCurve {
        AutomationCurve::new(AutomationTarget::TrackVolume, 0, mode)
    }

    #[test]
    fn test_add_breakpoints_sorted() {
        let mut curve = volume_curve(AutomationMode::TimeBased);
        curve.add_breakpoint(Breakpoint::new(2.0, 0.5));
        curve.add_breakpoint(Breakpoint::new(1.0, 0.3));
        curve.add_breakpoint(Breakpoint::new(3.0, 0.8));

        let xs: Vec<f64> = curve.breakpoints().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_replace_breakpoint_at_same_x() {
        let mut curve = volume_curve(AutomationMode::TimeBased);
        curve.add_breakpoint(Breakpoint::new(1.0, 0.3));
        curve.add_breakpoint(Breakpoint::new(1.0, 0.5));
        assert_eq!(curve.breakpoints().len(), 1);
        assert_eq!(curve.breakpoints()[0].value, 0.5);
    }

    #[test]
    fn test_linear_interpolation_over_time() {
        let mut curve = volume_curve(AutomationMode::TimeBased);
        curve.add_breakpoint(Breakpoint::new(0.0, 0.0));
        curve.add_breakpoint(Breakpoint::new(1.0, 1.0));

        assert_eq!(curve.value_at_time(0.0), Some(0.0));
        assert_eq!(curve.value_at_time(0.5), Some(0.5));
        assert_eq!(curve.value_at_time(2.0), Some(1.0));
    }

    #[test]
    fn test_loop_index_steps_and_clamps() {
        let mut curve = volume_curve(AutomationMode::LoopBased);
        curve.add_breakpoint(Breakpoint::new(0.0, 1.0));
        curve.add_breakpoint(Breakpoint::new(1.0, 0.8));
        curve.add_breakpoint(Breakpoint::new(2.0, 0.6));

        assert_eq!(curve.value_at_loop_index(0), Some(1.0));
        assert_eq!(curve.value_at_loop_index(1), Some(0.8));
        assert_eq!(curve.value_at_loop_index(10), Some(0.6));
    }

    #[test]
    fn test_tick_emits_time_based_commands() {
        let mut engine = AutomationEngine::new();
        engine.prepare(48000);

        let mut curve = volume_curve(AutomationMode::TimeBased);
        curve.add_breakpoint(Breakpoint::new(0.0, 0.0));
        curve.add_breakpoint(Breakpoint::new(2.0, 1.0));
        engine.register_curve("fade-in", curve);

        let mut emitted = Vec::new();
        engine.tick(48000, |cmd| emitted.push(cmd));
        assert_eq!(emitted.len(), 1);
        match &emitted[0] {
            Command::SetTrackVolume(0, value) => assert!((value - 0.5).abs() < 1e-6),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_loop_wrap_applies_only_matching_track() {
        let mut engine = AutomationEngine::new();
        engine.prepare(48000);

        let mut curve = AutomationCurve::new(
            AutomationTarget::PlaybackSpeed,
            1,
            AutomationMode::LoopBased,
        );
        curve.add_breakpoint(Breakpoint::new(0.0, 1.0));
        curve.add_breakpoint(Breakpoint::new(1.0, 0.5));
        engine.register_curve("halftime", curve);

        let mut emitted = Vec::new();
        engine.apply_at_loop_index(0, 1, |cmd| emitted.push(cmd));
        assert!(emitted.is_empty());

        engine.apply_at_loop_index(1, 1, |cmd| emitted.push(cmd));
        assert_eq!(emitted.len(), 1);
        match &emitted[0] {
            Command::SetPlaybackSpeed(1, value) => assert_eq!(*value, 0.5),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_disabled_curve_is_skipped() {
        let mut engine = AutomationEngine::new();
        engine.prepare(48000);
        let mut curve = volume_curve(AutomationMode::TimeBased);
        curve.add_breakpoint(Breakpoint::new(0.0, 0.5));
        engine.register_curve("vol", curve);
        engine.enable_curve("vol", false);

        let mut emitted = Vec::new();
        engine.tick(4800, |cmd| emitted.push(cmd));
        assert!(emitted.is_empty());
    }
}
