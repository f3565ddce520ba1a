//! Looper transport states and the table-driven machine that sequences
//! them.
//!
//! Transitions are validated against a bitmask table; illegal requests are
//! rejected and leave the machine untouched. Exit hooks are the single
//! place a recording pass is committed, so every egress path (stop, track
//! switch, shutdown) finalizes exactly once.

use crate::audio::buffer::AudioBuffer;
use crate::audio::track::LoopTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LooperState {
    Idle = 0,
    Stopped,
    Playing,
    Recording,
    Overdubbing,
    PendingTrackChange,
    Transitioning,
}

pub const NUM_STATES: usize = 7;

const fn bit(state: LooperState) -> u32 {
    1 << state as u32
}

/// Allowed transitions, indexed by the source state
const TRANSITIONS: [u32; NUM_STATES] = [
    // Idle
    bit(LooperState::Idle) | bit(LooperState::Playing) | bit(LooperState::Recording),
    // Stopped
    bit(LooperState::Idle)
        | bit(LooperState::Playing)
        | bit(LooperState::Recording)
        | bit(LooperState::Overdubbing),
    // Playing
    bit(LooperState::Stopped)
        | bit(LooperState::Overdubbing)
        | bit(LooperState::PendingTrackChange),
    // Recording
    bit(LooperState::Idle)
        | bit(LooperState::Stopped)
        | bit(LooperState::Playing)
        | bit(LooperState::Overdubbing),
    // Overdubbing
    bit(LooperState::Stopped) | bit(LooperState::Playing),
    // PendingTrackChange
    bit(LooperState::Stopped) | bit(LooperState::Playing) | bit(LooperState::Transitioning),
    // Transitioning
    bit(LooperState::Idle) | bit(LooperState::Stopped) | bit(LooperState::Playing),
];

pub const fn can_transition(from: LooperState, to: LooperState) -> bool {
    TRANSITIONS[from as usize] & bit(to) != 0
}

impl LooperState {
    pub const fn name(self) -> &'static str {
        match self {
            LooperState::Idle => "Idle",
            LooperState::Stopped => "Stopped",
            LooperState::Playing => "Playing",
            LooperState::Recording => "Recording",
            LooperState::Overdubbing => "Overdubbing",
            LooperState::PendingTrackChange => "PendingTrackChange",
            LooperState::Transitioning => "Transitioning",
        }
    }

    pub const fn is_recording(self) -> bool {
        matches!(self, LooperState::Recording | LooperState::Overdubbing)
    }

    pub const fn is_playing(self) -> bool {
        matches!(
            self,
            LooperState::Playing
                | LooperState::Overdubbing
                | LooperState::PendingTrackChange
                | LooperState::Transitioning
        )
    }
}

/// Everything a state action needs for one audio block.
pub struct StateContext<'a> {
    pub tracks: &'a mut [LoopTrack],
    pub active_index: usize,
    pub input: &'a AudioBuffer,
    pub output: &'a mut AudioBuffer,
    pub num_frames: usize,
    /// Which tracks are audible this block (play mode and solo already
    /// resolved by the engine)
    pub audible: &'a [bool],
}

impl StateContext<'_> {
    fn play_audible_tracks(&mut self, skip_active: bool) {
        for (i, track) in self.tracks.iter_mut().enumerate() {
            if skip_active && i == self.active_index {
                continue;
            }
            if self.audible[i] && track.length() > 0 {
                track.process_playback(self.output, self.num_frames, false);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Attempt `current -> target`; runs exit and enter hooks on success.
    /// Illegal transitions are rejected and trace-logged.
    pub fn transition(
        &self,
        current: &mut LooperState,
        target: LooperState,
        tracks: &mut [LoopTrack],
        active_index: usize,
    ) -> bool {
        if *current == target {
            return false;
        }
        if !can_transition(*current, target) {
            log::debug!("rejected transition {} -> {}", current.name(), target.name());
            return false;
        }

        self.on_exit(*current, tracks, active_index);
        *current = target;
        self.on_enter(target, tracks, active_index);
        true
    }

    /// Run the per-state audio action for one block.
    pub fn process_audio(&self, current: LooperState, ctx: &mut StateContext<'_>) {
        match current {
            LooperState::Idle | LooperState::Stopped => {}
            LooperState::Playing | LooperState::PendingTrackChange | LooperState::Transitioning => {
                ctx.play_audible_tracks(false);
            }
            LooperState::Recording => {
                let active = ctx.active_index;
                ctx.tracks[active].process_record(ctx.input, ctx.num_frames, false);
                // Keep the rest of the mix (and the sync grid) running
                ctx.play_audible_tracks(true);
            }
            LooperState::Overdubbing => {
                let active = ctx.active_index;
                ctx.tracks[active].process_record(ctx.input, ctx.num_frames, true);
                if ctx.audible[active] {
                    ctx.tracks[active].process_playback(ctx.output, ctx.num_frames, true);
                }
                ctx.play_audible_tracks(true);
            }
        }
    }

    fn on_enter(&self, state: LooperState, tracks: &mut [LoopTrack], active_index: usize) {
        if state == LooperState::Overdubbing {
            tracks[active_index].stage_for_overdub();
        }
    }

    fn on_exit(&self, state: LooperState, tracks: &mut [LoopTrack], active_index: usize) {
        // The only commit site: any way out of a recording state finalizes
        // the in-progress pass exactly once.
        match state {
            LooperState::Recording => tracks[active_index].finalize_layer(false),
            LooperState::Overdubbing => tracks[active_index].finalize_layer(true),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_matches_design() {
        use LooperState::*;
        assert!(can_transition(Idle, Recording));
        assert!(can_transition(Idle, Playing));
        assert!(!can_transition(Idle, Overdubbing));

        assert!(can_transition(Playing, Overdubbing));
        assert!(can_transition(Playing, PendingTrackChange));
        assert!(!can_transition(Playing, Recording));

        assert!(can_transition(Recording, Playing));
        assert!(can_transition(Recording, Overdubbing));
        assert!(!can_transition(Recording, PendingTrackChange));

        assert!(can_transition(Overdubbing, Playing));
        assert!(can_transition(Overdubbing, Stopped));
        assert!(!can_transition(Overdubbing, Recording));

        assert!(can_transition(PendingTrackChange, Transitioning));
        assert!(can_transition(Transitioning, Playing));
        assert!(!can_transition(Transitioning, Overdubbing));
    }

    fn harness() -> (Vec<LoopTrack>, AudioBuffer, AudioBuffer) {
        let mut tracks = vec![LoopTrack::new(), LoopTrack::new()];
        for t in &mut tracks {
            t.prepare(48000, 512, 2, 1, 5);
        }
        let mut input = AudioBuffer::new(2, 512);
        for ch in 0..2 {
            input.channel_mut(ch).fill(0.5);
        }
        (tracks, input, AudioBuffer::new(2, 512))
    }

    #[test]
    fn test_illegal_transition_leaves_state() {
        let (mut tracks, _input, _output) = harness();
        let machine = StateMachine::new();
        let mut state = LooperState::Idle;
        assert!(!machine.transition(&mut state, LooperState::Overdubbing, &mut tracks, 0));
        assert_eq!(state, LooperState::Idle);
    }

    #[test]
    fn test_exiting_recording_finalizes_pass() {
        let (mut tracks, input, mut output) = harness();
        let audible = [true, true];
        let machine = StateMachine::new();
        let mut state = LooperState::Idle;
        assert!(machine.transition(&mut state, LooperState::Recording, &mut tracks, 0));
        {
            let mut ctx = StateContext {
                tracks: &mut tracks,
                active_index: 0,
                input: &input,
                output: &mut output,
                num_frames: 512,
                audible: &audible,
            };
            machine.process_audio(state, &mut ctx);
        }
        assert!(tracks[0].is_currently_recording());

        assert!(machine.transition(&mut state, LooperState::Playing, &mut tracks, 0));
        assert!(!tracks[0].is_currently_recording());
        assert_eq!(tracks[0].length(), 512);
    }

    #[test]
    fn test_idle_and_stopped_produce_silence() {
        let (mut tracks, input, mut output) = harness();
        let audible = [true, true];
        let mut ctx = StateContext {
            tracks: &mut tracks,
            active_index: 0,
            input: &input,
            output: &mut output,
            num_frames: 512,
            audible: &audible,
        };
        let machine = StateMachine::new();
        machine.process_audio(LooperState::Idle, &mut ctx);
        machine.process_audio(LooperState::Stopped, &mut ctx);
        assert!(ctx.output.channel(0).iter().all(|&s| s == 0.0));
    }
}
