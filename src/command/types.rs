use crate::audio::buffer::AudioBuffer;
use crate::audio::midi_map::MidiLearnTarget;

/// Commands sent from UI/control thread to the audio thread.
///
/// Every command is consumed exactly once by the audio thread; payloads are
/// range-clamped at the point of application.
#[derive(Debug, Clone)]
pub enum Command {
    // Transport
    /// Toggle between playing and stopped
    TogglePlay,
    /// Toggle recording (first pass records, later passes overdub)
    ToggleRecord,
    /// Stop playback or finalize the current recording pass
    Stop,

    // Per-track editing
    /// Undo the last committed layer on a track
    Undo(usize),
    /// Redo the last undone layer on a track
    Redo(usize),
    /// Drop a track's content and its undo history
    Clear(usize),

    // Track selection
    /// Cycle the active track forward
    NextTrack,
    /// Cycle the active track backward
    PreviousTrack,
    /// Set the active track (may defer to the loop seam while syncing)
    SelectTrack(usize),

    // Continuous parameters
    /// Track gain, 0.0..=1.0
    SetTrackVolume(usize, f32),
    /// Playback speed multiplier, clamped to the supported range
    SetPlaybackSpeed(usize, f32),
    /// Playback pitch shift in semitones
    SetPlaybackPitch(usize, f32),
    /// Gain applied to existing loop content when overdubbing
    SetExistingAudioGain(usize, f32),
    /// Gain applied to incoming audio when overdubbing
    SetNewOverdubGain(usize, f32),

    // Per-track toggles
    ToggleMute(usize),
    ToggleSolo(usize),
    /// Designate (or clear) a track as the sync master
    ToggleSyncTrack(usize),
    /// Preserve pitch under speed changes
    TogglePitchLock(usize),
    ToggleReverse(usize),
    ToggleVolumeNormalize(usize),

    // Global toggles
    ToggleSinglePlayMode,
    ToggleFreeze,
    /// Freeze pad output level, 0.0..=1.0
    SetFreezeLevel(f32),

    /// Import already-decoded frames into a track and start playback
    LoadAudio(usize, AudioBuffer),

    // Metronome
    SetMetronomeEnabled(bool),
    SetMetronomeBpm(u32),
    SetMetronomeVolume(f32),
    /// Accented beat index within the bar, or None for no accent
    SetMetronomeStrongBeat(Option<u32>),
    /// (numerator, denominator)
    SetMetronomeTimeSignature(u32, u32),

    // Sub-loop
    /// Focus playback on `[start, end)` frames of a track's loop
    SetSubLoopRegion(usize, usize, usize),
    /// Revert to the full loop
    ClearSubLoopRegion(usize),

    // Master gains
    SetInputGain(f32),
    SetOutputGain(f32),

    /// Seek a track's read cursor to an absolute frame
    SetPlayheadPosition(usize, usize),

    // MIDI mapping
    /// Rebind a command or control to a MIDI note/CC number
    SetMidiMapping(MidiLearnTarget, u8),
    ResetMidiMappings,
    /// Capture the next incoming note or CC as the new binding
    StartMidiLearn(MidiLearnTarget),
    CancelMidiLearn,
}

/// Events sent from the audio thread back to UI/control listeners.
///
/// Each event is an idempotent snapshot of the changed scalar; dropping one
/// under backpressure is recovered by the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioEvent {
    RecordingStateChanged(bool),
    PlaybackStateChanged(bool),

    ActiveTrackChanged(usize),
    /// A deferred track switch was scheduled (Some) or resolved (None)
    PendingTrackChanged(Option<usize>),

    TrackVolumeChanged(usize, f32),
    TrackMuteChanged(usize, bool),
    TrackSoloChanged(usize, bool),
    TrackSpeedChanged(usize, f32),
    TrackPitchChanged(usize, f32),
    TrackPitchLockChanged(usize, bool),
    TrackReverseDirection(usize, bool),
    TrackSyncChanged(usize, bool),
    TrackCleared(usize),
    VolumeNormalizeChanged(usize, bool),

    /// A track's read cursor crossed its loop seam; carries the loop pass
    /// count since playback started
    LoopWrapped(usize, u32),

    MetronomeEnabledChanged(bool),
    MetronomeBpmChanged(u32),
    MetronomeVolumeChanged(f32),
    MetronomeTimeSignatureChanged(u32, u32),
    MetronomeStrongBeatChanged(Option<u32>),
    /// A beat fired; carries the beat index within the bar
    MetronomeBeatOccurred(u32),

    FreezeStateChanged(bool),
    SinglePlayModeChanged(bool),

    /// MIDI learn captured a binding
    MidiMappingLearned(MidiLearnTarget, u8),
}
