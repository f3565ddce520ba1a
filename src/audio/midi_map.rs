//! Remappable MIDI dispatch tables.
//!
//! Incoming note-ons are looked up in a flat 128-entry command table,
//! control changes in a 128-entry continuous-control table. Both tables can
//! be rebound at runtime (MIDI learn) and serialized through
//! [`crate::io::midi_mappings`].

use serde::{Deserialize, Serialize};

/// Commands triggerable from a MIDI note-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiNoteCommand {
    ToggleRecord,
    TogglePlay,
    Undo,
    Redo,
    Clear,
    NextTrack,
    PrevTrack,
    ToggleSolo,
    ToggleMute,
    LoadFile,
    ToggleReverse,
    TogglePitchLock,
}

/// Parameters driven from a MIDI control change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiCcControl {
    TrackSelect,
    TrackVolume,
    PlaybackSpeed,
    OverdubLevel,
    ExistingAudioLevel,
    PitchShift,
    MetronomeVolume,
}

/// What a MIDI-learn session is waiting to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiLearnTarget {
    Note(MidiNoteCommand),
    Control(MidiCcControl),
}

/// A raw 3-byte MIDI message as delivered by the input thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMidiMessage {
    pub data: [u8; 3],
}

impl RawMidiMessage {
    pub fn new(data: [u8; 3]) -> Self {
        Self { data }
    }

    pub fn is_note_on(&self) -> bool {
        self.data[0] & 0xF0 == 0x90 && self.data[2] > 0
    }

    pub fn is_note_off(&self) -> bool {
        self.data[0] & 0xF0 == 0x80 || (self.data[0] & 0xF0 == 0x90 && self.data[2] == 0)
    }

    pub fn is_controller(&self) -> bool {
        self.data[0] & 0xF0 == 0xB0
    }

    pub fn note(&self) -> u8 {
        self.data[1] & 0x7F
    }

    pub fn controller_number(&self) -> u8 {
        self.data[1] & 0x7F
    }

    pub fn controller_value(&self) -> u8 {
        self.data[2] & 0x7F
    }
}

const TABLE_SIZE: usize = 128;

#[derive(Debug, Clone)]
pub struct MidiMappings {
    note_commands: [Option<MidiNoteCommand>; TABLE_SIZE],
    cc_controls: [Option<MidiCcControl>; TABLE_SIZE],
}

impl Default for MidiMappings {
    fn default() -> Self {
        let mut mappings = Self {
            note_commands: [None; TABLE_SIZE],
            cc_controls: [None; TABLE_SIZE],
        };
        mappings.reset_to_defaults();
        mappings
    }
}

impl MidiMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_to_defaults(&mut self) {
        self.note_commands = [None; TABLE_SIZE];
        self.cc_controls = [None; TABLE_SIZE];

        self.note_commands[60] = Some(MidiNoteCommand::ToggleRecord);
        self.note_commands[61] = Some(MidiNoteCommand::TogglePlay);
        self.note_commands[62] = Some(MidiNoteCommand::Undo);
        self.note_commands[63] = Some(MidiNoteCommand::Redo);
        self.note_commands[64] = Some(MidiNoteCommand::Clear);
        self.note_commands[65] = Some(MidiNoteCommand::NextTrack);
        self.note_commands[66] = Some(MidiNoteCommand::PrevTrack);
        self.note_commands[67] = Some(MidiNoteCommand::ToggleSolo);
        self.note_commands[68] = Some(MidiNoteCommand::ToggleMute);
        self.note_commands[69] = Some(MidiNoteCommand::LoadFile);
        self.note_commands[70] = Some(MidiNoteCommand::ToggleReverse);
        self.note_commands[71] = Some(MidiNoteCommand::TogglePitchLock);

        self.cc_controls[102] = Some(MidiCcControl::TrackSelect);
        self.cc_controls[7] = Some(MidiCcControl::TrackVolume);
        self.cc_controls[1] = Some(MidiCcControl::PlaybackSpeed);
        self.cc_controls[103] = Some(MidiCcControl::OverdubLevel);
        self.cc_controls[104] = Some(MidiCcControl::ExistingAudioLevel);
        self.cc_controls[14] = Some(MidiCcControl::PitchShift);
        self.cc_controls[105] = Some(MidiCcControl::MetronomeVolume);
    }

    pub fn command_for_note_on(&self, note: u8) -> Option<MidiNoteCommand> {
        self.note_commands.get(note as usize).copied().flatten()
    }

    pub fn control_for_cc(&self, controller: u8) -> Option<MidiCcControl> {
        self.cc_controls.get(controller as usize).copied().flatten()
    }

    /// Bind `command` to `note`, removing any previous binding of the same
    /// command and whatever was on the note before.
    pub fn set_note_mapping(&mut self, command: MidiNoteCommand, note: u8) {
        for slot in &mut self.note_commands {
            if *slot == Some(command) {
                *slot = None;
            }
        }
        if let Some(slot) = self.note_commands.get_mut(note as usize) {
            *slot = Some(command);
        }
    }

    pub fn set_cc_mapping(&mut self, control: MidiCcControl, controller: u8) {
        for slot in &mut self.cc_controls {
            if *slot == Some(control) {
                *slot = None;
            }
        }
        if let Some(slot) = self.cc_controls.get_mut(controller as usize) {
            *slot = Some(control);
        }
    }

    pub fn apply(&mut self, target: MidiLearnTarget, number: u8) {
        match target {
            MidiLearnTarget::Note(cmd) => self.set_note_mapping(cmd, number),
            MidiLearnTarget::Control(ctrl) => self.set_cc_mapping(ctrl, number),
        }
    }

    /// Every current binding, for persistence.
    pub fn bindings(&self) -> Vec<(MidiLearnTarget, u8)> {
        let notes = self.note_commands.iter().enumerate().filter_map(|(n, cmd)| {
            cmd.map(|c| (MidiLearnTarget::Note(c), n as u8))
        });
        let ccs = self.cc_controls.iter().enumerate().filter_map(|(n, ctrl)| {
            ctrl.map(|c| (MidiLearnTarget::Control(c), n as u8))
        });
        notes.chain(ccs).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mappings() {
        let mappings = MidiMappings::new();
        assert_eq!(mappings.command_for_note_on(60), Some(MidiNoteCommand::ToggleRecord));
        assert_eq!(mappings.command_for_note_on(71), Some(MidiNoteCommand::TogglePitchLock));
        assert_eq!(mappings.command_for_note_on(42), None);
        assert_eq!(mappings.control_for_cc(1), Some(MidiCcControl::PlaybackSpeed));
        assert_eq!(mappings.control_for_cc(7), Some(MidiCcControl::TrackVolume));
    }

    #[test]
    fn test_remap_moves_binding() {
        let mut mappings = MidiMappings::new();
        mappings.set_note_mapping(MidiNoteCommand::ToggleRecord, 40);
        assert_eq!(mappings.command_for_note_on(40), Some(MidiNoteCommand::ToggleRecord));
        assert_eq!(mappings.command_for_note_on(60), None);
    }

    #[test]
    fn test_raw_message_parsing() {
        let note_on = RawMidiMessage::new([0x90, 60, 100]);
        assert!(note_on.is_note_on());
        assert_eq!(note_on.note(), 60);

        // Note-on with zero velocity counts as note-off
        let silent = RawMidiMessage::new([0x90, 60, 0]);
        assert!(!silent.is_note_on());
        assert!(silent.is_note_off());

        let cc = RawMidiMessage::new([0xB0, 1, 127]);
        assert!(cc.is_controller());
        assert_eq!(cc.controller_number(), 1);
        assert_eq!(cc.controller_value(), 127);
    }

    #[test]
    fn test_bindings_round_trip() {
        let mut mappings = MidiMappings::new();
        mappings.set_cc_mapping(MidiCcControl::PlaybackSpeed, 20);
        let bindings = mappings.bindings();

        let mut restored = MidiMappings::new();
        restored.reset_to_defaults();
        for (target, number) in bindings {
            restored.apply(target, number);
        }
        assert_eq!(restored.control_for_cc(20), Some(MidiCcControl::PlaybackSpeed));
        assert_eq!(restored.control_for_cc(1), None);
    }
}
