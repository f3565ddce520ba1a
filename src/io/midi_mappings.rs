//! JSON persistence for MIDI mappings.
//!
//! The file lives in the user's config directory and maps command ids to
//! `{ "type": "note"|"cc", "number": n }` entries.

use crate::audio::midi_map::{MidiCcControl, MidiLearnTarget, MidiMappings, MidiNoteCommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const MAPPING_FILE_NAME: &str = "midi_mappings.json";
const CONFIG_DIR_NAME: &str = "looper-backend";

#[derive(Debug, Serialize, Deserialize)]
struct MappingEntry {
    #[serde(rename = "type")]
    kind: String,
    number: u8,
}

fn command_id(target: MidiLearnTarget) -> &'static str {
    match target {
        MidiLearnTarget::Note(cmd) => match cmd {
            MidiNoteCommand::ToggleRecord => "toggle_record",
            MidiNoteCommand::TogglePlay => "toggle_play",
            MidiNoteCommand::Undo => "undo",
            MidiNoteCommand::Redo => "redo",
            MidiNoteCommand::Clear => "clear",
            MidiNoteCommand::NextTrack => "next_track",
            MidiNoteCommand::PrevTrack => "prev_track",
            MidiNoteCommand::ToggleSolo => "toggle_solo",
            MidiNoteCommand::ToggleMute => "toggle_mute",
            MidiNoteCommand::LoadFile => "load_file",
            MidiNoteCommand::ToggleReverse => "toggle_reverse",
            MidiNoteCommand::TogglePitchLock => "toggle_pitch_lock",
        },
        MidiLearnTarget::Control(ctrl) => match ctrl {
            MidiCcControl::TrackSelect => "track_select",
            MidiCcControl::TrackVolume => "track_volume",
            MidiCcControl::PlaybackSpeed => "playback_speed",
            MidiCcControl::OverdubLevel => "overdub_level",
            MidiCcControl::ExistingAudioLevel => "existing_audio_level",
            MidiCcControl::PitchShift => "pitch_shift",
            MidiCcControl::MetronomeVolume => "metronome_volume",
        },
    }
}

fn target_for_id(id: &str) -> Option<MidiLearnTarget> {
    use MidiCcControl::*;
    use MidiNoteCommand::*;
    Some(match id {
        "toggle_record" => MidiLearnTarget::Note(ToggleRecord),
        "toggle_play" => MidiLearnTarget::Note(TogglePlay),
        "undo" => MidiLearnTarget::Note(Undo),
        "redo" => MidiLearnTarget::Note(Redo),
        "clear" => MidiLearnTarget::Note(Clear),
        "next_track" => MidiLearnTarget::Note(NextTrack),
        "prev_track" => MidiLearnTarget::Note(PrevTrack),
        "toggle_solo" => MidiLearnTarget::Note(ToggleSolo),
        "toggle_mute" => MidiLearnTarget::Note(ToggleMute),
        "load_file" => MidiLearnTarget::Note(LoadFile),
        "toggle_reverse" => MidiLearnTarget::Note(ToggleReverse),
        "toggle_pitch_lock" => MidiLearnTarget::Note(TogglePitchLock),
        "track_select" => MidiLearnTarget::Control(TrackSelect),
        "track_volume" => MidiLearnTarget::Control(TrackVolume),
        "playback_speed" => MidiLearnTarget::Control(PlaybackSpeed),
        "overdub_level" => MidiLearnTarget::Control(OverdubLevel),
        "existing_audio_level" => MidiLearnTarget::Control(ExistingAudioLevel),
        "pitch_shift" => MidiLearnTarget::Control(PitchShift),
        "metronome_volume" => MidiLearnTarget::Control(MetronomeVolume),
        _ => return None,
    })
}

/// Default path: `<config dir>/looper-backend/midi_mappings.json`.
pub fn default_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir()
        .ok_or_else(|| "no user config directory available".to_string())?
        .join(CONFIG_DIR_NAME);
    Ok(dir.join(MAPPING_FILE_NAME))
}

pub fn save(mappings: &MidiMappings) -> Result<(), String> {
    save_to(mappings, default_path()?)
}

pub fn save_to(mappings: &MidiMappings, path: PathBuf) -> Result<(), String> {
    let mut entries = BTreeMap::new();
    for (target, number) in mappings.bindings() {
        let kind = match target {
            MidiLearnTarget::Note(_) => "note",
            MidiLearnTarget::Control(_) => "cc",
        };
        entries.insert(command_id(target), MappingEntry { kind: kind.to_string(), number });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let json = serde_json::to_string_pretty(&entries).map_err(|e| e.to_string())?;
    std::fs::write(&path, json).map_err(|e| e.to_string())
}

pub fn load() -> Result<MidiMappings, String> {
    load_from(default_path()?)
}

pub fn load_from(path: PathBuf) -> Result<MidiMappings, String> {
    let json = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
    let entries: BTreeMap<String, MappingEntry> =
        serde_json::from_str(&json).map_err(|e| format!("bad mapping file: {e}"))?;

    let mut mappings = MidiMappings::new();
    for (id, entry) in entries {
        match target_for_id(&id) {
            Some(target) => mappings.apply(target, entry.number),
            None => log::warn!("ignoring unknown mapping id {id:?}"),
        }
    }
    Ok(mappings)
}
