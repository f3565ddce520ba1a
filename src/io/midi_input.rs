//! External MIDI device input.
//!
//! Connects to every available MIDI input port and forwards raw 3-byte
//! messages into a lock-free ring the audio thread drains each block. All
//! mapping and dispatch happens engine-side, so remapping and MIDI learn
//! see hardware input and on-screen input identically.

use crate::audio::midi_map::RawMidiMessage;
use midir::{MidiInput, MidiInputConnection};
use std::sync::{Arc, Mutex};

const CLIENT_NAME: &str = "looper-backend";

/// Keeps the device connections alive and owns the producer side of the
/// raw MIDI ring.
pub struct MidiInputManager {
    connections: Vec<ActiveMidiConnection>,
}

struct ActiveMidiConnection {
    #[allow(dead_code)]
    device_name: String,
    #[allow(dead_code)]
    connection: MidiInputConnection<()>,
}

impl MidiInputManager {
    /// Connect to all available MIDI input devices.
    pub fn new(midi_tx: rtrb::Producer<RawMidiMessage>) -> Result<Self, String> {
        // midir callbacks run on their own thread per port; the single
        // producer is shared behind a mutex (ports are few, messages rare)
        let shared_tx = Arc::new(Mutex::new(midi_tx));
        let mut connections = Vec::new();

        let midi_in = MidiInput::new(CLIENT_NAME)
            .map_err(|e| format!("Failed to initialize MIDI input: {}", e))?;

        let mut port_infos = Vec::new();
        for port in midi_in.ports() {
            if let Ok(name) = midi_in.port_name(&port) {
                port_infos.push((port, name));
            }
        }
        log::info!("MIDI input: found {} device(s)", port_infos.len());

        // connect() consumes the MidiInput, so recreate it per port
        for (port, port_name) in port_infos {
            let midi_in = MidiInput::new(CLIENT_NAME)
                .map_err(|e| format!("Failed to recreate MIDI input: {}", e))?;
            let tx = Arc::clone(&shared_tx);

            match midi_in.connect(
                &port,
                &format!("{CLIENT_NAME}-{port_name}"),
                move |_timestamp, message, _| Self::on_midi_message(message, &tx),
                (),
            ) {
                Ok(connection) => {
                    log::info!("MIDI: connected to {}", port_name);
                    connections.push(ActiveMidiConnection { device_name: port_name, connection });
                }
                Err(e) => {
                    log::warn!("MIDI: failed to connect to {}: {}", port_name, e);
                }
            }
        }

        Ok(Self { connections })
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    fn on_midi_message(message: &[u8], tx: &Arc<Mutex<rtrb::Producer<RawMidiMessage>>>) {
        if message.len() < 2 {
            return;
        }
        let mut data = [0u8; 3];
        data[..message.len().min(3)].copy_from_slice(&message[..message.len().min(3)]);

        if let Ok(mut producer) = tx.lock() {
            // Ring full means the engine is behind; dropping is harmless
            let _ = producer.push(RawMidiMessage::new(data));
        }
    }
}
