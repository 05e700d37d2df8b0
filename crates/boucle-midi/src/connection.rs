//! MIDI port discovery and transport
//!
//! Uses midir for cross-platform MIDI I/O (ALSA on Linux, CoreMIDI on macOS, WinMM on Windows).
//! The transport only moves bytes: the input callback pushes raw buffers onto
//! the inbound queue and a pump thread writes LED batches to the output port.

use crate::feedback::LedBatch;
use flume::{Receiver, Sender};
use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection};
use std::thread::JoinHandle;

/// Error type for MIDI connection operations
#[derive(Debug, thiserror::Error)]
pub enum MidiConnectionError {
    #[error("Failed to initialize MIDI input: {0}")]
    InputInitError(String),

    #[error("Failed to initialize MIDI output: {0}")]
    OutputInitError(String),

    #[error("No MIDI input ports available")]
    NoInputPorts,

    #[error("No MIDI port found matching pattern: {0}")]
    PortNotFound(String),

    #[error("Failed to connect to MIDI port: {0}")]
    ConnectionError(String),

    #[error("Failed to get port info: {0}")]
    PortInfoError(String),

    #[error("Failed to start MIDI output thread: {0}")]
    OutputThread(#[from] std::io::Error),
}

/// Port lookup helpers
pub struct MidiConnection;

impl MidiConnection {
    /// Find the first input port whose name contains `port_match`
    ///
    /// Matching is a case-insensitive substring test.
    pub fn find_input_port(
        port_match: &str,
    ) -> Result<(MidiInput, MidiInputPort, String), MidiConnectionError> {
        let pattern = port_match.to_lowercase();

        let midi_in = MidiInput::new("boucle-midi-in")
            .map_err(|e| MidiConnectionError::InputInitError(e.to_string()))?;

        let in_ports = midi_in.ports();
        if in_ports.is_empty() {
            return Err(MidiConnectionError::NoInputPorts);
        }

        let input_port = in_ports
            .into_iter()
            .find(|port| {
                midi_in
                    .port_name(port)
                    .map(|name| name.to_lowercase().contains(&pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiConnectionError::PortNotFound(port_match.to_string()))?;

        let port_name = midi_in
            .port_name(&input_port)
            .map_err(|e| MidiConnectionError::PortInfoError(e.to_string()))?;

        log::info!("MIDI: Found input port: {}", port_name);

        Ok((midi_in, input_port, port_name))
    }

    /// Connect the output port matching `pattern`, if there is one
    ///
    /// A surface without LEDs has no output port; that is not an error.
    pub fn connect_output(port_match: &str) -> Option<MidiOutputConnection> {
        let pattern = port_match.to_lowercase();
        let midi_out = match MidiOutput::new("boucle-midi-out") {
            Ok(out) => out,
            Err(e) => {
                log::warn!("MIDI: Failed to initialize output: {}", e);
                return None;
            }
        };

        let out_ports = midi_out.ports();
        let output_port = out_ports.iter().find(|port| {
            midi_out
                .port_name(port)
                .map(|name| name.to_lowercase().contains(&pattern))
                .unwrap_or(false)
        })?;

        let port_name = midi_out.port_name(output_port).ok()?;
        log::info!("MIDI: Found output port: {}", port_name);

        match midi_out.connect(output_port, "boucle-midi-output") {
            Ok(conn) => Some(conn),
            Err(e) => {
                log::warn!("MIDI: Failed to connect to output: {}", e);
                None
            }
        }
    }

    /// List all available MIDI input ports
    pub fn list_input_ports() -> Result<Vec<String>, MidiConnectionError> {
        let midi_in = MidiInput::new("boucle-midi-list")
            .map_err(|e| MidiConnectionError::InputInitError(e.to_string()))?;

        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect())
    }

    /// List all available MIDI output ports
    pub fn list_output_ports() -> Result<Vec<String>, MidiConnectionError> {
        let midi_out = MidiOutput::new("boucle-midi-list")
            .map_err(|e| MidiConnectionError::OutputInitError(e.to_string()))?;

        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect())
    }
}

/// Live connection between a device and the queues
///
/// Dropping the transport closes the input port. The output thread exits
/// once every outbound sender is gone.
pub struct MidiTransport {
    _input: MidiInputConnection<Sender<Vec<u8>>>,
    _output_thread: Option<JoinHandle<()>>,
    port_name: String,
}

impl MidiTransport {
    /// Connect the device matching `port_match` to the inbound and outbound queues
    pub fn connect(
        port_match: &str,
        inbound_tx: Sender<Vec<u8>>,
        outbound_rx: Receiver<LedBatch>,
    ) -> Result<Self, MidiConnectionError> {
        let (midi_in, port, port_name) = MidiConnection::find_input_port(port_match)?;

        let input = midi_in
            .connect(&port, "boucle-midi-input", Self::midi_callback, inbound_tx)
            .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

        let output_thread = match MidiConnection::connect_output(port_match) {
            Some(conn) => Some(
                std::thread::Builder::new()
                    .name("midi-led-output".into())
                    .spawn(move || Self::run_output(conn, outbound_rx))?,
            ),
            None => {
                log::info!("MIDI: No output port for '{}', LED feedback disabled", port_match);
                None
            }
        };

        log::info!("MIDI: Connected to {}", port_name);

        Ok(Self {
            _input: input,
            _output_thread: output_thread,
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Called from the MIDI driver thread; must not block
    fn midi_callback(_timestamp: u64, data: &[u8], inbound_tx: &mut Sender<Vec<u8>>) {
        if inbound_tx.try_send(data.to_vec()).is_err() {
            log::warn!("MIDI: Inbound queue full, dropping message");
        }
    }

    /// Write each batch in order until the queue closes
    fn run_output(mut conn: MidiOutputConnection, outbound_rx: Receiver<LedBatch>) {
        log::debug!("MIDI: LED output thread started");
        while let Ok(batch) = outbound_rx.recv() {
            for message in batch {
                if let Err(e) = conn.send(&message.to_bytes()) {
                    log::warn!("MIDI: Failed to send LED message: {}", e);
                }
            }
        }
        conn.close();
        log::debug!("MIDI: LED output thread stopped");
    }
}
