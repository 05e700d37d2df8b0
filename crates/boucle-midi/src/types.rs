//! Wire-level control types
//!
//! Addresses, coordinates and the raw 3-byte MIDI message shared by the
//! dispatcher, the feedback engine and learn mode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status nibble for Note Off
pub const NOTE_OFF: u8 = 0x8;
/// Status nibble for Note On
pub const NOTE_ON: u8 = 0x9;
/// Status nibble for Control Change
pub const CONTROL_CHANGE: u8 = 0xB;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Channel + note/controller number packed as `(channel << 8) | number`
///
/// Notes and controllers share this key space; the message kind decides which
/// one an address refers to. Channel and number live in separate bytes so an
/// address always decodes to exactly one pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Address(u16);

impl Address {
    /// Build an address from a channel (0-15) and a note/CC number (0-127)
    ///
    /// Returns `None` when either part is out of range.
    pub fn new(channel: u8, number: u8) -> Option<Self> {
        if channel > 0x0F || number > 0x7F {
            return None;
        }
        Some(Self(((channel as u16) << 8) | number as u16))
    }

    /// Address an incoming message refers to
    ///
    /// Decoded messages carry 7-bit data bytes, so the result is always in range.
    pub fn from_message(message: &RawMidiMessage) -> Self {
        Self(((message.channel() as u16) << 8) | message.data1 as u16)
    }

    /// MIDI channel (0-15)
    pub fn channel(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Note or controller number (0-127)
    pub fn number(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Raw packed value
    pub fn raw(self) -> u16 {
        self.0
    }

    /// Pitch name of the number part, e.g. `C#4`
    ///
    /// Scientific pitch notation: note 60 is `C4`, the octave most DAWs and
    /// keyboard manufacturers show, not the `C6` some older editors use.
    pub fn note_name(self) -> String {
        let number = self.number();
        let octave = (number / 12) as i8 - 1;
        format!("{}{}", NOTE_NAMES[(number % 12) as usize], octave)
    }

    /// Human-readable label for capture progress, channel shown 1-based
    pub fn describe(self, kind: MidiKind) -> String {
        match kind {
            MidiKind::ControlChange => format!("Ch {} CC {}", self.channel() + 1, self.number()),
            _ => format!("Ch {} {}", self.channel() + 1, self.note_name()),
        }
    }
}

impl TryFrom<u16> for Address {
    type Error = crate::mapping::MappingError;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        Self::new((raw >> 8) as u8, (raw & 0xFF) as u8)
            .filter(|addr| addr.0 == raw)
            .ok_or(crate::mapping::MappingError::InvalidAddress(raw))
    }
}

impl From<Address> for u16 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Grid position of a loop cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Playback state of a loop, owned by the audio engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl LoopState {
    /// Whether the cell should blink while in this state
    pub fn blinks(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl TryFrom<u8> for LoopState {
    type Error = crate::mapping::MappingError;

    /// Decode a state code reported by an engine (0 = stopped .. 3 = stopping)
    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Stopped),
            1 => Ok(Self::Starting),
            2 => Ok(Self::Started),
            3 => Ok(Self::Stopping),
            other => Err(crate::mapping::MappingError::UnmappedState(other)),
        }
    }
}

/// Message kind from the status high nibble
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiKind {
    NoteOff,
    NoteOn,
    ControlChange,
    /// Any other status (aftertouch, pitch bend, ...)
    Other(u8),
}

impl MidiKind {
    fn from_status(status: u8) -> Self {
        match status >> 4 {
            NOTE_OFF => Self::NoteOff,
            NOTE_ON => Self::NoteOn,
            CONTROL_CHANGE => Self::ControlChange,
            other => Self::Other(other),
        }
    }
}

/// Error decoding raw bytes from the inbound queue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed MIDI message: expected 3 bytes, got {len}")]
    MalformedMessage { len: usize },

    #[error("Malformed MIDI message: data byte {byte:#04x} has the high bit set")]
    DataOutOfRange { byte: u8 },
}

/// A 3-byte channel voice message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawMidiMessage {
    /// High nibble = kind, low nibble = channel
    pub status: u8,
    /// Note or controller number
    pub data1: u8,
    /// Velocity or controller value
    pub data2: u8,
}

impl RawMidiMessage {
    /// Decode a queued byte buffer
    ///
    /// Anything but exactly 3 bytes, or a data byte above 0x7F, is malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        match *bytes {
            [status, data1, data2] => {
                if let Some(&byte) = [data1, data2].iter().find(|&&b| b > 0x7F) {
                    return Err(DecodeError::DataOutOfRange { byte });
                }
                Ok(Self {
                    status,
                    data1,
                    data2,
                })
            }
            _ => Err(DecodeError::MalformedMessage { len: bytes.len() }),
        }
    }

    /// Note On for an address (used for all LED output)
    pub fn note_on(address: Address, velocity: u8) -> Self {
        Self {
            status: (NOTE_ON << 4) | address.channel(),
            data1: address.number(),
            data2: velocity,
        }
    }

    pub fn kind(&self) -> MidiKind {
        MidiKind::from_status(self.status)
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn address(&self) -> Address {
        Address::from_message(self)
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.status, self.data1, self.data2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_packing() {
        let addr = Address::new(0x0B, 0x01).unwrap();
        assert_eq!(addr.raw(), 0x0B01);
        assert_eq!(addr.channel(), 0x0B);
        assert_eq!(addr.number(), 0x01);

        assert!(Address::new(16, 0).is_none());
        assert!(Address::new(0, 128).is_none());
    }

    #[test]
    fn test_address_try_from_rejects_overlapping_bits() {
        assert!(Address::try_from(0x0F7Fu16).is_ok());
        assert!(Address::try_from(0x1000u16).is_err());
        assert!(Address::try_from(0x0080u16).is_err());
    }

    #[test]
    fn test_address_serde_as_integer() {
        let addr = Address::new(1, 60).unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "316");
        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, addr);

        assert!(serde_json::from_str::<Address>("4096").is_err());
    }

    #[test]
    fn test_note_names() {
        assert_eq!(Address::new(0, 60).unwrap().note_name(), "C4");
        assert_eq!(Address::new(0, 61).unwrap().note_name(), "C#4");
        assert_eq!(Address::new(0, 0).unwrap().note_name(), "C-1");
        assert_eq!(
            Address::new(2, 69).unwrap().describe(MidiKind::NoteOff),
            "Ch 3 A4"
        );
        assert_eq!(
            Address::new(0, 7).unwrap().describe(MidiKind::ControlChange),
            "Ch 1 CC 7"
        );
    }

    #[test]
    fn test_decode_lengths() {
        assert!(RawMidiMessage::decode(&[0x90, 0x3C, 0x7F]).is_ok());
        assert_eq!(
            RawMidiMessage::decode(&[0x90, 0x3C]),
            Err(DecodeError::MalformedMessage { len: 2 })
        );
        assert_eq!(
            RawMidiMessage::decode(&[0x90, 0x3C, 0x7F, 0x00]),
            Err(DecodeError::MalformedMessage { len: 4 })
        );
        assert!(RawMidiMessage::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_high_data_bytes() {
        assert_eq!(
            RawMidiMessage::decode(&[0x80, 0x90, 0x00]),
            Err(DecodeError::DataOutOfRange { byte: 0x90 })
        );
        assert_eq!(
            RawMidiMessage::decode(&[0xB0, 0x07, 0xFF]),
            Err(DecodeError::DataOutOfRange { byte: 0xFF })
        );
        // Every decodable message yields a valid address
        for data1 in 0..=0x7Fu8 {
            let msg = RawMidiMessage::decode(&[0x8F, data1, 0]).unwrap();
            assert!(Address::try_from(msg.address().raw()).is_ok());
        }
    }

    #[test]
    fn test_message_kind_and_address() {
        let msg = RawMidiMessage::decode(&[0xB2, 0x07, 0x64]).unwrap();
        assert_eq!(msg.kind(), MidiKind::ControlChange);
        assert_eq!(msg.channel(), 2);
        assert_eq!(msg.address().raw(), 0x0207);

        let msg = RawMidiMessage::decode(&[0xE0, 0x00, 0x40]).unwrap();
        assert_eq!(msg.kind(), MidiKind::Other(0xE));
    }

    #[test]
    fn test_loop_state_codes() {
        assert_eq!(LoopState::try_from(1).unwrap(), LoopState::Starting);
        assert!(LoopState::try_from(7).is_err());
        assert!(LoopState::Stopping.blinks());
        assert!(!LoopState::Started.blinks());
    }
}
