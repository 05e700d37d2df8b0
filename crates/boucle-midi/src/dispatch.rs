//! Inbound message dispatch
//!
//! Decodes raw bytes from the inbound queue, classifies them against the
//! active mapping and applies the resulting action to the loop engine.
//!
//! Loops toggle on the release edge (Note Off). Surfaces that send Note On
//! then Note Off for one press would otherwise trigger on press, which
//! changes how the grid feels when playing.

use crate::engine::LoopEngine;
use crate::feedback::FeedbackEngine;
use crate::mapping::ControlSurfaceMapping;
use crate::messages::{ControlAction, SurfaceEvent};
use crate::types::{Coord, MidiKind, RawMidiMessage};
use flume::{Receiver, Sender};

/// Counters for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Buffers taken from the queue
    pub received: usize,
    /// Buffers dropped for having the wrong length
    pub malformed: usize,
    /// Messages that changed something
    pub applied: usize,
}

/// Normalize a 7-bit controller value to 0.0-1.0
fn normalize_cc_value(value: u8) -> f32 {
    value.min(127) as f32 / 127.0
}

/// Classify one message against a mapping
///
/// Precedence: controllers first (only when the mapping has any), then
/// Note Off on block buttons, then Note Off on grid cells. Note On and any
/// other kind is ignored.
pub fn classify(
    message: &RawMidiMessage,
    mapping: &ControlSurfaceMapping,
    current_page: usize,
) -> ControlAction {
    let address = message.address();

    match message.kind() {
        MidiKind::ControlChange if mapping.has_volume_controls() => {
            let value = normalize_cc_value(message.data2);
            if mapping.master_volume_ctrl() == Some(address) {
                ControlAction::MasterVolume(value)
            } else if let Some(ctrl) = mapping.ctrl_index(address) {
                ControlAction::ClipVolume {
                    ctrl,
                    page: current_page,
                    value,
                }
            } else {
                ControlAction::UnknownController(address)
            }
        }
        MidiKind::NoteOff => {
            if let Some(index) = mapping.block_button_index(address) {
                ControlAction::PageSelect(index)
            } else if let Some(coord) = mapping.coordinate_for(address) {
                ControlAction::ToggleCell(coord)
            } else {
                ControlAction::Ignored
            }
        }
        _ => ControlAction::Ignored,
    }
}

/// Applies classified input to the engine and feedback
pub struct MessageDispatcher {
    events: Sender<SurfaceEvent>,
}

impl MessageDispatcher {
    pub fn new(events: Sender<SurfaceEvent>) -> Self {
        Self { events }
    }

    /// Process every message queued right now, then return
    ///
    /// Messages that arrive while draining wait for the next call, so a busy
    /// surface cannot starve the rest of the tick.
    pub fn drain(
        &self,
        inbound: &Receiver<Vec<u8>>,
        mapping: &ControlSurfaceMapping,
        feedback: &mut FeedbackEngine,
        engine: &mut dyn LoopEngine,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let pending = inbound.len();

        for bytes in inbound.try_iter().take(pending) {
            stats.received += 1;
            let message = match RawMidiMessage::decode(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    log::warn!("MIDI: {}, dropping {:02X?}", e, bytes);
                    stats.malformed += 1;
                    continue;
                }
            };

            let action = classify(&message, mapping, feedback.current_page());
            if self.apply(action, mapping, feedback, engine) {
                stats.applied += 1;
            }
        }

        stats
    }

    /// Carry out one action; returns whether anything changed
    pub fn apply(
        &self,
        action: ControlAction,
        mapping: &ControlSurfaceMapping,
        feedback: &mut FeedbackEngine,
        engine: &mut dyn LoopEngine,
    ) -> bool {
        match action {
            ControlAction::MasterVolume(fraction) => {
                engine.set_master_volume(fraction);
                let _ = self
                    .events
                    .send(SurfaceEvent::MasterVolumeChanged { fraction });
                true
            }
            ControlAction::ClipVolume { ctrl, page, value } => {
                // Page picks the grid row, controller index the column
                engine.set_clip_volume(Coord::new(page, ctrl), value);
                true
            }
            ControlAction::PageSelect(index) => {
                feedback.page_select(mapping, index);
                true
            }
            ControlAction::ToggleCell(coord) => {
                log::debug!("MIDI: toggle cell {}", coord);
                engine.toggle(coord);
                true
            }
            ControlAction::UnknownController(address) => {
                log::debug!("MIDI: unknown controller {}", address);
                false
            }
            ControlAction::Ignored => false,
        }
    }
}
