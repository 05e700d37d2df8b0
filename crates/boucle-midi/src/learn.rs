//! Learn mode
//!
//! Builds a [`ControlSurfaceMapping`] for an unknown device from live MIDI.
//! The performer picks a target, presses or moves the control, and the
//! session records its address. Controllers and notes each keep a set of
//! addresses already captured, so a control can never be bound twice and
//! repeated presses are ignored.
//!
//! ```text
//! select_target(Ctrls)  → every new CC appends a controller
//! start_new_row()       → Note Off events fill the next grid row
//! select_target(MasterVolumeCtrl) → first new CC is recorded, target resets
//! finalize(name, vel)   → ControlSurfaceMapping
//! ```

use crate::feedback::LedBatch;
use crate::mapping::{ControlSurfaceMapping, LedVelocities, MappingError, NoteBindings};
use crate::messages::{CaptureEvent, SurfaceEvent};
use crate::types::{Address, Coord, MidiKind, RawMidiMessage};
use flume::{Receiver, Sender};
use std::collections::HashSet;

/// Mapping slot the next captured event is bound to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LearningTarget {
    #[default]
    None,
    StartStopCell,
    MasterVolumeNote,
    ClipVolumeNote,
    BeatDivisorNote,
    BeatOffsetNote,
    MasterVolumeCtrl,
    Ctrls,
    BlockButtons,
}

impl LearningTarget {
    /// Human-readable name for prompts
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "Nothing",
            Self::StartStopCell => "Start/stop cells",
            Self::MasterVolumeNote => "Master volume note",
            Self::ClipVolumeNote => "Clip volume note",
            Self::BeatDivisorNote => "Beat divisor note",
            Self::BeatOffsetNote => "Beat offset note",
            Self::MasterVolumeCtrl => "Master volume controller",
            Self::Ctrls => "Clip volume controllers",
            Self::BlockButtons => "Page buttons",
        }
    }

    /// Whether this target captures controllers (otherwise Note Off)
    pub fn captures_controllers(&self) -> bool {
        matches!(self, Self::MasterVolumeCtrl | Self::Ctrls)
    }

    /// Whether one capture completes the target
    pub fn is_single_value(&self) -> bool {
        matches!(
            self,
            Self::MasterVolumeCtrl
                | Self::MasterVolumeNote
                | Self::ClipVolumeNote
                | Self::BeatDivisorNote
                | Self::BeatOffsetNote
        )
    }
}

/// Command from the UI driving the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnCommand {
    SelectTarget(LearningTarget),
    StartNewRow,
    /// Light every captured cell with a candidate velocity
    PreviewColor(u8),
}

/// Error finishing a session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LearnError {
    #[error("No grid cells were captured")]
    EmptyGrid,

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// In-progress capture of a device mapping
pub struct LearningSession {
    target: LearningTarget,
    /// Completed grid rows
    grid: Vec<Vec<Address>>,
    /// Row currently being filled
    pending_row: Option<Vec<Address>>,
    ctrls: Vec<Address>,
    block_buttons: Vec<Address>,
    master_volume_ctrl: Option<Address>,
    note_bindings: NoteBindings,
    known_controller_addresses: HashSet<Address>,
    known_note_addresses: HashSet<Address>,
    outbound: Sender<LedBatch>,
    events: Sender<SurfaceEvent>,
}

impl LearningSession {
    pub fn new(outbound: Sender<LedBatch>, events: Sender<SurfaceEvent>) -> Self {
        log::info!("Learn: session started");
        Self {
            target: LearningTarget::None,
            grid: Vec::new(),
            pending_row: None,
            ctrls: Vec::new(),
            block_buttons: Vec::new(),
            master_volume_ctrl: None,
            note_bindings: NoteBindings::default(),
            known_controller_addresses: HashSet::new(),
            known_note_addresses: HashSet::new(),
            outbound,
            events,
        }
    }

    /// Apply a UI command
    pub fn handle(&mut self, command: LearnCommand) {
        match command {
            LearnCommand::SelectTarget(target) => self.select_target(target),
            LearnCommand::StartNewRow => self.start_new_row(),
            LearnCommand::PreviewColor(velocity) => self.preview_color(velocity),
        }
    }

    /// Switch target; an unfinished single-value capture is dropped
    pub fn select_target(&mut self, target: LearningTarget) {
        if self.target != target {
            log::debug!("Learn: target {:?} -> {:?}", self.target, target);
        }
        self.target = target;
        let _ = self.events.send(SurfaceEvent::LearnTargetChanged { target });
    }

    /// Close the current grid row and start capturing the next one
    ///
    /// Also selects the start/stop cell target. An empty pending row is
    /// reused rather than producing an empty grid row.
    pub fn start_new_row(&mut self) {
        match self.pending_row.take() {
            Some(row) if !row.is_empty() => self.grid.push(row),
            _ => {}
        }
        self.pending_row = Some(Vec::new());
        self.select_target(LearningTarget::StartStopCell);
        let _ = self.events.send(SurfaceEvent::Captured(CaptureEvent::RowStarted {
            row: self.grid.len(),
        }));
    }

    /// Drain every queued inbound message without blocking
    ///
    /// Returns the number of captures made.
    pub fn drain(&mut self, inbound: &Receiver<Vec<u8>>) -> usize {
        let pending = inbound.len();
        let mut captured = 0;

        for bytes in inbound.try_iter().take(pending) {
            match RawMidiMessage::decode(&bytes) {
                Ok(message) => {
                    if self.process(&message) {
                        captured += 1;
                    }
                }
                Err(e) => log::warn!("Learn: {}, dropping {:02X?}", e, bytes),
            }
        }

        captured
    }

    /// Feed one message; returns whether it was captured
    ///
    /// Addresses already captured in their namespace are ignored silently.
    pub fn process(&mut self, message: &RawMidiMessage) -> bool {
        let address = message.address();
        let kind = message.kind();

        let wanted = if self.target.captures_controllers() {
            MidiKind::ControlChange
        } else {
            MidiKind::NoteOff
        };
        if self.target == LearningTarget::None || kind != wanted {
            return false;
        }

        let known = if self.target.captures_controllers() {
            &mut self.known_controller_addresses
        } else {
            &mut self.known_note_addresses
        };
        if !known.insert(address) {
            log::trace!("Learn: {} already captured", address);
            return false;
        }

        let label = address.describe(kind);
        let event = match self.target {
            LearningTarget::None => return false,
            LearningTarget::StartStopCell => {
                let row_index = self.grid.len();
                let row = self.pending_row.get_or_insert_with(Vec::new);
                row.push(address);
                CaptureEvent::Cell {
                    coord: Coord::new(row_index, row.len() - 1),
                    label,
                }
            }
            LearningTarget::Ctrls => {
                self.ctrls.push(address);
                CaptureEvent::Ctrl {
                    index: self.ctrls.len() - 1,
                    label,
                }
            }
            LearningTarget::BlockButtons => {
                self.block_buttons.push(address);
                CaptureEvent::BlockButton {
                    index: self.block_buttons.len() - 1,
                    label,
                }
            }
            single => {
                match single {
                    LearningTarget::MasterVolumeCtrl => self.master_volume_ctrl = Some(address),
                    LearningTarget::MasterVolumeNote => {
                        self.note_bindings.master_volume = Some(address)
                    }
                    LearningTarget::ClipVolumeNote => self.note_bindings.clip_volume = Some(address),
                    LearningTarget::BeatDivisorNote => {
                        self.note_bindings.beat_divisor = Some(address)
                    }
                    _ => self.note_bindings.beat_offset = Some(address),
                }
                CaptureEvent::Single {
                    target: single,
                    label,
                }
            }
        };

        log::info!("Learn: captured {} for {}", address, self.target.name());
        let _ = self.events.send(SurfaceEvent::Captured(event));

        if self.target.is_single_value() {
            self.select_target(LearningTarget::None);
        }
        true
    }

    /// Light every captured cell with `velocity` in one batch
    pub fn preview_color(&self, velocity: u8) {
        let batch: LedBatch = self
            .grid
            .iter()
            .chain(self.pending_row.iter())
            .flatten()
            .map(|&address| RawMidiMessage::note_on(address, velocity))
            .collect();
        if !batch.is_empty() && self.outbound.send(batch).is_err() {
            log::debug!("Learn: outbound queue closed, preview dropped");
        }
    }

    /// Build the mapping from everything captured so far
    ///
    /// The pending row counts as the last grid row. The session is left
    /// untouched, so a rejected result can be fixed by capturing more.
    pub fn finalize(
        &self,
        name: impl Into<String>,
        velocities: LedVelocities,
    ) -> Result<ControlSurfaceMapping, LearnError> {
        let mut grid = self.grid.clone();
        if let Some(row) = self.pending_row.as_ref().filter(|row| !row.is_empty()) {
            grid.push(row.clone());
        }
        if grid.iter().all(|row| row.is_empty()) {
            return Err(LearnError::EmptyGrid);
        }

        let mapping = ControlSurfaceMapping::build(
            name,
            grid,
            self.ctrls.clone(),
            self.block_buttons.clone(),
            self.master_volume_ctrl,
            velocities,
        )?
        .with_note_bindings(self.note_bindings);

        log::info!(
            "Learn: finished '{}' ({} rows, {} ctrls, {} page buttons)",
            mapping.name(),
            mapping.grid().len(),
            mapping.ctrls().len(),
            mapping.block_buttons().len()
        );
        Ok(mapping)
    }

    pub fn target(&self) -> LearningTarget {
        self.target
    }

    pub fn grid(&self) -> &[Vec<Address>] {
        &self.grid
    }

    pub fn pending_row(&self) -> Option<&[Address]> {
        self.pending_row.as_deref()
    }

    pub fn ctrls(&self) -> &[Address] {
        &self.ctrls
    }

    pub fn block_buttons(&self) -> &[Address] {
        &self.block_buttons
    }

    pub fn master_volume_ctrl(&self) -> Option<Address> {
        self.master_volume_ctrl
    }

    pub fn note_bindings(&self) -> NoteBindings {
        self.note_bindings
    }
}
