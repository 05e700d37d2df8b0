//! Control surface mapping
//!
//! Immutable description of a device: which address triggers which grid
//! cell, which controllers drive volumes, which buttons select pages, and
//! the velocity codes that light its LEDs.

use crate::types::{Address, Coord, LoopState, RawMidiMessage};
use std::collections::HashMap;

/// Error building or using a mapping
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("Address {address} is bound to both {first} and {second} in the grid")]
    DuplicateGridAddress {
        address: Address,
        first: Coord,
        second: Coord,
    },

    #[error("Loop state code {0} is not one of the four defined states")]
    UnmappedState(u8),

    #[error("Invalid address {0:#06x}: channel must be 0-15 and number 0-127")]
    InvalidAddress(u16),

    #[error("LED velocity {name} = {value} is out of range (0-127)")]
    InvalidVelocity { name: &'static str, value: u8 },
}

/// LED velocity codes for the four cell colors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedVelocities {
    pub green: u8,
    pub blink_green: u8,
    pub red: u8,
    pub blink_red: u8,
}

impl LedVelocities {
    /// Every velocity must fit a 7-bit data byte
    pub fn validate(&self) -> Result<(), MappingError> {
        let named = [
            ("green", self.green),
            ("blink_green", self.blink_green),
            ("red", self.red),
            ("blink_red", self.blink_red),
        ];
        match named.into_iter().find(|&(_, value)| value > 0x7F) {
            Some((name, value)) => Err(MappingError::InvalidVelocity { name, value }),
            None => Ok(()),
        }
    }
}

/// Logical LED color of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellColor {
    Green,
    Red,
}

impl CellColor {
    /// Fixed state -> color table
    pub fn for_state(state: LoopState) -> Self {
        match state {
            LoopState::Stopped | LoopState::Stopping => Self::Red,
            LoopState::Starting | LoopState::Started => Self::Green,
        }
    }
}

/// Single-note bindings captured by learn mode
///
/// Stored and persisted with the device; not consumed by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoteBindings {
    pub master_volume: Option<Address>,
    pub clip_volume: Option<Address>,
    pub beat_divisor: Option<Address>,
    pub beat_offset: Option<Address>,
}

/// One LED update computed for a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedCommand {
    pub message: RawMidiMessage,
    pub color: CellColor,
    pub blink: bool,
}

/// Validated, read-only device layout
#[derive(Debug, Clone)]
pub struct ControlSurfaceMapping {
    name: String,
    grid: Vec<Vec<Address>>,
    reverse_grid: HashMap<Address, Coord>,
    ctrls: Vec<Address>,
    block_buttons: Vec<Address>,
    master_volume_ctrl: Option<Address>,
    velocities: LedVelocities,
    note_bindings: NoteBindings,
}

impl ControlSurfaceMapping {
    /// Build a mapping, rejecting grids that repeat an address and LED
    /// velocities outside 0-127
    pub fn build(
        name: impl Into<String>,
        grid: Vec<Vec<Address>>,
        ctrls: Vec<Address>,
        block_buttons: Vec<Address>,
        master_volume_ctrl: Option<Address>,
        velocities: LedVelocities,
    ) -> Result<Self, MappingError> {
        velocities.validate()?;

        let mut reverse_grid = HashMap::new();
        for (row, line) in grid.iter().enumerate() {
            for (col, address) in line.iter().enumerate() {
                let coord = Coord::new(row, col);
                if let Some(first) = reverse_grid.insert(*address, coord) {
                    return Err(MappingError::DuplicateGridAddress {
                        address: *address,
                        first,
                        second: coord,
                    });
                }
            }
        }

        let mapping = Self {
            name: name.into(),
            grid,
            reverse_grid,
            ctrls,
            block_buttons,
            master_volume_ctrl,
            velocities,
            note_bindings: NoteBindings::default(),
        };

        for address in mapping.shadowed_cells() {
            log::warn!(
                "Mapping '{}': block button {} shadows grid cell {:?}, the cell cannot be toggled",
                mapping.name,
                address,
                mapping.coordinate_for(address)
            );
        }

        Ok(mapping)
    }

    /// Attach learned single-note bindings
    pub fn with_note_bindings(mut self, note_bindings: NoteBindings) -> Self {
        self.note_bindings = note_bindings;
        self
    }

    /// LED message for a cell in a given state
    ///
    /// `None` when the grid has no address at that coordinate.
    pub fn encode_led(&self, coord: Coord, state: LoopState) -> Option<LedCommand> {
        let address = self.address_at(coord)?;
        let color = CellColor::for_state(state);
        Some(LedCommand {
            message: RawMidiMessage::note_on(address, self.color_velocity(color)),
            color,
            blink: state.blinks(),
        })
    }

    /// LED message shown on the dark phase of a blinking cell
    ///
    /// Uses the blink velocity of the state's color; a device that leaves
    /// blink velocities at 0 simply turns the LED off.
    pub fn encode_blink_off(&self, coord: Coord, state: LoopState) -> Option<RawMidiMessage> {
        let address = self.address_at(coord)?;
        let velocity = match CellColor::for_state(state) {
            CellColor::Green => self.velocities.blink_green,
            CellColor::Red => self.velocities.blink_red,
        };
        Some(RawMidiMessage::note_on(address, velocity))
    }

    /// Velocity lighting a color steadily
    pub fn color_velocity(&self, color: CellColor) -> u8 {
        match color {
            CellColor::Green => self.velocities.green,
            CellColor::Red => self.velocities.red,
        }
    }

    /// Grid cell bound to an address, if any
    pub fn coordinate_for(&self, address: Address) -> Option<Coord> {
        self.reverse_grid.get(&address).copied()
    }

    /// Address bound to a grid cell, if any
    pub fn address_at(&self, coord: Coord) -> Option<Address> {
        self.grid.get(coord.row)?.get(coord.col).copied()
    }

    /// Grid addresses that are also block buttons (buttons take precedence)
    pub fn shadowed_cells(&self) -> Vec<Address> {
        self.block_buttons
            .iter()
            .copied()
            .filter(|address| self.reverse_grid.contains_key(address))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> &[Vec<Address>] {
        &self.grid
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

    pub fn velocities(&self) -> LedVelocities {
        self.velocities
    }

    pub fn note_bindings(&self) -> NoteBindings {
        self.note_bindings
    }

    /// Index of a controller in the volume list
    pub fn ctrl_index(&self, address: Address) -> Option<usize> {
        self.ctrls.iter().position(|ctrl| *ctrl == address)
    }

    /// Page selected by a block button
    pub fn block_button_index(&self, address: Address) -> Option<usize> {
        self.block_buttons.iter().position(|button| *button == address)
    }

    /// Whether control changes should be interpreted at all
    pub fn has_volume_controls(&self) -> bool {
        self.master_volume_ctrl.is_some() || !self.ctrls.is_empty()
    }
}
