//! Control actions and rendering notifications
//!
//! `ControlAction` is what the dispatcher classifies an inbound message as.
//! `SurfaceEvent` is sent to the rendering side over the events channel.

use crate::learn::LearningTarget;
use crate::mapping::CellColor;
use crate::types::{Address, Coord};

/// Domain action decoded from one inbound message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    /// Master volume fader moved
    MasterVolume(f32),
    /// Clip volume controller moved
    ClipVolume {
        /// Index of the controller in the mapping's ctrl list
        ctrl: usize,
        /// Page (grid row) the controllers currently address
        page: usize,
        /// Normalized value (0.0-1.0)
        value: f32,
    },
    /// Block button released
    PageSelect(usize),
    /// Grid button released
    ToggleCell(Coord),
    /// Control change on an address the mapping does not know
    UnknownController(Address),
    /// Nothing to do
    Ignored,
}

/// Notification for the rendering side
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    /// A cell changed state
    CellColor {
        coord: Coord,
        color: CellColor,
        blink: bool,
    },
    /// A cell no longer holds a loop; its LED was turned off
    CellCleared { coord: Coord },
    /// Blink phase flipped for a blinking cell
    CellBlink { coord: Coord, lit: bool },
    /// Playback position of a loop (0.0-1.0)
    CellProgress { coord: Coord, fraction: f32 },
    /// Volume page changed
    PageChanged { page: usize },
    /// Master volume changed from the surface
    MasterVolumeChanged { fraction: f32 },
    /// Learn mode bound an address to a target
    Captured(CaptureEvent),
    /// Learn mode target changed
    LearnTargetChanged { target: LearningTarget },
    /// Active device changed
    DeviceChanged { index: usize, name: String },
}

/// Capture progress during learn mode
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Grid cell captured at (row, col) of the grid being learned
    Cell { coord: Coord, label: String },
    /// Volume controller appended
    Ctrl { index: usize, label: String },
    /// Page button appended
    BlockButton { index: usize, label: String },
    /// Single-value target recorded
    Single {
        target: LearningTarget,
        label: String,
    },
    /// A new grid row was started
    RowStarted { row: usize },
}
