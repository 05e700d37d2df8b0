//! Loop engine collaborator
//!
//! The audio side owns loop state; the control surface only toggles loops,
//! writes volumes and reads back a snapshot each tick.

use crate::types::{Coord, LoopState};

/// Snapshot of one active loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopStatus {
    pub coord: Coord,
    pub state: LoopState,
    /// Playback position within the loop (0.0-1.0)
    pub progress: f32,
}

/// Audio/transport side consumed by the dispatcher and feedback engine
pub trait LoopEngine {
    /// Request a start/stop of the loop at `coord`
    fn toggle(&mut self, coord: Coord);

    /// Master volume (0.0-1.0)
    fn set_master_volume(&mut self, fraction: f32);

    /// Volume of a single loop (0.0-1.0); no-op when the cell is empty
    fn set_clip_volume(&mut self, coord: Coord, fraction: f32);

    /// Every active loop with its current state
    fn loops(&self) -> Vec<LoopStatus>;
}
