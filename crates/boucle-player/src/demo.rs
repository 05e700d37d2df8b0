//! Stand-in loop engine
//!
//! Every mapped grid cell holds a silent loop of a few beats. Start and stop
//! requests are quantised to the next beat, so cells spend a moment in the
//! Starting/Stopping states and the surface LEDs blink like they would with
//! real audio.

use boucle_midi::{ControlSurfaceMapping, Coord, LoopEngine, LoopState, LoopStatus};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const LOOP_BEATS: u64 = 4;

#[derive(Debug, Clone)]
struct DemoLoop {
    state: LoopState,
    volume: f32,
    /// Beat index the loop last (re)started on
    started_at: u64,
}

pub struct DemoLoopGrid {
    cells: BTreeMap<Coord, DemoLoop>,
    master_volume: f32,
    beat: Duration,
    origin: Instant,
    /// Last beat transitions were applied for
    current_beat: u64,
    elapsed: Duration,
}

impl DemoLoopGrid {
    /// One loop per grid cell of `mapping`
    pub fn for_mapping(mapping: Option<&ControlSurfaceMapping>, bpm: f32, now: Instant) -> Self {
        let mut cells = BTreeMap::new();
        if let Some(mapping) = mapping {
            for (row, line) in mapping.grid().iter().enumerate() {
                for col in 0..line.len() {
                    cells.insert(
                        Coord::new(row, col),
                        DemoLoop {
                            state: LoopState::Stopped,
                            volume: 1.0,
                            started_at: 0,
                        },
                    );
                }
            }
        }

        Self {
            cells,
            master_volume: 1.0,
            beat: Duration::from_secs_f32(60.0 / bpm.max(1.0)),
            origin: now,
            current_beat: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Apply pending starts and stops on each beat boundary
    pub fn advance(&mut self, now: Instant) {
        self.elapsed = now.saturating_duration_since(self.origin);
        let beat = (self.elapsed.as_nanos() / self.beat.as_nanos()) as u64;
        if beat <= self.current_beat {
            return;
        }
        self.current_beat = beat;

        for (coord, cell) in self.cells.iter_mut() {
            match cell.state {
                LoopState::Starting => {
                    cell.state = LoopState::Started;
                    cell.started_at = beat;
                    log::debug!("demo: loop {} started on beat {}", coord, beat);
                }
                LoopState::Stopping => {
                    cell.state = LoopState::Stopped;
                    log::debug!("demo: loop {} stopped on beat {}", coord, beat);
                }
                _ => {}
            }
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn volume(&self, coord: Coord) -> Option<f32> {
        self.cells.get(&coord).map(|cell| cell.volume)
    }

    fn progress(&self, cell: &DemoLoop) -> f32 {
        if cell.state != LoopState::Started && cell.state != LoopState::Stopping {
            return 0.0;
        }
        let loop_len = self.beat.as_secs_f32() * LOOP_BEATS as f32;
        let since = self.elapsed.as_secs_f32() - self.beat.as_secs_f32() * cell.started_at as f32;
        (since.max(0.0) % loop_len) / loop_len
    }
}

impl LoopEngine for DemoLoopGrid {
    fn toggle(&mut self, coord: Coord) {
        if let Some(cell) = self.cells.get_mut(&coord) {
            cell.state = match cell.state {
                LoopState::Stopped | LoopState::Stopping => LoopState::Starting,
                LoopState::Starting | LoopState::Started => LoopState::Stopping,
            };
        }
    }

    fn set_master_volume(&mut self, fraction: f32) {
        self.master_volume = fraction;
    }

    fn set_clip_volume(&mut self, coord: Coord, fraction: f32) {
        if let Some(cell) = self.cells.get_mut(&coord) {
            cell.volume = fraction;
        }
    }

    fn loops(&self) -> Vec<LoopStatus> {
        self.cells
            .iter()
            .map(|(&coord, cell)| LoopStatus {
                coord,
                state: cell.state,
                progress: self.progress(cell),
            })
            .collect()
    }
}
