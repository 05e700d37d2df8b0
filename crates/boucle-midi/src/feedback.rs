//! LED feedback
//!
//! Diffs loop state against the last snapshot and pushes LED messages onto
//! the outbound queue. Also runs the shared blink clock and the page LEDs.
//!
//! Everything here is driven by the caller's scheduler: `diff` after input
//! has been dispatched, `tick` as often as convenient, `poll_progress` on
//! the slower progress period. Nothing blocks and nothing owns a thread.

use crate::engine::LoopStatus;
use crate::mapping::{CellColor, ControlSurfaceMapping};
use crate::messages::SurfaceEvent;
use crate::types::{Coord, LoopState, RawMidiMessage};
use flume::Sender;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

/// Blink half-period
pub const BLINK_PERIOD: Duration = Duration::from_millis(200);

/// Progress polling period
pub const PROGRESS_PERIOD: Duration = Duration::from_millis(100);

/// LED messages that must reach the device together
pub type LedBatch = Vec<RawMidiMessage>;

/// Cells currently blinking, sharing one phase flag
///
/// The clock only runs while the set is non-empty.
#[derive(Debug)]
pub struct BlinkSet {
    members: BTreeMap<Coord, LoopState>,
    lit: bool,
    next_toggle: Option<Instant>,
    period: Duration,
}

impl BlinkSet {
    pub fn new(period: Duration) -> Self {
        Self {
            members: BTreeMap::new(),
            lit: true,
            next_toggle: None,
            period,
        }
    }

    /// Add or update a member, starting the clock on the first one
    fn insert(&mut self, coord: Coord, state: LoopState, now: Instant) {
        self.members.insert(coord, state);
        if self.next_toggle.is_none() {
            self.lit = true;
            self.next_toggle = Some(now + self.period);
            log::trace!("Feedback: blink clock started");
        }
    }

    /// Remove a member, stopping the clock when the set empties
    fn remove(&mut self, coord: Coord) {
        if self.members.remove(&coord).is_some() && self.members.is_empty() {
            self.next_toggle = None;
            log::trace!("Feedback: blink clock stopped");
        }
    }

    fn clear(&mut self) {
        self.members.clear();
        self.next_toggle = None;
    }

    /// Flip the phase if the period elapsed; returns whether it flipped
    fn poll(&mut self, now: Instant) -> bool {
        match self.next_toggle {
            Some(deadline) if now >= deadline => {
                self.lit = !self.lit;
                // Skip missed periods instead of flipping in a burst
                let mut next = deadline + self.period;
                while next <= now {
                    next += self.period;
                }
                self.next_toggle = Some(next);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, coord: Coord) -> bool {
        self.members.contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the periodic clock is running
    pub fn is_running(&self) -> bool {
        self.next_toggle.is_some()
    }

    /// Current shared phase (true = assigned color shown)
    pub fn is_lit(&self) -> bool {
        self.lit
    }
}

/// Computes and queues outbound LED commands
pub struct FeedbackEngine {
    outbound: Sender<LedBatch>,
    events: Sender<SurfaceEvent>,
    /// Last state seen per cell
    snapshot: HashMap<Coord, LoopState>,
    blink: BlinkSet,
    /// Volume page selected by the block buttons
    current_page: usize,
}

impl FeedbackEngine {
    pub fn new(outbound: Sender<LedBatch>, events: Sender<SurfaceEvent>) -> Self {
        Self::with_blink_period(outbound, events, BLINK_PERIOD)
    }

    pub fn with_blink_period(
        outbound: Sender<LedBatch>,
        events: Sender<SurfaceEvent>,
        blink_period: Duration,
    ) -> Self {
        Self {
            outbound,
            events,
            snapshot: HashMap::new(),
            blink: BlinkSet::new(blink_period),
            current_page: 0,
        }
    }

    /// Push LEDs for every cell whose state changed since the last call
    ///
    /// Cells with no address on the device still update the snapshot and the
    /// rendering side; only their LED message is skipped. Cells missing from
    /// `loops` that were seen before are dropped from the snapshot and the
    /// blink set, and their LED is turned off. Returns the number of changed
    /// cells.
    pub fn diff(
        &mut self,
        mapping: Option<&ControlSurfaceMapping>,
        loops: &[LoopStatus],
        now: Instant,
    ) -> usize {
        let mut batch = LedBatch::new();
        let mut changed = 0;

        for status in loops {
            if self.snapshot.get(&status.coord) == Some(&status.state) {
                continue;
            }
            changed += 1;
            self.snapshot.insert(status.coord, status.state);

            if status.state.blinks() {
                self.blink.insert(status.coord, status.state, now);
            } else {
                self.blink.remove(status.coord);
            }

            let _ = self.events.send(SurfaceEvent::CellColor {
                coord: status.coord,
                color: CellColor::for_state(status.state),
                blink: status.state.blinks(),
            });

            match mapping.and_then(|m| m.encode_led(status.coord, status.state)) {
                Some(led) => batch.push(led.message),
                None => log::trace!("Feedback: no LED bound to cell {}", status.coord),
            }
        }

        let present: HashSet<Coord> = loops.iter().map(|status| status.coord).collect();
        let mut gone: Vec<Coord> = self
            .snapshot
            .keys()
            .filter(|coord| !present.contains(coord))
            .copied()
            .collect();
        gone.sort();

        for coord in gone {
            changed += 1;
            self.snapshot.remove(&coord);
            self.blink.remove(coord);
            log::debug!("Feedback: cell {} no longer holds a loop", coord);

            let _ = self.events.send(SurfaceEvent::CellCleared { coord });
            if let Some(address) = mapping.and_then(|m| m.address_at(coord)) {
                batch.push(RawMidiMessage::note_on(address, 0));
            }
        }

        self.send_batch(batch);
        changed
    }

    /// Advance the blink clock, pushing the new phase for blinking cells
    pub fn tick(&mut self, mapping: Option<&ControlSurfaceMapping>, now: Instant) {
        if !self.blink.poll(now) {
            return;
        }
        let lit = self.blink.is_lit();
        let mut batch = LedBatch::new();

        for (&coord, &state) in &self.blink.members {
            let _ = self.events.send(SurfaceEvent::CellBlink { coord, lit });
            let Some(mapping) = mapping else {
                continue;
            };
            let message = if lit {
                mapping.encode_led(coord, state).map(|led| led.message)
            } else {
                mapping.encode_blink_off(coord, state)
            };
            batch.extend(message);
        }

        self.send_batch(batch);
    }

    /// Select a volume page and relight the block buttons in one batch
    ///
    /// The active button gets the red velocity, every other button is turned
    /// off, so two pages are never lit at once.
    pub fn page_select(&mut self, mapping: &ControlSurfaceMapping, index: usize) {
        self.current_page = index;
        let active = mapping.color_velocity(CellColor::Red);

        let batch: LedBatch = mapping
            .block_buttons()
            .iter()
            .enumerate()
            .map(|(i, &address)| {
                RawMidiMessage::note_on(address, if i == index { active } else { 0 })
            })
            .collect();

        log::debug!("Feedback: page {} selected", index);
        self.send_batch(batch);
        let _ = self.events.send(SurfaceEvent::PageChanged { page: index });
    }

    /// Report playback position of every loop to the rendering side
    pub fn poll_progress(&self, loops: &[LoopStatus]) {
        for status in loops {
            let _ = self.events.send(SurfaceEvent::CellProgress {
                coord: status.coord,
                fraction: status.progress.clamp(0.0, 1.0),
            });
        }
    }

    /// Forget everything sent so the next `diff` relights every cell
    pub fn redraw(&mut self) {
        self.snapshot.clear();
        self.blink.clear();
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn blink_set(&self) -> &BlinkSet {
        &self.blink
    }

    /// Last state recorded for a cell
    pub fn last_state(&self, coord: Coord) -> Option<LoopState> {
        self.snapshot.get(&coord).copied()
    }

    fn send_batch(&self, batch: LedBatch) {
        if batch.is_empty() {
            return;
        }
        log::trace!("Feedback: queueing {} LED message(s)", batch.len());
        if self.outbound.send(batch).is_err() {
            log::debug!("Feedback: outbound queue closed, LED update dropped");
        }
    }
}
