//! MIDI control surface support for a clip-launching loop player
//!
//! This crate provides:
//! - Device mappings binding grid buttons, volume controllers and page buttons
//! - Inbound message dispatch to a loop engine
//! - Diff-based LED feedback with a shared blink clock
//! - Learn mode for building mappings from live input
//! - Persisted device settings and a midir transport bridge
//!
//! # Architecture
//!
//! ```text
//! MIDI Device → midir callback → inbound queue ─┐
//!                                                ├→ ControlSurface::tick() → LoopEngine
//! MIDI Device ← output thread  ← outbound queue ─┘          └→ events queue → UI
//! ```
//!
//! The core is driven by a single cooperative loop calling
//! [`ControlSurface::tick`]; it never blocks and never touches midir.

mod config;
mod connection;
mod dispatch;
mod engine;
mod feedback;
mod learn;
mod mapping;
mod messages;
mod types;

pub use config::{
    default_device_settings_path, load_device_settings, save_device_settings, DeviceSettings,
    MappingRecord,
};
pub use connection::{MidiConnection, MidiConnectionError, MidiTransport};
pub use dispatch::{classify, DispatchStats, MessageDispatcher};
pub use engine::{LoopEngine, LoopStatus};
pub use feedback::{BlinkSet, FeedbackEngine, LedBatch, BLINK_PERIOD, PROGRESS_PERIOD};
pub use learn::{LearnCommand, LearnError, LearningSession, LearningTarget};
pub use mapping::{
    CellColor, ControlSurfaceMapping, LedCommand, LedVelocities, MappingError, NoteBindings,
};
pub use messages::{CaptureEvent, ControlAction, SurfaceEvent};
pub use types::{Address, Coord, DecodeError, LoopState, MidiKind, RawMidiMessage};

use flume::{Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

/// Capacity of the inbound queue; the midir callback drops when full
pub const INBOUND_CAPACITY: usize = 256;

/// Both ends of the three queues connecting transport, core and UI
pub struct SurfaceChannels {
    pub inbound_tx: Sender<Vec<u8>>,
    pub inbound_rx: Receiver<Vec<u8>>,
    pub outbound_tx: Sender<LedBatch>,
    pub outbound_rx: Receiver<LedBatch>,
    pub events_tx: Sender<SurfaceEvent>,
    pub events_rx: Receiver<SurfaceEvent>,
}

impl SurfaceChannels {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = flume::bounded(INBOUND_CAPACITY);
        let (outbound_tx, outbound_rx) = flume::unbounded();
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
            events_tx,
            events_rx,
        }
    }
}

impl Default for SurfaceChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for control surface operations
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("No device at index {index} ({count} configured)")]
    NoSuchDevice { index: usize, count: usize },

    #[error("Learn mode is not active")]
    NotLearning,

    #[error("Learn mode failed: {0}")]
    Learn(#[from] LearnError),
}

/// Main control surface manager
///
/// Owns the device list, the active mapping and the dispatch, feedback and
/// learn components. Everything runs on the thread calling [`tick`].
///
/// [`tick`]: ControlSurface::tick
pub struct ControlSurface {
    inbound: Receiver<Vec<u8>>,
    outbound: Sender<LedBatch>,
    events: Sender<SurfaceEvent>,
    /// Every loaded or learned device
    devices: Vec<Arc<ControlSurfaceMapping>>,
    /// Index into `devices` of the active one
    active: Option<usize>,
    /// Active mapping; swapped whole, never mutated
    mapping: Option<Arc<ControlSurfaceMapping>>,
    dispatcher: MessageDispatcher,
    feedback: FeedbackEngine,
    /// Present while learn mode is running
    learning: Option<LearningSession>,
    last_progress: Option<Instant>,
}

impl ControlSurface {
    pub fn new(
        inbound: Receiver<Vec<u8>>,
        outbound: Sender<LedBatch>,
        events: Sender<SurfaceEvent>,
    ) -> Self {
        Self {
            dispatcher: MessageDispatcher::new(events.clone()),
            feedback: FeedbackEngine::new(outbound.clone(), events.clone()),
            inbound,
            outbound,
            events,
            devices: Vec::new(),
            active: None,
            mapping: None,
            learning: None,
            last_progress: None,
        }
    }

    /// Build from the core-side ends of a [`SurfaceChannels`]
    pub fn from_channels(channels: &SurfaceChannels) -> Self {
        Self::new(
            channels.inbound_rx.clone(),
            channels.outbound_tx.clone(),
            channels.events_tx.clone(),
        )
    }

    /// One pass of the cooperative loop
    ///
    /// Drains inbound input (into learn mode when active, otherwise into the
    /// dispatcher), then diffs loop states into LED updates and advances the
    /// blink clock. Never blocks.
    pub fn tick(&mut self, now: Instant, engine: &mut dyn LoopEngine) -> DispatchStats {
        let stats = if let Some(session) = self.learning.as_mut() {
            DispatchStats {
                applied: session.drain(&self.inbound),
                ..Default::default()
            }
        } else if let Some(mapping) = self.mapping.as_deref() {
            self.dispatcher
                .drain(&self.inbound, mapping, &mut self.feedback, engine)
        } else {
            let pending = self.inbound.len();
            let received = self.inbound.try_iter().take(pending).count();
            if received > 0 {
                log::trace!("MIDI: no active device, discarded {} message(s)", received);
            }
            DispatchStats {
                received,
                ..Default::default()
            }
        };

        let loops = engine.loops();
        let mapping = self.mapping.as_deref();
        self.feedback.diff(mapping, &loops, now);
        self.feedback.tick(mapping, now);

        stats
    }

    /// Report playback progress if a progress period has elapsed
    ///
    /// Returns whether progress was reported.
    pub fn poll_progress(&mut self, now: Instant, engine: &dyn LoopEngine) -> bool {
        let due = self
            .last_progress
            .map_or(true, |last| now.duration_since(last) >= PROGRESS_PERIOD);
        if due {
            self.last_progress = Some(now);
            self.feedback.poll_progress(&engine.loops());
        }
        due
    }

    /// Replace the device list with the valid records of `settings`
    ///
    /// The first device becomes active. Returns the number of devices loaded.
    pub fn load_devices(&mut self, settings: &DeviceSettings) -> usize {
        self.devices = settings.mappings().into_iter().map(Arc::new).collect();
        self.active = None;
        self.mapping = None;
        self.feedback.redraw();

        if !self.devices.is_empty() {
            self.activate(0);
        }
        log::info!("load_devices: {} device(s) available", self.devices.len());
        self.devices.len()
    }

    /// Make the device at `index` active and relight every LED
    pub fn select_device(&mut self, index: usize) -> Result<(), SurfaceError> {
        if index >= self.devices.len() {
            return Err(SurfaceError::NoSuchDevice {
                index,
                count: self.devices.len(),
            });
        }
        self.activate(index);
        Ok(())
    }

    /// Append a device and make it active; returns its index
    pub fn add_device(&mut self, mapping: ControlSurfaceMapping) -> usize {
        self.devices.push(Arc::new(mapping));
        let index = self.devices.len() - 1;
        self.activate(index);
        index
    }

    /// Remove a device; removing the active one leaves no device active
    pub fn remove_device(
        &mut self,
        index: usize,
    ) -> Result<Arc<ControlSurfaceMapping>, SurfaceError> {
        if index >= self.devices.len() {
            return Err(SurfaceError::NoSuchDevice {
                index,
                count: self.devices.len(),
            });
        }
        let removed = self.devices.remove(index);

        match self.active {
            Some(active) if active == index => {
                log::info!("MIDI: active device '{}' removed", removed.name());
                self.active = None;
                self.mapping = None;
                self.feedback.redraw();
            }
            Some(active) if active > index => self.active = Some(active - 1),
            _ => {}
        }
        Ok(removed)
    }

    /// Serializable form of every device, for saving
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            devices: self
                .devices
                .iter()
                .map(|mapping| MappingRecord::from(mapping.as_ref()))
                .collect(),
        }
    }

    fn activate(&mut self, index: usize) {
        let mapping = Arc::clone(&self.devices[index]);
        log::info!("MIDI: activating device '{}'", mapping.name());

        // The new device may have fewer page buttons than the last one
        let page = self.feedback.current_page();
        let page = if page < mapping.block_buttons().len() {
            page
        } else {
            0
        };

        self.active = Some(index);
        self.feedback.redraw();
        self.feedback.page_select(&mapping, page);
        let _ = self.events.send(SurfaceEvent::DeviceChanged {
            index,
            name: mapping.name().to_string(),
        });
        self.mapping = Some(mapping);
    }

    /// Enter learn mode, discarding any session already running
    pub fn start_learning(&mut self) -> &mut LearningSession {
        if self.learning.is_some() {
            log::info!("Learn: restarting, previous capture discarded");
        }
        self.learning
            .insert(LearningSession::new(self.outbound.clone(), self.events.clone()))
    }

    pub fn learning_mut(&mut self) -> Option<&mut LearningSession> {
        self.learning.as_mut()
    }

    pub fn is_learning(&self) -> bool {
        self.learning.is_some()
    }

    /// Leave learn mode without building anything; returns whether a session was running
    ///
    /// Preview LEDs are turned off and the active device is relit on the
    /// next tick.
    pub fn cancel_learning(&mut self) -> bool {
        let Some(session) = self.learning.take() else {
            return false;
        };
        log::info!("Learn: cancelled");

        session.preview_color(0);
        self.feedback.redraw();
        if let Some(mapping) = &self.mapping {
            self.feedback
                .page_select(mapping, self.feedback.current_page());
        }
        true
    }

    /// Build the learned mapping, add it and make it active
    ///
    /// On error the session stays open so capture can continue.
    pub fn finish_learning(
        &mut self,
        name: impl Into<String>,
        velocities: LedVelocities,
    ) -> Result<usize, SurfaceError> {
        let session = self.learning.as_ref().ok_or(SurfaceError::NotLearning)?;
        let mapping = session.finalize(name, velocities)?;
        self.learning = None;
        Ok(self.add_device(mapping))
    }

    pub fn mapping(&self) -> Option<&Arc<ControlSurfaceMapping>> {
        self.mapping.as_ref()
    }

    pub fn active_device(&self) -> Option<usize> {
        self.active
    }

    pub fn devices(&self) -> &[Arc<ControlSurfaceMapping>] {
        &self.devices
    }

    pub fn feedback(&self) -> &FeedbackEngine {
        &self.feedback
    }
}
