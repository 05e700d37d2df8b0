//! End-to-end scenarios through the `ControlSurface` facade

use boucle_midi::{
    load_device_settings, save_device_settings, Address, CaptureEvent, ControlSurface,
    ControlSurfaceMapping, Coord, LearnCommand, LearningTarget, LedBatch, LedVelocities,
    LoopEngine, LoopState, LoopStatus, SurfaceChannels, SurfaceEvent, BLINK_PERIOD,
};
use std::collections::BTreeMap;
use std::time::Instant;

const VELOCITIES: LedVelocities = LedVelocities {
    green: 1,
    blink_green: 2,
    red: 3,
    blink_red: 4,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn addr(raw: u16) -> Address {
    Address::try_from(raw).unwrap()
}

fn square_device() -> ControlSurfaceMapping {
    ControlSurfaceMapping::build(
        "Square",
        vec![
            vec![addr(0x0000), addr(0x0001)],
            vec![addr(0x0100), addr(0x0101)],
        ],
        vec![addr(0x0B00), addr(0x0B01)],
        vec![addr(0x0802), addr(0x0803)],
        Some(addr(0x0007)),
        VELOCITIES,
    )
    .unwrap()
}

/// Loop grid whose cells all hold a loop, starting Stopped
struct Grid {
    states: BTreeMap<Coord, LoopState>,
    master: f32,
    clip_volumes: BTreeMap<Coord, f32>,
}

impl Grid {
    fn stopped(rows: usize, cols: usize) -> Self {
        let mut states = BTreeMap::new();
        for row in 0..rows {
            for col in 0..cols {
                states.insert(Coord::new(row, col), LoopState::Stopped);
            }
        }
        Self {
            states,
            master: 1.0,
            clip_volumes: BTreeMap::new(),
        }
    }

    fn set(&mut self, coord: Coord, state: LoopState) {
        self.states.insert(coord, state);
    }
}

impl LoopEngine for Grid {
    fn toggle(&mut self, coord: Coord) {
        if let Some(state) = self.states.get_mut(&coord) {
            *state = match *state {
                LoopState::Stopped | LoopState::Stopping => LoopState::Starting,
                LoopState::Starting | LoopState::Started => LoopState::Stopping,
            };
        }
    }

    fn set_master_volume(&mut self, fraction: f32) {
        self.master = fraction;
    }

    fn set_clip_volume(&mut self, coord: Coord, fraction: f32) {
        if self.states.contains_key(&coord) {
            self.clip_volumes.insert(coord, fraction);
        }
    }

    fn loops(&self) -> Vec<LoopStatus> {
        self.states
            .iter()
            .map(|(&coord, &state)| LoopStatus {
                coord,
                state,
                progress: 0.5,
            })
            .collect()
    }
}

fn bytes(batch: &LedBatch) -> Vec<[u8; 3]> {
    batch.iter().map(|m| m.to_bytes()).collect()
}

/// Activate the square device and settle the initial LED state
fn performing() -> (SurfaceChannels, ControlSurface, Grid, Instant) {
    init_logger();
    let channels = SurfaceChannels::new();
    let mut surface = ControlSurface::from_channels(&channels);
    let mut grid = Grid::stopped(2, 2);
    let t0 = Instant::now();

    surface.add_device(square_device());
    surface.tick(t0, &mut grid);
    channels.outbound_rx.drain().for_each(drop);
    channels.events_rx.drain().for_each(drop);

    (channels, surface, grid, t0)
}

#[test]
fn test_activation_lights_page_and_grid() {
    init_logger();
    let channels = SurfaceChannels::new();
    let mut surface = ControlSurface::from_channels(&channels);
    let mut grid = Grid::stopped(2, 2);

    surface.add_device(square_device());
    assert_eq!(
        bytes(&channels.outbound_rx.try_recv().unwrap()),
        vec![[0x98, 0x02, 3], [0x98, 0x03, 0]]
    );

    surface.tick(Instant::now(), &mut grid);
    let mut cells = bytes(&channels.outbound_rx.try_recv().unwrap());
    cells.sort();
    assert_eq!(
        cells,
        vec![[0x90, 0x00, 3], [0x90, 0x01, 3], [0x91, 0x00, 3], [0x91, 0x01, 3]]
    );
}

#[test]
fn test_starting_cell_blinks_until_started() {
    let (channels, mut surface, mut grid, t0) = performing();

    channels.inbound_tx.send(vec![0x80, 0x00, 0]).unwrap();
    surface.tick(t0, &mut grid);

    assert_eq!(
        bytes(&channels.outbound_rx.try_recv().unwrap()),
        vec![[0x90, 0x00, 1]]
    );
    assert!(surface.feedback().blink_set().contains(Coord::new(0, 0)));

    // Dark phase, then lit again
    surface.tick(t0 + BLINK_PERIOD, &mut grid);
    assert_eq!(
        bytes(&channels.outbound_rx.try_recv().unwrap()),
        vec![[0x90, 0x00, 2]]
    );
    surface.tick(t0 + BLINK_PERIOD * 2, &mut grid);
    assert_eq!(
        bytes(&channels.outbound_rx.try_recv().unwrap()),
        vec![[0x90, 0x00, 1]]
    );

    grid.set(Coord::new(0, 0), LoopState::Started);
    surface.tick(t0 + BLINK_PERIOD * 2, &mut grid);
    assert_eq!(
        bytes(&channels.outbound_rx.try_recv().unwrap()),
        vec![[0x90, 0x00, 1]]
    );
    assert!(surface.feedback().blink_set().is_empty());
    assert!(!surface.feedback().blink_set().is_running());

    // No further blink traffic
    surface.tick(t0 + BLINK_PERIOD * 5, &mut grid);
    assert!(channels.outbound_rx.is_empty());
}

#[test]
fn test_page_button_relights_in_one_batch() {
    let (channels, mut surface, mut grid, t0) = performing();

    channels.inbound_tx.send(vec![0x88, 0x03, 0]).unwrap();
    surface.tick(t0, &mut grid);

    let batch = channels.outbound_rx.try_recv().unwrap();
    assert_eq!(bytes(&batch), vec![[0x98, 0x02, 0], [0x98, 0x03, 3]]);
    assert!(channels.outbound_rx.is_empty());
    assert!(channels
        .events_rx
        .drain()
        .any(|e| e == SurfaceEvent::PageChanged { page: 1 }));
}

#[test]
fn test_volume_controllers_follow_page() {
    let (channels, mut surface, mut grid, t0) = performing();

    channels.inbound_tx.send(vec![0xBB, 0x01, 64]).unwrap();
    channels.inbound_tx.send(vec![0x88, 0x03, 0]).unwrap();
    channels.inbound_tx.send(vec![0xBB, 0x00, 127]).unwrap();
    channels.inbound_tx.send(vec![0xB0, 0x07, 0]).unwrap();
    let stats = surface.tick(t0, &mut grid);

    assert_eq!(stats.applied, 4);
    assert_eq!(grid.clip_volumes.get(&Coord::new(0, 1)), Some(&(64.0 / 127.0)));
    assert_eq!(grid.clip_volumes.get(&Coord::new(1, 0)), Some(&1.0));
    assert_eq!(grid.master, 0.0);
}

#[test]
fn test_malformed_input_is_dropped() {
    let (channels, mut surface, mut grid, t0) = performing();

    channels.inbound_tx.send(vec![0x80, 0x00]).unwrap();
    channels.inbound_tx.send(vec![0x80, 0x00, 0, 0]).unwrap();
    let stats = surface.tick(t0, &mut grid);

    assert_eq!(stats.received, 2);
    assert_eq!(stats.malformed, 2);
    assert_eq!(stats.applied, 0);
    assert!(grid.states.values().all(|s| *s == LoopState::Stopped));
    assert!(channels.outbound_rx.is_empty());
}

#[test]
fn test_double_release_restores_state_parity() {
    let (channels, mut surface, mut grid, t0) = performing();
    let cell = Coord::new(1, 1);

    channels.inbound_tx.send(vec![0x81, 0x01, 0]).unwrap();
    surface.tick(t0, &mut grid);
    assert_eq!(grid.states[&cell], LoopState::Starting);

    channels.inbound_tx.send(vec![0x81, 0x01, 0]).unwrap();
    surface.tick(t0, &mut grid);
    assert_eq!(grid.states[&cell], LoopState::Stopping);
    assert_eq!(surface.feedback().last_state(cell), Some(LoopState::Stopping));
}

#[test]
fn test_progress_reported_per_cell() {
    let (channels, mut surface, grid, t0) = performing();

    assert!(surface.poll_progress(t0, &grid));
    let progress: Vec<_> = channels
        .events_rx
        .drain()
        .filter(|e| matches!(e, SurfaceEvent::CellProgress { .. }))
        .collect();
    assert_eq!(progress.len(), 4);
    assert!(progress.contains(&SurfaceEvent::CellProgress {
        coord: Coord::new(1, 0),
        fraction: 0.5
    }));
}

#[test]
fn test_learn_save_and_reload() {
    init_logger();
    let channels = SurfaceChannels::new();
    let mut surface = ControlSurface::from_channels(&channels);
    let mut grid = Grid::stopped(1, 2);
    let t0 = Instant::now();
    let send = |bytes: [u8; 3]| channels.inbound_tx.send(bytes.to_vec()).unwrap();

    surface.start_learning().handle(LearnCommand::StartNewRow);
    send([0x80, 0x24, 0]);
    send([0x80, 0x25, 0]);
    send([0x80, 0x25, 0]);
    surface.tick(t0, &mut grid);

    let session = surface.learning_mut().unwrap();
    session.handle(LearnCommand::SelectTarget(LearningTarget::Ctrls));
    send([0xB0, 0x30, 10]);
    send([0xB0, 0x30, 90]);
    surface.tick(t0, &mut grid);

    let session = surface.learning_mut().unwrap();
    session.handle(LearnCommand::SelectTarget(LearningTarget::MasterVolumeCtrl));
    send([0xB0, 0x30, 20]);
    send([0xB0, 0x38, 20]);
    surface.tick(t0, &mut grid);

    let session = surface.learning_mut().unwrap();
    assert_eq!(session.ctrls(), &[addr(0x0030)]);
    assert_eq!(session.master_volume_ctrl(), Some(addr(0x0038)));
    assert_eq!(session.target(), LearningTarget::None);

    // Learn mode does not drive the loop engine
    assert!(grid.states.values().all(|s| *s == LoopState::Stopped));
    assert!(channels.events_rx.drain().any(|e| e
        == SurfaceEvent::Captured(CaptureEvent::Cell {
            coord: Coord::new(0, 1),
            label: "Ch 1 C#2".to_string(),
        })));

    let index = surface.finish_learning("Learned", VELOCITIES).unwrap();
    assert_eq!(index, 0);
    assert!(!surface.is_learning());
    assert_eq!(
        surface.mapping().unwrap().coordinate_for(addr(0x0025)),
        Some(Coord::new(0, 1))
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.yaml");
    save_device_settings(&surface.device_settings(), &path).unwrap();

    let other = SurfaceChannels::new();
    let mut reloaded = ControlSurface::from_channels(&other);
    assert_eq!(reloaded.load_devices(&load_device_settings(&path)), 1);
    let mapping = reloaded.mapping().unwrap();
    assert_eq!(mapping.name(), "Learned");
    assert_eq!(mapping.ctrls(), &[addr(0x0030)]);
    assert_eq!(mapping.master_volume_ctrl(), Some(addr(0x0038)));
}

#[test]
fn test_cancelled_learning_returns_to_performance() {
    let (channels, mut surface, mut grid, t0) = performing();

    let session = surface.start_learning();
    session.select_target(LearningTarget::BlockButtons);
    assert!(surface.cancel_learning());

    channels.inbound_tx.send(vec![0x80, 0x01, 0]).unwrap();
    surface.tick(t0, &mut grid);
    assert_eq!(grid.states[&Coord::new(0, 1)], LoopState::Starting);
    assert_eq!(surface.devices().len(), 1);
}

#[test]
fn test_cancel_turns_off_preview_and_relights() {
    let (channels, mut surface, mut grid, t0) = performing();

    surface.start_learning().handle(LearnCommand::StartNewRow);
    channels.inbound_tx.send(vec![0x80, 0x00, 0]).unwrap();
    surface.tick(t0, &mut grid);
    surface
        .learning_mut()
        .unwrap()
        .handle(LearnCommand::PreviewColor(99));
    assert_eq!(
        bytes(&channels.outbound_rx.try_recv().unwrap()),
        vec![[0x90, 0x00, 99]]
    );

    assert!(surface.cancel_learning());
    assert_eq!(
        bytes(&channels.outbound_rx.try_recv().unwrap()),
        vec![[0x90, 0x00, 0]]
    );
    assert_eq!(
        bytes(&channels.outbound_rx.try_recv().unwrap()),
        vec![[0x98, 0x02, 3], [0x98, 0x03, 0]]
    );

    surface.tick(t0, &mut grid);
    let mut cells = bytes(&channels.outbound_rx.try_recv().unwrap());
    cells.sort();
    assert_eq!(
        cells,
        vec![[0x90, 0x00, 3], [0x90, 0x01, 3], [0x91, 0x00, 3], [0x91, 0x01, 3]]
    );
    assert!(!surface.cancel_learning());
}

#[test]
fn test_engine_dropping_a_blinking_cell_clears_it() {
    let (channels, mut surface, mut grid, t0) = performing();
    let cell = Coord::new(1, 0);

    grid.set(cell, LoopState::Stopping);
    surface.tick(t0, &mut grid);
    assert!(surface.feedback().blink_set().is_running());
    channels.outbound_rx.drain().for_each(drop);
    channels.events_rx.drain().for_each(drop);

    grid.states.remove(&cell);
    surface.tick(t0, &mut grid);
    assert_eq!(
        bytes(&channels.outbound_rx.try_recv().unwrap()),
        vec![[0x91, 0x00, 0]]
    );
    assert!(channels
        .events_rx
        .drain()
        .any(|e| e == SurfaceEvent::CellCleared { coord: cell }));
    assert!(!surface.feedback().blink_set().is_running());

    surface.tick(t0 + BLINK_PERIOD * 3, &mut grid);
    assert!(channels.outbound_rx.is_empty());
}

#[test]
fn test_settings_with_one_bad_record_keeps_good_device() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.yaml");
    std::fs::write(
        &path,
        "devices:\n\
         - name: Square\n  start_stop: [[0, 1]]\n  block_buttons: [2050]\n  red_vel: 3\n\
         - name: Broken\n  start_stop: [[70000]]\n",
    )
    .unwrap();

    let channels = SurfaceChannels::new();
    let mut surface = ControlSurface::from_channels(&channels);
    assert_eq!(surface.load_devices(&load_device_settings(&path)), 1);
    assert_eq!(surface.mapping().unwrap().name(), "Square");

    // Saving after a partial load keeps the device that did load
    save_device_settings(&surface.device_settings(), &path).unwrap();
    let reloaded = load_device_settings(&path);
    assert_eq!(reloaded.devices.len(), 1);
    assert_eq!(reloaded.devices[0].name, "Square");
}
