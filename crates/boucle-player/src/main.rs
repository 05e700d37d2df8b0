//! Boucle Player - clip launching from a MIDI control surface
//!
//! Wires the control surface core to a real MIDI port and a stand-in loop
//! engine, then runs the cooperative loop until stdin closes.
//!
//! ## Command line flags
//!
//! - `--list-ports`: Print MIDI input and output ports and exit
//! - `--port <substring>`: Port to open (defaults to the active device's name)
//! - `--device <index>`: Device from the settings file to activate
//! - `--learn`: Start in learn mode to capture a new device mapping

mod commands;
mod demo;

use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use boucle_midi::{
    default_device_settings_path, load_device_settings, save_device_settings, CaptureEvent,
    ControlSurface, MidiConnection, MidiTransport, SurfaceChannels, SurfaceEvent,
};

use commands::{ConsoleCommand, HELP};
use demo::DemoLoopGrid;

/// Cooperative loop period
const TICK: Duration = Duration::from_millis(10);
const DEMO_BPM: f32 = 120.0;

struct Args {
    list_ports: bool,
    port: Option<String>,
    device: Option<usize>,
    learn: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        list_ports: false,
        port: None,
        device: None,
        learn: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--list-ports" => args.list_ports = true,
            "--learn" => args.learn = true,
            "--port" => args.port = Some(iter.next().context("--port needs a value")?),
            "--device" => {
                let value = iter.next().context("--device needs an index")?;
                args.device = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid device index '{}'", value))?,
                );
            }
            other => bail!("Unknown argument '{}'", other),
        }
    }
    Ok(args)
}

fn list_ports() -> anyhow::Result<()> {
    println!("MIDI inputs:");
    for name in MidiConnection::list_input_ports()? {
        println!("  {}", name);
    }
    println!("MIDI outputs:");
    for name in MidiConnection::list_output_ports()? {
        println!("  {}", name);
    }
    Ok(())
}

/// Print what the performer needs to see; everything else goes to the log
fn report(event: SurfaceEvent) {
    match event {
        SurfaceEvent::Captured(CaptureEvent::Cell { coord, label }) => {
            println!("  cell {} <- {}", coord, label)
        }
        SurfaceEvent::Captured(CaptureEvent::Ctrl { index, label }) => {
            println!("  volume controller {} <- {}", index + 1, label)
        }
        SurfaceEvent::Captured(CaptureEvent::BlockButton { index, label }) => {
            println!("  page button {} <- {}", index + 1, label)
        }
        SurfaceEvent::Captured(CaptureEvent::Single { target, label }) => {
            println!("  {} <- {}", target.name(), label)
        }
        SurfaceEvent::Captured(CaptureEvent::RowStarted { row }) => {
            println!("  row {}: press the cells left to right", row + 1)
        }
        SurfaceEvent::LearnTargetChanged { target } => println!("Capturing: {}", target.name()),
        SurfaceEvent::DeviceChanged { index, name } => {
            log::info!("Active device {}: {}", index, name)
        }
        SurfaceEvent::PageChanged { page } => log::info!("Volume page {}", page + 1),
        SurfaceEvent::MasterVolumeChanged { fraction } => {
            log::debug!("Master volume {:.2}", fraction)
        }
        other => log::trace!("{:?}", other),
    }
}

fn main() -> anyhow::Result<()> {
    let args = parse_args()?;

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if args.list_ports {
        return list_ports();
    }

    log::info!("boucle-player starting up");

    let settings_path = default_device_settings_path();
    let channels = SurfaceChannels::new();
    let mut surface = ControlSurface::from_channels(&channels);
    surface.load_devices(&load_device_settings(&settings_path));
    if let Some(index) = args.device {
        surface.select_device(index)?;
    }

    let port = match (&args.port, surface.mapping()) {
        (Some(port), _) => port.clone(),
        (None, Some(mapping)) => mapping.name().to_string(),
        (None, None) => bail!("No device configured; pass --port to choose a MIDI port"),
    };
    let transport = MidiTransport::connect(
        &port,
        channels.inbound_tx.clone(),
        channels.outbound_rx.clone(),
    )
    .with_context(|| format!("Could not open MIDI port matching '{}'", port))?;
    log::info!("Using MIDI port {}", transport.port_name());

    let (command_tx, command_rx) = flume::unbounded();
    commands::spawn_reader(command_tx)?;

    if args.learn {
        surface.start_learning();
        println!("{}", HELP);
    } else {
        println!("Performing. Type 'quit' to exit.");
    }

    let mut grid = DemoLoopGrid::for_mapping(
        surface.mapping().map(|m| m.as_ref()),
        DEMO_BPM,
        Instant::now(),
    );

    loop {
        let now = Instant::now();

        for command in command_rx.try_iter() {
            match command {
                ConsoleCommand::Quit => {
                    log::info!("boucle-player shutting down");
                    return Ok(());
                }
                ConsoleCommand::Cancel => {
                    if surface.cancel_learning() {
                        println!("Learn mode cancelled");
                    }
                }
                ConsoleCommand::Learn(learn) => match surface.learning_mut() {
                    Some(session) => session.handle(learn),
                    None => println!("Not in learn mode (start with --learn)"),
                },
                ConsoleCommand::Save { name, velocities } => {
                    match surface.finish_learning(name, velocities) {
                        Ok(_) => {
                            save_device_settings(&surface.device_settings(), &settings_path)?;
                            println!("Saved to {}", settings_path.display());
                            grid = DemoLoopGrid::for_mapping(
                                surface.mapping().map(|m| m.as_ref()),
                                DEMO_BPM,
                                now,
                            );
                        }
                        Err(e) => println!("{}", e),
                    }
                }
            }
        }

        grid.advance(now);
        surface.tick(now, &mut grid);
        surface.poll_progress(now, &grid);

        for event in channels.events_rx.try_iter() {
            report(event);
        }

        std::thread::sleep(TICK);
    }
}
