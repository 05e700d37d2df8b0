//! Learn mode console commands
//!
//! One command per stdin line. The reader thread parses lines and forwards
//! them over a channel so the main loop never blocks on input.

use anyhow::{anyhow, bail, Context};
use boucle_midi::{LearnCommand, LearningTarget, LedVelocities};
use flume::Sender;
use std::io::BufRead;

pub const HELP: &str = "\
Learn mode commands:
  cells          capture start/stop cells into the current row
  row            start a new grid row (and capture cells)
  ctrls          capture clip volume controllers
  buttons        capture page buttons
  master-ctrl    capture the master volume controller
  master-note    capture the master volume note
  clip-note      capture the clip volume note
  divisor-note   capture the beat divisor note
  offset-note    capture the beat offset note
  stop           stop capturing
  preview <vel>  light every captured cell with a velocity
  save <name> <green> <blink_green> <red> <blink_red>
  cancel         leave learn mode without saving
  quit           exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Learn(LearnCommand),
    Save {
        name: String,
        velocities: LedVelocities,
    },
    Cancel,
    Quit,
}

fn velocity(word: Option<&str>, what: &str) -> anyhow::Result<u8> {
    let word = word.ok_or_else(|| anyhow!("missing {} velocity", what))?;
    let value: u8 = word
        .parse()
        .with_context(|| format!("{} velocity '{}' is not a number", what, word))?;
    if value > 127 {
        bail!("{} velocity {} is above 127", what, value);
    }
    Ok(value)
}

pub fn parse(line: &str) -> anyhow::Result<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        bail!("empty command");
    };

    let target = |target: LearningTarget| -> anyhow::Result<ConsoleCommand> {
        Ok(ConsoleCommand::Learn(LearnCommand::SelectTarget(target)))
    };
    match verb {
        "cells" => target(LearningTarget::StartStopCell),
        "row" => Ok(ConsoleCommand::Learn(LearnCommand::StartNewRow)),
        "ctrls" => target(LearningTarget::Ctrls),
        "buttons" => target(LearningTarget::BlockButtons),
        "master-ctrl" => target(LearningTarget::MasterVolumeCtrl),
        "master-note" => target(LearningTarget::MasterVolumeNote),
        "clip-note" => target(LearningTarget::ClipVolumeNote),
        "divisor-note" => target(LearningTarget::BeatDivisorNote),
        "offset-note" => target(LearningTarget::BeatOffsetNote),
        "stop" => target(LearningTarget::None),
        "preview" => Ok(ConsoleCommand::Learn(LearnCommand::PreviewColor(velocity(
            words.next(),
            "preview",
        )?))),
        "save" => {
            let name = words.next().ok_or_else(|| anyhow!("missing device name"))?;
            let velocities = LedVelocities {
                green: velocity(words.next(), "green")?,
                blink_green: velocity(words.next(), "blink green")?,
                red: velocity(words.next(), "red")?,
                blink_red: velocity(words.next(), "blink red")?,
            };
            Ok(ConsoleCommand::Save {
                name: name.to_string(),
                velocities,
            })
        }
        "cancel" => Ok(ConsoleCommand::Cancel),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => bail!("unknown command '{}'", other),
    }
}

/// Spawn the stdin reader; it exits on end of input or once the receiver is gone
pub fn spawn_reader(tx: Sender<ConsoleCommand>) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse(&line) {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{}\n{}", e, HELP),
                }
            }
            let _ = tx.send(ConsoleCommand::Quit);
        })
        .context("Failed to spawn console thread")?;
    Ok(())
}
