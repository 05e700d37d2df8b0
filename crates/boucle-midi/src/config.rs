//! Persisted device settings
//!
//! Each device is stored as a flat [`MappingRecord`]; the settings file holds
//! the list of records under `devices`. Records are converted to validated
//! [`ControlSurfaceMapping`]s on load, and mappings back to records on save.

use crate::mapping::{ControlSurfaceMapping, LedVelocities, MappingError, NoteBindings};
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Serialized form of one device mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub name: String,

    /// Grid rows of start/stop addresses
    #[serde(default)]
    pub start_stop: Vec<Vec<Address>>,

    #[serde(default)]
    pub ctrls: Vec<Address>,

    #[serde(default)]
    pub block_buttons: Vec<Address>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_volume_ctrl: Option<Address>,

    #[serde(default)]
    pub green_vel: u8,

    #[serde(default)]
    pub blink_green_vel: u8,

    #[serde(default)]
    pub red_vel: u8,

    #[serde(default)]
    pub blink_red_vel: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_volume: Option<Address>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_volume: Option<Address>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat_diviser: Option<Address>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat_offset: Option<Address>,
}

impl MappingRecord {
    /// Per-device JSON form
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a per-device JSON record; out-of-range addresses are rejected
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Validate the record into a mapping
    pub fn to_mapping(&self) -> Result<ControlSurfaceMapping, MappingError> {
        let mapping = ControlSurfaceMapping::build(
            self.name.clone(),
            self.start_stop.clone(),
            self.ctrls.clone(),
            self.block_buttons.clone(),
            self.master_volume_ctrl,
            LedVelocities {
                green: self.green_vel,
                blink_green: self.blink_green_vel,
                red: self.red_vel,
                blink_red: self.blink_red_vel,
            },
        )?;

        Ok(mapping.with_note_bindings(NoteBindings {
            master_volume: self.master_volume,
            clip_volume: self.clip_volume,
            beat_divisor: self.beat_diviser,
            beat_offset: self.beat_offset,
        }))
    }
}

impl From<&ControlSurfaceMapping> for MappingRecord {
    fn from(mapping: &ControlSurfaceMapping) -> Self {
        let velocities = mapping.velocities();
        let notes = mapping.note_bindings();
        Self {
            name: mapping.name().to_string(),
            start_stop: mapping.grid().to_vec(),
            ctrls: mapping.ctrls().to_vec(),
            block_buttons: mapping.block_buttons().to_vec(),
            master_volume_ctrl: mapping.master_volume_ctrl(),
            green_vel: velocities.green,
            blink_green_vel: velocities.blink_green,
            red_vel: velocities.red,
            blink_red_vel: velocities.blink_red,
            master_volume: notes.master_volume,
            clip_volume: notes.clip_volume,
            beat_diviser: notes.beat_divisor,
            beat_offset: notes.beat_offset,
        }
    }
}

/// Settings store: every known device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Records that fail to parse are skipped, the rest still load
    #[serde(deserialize_with = "lenient_records")]
    pub devices: Vec<MappingRecord>,
}

fn lenient_records<'de, D>(deserializer: D) -> Result<Vec<MappingRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values = Vec::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .enumerate()
        .filter_map(
            |(i, value)| match serde_yaml::from_value::<MappingRecord>(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("load_devices: Skipping unreadable device record {}: {}", i, e);
                    None
                }
            },
        )
        .collect())
}

impl DeviceSettings {
    /// Validate every record, skipping the ones that cannot become a mapping
    pub fn mappings(&self) -> Vec<ControlSurfaceMapping> {
        self.devices
            .iter()
            .filter_map(|record| match record.to_mapping() {
                Ok(mapping) => Some(mapping),
                Err(e) => {
                    log::warn!("load_devices: Skipping device '{}': {}", record.name, e);
                    None
                }
            })
            .collect()
    }
}

/// Default location: `<config_dir>/superboucle/devices.yaml`
pub fn default_device_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("superboucle")
        .join("devices.yaml")
}

/// Load settings from a YAML file
///
/// A missing or unreadable file yields no devices.
pub fn load_device_settings(path: &Path) -> DeviceSettings {
    log::info!("load_devices: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_devices: Settings file doesn't exist, no devices configured");
        return DeviceSettings::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<DeviceSettings>(&contents) {
            Ok(settings) => {
                log::info!("load_devices: Loaded {} device(s)", settings.devices.len());
                for device in &settings.devices {
                    log::info!(
                        "  - {} ({} rows, {} ctrls, {} page buttons)",
                        device.name,
                        device.start_stop.len(),
                        device.ctrls.len(),
                        device.block_buttons.len()
                    );
                }
                settings
            }
            Err(e) => {
                log::warn!("load_devices: Failed to parse settings: {}", e);
                DeviceSettings::default()
            }
        },
        Err(e) => {
            log::warn!("load_devices: Failed to read settings file: {}", e);
            DeviceSettings::default()
        }
    }
}

/// Save settings as YAML, creating the parent directory if needed
pub fn save_device_settings(settings: &DeviceSettings, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    log::info!("save_devices: Saving {} device(s) to {:?}", settings.devices.len(), path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
    }

    let yaml =
        serde_yaml::to_string(settings).context("Failed to serialize device settings to YAML")?;

    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write device settings file: {:?}", path))?;

    Ok(())
}
