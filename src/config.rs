use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use strum::VariantArray as _;

use crate::keys::DeviceKey;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not read the configuration file {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("could not parse the configuration file {1:?}")]
    Parse(#[source] serde_json::Error, PathBuf),
    #[error("cannot track multiple power entities ({0:?})")]
    MultiplePowerEntities(Vec<String>),
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub feed_in: Option<FeedIn>,
    /// Devices whose entities are exposed; all of them when absent.
    #[serde(default = "all_devices")]
    pub devices: BTreeSet<DeviceKey>,
    #[serde(default = "default_scan_interval", with = "humantime_serde")]
    pub scan_interval: Duration,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FeedIn {
    pub power_entity_id: PowerEntity,
    #[serde(default)]
    pub invert_power: bool,
}

/// Power entities may be given as a single id or as a list of ids.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PowerEntity {
    One(String),
    Many(Vec<String>),
}

impl Default for Config {
    fn default() -> Self {
        Self { feed_in: None, devices: all_devices(), scan_interval: DEFAULT_SCAN_INTERVAL }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::Read(e, path.to_path_buf()))?;
        serde_json::from_str(&contents).map_err(|e| Error::Parse(e, path.to_path_buf()))
    }

    /// The power entity the auto feed-in follows, if it is configured.
    pub fn power_entity(&self) -> Result<Option<&str>, Error> {
        let Some(feed_in) = &self.feed_in else { return Ok(None) };
        match &feed_in.power_entity_id {
            PowerEntity::One(id) if id.is_empty() => Ok(None),
            PowerEntity::One(id) => Ok(Some(id)),
            PowerEntity::Many(ids) => match ids.as_slice() {
                [] => Ok(None),
                [id] => Ok(Some(id)),
                _ => Err(Error::MultiplePowerEntities(ids.clone())),
            },
        }
    }

    pub fn invert_power(&self) -> bool {
        self.feed_in.as_ref().is_some_and(|f| f.invert_power)
    }
}

fn all_devices() -> BTreeSet<DeviceKey> {
    DeviceKey::VARIANTS.iter().copied().collect()
}

fn default_scan_interval() -> Duration {
    DEFAULT_SCAN_INTERVAL
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = parse("{}");
        assert_eq!(config, Config::default());
        assert_eq!(config.devices.len(), DeviceKey::VARIANTS.len());
        assert_eq!(config.power_entity().unwrap(), None);
    }

    #[test]
    fn full_config() {
        let config = parse(
            r#"{
                "feed_in": { "power_entity_id": "sensor.grid_power", "invert_power": true },
                "devices": ["water_heater_control_unit", "energy_manager"],
                "scan_interval": "30s"
            }"#,
        );
        assert_eq!(config.power_entity().unwrap(), Some("sensor.grid_power"));
        assert!(config.invert_power());
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert!(config.devices.contains(&DeviceKey::EnergyManager));
        assert!(!config.devices.contains(&DeviceKey::ModbusMaster));
    }

    #[test]
    fn power_entity_lists() {
        let one = parse(r#"{ "feed_in": { "power_entity_id": ["sensor.a"] } }"#);
        assert_eq!(one.power_entity().unwrap(), Some("sensor.a"));
        assert!(!one.invert_power());
        let none = parse(r#"{ "feed_in": { "power_entity_id": [] } }"#);
        assert_eq!(none.power_entity().unwrap(), None);
        let many = parse(r#"{ "feed_in": { "power_entity_id": ["sensor.a", "sensor.b"] } }"#);
        assert!(matches!(many.power_entity(), Err(Error::MultiplePowerEntities(_))));
    }

    #[test]
    fn rejects_unknown_devices() {
        assert!(serde_json::from_str::<Config>(r#"{ "devices": ["toaster"] }"#).is_err());
        assert!(serde_json::from_str::<Config>(r#"{ "scan_interval": "soon" }"#).is_err());
    }
}
