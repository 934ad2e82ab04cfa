//! TOML config file loading and validation: controller-wide scheduling
//! options, master relay bindings, and per-station attributes.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use sprinkler_engine::{
    ControllerOptions, MasterBinding, Scheduler, StationAttributes, SunTimes, MAX_STATIONS,
    NUM_MASTERS, NUM_SEQ_GROUPS, PARALLEL_GROUP_ID,
};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub num_stations: u8,
    #[serde(default)]
    pub station_delay_secs: i64,
    #[serde(default = "default_water_level")]
    pub water_level_percent: u8,
    /// Offset added to UTC so schedules run in wall-clock time.
    #[serde(default)]
    pub timezone_offset_minutes: i32,
    #[serde(default = "default_sunrise")]
    pub sunrise_minute: u16,
    #[serde(default = "default_sunset")]
    pub sunset_minute: u16,
    #[serde(default)]
    pub masters: Vec<MasterEntry>,
    #[serde(default)]
    pub stations: Vec<StationEntry>,
}

fn default_water_level() -> u8 {
    100
}
fn default_sunrise() -> u16 {
    360
}
fn default_sunset() -> u16 {
    1080
}

#[derive(Debug, Deserialize)]
pub struct MasterEntry {
    pub station: u8,
    #[serde(default)]
    pub on_adjust_secs: i16,
    #[serde(default)]
    pub off_adjust_secs: i16,
}

/// Stations not listed here get default attributes: enabled, parallel,
/// no master, rain-sensitive.
#[derive(Debug, Deserialize)]
pub struct StationEntry {
    pub index: u8,
    #[serde(default)]
    pub name: String,
    pub gpio_pin: Option<u8>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub ignore_rain: bool,
    /// 0-3 serializes within that group; omit for parallel operation.
    pub sequential_group: Option<u8>,
    #[serde(default)]
    pub use_master1: bool,
    #[serde(default)]
    pub use_master2: bool,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Master on/off adjustments are persisted at 5-second granularity with
/// this bound.
const MAX_ADJUST_SECS: i16 = 600;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.num_stations == 0 || self.num_stations as usize > MAX_STATIONS {
            errors.push(format!(
                "num_stations {} out of range [1, {MAX_STATIONS}]",
                self.num_stations
            ));
        }
        if self.station_delay_secs < 0 {
            errors.push(format!(
                "station_delay_secs must not be negative, got {}",
                self.station_delay_secs
            ));
        }
        if self.water_level_percent > 250 {
            errors.push(format!(
                "water_level_percent {} out of range [0, 250]",
                self.water_level_percent
            ));
        }
        if self.sunrise_minute >= 1440 || self.sunset_minute >= 1440 {
            errors.push(format!(
                "sunrise/sunset minutes must be below 1440, got {}/{}",
                self.sunrise_minute, self.sunset_minute
            ));
        } else if self.sunrise_minute >= self.sunset_minute {
            errors.push(format!(
                "sunrise_minute {} must be before sunset_minute {}",
                self.sunrise_minute, self.sunset_minute
            ));
        }
        if !(-14 * 60..=14 * 60).contains(&self.timezone_offset_minutes) {
            errors.push(format!(
                "timezone_offset_minutes {} out of range [-840, 840]",
                self.timezone_offset_minutes
            ));
        }

        self.validate_masters(&mut errors);
        self.validate_stations(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_masters(&self, errors: &mut Vec<String>) {
        if self.masters.len() > NUM_MASTERS {
            errors.push(format!(
                "at most {NUM_MASTERS} master relays are supported, got {}",
                self.masters.len()
            ));
        }
        let mut seen: HashSet<u8> = HashSet::new();
        for (i, m) in self.masters.iter().enumerate() {
            if m.station >= self.num_stations {
                errors.push(format!(
                    "masters[{i}]: station {} is past num_stations {}",
                    m.station, self.num_stations
                ));
            } else if !seen.insert(m.station) {
                errors.push(format!(
                    "masters[{i}]: station {} is already a master",
                    m.station
                ));
            }
            for (field, value) in [
                ("on_adjust_secs", m.on_adjust_secs),
                ("off_adjust_secs", m.off_adjust_secs),
            ] {
                if value.abs() > MAX_ADJUST_SECS {
                    errors.push(format!(
                        "masters[{i}]: {field} {value} out of range [-{MAX_ADJUST_SECS}, {MAX_ADJUST_SECS}]"
                    ));
                }
            }
        }
    }

    fn validate_stations(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<u8> = HashSet::new();
        let mut seen_pins: HashSet<u8> = HashSet::new();
        let master_stations: HashSet<u8> = self.masters.iter().map(|m| m.station).collect();

        for (i, s) in self.stations.iter().enumerate() {
            let ctx = || format!("stations[{i}] (index {})", s.index);

            if s.index >= self.num_stations {
                errors.push(format!(
                    "{}: index is past num_stations {}",
                    ctx(),
                    self.num_stations
                ));
            } else if !seen_ids.insert(s.index) {
                errors.push(format!("{}: duplicate station index", ctx()));
            }

            if let Some(pin) = s.gpio_pin {
                if !VALID_GPIO_PINS.contains(&pin) {
                    errors.push(format!(
                        "{}: gpio_pin {pin} is not a valid BCM GPIO pin (allowed: 2-27)",
                        ctx()
                    ));
                } else if !seen_pins.insert(pin) {
                    errors.push(format!(
                        "{}: gpio_pin {pin} is already used by another station",
                        ctx()
                    ));
                }
            }

            if let Some(group) = s.sequential_group {
                if group as usize >= NUM_SEQ_GROUPS && group != PARALLEL_GROUP_ID {
                    errors.push(format!(
                        "{}: sequential_group {group} out of range [0, {}]",
                        ctx(),
                        NUM_SEQ_GROUPS - 1
                    ));
                }
            }

            if (s.use_master1 && self.masters.is_empty())
                || (s.use_master2 && self.masters.len() < 2)
            {
                errors.push(format!(
                    "{}: references a master relay that is not configured",
                    ctx()
                ));
            }

            if master_stations.contains(&s.index)
                && (s.use_master1 || s.use_master2 || s.sequential_group.is_some())
            {
                errors.push(format!(
                    "{}: a master station cannot itself use a master or a sequential group",
                    ctx()
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Build a scheduler from a validated config.
pub fn build_scheduler(config: &Config) -> Scheduler {
    let mut masters = [MasterBinding::default(); NUM_MASTERS];
    for (slot, m) in masters.iter_mut().zip(config.masters.iter()) {
        *slot = MasterBinding {
            station: Some(m.station),
            on_adjust_secs: m.on_adjust_secs,
            off_adjust_secs: m.off_adjust_secs,
        }
        .normalized();
    }

    let mut scheduler = Scheduler::new(ControllerOptions {
        num_stations: config.num_stations,
        station_delay_secs: config.station_delay_secs,
        water_level_percent: config.water_level_percent,
        masters,
    });
    scheduler.set_sun_times(SunTimes {
        sunrise_minute: config.sunrise_minute,
        sunset_minute: config.sunset_minute,
    });

    for s in &config.stations {
        if let Some(attrs) = scheduler.station_attributes_mut(s.index) {
            *attrs = StationAttributes {
                disabled: s.disabled,
                ignore_rain: s.ignore_rain,
                sequential_group: s.sequential_group.unwrap_or(PARALLEL_GROUP_ID),
                activates_master: [s.use_master1, s.use_master2],
            };
        }
    }

    tracing::info!(
        num_stations = config.num_stations,
        masters = config.masters.len(),
        "scheduler configured"
    );
    scheduler
}

/// Station index -> GPIO pin, for the relay board.
pub fn gpio_map(config: &Config) -> Vec<(u8, u8)> {
    config
        .stations
        .iter()
        .filter_map(|s| s.gpio_pin.map(|pin| (s.index, pin)))
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            num_stations: 8,
            station_delay_secs: 5,
            water_level_percent: 100,
            timezone_offset_minutes: -420,
            sunrise_minute: 360,
            sunset_minute: 1080,
            masters: vec![MasterEntry {
                station: 7,
                on_adjust_secs: 5,
                off_adjust_secs: 15,
            }],
            stations: vec![
                StationEntry {
                    index: 0,
                    name: "front lawn".into(),
                    gpio_pin: Some(17),
                    disabled: false,
                    ignore_rain: false,
                    sequential_group: Some(0),
                    use_master1: true,
                    use_master2: false,
                },
                StationEntry {
                    index: 1,
                    name: "drip line".into(),
                    gpio_pin: Some(27),
                    disabled: false,
                    ignore_rain: true,
                    sequential_group: None,
                    use_master1: false,
                    use_master2: false,
                },
            ],
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn all_violations_are_reported_together() {
        let mut cfg = valid_config();
        cfg.num_stations = 0;
        cfg.water_level_percent = 255;
        cfg.stations[1].gpio_pin = Some(17); // duplicate pin
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("num_stations"));
        assert!(err.contains("water_level_percent"));
        assert!(err.contains("already used"));
    }

    #[test]
    fn master_station_cannot_join_a_group() {
        let mut cfg = valid_config();
        cfg.stations.push(StationEntry {
            index: 7,
            name: String::new(),
            gpio_pin: None,
            disabled: false,
            ignore_rain: false,
            sequential_group: Some(1),
            use_master1: false,
            use_master2: false,
        });
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("master station"));
    }

    #[test]
    fn unconfigured_master_reference_is_rejected() {
        let mut cfg = valid_config();
        cfg.stations[1].use_master2 = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn build_scheduler_applies_attributes_and_masters() {
        let scheduler = build_scheduler(&valid_config());
        assert_eq!(scheduler.options().num_stations, 8);
        assert_eq!(scheduler.options().masters[0].station, Some(7));
        // 5 snaps to the codec's 5-second grid unchanged.
        assert_eq!(scheduler.options().masters[0].on_adjust_secs, 5);
        let attrs = scheduler.station_attributes(0).unwrap();
        assert_eq!(attrs.sequential_group, 0);
        assert!(attrs.activates_master[0]);
        assert!(scheduler.station_attributes(1).unwrap().ignore_rain);
    }

    #[test]
    fn gpio_map_skips_unwired_stations() {
        let mut cfg = valid_config();
        cfg.stations[1].gpio_pin = None;
        assert_eq!(gpio_map(&cfg), vec![(0, 17)]);
    }
}
