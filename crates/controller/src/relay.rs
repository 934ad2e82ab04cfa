//! Station relay control via GPIO. The `gpio` feature gates the real rppal
//! driver; without it, a mock implementation tracks state in memory and
//! logs changes.

use anyhow::Result;
use std::collections::HashMap;
use tracing::{info, warn};

use sprinkler_engine::StationBits;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO relay board (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct RelayBoard {
    pins: HashMap<u8, OutputPin>, // station index -> GPIO pin
    active_low: bool,             // many relay boards are active-low
    last: StationBits,
}

#[cfg(feature = "gpio")]
impl RelayBoard {
    pub(crate) fn new(station_to_gpio: &[(u8, u8)], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for (station, pin_num) in station_to_gpio {
            let mut pin = gpio.get(*pin_num)?.into_output();

            // Fail-safe: ensure "OFF" at startup
            if active_low {
                pin.set_high();
            } else {
                pin.set_low();
            }

            pins.insert(*station, pin);
        }

        Ok(Self {
            pins,
            active_low,
            last: StationBits::default(),
        })
    }

    /// Drive every wired output to match the activation bits.  Only pins
    /// whose state actually changed are touched.
    pub(crate) fn apply(&mut self, bits: StationBits) {
        for (station, pin) in self.pins.iter_mut() {
            let on = bits.is_set(*station);
            if on == self.last.is_set(*station) {
                continue;
            }
            let level_high = on != self.active_low;
            if level_high {
                pin.set_high();
            } else {
                pin.set_low();
            }
            info!(station, on, "relay changed");
        }
        self.last = bits;
    }

    pub(crate) fn all_off(&mut self) {
        self.apply(StationBits::default());
    }
}

// ---------------------------------------------------------------------------
// Mock relay board (development — no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct RelayBoard {
    stations: HashMap<u8, bool>, // station index -> on/off state
    last: StationBits,
}

#[cfg(not(feature = "gpio"))]
impl RelayBoard {
    pub(crate) fn new(station_to_gpio: &[(u8, u8)], _active_low: bool) -> Result<Self> {
        let mut stations = HashMap::new();
        for (station, pin_num) in station_to_gpio {
            info!(station, gpio = pin_num, "mock relay registered (not wired)");
            stations.insert(*station, false);
        }
        Ok(Self {
            stations,
            last: StationBits::default(),
        })
    }

    pub(crate) fn apply(&mut self, bits: StationBits) {
        for (station, state) in self.stations.iter_mut() {
            let on = bits.is_set(*station);
            if on != *state {
                info!(station, on, "mock relay changed");
                *state = on;
            }
        }
        // Warn once per change about activations with no wired output.
        for station in 0..sprinkler_engine::MAX_STATIONS as u8 {
            if bits.is_set(station)
                && !self.last.is_set(station)
                && !self.stations.contains_key(&station)
            {
                warn!(station, "station active but has no gpio pin configured");
            }
        }
        self.last = bits;
    }

    pub(crate) fn all_off(&mut self) {
        self.apply(StationBits::default());
    }
}

// ===========================================================================
// Tests
// ===========================================================================
