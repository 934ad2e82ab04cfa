//! Compact persisted encodings: per-station water times (with the
//! sunrise/sunset sentinel durations), signed master on/off adjustments,
//! and sunrise/sunset-relative start times.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Encoded water time meaning "sunrise to sunset".
const WATER_TIME_SUNRISE_TO_SUNSET: u16 = 65534;
/// Encoded water time meaning "sunset to sunrise" (overnight).
const WATER_TIME_SUNSET_TO_SUNRISE: u16 = 65535;

const STARTTIME_SUNRISE_BIT: u8 = 14;
const STARTTIME_SUNSET_BIT: u8 = 13;
const STARTTIME_SIGN_BIT: u8 = 12;
const STARTTIME_MAGNITUDE_MASK: i16 = 0x7ff;

/// Sunrise and sunset as minute-of-day, maintained by the host (weather
/// service or manual entry) and read-only to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunTimes {
    pub sunrise_minute: u16,
    pub sunset_minute: u16,
}

impl Default for SunTimes {
    fn default() -> Self {
        // 06:00 / 18:00 until real values are configured.
        SunTimes {
            sunrise_minute: 360,
            sunset_minute: 1080,
        }
    }
}

// ---------------------------------------------------------------------------
// Water time
// ---------------------------------------------------------------------------

/// Per-station water time.  The two top encoded values are sentinels for
/// daylight-relative durations; everything else is a literal second count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaterTime {
    Seconds(u16),
    SunriseToSunset,
    SunsetToSunrise,
}

impl WaterTime {
    pub fn decode(v: u16) -> Self {
        match v {
            WATER_TIME_SUNRISE_TO_SUNSET => WaterTime::SunriseToSunset,
            WATER_TIME_SUNSET_TO_SUNRISE => WaterTime::SunsetToSunrise,
            secs => WaterTime::Seconds(secs),
        }
    }

    pub fn encode(self) -> u16 {
        match self {
            WaterTime::Seconds(secs) => secs.min(WATER_TIME_SUNRISE_TO_SUNSET - 1),
            WaterTime::SunriseToSunset => WATER_TIME_SUNRISE_TO_SUNSET,
            WaterTime::SunsetToSunrise => WATER_TIME_SUNSET_TO_SUNRISE,
        }
    }

    /// Resolve to a concrete duration in seconds.
    pub fn resolve(self, sun: &SunTimes) -> u32 {
        match self {
            WaterTime::Seconds(secs) => secs as u32,
            WaterTime::SunriseToSunset => {
                60 * sun.sunset_minute.saturating_sub(sun.sunrise_minute) as u32
            }
            WaterTime::SunsetToSunrise => {
                60 * (sun.sunrise_minute as u32 + 1440 - sun.sunset_minute as u32)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Signed adjustment (master on/off offsets)
// ---------------------------------------------------------------------------

/// Encode a signed second adjustment (-600..=600) into the persisted byte
/// form (0..=240).  5-second granularity; out-of-range values clamp.
pub fn encode_signed_adjust(i: i16) -> u8 {
    ((i.clamp(-600, 600) + 600) / 5) as u8
}

/// Decode the persisted byte form back to seconds.
pub fn decode_signed_adjust(b: u8) -> i16 {
    (b.min(240) as i16 - 120) * 5
}

// ---------------------------------------------------------------------------
// Start time
// ---------------------------------------------------------------------------

/// A program start time: either a plain minute-of-day or an offset from
/// sunrise/sunset.
///
/// Raw 16-bit layout (persisted form): bit 14 sunrise-relative, bit 13
/// sunset-relative, bit 12 offset sign, bits 0-10 magnitude.  Bit 15 set
/// marks an unusable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartTime {
    Clock(u16),
    Sunrise(i16),
    Sunset(i16),
}

impl StartTime {
    /// Decode a raw persisted start time.  Bit 15 set is rejected so a
    /// corrupt record never silently matches.
    pub fn decode(raw: i16) -> Result<Self, EngineError> {
        if raw < 0 {
            return Err(EngineError::InvalidEncodedStart(raw));
        }
        let magnitude = raw & STARTTIME_MAGNITUDE_MASK;
        let offset = if (raw >> STARTTIME_SIGN_BIT) & 1 == 1 {
            -magnitude
        } else {
            magnitude
        };
        if (raw >> STARTTIME_SUNRISE_BIT) & 1 == 1 {
            Ok(StartTime::Sunrise(offset))
        } else if (raw >> STARTTIME_SUNSET_BIT) & 1 == 1 {
            Ok(StartTime::Sunset(offset))
        } else {
            Ok(StartTime::Clock(magnitude as u16))
        }
    }

    pub fn encode(self) -> i16 {
        match self {
            StartTime::Clock(minute) => (minute.min(1440) as i16) & STARTTIME_MAGNITUDE_MASK,
            StartTime::Sunrise(offset) => encode_relative(offset, STARTTIME_SUNRISE_BIT),
            StartTime::Sunset(offset) => encode_relative(offset, STARTTIME_SUNSET_BIT),
        }
    }

    /// Resolve to a minute-of-day, clamped to [0, 1439].
    pub fn resolve(self, sun: &SunTimes) -> u16 {
        let minute = match self {
            StartTime::Clock(minute) => minute as i32,
            StartTime::Sunrise(offset) => sun.sunrise_minute as i32 + offset as i32,
            StartTime::Sunset(offset) => sun.sunset_minute as i32 + offset as i32,
        };
        minute.clamp(0, 1439) as u16
    }
}

fn encode_relative(offset: i16, type_bit: u8) -> i16 {
    let magnitude = (offset.unsigned_abs().min(1440)) as i16;
    let mut raw = magnitude | (1 << type_bit);
    if offset < 0 {
        raw |= 1 << STARTTIME_SIGN_BIT;
    }
    raw
}

// ===========================================================================
// Tests
// ===========================================================================
