//! Watering program definitions and the calendar predicate that decides
//! whether a program fires at a given time.
//!
//! In memory a program is plain enums and structs; the packed legacy
//! layout (flag bits, split epoch-day bytes, month*32+day date codes)
//! only exists in [`ProgramRecord`], the persistence-boundary form.

use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime};

use crate::codec::{StartTime, SunTimes};
use crate::error::EngineError;
use crate::{Timestamp, MAX_START_TIMES, MAX_STATIONS, PROGRAM_NAME_SIZE};

const SECS_PER_DAY: i64 = 86_400;

// ---------------------------------------------------------------------------
// Program value types
// ---------------------------------------------------------------------------

/// Day-of-month restriction.  Odd excludes the 31st and Feb 29 so the
/// alternating pattern survives month boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OddEven {
    #[default]
    None,
    Odd,
    Even,
}

/// Which calendar rule selects the program's run days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// Weekday bitmask, bit 0 = Monday .. bit 6 = Sunday.
    Weekly { days: u8 },
    /// Fires on exactly one day (days since the Unix epoch), then asks to
    /// be deleted.
    SingleRun { epoch_day: u16 },
    /// Day-of-month; 0 means the last day of the month.
    Monthly { day: u8 },
    /// Fires when `days_since_epoch % modulus == remainder`.
    Interval { remainder: u8, modulus: u8 },
}

/// Start times: a base time with repeats, or up to four independent times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartSpec {
    Repeating {
        start: StartTime,
        /// Number of repeats after the first occurrence.
        count: u16,
        /// Minutes between occurrences; 0 disables repeats.
        every_minutes: u16,
    },
    Fixed([Option<StartTime>; MAX_START_TIMES]),
}

/// A month/day pair, `month*32 + day` in the persisted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u8,
    pub day: u8,
}

impl MonthDay {
    pub fn code(self) -> u16 {
        self.month as u16 * 32 + self.day as u16
    }

    pub fn from_code(code: u16) -> Result<Self, EngineError> {
        let month = (code / 32) as u8;
        let day = (code % 32) as u8;
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(EngineError::InvalidDateRange(code));
        }
        Ok(MonthDay { month, day })
    }
}

/// An annual active window.  `start > end` wraps across year-end
/// (e.g. Nov 1 .. Mar 15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: MonthDay,
    pub end: MonthDay,
}

impl DateRange {
    fn contains(&self, date: Date) -> bool {
        let code = date.month() as u16 * 32 + date.day() as u16;
        let (s, e) = (self.start.code(), self.end.code());
        if s <= e {
            (s..=e).contains(&code)
        } else {
            code >= s || code <= e
        }
    }
}

/// One watering program.  Read-only during evaluation; created and edited
/// only through the store/CRUD surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDefinition {
    pub enabled: bool,
    pub use_weather: bool,
    pub odd_even: OddEven,
    pub schedule: Schedule,
    pub start: StartSpec,
    pub date_range: Option<DateRange>,
    /// Encoded per-station water times (see [`crate::codec::WaterTime`]).
    #[serde(with = "duration_array")]
    pub durations: [u16; MAX_STATIONS],
    pub name: String,
}

/// Serde treats `[u16; MAX_STATIONS]` as a plain sequence; derived array
/// support stops at length 32.
mod duration_array {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::MAX_STATIONS;

    pub fn serialize<S>(durations: &[u16; MAX_STATIONS], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(durations.iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u16; MAX_STATIONS], D::Error>
    where
        D: Deserializer<'de>,
    {
        let values: Vec<u16> = Vec::deserialize(deserializer)?;
        values
            .try_into()
            .map_err(|v: Vec<u16>| D::Error::invalid_length(v.len(), &"one duration per station"))
    }
}

impl Default for ProgramDefinition {
    fn default() -> Self {
        ProgramDefinition {
            enabled: true,
            use_weather: false,
            odd_even: OddEven::None,
            schedule: Schedule::Weekly { days: 0 },
            start: StartSpec::Fixed([None; MAX_START_TIMES]),
            date_range: None,
            durations: [0; MAX_STATIONS],
            name: String::new(),
        }
    }
}

/// Result of a successful match: which occurrence fired this minute, and
/// whether the program has exhausted itself (single-run programs only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramMatch {
    /// 1-based: which start time (fixed mode) or which repeat (repeating
    /// mode) matched.
    pub occurrence: u32,
    pub delete_after: bool,
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

impl ProgramDefinition {
    pub fn is_single_run(&self) -> bool {
        matches!(self.schedule, Schedule::SingleRun { .. })
    }

    /// Does the program's calendar rule select the day containing `t`?
    fn day_match(&self, t: Timestamp) -> bool {
        let Ok(dt) = OffsetDateTime::from_unix_timestamp(t) else {
            return false;
        };
        let date = dt.date();

        if let Some(range) = &self.date_range {
            if !range.contains(date) {
                return false;
            }
        }

        let day = date.day();
        match self.schedule {
            Schedule::Weekly { days } => {
                let wd = date.weekday().number_days_from_monday();
                if days & (1 << wd) == 0 {
                    return false;
                }
            }
            Schedule::SingleRun { epoch_day } => {
                if t.div_euclid(SECS_PER_DAY) != epoch_day as i64 {
                    return false;
                }
            }
            Schedule::Monthly { day: wanted } => {
                let wanted = if wanted == 0 {
                    date.month().length(date.year())
                } else {
                    wanted
                };
                if day != wanted {
                    return false;
                }
            }
            Schedule::Interval { remainder, modulus } => {
                if modulus == 0 {
                    return false;
                }
                if t.div_euclid(SECS_PER_DAY).rem_euclid(modulus as i64) != remainder as i64 {
                    return false;
                }
            }
        }

        match self.odd_even {
            OddEven::None => true,
            OddEven::Even => day % 2 == 0,
            OddEven::Odd => {
                day != 31 && !(day == 29 && date.month() == Month::February) && day % 2 == 1
            }
        }
    }

    /// Evaluate the program against `now` at minute granularity; the
    /// caller must not re-evaluate the same minute twice.  Returns which
    /// occurrence fired, or `None`.
    ///
    /// A repeating program with a non-zero interval is also checked
    /// against yesterday's day match, so a sequence that started before
    /// midnight keeps firing after it.
    pub fn check_match(&self, now: Timestamp, sun: &SunTimes) -> Option<ProgramMatch> {
        if !self.enabled {
            return None;
        }
        let minute = (now.rem_euclid(SECS_PER_DAY) / 60) as i32;
        let today = self.day_match(now);

        match &self.start {
            StartSpec::Fixed(times) => {
                if !today {
                    return None;
                }
                let resolved: Vec<(usize, u16)> = times
                    .iter()
                    .enumerate()
                    .filter_map(|(i, t)| t.map(|t| (i, t.resolve(sun))))
                    .collect();
                let latest = resolved.iter().map(|&(_, m)| m).max()?;
                for &(i, m) in &resolved {
                    if m as i32 == minute {
                        return Some(ProgramMatch {
                            occurrence: i as u32 + 1,
                            delete_after: self.is_single_run() && m == latest,
                        });
                    }
                }
                None
            }
            StartSpec::Repeating {
                start,
                count,
                every_minutes,
            } => {
                let start = start.resolve(sun) as i32;
                let repeat = *count as i32;
                let interval = *every_minutes as i32;

                if today {
                    if minute == start {
                        return Some(ProgramMatch {
                            occurrence: 1,
                            delete_after: self.is_single_run() && interval == 0,
                        });
                    }
                    if minute > start && interval > 0 {
                        if let Some(m) = self.repeat_match(minute - start, interval, repeat) {
                            return Some(m);
                        }
                    }
                }

                // Overnight carry: a sequence that began yesterday may
                // still be producing occurrences after midnight.
                if interval > 0 && self.day_match(now - SECS_PER_DAY) {
                    let elapsed = minute - start + 1440;
                    if elapsed > 0 {
                        return self.repeat_match(elapsed, interval, repeat);
                    }
                }
                None
            }
        }
    }

    fn repeat_match(&self, elapsed: i32, interval: i32, repeat: i32) -> Option<ProgramMatch> {
        let c = elapsed / interval;
        if c * interval == elapsed && c <= repeat {
            Some(ProgramMatch {
                occurrence: c as u32 + 1,
                delete_after: self.is_single_run() && c == repeat,
            })
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence boundary
// ---------------------------------------------------------------------------

const FLAG_ENABLED: u8 = 1 << 0;
const FLAG_USE_WEATHER: u8 = 1 << 1;
const FLAG_STARTTIME_FIXED: u8 = 1 << 6;
const FLAG_DATE_RANGE: u8 = 1 << 7;

const TYPE_WEEKLY: u8 = 0;
const TYPE_SINGLE_RUN: u8 = 1;
const TYPE_MONTHLY: u8 = 2;
const TYPE_INTERVAL: u8 = 3;

/// The packed legacy record layout, kept byte-compatible with the
/// original firmware's on-disk program format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRecord {
    pub flags: u8,
    pub days: [u8; 2],
    pub start_times: [i16; MAX_START_TIMES],
    pub date_range: (u16, u16),
    pub durations: Vec<u16>,
    pub name: String,
}

impl From<&ProgramDefinition> for ProgramRecord {
    fn from(p: &ProgramDefinition) -> Self {
        let mut flags = 0u8;
        if p.enabled {
            flags |= FLAG_ENABLED;
        }
        if p.use_weather {
            flags |= FLAG_USE_WEATHER;
        }
        let odd_even_bits: u8 = match p.odd_even {
            OddEven::None => 0,
            OddEven::Odd => 1,
            OddEven::Even => 2,
        };
        flags |= odd_even_bits << 2;

        let (type_bits, days) = match p.schedule {
            Schedule::Weekly { days } => (TYPE_WEEKLY, [days, 0]),
            Schedule::SingleRun { epoch_day } => {
                (TYPE_SINGLE_RUN, [(epoch_day >> 8) as u8, epoch_day as u8])
            }
            Schedule::Monthly { day } => (TYPE_MONTHLY, [day, 0]),
            Schedule::Interval { remainder, modulus } => (TYPE_INTERVAL, [remainder, modulus]),
        };
        flags |= type_bits << 4;

        let start_times = match &p.start {
            StartSpec::Repeating {
                start,
                count,
                every_minutes,
            } => [
                start.encode(),
                (*count).min(i16::MAX as u16) as i16,
                (*every_minutes).min(i16::MAX as u16) as i16,
                0,
            ],
            StartSpec::Fixed(times) => {
                flags |= FLAG_STARTTIME_FIXED;
                let mut raw = [-1i16; MAX_START_TIMES];
                for (slot, t) in raw.iter_mut().zip(times.iter()) {
                    if let Some(t) = t {
                        *slot = t.encode();
                    }
                }
                raw
            }
        };

        let date_range = match &p.date_range {
            Some(r) => {
                flags |= FLAG_DATE_RANGE;
                (r.start.code(), r.end.code())
            }
            None => (0, 0),
        };

        let mut name = p.name.clone();
        while name.len() > PROGRAM_NAME_SIZE {
            name.pop();
        }

        ProgramRecord {
            flags,
            days,
            start_times,
            date_range,
            durations: p.durations.to_vec(),
            name,
        }
    }
}

impl TryFrom<&ProgramRecord> for ProgramDefinition {
    type Error = EngineError;

    fn try_from(r: &ProgramRecord) -> Result<Self, EngineError> {
        let odd_even = match (r.flags >> 2) & 0b11 {
            1 => OddEven::Odd,
            2 => OddEven::Even,
            _ => OddEven::None,
        };

        let schedule = match (r.flags >> 4) & 0b11 {
            TYPE_WEEKLY => Schedule::Weekly { days: r.days[0] },
            TYPE_SINGLE_RUN => Schedule::SingleRun {
                epoch_day: (r.days[0] as u16) << 8 | r.days[1] as u16,
            },
            TYPE_MONTHLY => Schedule::Monthly { day: r.days[0] },
            _ => Schedule::Interval {
                remainder: r.days[0],
                modulus: r.days[1],
            },
        };

        let start = if r.flags & FLAG_STARTTIME_FIXED != 0 {
            let mut times = [None; MAX_START_TIMES];
            for (slot, &raw) in times.iter_mut().zip(r.start_times.iter()) {
                // Bit 15 marks an unused slot in fixed mode.
                if raw >= 0 {
                    *slot = Some(StartTime::decode(raw)?);
                }
            }
            StartSpec::Fixed(times)
        } else {
            StartSpec::Repeating {
                start: StartTime::decode(r.start_times[0])?,
                count: r.start_times[1].max(0) as u16,
                every_minutes: r.start_times[2].max(0) as u16,
            }
        };

        let date_range = if r.flags & FLAG_DATE_RANGE != 0 {
            Some(DateRange {
                start: MonthDay::from_code(r.date_range.0)?,
                end: MonthDay::from_code(r.date_range.1)?,
            })
        } else {
            None
        };

        let mut durations = [0u16; MAX_STATIONS];
        for (slot, &d) in durations.iter_mut().zip(r.durations.iter()) {
            *slot = d;
        }

        Ok(ProgramDefinition {
            enabled: r.flags & FLAG_ENABLED != 0,
            use_weather: r.flags & FLAG_USE_WEATHER != 0,
            odd_even,
            schedule,
            start,
            date_range,
            durations,
            name: r.name.clone(),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn sun() -> SunTimes {
        SunTimes {
            sunrise_minute: 360,
            sunset_minute: 1080,
        }
    }

    /// Timestamp for a date at a given minute-of-day.
    fn ts(date: Date, minute: i64) -> i64 {
        date.midnight().assume_utc().unix_timestamp() + minute * 60
    }

    fn weekly(days: u8, start_minute: u16) -> ProgramDefinition {
        ProgramDefinition {
            schedule: Schedule::Weekly { days },
            start: StartSpec::Repeating {
                start: StartTime::Clock(start_minute),
                count: 0,
                every_minutes: 0,
            },
            ..Default::default()
        }
    }

    // -- Day matching -------------------------------------------------------

    #[test]
    fn weekly_matches_only_selected_weekday() {
        // 2025-06-04 is a Wednesday; bit 2 = Wednesday.
        let p = weekly(1 << 2, 480);
        assert!(p.check_match(ts(date!(2025 - 06 - 04), 480), &sun()).is_some());
        assert!(p.check_match(ts(date!(2025 - 06 - 05), 480), &sun()).is_none());
        assert!(p.check_match(ts(date!(2025 - 06 - 11), 480), &sun()).is_some());
    }

    #[test]
    fn disabled_program_never_matches() {
        let p = ProgramDefinition {
            enabled: false,
            ..weekly(0x7f, 480)
        };
        assert!(p.check_match(ts(date!(2025 - 06 - 04), 480), &sun()).is_none());
    }

    #[test]
    fn single_run_matches_one_epoch_day_only() {
        let day = ts(date!(2025 - 06 - 04), 0) / 86_400;
        let p = ProgramDefinition {
            schedule: Schedule::SingleRun {
                epoch_day: day as u16,
            },
            start: StartSpec::Repeating {
                start: StartTime::Clock(480),
                count: 0,
                every_minutes: 0,
            },
            ..Default::default()
        };
        let m = p.check_match(ts(date!(2025 - 06 - 04), 480), &sun()).unwrap();
        assert!(m.delete_after);
        assert!(p.check_match(ts(date!(2025 - 06 - 05), 480), &sun()).is_none());
    }

    #[test]
    fn monthly_matches_day_of_month() {
        let p = ProgramDefinition {
            schedule: Schedule::Monthly { day: 15 },
            ..weekly(0, 480)
        };
        assert!(p.check_match(ts(date!(2025 - 06 - 15), 480), &sun()).is_some());
        assert!(p.check_match(ts(date!(2025 - 06 - 16), 480), &sun()).is_none());
    }

    #[test]
    fn monthly_zero_means_last_day() {
        let p = ProgramDefinition {
            schedule: Schedule::Monthly { day: 0 },
            ..weekly(0, 480)
        };
        assert!(p.check_match(ts(date!(2025 - 06 - 30), 480), &sun()).is_some());
        assert!(p.check_match(ts(date!(2025 - 06 - 29), 480), &sun()).is_none());
        assert!(p.check_match(ts(date!(2024 - 02 - 29), 480), &sun()).is_some());
    }

    #[test]
    fn interval_matches_on_remainder() {
        let t = ts(date!(2025 - 06 - 04), 480);
        let epoch_day = t / 86_400;
        let p = ProgramDefinition {
            schedule: Schedule::Interval {
                remainder: (epoch_day % 3) as u8,
                modulus: 3,
            },
            ..weekly(0, 480)
        };
        assert!(p.check_match(t, &sun()).is_some());
        assert!(p.check_match(t + 86_400, &sun()).is_none());
        assert!(p.check_match(t + 3 * 86_400, &sun()).is_some());
    }

    #[test]
    fn interval_zero_modulus_never_matches() {
        let p = ProgramDefinition {
            schedule: Schedule::Interval {
                remainder: 0,
                modulus: 0,
            },
            ..weekly(0, 480)
        };
        assert!(p.check_match(ts(date!(2025 - 06 - 04), 480), &sun()).is_none());
    }

    // -- Odd/even -----------------------------------------------------------

    #[test]
    fn odd_restriction_excludes_even_days_and_the_31st() {
        let p = ProgramDefinition {
            odd_even: OddEven::Odd,
            ..weekly(0x7f, 480)
        };
        assert!(p.check_match(ts(date!(2025 - 05 - 15), 480), &sun()).is_some());
        assert!(p.check_match(ts(date!(2025 - 05 - 16), 480), &sun()).is_none());
        assert!(p.check_match(ts(date!(2025 - 05 - 31), 480), &sun()).is_none());
        assert!(p.check_match(ts(date!(2024 - 02 - 29), 480), &sun()).is_none());
    }

    #[test]
    fn even_restriction_excludes_odd_days() {
        let p = ProgramDefinition {
            odd_even: OddEven::Even,
            ..weekly(0x7f, 480)
        };
        assert!(p.check_match(ts(date!(2025 - 05 - 16), 480), &sun()).is_some());
        assert!(p.check_match(ts(date!(2025 - 05 - 15), 480), &sun()).is_none());
    }

    // -- Date range ---------------------------------------------------------

    #[test]
    fn date_range_filters_days() {
        let p = ProgramDefinition {
            date_range: Some(DateRange {
                start: MonthDay { month: 6, day: 1 },
                end: MonthDay { month: 8, day: 31 },
            }),
            ..weekly(0x7f, 480)
        };
        assert!(p.check_match(ts(date!(2025 - 07 - 10), 480), &sun()).is_some());
        assert!(p.check_match(ts(date!(2025 - 05 - 31), 480), &sun()).is_none());
        assert!(p.check_match(ts(date!(2025 - 09 - 01), 480), &sun()).is_none());
    }

    #[test]
    fn date_range_wraps_across_year_end() {
        let p = ProgramDefinition {
            date_range: Some(DateRange {
                start: MonthDay { month: 11, day: 1 },
                end: MonthDay { month: 3, day: 15 },
            }),
            ..weekly(0x7f, 480)
        };
        assert!(p.check_match(ts(date!(2025 - 12 - 25), 480), &sun()).is_some());
        assert!(p.check_match(ts(date!(2026 - 02 - 10), 480), &sun()).is_some());
        assert!(p.check_match(ts(date!(2025 - 07 - 01), 480), &sun()).is_none());
    }

    // -- Fixed start times --------------------------------------------------

    #[test]
    fn fixed_times_return_first_matching_index() {
        let p = ProgramDefinition {
            schedule: Schedule::Weekly { days: 0x7f },
            start: StartSpec::Fixed([
                Some(StartTime::Clock(300)),
                Some(StartTime::Clock(600)),
                None,
                Some(StartTime::Clock(900)),
            ]),
            ..Default::default()
        };
        let m = p.check_match(ts(date!(2025 - 06 - 04), 600), &sun()).unwrap();
        assert_eq!(m.occurrence, 2);
        assert!(!m.delete_after);
        assert!(p.check_match(ts(date!(2025 - 06 - 04), 601), &sun()).is_none());
    }

    #[test]
    fn fixed_times_single_run_deletes_on_latest_time_only() {
        let day = ts(date!(2025 - 06 - 04), 0) / 86_400;
        let p = ProgramDefinition {
            schedule: Schedule::SingleRun {
                epoch_day: day as u16,
            },
            start: StartSpec::Fixed([
                Some(StartTime::Clock(300)),
                Some(StartTime::Clock(900)),
                None,
                None,
            ]),
            ..Default::default()
        };
        let early = p.check_match(ts(date!(2025 - 06 - 04), 300), &sun()).unwrap();
        assert!(!early.delete_after);
        let late = p.check_match(ts(date!(2025 - 06 - 04), 900), &sun()).unwrap();
        assert!(late.delete_after);
    }

    // -- Repeating start times ----------------------------------------------

    #[test]
    fn repeating_occurrences_at_interval_boundaries() {
        // 06:00, twice more every 30 minutes.
        let p = ProgramDefinition {
            schedule: Schedule::Weekly { days: 0x7f },
            start: StartSpec::Repeating {
                start: StartTime::Clock(360),
                count: 2,
                every_minutes: 30,
            },
            ..Default::default()
        };
        let d = date!(2025 - 06 - 04);
        assert_eq!(p.check_match(ts(d, 360), &sun()).unwrap().occurrence, 1);
        assert_eq!(p.check_match(ts(d, 390), &sun()).unwrap().occurrence, 2);
        assert_eq!(p.check_match(ts(d, 420), &sun()).unwrap().occurrence, 3);
        assert!(p.check_match(ts(d, 375), &sun()).is_none());
        assert!(p.check_match(ts(d, 450), &sun()).is_none());
        assert!(p.check_match(ts(d, 359), &sun()).is_none());
    }

    #[test]
    fn repeating_single_run_deletes_after_last_occurrence() {
        let day = ts(date!(2025 - 06 - 04), 0) / 86_400;
        let p = ProgramDefinition {
            schedule: Schedule::SingleRun {
                epoch_day: day as u16,
            },
            start: StartSpec::Repeating {
                start: StartTime::Clock(360),
                count: 2,
                every_minutes: 30,
            },
            ..Default::default()
        };
        let d = date!(2025 - 06 - 04);
        assert!(!p.check_match(ts(d, 360), &sun()).unwrap().delete_after);
        assert!(!p.check_match(ts(d, 390), &sun()).unwrap().delete_after);
        assert!(p.check_match(ts(d, 420), &sun()).unwrap().delete_after);
    }

    #[test]
    fn overnight_carry_continues_after_midnight() {
        // Wednesdays only, starting 23:00, repeating every 2 hours x3.
        let p = ProgramDefinition {
            schedule: Schedule::Weekly { days: 1 << 2 },
            start: StartSpec::Repeating {
                start: StartTime::Clock(1380),
                count: 3,
                every_minutes: 120,
            },
            ..Default::default()
        };
        // 01:00 Thursday = 23:00 Wednesday + 2h -> occurrence 2.
        let m = p.check_match(ts(date!(2025 - 06 - 05), 60), &sun()).unwrap();
        assert_eq!(m.occurrence, 2);
        // 02:00 Thursday is between occurrences.
        assert!(p.check_match(ts(date!(2025 - 06 - 05), 120), &sun()).is_none());
        // Friday 01:00: Thursday is not a run day, no carry.
        assert!(p.check_match(ts(date!(2025 - 06 - 06), 60), &sun()).is_none());
    }

    #[test]
    fn overnight_carry_requires_nonzero_interval() {
        let p = weekly(1 << 2, 1380); // Wednesday 23:00, no repeats
        assert!(p.check_match(ts(date!(2025 - 06 - 05), 60), &sun()).is_none());
    }

    #[test]
    fn sunrise_relative_start_matches_at_resolved_minute() {
        let p = ProgramDefinition {
            schedule: Schedule::Weekly { days: 0x7f },
            start: StartSpec::Repeating {
                start: StartTime::Sunrise(15),
                count: 0,
                every_minutes: 0,
            },
            ..Default::default()
        };
        assert!(p.check_match(ts(date!(2025 - 06 - 04), 375), &sun()).is_some());
        assert!(p.check_match(ts(date!(2025 - 06 - 04), 360), &sun()).is_none());
    }

    // -- Record round trip --------------------------------------------------

    #[test]
    fn record_round_trip_preserves_definition() {
        let mut durations = [0u16; MAX_STATIONS];
        durations[0] = 600;
        durations[5] = 65534;
        let p = ProgramDefinition {
            enabled: true,
            use_weather: true,
            odd_even: OddEven::Odd,
            schedule: Schedule::Interval {
                remainder: 2,
                modulus: 5,
            },
            start: StartSpec::Repeating {
                start: StartTime::Sunset(-30),
                count: 4,
                every_minutes: 45,
            },
            date_range: Some(DateRange {
                start: MonthDay { month: 4, day: 1 },
                end: MonthDay { month: 10, day: 15 },
            }),
            durations,
            name: "Drip line".into(),
        };
        let record = ProgramRecord::from(&p);
        let back = ProgramDefinition::try_from(&record).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn record_round_trip_fixed_times_and_single_run() {
        let p = ProgramDefinition {
            schedule: Schedule::SingleRun { epoch_day: 20245 },
            start: StartSpec::Fixed([
                Some(StartTime::Clock(420)),
                None,
                Some(StartTime::Sunrise(-10)),
                None,
            ]),
            ..Default::default()
        };
        let record = ProgramRecord::from(&p);
        assert_eq!(record.days, [(20245u16 >> 8) as u8, (20245 & 0xff) as u8]);
        let back = ProgramDefinition::try_from(&record).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn json_round_trip_carries_full_duration_array() {
        let mut p = weekly(0x7f, 480);
        p.durations[0] = 600;
        p.durations[MAX_STATIONS - 1] = 65534;
        p.name = "Back lawn".into();
        let json = serde_json::to_string(&p).unwrap();
        let back: ProgramDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn json_with_wrong_duration_count_is_rejected() {
        let p = weekly(0x7f, 480);
        let mut value = serde_json::to_value(&p).unwrap();
        value["durations"] = serde_json::json!([600, 300]);
        assert!(serde_json::from_value::<ProgramDefinition>(value).is_err());
    }

    #[test]
    fn corrupt_date_range_is_rejected_not_panicking() {
        let p = weekly(0x7f, 480);
        let mut record = ProgramRecord::from(&p);
        record.flags |= FLAG_DATE_RANGE;
        record.date_range = (3, 900); // month 0 / month 28
        assert!(matches!(
            ProgramDefinition::try_from(&record),
            Err(EngineError::InvalidDateRange(_))
        ));
    }

    #[test]
    fn corrupt_repeating_start_is_rejected() {
        let p = weekly(0x7f, 480);
        let mut record = ProgramRecord::from(&p);
        record.start_times[0] = -5;
        assert!(matches!(
            ProgramDefinition::try_from(&record),
            Err(EngineError::InvalidEncodedStart(-5))
        ));
    }
}
