//! The tick-driven scheduling loop: program evaluation, queue admission,
//! dynamic cancellation, and activation resolution.
//!
//! The host owns the clock.  It calls [`Scheduler::tick`] with the current
//! timestamp at least once per second and drives hardware from the
//! returned [`ActivationSet`]; completed runs accumulate until drained
//! with [`Scheduler::take_completed`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attrib::{MasterBinding, StationAttributes};
use crate::codec::{SunTimes, WaterTime};
use crate::error::EngineError;
use crate::pause::{shift_for_pause, shift_for_resume, PauseState};
use crate::queue::{RunOrigin, RuntimeQueue, RuntimeQueueEntry, SequentialGroupState};
use crate::store::ProgramStore;
use crate::{Timestamp, MAX_STATIONS, NUM_MASTERS, NUM_SEQ_GROUPS};

// ---------------------------------------------------------------------------
// Options and outputs
// ---------------------------------------------------------------------------

/// Controller-wide scheduling options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerOptions {
    /// Number of populated station outputs, at most [`MAX_STATIONS`].
    pub num_stations: u8,
    /// Gap inserted between consecutive runs in a sequential group.
    pub station_delay_secs: i64,
    /// Watering percentage applied to weather-scaled programs.
    pub water_level_percent: u8,
    pub masters: [MasterBinding; NUM_MASTERS],
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            num_stations: 8,
            station_delay_secs: 0,
            water_level_percent: 100,
            masters: [MasterBinding::default(); NUM_MASTERS],
        }
    }
}

/// One bit per station output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationBits(u64);

impl StationBits {
    pub fn set(&mut self, station: u8) {
        if (station as usize) < MAX_STATIONS {
            self.0 |= 1 << station;
        }
    }

    pub fn is_set(&self, station: u8) -> bool {
        (station as usize) < MAX_STATIONS && self.0 & (1 << station) != 0
    }

    pub fn any(&self) -> bool {
        self.0 != 0
    }

    pub fn bits(&self) -> u64 {
        self.0
    }
}

/// What must be energized right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivationSet {
    pub stations: StationBits,
    pub masters: [bool; NUM_MASTERS],
}

/// A run that finished (or was cut short) and left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedRun {
    pub station: u8,
    pub origin: RunOrigin,
    pub start: Timestamp,
    pub duration: i64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    options: ControllerOptions,
    attrs: [StationAttributes; MAX_STATIONS],
    store: ProgramStore,
    queue: RuntimeQueue,
    seq: SequentialGroupState,
    pause: PauseState,
    sun: SunTimes,
    enabled: bool,
    rain_active: bool,
    last_tick: Option<Timestamp>,
    last_minute: Option<i64>,
    completed: Vec<CompletedRun>,
}

impl Scheduler {
    pub fn new(options: ControllerOptions) -> Self {
        Scheduler {
            options,
            attrs: std::array::from_fn(|_| StationAttributes::default()),
            store: ProgramStore::new(),
            queue: RuntimeQueue::new(),
            seq: SequentialGroupState::default(),
            pause: PauseState::default(),
            sun: SunTimes::default(),
            enabled: true,
            rain_active: false,
            last_tick: None,
            last_minute: None,
            completed: Vec::new(),
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ControllerOptions {
        &mut self.options
    }

    pub fn programs(&self) -> &ProgramStore {
        &self.store
    }

    pub fn programs_mut(&mut self) -> &mut ProgramStore {
        &mut self.store
    }

    pub fn queue(&self) -> &RuntimeQueue {
        &self.queue
    }

    pub fn station_attributes(&self, station: u8) -> Option<&StationAttributes> {
        self.attrs.get(station as usize)
    }

    pub fn station_attributes_mut(&mut self, station: u8) -> Option<&mut StationAttributes> {
        self.attrs.get_mut(station as usize)
    }

    pub fn sun_times(&self) -> &SunTimes {
        &self.sun
    }

    pub fn set_sun_times(&mut self, sun: SunTimes) {
        self.sun = sun;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling the controller cancels everything in flight.
    pub fn set_enabled(&mut self, enabled: bool, now: Timestamp) {
        if self.enabled && !enabled {
            info!("controller disabled, stopping all runs");
            self.reset_all(now);
        }
        self.enabled = enabled;
    }

    pub fn is_rain_active(&self) -> bool {
        self.rain_active
    }

    /// Rain signal from a sensor or a rain delay.  Queued program runs on
    /// stations that do not ignore rain are cancelled on the next tick.
    pub fn set_rain(&mut self, active: bool) {
        if active != self.rain_active {
            info!(active, "rain signal changed");
        }
        self.rain_active = active;
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_active()
    }

    pub fn pause_remaining(&self) -> i64 {
        self.pause.remaining()
    }

    /// Drain runs that completed since the last call.
    pub fn take_completed(&mut self) -> Vec<CompletedRun> {
        std::mem::take(&mut self.completed)
    }

    fn is_master_station(&self, station: u8) -> bool {
        self.options
            .masters
            .iter()
            .any(|m| m.station == Some(station))
    }

    // -- tick ---------------------------------------------------------------

    /// Advance the scheduler to `now` and report what must be energized.
    pub fn tick(&mut self, now: Timestamp) -> ActivationSet {
        let elapsed = match self.last_tick {
            Some(prev) => (now - prev).max(0),
            None => 0,
        };
        self.last_tick = Some(now);

        if self.pause.countdown(elapsed) {
            self.resume(now);
        }

        let minute = now.div_euclid(60);
        if self.enabled && self.last_minute != Some(minute) {
            self.last_minute = Some(minute);
            self.evaluate_programs(now);
        }

        self.process_dynamic_events(now);
        let active = self.resolve(now);
        self.reap(now);
        active
    }

    /// Once-per-minute program matching.
    fn evaluate_programs(&mut self, now: Timestamp) {
        let mut requests: Vec<(u8, i64, RunOrigin)> = Vec::new();
        let mut exhausted: Vec<usize> = Vec::new();

        for (index, program) in self.store.iter() {
            let Some(matched) = program.check_match(now, &self.sun) else {
                continue;
            };
            debug!(index, occurrence = matched.occurrence, name = %program.name, "program matched");
            for station in 0..self.options.num_stations {
                if self.is_master_station(station) {
                    continue;
                }
                if self.attrs[station as usize].disabled {
                    continue;
                }
                if self.queue.entry_for_station(station).is_some() {
                    continue;
                }
                let raw = program.durations[station as usize];
                let mut duration = WaterTime::decode(raw).resolve(&self.sun) as i64;
                if duration == 0 {
                    continue;
                }
                if program.use_weather {
                    duration = self.scale_by_water_level(duration);
                    if duration == 0 {
                        continue;
                    }
                }
                requests.push((station, duration, RunOrigin::Program(index as u8)));
            }
            if matched.delete_after {
                exhausted.push(index);
            }
        }

        for (station, duration, origin) in requests {
            if let Err(err) = self.schedule_run(now, station, duration, origin) {
                warn!(station, %err, "could not queue program run");
            }
        }
        // Reverse order so earlier indices stay valid.
        for index in exhausted.into_iter().rev() {
            if let Err(err) = self.store.delete(index) {
                warn!(index, %err, "could not delete exhausted program");
            }
        }
    }

    fn scale_by_water_level(&self, duration: i64) -> i64 {
        let level = self.options.water_level_percent as i64;
        let scaled = duration * level / 100;
        // Very low percentages turn token runs into valve chatter.
        if level < 20 && scaled < 10 {
            return 0;
        }
        scaled
    }

    /// Queue a run, serializing within the station's sequential group.
    pub fn schedule_run(
        &mut self,
        now: Timestamp,
        station: u8,
        duration_secs: i64,
        origin: RunOrigin,
    ) -> Result<usize, EngineError> {
        if station >= self.options.num_stations {
            return Err(EngineError::StationOutOfRange(station));
        }
        let group = self.attrs[station as usize].sequential_group;
        let mut start = now + 1;
        // Mid-pause admissions join the shifted time frame, so the resume
        // rewind applies to them like everything else in the queue.
        if self.pause.is_active() {
            start += self.pause.remaining();
        }
        if (group as usize) < NUM_SEQ_GROUPS {
            let last_stop = self.seq.last_stop(group);
            if last_stop > now {
                start = last_stop + self.options.station_delay_secs;
            }
        }
        let stop = start + duration_secs;
        let entry = RuntimeQueueEntry {
            station,
            start,
            duration: duration_secs,
            dequeue_at: stop + self.master_off_extension(station),
            origin,
        };
        let slot = self.queue.admit(entry)?;
        if (group as usize) < NUM_SEQ_GROUPS {
            self.seq.note_stop(group, stop);
        }
        debug!(station, start, duration_secs, "run queued");
        Ok(slot)
    }

    /// Trailing seconds the entry must stay queued so a bound master can
    /// finish its off window.
    fn master_off_extension(&self, station: u8) -> i64 {
        let mut ext = 0i64;
        for (m, binding) in self.options.masters.iter().enumerate() {
            if binding.station.is_some()
                && self.attrs[station as usize].activates_master[m]
                && binding.off_adjust_secs as i64 > ext
            {
                ext = binding.off_adjust_secs as i64;
            }
        }
        ext
    }

    /// Directly run one station, bypassing programs and weather scaling.
    pub fn submit_manual_run(
        &mut self,
        now: Timestamp,
        station: u8,
        duration_secs: i64,
    ) -> Result<usize, EngineError> {
        self.schedule_run(now, station, duration_secs, RunOrigin::Manual)
    }

    /// Run an ad-hoc list of encoded per-station water times.  Anything
    /// already in flight is cancelled first.
    pub fn run_once(&mut self, now: Timestamp, durations: &[u16]) {
        self.reset_all(now);
        for (station, &raw) in durations.iter().enumerate().take(MAX_STATIONS) {
            let station = station as u8;
            if station >= self.options.num_stations || self.is_master_station(station) {
                continue;
            }
            let duration = WaterTime::decode(raw).resolve(&self.sun) as i64;
            if duration == 0 {
                continue;
            }
            if let Err(err) = self.schedule_run(now, station, duration, RunOrigin::RunOnce) {
                warn!(station, %err, "could not queue run-once station");
            }
        }
    }

    /// Manually start a stored program, cancelling anything in flight.
    pub fn start_program(
        &mut self,
        now: Timestamp,
        index: usize,
        scale_by_water_level: bool,
    ) -> Result<(), EngineError> {
        let program = self
            .store
            .get(index)
            .ok_or(EngineError::ProgramOutOfBounds(index))?
            .clone();
        self.reset_all(now);
        info!(index, name = %program.name, "manual program start");
        for station in 0..self.options.num_stations {
            if self.is_master_station(station) || self.attrs[station as usize].disabled {
                continue;
            }
            let raw = program.durations[station as usize];
            let mut duration = WaterTime::decode(raw).resolve(&self.sun) as i64;
            if duration == 0 {
                continue;
            }
            if scale_by_water_level {
                duration = self.scale_by_water_level(duration);
                if duration == 0 {
                    continue;
                }
            }
            if let Err(err) =
                self.schedule_run(now, station, duration, RunOrigin::Program(index as u8))
            {
                warn!(station, %err, "could not queue program station");
            }
        }
        Ok(())
    }

    /// Stop one station.  A running entry is truncated so its partial run
    /// is still reported; a pending entry just leaves the queue.
    pub fn cancel_run(&mut self, now: Timestamp, station: u8) {
        let Some(slot) = self.queue.slot_for_station(station) else {
            return;
        };
        let running = self.queue.get(slot).is_some_and(|e| e.is_running(now));
        if running {
            let entry = &mut self.queue.entries_mut()[slot];
            entry.duration = now - entry.start;
            entry.dequeue_at = now;
        } else {
            self.queue.dequeue(slot);
        }
    }

    /// Cancel everything: running entries are reported as completed with
    /// their elapsed duration, pending entries vanish.
    pub fn reset_all(&mut self, now: Timestamp) {
        for entry in self.queue.entries() {
            if entry.start <= now && entry.duration > 0 {
                self.completed.push(CompletedRun {
                    station: entry.station,
                    origin: entry.origin,
                    start: entry.start,
                    duration: (now - entry.start).min(entry.duration),
                });
            }
        }
        self.queue.clear();
        self.seq.clear();
    }

    // -- pause --------------------------------------------------------------

    pub fn pause(&mut self, now: Timestamp, delay_secs: i64) {
        if self.pause.is_active() || delay_secs <= 0 {
            return;
        }
        self.pause.begin(delay_secs);
        shift_for_pause(&mut self.queue, &mut self.seq, &self.attrs, now, delay_secs);
    }

    pub fn resume(&mut self, now: Timestamp) {
        if !self.pause.is_active() {
            return;
        }
        let remaining = self.pause.end();
        shift_for_resume(&mut self.queue, &mut self.seq, &self.attrs, now, remaining);
    }

    /// Start a pause, or end the current one.
    pub fn toggle_pause(&mut self, now: Timestamp, delay_secs: i64) {
        if self.pause.is_active() {
            self.resume(now);
        } else {
            self.pause(now, delay_secs);
        }
    }

    // -- dynamic events -----------------------------------------------------

    /// Cancel queued program runs invalidated by the rain signal.  Manual
    /// and run-once entries are exempt, as are ignore-rain stations.
    fn process_dynamic_events(&mut self, now: Timestamp) {
        if !self.rain_active {
            return;
        }
        let mut slot = 0;
        while slot < self.queue.len() {
            let Some(entry) = self.queue.get(slot).copied() else {
                break;
            };
            let exempt = !entry.origin.cancels_on_rain()
                || self.attrs[entry.station as usize].ignore_rain;
            if exempt {
                slot += 1;
                continue;
            }
            if entry.is_running(now) {
                let e = &mut self.queue.entries_mut()[slot];
                e.duration = now - e.start;
                e.dequeue_at = now;
                slot += 1;
            } else {
                // Swap-removal refilled this slot; do not advance.
                info!(station = entry.station, "rain cancelled pending run");
                self.queue.dequeue(slot);
            }
        }
    }

    // -- resolve and reap ---------------------------------------------------

    /// Which stations and masters must be on at `now`.
    fn resolve(&self, now: Timestamp) -> ActivationSet {
        let mut active = ActivationSet::default();
        if !self.enabled || self.pause.is_active() {
            return active;
        }
        for entry in self.queue.entries() {
            if entry.is_running(now) && !self.attrs[entry.station as usize].disabled {
                active.stations.set(entry.station);
            }
        }
        for (m, binding) in self.options.masters.iter().enumerate() {
            let Some(master_station) = binding.station else {
                continue;
            };
            let on = self.queue.entries().iter().any(|entry| {
                let attrs = &self.attrs[entry.station as usize];
                if !attrs.activates_master[m] || attrs.disabled {
                    return false;
                }
                let mstart = entry.start - binding.on_adjust_secs as i64;
                let mstop = entry.stop() + binding.off_adjust_secs as i64;
                mstart < mstop && mstart <= now && now < mstop
            });
            if on {
                active.masters[m] = true;
                active.stations.set(master_station);
            }
        }
        active
    }

    /// Drop expired entries and record their runs.
    fn reap(&mut self, now: Timestamp) {
        let mut slot = 0;
        while slot < self.queue.len() {
            let Some(entry) = self.queue.get(slot).copied() else {
                break;
            };
            if entry.dequeue_at > now {
                slot += 1;
                continue;
            }
            if entry.start <= now && entry.duration > 0 {
                self.completed.push(CompletedRun {
                    station: entry.station,
                    origin: entry.origin,
                    start: entry.start,
                    duration: entry.duration,
                });
            }
            self.queue.dequeue(slot);
        }
        if self.queue.is_empty() {
            self.seq.clear();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
