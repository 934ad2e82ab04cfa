//! Bounded runtime queue of scheduled station runs.
//!
//! At most one entry per station.  Removal is swap-with-last so the queue
//! stays dense; the per-station slot map is fixed up on every removal.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::{Timestamp, MAX_STATIONS, NUM_SEQ_GROUPS};

pub const QUEUE_CAPACITY: usize = MAX_STATIONS;

// ---------------------------------------------------------------------------
// Run origin
// ---------------------------------------------------------------------------

/// What put a run on the queue.  The legacy numeric sentinels (99 manual,
/// 254 run-once) only appear when converting to or from persisted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOrigin {
    /// A stored program, by positional index.
    Program(u8),
    /// The ad-hoc run-once program.
    RunOnce,
    /// Direct manual control of a single station.
    Manual,
}

impl RunOrigin {
    pub fn to_sentinel(self) -> u8 {
        match self {
            RunOrigin::Program(i) => i + 1,
            RunOrigin::Manual => 99,
            RunOrigin::RunOnce => 254,
        }
    }

    pub fn from_sentinel(v: u8) -> Option<Self> {
        match v {
            0 => None,
            99 => Some(RunOrigin::Manual),
            254 => Some(RunOrigin::RunOnce),
            i => Some(RunOrigin::Program(i - 1)),
        }
    }

    /// Manual and run-once runs are exempt from rain cancellation.
    pub fn cancels_on_rain(self) -> bool {
        matches!(self, RunOrigin::Program(_))
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeQueueEntry {
    pub station: u8,
    /// Scheduled start, unix seconds.
    pub start: Timestamp,
    /// Watering duration in seconds.
    pub duration: i64,
    /// When the entry leaves the queue; at or after `start + duration` to
    /// cover a trailing master-off window.
    pub dequeue_at: Timestamp,
    pub origin: RunOrigin,
}

impl RuntimeQueueEntry {
    pub fn stop(&self) -> Timestamp {
        self.start + self.duration
    }

    pub fn is_running(&self, now: Timestamp) -> bool {
        self.start <= now && now < self.stop()
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeQueue {
    entries: Vec<RuntimeQueueEntry>,
    /// station -> dense index of its entry.
    station_slot: [Option<u8>; MAX_STATIONS],
}

impl Default for RuntimeQueue {
    fn default() -> Self {
        RuntimeQueue {
            entries: Vec::with_capacity(QUEUE_CAPACITY),
            station_slot: [None; MAX_STATIONS],
        }
    }
}

impl RuntimeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RuntimeQueueEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [RuntimeQueueEntry] {
        &mut self.entries
    }

    pub fn get(&self, slot: usize) -> Option<&RuntimeQueueEntry> {
        self.entries.get(slot)
    }

    pub fn slot_for_station(&self, station: u8) -> Option<usize> {
        self.station_slot
            .get(station as usize)
            .copied()
            .flatten()
            .map(usize::from)
    }

    pub fn entry_for_station(&self, station: u8) -> Option<&RuntimeQueueEntry> {
        self.slot_for_station(station).and_then(|s| self.entries.get(s))
    }

    /// Add an entry, or overwrite the station's existing one in place.
    pub fn admit(&mut self, entry: RuntimeQueueEntry) -> Result<usize, EngineError> {
        if entry.station as usize >= MAX_STATIONS {
            return Err(EngineError::StationOutOfRange(entry.station));
        }
        if let Some(slot) = self.slot_for_station(entry.station) {
            self.entries[slot] = entry;
            return Ok(slot);
        }
        // With QUEUE_CAPACITY == MAX_STATIONS and at most one entry per
        // station, an in-range station always takes the overwrite path
        // before the queue can fill; this only fires if the capacity ever
        // shrinks below the station count.
        if self.entries.len() >= QUEUE_CAPACITY {
            return Err(EngineError::QueueFull);
        }
        let slot = self.entries.len();
        self.entries.push(entry);
        self.station_slot[entry.station as usize] = Some(slot as u8);
        Ok(slot)
    }

    /// Remove the entry at `slot` by swapping the last entry into its
    /// place.  Returns the station that moved into `slot`, if any.
    pub fn dequeue(&mut self, slot: usize) -> Option<u8> {
        if slot >= self.entries.len() {
            return None;
        }
        let removed = self.entries.swap_remove(slot);
        self.station_slot[removed.station as usize] = None;
        match self.entries.get(slot) {
            Some(moved) => {
                self.station_slot[moved.station as usize] = Some(slot as u8);
                Some(moved.station)
            }
            None => None,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.station_slot = [None; MAX_STATIONS];
    }
}

// ---------------------------------------------------------------------------
// Sequential group tracking
// ---------------------------------------------------------------------------

/// Last scheduled stop time per sequential group, used to serialize
/// admissions within a group.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialGroupState {
    last_stop: [Timestamp; NUM_SEQ_GROUPS],
}

impl SequentialGroupState {
    pub fn last_stop(&self, group: u8) -> Timestamp {
        self.last_stop
            .get(group as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Record a scheduled stop; only ever moves the group's marker forward.
    pub fn note_stop(&mut self, group: u8, stop: Timestamp) {
        if let Some(slot) = self.last_stop.get_mut(group as usize) {
            if stop > *slot {
                *slot = stop;
            }
        }
    }

    pub fn clear(&mut self) {
        self.last_stop = [0; NUM_SEQ_GROUPS];
    }
}

// ===========================================================================
// Tests
// ===========================================================================
