use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use sprinkler_engine::{RuntimeQueueEntry, Scheduler, StationBits, Timestamp};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<ControllerState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct ControllerState {
    pub scheduler: Scheduler,
    pub started_at: Instant,
    /// Seconds added to UTC so schedules run in wall-clock time.
    pub timezone_offset_secs: i64,
    pub station_names: Vec<String>,
    pub active: StationBits,
    pub events: VecDeque<ControllerEvent>,
}

#[derive(Clone, Serialize)]
pub struct ControllerEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Run,
    Rain,
    Pause,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub enabled: bool,
    pub paused: bool,
    pub pause_remaining_secs: i64,
    pub rain_active: bool,
    pub water_level_percent: u8,
    pub num_stations: u8,
    pub station_names: Vec<String>,
    pub active_stations: Vec<u8>,
    pub queue: Vec<RuntimeQueueEntry>,
    pub events: Vec<ControllerEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl ControllerState {
    pub fn new(scheduler: Scheduler, timezone_offset_secs: i64, station_names: Vec<String>) -> Self {
        Self {
            scheduler,
            started_at: Instant::now(),
            timezone_offset_secs,
            station_names,
            active: StationBits::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Current timestamp in the controller's wall-clock frame.
    pub fn now(&self) -> Timestamp {
        OffsetDateTime::now_utc().unix_timestamp() + self.timezone_offset_secs
    }

    pub fn record_run(&mut self, detail: String) {
        self.push_event(EventKind::Run, detail);
    }

    pub fn record_rain(&mut self, detail: String) {
        self.push_event(EventKind::Rain, detail);
    }

    pub fn record_pause(&mut self, detail: String) {
        self.push_event(EventKind::Pause, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        let active_stations = (0..self.scheduler.options().num_stations)
            .filter(|&s| self.active.is_set(s))
            .collect();
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            enabled: self.scheduler.is_enabled(),
            paused: self.scheduler.is_paused(),
            pause_remaining_secs: self.scheduler.pause_remaining(),
            rain_active: self.scheduler.is_rain_active(),
            water_level_percent: self.scheduler.options().water_level_percent,
            num_stations: self.scheduler.options().num_stations,
            station_names: self.station_names.clone(),
            active_stations,
            queue: self.scheduler.queue().entries().to_vec(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(ControllerEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
