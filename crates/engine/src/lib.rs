//! Scheduling core for an irrigation controller: watering programs with
//! calendar matching, a bounded runtime queue of per-station runs,
//! pause/resume, and the per-tick activation resolver that decides which
//! station and master relays must be energized.
//!
//! The engine is single-threaded and tick-driven: the host calls
//! [`Scheduler::tick`] at least once per second and forwards the returned
//! [`ActivationSet`] to whatever drives the physical relays.  No operation
//! here blocks; everything is O(number of stations) or better.

pub mod attrib;
pub mod codec;
pub mod error;
pub mod pause;
pub mod program;
pub mod queue;
pub mod scheduler;
pub mod store;

/// Maximum number of stations (6 boards of 8 relays each).
pub const MAX_STATIONS: usize = 48;

/// Maximum number of watering programs the store holds.
pub const MAX_PROGRAMS: usize = 40;

/// Start-time slots per program in fixed-times mode.
pub const MAX_START_TIMES: usize = 4;

/// Number of sequential groups stations can be serialized into.
pub const NUM_SEQ_GROUPS: usize = 4;

/// Group id that opts a station out of sequential serialization.
pub const PARALLEL_GROUP_ID: u8 = 255;

/// Number of master relays.
pub const NUM_MASTERS: usize = 2;

/// Maximum persisted length of a program name, in bytes.
pub const PROGRAM_NAME_SIZE: usize = 32;

/// Seconds-since-epoch, already adjusted to the controller's timezone.
/// The engine never consults a clock itself; the host passes time in.
pub type Timestamp = i64;

pub use attrib::{MasterBinding, StationAttributes};
pub use codec::{StartTime, SunTimes, WaterTime};
pub use error::EngineError;
pub use pause::PauseState;
pub use program::{
    DateRange, MonthDay, OddEven, ProgramDefinition, ProgramMatch, ProgramRecord, Schedule,
    StartSpec,
};
pub use queue::{RunOrigin, RuntimeQueue, RuntimeQueueEntry, SequentialGroupState};
pub use scheduler::{ActivationSet, CompletedRun, ControllerOptions, Scheduler, StationBits};
pub use store::ProgramStore;
