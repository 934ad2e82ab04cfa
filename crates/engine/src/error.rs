use thiserror::Error;

/// Recoverable engine errors.  None of these abort the controller: a
/// rejected run or a corrupt persisted record is reported to the caller
/// and the scheduling loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The runtime queue already holds an entry for every free slot.
    #[error("runtime queue is full")]
    QueueFull,

    /// A program CRUD operation referenced an index past the store count.
    #[error("program index {0} out of bounds")]
    ProgramOutOfBounds(usize),

    /// The program store already holds `MAX_PROGRAMS` entries.
    #[error("program store is full")]
    ProgramStoreFull,

    /// A persisted date-range endpoint does not decode to a valid
    /// month/day pair.
    #[error("invalid date range encoding {0:#06x}")]
    InvalidDateRange(u16),

    /// A persisted start time has its reserved bit set or is otherwise
    /// malformed.
    #[error("invalid start time encoding {0:#06x}")]
    InvalidEncodedStart(i16),

    /// A run was submitted for a station id past the configured range.
    #[error("station {0} out of range")]
    StationOutOfRange(u8),
}
