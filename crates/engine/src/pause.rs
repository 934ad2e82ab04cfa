//! Pause state and the queue time-shifting that goes with it.
//!
//! Pausing pushes every pending start (and each running entry's restart)
//! forward by the pause delay; resuming early pulls everything back by the
//! unexpired remainder, plus one second of slack so nothing lands in the
//! past.

use tracing::info;

use crate::attrib::StationAttributes;
use crate::queue::{RuntimeQueue, SequentialGroupState};
use crate::{Timestamp, NUM_SEQ_GROUPS};

/// Countdown driven by the scheduler tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct PauseState {
    active: bool,
    remaining: i64,
}

impl PauseState {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Seconds until the pause expires on its own.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn begin(&mut self, delay_secs: i64) {
        self.active = true;
        self.remaining = delay_secs.max(0);
        info!(delay_secs = self.remaining, "pause started");
    }

    /// Advance the countdown.  Returns true on the tick the timer hits
    /// zero, at which point the caller resumes automatically.
    pub fn countdown(&mut self, elapsed_secs: i64) -> bool {
        if !self.active || self.remaining == 0 {
            return false;
        }
        self.remaining = (self.remaining - elapsed_secs.max(0)).max(0);
        self.remaining == 0
    }

    /// Clear the pause and return the unexpired remainder.
    pub fn end(&mut self) -> i64 {
        let remaining = self.remaining;
        self.active = false;
        self.remaining = 0;
        info!(remaining_secs = remaining, "pause ended");
        remaining
    }
}

/// Push the whole queue forward by `delay_secs`.  A running entry keeps
/// only its unfinished duration and restarts once the pause expires.
pub fn shift_for_pause(
    queue: &mut RuntimeQueue,
    seq: &mut SequentialGroupState,
    attrs: &[StationAttributes],
    now: Timestamp,
    delay_secs: i64,
) {
    for entry in queue.entries_mut() {
        // A finished entry only waits out its master-off window; it is
        // reaped on the normal clock.
        if entry.stop() <= now {
            continue;
        }
        if entry.is_running(now) {
            entry.duration -= now - entry.start;
            entry.start = now + delay_secs;
        } else if entry.start > now {
            entry.start += delay_secs;
        }
        entry.dequeue_at += delay_secs;
    }
    rebuild_seq_stops(queue, seq, attrs);
}

/// Pull the queue back by the unexpired remainder of an ended pause,
/// leaving one second of slack before the earliest restart.  Entries
/// whose stop is already behind `now` were never shifted forward and
/// stay where they are.
pub fn shift_for_resume(
    queue: &mut RuntimeQueue,
    seq: &mut SequentialGroupState,
    attrs: &[StationAttributes],
    now: Timestamp,
    remaining_secs: i64,
) {
    let shift = 1 - remaining_secs;
    for entry in queue.entries_mut() {
        if entry.stop() <= now {
            continue;
        }
        entry.start += shift;
        entry.dequeue_at += shift;
    }
    rebuild_seq_stops(queue, seq, attrs);
}

fn rebuild_seq_stops(
    queue: &RuntimeQueue,
    seq: &mut SequentialGroupState,
    attrs: &[StationAttributes],
) {
    seq.clear();
    for entry in queue.entries() {
        let group = attrs
            .get(entry.station as usize)
            .map(|a| a.sequential_group)
            .unwrap_or_default();
        if (group as usize) < NUM_SEQ_GROUPS {
            seq.note_stop(group, entry.stop());
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
