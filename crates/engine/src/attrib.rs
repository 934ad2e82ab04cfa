//! Per-station attributes and master relay bindings.  Pure data consumed
//! by the activation resolver; the host materializes these from its
//! configuration.  The legacy per-board bitmap packing, where needed,
//! lives at the persistence boundary, not here.

use serde::{Deserialize, Serialize};

use crate::codec::{decode_signed_adjust, encode_signed_adjust};
use crate::{NUM_MASTERS, PARALLEL_GROUP_ID};

/// Attributes of one station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationAttributes {
    /// Disabled stations are never energized, even with a queued run.
    pub disabled: bool,
    /// Rain delay / rain sensor overrides do not cancel this station's
    /// program runs.
    pub ignore_rain: bool,
    /// Sequential group id; [`PARALLEL_GROUP_ID`] opts out of
    /// serialization.
    pub sequential_group: u8,
    /// Whether a run on this station engages each master relay.
    pub activates_master: [bool; NUM_MASTERS],
}

impl Default for StationAttributes {
    fn default() -> Self {
        StationAttributes {
            disabled: false,
            ignore_rain: false,
            sequential_group: PARALLEL_GROUP_ID,
            activates_master: [false; NUM_MASTERS],
        }
    }
}

/// One master relay binding: which station output acts as the master,
/// and how far its window is stretched around a bound station's run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterBinding {
    pub station: Option<u8>,
    /// Seconds the master turns on *before* a bound station's window.
    pub on_adjust_secs: i16,
    /// Seconds the master stays on *after* a bound station's window.
    pub off_adjust_secs: i16,
}

impl MasterBinding {
    /// Snap both adjustments to what the persisted byte form can hold:
    /// clamped to +/-600 at 5-second granularity.
    pub fn normalized(self) -> Self {
        MasterBinding {
            station: self.station,
            on_adjust_secs: decode_signed_adjust(encode_signed_adjust(self.on_adjust_secs)),
            off_adjust_secs: decode_signed_adjust(encode_signed_adjust(self.off_adjust_secs)),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
