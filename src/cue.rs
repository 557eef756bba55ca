// Feedback cue hand-off to the acoustic subsystem
//
// One atomic slot holds the latest request. The control task overwrites it,
// the hand-off task swaps it back to empty. At most one request is pending and
// a newer one replaces an unplayed older one.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCue {
    Startup = 1,
    /// Primary switch moved down -> mid
    SwitchUp = 2,
    /// Primary switch moved mid -> down
    SwitchDown = 3,
    LeftSwitchUp = 4,
    LeftSwitchDown = 5,
}

impl FeedbackCue {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Startup),
            2 => Some(Self::SwitchUp),
            3 => Some(Self::SwitchDown),
            4 => Some(Self::LeftSwitchUp),
            5 => Some(Self::LeftSwitchDown),
            _ => None,
        }
    }
}

const EMPTY: u8 = 0;

#[derive(Debug, Default)]
pub struct CueSlot {
    pending: AtomicU8,
}

impl CueSlot {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU8::new(EMPTY),
        }
    }

    /// Fire-and-forget: replaces any request not yet consumed
    pub fn request(&self, cue: FeedbackCue) {
        self.pending.store(cue as u8, Ordering::Release);
    }

    /// Consume the pending request, leaving the slot empty
    pub fn take(&self) -> Option<FeedbackCue> {
        FeedbackCue::from_raw(self.pending.swap(EMPTY, Ordering::AcqRel))
    }
}
