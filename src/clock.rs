// Monotonic millisecond clock shared by the control loop and the receive path
//
// Both sides stamp with the same origin so that feedback ages and remote
// liveness are directly comparable with the tick timestamp.

use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds since the clock was started
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::start()
    }
}
