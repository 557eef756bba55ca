// Motor and energy-buffer state shared between the receive path and the control loop
//
// No locks: every field is an individual atomic, and each field has exactly one
// writer. The receive path owns the feedback fields through `FeedbackPort`, the
// control loop owns `commanded_torque` through `ControlPort`. Neither port is
// Clone, so the type system keeps a second writer out.
//
// Readers may observe a sample that is one update newer or older than the
// timestamp they loaded; the staleness window bounds how wrong that can be.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::frame::{BufferFeedback, MotorFeedback};

/// Timestamp value meaning "never updated"
const NEVER: u64 = u64::MAX;

#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed)
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[derive(Debug)]
struct MotorCell {
    speed: AtomicF32,
    angle: AtomicF32,
    current: AtomicF32,
    temperature: AtomicU32,
    last_update_ms: AtomicU64,
    commanded_torque: AtomicF32,
}

impl Default for MotorCell {
    fn default() -> Self {
        Self {
            speed: AtomicF32::default(),
            angle: AtomicF32::default(),
            current: AtomicF32::default(),
            temperature: AtomicU32::new(0),
            last_update_ms: AtomicU64::new(NEVER),
            commanded_torque: AtomicF32::default(),
        }
    }
}

#[derive(Debug)]
struct BufferCell {
    power_in: AtomicF32,
    power_out: AtomicF32,
    stored_energy: AtomicF32,
    last_update_ms: AtomicU64,
}

impl Default for BufferCell {
    fn default() -> Self {
        Self {
            power_in: AtomicF32::default(),
            power_out: AtomicF32::default(),
            stored_energy: AtomicF32::default(),
            last_update_ms: AtomicU64::new(NEVER),
        }
    }
}

#[derive(Debug, Default)]
struct SharedState {
    motors: [MotorCell; 4],
    buffer: BufferCell,
}

/// Read-out of one wheel's motor state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorState {
    /// rad/s at the output shaft
    pub measured_speed: f32,
    pub angle_rad: f32,
    pub current_a: f32,
    pub temperature_c: u8,
    /// Last torque handed to the link (N·m)
    pub commanded_torque: f32,
    /// None until the first feedback frame arrives
    pub last_update_ms: Option<u64>,
    /// Feedback is older than the liveness window (or never arrived)
    pub stale: bool,
}

fn is_stale(last: u64, now_ms: u64, window_ms: u64) -> bool {
    last == NEVER || now_ms.saturating_sub(last) > window_ms
}

/// Create the shared state and its two single-writer handles
pub fn shared_state(stale_window_ms: u64) -> (FeedbackPort, ControlPort) {
    let shared = Arc::new(SharedState::default());
    (
        FeedbackPort {
            shared: shared.clone(),
        },
        ControlPort {
            shared,
            stale_window_ms,
        },
    )
}

/// Writer of the feedback fields, owned by the receive path
#[derive(Debug)]
pub struct FeedbackPort {
    shared: Arc<SharedState>,
}

impl FeedbackPort {
    pub fn record_motor(&self, wheel: usize, fb: &MotorFeedback, stamp_ms: u64) {
        let cell = &self.shared.motors[wheel];
        cell.speed.store(fb.speed_rad_s);
        cell.angle.store(fb.angle_rad);
        cell.current.store(fb.current_a);
        cell.temperature.store(fb.temperature_c as u32, Ordering::Relaxed);
        // Publishes the values stored above
        cell.last_update_ms.store(stamp_ms, Ordering::Release);
    }

    pub fn record_buffer(&self, fb: &BufferFeedback, stamp_ms: u64) {
        let cell = &self.shared.buffer;
        cell.power_in.store(fb.power_in_w);
        cell.power_out.store(fb.power_out_w);
        cell.stored_energy.store(fb.stored_energy_j);
        cell.last_update_ms.store(stamp_ms, Ordering::Release);
    }
}

/// Reader of all state and writer of the commanded torque, owned by the control loop
#[derive(Debug)]
pub struct ControlPort {
    shared: Arc<SharedState>,
    stale_window_ms: u64,
}

impl ControlPort {
    /// Snapshot one wheel, with staleness evaluated against `now_ms`
    pub fn read(&self, wheel: usize, now_ms: u64) -> MotorState {
        let cell = &self.shared.motors[wheel];
        let last = cell.last_update_ms.load(Ordering::Acquire);
        MotorState {
            measured_speed: cell.speed.load(),
            angle_rad: cell.angle.load(),
            current_a: cell.current.load(),
            temperature_c: cell.temperature.load(Ordering::Relaxed).min(u8::MAX as u32) as u8,
            commanded_torque: cell.commanded_torque.load(),
            last_update_ms: (last != NEVER).then_some(last),
            stale: is_stale(last, now_ms, self.stale_window_ms),
        }
    }

    pub fn read_all(&self, now_ms: u64) -> [MotorState; 4] {
        std::array::from_fn(|wheel| self.read(wheel, now_ms))
    }

    /// Latest energy-buffer feedback, if fresh
    pub fn read_buffer(&self, now_ms: u64) -> Option<BufferFeedback> {
        let cell = &self.shared.buffer;
        let last = cell.last_update_ms.load(Ordering::Acquire);
        if is_stale(last, now_ms, self.stale_window_ms) {
            return None;
        }
        Some(BufferFeedback {
            power_in_w: cell.power_in.load(),
            power_out_w: cell.power_out.load(),
            stored_energy_j: cell.stored_energy.load(),
        })
    }

    pub fn record_command(&mut self, wheel: usize, torque: f32) {
        self.shared.motors[wheel].commanded_torque.store(torque);
    }
}
