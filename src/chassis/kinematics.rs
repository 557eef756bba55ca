// Mecanum inverse kinematics for the 4-wheel base
// Converts body-frame velocities (vx, vy, wz) to individual wheel angular velocities.
//
// Wheel order everywhere in the crate is [front-left, front-right, rear-left, rear-right];
// the link layer maps these positions to motor ids.

use serde::{Deserialize, Serialize};

use crate::config::GeometryConfig;

pub const FRONT_LEFT: usize = 0;
pub const FRONT_RIGHT: usize = 1;
pub const REAR_LEFT: usize = 2;
pub const REAR_RIGHT: usize = 3;

pub const WHEEL_NAMES: [&str; 4] = ["front-left", "front-right", "rear-left", "rear-right"];

/// Body-frame motion setpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    /// Forward velocity in m/s
    pub vx: f32,
    /// Lateral velocity in m/s
    pub vy: f32,
    /// Yaw rate in rad/s (positive = counter-clockwise)
    pub wz: f32,
}

impl MotionCommand {
    pub fn new(vx: f32, vy: f32, wz: f32) -> Self {
        Self { vx, vy, wz }
    }
}

/// Wheel angular velocity targets in rad/s
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelTargets {
    pub front_left: f32,
    pub front_right: f32,
    pub rear_left: f32,
    pub rear_right: f32,
}

impl WheelTargets {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns targets as array [front_left, front_right, rear_left, rear_right]
    pub fn as_array(&self) -> [f32; 4] {
        [
            self.front_left,
            self.front_right,
            self.rear_left,
            self.rear_right,
        ]
    }

    pub fn from_array(w: [f32; 4]) -> Self {
        Self {
            front_left: w[FRONT_LEFT],
            front_right: w[FRONT_RIGHT],
            rear_left: w[REAR_LEFT],
            rear_right: w[REAR_RIGHT],
        }
    }
}

/// Mecanum geometry: wheel radius r and the half separations a (front-rear), b (left-right)
#[derive(Debug, Clone, Copy)]
pub struct Mecanum {
    wheel_radius: f32,
    lever: f32,
}

impl Mecanum {
    pub fn new(wheel_radius: f32, half_length: f32, half_width: f32) -> Self {
        Self {
            wheel_radius,
            lever: half_length + half_width,
        }
    }

    /// Convert body-frame velocities to wheel angular velocities
    ///
    /// # Arguments
    /// * `cmd` - body velocity; vx forward, vy lateral (m/s), wz yaw rate (rad/s)
    ///
    /// # Returns
    /// Angular velocity target for each wheel in rad/s
    pub fn inverse(&self, cmd: MotionCommand) -> WheelTargets {
        let yaw = self.lever * cmd.wz;
        let r = self.wheel_radius;

        WheelTargets {
            front_left: (cmd.vx - cmd.vy - yaw) / r,
            front_right: (cmd.vx + cmd.vy + yaw) / r,
            rear_left: (cmd.vx + cmd.vy - yaw) / r,
            rear_right: (cmd.vx - cmd.vy + yaw) / r,
        }
    }

    /// Recover body velocity from wheel angular velocities
    ///
    /// Least-squares solution of the inverse mapping; exact when the wheels do not slip.
    pub fn forward(&self, wheels: WheelTargets) -> MotionCommand {
        let [fl, fr, rl, rr] = wheels.as_array();
        let q = self.wheel_radius / 4.0;

        MotionCommand {
            vx: q * (fl + fr + rl + rr),
            vy: q * (-fl + fr + rl - rr),
            wz: q * (-fl + fr - rl + rr) / self.lever,
        }
    }
}

impl From<&GeometryConfig> for Mecanum {
    fn from(g: &GeometryConfig) -> Self {
        Self::new(g.wheel_radius, g.half_length, g.half_width)
    }
}
