// Chassis control pipeline for the mecanum base
//
// Provides:
// - Mecanum inverse/forward kinematics (body velocity <-> wheel speeds)
// - Per-wheel PID velocity regulators
// - Power governor (quadratic torque scaling against a power budget)
// - Remote input arbitration (drive state, motion, buffer mode)
// - The per-tick controller tying them together

pub mod arbiter;
pub mod controller;
pub mod governor;
pub mod kinematics;
pub mod regulator;

pub use arbiter::{ArbiterOutput, ModeArbiter, RemoteInput};
pub use controller::ChassisController;
pub use governor::{GovernorOutput, PowerGovernor, ScaleOutcome};
pub use kinematics::{Mecanum, MotionCommand, WheelTargets};
pub use regulator::{RegulatorBank, VelocityRegulator};
