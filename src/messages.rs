// Message types exchanged with the outside world
//
// Inbound: remote-control samples and the power budget (JSON over zenoh).
// Outbound: the per-tick chassis snapshot and runtime health.

use serde::{Deserialize, Serialize};

use crate::chassis::kinematics::MotionCommand;

/// Position of a 3-way remote switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchPosition {
    Up,
    #[default]
    Mid,
    Down,
}

impl SwitchPosition {
    /// Height of the lever, used to tell upward from downward edges
    pub fn level(self) -> u8 {
        match self {
            SwitchPosition::Down => 0,
            SwitchPosition::Mid => 1,
            SwitchPosition::Up => 2,
        }
    }
}

/// Normalized remote-control snapshot from the receiver/teleop
// Sticks in [-1, 1]: l = left stick, r = right stick, h = horizontal, v = vertical
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RemoteSample {
    pub ch_lh: f32,
    pub ch_lv: f32,
    pub ch_rh: f32,
    pub ch_rv: f32,
    /// Secondary switch: energy-buffer sub-mode
    pub sw_l: SwitchPosition,
    /// Primary switch: drive mode
    pub sw_r: SwitchPosition,
}

impl RemoteSample {
    /// Clamp sticks into range; non-finite values read as centered
    pub fn normalized(mut self) -> Self {
        for ch in [
            &mut self.ch_lh,
            &mut self.ch_lv,
            &mut self.ch_rh,
            &mut self.ch_rv,
        ] {
            *ch = if ch.is_finite() { ch.clamp(-1.0, 1.0) } else { 0.0 };
        }
        self
    }
}

/// Power budget handed down by the referee system each tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PowerBudget {
    pub limit_watts: f32,
    pub buffered_energy_joules: f32,
    /// Referee's chassis power-output switch
    #[serde(default = "default_true")]
    pub chassis_output: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PowerBudget {
    // No referee data yet: limit 0 means "use the configured default"
    fn default() -> Self {
        Self {
            limit_watts: 0.0,
            buffered_energy_joules: 0.0,
            chassis_output: true,
        }
    }
}

/// Discrete operating state derived by the arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveState {
    #[default]
    Offline,
    Disabled,
    DriveActive,
}

/// Energy-buffer operating sub-mode, orthogonal to the drive state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    #[default]
    Auto = 0,
    DischargeOnly = 1,
    Disabled = 2,
}

/// Recoverable fault conditions observed during one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChassisFault {
    pub input_offline: bool,
    /// Per wheel, [front-left, front-right, rear-left, rear-right]
    pub feedback_stale: [bool; 4],
    pub power_infeasible: bool,
    pub numeric_degenerate: bool,
    pub mechanical_overlimit: bool,
}

impl ChassisFault {
    pub fn any_wheel_stale(&self) -> bool {
        self.feedback_stale.iter().any(|&s| s)
    }
}

/// Per-tick aggregate. Written only by the control task; everyone else reads copies.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChassisSnapshot {
    pub tick: u64,
    pub timestamp_ms: u64,
    pub state: DriveState,
    pub buffer_mode: BufferMode,
    pub motion: MotionCommand,
    /// Wheel targets (rad/s)
    pub targets: [f32; 4],
    /// Measured wheel speeds (rad/s), zero for stale wheels
    pub measured: [f32; 4],
    /// Regulator output before power scaling (N·m)
    pub torque_raw: [f32; 4],
    /// Torque actually commanded (N·m)
    pub torque_out: [f32; 4],
    pub limit_watts: f32,
    pub buffered_energy_joules: f32,
    pub predicted_power: f32,
    pub predicted_power_scaled: f32,
    /// Energy-buffer output minus input power, when the buffer reports
    pub actual_power: Option<f32>,
    pub scale_factor: f32,
    pub limit_active: bool,
    pub faults: ChassisFault,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    RemoteOffline,
    MotorFault,
}

impl From<&ChassisSnapshot> for RuntimeHealth {
    fn from(snapshot: &ChassisSnapshot) -> Self {
        if snapshot.faults.input_offline {
            RuntimeHealth::RemoteOffline
        } else if snapshot.faults.any_wheel_stale() {
            RuntimeHealth::MotorFault
        } else {
            RuntimeHealth::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_sample_json() {
        let sample: RemoteSample = serde_json::from_str(
            r#"{"ch_lh":0.0,"ch_lv":0.5,"ch_rh":0.0,"ch_rv":0.0,"sw_l":"up","sw_r":"mid"}"#,
        )
        .unwrap();
        assert_eq!(sample.ch_lv, 0.5);
        assert_eq!(sample.sw_l, SwitchPosition::Up);
        assert_eq!(sample.sw_r, SwitchPosition::Mid);
    }

    #[test]
    fn test_normalized_clamps_sticks() {
        let sample = RemoteSample {
            ch_lh: 3.0,
            ch_lv: -2.0,
            ch_rh: f32::NAN,
            ch_rv: 0.25,
            ..Default::default()
        }
        .normalized();
        assert_eq!(sample.ch_lh, 1.0);
        assert_eq!(sample.ch_lv, -1.0);
        assert_eq!(sample.ch_rh, 0.0);
        assert_eq!(sample.ch_rv, 0.25);
    }

    #[test]
    fn test_power_budget_output_defaults_on() {
        let budget: PowerBudget =
            serde_json::from_str(r#"{"limit_watts":60.0,"buffered_energy_joules":55.0}"#).unwrap();
        assert!(budget.chassis_output);
    }

    #[test]
    fn test_health_from_snapshot() {
        let mut snapshot = ChassisSnapshot::default();
        assert_eq!(RuntimeHealth::from(&snapshot), RuntimeHealth::Ok);
        snapshot.faults.feedback_stale[2] = true;
        assert_eq!(RuntimeHealth::from(&snapshot), RuntimeHealth::MotorFault);
        snapshot.faults.input_offline = true;
        assert_eq!(RuntimeHealth::from(&snapshot), RuntimeHealth::RemoteOffline);
    }
}
