// One control tick for the mecanum chassis
//
// arbiter -> kinematics -> regulators -> power governor -> motor link
//
// The controller performs no waiting of its own: motor state is read as a
// snapshot from the shared cells, frames go straight to the sink, and a send
// that fails is simply superseded by the next tick's command.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::arbiter::{ModeArbiter, RemoteInput};
use super::governor::{PowerGovernor, ScaleOutcome};
use super::kinematics::{Mecanum, WHEEL_NAMES};
use super::regulator::RegulatorBank;
use crate::config::ChassisConfig;
use crate::cue::CueSlot;
use crate::messages::{BufferMode, ChassisFault, ChassisSnapshot, DriveState, PowerBudget};
use crate::motor::driver::{FrameSink, MotorLink};
use crate::motor::frame::{BufferCommand, Result};

pub struct ChassisController<S: FrameSink> {
    kinematics: Mecanum,
    regulators: RegulatorBank,
    governor: PowerGovernor,
    arbiter: ModeArbiter,
    link: MotorLink<S>,
    cues: Arc<CueSlot>,
    snapshot: ChassisSnapshot,
    link_ok: bool,
}

impl<S: FrameSink> ChassisController<S> {
    pub fn new(config: &ChassisConfig, link: MotorLink<S>, cues: Arc<CueSlot>) -> Self {
        Self {
            kinematics: Mecanum::from(&config.geometry),
            regulators: RegulatorBank::new(config.regulator),
            governor: PowerGovernor::new(config.governor, config.runtime.period_s()),
            arbiter: ModeArbiter::new(config.arbiter),
            link,
            cues,
            snapshot: ChassisSnapshot::default(),
            link_ok: true,
        }
    }

    /// Latest per-tick aggregate
    pub fn snapshot(&self) -> &ChassisSnapshot {
        &self.snapshot
    }

    pub fn link(&self) -> &MotorLink<S> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut MotorLink<S> {
        &mut self.link
    }

    /// Run one control period
    ///
    /// # Arguments
    /// * `now_ms` - tick timestamp on the runtime clock
    /// * `remote` - latest remote sample, if any has ever arrived
    /// * `budget` - power budget from the referee for this tick
    pub fn tick(
        &mut self,
        now_ms: u64,
        remote: Option<&RemoteInput>,
        budget: &PowerBudget,
    ) -> &ChassisSnapshot {
        let prev = self.snapshot;

        let arb = self.arbiter.update(now_ms, remote);
        if let Some(cue) = arb.cue {
            self.cues.request(cue);
        }

        // Stale feedback: measured speed is untrustworthy and the wheel gets no torque
        let motors = self.link.read_motors(now_ms);
        let stale = motors.map(|m| m.stale);
        let measured = motors.map(|m| if m.stale { 0.0 } else { m.measured_speed });
        for (wheel, name) in WHEEL_NAMES.iter().enumerate() {
            if stale[wheel] != prev.faults.feedback_stale[wheel] {
                if stale[wheel] {
                    warn!("Motor feedback stale on {} wheel", name);
                } else {
                    info!("Motor feedback restored on {} wheel", name);
                }
            }
        }

        let (targets, raw) = if arb.state == DriveState::DriveActive {
            let targets = self.kinematics.inverse(arb.motion).as_array();
            let raw = std::array::from_fn(|wheel| {
                let regulator = self.regulators.wheel_mut(wheel);
                if stale[wheel] {
                    regulator.disable()
                } else {
                    regulator.update(targets[wheel], measured[wheel])
                }
            });
            (targets, raw)
        } else {
            self.governor.reset();
            ([0.0; 4], self.regulators.disable_all())
        };

        let gov = self.governor.apply(raw, measured, budget.limit_watts);
        if gov.limit_active != prev.limit_active {
            debug!(
                "Power limit {} (scale {:.3}, predicted {:.1} W, limit {:.1} W)",
                if gov.limit_active { "engaged" } else { "released" },
                gov.scale_factor,
                gov.predicted_power,
                gov.limit_watts
            );
        }

        let send = self.link.send_torques(&gov.torques);
        self.note_send(send);

        let buffer_cmd = BufferCommand {
            limit_watts: gov.limit_watts,
            buffered_energy_joules: budget.buffered_energy_joules,
            output_enabled: budget.chassis_output
                && arb.state != DriveState::Offline
                && arb.buffer_mode != BufferMode::Disabled,
            mode: arb.buffer_mode,
        };
        let send = self.link.send_buffer_command(&buffer_cmd);
        self.note_send(send);

        self.snapshot = ChassisSnapshot {
            tick: prev.tick + 1,
            timestamp_ms: now_ms,
            state: arb.state,
            buffer_mode: arb.buffer_mode,
            motion: arb.motion,
            targets,
            measured,
            torque_raw: raw,
            torque_out: gov.torques,
            limit_watts: gov.limit_watts,
            buffered_energy_joules: budget.buffered_energy_joules,
            predicted_power: gov.predicted_power,
            predicted_power_scaled: gov.predicted_power_scaled,
            actual_power: self.link.read_buffer(now_ms).map(|b| b.chassis_power_w()),
            scale_factor: gov.scale_factor,
            limit_active: gov.limit_active,
            faults: ChassisFault {
                input_offline: arb.state == DriveState::Offline,
                feedback_stale: stale,
                power_infeasible: gov.outcome == ScaleOutcome::Infeasible,
                numeric_degenerate: gov.outcome == ScaleOutcome::Degenerate,
                mechanical_overlimit: gov.mechanical_overlimit,
            },
        };
        &self.snapshot
    }

    /// Log bus failures once per outage, not once per tick
    fn note_send(&mut self, result: Result<()>) {
        match result {
            Ok(()) if !self.link_ok => {
                info!("Fieldbus transmit recovered");
                self.link_ok = true;
            }
            Err(e) if self.link_ok => {
                warn!("Fieldbus transmit failed: {}", e);
                self.link_ok = false;
            }
            _ => {}
        }
    }

    /// Command zero torque, e.g. on shutdown
    pub fn stop(&mut self) -> Result<()> {
        self.regulators.disable_all();
        self.link.stop()
    }
}
