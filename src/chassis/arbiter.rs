// Remote input arbitration
//
// Turns the latest remote-control sample into a drive state, a motion command
// and an energy-buffer sub-mode. Liveness is polled every tick: a remote that
// has gone quiet forces OFFLINE regardless of where its switches were left.

use tracing::{debug, info, warn};

use super::kinematics::MotionCommand;
use crate::config::ArbiterConfig;
use crate::cue::FeedbackCue;
use crate::messages::{BufferMode, DriveState, RemoteSample, SwitchPosition};

/// A remote sample with its arrival time on the runtime clock
#[derive(Debug, Clone, Copy)]
pub struct RemoteInput {
    pub sample: RemoteSample,
    pub received_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbiterOutput {
    pub state: DriveState,
    pub motion: MotionCommand,
    pub buffer_mode: BufferMode,
    /// Set on the tick a switch edge is accepted
    pub cue: Option<FeedbackCue>,
}

/// Switch position filter: a new position must repeat on consecutive samples
#[derive(Debug, Clone, Copy, Default)]
struct DebouncedSwitch {
    accepted: Option<SwitchPosition>,
    candidate: Option<SwitchPosition>,
    count: u32,
}

impl DebouncedSwitch {
    /// Feed one sample, returns (from, to) when a change is accepted
    fn feed(
        &mut self,
        pos: SwitchPosition,
        needed: u32,
    ) -> Option<(SwitchPosition, SwitchPosition)> {
        let Some(current) = self.accepted else {
            // First sample after (re)connecting is taken as-is, without an edge
            self.accepted = Some(pos);
            return None;
        };

        if pos == current {
            self.candidate = None;
            self.count = 0;
            return None;
        }

        if self.candidate == Some(pos) {
            self.count += 1;
        } else {
            self.candidate = Some(pos);
            self.count = 1;
        }

        if self.count >= needed {
            self.accepted = Some(pos);
            self.candidate = None;
            self.count = 0;
            Some((current, pos))
        } else {
            None
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

pub struct ModeArbiter {
    config: ArbiterConfig,
    primary: DebouncedSwitch,
    secondary: DebouncedSwitch,
    last_stamp: Option<u64>,
    state: DriveState,
    buffer_mode: BufferMode,
}

impl ModeArbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            primary: DebouncedSwitch::default(),
            secondary: DebouncedSwitch::default(),
            last_stamp: None,
            state: DriveState::Offline,
            buffer_mode: BufferMode::Auto,
        }
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    /// Derive this tick's operating state from the latest remote input
    pub fn update(&mut self, now_ms: u64, input: Option<&RemoteInput>) -> ArbiterOutput {
        let live = input.filter(|i| {
            now_ms.saturating_sub(i.received_at_ms) <= self.config.liveness_timeout_ms
        });

        let Some(input) = live else {
            if self.state != DriveState::Offline {
                warn!("Remote offline, disabling chassis");
            }
            self.primary.clear();
            self.secondary.clear();
            self.last_stamp = None;
            self.state = DriveState::Offline;
            return ArbiterOutput {
                state: DriveState::Offline,
                motion: MotionCommand::default(),
                buffer_mode: self.buffer_mode,
                cue: None,
            };
        };

        let sample = input.sample.normalized();
        let mut cue = None;

        if self.last_stamp != Some(input.received_at_ms) {
            self.last_stamp = Some(input.received_at_ms);
            let needed = self.config.debounce_ticks;

            if let Some((from, to)) = self.secondary.feed(sample.sw_l, needed) {
                debug!("Secondary switch {:?} -> {:?}", from, to);
                cue = Some(if to.level() > from.level() {
                    FeedbackCue::LeftSwitchUp
                } else {
                    FeedbackCue::LeftSwitchDown
                });
            }
            if let Some((from, to)) = self.primary.feed(sample.sw_r, needed) {
                debug!("Primary switch {:?} -> {:?}", from, to);
                match (from, to) {
                    (SwitchPosition::Down, SwitchPosition::Mid) => {
                        cue = Some(FeedbackCue::SwitchUp)
                    }
                    (SwitchPosition::Mid, SwitchPosition::Down) => {
                        cue = Some(FeedbackCue::SwitchDown)
                    }
                    _ => {}
                }
            }
        }

        let state = match self.primary.accepted {
            Some(SwitchPosition::Mid) => DriveState::DriveActive,
            _ => DriveState::Disabled,
        };
        if state != self.state {
            info!("Drive state {:?} -> {:?}", self.state, state);
            self.state = state;
        }

        let buffer_mode = match self.secondary.accepted {
            Some(SwitchPosition::Up) => BufferMode::DischargeOnly,
            Some(SwitchPosition::Down) => BufferMode::Disabled,
            _ => BufferMode::Auto,
        };
        if buffer_mode != self.buffer_mode {
            info!("Energy buffer mode {:?} -> {:?}", self.buffer_mode, buffer_mode);
            self.buffer_mode = buffer_mode;
        }

        let motion = if state == DriveState::DriveActive {
            self.motion_from(&sample)
        } else {
            MotionCommand::default()
        };

        ArbiterOutput {
            state,
            motion,
            buffer_mode,
            cue,
        }
    }

    fn deadzone(&self, v: f32) -> f32 {
        if v.abs() < self.config.deadzone { 0.0 } else { v }
    }

    /// Left stick translates; right stick vertical turns left, horizontal turns right
    fn motion_from(&self, sample: &RemoteSample) -> MotionCommand {
        let c = &self.config;
        let lv = self.deadzone(sample.ch_lv);
        let lh = self.deadzone(sample.ch_lh);
        let rv = self.deadzone(sample.ch_rv);
        let rh = self.deadzone(sample.ch_rh);

        let wz = if rv != 0.0 {
            c.wz_sign * rv * c.max_rotation_rate
        } else {
            -c.wz_sign * rh * c.max_rotation_rate
        };

        MotionCommand {
            vx: lv * c.max_linear_speed,
            vy: c.vy_sign * lh * c.max_linear_speed,
            wz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbiter() -> ModeArbiter {
        ModeArbiter::new(ArbiterConfig {
            debounce_ticks: 2,
            ..ArbiterConfig::default()
        })
    }

    fn input(sw_l: SwitchPosition, sw_r: SwitchPosition, at: u64) -> RemoteInput {
        RemoteInput {
            sample: RemoteSample {
                ch_lv: 0.5,
                ch_lh: 0.25,
                sw_l,
                sw_r,
                ..Default::default()
            },
            received_at_ms: at,
        }
    }

    use SwitchPosition::{Down, Mid, Up};

    #[test]
    fn no_input_is_offline() {
        let out = arbiter().update(0, None);
        assert_eq!(out.state, DriveState::Offline);
        assert_eq!(out.motion, MotionCommand::default());
    }

    #[test]
    fn mid_switch_drives() {
        let mut arb = arbiter();
        let out = arb.update(10, Some(&input(Mid, Mid, 5)));
        assert_eq!(out.state, DriveState::DriveActive);
        assert!((out.motion.vx - 1.0).abs() < 1e-6);
        assert!((out.motion.vy - 0.5).abs() < 1e-6);
        assert_eq!(out.motion.wz, 0.0);
        assert_eq!(out.cue, None);
    }

    #[test]
    fn down_switch_disables_with_sticks_deflected() {
        let out = arbiter().update(10, Some(&input(Mid, Down, 5)));
        assert_eq!(out.state, DriveState::Disabled);
        assert_eq!(out.motion, MotionCommand::default());
    }

    #[test]
    fn stale_input_goes_offline() {
        let mut arb = arbiter();
        let sample = input(Mid, Mid, 0);
        assert_eq!(arb.update(100, Some(&sample)).state, DriveState::DriveActive);
        let out = arb.update(101, Some(&sample));
        assert_eq!(out.state, DriveState::Offline);
        assert_eq!(out.motion, MotionCommand::default());
    }

    #[test]
    fn switch_edge_needs_consecutive_samples() {
        let mut arb = arbiter();
        assert_eq!(arb.update(1, Some(&input(Mid, Down, 1))).state, DriveState::Disabled);

        // one sample is not enough
        let out = arb.update(2, Some(&input(Mid, Mid, 2)));
        assert_eq!(out.state, DriveState::Disabled);
        assert_eq!(out.cue, None);

        // repeated ticks on the same sample do not count
        let out = arb.update(3, Some(&input(Mid, Mid, 2)));
        assert_eq!(out.state, DriveState::Disabled);

        let out = arb.update(4, Some(&input(Mid, Mid, 4)));
        assert_eq!(out.state, DriveState::DriveActive);
        assert_eq!(out.cue, Some(FeedbackCue::SwitchUp));

        // level, not edge: no repeat cue
        let out = arb.update(5, Some(&input(Mid, Mid, 5)));
        assert_eq!(out.cue, None);
    }

    #[test]
    fn glitch_is_rejected() {
        let mut arb = arbiter();
        arb.update(1, Some(&input(Mid, Mid, 1)));
        assert_eq!(arb.update(2, Some(&input(Mid, Down, 2))).state, DriveState::DriveActive);
        let out = arb.update(3, Some(&input(Mid, Mid, 3)));
        assert_eq!(out.state, DriveState::DriveActive);
        assert_eq!(out.cue, None);
    }

    #[test]
    fn primary_down_cue() {
        let mut arb = arbiter();
        arb.update(1, Some(&input(Mid, Mid, 1)));
        arb.update(2, Some(&input(Mid, Down, 2)));
        let out = arb.update(3, Some(&input(Mid, Down, 3)));
        assert_eq!(out.state, DriveState::Disabled);
        assert_eq!(out.cue, Some(FeedbackCue::SwitchDown));
    }

    #[test]
    fn secondary_switch_selects_buffer_mode() {
        let mut arb = arbiter();
        assert_eq!(arb.update(1, Some(&input(Mid, Mid, 1))).buffer_mode, BufferMode::Auto);
        arb.update(2, Some(&input(Up, Mid, 2)));
        let out = arb.update(3, Some(&input(Up, Mid, 3)));
        assert_eq!(out.buffer_mode, BufferMode::DischargeOnly);
        assert_eq!(out.cue, Some(FeedbackCue::LeftSwitchUp));
        assert_eq!(out.state, DriveState::DriveActive);

        arb.update(4, Some(&input(Down, Mid, 4)));
        let out = arb.update(5, Some(&input(Down, Mid, 5)));
        assert_eq!(out.buffer_mode, BufferMode::Disabled);
        assert_eq!(out.cue, Some(FeedbackCue::LeftSwitchDown));
    }

    #[test]
    fn reconnect_reseeds_without_cue() {
        let mut arb = arbiter();
        arb.update(1, Some(&input(Mid, Down, 1)));
        assert_eq!(arb.update(500, None).state, DriveState::Offline);
        let out = arb.update(501, Some(&input(Mid, Mid, 501)));
        assert_eq!(out.state, DriveState::DriveActive);
        assert_eq!(out.cue, None);
    }

    #[test]
    fn rotation_priority_and_deadzone() {
        let mut arb = arbiter();
        let mut sample = input(Mid, Mid, 1);
        sample.sample.ch_lv = 0.01; // inside deadzone
        sample.sample.ch_lh = 0.0;
        sample.sample.ch_rv = 0.5;
        sample.sample.ch_rh = 1.0;
        let out = arb.update(1, Some(&sample));
        assert_eq!(out.motion.vx, 0.0);
        assert!((out.motion.wz - 1.0).abs() < 1e-6);

        sample.sample.ch_rv = 0.0;
        sample.received_at_ms = 2;
        let out = arb.update(2, Some(&sample));
        assert!((out.motion.wz + 2.0).abs() < 1e-6);
    }
}
