//! Wheel velocity regulator: one PID loop per wheel turning a speed error into torque.
//!
//! Each [`VelocityRegulator`] owns its [`PidState`] outright; the four wheels never
//! share or read each other's loop state.

use crate::config::{IntegratorPolicy, RegulatorConfig};

/// Internal state of one wheel's loop, carried across ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    /// Integral accumulator (clamped to ±max_i).
    pub integral: f32,
    /// Low-pass filtered derivative of the error.
    pub filtered_derivative: f32,
    pub previous_error: f32,
}

impl PidState {
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone)]
pub struct VelocityRegulator {
    params: RegulatorConfig,
    state: PidState,
}

impl VelocityRegulator {
    pub fn new(params: RegulatorConfig) -> Self {
        Self {
            params,
            state: PidState::default(),
        }
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    /// Compute one cycle for a (target, measured) speed pair, both in rad/s.
    ///
    /// Returns the commanded torque in N·m, clamped to ±max_out.
    pub fn update(&mut self, target: f32, measured: f32) -> f32 {
        let p = &self.params;
        let s = &mut self.state;

        // Anti-dither: tiny setpoints are a request to stand still
        let target = if target.abs() < p.input_deadzone {
            0.0
        } else {
            target
        };
        let error = target - measured;
        if !error.is_finite() {
            return 0.0;
        }

        s.integral = (s.integral + error * p.dt).clamp(-p.max_i, p.max_i);

        let raw_derivative = (error - s.previous_error) / p.dt;
        s.filtered_derivative =
            p.alpha * s.filtered_derivative + (1.0 - p.alpha) * raw_derivative;

        let output = (p.kp * error + p.ki * s.integral + p.kd * s.filtered_derivative)
            .clamp(-p.max_out, p.max_out);

        s.previous_error = error;

        if output.abs() < p.output_deadzone {
            0.0
        } else {
            output
        }
    }

    /// Output stage for a disabled wheel: always zero torque.
    ///
    /// Loop state is cleared only under [`IntegratorPolicy::ResetOnDisable`].
    pub fn disable(&mut self) -> f32 {
        if self.params.integrator_policy == IntegratorPolicy::ResetOnDisable {
            self.state.reset();
        }
        0.0
    }
}

/// The four independent wheel loops, indexed in wheel order.
#[derive(Debug, Clone)]
pub struct RegulatorBank {
    loops: [VelocityRegulator; 4],
}

impl RegulatorBank {
    pub fn new(params: RegulatorConfig) -> Self {
        Self {
            loops: std::array::from_fn(|_| VelocityRegulator::new(params)),
        }
    }

    pub fn wheel(&self, index: usize) -> &VelocityRegulator {
        &self.loops[index]
    }

    pub fn wheel_mut(&mut self, index: usize) -> &mut VelocityRegulator {
        &mut self.loops[index]
    }

    pub fn disable_all(&mut self) -> [f32; 4] {
        self.loops.each_mut().map(|l| l.disable())
    }
}
