//! Power governor: bounds predicted electrical draw to the supplied budget.
//!
//! Loss model per tick, with τ the commanded torque and ω the measured speed of each wheel:
//!
//! ```text
//! P = |Σ τ·ω| + K1·Σ τ² + K2·Σ ω² + K3  [+ K4·Σ|Δτ|/dt + K5·Σ|Δω|/dt]
//! ```
//!
//! When P exceeds the limit, all four torques are scaled by the largest k solving
//! `K1·k²·Σ τ² + k·Σ τ·ω + (K2·Σ ω² + K3 − limit) = 0`, clamped to `[scale_min, 1]`.
//! A mechanical clamp is applied afterwards regardless of the power model.
//!
//! Nothing in here may produce NaN or an unbounded torque, whatever the telemetry says.

use crate::config::{DynamicTermsConfig, GovernorConfig};

/// Below this the quadratic has no torque term to scale.
const LEADING_EPSILON: f32 = 1e-6;

/// How the scale factor for one tick was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// Predicted power within budget
    WithinLimit,
    /// Scaled by the quadratic's "+" root
    Solved,
    /// All torques ≈ 0, nothing to scale
    Degenerate,
    /// Negative discriminant, fell back to scale_min
    Infeasible,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorOutput {
    pub torques: [f32; 4],
    pub scale_factor: f32,
    pub limit_active: bool,
    pub outcome: ScaleOutcome,
    /// A scaled torque hit the mechanical clamp
    pub mechanical_overlimit: bool,
    /// Effective limit after substituting the default for a missing budget
    pub limit_watts: f32,
    pub predicted_power: f32,
    /// Prediction recomputed with the scaled, clamped torques
    pub predicted_power_scaled: f32,
}

/// Solve `a·k² + b·k + c = 0` for the admissible torque scale.
///
/// Returns a factor in `[scale_min, 1]` and how it was found.
pub fn solve_scale(a: f32, b: f32, c: f32, scale_min: f32) -> (f32, ScaleOutcome) {
    if !(a.abs() > LEADING_EPSILON) {
        return (1.0, ScaleOutcome::Degenerate);
    }

    let discriminant = b * b - 4.0 * a * c;
    if !(discriminant >= 0.0) {
        return (scale_min, ScaleOutcome::Infeasible);
    }

    // "+" root: the larger one, closest to 1
    let k = (-b + discriminant.sqrt()) / (2.0 * a);
    if !k.is_finite() {
        return (scale_min, ScaleOutcome::Infeasible);
    }
    (k.clamp(scale_min, 1.0), ScaleOutcome::Solved)
}

/// Filtered rate-of-change estimate for the optional K4/K5 terms.
#[derive(Debug, Clone)]
struct RateTerms {
    params: DynamicTermsConfig,
    dt: f32,
    previous: Option<([f32; 4], [f32; 4])>,
    torque_rate: f32,
    speed_rate: f32,
}

impl RateTerms {
    fn new(params: DynamicTermsConfig, dt: f32) -> Self {
        Self {
            params,
            dt,
            previous: None,
            torque_rate: 0.0,
            speed_rate: 0.0,
        }
    }

    /// Advance the estimate by one tick and return its power contribution
    fn update(&mut self, torques: &[f32; 4], speeds: &[f32; 4]) -> f32 {
        if let Some((prev_t, prev_w)) = &self.previous {
            let raw_t: f32 = abs_diff_sum(torques, prev_t) / self.dt;
            let raw_w: f32 = abs_diff_sum(speeds, prev_w) / self.dt;
            let alpha = self.params.rate_alpha;
            self.torque_rate = alpha * self.torque_rate + (1.0 - alpha) * raw_t;
            self.speed_rate = alpha * self.speed_rate + (1.0 - alpha) * raw_w;
        }
        self.previous = Some((*torques, *speeds));
        self.contribution()
    }

    fn contribution(&self) -> f32 {
        self.params.k4 * self.torque_rate + self.params.k5 * self.speed_rate
    }

    fn reset(&mut self) {
        self.previous = None;
        self.torque_rate = 0.0;
        self.speed_rate = 0.0;
    }
}

fn abs_diff_sum(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

fn finite_or_zero(values: [f32; 4]) -> [f32; 4] {
    values.map(|v| if v.is_finite() { v } else { 0.0 })
}

#[derive(Debug, Clone)]
pub struct PowerGovernor {
    config: GovernorConfig,
    rate: Option<RateTerms>,
}

impl PowerGovernor {
    /// `dt` is the control period, used by the rate terms
    pub fn new(config: GovernorConfig, dt: f32) -> Self {
        Self {
            config,
            rate: config.dynamic.map(|d| RateTerms::new(d, dt)),
        }
    }

    /// Static part of the loss model for the given torques and speeds
    pub fn static_power(&self, torques: &[f32; 4], speeds: &[f32; 4]) -> f32 {
        let shaft: f32 = torques.iter().zip(speeds).map(|(t, w)| t * w).sum();
        let torque_sq: f32 = torques.iter().map(|t| t * t).sum();
        let speed_sq: f32 = speeds.iter().map(|w| w * w).sum();
        shaft.abs() + self.config.k1 * torque_sq + self.config.k2 * speed_sq + self.config.k3
    }

    /// Limit to enforce: the budget, or the configured default if none is reported
    pub fn effective_limit(&self, limit_watts: f32) -> f32 {
        if limit_watts.is_finite() && limit_watts > 0.0 {
            limit_watts
        } else {
            self.config.default_limit_watts
        }
    }

    /// Scale and clamp one tick's torques against the power budget.
    pub fn apply(
        &mut self,
        torques: [f32; 4],
        speeds: [f32; 4],
        limit_watts: f32,
    ) -> GovernorOutput {
        let torques = finite_or_zero(torques);
        let speeds = finite_or_zero(speeds);
        let limit = self.effective_limit(limit_watts);
        let dynamic = match self.rate.as_mut() {
            Some(rate) => rate.update(&torques, &speeds),
            None => 0.0,
        };

        let predicted = self.static_power(&torques, &speeds) + dynamic;

        let (scale_factor, outcome) = if predicted <= limit {
            (1.0, ScaleOutcome::WithinLimit)
        } else {
            let c = &self.config;
            let torque_sq: f32 = torques.iter().map(|t| t * t).sum();
            let a = c.k1 * torque_sq;
            let b: f32 = torques.iter().zip(&speeds).map(|(t, w)| t * w).sum();
            let cc = c.k2 * speeds.iter().map(|w| w * w).sum::<f32>() + c.k3 + dynamic - limit;
            if !(a.abs() > LEADING_EPSILON) && torque_sq > LEADING_EPSILON {
                // Torque is commanded but the model has no quadratic term to solve for
                (c.scale_min, ScaleOutcome::Infeasible)
            } else {
                solve_scale(a, b, cc, c.scale_min)
            }
        };

        let max_safe = self.config.max_safe_torque;
        let mut mechanical_overlimit = false;
        let scaled = torques.map(|t| {
            let t = t * scale_factor;
            if t.abs() > max_safe {
                mechanical_overlimit = true;
            }
            t.clamp(-max_safe, max_safe)
        });

        GovernorOutput {
            torques: scaled,
            scale_factor,
            limit_active: scale_factor < 1.0,
            outcome,
            mechanical_overlimit,
            limit_watts: limit,
            predicted_power: predicted,
            predicted_power_scaled: self.static_power(&scaled, &speeds) + dynamic,
        }
    }

    /// Forget rate history, e.g. while the chassis is disabled
    pub fn reset(&mut self) {
        if let Some(rate) = self.rate.as_mut() {
            rate.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> GovernorConfig {
        GovernorConfig {
            k1: 2.0,
            k2: 0.005,
            k3: 6.2,
            scale_min: 0.1,
            max_safe_torque: 8.0,
            default_limit_watts: 40.0,
            dynamic: None,
        }
    }

    fn governor() -> PowerGovernor {
        PowerGovernor::new(config(), 0.001)
    }

    #[test]
    fn within_limit_is_noop() {
        let torques = [0.5, -0.4, 0.3, 0.2];
        let speeds = [1.0, 1.0, -1.0, 0.0];
        let out = governor().apply(torques, speeds, 80.0);
        assert_eq!(out.scale_factor, 1.0);
        assert!(!out.limit_active);
        assert_eq!(out.torques, torques);
        assert_eq!(out.outcome, ScaleOutcome::WithinLimit);
    }

    #[test]
    fn scales_over_budget_to_limit() {
        let mut gov = governor();
        let out = gov.apply([5.0; 4], [10.0; 4], 40.0);

        assert!(out.predicted_power > 40.0);
        assert_eq!(out.outcome, ScaleOutcome::Solved);
        assert!(out.scale_factor > 0.1 && out.scale_factor < 1.0);
        assert!(out.limit_active);

        let recomputed = gov.static_power(&out.torques, &[10.0; 4]);
        assert!((recomputed - out.predicted_power_scaled).abs() < 1e-3);
        assert!(recomputed <= 40.0 + 1e-3, "post-scale power {}", recomputed);
    }

    #[test]
    fn zero_torque_is_degenerate() {
        // Static draw alone exceeds the limit, but there is nothing to scale
        let out = governor().apply([0.0; 4], [300.0; 4], 40.0);
        assert_eq!(out.outcome, ScaleOutcome::Degenerate);
        assert_eq!(out.scale_factor, 1.0);
        assert_eq!(out.torques, [0.0; 4]);
    }

    #[test]
    fn negative_discriminant_falls_back_to_scale_min() {
        // Σ τ·ω = 0 and the speed losses alone exceed the limit: no real root
        let out = governor().apply([1.0; 4], [200.0, -200.0, 200.0, -200.0], 10.0);
        assert_eq!(out.outcome, ScaleOutcome::Infeasible);
        assert_eq!(out.scale_factor, 0.1);
        for t in out.torques {
            assert!((t - 0.1).abs() < 1e-6);
        }
    }

    #[test]
    fn missing_copper_loss_term_still_limits() {
        let mut gov = PowerGovernor::new(GovernorConfig { k1: 0.0, ..config() }, 0.001);
        let out = gov.apply([5.0; 4], [10.0; 4], 40.0);

        assert!(out.predicted_power > 200.0);
        assert_eq!(out.outcome, ScaleOutcome::Infeasible);
        assert_eq!(out.scale_factor, 0.1);
        assert!(out.limit_active);
        assert!(out.predicted_power_scaled <= 40.0);
    }

    #[test]
    fn mechanical_clamp_applies_without_power_limit() {
        let out = governor().apply([20.0, -20.0, 1.0, 0.0], [0.0; 4], 1.0e6);
        assert_eq!(out.scale_factor, 1.0);
        assert_eq!(out.torques, [8.0, -8.0, 1.0, 0.0]);
        assert!(out.mechanical_overlimit);
    }

    #[test]
    fn missing_budget_uses_default_limit() {
        let gov = governor();
        assert_eq!(gov.effective_limit(0.0), 40.0);
        assert_eq!(gov.effective_limit(f32::NAN), 40.0);
        assert_eq!(gov.effective_limit(-5.0), 40.0);
        assert_eq!(gov.effective_limit(60.0), 60.0);
    }

    #[test]
    fn non_finite_telemetry_stays_bounded() {
        let out = governor().apply(
            [f32::NAN, f32::INFINITY, 1.0, -1.0],
            [f32::NEG_INFINITY, 1.0, f32::NAN, 2.0],
            40.0,
        );
        assert!(out.scale_factor.is_finite());
        for t in out.torques {
            assert!(t.is_finite() && t.abs() <= 8.0);
        }
    }

    #[test]
    fn solve_scale_edge_cases() {
        assert_eq!(solve_scale(0.0, 5.0, -3.0, 0.2), (1.0, ScaleOutcome::Degenerate));
        assert_eq!(solve_scale(1.0, 0.0, 1.0, 0.2), (0.2, ScaleOutcome::Infeasible));
        assert_eq!(solve_scale(f32::NAN, 0.0, 1.0, 0.2).1, ScaleOutcome::Degenerate);
        // root above 1 is clamped
        assert_eq!(solve_scale(1.0, 0.0, -4.0, 0.2), (1.0, ScaleOutcome::Solved));
        // root below scale_min is clamped
        assert_eq!(solve_scale(1.0, 0.0, -0.0001, 0.2), (0.2, ScaleOutcome::Solved));
    }

    #[test]
    fn dynamic_terms_raise_prediction_on_torque_steps() {
        let mut gov = PowerGovernor::new(
            GovernorConfig {
                dynamic: Some(DynamicTermsConfig {
                    k4: 0.01,
                    k5: 0.0,
                    rate_alpha: 0.0,
                }),
                ..config()
            },
            0.001,
        );
        let steady = gov.apply([0.1; 4], [0.0; 4], 1.0e6).predicted_power;
        let step = gov.apply([0.6; 4], [0.0; 4], 1.0e6).predicted_power;
        let static_step = gov.static_power(&[0.6; 4], &[0.0; 4]);
        // Σ|Δτ|/dt = 2.0 / 0.001 = 2000, times k4
        assert!((step - static_step - 20.0).abs() < 1e-2);
        assert!(steady < step);

        gov.reset();
        let after_reset = gov.apply([0.6; 4], [0.0; 4], 1.0e6).predicted_power;
        assert!((after_reset - static_step).abs() < 1e-4);
    }

    fn wheel_values(range: f32) -> impl Strategy<Value = [f32; 4]> {
        prop::array::uniform4(-range..range)
    }

    proptest! {
        #[test]
        fn scale_factor_always_bounded(
            torques in wheel_values(20.0),
            speeds in wheel_values(500.0),
            limit in -10.0f32..500.0,
        ) {
            let out = governor().apply(torques, speeds, limit);
            prop_assert!(out.scale_factor >= 0.1 && out.scale_factor <= 1.0);
            for t in out.torques {
                prop_assert!(t.is_finite() && t.abs() <= 8.0);
            }
        }

        #[test]
        fn larger_limit_never_scales_harder(
            torques in wheel_values(10.0),
            speeds in wheel_values(300.0),
            limit in 1.0f32..400.0,
            extra in 0.0f32..400.0,
        ) {
            let low = governor().apply(torques, speeds, limit);
            let high = governor().apply(torques, speeds, limit + extra);
            prop_assert!(
                low.scale_factor <= high.scale_factor,
                "limit {} -> {}, limit {} -> {}",
                limit, low.scale_factor, limit + extra, high.scale_factor
            );
        }
    }
}
