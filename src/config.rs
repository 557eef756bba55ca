// Loop rate, topics, chassis geometry, controller gains and fieldbus layout
//
// Every tunable lives here so that behavioural variants of the chassis are a
// TOML file rather than a code fork. `ChassisConfig::default()` reproduces the
// constants the robot shipped with, so the runtime also starts without a file.

use std::path::Path;

use serde::Deserialize;

// Control loop frequency (1 kHz)
pub const LOOP_HZ: u32 = 1000;
// Fastest loop the millisecond runtime clock can meaningfully stamp
pub const MAX_LOOP_HZ: u32 = 10_000;

// Zenoh topics
pub const TOPIC_REMOTE: &str = "chassis/cmd/remote"; // remote-control samples
pub const TOPIC_POWER: &str = "chassis/cmd/power"; // power budget from the referee
pub const TOPIC_SNAPSHOT: &str = "chassis/rt/snapshot"; // per-tick aggregate
pub const TOPIC_HEALTH: &str = "chassis/state/health"; // health status
pub const TOPIC_CUE: &str = "chassis/cue"; // feedback cues for the buzzer

// Serial-line CAN adapter
pub const BUS_PORT: &str = "/dev/ttyACM0";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChassisConfig {
    pub runtime: RuntimeConfig,
    pub bus: BusConfig,
    pub geometry: GeometryConfig,
    pub regulator: RegulatorConfig,
    pub governor: GovernorConfig,
    pub link: LinkConfig,
    pub arbiter: ArbiterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub loop_hz: u32,
    /// Publish one snapshot every N control ticks
    pub telemetry_divider: u32,
    pub topic_remote: String,
    pub topic_power: String,
    pub topic_snapshot: String,
    pub topic_health: String,
    pub topic_cue: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            telemetry_divider: 10,
            topic_remote: TOPIC_REMOTE.to_string(),
            topic_power: TOPIC_POWER.to_string(),
            topic_snapshot: TOPIC_SNAPSHOT.to_string(),
            topic_health: TOPIC_HEALTH.to_string(),
            topic_cue: TOPIC_CUE.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Control period in seconds
    pub fn period_s(&self) -> f32 {
        1.0 / self.loop_hz as f32
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    pub port: String,
    pub baudrate: u32,
    /// Set to false for simulation/testing without an adapter attached
    pub enabled: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port: BUS_PORT.to_string(),
            baudrate: 921_600,
            enabled: true,
        }
    }
}

/// Mecanum base geometry, all in meters.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeometryConfig {
    pub wheel_radius: f32,
    /// Half of the front-rear wheel separation
    pub half_length: f32,
    /// Half of the left-right wheel separation
    pub half_width: f32,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            wheel_radius: 0.076,
            half_length: 0.15,
            half_width: 0.15,
        }
    }
}

/// What happens to the integrator when a wheel is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorPolicy {
    /// Keep the accumulated integral across a disable
    Hold,
    /// Clear all loop state on disable
    ResetOnDisable,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegulatorConfig {
    /// Sampling interval (s), always the control period of `runtime.loop_hz`
    #[serde(skip)]
    pub dt: f32,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Output clamp (N·m)
    pub max_out: f32,
    /// Integral clamp
    pub max_i: f32,
    /// Derivative low-pass coefficient, 0 disables filtering
    pub alpha: f32,
    /// Targets below this (rad/s) are treated as zero
    pub input_deadzone: f32,
    /// Outputs below this (N·m) are treated as zero
    pub output_deadzone: f32,
    pub integrator_policy: IntegratorPolicy,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        // Conservative tuning, derivative off
        Self {
            dt: 1.0 / LOOP_HZ as f32,
            kp: 3.0,
            ki: 0.1,
            kd: 0.0,
            max_out: 2.0,
            max_i: 0.5,
            alpha: 0.5,
            input_deadzone: 0.05,
            output_deadzone: 0.01,
            integrator_policy: IntegratorPolicy::ResetOnDisable,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GovernorConfig {
    /// Torque loss coefficient
    pub k1: f32,
    /// Speed loss coefficient
    pub k2: f32,
    /// Static draw (W)
    pub k3: f32,
    pub scale_min: f32,
    /// Absolute mechanical clamp applied after scaling (N·m)
    pub max_safe_torque: f32,
    /// Used when the referee reports no limit
    pub default_limit_watts: f32,
    pub dynamic: Option<DynamicTermsConfig>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            k1: 2.0,
            k2: 0.01,
            k3: 5.0,
            scale_min: 0.1,
            max_safe_torque: 8.0,
            default_limit_watts: 40.0,
            dynamic: None,
        }
    }
}

/// Optional rate-of-change terms of the power model.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicTermsConfig {
    pub k4: f32,
    pub k5: f32,
    /// Low-pass coefficient on the rate estimate
    #[serde(default)]
    pub rate_alpha: f32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    pub drive_group_id: u16,
    pub feedback_base_id: u16,
    /// Motor controller id per wheel, in [front-left, front-right, rear-left, rear-right] order
    pub motor_ids: [u8; 4],
    /// Raw current units per N·m of output torque
    pub torque_to_raw: f32,
    /// Symmetric clamp on the raw current command
    pub raw_limit: i16,
    /// Rotor rpm to output shaft rad/s
    pub rpm_to_rad_s: f32,
    pub encoder_counts: u16,
    /// Raw current units per amp in feedback frames
    pub raw_per_amp: f32,
    pub stale_window_ms: u64,
    pub buffer_tx_id: u16,
    pub buffer_rx_id: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        // M3508 with 3591/187 gearbox on a C620 controller:
        // ±16384 raw = ±20 A, 0.3 N·m/A at the output shaft
        let gear_ratio = 3591.0 / 187.0;
        Self {
            drive_group_id: 0x200,
            feedback_base_id: 0x200,
            motor_ids: [2, 1, 3, 4],
            torque_to_raw: 16384.0 / 20.0 / 0.3,
            raw_limit: 16384,
            rpm_to_rad_s: std::f32::consts::TAU / 60.0 / gear_ratio,
            encoder_counts: 8192,
            raw_per_amp: 16384.0 / 20.0,
            stale_window_ms: 100,
            buffer_tx_id: 0x300,
            buffer_rx_id: 0x301,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArbiterConfig {
    /// Remote is considered offline after this long without a sample
    pub liveness_timeout_ms: u64,
    /// Stick values below this magnitude read as zero
    pub deadzone: f32,
    /// m/s at full stick deflection
    pub max_linear_speed: f32,
    /// rad/s at full stick deflection
    pub max_rotation_rate: f32,
    pub vy_sign: f32,
    pub wz_sign: f32,
    /// Consecutive identical samples before a switch position is accepted
    pub debounce_ticks: u32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: 100,
            deadzone: 0.05,
            max_linear_speed: 2.0,
            max_rotation_rate: 2.0,
            vy_sign: 1.0,
            wz_sign: 1.0,
            debounce_ticks: 3,
        }
    }
}

impl ChassisConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text)?;
        config.regulator.dt = config.runtime.period_s();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, what: &str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid(what.to_string()))
            }
        }
        fn positive(v: f32) -> bool {
            v.is_finite() && v > 0.0
        }
        fn non_negative(v: f32) -> bool {
            v.is_finite() && v >= 0.0
        }

        let rt = &self.runtime;
        check(
            (1..=MAX_LOOP_HZ).contains(&rt.loop_hz),
            "runtime.loop_hz must be in 1..=10000",
        )?;
        check(rt.telemetry_divider > 0, "runtime.telemetry_divider must be > 0")?;

        let g = &self.geometry;
        check(positive(g.wheel_radius), "geometry.wheel_radius must be > 0")?;
        check(positive(g.half_length), "geometry.half_length must be > 0")?;
        check(positive(g.half_width), "geometry.half_width must be > 0")?;

        let r = &self.regulator;
        check(positive(r.dt), "regulator.dt must be > 0")?;
        let period = rt.period_s();
        check(
            (r.dt - period).abs() <= period * 1e-6,
            "regulator.dt must equal the control period 1 / runtime.loop_hz",
        )?;
        check(
            non_negative(r.kp) && non_negative(r.ki) && non_negative(r.kd),
            "regulator gains must be finite and >= 0",
        )?;
        check(non_negative(r.max_out), "regulator.max_out must be >= 0")?;
        check(non_negative(r.max_i), "regulator.max_i must be >= 0")?;
        check(
            r.alpha.is_finite() && (0.0..=1.0).contains(&r.alpha),
            "regulator.alpha must be in [0, 1]",
        )?;
        check(
            non_negative(r.input_deadzone) && non_negative(r.output_deadzone),
            "regulator deadzones must be >= 0",
        )?;

        let gov = &self.governor;
        // Without k1 the quadratic degenerates and over-budget torque would pass unscaled
        check(positive(gov.k1), "governor.k1 must be > 0")?;
        check(
            non_negative(gov.k2) && non_negative(gov.k3),
            "governor k2, k3 must be finite and >= 0",
        )?;
        check(
            gov.scale_min.is_finite() && gov.scale_min > 0.0 && gov.scale_min <= 1.0,
            "governor.scale_min must be in (0, 1]",
        )?;
        check(positive(gov.max_safe_torque), "governor.max_safe_torque must be > 0")?;
        check(positive(gov.default_limit_watts), "governor.default_limit_watts must be > 0")?;
        if let Some(d) = &gov.dynamic {
            check(
                non_negative(d.k4) && non_negative(d.k5),
                "governor.dynamic k4/k5 must be finite and >= 0",
            )?;
            check(
                d.rate_alpha.is_finite() && (0.0..=1.0).contains(&d.rate_alpha),
                "governor.dynamic.rate_alpha must be in [0, 1]",
            )?;
        }

        let l = &self.link;
        let mut ids = l.motor_ids;
        ids.sort_unstable();
        check(
            ids.windows(2).all(|w| w[0] != w[1]),
            "link.motor_ids must be unique",
        )?;
        check(
            l.motor_ids.iter().all(|&id| (1..=4).contains(&id)),
            "link.motor_ids must be in 1..=4 to share one drive frame",
        )?;
        check(positive(l.torque_to_raw), "link.torque_to_raw must be > 0")?;
        check(l.raw_limit > 0, "link.raw_limit must be > 0")?;
        check(positive(l.rpm_to_rad_s), "link.rpm_to_rad_s must be > 0")?;
        check(l.encoder_counts > 0, "link.encoder_counts must be > 0")?;
        check(positive(l.raw_per_amp), "link.raw_per_amp must be > 0")?;
        check(l.stale_window_ms > 0, "link.stale_window_ms must be > 0")?;
        check(
            l.drive_group_id <= 0x7FF && l.buffer_tx_id <= 0x7FF && l.buffer_rx_id <= 0x7FF,
            "link frame ids must be standard 11-bit ids",
        )?;
        check(
            l.feedback_base_id as u32 + 4 <= 0x7FF,
            "link.feedback_base_id leaves no room for motor ids",
        )?;

        let a = &self.arbiter;
        check(a.liveness_timeout_ms > 0, "arbiter.liveness_timeout_ms must be > 0")?;
        check(
            a.deadzone.is_finite() && (0.0..1.0).contains(&a.deadzone),
            "arbiter.deadzone must be in [0, 1)",
        )?;
        check(
            non_negative(a.max_linear_speed) && non_negative(a.max_rotation_rate),
            "arbiter speed limits must be >= 0",
        )?;
        check(
            a.vy_sign.abs() == 1.0 && a.wz_sign.abs() == 1.0,
            "arbiter.vy_sign and wz_sign must be +1 or -1",
        )?;
        check(a.debounce_ticks > 0, "arbiter.debounce_ticks must be > 0")?;

        Ok(())
    }
}
