// Fieldbus frame layouts for the chassis motors and the energy buffer
//
// Drive command (out, one group id):   [m1 hi, m1 lo, m2 hi, m2 lo, m3 hi, m3 lo, m4 hi, m4 lo]
// Motor feedback (in, base id + motor): [angle hi, angle lo, speed hi, speed lo,
//                                        current hi, current lo, temperature, -]
// Buffer command (out, fixed id):       [limit W hi, lo, energy J hi, lo, output enable, mode, -, -]
// Buffer feedback (in, fixed id):       [p_in hi, lo, p_out hi, lo, energy J hi, lo, -, -]
//
// All multi-byte fields are big-endian. Power fields in buffer feedback are in 0.01 W.

use std::f32::consts::TAU;

use crate::config::LinkConfig;
use crate::messages::BufferMode;

pub const MAX_DATA_LEN: usize = 8;

/// Error types for fieldbus communication
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed adapter line {line:?}: {reason}")]
    Malformed { line: String, reason: String },

    #[error("Frame payload too long: {len} bytes")]
    FrameTooLong { len: usize },

    #[error("Frame 0x{id:03X} too short: {len} bytes")]
    FrameTooShort { id: u16, len: usize },

    #[error("Adapter rejected command")]
    AdapterNack,
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Standard-id data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u16,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl CanFrame {
    pub fn new(id: u16, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_DATA_LEN {
            return Err(LinkError::FrameTooLong { len: payload.len() });
        }
        let mut data = [0u8; MAX_DATA_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            len: payload.len() as u8,
            data,
        })
    }

    fn full(id: u16, data: [u8; MAX_DATA_LEN]) -> Self {
        Self {
            id,
            len: MAX_DATA_LEN as u8,
            data,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    fn require(&self, len: usize) -> Result<&[u8]> {
        let payload = self.payload();
        if payload.len() < len {
            return Err(LinkError::FrameTooShort {
                id: self.id,
                len: payload.len(),
            });
        }
        Ok(payload)
    }
}

/// One motor's decoded feedback in SI units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorFeedback {
    /// Rotor angle in [0, 2π)
    pub angle_rad: f32,
    /// Output shaft speed
    pub speed_rad_s: f32,
    pub current_a: f32,
    pub temperature_c: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BufferFeedback {
    pub power_in_w: f32,
    pub power_out_w: f32,
    pub stored_energy_j: f32,
}

impl BufferFeedback {
    /// Power drawn by the chassis through the buffer
    pub fn chassis_power_w(&self) -> f32 {
        self.power_out_w - self.power_in_w
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferCommand {
    pub limit_watts: f32,
    pub buffered_energy_joules: f32,
    pub output_enabled: bool,
    pub mode: BufferMode,
}

/// Where an inbound frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Wheel(usize),
    Buffer,
}

/// Converts between wheel-ordered SI values and frames
#[derive(Debug, Clone, Copy)]
pub struct MotorCodec {
    config: LinkConfig,
}

impl MotorCodec {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }

    /// Torque (N·m) to clamped raw current command
    pub fn torque_to_raw(&self, torque: f32) -> i16 {
        if !torque.is_finite() {
            return 0;
        }
        let limit = self.config.raw_limit as f32;
        (torque * self.config.torque_to_raw).round().clamp(-limit, limit) as i16
    }

    /// Pack four wheel torques into the shared drive frame
    pub fn encode_drive(&self, torques: &[f32; 4]) -> CanFrame {
        let mut data = [0u8; MAX_DATA_LEN];
        for (wheel, &torque) in torques.iter().enumerate() {
            let slot = (self.config.motor_ids[wheel] - 1) as usize * 2;
            data[slot..slot + 2].copy_from_slice(&self.torque_to_raw(torque).to_be_bytes());
        }
        CanFrame::full(self.config.drive_group_id, data)
    }

    pub fn encode_buffer_command(&self, cmd: &BufferCommand) -> CanFrame {
        fn to_u16(v: f32) -> u16 {
            if v.is_finite() {
                v.round().clamp(0.0, u16::MAX as f32) as u16
            } else {
                0
            }
        }
        let limit = to_u16(cmd.limit_watts).to_be_bytes();
        let energy = to_u16(cmd.buffered_energy_joules).to_be_bytes();
        CanFrame::full(
            self.config.buffer_tx_id,
            [
                limit[0],
                limit[1],
                energy[0],
                energy[1],
                cmd.output_enabled as u8,
                cmd.mode as u8,
                0,
                0,
            ],
        )
    }

    /// Identify an inbound frame by id
    pub fn classify(&self, id: u16) -> Option<FrameSource> {
        if id == self.config.buffer_rx_id {
            return Some(FrameSource::Buffer);
        }
        let motor = id.checked_sub(self.config.feedback_base_id)?;
        self.config
            .motor_ids
            .iter()
            .position(|&m| m as u16 == motor)
            .map(FrameSource::Wheel)
    }

    pub fn decode_motor_feedback(&self, frame: &CanFrame) -> Result<MotorFeedback> {
        let p = frame.require(7)?;
        let c = &self.config;
        let angle = u16::from_be_bytes([p[0], p[1]]) % c.encoder_counts;
        let rpm = i16::from_be_bytes([p[2], p[3]]);
        let current = i16::from_be_bytes([p[4], p[5]]);

        Ok(MotorFeedback {
            angle_rad: angle as f32 / c.encoder_counts as f32 * TAU,
            speed_rad_s: rpm as f32 * c.rpm_to_rad_s,
            current_a: current as f32 / c.raw_per_amp,
            temperature_c: p[6],
        })
    }

    pub fn decode_buffer_feedback(&self, frame: &CanFrame) -> Result<BufferFeedback> {
        let p = frame.require(6)?;
        Ok(BufferFeedback {
            power_in_w: i16::from_be_bytes([p[0], p[1]]) as f32 / 100.0,
            power_out_w: i16::from_be_bytes([p[2], p[3]]) as f32 / 100.0,
            stored_energy_j: u16::from_be_bytes([p[4], p[5]]) as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MotorCodec {
        MotorCodec::new(LinkConfig::default())
    }

    #[test]
    fn test_drive_frame_layout() {
        // wheel order FL, FR, RL, RR -> motor ids 2, 1, 3, 4
        let c = MotorCodec::new(LinkConfig {
            torque_to_raw: 1000.0,
            ..LinkConfig::default()
        });
        let frame = c.encode_drive(&[1.0, -1.0, 0.5, 0.0]);
        assert_eq!(frame.id, 0x200);
        assert_eq!(frame.payload().len(), 8);
        // motor 1 (front-right) = -1000
        assert_eq!(&frame.payload()[0..2], &(-1000i16).to_be_bytes());
        // motor 2 (front-left) = 1000 = 0x03E8
        assert_eq!(&frame.payload()[2..4], &[0x03, 0xE8]);
        assert_eq!(&frame.payload()[4..6], &500i16.to_be_bytes());
        assert_eq!(&frame.payload()[6..8], &[0, 0]);
    }

    #[test]
    fn test_torque_to_raw_limits() {
        let c = codec();
        assert_eq!(c.torque_to_raw(1000.0), 16384);
        assert_eq!(c.torque_to_raw(-1000.0), -16384);
        assert_eq!(c.torque_to_raw(f32::NAN), 0);
        assert_eq!(c.torque_to_raw(0.0), 0);
        // 0.3 N·m/A and 819.2 raw/A
        assert_eq!(c.torque_to_raw(0.3), 819);
    }

    #[test]
    fn test_decode_motor_feedback() {
        let c = MotorCodec::new(LinkConfig {
            rpm_to_rad_s: 0.01,
            ..LinkConfig::default()
        });
        let frame = CanFrame::new(0x202, &[0x10, 0x00, 0xFF, 0x38, 0x03, 0x33, 41, 0]).unwrap();
        let fb = c.decode_motor_feedback(&frame).unwrap();
        // 0x1000 = 4096 of 8192 counts: half a turn
        assert!((fb.angle_rad - std::f32::consts::PI).abs() < 1e-5);
        // 0xFF38 = -200 rpm
        assert!((fb.speed_rad_s + 2.0).abs() < 1e-5);
        // 0x0333 = 819 raw
        assert!((fb.current_a - 819.0 / 819.2).abs() < 1e-4);
        assert_eq!(fb.temperature_c, 41);
    }

    #[test]
    fn test_short_feedback_rejected() {
        let frame = CanFrame::new(0x201, &[0, 0, 0]).unwrap();
        assert!(matches!(
            codec().decode_motor_feedback(&frame),
            Err(LinkError::FrameTooShort { id: 0x201, len: 3 })
        ));
    }

    #[test]
    fn test_classify() {
        let c = codec();
        assert_eq!(c.classify(0x202), Some(FrameSource::Wheel(0)));
        assert_eq!(c.classify(0x201), Some(FrameSource::Wheel(1)));
        assert_eq!(c.classify(0x203), Some(FrameSource::Wheel(2)));
        assert_eq!(c.classify(0x204), Some(FrameSource::Wheel(3)));
        assert_eq!(c.classify(0x301), Some(FrameSource::Buffer));
        assert_eq!(c.classify(0x205), None);
        assert_eq!(c.classify(0x100), None);
    }

    #[test]
    fn test_buffer_frames() {
        let c = codec();
        let frame = c.encode_buffer_command(&BufferCommand {
            limit_watts: 60.0,
            buffered_energy_joules: 57.4,
            output_enabled: true,
            mode: BufferMode::DischargeOnly,
        });
        assert_eq!(frame.id, 0x300);
        assert_eq!(frame.payload(), &[0, 60, 0, 57, 1, 1, 0, 0]);

        let fb = CanFrame::new(0x301, &[0x0F, 0xA0, 0x13, 0x88, 0x07, 0xD0, 0, 0]).unwrap();
        let fb = c.decode_buffer_feedback(&fb).unwrap();
        assert!((fb.power_in_w - 40.0).abs() < 1e-4);
        assert!((fb.power_out_w - 50.0).abs() < 1e-4);
        assert_eq!(fb.stored_energy_j, 2000.0);
        assert!((fb.chassis_power_w() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_payload_too_long() {
        assert!(matches!(
            CanFrame::new(0x200, &[0; 9]),
            Err(LinkError::FrameTooLong { len: 9 })
        ));
    }
}
