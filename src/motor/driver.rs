// High-level motor link for the mecanum base
//
// Combines the frame codec, a transmit sink and the shared motor state into
// two halves: `MotorLink` for the control loop (send torques, read state) and
// `FeedbackDispatcher` for the receive path (decode and record feedback).

use std::io::Write;

use tracing::{debug, info, warn};

use super::frame::{BufferCommand, BufferFeedback, CanFrame, FrameSource, MotorCodec, Result};
use super::slcan::SlcanTx;
use super::state::{ControlPort, FeedbackPort, MotorState};

/// Anything that can put a frame on the bus
pub trait FrameSink {
    fn send(&mut self, frame: &CanFrame) -> Result<()>;
}

impl<W: Write> FrameSink for SlcanTx<W> {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        SlcanTx::<W>::send(self, frame)
    }
}

/// Collects frames in memory (tests, replay)
impl FrameSink for Vec<CanFrame> {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        self.push(*frame);
        Ok(())
    }
}

/// Discards every frame (dry run without an adapter)
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn send(&mut self, _frame: &CanFrame) -> Result<()> {
        Ok(())
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        (**self).send(frame)
    }
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        (**self).send(frame)
    }
}

/// Control-loop side of the motor link
pub struct MotorLink<S: FrameSink> {
    sink: S,
    codec: MotorCodec,
    control: ControlPort,
}

impl<S: FrameSink> MotorLink<S> {
    pub fn new(sink: S, codec: MotorCodec, control: ControlPort) -> Self {
        Self {
            sink,
            codec,
            control,
        }
    }

    /// Send wheel torques (N·m, wheel order) in one drive frame
    ///
    /// Commanded torques are recorded even when the send fails: the next tick
    /// sends a fresh command anyway.
    pub fn send_torques(&mut self, torques: &[f32; 4]) -> Result<()> {
        for (wheel, &torque) in torques.iter().enumerate() {
            self.control.record_command(wheel, torque);
        }
        let frame = self.codec.encode_drive(torques);
        self.sink.send(&frame)
    }

    pub fn send_buffer_command(&mut self, cmd: &BufferCommand) -> Result<()> {
        let frame = self.codec.encode_buffer_command(cmd);
        self.sink.send(&frame)
    }

    /// Stop all motors immediately
    pub fn stop(&mut self) -> Result<()> {
        info!("Stopping all motors");
        self.send_torques(&[0.0; 4])
    }

    /// Read current motor state for every wheel
    pub fn read_motors(&self, now_ms: u64) -> [MotorState; 4] {
        self.control.read_all(now_ms)
    }

    pub fn read_buffer(&self, now_ms: u64) -> Option<BufferFeedback> {
        self.control.read_buffer(now_ms)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<S: FrameSink> Drop for MotorLink<S> {
    fn drop(&mut self) {
        // Try to stop motors when the link is dropped (safety measure)
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}

/// Receive-path side of the motor link
pub struct FeedbackDispatcher {
    codec: MotorCodec,
    feedback: FeedbackPort,
}

impl FeedbackDispatcher {
    pub fn new(codec: MotorCodec, feedback: FeedbackPort) -> Self {
        Self { codec, feedback }
    }

    /// Decode one inbound frame and record it with its arrival time
    ///
    /// Frames from other devices on the bus are ignored (`Ok(None)`).
    pub fn on_frame(&self, frame: &CanFrame, stamp_ms: u64) -> Result<Option<FrameSource>> {
        let Some(source) = self.codec.classify(frame.id) else {
            debug!("Ignoring frame 0x{:03X}", frame.id);
            return Ok(None);
        };

        match source {
            FrameSource::Wheel(wheel) => {
                let fb = self.codec.decode_motor_feedback(frame)?;
                self.feedback.record_motor(wheel, &fb, stamp_ms);
            }
            FrameSource::Buffer => {
                let fb = self.codec.decode_buffer_feedback(frame)?;
                self.feedback.record_buffer(&fb, stamp_ms);
            }
        }
        Ok(Some(source))
    }
}

/// Create both halves of the link over a shared state
pub fn motor_link<S: FrameSink>(
    sink: S,
    codec: MotorCodec,
    stale_window_ms: u64,
) -> (MotorLink<S>, FeedbackDispatcher) {
    let (feedback, control) = super::state::shared_state(stale_window_ms);
    (
        MotorLink::new(sink, codec, control),
        FeedbackDispatcher::new(codec, feedback),
    )
}

/// Sink wrapper that fails on demand, for exercising send-failure handling
#[cfg(test)]
pub(crate) struct FlakySink {
    pub frames: Vec<CanFrame>,
    pub fail: bool,
}

#[cfg(test)]
impl FrameSink for FlakySink {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        if self.fail {
            return Err(super::frame::LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "adapter unplugged",
            )));
        }
        self.frames.push(*frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;

    fn link() -> (MotorLink<Vec<CanFrame>>, FeedbackDispatcher) {
        motor_link(Vec::new(), MotorCodec::new(LinkConfig::default()), 100)
    }

    #[test]
    fn test_send_records_commanded_torque() {
        let (mut link, _rx) = link();
        link.send_torques(&[0.5, -0.5, 0.25, 0.0]).unwrap();
        assert_eq!(link.sink().len(), 1);
        assert_eq!(link.sink()[0].id, 0x200);
        let motors = link.read_motors(0);
        assert_eq!(motors[0].commanded_torque, 0.5);
        assert_eq!(motors[1].commanded_torque, -0.5);
    }

    #[test]
    fn test_feedback_updates_state() {
        let (link, rx) = link();
        // motor id 3 = rear-left, 200 rpm
        let frame = CanFrame::new(0x203, &[0, 0, 0, 200, 0, 0, 30, 0]).unwrap();
        assert_eq!(rx.on_frame(&frame, 500).unwrap(), Some(FrameSource::Wheel(2)));

        let motors = link.read_motors(550);
        assert!(!motors[2].stale);
        assert!((motors[2].measured_speed - 1.09).abs() < 0.01);
        assert!(motors[0].stale && motors[1].stale && motors[3].stale);
    }

    #[test]
    fn test_foreign_frames_ignored() {
        let (_link, rx) = link();
        let frame = CanFrame::new(0x123, &[1, 2, 3]).unwrap();
        assert_eq!(rx.on_frame(&frame, 0).unwrap(), None);
    }

    #[test]
    fn test_short_feedback_is_error() {
        let (link, rx) = link();
        let frame = CanFrame::new(0x201, &[0, 0]).unwrap();
        assert!(rx.on_frame(&frame, 0).is_err());
        assert!(link.read_motors(0)[1].stale);
    }

    #[test]
    fn test_buffer_feedback_dispatch() {
        let (link, rx) = link();
        let frame = CanFrame::new(0x301, &[0x0F, 0xA0, 0x13, 0x88, 0x07, 0xD0, 0, 0]).unwrap();
        assert_eq!(rx.on_frame(&frame, 10).unwrap(), Some(FrameSource::Buffer));
        let fb = link.read_buffer(20).unwrap();
        assert!((fb.chassis_power_w() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_drop_sends_stop() {
        let (feedback, control) = crate::motor::state::shared_state(100);
        drop(feedback);
        let frames = {
            let mut sink = FlakySink {
                frames: Vec::new(),
                fail: false,
            };
            {
                let link = MotorLink::new(
                    &mut sink,
                    MotorCodec::new(LinkConfig::default()),
                    control,
                );
                drop(link);
            }
            sink.frames
        };
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[0; 8]);
    }
}
