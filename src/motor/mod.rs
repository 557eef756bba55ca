// Motor link for the mecanum base
//
// Provides:
// - Drive, feedback and energy-buffer frame codec
// - Lock-free motor state shared between receive path and control loop
// - SLCAN serial adapter transport
// - High-level link API (send torques, read state, dispatch feedback)

pub mod driver;
pub mod frame;
pub mod slcan;
pub mod state;

pub use driver::{FeedbackDispatcher, FrameSink, MotorLink, NullSink, motor_link};
pub use frame::{BufferCommand, BufferFeedback, CanFrame, LinkError, MotorCodec, MotorFeedback};
pub use slcan::{SlcanBus, SlcanRx, SlcanTx};
pub use state::MotorState;
