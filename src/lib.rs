// Real-time mecanum chassis controller
//
// remote + power budget -> arbiter -> kinematics -> regulators -> power governor -> motors

pub mod chassis;
pub mod clock;
pub mod config;
pub mod cue;
pub mod messages;
pub mod motor;
pub mod runtime;
