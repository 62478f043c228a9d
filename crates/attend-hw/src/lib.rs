//! attend-hw — Media source abstraction for the attendance session.
//!
//! Defines the acquire/release contract the session engine drives, with a
//! device-node backed camera and a simulated camera for demos and tests.

pub mod camera;

pub use camera::{DeviceCamera, MediaError, MediaSource, SimulatedCamera, StreamInfo};
