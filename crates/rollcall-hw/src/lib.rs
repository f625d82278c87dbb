//! rollcall-hw — Camera capture and motion input.
//!
//! V4L2 access for the arrival/departure cameras and a sysfs GPIO watcher
//! for the PIR sensor that starts each session.

pub mod camera;
pub mod capture;
pub mod frame;
pub mod motion;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use capture::{
    CameraBackend, CameraRole, CaptureError, CaptureOrchestrator, CapturedPhotos, V4lBackend,
};
pub use frame::Frame;
pub use motion::{GpioMotionSensor, MotionEdge, MotionError};
