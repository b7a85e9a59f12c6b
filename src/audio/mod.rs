//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;

pub use buffer::{Admission, BufferGovernor, PlaybackBuffer, RingBuffer};
pub use capture::{CaptureSource, CpalInput, InputDevice};
pub use device::{list_devices, AudioDeviceInfo};
