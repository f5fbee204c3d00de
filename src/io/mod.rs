pub mod console;
pub mod core_dump;
pub mod device;
pub mod keyboard;
pub mod loader;
pub mod program;

use crate::kernel::Word;

/// Identifier the operating system assigns to a registered device.
pub type DeviceId = Word;

pub use console::ConsoleDevice;
pub use core_dump::CoreDump;
pub use device::{Device, DeviceRequest, DeviceWorker};
pub use keyboard::KeyboardDevice;
pub use program::Program;
