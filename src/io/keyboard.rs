use std::sync::Arc;
use std::time::Duration;

use super::device::{Device, DeviceRequest, DeviceWorker};
use super::DeviceId;
use crate::kernel::{InterruptController, InterruptEvent, Word};

/// Largest value (exclusive) the keyboard produces.
pub const KEYBOARD_MAX_VALUE: Word = 2000;

/// Read-only input device that only one process may hold open. Each read
/// produces a random value after the device delay.
pub struct KeyboardDevice {
    id: DeviceId,
    worker: DeviceWorker,
}

impl KeyboardDevice {
    pub fn new(interrupts: Arc<InterruptController>, delay: Duration) -> KeyboardDevice {
        let mut rng = fastrand::Rng::new();
        let worker = DeviceWorker::spawn(interrupts, delay, move |request| match request {
            DeviceRequest::Read { device_id, addr } => {
                let data = rng.i32(0..KEYBOARD_MAX_VALUE);
                log::debug!("Keyboard puts '{}' on the data bus", data);
                InterruptEvent::read_done(device_id, addr, data)
            }
            DeviceRequest::Write { device_id, addr, .. } => InterruptEvent::write_done(device_id, addr),
        });

        KeyboardDevice { id: -1, worker }
    }
}

impl Device for KeyboardDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn set_id(&mut self, id: DeviceId) {
        self.id = id;
    }

    fn is_sharable(&self) -> bool {
        false
    }

    fn is_available(&self) -> bool {
        !self.worker.is_busy()
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writeable(&self) -> bool {
        false
    }

    fn read(&mut self, addr: Word) {
        self.worker.submit(DeviceRequest::Read { device_id: self.id, addr });
    }

    fn write(&mut self, _addr: Word, _data: Word) {}
}
