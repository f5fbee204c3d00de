use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::device::{Device, DeviceRequest, DeviceWorker};
use super::DeviceId;
use crate::kernel::{InterruptController, InterruptEvent, Word};

/// Write-only output device. Every write is printed as `CONSOLE: n` and
/// kept in a transcript.
pub struct ConsoleDevice {
    id: DeviceId,
    worker: DeviceWorker,
    transcript: Arc<Mutex<Vec<Word>>>,
}

impl ConsoleDevice {
    pub fn new(interrupts: Arc<InterruptController>, delay: Duration) -> ConsoleDevice {
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let written = transcript.clone();
        let worker = DeviceWorker::spawn(interrupts, delay, move |request| match request {
            DeviceRequest::Write { device_id, addr, data } => {
                println!("CONSOLE: {}", data);
                written.lock().push(data);
                InterruptEvent::write_done(device_id, addr)
            }
            DeviceRequest::Read { device_id, addr } => InterruptEvent::read_done(device_id, addr, 0),
        });

        ConsoleDevice { id: -1, worker, transcript }
    }

    /// Shared handle to everything written so far.
    pub fn transcript(&self) -> Arc<Mutex<Vec<Word>>> {
        self.transcript.clone()
    }
}

impl Device for ConsoleDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn set_id(&mut self, id: DeviceId) {
        self.id = id;
    }

    fn is_sharable(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        !self.worker.is_busy()
    }

    fn is_readable(&self) -> bool {
        false
    }

    fn is_writeable(&self) -> bool {
        true
    }

    fn read(&mut self, _addr: Word) {}

    fn write(&mut self, addr: Word, data: Word) {
        self.worker.submit(DeviceRequest::Write { device_id: self.id, addr, data });
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_console_device_capabilities() {
        let console = ConsoleDevice::new(Arc::new(InterruptController::new()), Duration::ZERO);
        assert!(console.is_sharable());
        assert!(console.is_writeable());
        assert!(!console.is_readable());
        assert!(console.is_available());
    }

    #[test]
    fn test_console_device_write_records_and_interrupts() {
        let interrupts = Arc::new(InterruptController::new());
        let mut console = ConsoleDevice::new(interrupts.clone(), Duration::ZERO);
        console.set_id(1);
        console.write(4, 77);

        let event = loop {
            if let Some(event) = interrupts.try_take() {
                break event;
            }
            thread::yield_now();
        };
        assert_eq!(event, InterruptEvent::write_done(1, 4));
        assert_eq!(*console.transcript().lock(), vec![77]);
    }
}
