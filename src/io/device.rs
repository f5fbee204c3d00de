use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};

use super::DeviceId;
use crate::kernel::{InterruptController, InterruptEvent, Word};

/// Capabilities of a device as seen by the operating system.
///
/// `read` and `write` only start a request. The device reports completion
/// later by posting an event to the interrupt controller with its id.
pub trait Device: Send {
    fn id(&self) -> DeviceId;
    fn set_id(&mut self, id: DeviceId);
    fn is_sharable(&self) -> bool;
    /// False while a request is in flight.
    fn is_available(&self) -> bool;
    fn is_readable(&self) -> bool;
    fn is_writeable(&self) -> bool;
    fn read(&mut self, addr: Word);
    fn write(&mut self, addr: Word, data: Word);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRequest {
    Read { device_id: DeviceId, addr: Word },
    Write { device_id: DeviceId, addr: Word, data: Word },
}

/// Background thread that services one device's requests.
///
/// Each request is handed to `service` after the device delay and the
/// resulting event is posted to the interrupt controller. The worker stays
/// busy until the post has been accepted. Dropping the worker closes the
/// request channel and the thread exits once it is idle.
pub struct DeviceWorker {
    requests: Sender<DeviceRequest>,
    busy: Arc<AtomicBool>,
}

impl DeviceWorker {
    pub fn spawn<F>(interrupts: Arc<InterruptController>, delay: Duration, mut service: F) -> DeviceWorker
    where
        F: FnMut(DeviceRequest) -> InterruptEvent + Send + 'static,
    {
        let (requests, receiver) = unbounded::<DeviceRequest>();
        let busy = Arc::new(AtomicBool::new(false));

        let thread_busy = busy.clone();
        thread::spawn(move || {
            for request in receiver {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                let event = service(request);
                interrupts.post(event);
                thread_busy.store(false, Ordering::SeqCst);
            }
        });

        DeviceWorker { requests, busy }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn submit(&self, request: DeviceRequest) {
        self.busy.store(true, Ordering::SeqCst);
        if self.requests.send(request).is_err() {
            log::error!("Device worker stopped, dropping {:?}", request);
            self.busy.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_worker_posts_and_becomes_idle() {
        let interrupts = Arc::new(InterruptController::new());
        let worker = DeviceWorker::spawn(interrupts.clone(), Duration::from_millis(5), |request| match request {
            DeviceRequest::Read { device_id, addr } => InterruptEvent::read_done(device_id, addr, 99),
            DeviceRequest::Write { device_id, addr, .. } => InterruptEvent::write_done(device_id, addr),
        });

        worker.submit(DeviceRequest::Read { device_id: 3, addr: 12 });
        assert!(worker.is_busy());

        let event = loop {
            if let Some(event) = interrupts.try_take() {
                break event;
            }
            thread::yield_now();
        };
        assert_eq!(event, InterruptEvent::read_done(3, 12, 99));

        while worker.is_busy() {
            thread::yield_now();
        }
    }
}
