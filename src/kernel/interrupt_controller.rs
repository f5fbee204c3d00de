use parking_lot::{Condvar, Mutex};

use super::Word;
use crate::io::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    ReadDone,
    WriteDone,
}

/// A completed device request waiting to be delivered to the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptEvent {
    pub kind: InterruptKind,
    pub device_id: DeviceId,
    pub addr: Word,
    pub data: Word,
}

impl InterruptEvent {
    pub fn read_done(device_id: DeviceId, addr: Word, data: Word) -> InterruptEvent {
        InterruptEvent { kind: InterruptKind::ReadDone, device_id, addr, data }
    }

    pub fn write_done(device_id: DeviceId, addr: Word) -> InterruptEvent {
        InterruptEvent { kind: InterruptKind::WriteDone, device_id, addr, data: 0 }
    }
}

/// Single-slot mailbox between the device threads (producers) and the CPU
/// (the only consumer).
///
/// `post` blocks while the slot is occupied; `try_take` never blocks.
pub struct InterruptController {
    slot: Mutex<Option<InterruptEvent>>,
    slot_changed: Condvar,
}

impl InterruptController {
    pub fn new() -> InterruptController {
        InterruptController {
            slot: Mutex::new(None),
            slot_changed: Condvar::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    pub fn post(&self, event: InterruptEvent) {
        let mut slot = self.slot.lock();
        while slot.is_some() {
            self.slot_changed.wait(&mut slot);
        }

        *slot = Some(event);
        self.slot_changed.notify_all();
    }

    pub fn try_take(&self) -> Option<InterruptEvent> {
        let mut slot = self.slot.lock();
        let event = slot.take();
        if event.is_some() {
            self.slot_changed.notify_all();
        }
        event
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        InterruptController::new()
    }
}
