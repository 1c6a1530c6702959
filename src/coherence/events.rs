use std::fmt;

use super::{AccessInfo, DeviceId};
use crate::cache::{CacheAccess, Tag};

/// Observability hooks raised by find-and-lock.  Listeners cannot influence the protocol.
#[derive(Debug, Clone)]
pub enum CoherenceEvent {
    BeginCacheAccess {
        device: DeviceId,
        access: AccessInfo,
        cache_access: CacheAccess,
    },
    FillLine {
        device: DeviceId,
        tag: Tag,
        access: AccessInfo,
        set: usize,
        way: usize,
    },
    ServiceNonblockingRequest {
        device: DeviceId,
        access: AccessInfo,
        hit: bool,
    },
    NonblockingRequestHitToTransientTag {
        device: DeviceId,
        access: AccessInfo,
        tag: Tag,
    },
}

impl CoherenceEvent {
    pub fn device(&self) -> DeviceId {
        match self {
            Self::BeginCacheAccess { device, .. }
            | Self::FillLine { device, .. }
            | Self::ServiceNonblockingRequest { device, .. }
            | Self::NonblockingRequestHitToTransientTag { device, .. } => *device,
        }
    }
}

pub type EventListener = Box<dyn FnMut(&CoherenceEvent)>;

#[derive(Default)]
pub struct EventDispatcher {
    listeners: Vec<EventListener>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: EventListener) {
        self.listeners.push(listener);
    }

    pub fn dispatch(&mut self, event: &CoherenceEvent) {
        for listener in self.listeners.iter_mut() {
            listener(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AccessKind;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn every_listener_sees_every_event() {
        let count = Rc::new(Cell::new(0));
        let mut dispatcher = EventDispatcher::new();
        for _ in 0..2 {
            let count = Rc::clone(&count);
            dispatcher.add_listener(Box::new(move |event| {
                assert_eq!(event.device(), DeviceId::Llc);
                count.set(count.get() + 1);
            }));
        }

        let access = AccessInfo {
            id: 0,
            core: 0,
            kind: AccessKind::Load,
            address: 0x40,
            tag: 0x40,
            issued_at: 0,
        };
        dispatcher.dispatch(&CoherenceEvent::NonblockingRequestHitToTransientTag {
            device: DeviceId::Llc,
            access,
            tag: 0x40,
        });
        assert_eq!(count.get(), 2);
    }
}
