use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};
use crate::outbox::OutboundKind;
use crate::topic::TopicScheme;
use crate::transport::Transport;
use crate::value::Value;
use crate::{Outbox, MAX_VIRTUAL_PINS};

pub type PinHandler = Box<dyn FnMut(&Value, &mut Outbox)>;

#[derive(Default)]
struct PinSlot {
    on_write: Option<PinHandler>,
    on_read: Option<PinHandler>,
    last_value: Option<String>,
}

impl PinSlot {
    fn is_bound(&self) -> bool {
        self.on_write.is_some() || self.on_read.is_some()
    }
}

/// Handler table indexed directly by virtual pin.
pub struct VirtualPinRegistry {
    pins: Box<[PinSlot]>,
}

impl VirtualPinRegistry {
    pub fn new() -> Self {
        Self {
            pins: (0..MAX_VIRTUAL_PINS).map(|_| PinSlot::default()).collect(),
        }
    }

    /// Bind the handler for cloud writes to `pin`, replacing any previous
    /// one. Out-of-range pins are ignored and report `false`.
    pub fn attach(&mut self, pin: usize, handler: PinHandler) -> bool {
        let Some(slot) = self.pins.get_mut(pin) else {
            debug!(pin, "attach ignored, pin out of range");
            return false;
        };
        slot.on_write = Some(handler);
        true
    }

    /// Bind the handler for cloud read requests on `pin`.
    pub fn attach_read(&mut self, pin: usize, handler: PinHandler) -> bool {
        let Some(slot) = self.pins.get_mut(pin) else {
            debug!(pin, "attach_read ignored, pin out of range");
            return false;
        };
        slot.on_read = Some(handler);
        true
    }

    pub fn detach(&mut self, pin: usize) {
        if let Some(slot) = self.pins.get_mut(pin) {
            slot.on_write = None;
            slot.on_read = None;
        }
    }

    /// Run the write handler for `pin`. `false` means nothing was bound.
    pub fn dispatch(&mut self, pin: usize, value: &Value, outbox: &mut Outbox) -> bool {
        match self.pins.get_mut(pin).and_then(|slot| slot.on_write.as_mut()) {
            Some(handler) => {
                handler(value, outbox);
                true
            }
            None => false,
        }
    }

    pub fn dispatch_read(&mut self, pin: usize, value: &Value, outbox: &mut Outbox) -> bool {
        match self.pins.get_mut(pin).and_then(|slot| slot.on_read.as_mut()) {
            Some(handler) => {
                handler(value, outbox);
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self, pin: usize) -> bool {
        self.pins.get(pin).is_some_and(PinSlot::is_bound)
    }

    pub fn bound_count(&self) -> usize {
        self.pins.iter().filter(|slot| slot.is_bound()).count()
    }

    pub fn last_value(&self, pin: usize) -> Option<&str> {
        self.pins.get(pin)?.last_value.as_deref()
    }

    /// Record a pin's state without publishing it.
    pub fn remember(&mut self, pin: usize, value: &str) -> Result<()> {
        let slot = self.pins.get_mut(pin).ok_or(RuntimeError::PinOutOfRange(pin))?;
        slot.last_value = Some(value.to_string());
        Ok(())
    }

    /// Publish a pin's state device-to-cloud and remember it for syncs.
    pub fn write<T: Transport + ?Sized>(
        &mut self,
        pin: usize,
        value: &str,
        topics: &TopicScheme,
        transport: &mut T,
    ) -> Result<()> {
        self.publish(OutboundKind::VirtualWrite, pin, value, topics, transport)
    }

    pub fn publish<T: Transport + ?Sized>(
        &mut self,
        kind: OutboundKind,
        pin: usize,
        value: &str,
        topics: &TopicScheme,
        transport: &mut T,
    ) -> Result<()> {
        let slot = self.pins.get_mut(pin).ok_or(RuntimeError::PinOutOfRange(pin))?;
        let topic = match kind {
            OutboundKind::VirtualWrite => {
                slot.last_value = Some(value.to_string());
                topics.pin_state(pin)?
            }
            OutboundKind::Sensor => topics.sensor(pin)?,
            OutboundKind::Notify => topics.notify(pin)?,
        };

        if transport.publish(&topic, value, false) {
            Ok(())
        } else {
            warn!(topic = topic.as_str(), "publish failed");
            Err(RuntimeError::PublishFailed(topic.to_string()))
        }
    }

    /// Pins worth republishing on a sync: those with a handler or a
    /// recorded value, in pin order.
    pub fn known_pins(&self) -> Vec<usize> {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_bound() || slot.last_value.is_some())
            .map(|(pin, _)| pin)
            .collect()
    }

    /// Republish the last known value of `pin`. Pins never written publish an
    /// empty string.
    pub fn sync_one<T: Transport + ?Sized>(
        &mut self,
        pin: usize,
        topics: &TopicScheme,
        transport: &mut T,
    ) -> Result<()> {
        let value = self
            .pins
            .get(pin)
            .ok_or(RuntimeError::PinOutOfRange(pin))?
            .last_value
            .clone()
            .unwrap_or_default();
        self.write(pin, &value, topics, transport)
    }
}

impl Default for VirtualPinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for VirtualPinRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VirtualPinRegistry")
            .field("bound", &self.bound_count())
            .finish()
    }
}
