use tracing::debug;

use crate::outbox::Outbox;
use crate::registry::VirtualPinRegistry;
use crate::topic::{InboundTopic, TopicScheme};
use crate::value::Value;
use crate::MAX_VIRTUAL_PINS;

/// Built-in behaviours reachable on the `system` category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    Ping,
    DeviceInfo,
    Reboot,
    FactoryReset,
    SetAuthToken,
}

impl SystemCommand {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ping" => Some(Self::Ping),
            "info" => Some(Self::DeviceInfo),
            "reboot" => Some(Self::Reboot),
            "factory-reset" => Some(Self::FactoryReset),
            "auth-token" => Some(Self::SetAuthToken),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::DeviceInfo => "info",
            Self::Reboot => "reboot",
            Self::FactoryReset => "factory-reset",
            Self::SetAuthToken => "auth-token",
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    PinWrite { pin: usize, handled: bool },
    PinRead { pin: usize, handled: bool },
    /// Left for the runtime to execute; user pin handlers never see these.
    System { command: SystemCommand, value: Value },
    Dropped,
}

#[derive(Debug, Clone)]
pub struct MessageRouter {
    topics: TopicScheme,
}

impl MessageRouter {
    pub fn new(topics: TopicScheme) -> Self {
        Self { topics }
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    pub fn route(
        &self,
        topic: &str,
        payload: &[u8],
        registry: &mut VirtualPinRegistry,
        outbox: &mut Outbox,
    ) -> Route {
        let Some(decoded) = self.topics.decode(topic) else {
            debug!(topic, "no route for topic");
            return Route::Dropped;
        };

        match decoded {
            InboundTopic::VirtualWrite(pin) | InboundTopic::VirtualRead(pin) if pin >= MAX_VIRTUAL_PINS => {
                debug!(topic, pin, "pin out of range");
                Route::Dropped
            }
            InboundTopic::VirtualWrite(pin) => {
                let handled = registry.dispatch(pin, &payload_value(payload), outbox);
                if !handled {
                    debug!(pin, "no write handler bound");
                }
                Route::PinWrite { pin, handled }
            }
            InboundTopic::VirtualRead(pin) => {
                let handled = registry.dispatch_read(pin, &payload_value(payload), outbox);
                Route::PinRead { pin, handled }
            }
            InboundTopic::System(name) => match SystemCommand::from_name(name) {
                Some(command) => Route::System {
                    command,
                    value: payload_value(payload),
                },
                None => {
                    debug!(command = name, "unknown system command");
                    Route::Dropped
                }
            },
        }
    }
}

/// Text payloads are parsed; anything that is not UTF-8 stays opaque bytes.
fn payload_value(payload: &[u8]) -> Value {
    match core::str::from_utf8(payload) {
        Ok(text) => Value::parse(text),
        Err(_) => Value::from_bytes(payload),
    }
}
