//! Topic naming.
//!
//! Every topic is `<root>/<device_id>/<category>[/<leaf>]`. Inbound
//! categories carry cloud-to-device traffic, outbound ones device-to-cloud.

use arrayvec::ArrayString;
use core::fmt::Write;

use crate::error::{Result, RuntimeError};
use crate::MAX_TOPIC_LEN;

pub type TopicBuffer = ArrayString<MAX_TOPIC_LEN>;

pub const VIRTUAL_WRITE: &str = "virtual-write";
pub const VIRTUAL_READ: &str = "virtual-read";
pub const SYSTEM: &str = "system";

pub const VIRTUAL_STATE: &str = "virtual";
pub const SENSOR: &str = "sensor";
pub const NOTIFY: &str = "notify";
pub const HEARTBEAT: &str = "heartbeat";
pub const SYSTEM_REPLY: &str = "system-reply";

/// Single-level wildcard used for subscriptions.
const WILDCARD: &str = "+";

/// A decoded inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic<'a> {
    /// Cloud writes a value to a virtual pin. The index is not range-checked.
    VirtualWrite(usize),
    /// Cloud asks the device to report a virtual pin.
    VirtualRead(usize),
    System(&'a str),
}

#[derive(Debug, Clone)]
pub struct TopicScheme {
    prefix: TopicBuffer,
}

impl TopicScheme {
    pub fn new(root: &str, device_id: &str) -> Result<Self> {
        let mut prefix = TopicBuffer::new();
        write!(prefix, "{}/{}", root.trim_end_matches('/'), device_id)
            .map_err(|_| RuntimeError::TopicTooLong)?;
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Structural decode: prefix, one category segment, one leaf segment.
    /// Anything else is not ours and yields `None`.
    pub fn decode<'a>(&self, topic: &'a str) -> Option<InboundTopic<'a>> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let (category, leaf) = rest.split_once('/')?;
        if leaf.is_empty() || leaf.contains('/') {
            return None;
        }

        match category {
            VIRTUAL_WRITE => parse_pin(leaf).map(InboundTopic::VirtualWrite),
            VIRTUAL_READ => parse_pin(leaf).map(InboundTopic::VirtualRead),
            SYSTEM => Some(InboundTopic::System(leaf)),
            _ => None,
        }
    }

    pub fn pin_state(&self, pin: usize) -> Result<TopicBuffer> {
        self.build(VIRTUAL_STATE, Some(format_args!("{pin}")))
    }

    pub fn sensor(&self, pin: usize) -> Result<TopicBuffer> {
        self.build(SENSOR, Some(format_args!("{pin}")))
    }

    pub fn notify(&self, pin: usize) -> Result<TopicBuffer> {
        self.build(NOTIFY, Some(format_args!("{pin}")))
    }

    pub fn heartbeat(&self) -> Result<TopicBuffer> {
        self.build(HEARTBEAT, None)
    }

    pub fn system_reply(&self, command: &str) -> Result<TopicBuffer> {
        self.build(SYSTEM_REPLY, Some(format_args!("{command}")))
    }

    /// Filters for every inbound category.
    pub fn subscriptions(&self) -> Result<[TopicBuffer; 3]> {
        Ok([
            self.build(VIRTUAL_WRITE, Some(format_args!("{WILDCARD}")))?,
            self.build(VIRTUAL_READ, Some(format_args!("{WILDCARD}")))?,
            self.build(SYSTEM, Some(format_args!("{WILDCARD}")))?,
        ])
    }

    fn build(&self, category: &str, leaf: Option<core::fmt::Arguments<'_>>) -> Result<TopicBuffer> {
        let mut topic = TopicBuffer::new();
        let written = match leaf {
            Some(leaf) => write!(topic, "{}/{}/{}", self.prefix, category, leaf),
            None => write!(topic, "{}/{}", self.prefix, category),
        };
        written.map_err(|_| RuntimeError::TopicTooLong)?;
        Ok(topic)
    }
}

fn parse_pin(leaf: &str) -> Option<usize> {
    if !leaf.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    leaf.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> TopicScheme {
        TopicScheme::new("devices", "dev-1").unwrap()
    }

    #[test]
    fn test_decode_categories() {
        let scheme = scheme();
        assert_eq!(
            scheme.decode("devices/dev-1/virtual-write/5"),
            Some(InboundTopic::VirtualWrite(5))
        );
        assert_eq!(
            scheme.decode("devices/dev-1/virtual-read/12"),
            Some(InboundTopic::VirtualRead(12))
        );
        assert_eq!(
            scheme.decode("devices/dev-1/system/ping"),
            Some(InboundTopic::System("ping"))
        );
    }

    #[test]
    fn test_decode_rejects_foreign_topics() {
        let scheme = scheme();
        assert_eq!(scheme.decode("devices/dev-2/virtual-write/5"), None);
        assert_eq!(scheme.decode("devices/dev-1x/virtual-write/5"), None);
        assert_eq!(scheme.decode("devices/dev-1/virtual-write/5/extra"), None);
        assert_eq!(scheme.decode("devices/dev-1/virtual-write/abc"), None);
        assert_eq!(scheme.decode("devices/dev-1/virtual-write/-1"), None);
        assert_eq!(scheme.decode("devices/dev-1/virtual-write/"), None);
        assert_eq!(scheme.decode("devices/dev-1/unknown/5"), None);
        assert_eq!(scheme.decode("devices/dev-1"), None);
    }

    #[test]
    fn test_outbound_topics() {
        let scheme = scheme();
        assert_eq!(scheme.pin_state(7).unwrap().as_str(), "devices/dev-1/virtual/7");
        assert_eq!(scheme.sensor(3).unwrap().as_str(), "devices/dev-1/sensor/3");
        assert_eq!(scheme.heartbeat().unwrap().as_str(), "devices/dev-1/heartbeat");
        assert_eq!(
            scheme.system_reply("info").unwrap().as_str(),
            "devices/dev-1/system-reply/info"
        );
    }

    #[test]
    fn test_subscriptions() {
        let topics = scheme().subscriptions().unwrap();
        assert_eq!(topics[0].as_str(), "devices/dev-1/virtual-write/+");
        assert_eq!(topics[1].as_str(), "devices/dev-1/virtual-read/+");
        assert_eq!(topics[2].as_str(), "devices/dev-1/system/+");
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let long_id = "x".repeat(MAX_TOPIC_LEN);
        assert!(matches!(
            TopicScheme::new("devices", &long_id),
            Err(RuntimeError::TopicTooLong)
        ));
    }
}
