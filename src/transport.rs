//! The pub/sub transport seam.
//!
//! The runtime never talks to a network itself. A [`Transport`] backend
//! establishes the session, publishes, subscribes and, once per tick, hands
//! over whatever arrived through [`Transport::poll`].

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;
use heapless::Deque;
use tracing::debug;

use crate::topic::TopicBuffer;
use crate::{MAX_INBOUND, MAX_PAYLOAD_LEN};

#[cfg(feature = "mqtt")]
pub mod mqtt;

/// Session parameters handed to [`Transport::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams<'a> {
    pub client_id: &'a str,
    pub server: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub password: &'a str,
    pub secure: bool,
}

pub trait Transport {
    /// Establish an authenticated session. May block for the initial
    /// network association; everything else must return promptly.
    fn connect(&mut self, params: &ConnectParams<'_>) -> bool;
    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> bool;
    fn subscribe(&mut self, topic: &str) -> bool;
    /// Move delivered messages into `inbox`. Called exactly once per tick.
    fn poll(&mut self, inbox: &mut Inbox);
    fn is_connected(&self) -> bool;
    fn disconnect(&mut self);
}

impl<T: Transport + ?Sized> Transport for alloc::boxed::Box<T> {
    fn connect(&mut self, params: &ConnectParams<'_>) -> bool {
        (**self).connect(params)
    }

    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> bool {
        (**self).publish(topic, payload, retained)
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        (**self).subscribe(topic)
    }

    fn poll(&mut self, inbox: &mut Inbox) {
        (**self).poll(inbox);
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn disconnect(&mut self) {
        (**self).disconnect();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: TopicBuffer,
    pub payload: Vec<u8>,
}

/// Bounded landing area for messages delivered during one poll.
#[derive(Debug, Default)]
pub struct Inbox {
    messages: Deque<InboundMessage, MAX_INBOUND>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a delivery. Oversized topics or payloads and deliveries past
    /// capacity are refused with `false`; the caller decides whether to keep
    /// them for the next poll.
    pub fn deliver(&mut self, topic: &str, payload: &[u8]) -> bool {
        if payload.len() > MAX_PAYLOAD_LEN {
            debug!(topic, len = payload.len(), "payload too large, dropped");
            return false;
        }
        let Ok(topic) = TopicBuffer::from(topic) else {
            debug!("topic too long, dropped");
            return false;
        };
        self.messages
            .push_back(InboundMessage {
                topic,
                payload: payload.to_vec(),
            })
            .is_ok()
    }

    pub fn is_full(&self) -> bool {
        self.messages.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn pop(&mut self) -> Option<InboundMessage> {
        self.messages.pop_front()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

#[derive(Debug)]
struct LoopbackState {
    connected: bool,
    accept_connect: bool,
    fail_publish: bool,
    connect_attempts: u32,
    last_password: Option<String>,
    subscriptions: Vec<String>,
    published: Vec<PublishedMessage>,
    pending: VecDeque<(String, Vec<u8>)>,
}

/// In-process backend with no network behind it.
///
/// Publishes are recorded, inbound traffic is whatever the host
/// [`inject`](LoopbackTransport::inject)s. Clones share state, so the host
/// can keep a handle while the runtime owns another.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    state: Rc<RefCell<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(LoopbackState {
                connected: false,
                accept_connect: true,
                fail_publish: false,
                connect_attempts: 0,
                last_password: None,
                subscriptions: Vec::new(),
                published: Vec::new(),
                pending: VecDeque::new(),
            })),
        }
    }

    /// Queue a message as if the broker had delivered it.
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        self.state
            .borrow_mut()
            .pending
            .push_back((topic.to_string(), payload.to_vec()));
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.borrow().published.clone()
    }

    pub fn take_published(&self) -> Vec<PublishedMessage> {
        core::mem::take(&mut self.state.borrow_mut().published)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.borrow().subscriptions.clone()
    }

    /// Make subsequent `connect` calls fail (or succeed again).
    pub fn set_accept_connect(&self, accept: bool) {
        self.state.borrow_mut().accept_connect = accept;
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.state.borrow_mut().fail_publish = fail;
    }

    /// Simulate the broker dropping the session.
    pub fn drop_connection(&self) {
        self.state.borrow_mut().connected = false;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.borrow().connect_attempts
    }

    pub fn last_password(&self) -> Option<String> {
        self.state.borrow().last_password.clone()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self, params: &ConnectParams<'_>) -> bool {
        let mut state = self.state.borrow_mut();
        state.connect_attempts += 1;
        state.last_password = Some(params.password.to_string());
        state.connected = state.accept_connect;
        debug!(client_id = params.client_id, server = params.server, ok = state.connected, "loopback connect");
        state.connected
    }

    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.connected || state.fail_publish {
            return false;
        }
        debug!(topic, payload, "loopback publish");
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retained,
        });
        true
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return false;
        }
        debug!(topic, "loopback subscribe");
        state.subscriptions.push(topic.to_string());
        true
    }

    fn poll(&mut self, inbox: &mut Inbox) {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return;
        }
        while !inbox.is_full() {
            let Some((topic, payload)) = state.pending.pop_front() else { break };
            inbox.deliver(&topic, &payload);
        }
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().connected = false;
    }
}
