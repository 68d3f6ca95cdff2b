use alloc::boxed::Box;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::topic::TopicBuffer;
use crate::transport::{ConnectParams, Transport};

pub type LifecycleHook = Box<dyn FnMut()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Connection state machine plus the heartbeat clock.
///
/// Hooks fire once per transition: reconnecting while already connected, or
/// noticing a drop twice, does not fire them again.
pub struct LifecycleController {
    state: ConnectionState,
    on_connected: Option<LifecycleHook>,
    on_disconnected: Option<LifecycleHook>,
    heartbeat_interval_ms: u64,
    last_heartbeat_ms: u64,
    heartbeats_sent: u32,
}

impl LifecycleController {
    pub fn new(heartbeat_interval_ms: u64) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            on_connected: None,
            on_disconnected: None,
            heartbeat_interval_ms,
            last_heartbeat_ms: 0,
            heartbeats_sent: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn on_connected(&mut self, hook: LifecycleHook) {
        self.on_connected = Some(hook);
    }

    pub fn on_disconnected(&mut self, hook: LifecycleHook) {
        self.on_disconnected = Some(hook);
    }

    /// Open a session and subscribe the inbound topics. A failed attempt
    /// leaves the controller disconnected and fires nothing; retrying is the
    /// caller's business.
    pub fn connect<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        params: &ConnectParams<'_>,
        subscriptions: &[TopicBuffer],
        now: u64,
    ) -> bool {
        if self.state == ConnectionState::Connected {
            debug!("connect ignored, already connected");
            return true;
        }

        self.state = ConnectionState::Connecting;
        if !transport.connect(params) {
            warn!(server = params.server, port = params.port, "connect failed");
            self.state = ConnectionState::Disconnected;
            return false;
        }

        for topic in subscriptions {
            if !transport.subscribe(topic) {
                warn!(topic = topic.as_str(), "subscribe failed");
            }
        }

        self.state = ConnectionState::Connected;
        self.last_heartbeat_ms = now;
        info!(server = params.server, port = params.port, "connected");

        if let Some(hook) = self.on_connected.as_mut() {
            hook();
        }
        true
    }

    /// Close the session. Returns whether a connected session was closed.
    pub fn disconnect<T: Transport + ?Sized>(&mut self, transport: &mut T) -> bool {
        transport.disconnect();
        self.mark_disconnected()
    }

    /// Track what the transport reports; a silent drop fires the
    /// disconnected hook.
    pub fn observe(&mut self, transport_connected: bool) -> bool {
        if transport_connected {
            return false;
        }
        self.mark_disconnected()
    }

    pub fn set_heartbeat_interval(&mut self, interval_ms: u64) {
        self.heartbeat_interval_ms = interval_ms;
    }

    pub fn heartbeat_interval(&self) -> u64 {
        self.heartbeat_interval_ms
    }

    pub fn heartbeats_sent(&self) -> u32 {
        self.heartbeats_sent
    }

    /// Publish a liveness message when connected and the interval has
    /// elapsed. An interval of zero disables the heartbeat.
    pub fn poll_heartbeat<T: Transport + ?Sized>(&mut self, now: u64, transport: &mut T, topic: &str) -> bool {
        if self.heartbeat_interval_ms == 0 || !self.is_connected() {
            return false;
        }
        if now.saturating_sub(self.last_heartbeat_ms) < self.heartbeat_interval_ms {
            return false;
        }

        self.last_heartbeat_ms = now;
        let payload = serde_json::json!({ "uptime_ms": now }).to_string();
        if transport.publish(topic, &payload, false) {
            self.heartbeats_sent = self.heartbeats_sent.saturating_add(1);
            true
        } else {
            warn!(topic, "heartbeat publish failed");
            false
        }
    }

    fn mark_disconnected(&mut self) -> bool {
        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Disconnected;
        if was_connected {
            info!("disconnected");
            if let Some(hook) = self.on_disconnected.as_mut() {
                hook();
            }
        }
        was_connected
    }
}

impl core::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.state)
            .field("heartbeat_interval_ms", &self.heartbeat_interval_ms)
            .field("heartbeats_sent", &self.heartbeats_sent)
            .finish()
    }
}
