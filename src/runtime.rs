use alloc::boxed::Box;
use alloc::string::{String, ToString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::lifecycle::{ConnectionState, LifecycleController};
use crate::outbox::{OutboundKind, Outbox, TimerRequest};
use crate::registry::VirtualPinRegistry;
use crate::router::{MessageRouter, Route, SystemCommand};
use crate::scheduler::{SchedulerStats, TimerHandle, TimerScheduler};
use crate::storage::Storage;
use crate::topic::{TopicBuffer, TopicScheme};
use crate::transport::{ConnectParams, Inbox, Transport};
use crate::value::Value;

/// Storage key holding the credential used for the next connect.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

type EventHook = Box<dyn FnMut(&str, &Value)>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub messages_routed: u32,
    pub messages_dropped: u32,
    pub publishes_sent: u32,
    pub publishes_failed: u32,
    pub timer_fires: u32,
    pub heartbeats_sent: u32,
}

/// The device runtime.
///
/// Owns the transport, storage and clock collaborators together with the
/// pin registry, timer table and lifecycle state. The host constructs one,
/// registers its handlers, connects, then calls [`tick`](Self::tick) from its
/// own loop. Nothing in here blocks except the transport's initial connect.
pub struct DeviceRuntime<T: Transport, S: Storage, C: Clock> {
    config: RuntimeConfig,
    transport: T,
    storage: S,
    clock: C,

    router: MessageRouter,
    registry: VirtualPinRegistry,
    scheduler: TimerScheduler,
    lifecycle: LifecycleController,

    inbox: Inbox,
    outbox: Outbox,
    heartbeat_topic: TopicBuffer,
    event_hook: Option<EventHook>,

    reboot_requested: bool,
    stats: RuntimeStats,
}

impl<T: Transport, S: Storage, C: Clock> DeviceRuntime<T, S, C> {
    /// Build a runtime. A token previously stored under [`AUTH_TOKEN_KEY`]
    /// takes precedence over the one in `config`.
    pub fn new(mut config: RuntimeConfig, transport: T, storage: S, clock: C) -> Result<Self> {
        config.validate()?;
        if let Some(token) = storage.read(AUTH_TOKEN_KEY) {
            debug!("using persisted auth token");
            config.auth_token = token;
        }

        let topics = TopicScheme::new(&config.topic_root, &config.device_id)?;
        let heartbeat_topic = topics.heartbeat()?;
        let lifecycle = LifecycleController::new(config.heartbeat_interval_ms);

        Ok(Self {
            config,
            transport,
            storage,
            clock,
            router: MessageRouter::new(topics),
            registry: VirtualPinRegistry::new(),
            scheduler: TimerScheduler::new(),
            lifecycle,
            inbox: Inbox::new(),
            outbox: Outbox::new(),
            heartbeat_topic,
            event_hook: None,
            reboot_requested: false,
            stats: RuntimeStats::default(),
        })
    }

    // Connectivity & lifecycle

    /// Open the broker session and subscribe the inbound topics. Failure
    /// is reported, not retried.
    pub fn connect(&mut self) -> bool {
        let subscriptions = match self.router.topics().subscriptions() {
            Ok(topics) => topics,
            Err(e) => {
                warn!("cannot build subscriptions: {}", e);
                return false;
            }
        };

        let was_connected = self.lifecycle.is_connected();
        let params = ConnectParams {
            client_id: &self.config.device_id,
            server: &self.config.server,
            port: self.config.port,
            user: &self.config.device_id,
            password: &self.config.auth_token,
            secure: self.config.secure,
        };
        let now = self.clock.now_ms();
        let connected = self
            .lifecycle
            .connect(&mut self.transport, &params, &subscriptions, now);

        if connected && !was_connected && self.config.sync_on_connect {
            self.sync_all();
        }
        connected
    }

    pub fn disconnect(&mut self) {
        self.lifecycle.disconnect(&mut self.transport);
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Interval between liveness publishes; zero turns them off.
    pub fn set_heartbeat_interval(&mut self, interval_ms: u64) {
        self.lifecycle.set_heartbeat_interval(interval_ms);
    }

    pub fn on_connected(&mut self, hook: impl FnMut() + 'static) {
        self.lifecycle.on_connected(Box::new(hook));
    }

    pub fn on_disconnected(&mut self, hook: impl FnMut() + 'static) {
        self.lifecycle.on_disconnected(Box::new(hook));
    }

    /// Observe every system command with its name and payload, before the
    /// runtime acts on it.
    pub fn on_event(&mut self, hook: impl FnMut(&str, &Value) + 'static) {
        self.event_hook = Some(Box::new(hook));
    }

    /// One pass of the run loop: transport, then timers, then heartbeat.
    pub fn tick(&mut self) {
        self.transport.poll(&mut self.inbox);
        self.lifecycle.observe(self.transport.is_connected());

        while let Some(message) = self.inbox.pop() {
            self.handle_message(&message.topic, &message.payload);
        }

        let now = self.clock.now_ms();
        let fired = self.scheduler.poll(now, &mut self.outbox);
        self.stats.timer_fires = self.stats.timer_fires.saturating_add(fired as u32);
        self.flush_outbox();

        if self
            .lifecycle
            .poll_heartbeat(now, &mut self.transport, &self.heartbeat_topic)
        {
            self.stats.heartbeats_sent = self.lifecycle.heartbeats_sent();
        }
    }

    /// Entry point for a delivered message. Transports that push rather
    /// than poll call this directly.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        let route = self
            .router
            .route(topic, payload, &mut self.registry, &mut self.outbox);

        match route {
            Route::Dropped => {
                self.stats.messages_dropped = self.stats.messages_dropped.saturating_add(1);
            }
            Route::PinWrite { .. } => {
                self.stats.messages_routed = self.stats.messages_routed.saturating_add(1);
            }
            Route::PinRead { pin, handled } => {
                self.stats.messages_routed = self.stats.messages_routed.saturating_add(1);
                if !handled {
                    if let Err(e) = self.sync_virtual(pin) {
                        debug!(pin, "read request not answered: {}", e);
                    }
                }
            }
            Route::System { command, value } => {
                self.stats.messages_routed = self.stats.messages_routed.saturating_add(1);
                if let Some(hook) = self.event_hook.as_mut() {
                    hook(command.name(), &value);
                }
                self.execute_system(command, &value);
            }
        }

        self.flush_outbox();
    }

    // Virtual pins

    /// Handle cloud writes to `pin`. Out-of-range pins are ignored and
    /// report `false`.
    pub fn attach_virtual(&mut self, pin: usize, handler: impl FnMut(&Value, &mut Outbox) + 'static) -> bool {
        self.registry.attach(pin, Box::new(handler))
    }

    /// Handle cloud read requests for `pin`. Without one, the last written
    /// value is republished.
    pub fn attach_virtual_read(&mut self, pin: usize, handler: impl FnMut(&Value, &mut Outbox) + 'static) -> bool {
        self.registry.attach_read(pin, Box::new(handler))
    }

    /// Publish pin state. While disconnected the value is still remembered
    /// so a later sync sends it.
    pub fn virtual_write(&mut self, pin: usize, value: impl ToString) -> Result<()> {
        self.publish_pin(OutboundKind::VirtualWrite, pin, &value.to_string())
    }

    pub fn send_sensor(&mut self, pin: usize, value: impl ToString) -> Result<()> {
        self.publish_pin(OutboundKind::Sensor, pin, &value.to_string())
    }

    pub fn notify(&mut self, pin: usize, value: impl ToString) -> Result<()> {
        self.publish_pin(OutboundKind::Notify, pin, &value.to_string())
    }

    /// Republish every known pin; returns how many went out. Failures count
    /// towards `publishes_failed`.
    pub fn sync_all(&mut self) -> usize {
        if !self.is_connected() {
            return 0;
        }
        let mut sent = 0;
        for pin in self.registry.known_pins() {
            let result = self.registry.sync_one(pin, self.router.topics(), &mut self.transport);
            self.count_publish(&result);
            if result.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    pub fn sync_virtual(&mut self, pin: usize) -> Result<()> {
        if !self.is_connected() {
            return Err(RuntimeError::NotConnected);
        }
        let result = self.registry.sync_one(pin, self.router.topics(), &mut self.transport);
        self.count_publish(&result);
        result
    }

    pub fn last_value(&self, pin: usize) -> Option<&str> {
        self.registry.last_value(pin)
    }

    // Timers

    pub fn set_timer(&mut self, period_ms: u64, callback: impl FnMut(&mut Outbox) + 'static) -> Result<TimerHandle> {
        let now = self.clock.now_ms();
        self.scheduler.set(period_ms, now, Box::new(callback))
    }

    pub fn set_timer_once(&mut self, delay_ms: u64, callback: impl FnMut(&mut Outbox) + 'static) -> Result<TimerHandle> {
        let now = self.clock.now_ms();
        self.scheduler.once(delay_ms, now, Box::new(callback))
    }

    pub fn stop_timer(&mut self, handle: TimerHandle) -> bool {
        self.scheduler.stop(handle)
    }

    pub fn active_timers(&self) -> usize {
        self.scheduler.active_count()
    }

    pub fn scheduler_stats(&self) -> &SchedulerStats {
        self.scheduler.stats()
    }

    // System & security

    pub fn ping(&mut self) -> Result<()> {
        self.publish_reply(SystemCommand::Ping, "pong")
    }

    pub fn device_info(&mut self) -> Result<()> {
        let info = serde_json::json!({
            "device_id": self.config.device_id,
            "firmware": self.config.firmware_version,
            "uptime_ms": self.clock.now_ms(),
            "bound_pins": self.registry.bound_count(),
            "active_timers": self.scheduler.active_count(),
            "state": self.lifecycle.state(),
        });
        self.publish_reply(SystemCommand::DeviceInfo, &info.to_string())
    }

    /// Ask the host to restart the device. The runtime only raises the flag;
    /// acting on it is the host's job.
    pub fn reboot(&mut self) {
        info!("reboot requested");
        self.reboot_requested = true;
    }

    /// Erase persisted state and request a reboot.
    pub fn factory_reset(&mut self) {
        info!("factory reset");
        if let Err(e) = self.storage.clear() {
            warn!("factory reset could not clear storage: {}", e);
        }
        self.reboot();
    }

    pub fn reboot_requested(&self) -> bool {
        self.reboot_requested
    }

    /// Clear and return the reboot flag.
    pub fn take_reboot_request(&mut self) -> bool {
        core::mem::take(&mut self.reboot_requested)
    }

    /// Replace the credential used by the next [`connect`](Self::connect)
    /// and persist it.
    pub fn set_auth_token(&mut self, token: &str) -> Result<()> {
        self.config.auth_token = token.to_string();
        self.storage.write(AUTH_TOKEN_KEY, token)
    }

    pub fn save(&mut self, key: &str, value: &str) -> Result<()> {
        self.storage.write(key, value)
    }

    pub fn load(&self, key: &str) -> Option<String> {
        self.storage.read(key)
    }

    // Introspection

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    pub fn topics(&self) -> &TopicScheme {
        self.router.topics()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn execute_system(&mut self, command: SystemCommand, value: &Value) {
        let result = match command {
            SystemCommand::Ping => self.ping(),
            SystemCommand::DeviceInfo => self.device_info(),
            SystemCommand::Reboot => {
                self.reboot();
                Ok(())
            }
            SystemCommand::FactoryReset => {
                self.factory_reset();
                Ok(())
            }
            SystemCommand::SetAuthToken => {
                // Either a bare token or {"token":"..."}
                let token = if value.contains_key("token") {
                    value.get("token").as_str().to_string()
                } else {
                    value.as_str().trim().to_string()
                };
                if token.is_empty() {
                    debug!("empty auth token ignored");
                    Ok(())
                } else {
                    self.set_auth_token(&token)
                }
            }
        };

        if let Err(e) = result {
            warn!(command = command.name(), "system command failed: {}", e);
        }
    }

    fn publish_reply(&mut self, command: SystemCommand, payload: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(RuntimeError::NotConnected);
        }
        let topic = self.router.topics().system_reply(command.name())?;
        let result = if self.transport.publish(&topic, payload, false) {
            Ok(())
        } else {
            Err(RuntimeError::PublishFailed(topic.to_string()))
        };
        self.count_publish(&result);
        result
    }

    fn publish_pin(&mut self, kind: OutboundKind, pin: usize, value: &str) -> Result<()> {
        if !self.is_connected() {
            if kind == OutboundKind::VirtualWrite {
                self.registry.remember(pin, value)?;
            }
            return Err(RuntimeError::NotConnected);
        }
        let result = self
            .registry
            .publish(kind, pin, value, self.router.topics(), &mut self.transport);
        self.count_publish(&result);
        result
    }

    fn flush_outbox(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        for outbound in self.outbox.drain() {
            if let Err(e) = self.publish_pin(outbound.kind, outbound.pin, &outbound.value) {
                debug!(pin = outbound.pin, "queued publish not sent: {}", e);
            }
        }

        let now = self.clock.now_ms();
        for request in self.outbox.drain_timers() {
            let result = match request {
                TimerRequest::Set {
                    period_ms,
                    repeating: true,
                    callback,
                } => self.scheduler.set(period_ms, now, callback).map(drop),
                TimerRequest::Set {
                    period_ms, callback, ..
                } => self.scheduler.once(period_ms, now, callback).map(drop),
                TimerRequest::Stop(handle) => {
                    self.scheduler.stop(handle);
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!("queued timer not set: {}", e);
            }
        }
    }

    fn count_publish(&mut self, result: &Result<()>) {
        match result {
            Ok(()) => self.stats.publishes_sent = self.stats.publishes_sent.saturating_add(1),
            Err(RuntimeError::PublishFailed(_)) => {
                self.stats.publishes_failed = self.stats.publishes_failed.saturating_add(1);
            }
            Err(_) => {}
        }
    }
}

impl<T: Transport, S: Storage, C: Clock> core::fmt::Debug for DeviceRuntime<T, S, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceRuntime")
            .field("device_id", &self.config.device_id)
            .field("lifecycle", &self.lifecycle)
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
