//! # pinlink
//!
//! A resident runtime for small network-connected devices. Inbound messages
//! arrive from a pub/sub transport as `(topic, payload)` pairs, get routed to
//! application handlers keyed by a *virtual pin* index, and the whole device
//! is driven by one non-blocking [`DeviceRuntime::tick`] call that the host
//! program invokes from its own loop.
//!
//! ## Features
//!
//! - **Virtual pins**: 256 integer-addressed logical channels with write and
//!   read-request handlers
//! - **Flat payload parsing**: scalars and single-level `{"k":v}` objects, never
//!   failing on garbled input
//! - **Cooperative timers**: 16 fixed slots, periodic or one-shot
//! - **Heartbeat and lifecycle**: connection state machine with connected /
//!   disconnected hooks
//! - **Pluggable collaborators**: [`Transport`], [`Storage`] and [`Clock`]
//!   traits with in-memory and host backends
//!
//! ## Quick Start
//!
//! ```rust
//! use pinlink::{DeviceRuntime, RuntimeConfig, LoopbackTransport, MemoryStorage, ManualClock};
//!
//! let clock = ManualClock::new();
//! let transport = LoopbackTransport::new();
//! let mut runtime = DeviceRuntime::new(
//!     RuntimeConfig::new("dev-1", "secret"),
//!     transport.clone(),
//!     MemoryStorage::new(),
//!     clock.clone(),
//! )?;
//!
//! runtime.attach_virtual(5, |value, outbox| {
//!     outbox.virtual_write(6, value.as_str());
//! });
//!
//! assert!(runtime.connect());
//! transport.inject("devices/dev-1/virtual-write/5", b"42");
//! runtime.tick();
//!
//! assert!(transport.published().iter().any(|p| p.topic == "devices/dev-1/virtual/6"));
//! # Ok::<(), pinlink::RuntimeError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`value`] - payload parsing into typed [`Value`]s
//! - [`registry`] - virtual pin handler table
//! - [`scheduler`] - fixed-capacity timer table
//! - [`topic`] - topic naming scheme
//! - [`router`] - inbound message dispatch
//! - [`lifecycle`] - connection state and heartbeat
//! - [`runtime`] - the owning runtime and its `tick()`

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

extern crate alloc;

pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod outbox;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod topic;
pub mod transport;
pub mod value;

use static_assertions::const_assert;

/// Number of addressable virtual pins.
pub const MAX_VIRTUAL_PINS: usize = 256;
/// Number of timer slots.
pub const MAX_TIMERS: usize = 16;
pub const MAX_TOPIC_LEN: usize = 256;
pub const MAX_PAYLOAD_LEN: usize = 2048;
/// Keys kept per parsed object payload.
pub const MAX_VALUE_FIELDS: usize = 16;
/// Outbound publishes queued by callbacks between flushes.
pub const MAX_OUTBOUND: usize = 32;
/// Inbound messages accepted from one transport poll.
pub const MAX_INBOUND: usize = 16;

// heapless index maps require a power-of-two capacity
const_assert!(MAX_VALUE_FIELDS.is_power_of_two());
const_assert!(MAX_TIMERS <= u8::MAX as usize);
const_assert!(MAX_VIRTUAL_PINS <= u16::MAX as usize);

// Re-export main public types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use lifecycle::ConnectionState;
pub use outbox::Outbox;
pub use runtime::DeviceRuntime;
pub use scheduler::TimerHandle;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use transport::{ConnectParams, Inbox, LoopbackTransport, Transport};
pub use value::Value;
