use alloc::boxed::Box;
use alloc::string::{String, ToString};
use heapless::Vec;
use tracing::warn;

use crate::scheduler::{TimerCallback, TimerHandle};
use crate::{MAX_OUTBOUND, MAX_TIMERS};

/// Where an outbound value is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    /// Pin state; remembered by the registry for later syncs.
    VirtualWrite,
    Sensor,
    Notify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub kind: OutboundKind,
    pub pin: usize,
    pub value: String,
}

/// A timer change requested from inside a callback. Applied after the
/// current dispatch or poll pass, so a new timer never fires in the pass
/// that created it.
pub enum TimerRequest {
    Set {
        period_ms: u64,
        repeating: bool,
        callback: TimerCallback,
    },
    Stop(TimerHandle),
}

impl core::fmt::Debug for TimerRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Set { period_ms, repeating, .. } => f
                .debug_struct("Set")
                .field("period_ms", period_ms)
                .field("repeating", repeating)
                .finish_non_exhaustive(),
            Self::Stop(handle) => f.debug_tuple("Stop").field(handle).finish(),
        }
    }
}

/// Work requested from inside handler and timer callbacks.
///
/// Callbacks cannot reach the transport or the timer table while the runtime
/// is dispatching to them, so publishes and timer changes queue here and the
/// runtime applies them after each dispatch pass.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<Outbound, MAX_OUTBOUND>,
    timers: Vec<TimerRequest, MAX_TIMERS>,
    current_timer: Option<TimerHandle>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn virtual_write(&mut self, pin: usize, value: impl ToString) -> bool {
        self.push(OutboundKind::VirtualWrite, pin, value.to_string())
    }

    pub fn send_sensor(&mut self, pin: usize, value: impl ToString) -> bool {
        self.push(OutboundKind::Sensor, pin, value.to_string())
    }

    pub fn notify(&mut self, pin: usize, value: impl ToString) -> bool {
        self.push(OutboundKind::Notify, pin, value.to_string())
    }

    /// Queue a repeating timer. The new timer gets no handle until it runs;
    /// inside its callback [`current_timer`](Self::current_timer) has it.
    pub fn set_timer(&mut self, period_ms: u64, callback: impl FnMut(&mut Outbox) + 'static) -> bool {
        self.push_timer(TimerRequest::Set {
            period_ms,
            repeating: true,
            callback: Box::new(callback),
        })
    }

    pub fn set_timer_once(&mut self, delay_ms: u64, callback: impl FnMut(&mut Outbox) + 'static) -> bool {
        self.push_timer(TimerRequest::Set {
            period_ms: delay_ms,
            repeating: false,
            callback: Box::new(callback),
        })
    }

    pub fn stop_timer(&mut self, handle: TimerHandle) -> bool {
        self.push_timer(TimerRequest::Stop(handle))
    }

    /// Handle of the timer whose callback is running, if any.
    pub fn current_timer(&self) -> Option<TimerHandle> {
        self.current_timer
    }

    pub(crate) fn set_current_timer(&mut self, handle: Option<TimerHandle>) {
        self.current_timer = handle;
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.timers.is_empty()
    }

    /// Hands back every queued publish, oldest first.
    pub fn drain(&mut self) -> Vec<Outbound, MAX_OUTBOUND> {
        core::mem::take(&mut self.pending)
    }

    /// Hands back every queued timer change, oldest first.
    pub fn drain_timers(&mut self) -> Vec<TimerRequest, MAX_TIMERS> {
        core::mem::take(&mut self.timers)
    }

    fn push(&mut self, kind: OutboundKind, pin: usize, value: String) -> bool {
        if self.pending.push(Outbound { kind, pin, value }).is_err() {
            warn!(pin, ?kind, "outbox full, dropping publish");
            return false;
        }
        true
    }

    fn push_timer(&mut self, request: TimerRequest) -> bool {
        if let Err(request) = self.timers.push(request) {
            warn!(?request, "outbox full, dropping timer request");
            return false;
        }
        true
    }
}
