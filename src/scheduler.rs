use alloc::boxed::Box;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};
use crate::outbox::Outbox;
use crate::MAX_TIMERS;

pub type TimerCallback = Box<dyn FnMut(&mut Outbox)>;

/// Slot index of a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerHandle(usize);

impl TimerHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for TimerHandle {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub total_set: u32,
    pub total_fired: u32,
    pub total_stopped: u32,
    pub currently_active: u8,
}

#[derive(Default)]
struct TimerSlot {
    period_ms: u64,
    last_fired_ms: u64,
    callback: Option<TimerCallback>,
    repeating: bool,
}

/// Fixed table of cooperative timers, evaluated once per tick.
///
/// A repeating timer that is polled late fires once and restarts its period
/// from the poll time; missed periods are not replayed.
pub struct TimerScheduler {
    slots: [TimerSlot; MAX_TIMERS],
    stats: SchedulerStats,
}

impl TimerScheduler {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| TimerSlot::default()),
            stats: SchedulerStats::default(),
        }
    }

    /// Register a timer firing every `period_ms`, first at `now + period_ms`.
    pub fn set(&mut self, period_ms: u64, now: u64, callback: TimerCallback) -> Result<TimerHandle> {
        self.insert(period_ms, now, callback, true)
    }

    /// Register a timer firing once, `period_ms` from `now`.
    pub fn once(&mut self, period_ms: u64, now: u64, callback: TimerCallback) -> Result<TimerHandle> {
        self.insert(period_ms, now, callback, false)
    }

    /// Cancel a timer. Unknown, already-stopped and out-of-range handles are
    /// ignored; the return value says whether a live timer was cleared.
    pub fn stop(&mut self, handle: TimerHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return false;
        };
        if slot.callback.take().is_none() {
            return false;
        }
        self.stats.total_stopped += 1;
        self.refresh_active();
        true
    }

    /// Fire every due timer in slot order and return how many fired. Timer
    /// changes the callbacks queue in `outbox` are left for the caller.
    pub fn poll(&mut self, now: u64, outbox: &mut Outbox) -> usize {
        let mut fired = 0;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(callback) = slot.callback.as_mut() else {
                continue;
            };
            if now.saturating_sub(slot.last_fired_ms) < slot.period_ms {
                continue;
            }

            outbox.set_current_timer(Some(TimerHandle(index)));
            callback(outbox);
            outbox.set_current_timer(None);
            fired += 1;

            if slot.repeating {
                slot.last_fired_ms = now;
            } else {
                slot.callback = None;
            }
        }

        if fired > 0 {
            self.stats.total_fired += fired as u32;
            self.refresh_active();
        }
        fired
    }

    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.slots
            .get(handle.index())
            .is_some_and(|slot| slot.callback.is_some())
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.callback.is_some()).count()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Cancel every timer.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.callback = None;
        }
        self.refresh_active();
    }

    fn insert(&mut self, period_ms: u64, now: u64, callback: TimerCallback, repeating: bool) -> Result<TimerHandle> {
        if period_ms == 0 {
            return Err(RuntimeError::InvalidTimerPeriod);
        }

        let index = self
            .slots
            .iter()
            .position(|slot| slot.callback.is_none())
            .ok_or(RuntimeError::TimerTableFull)?;

        self.slots[index] = TimerSlot {
            period_ms,
            last_fired_ms: now,
            callback: Some(callback),
            repeating,
        };

        self.stats.total_set += 1;
        self.refresh_active();

        debug_assert!(
            self.active_count() <= MAX_TIMERS,
            "Timer count {} above capacity {}",
            self.active_count(),
            MAX_TIMERS
        );

        Ok(TimerHandle(index))
    }

    fn refresh_active(&mut self) {
        self.stats.currently_active = self.active_count() as u8;
    }
}

impl Default for TimerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimerScheduler")
            .field("active", &self.active_count())
            .field("stats", &self.stats)
            .finish()
    }
}
