//! Millisecond time base
//!
//! A single [Clock] is advanced by a fixed 1ms timer interrupt and read by
//! everyone else. The count wraps, so elapsed time is always computed with
//! wrapping subtraction, which is correct for any pair of ticks less than
//! `u32::MAX` milliseconds (~49 days) apart.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_time::Duration;

/// A snapshot of the millisecond counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct Tick(pub u32);

impl Tick {
    /// Milliseconds from `earlier` to `self`, wrap-safe
    #[inline]
    pub fn millis_since(self, earlier: Tick) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// The tick `ms` milliseconds after this one
    #[inline]
    pub fn wrapping_add_millis(self, ms: u32) -> Tick {
        Tick(self.0.wrapping_add(ms))
    }
}

/// Convert a [Duration] to whole milliseconds, saturating at `u32::MAX`
#[inline]
pub fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

/// The process-wide millisecond counter
///
/// Intended to be used as a static:
///
/// ```rust
/// use bacnet_field_io::clock::Clock;
///
/// static CLOCK: Clock = Clock::new();
///
/// // in the 1ms timer interrupt:
/// CLOCK.on_tick();
///
/// // anywhere else:
/// let now = CLOCK.now();
/// ```
pub struct Clock {
    ms: AtomicU32,
}

impl Clock {
    /// Create a clock starting at zero
    pub const fn new() -> Self {
        Self {
            ms: AtomicU32::new(0),
        }
    }

    /// Advance the clock by one millisecond.
    ///
    /// Must only be called from the timer interrupt. Only `load` and `store`
    /// are used, as the timer interrupt is the only writer, so this works on
    /// targets without CAS atomics.
    #[inline]
    pub fn on_tick(&self) {
        let now = self.ms.load(Ordering::Relaxed);
        self.ms.store(now.wrapping_add(1), Ordering::Release);
    }

    /// The current tick
    #[inline]
    pub fn now(&self) -> Tick {
        Tick(self.ms.load(Ordering::Acquire))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// An interval timer measured against the millisecond [Clock]
///
/// The timer holds no reference to the clock; every query takes the current
/// tick so it can be used from any context and tested without a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsTimer {
    start: Tick,
    interval: u32,
}

impl MsTimer {
    /// Start a timer of `interval` at `now`
    pub fn new(now: Tick, interval: Duration) -> Self {
        Self {
            start: now,
            interval: millis(interval),
        }
    }

    /// Restart the timer at `now` with a new interval
    pub fn set(&mut self, now: Tick, interval: Duration) {
        self.start = now;
        self.interval = millis(interval);
    }

    /// Has the interval elapsed?
    pub fn expired(&self, now: Tick) -> bool {
        now.millis_since(self.start) >= self.interval
    }

    /// Restart the timer at `now`, keeping the interval
    pub fn reset(&mut self, now: Tick) {
        self.start = now;
    }

    /// Advance the start by one interval, keeping a periodic timer in phase
    /// even if it was serviced late.
    pub fn restart(&mut self) {
        self.start = self.start.wrapping_add_millis(self.interval);
    }

    /// Force the timer to report expired at `now`
    pub fn expire(&mut self, now: Tick) {
        self.start = Tick(now.0.wrapping_sub(self.interval));
    }

    /// Milliseconds since the timer was (re)started
    pub fn elapsed(&self, now: Tick) -> u32 {
        now.millis_since(self.start)
    }

    /// Milliseconds until expiry, zero once expired
    pub fn remaining(&self, now: Tick) -> u32 {
        self.interval.saturating_sub(self.elapsed(now))
    }

    /// The configured interval in milliseconds
    pub fn interval(&self) -> u32 {
        self.interval
    }
}
