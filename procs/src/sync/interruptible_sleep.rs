// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A timed wait that an external signal can abort early. See [`InterruptibleSleep`]
//! for details.

use std::{fmt,
          sync::{Condvar, Mutex, PoisonError},
          time::{Duration, Instant}};

/// Outcome of [`InterruptibleSleep::sleep_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration passed.
    Elapsed,
    /// [`InterruptibleSleep::interrupt`] fired before (or while) the sleeper waited.
    Interrupted,
}

/// A sleep that any thread can cut short.
///
/// The per-instance stats thread loops on this: it sleeps one measurement period at a
/// time, and shutdown interrupts the sleep so the thread becomes joinable promptly
/// instead of oversleeping into teardown.
///
/// An interrupt is *sticky until consumed*: if [`interrupt`] fires while the sleeper is
/// between sleeps, the next [`sleep_for`] returns [`SleepOutcome::Interrupted`]
/// immediately. Each wakeup consumes exactly one pending interrupt.
///
/// [`interrupt`]: Self::interrupt
/// [`sleep_for`]: Self::sleep_for
pub struct InterruptibleSleep {
    interrupted: Mutex<bool>,
    signal: Condvar,
}

impl Default for InterruptibleSleep {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for InterruptibleSleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptibleSleep").finish_non_exhaustive()
    }
}

impl InterruptibleSleep {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interrupted: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Sleeps for `duration`, or less if [`Self::interrupt`] fires first.
    pub fn sleep_for(&self, duration: Duration) -> SleepOutcome {
        let deadline = Instant::now() + duration;
        let mut interrupted = self
            .interrupted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if *interrupted {
                *interrupted = false;
                return SleepOutcome::Interrupted;
            }
            let now = Instant::now();
            if now >= deadline {
                return SleepOutcome::Elapsed;
            }
            let (guard, _timeout) = self
                .signal
                .wait_timeout(interrupted, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            interrupted = guard;
        }
    }

    /// Aborts the current (or next) [`Self::sleep_for`] call.
    pub fn interrupt(&self) {
        {
            let mut interrupted = self
                .interrupted
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *interrupted = true;
        }
        self.signal.notify_all();
    }
}
