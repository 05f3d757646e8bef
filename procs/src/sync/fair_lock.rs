// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Mutual exclusion that serves waiters in arrival order. See [`FairMutex`] for
//! details.

use std::{fmt,
          sync::{Condvar, Mutex, PoisonError}};

/// A FIFO-fair mutual exclusion primitive (ticket lock).
///
/// [`std::sync::Mutex`] makes no promise about which waiter is woken next, so a thread
/// performing a rare control operation (slot substitution, instance deletion) can be
/// starved indefinitely by a stream of I/O threads re-acquiring the same lock. This
/// lock hands out monotonically increasing tickets and serves them in order, which
/// bounds every waiter's delay by the number of threads already in line.
///
/// Two users in this crate:
///
/// 1. The registry takes **both** of a slot's direction gates to swap the slot's
///    instance atomically with respect to in-flight I/O.
/// 2. Each processor instance separates control paths from per-direction I/O paths, so
///    a hook swap during reconfiguration cannot race an in-flight send.
pub struct FairMutex {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

struct Tickets {
    /// Next ticket to hand out.
    next: u64,
    /// Ticket currently allowed to hold the lock.
    serving: u64,
}

/// RAII guard for [`FairMutex`]. Advances the serving counter and wakes waiters on
/// drop.
pub struct FairMutexGuard<'a> {
    lock: &'a FairMutex,
}

impl Default for FairMutex {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for FairMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FairMutex").finish_non_exhaustive()
    }
}

impl fmt::Debug for FairMutexGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FairMutexGuard").finish_non_exhaustive()
    }
}

impl FairMutex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tickets: Mutex::new(Tickets { next: 0, serving: 0 }),
            turn: Condvar::new(),
        }
    }

    /// Acquires the lock, waiting behind every thread that asked before this one.
    pub fn lock(&self) -> FairMutexGuard<'_> {
        let mut tickets = self
            .tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let my_ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != my_ticket {
            tickets = self
                .turn
                .wait(tickets)
                .unwrap_or_else(PoisonError::into_inner);
        }
        FairMutexGuard { lock: self }
    }
}

impl Drop for FairMutexGuard<'_> {
    fn drop(&mut self) {
        let mut tickets = self
            .lock
            .tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tickets.serving += 1;
        drop(tickets);
        // Every waiter re-checks whose turn it is.
        self.lock.turn.notify_all();
    }
}
