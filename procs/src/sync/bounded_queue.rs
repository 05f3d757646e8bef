// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Fixed-capacity blocking FIFO of opaque elements. See [`BoundedQueue`] for details.

use crate::{ProcError, ProcResult};
use std::{collections::VecDeque,
          fmt,
          sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError}};

/// Hook that copies an element on [`BoundedQueue::put_dup`]. Installed per queue at
/// construction time; when absent the element's [`Clone`] impl is used.
pub type Duplicator<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// A bounded blocking queue with an *unblock mode* that breaks waiting threads out of
/// both ends.
///
/// One producer and one consumer proceed in parallel (internal mutex plus two condition
/// variables). The push-when-full policy is to block, never to drop silently.
///
/// # Ownership
///
/// - [`put`] is a move: on success the queue owns the element. On failure the element
///   is handed back inside [`QueueRejected`], so the caller keeps ownership and is
///   responsible for releasing it.
/// - [`put_dup`] copies the element through the installed [`Duplicator`] (or [`Clone`])
///   and the caller keeps the original.
/// - [`get`] transfers ownership out to the caller.
///
/// # Unblock mode
///
/// [`set_blocking_mode`]`(false)` is the sole cancellation path: both [`put`] and
/// [`get`] return immediately with an unblocked status, without touching queue
/// contents. The mode is idempotent and permanent until reset with
/// [`set_blocking_mode`]`(true)`. Shutdown uses it to break worker threads out of
/// blocking I/O.
///
/// [`put`]: Self::put
/// [`put_dup`]: Self::put_dup
/// [`get`]: Self::get
/// [`set_blocking_mode`]: Self::set_blocking_mode
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    duplicator: Option<Duplicator<T>>,
}

struct QueueState<T> {
    items: VecDeque<T>,
    blocking: bool,
}

/// Returned by [`BoundedQueue::put`] when the queue is in unblocked mode. Carries the
/// rejected element back to the caller, which retains ownership.
pub struct QueueRejected<T>(T);

impl<T> QueueRejected<T> {
    /// Recovers the element the queue refused to take.
    pub fn into_inner(self) -> T { self.0 }
}

impl<T> fmt::Debug for QueueRejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueRejected(..)")
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` elements, in blocking mode.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero. (The C ancestry reserves zero for "unlimited chunk
    /// size", which this runtime does not use.)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be non-zero");
        Self {
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                blocking: true,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            duplicator: None,
        }
    }

    /// As [`Self::new`], with a [`Duplicator`] hook that [`Self::put_dup`] will use
    /// instead of [`Clone`].
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    #[must_use]
    pub fn with_duplicator(capacity: usize, duplicator: Duplicator<T>) -> Self {
        let mut it = Self::new(capacity);
        it.duplicator = Some(duplicator);
        it
    }

    #[must_use]
    pub fn capacity(&self) -> usize { self.capacity }

    #[must_use]
    pub fn len(&self) -> usize { self.lock_state().items.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.lock_state().items.is_empty() }

    /// Enqueues `elem`, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// [`QueueRejected`] when the queue is in unblocked mode; the element is handed
    /// back and the queue takes no ownership.
    pub fn put(&self, elem: T) -> Result<(), QueueRejected<T>> {
        let mut state = self.lock_state();
        loop {
            if !state.blocking {
                return Err(QueueRejected(elem));
            }
            if state.items.len() < self.capacity {
                break;
            }
            state = self.wait(&self.not_full, state);
        }
        state.items.push_back(elem);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the oldest element, blocking while the queue is empty.
    ///
    /// # Errors
    ///
    /// [`ProcError::Unblocked`] when the queue is in unblocked mode. Contents are left
    /// untouched - a drained consumer unwinds without consuming.
    pub fn get(&self) -> ProcResult<T> {
        let mut state = self.lock_state();
        loop {
            if !state.blocking {
                return Err(ProcError::Unblocked);
            }
            if let Some(elem) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(elem);
            }
            state = self.wait(&self.not_empty, state);
        }
    }

    /// Switches blocking mode. `false` puts the queue into unblock mode (wakes every
    /// waiter on both ends); `true` restores normal blocking operation.
    pub fn set_blocking_mode(&self, blocking: bool) {
        {
            let mut state = self.lock_state();
            state.blocking = blocking;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(
        &self,
        cv: &Condvar,
        guard: MutexGuard<'a, QueueState<T>>,
    ) -> MutexGuard<'a, QueueState<T>> {
        cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// Enqueues a copy of `elem`, made by the installed [`Duplicator`] (or [`Clone`]
    /// when none is installed). Blocks while the queue is full. The caller keeps the
    /// original.
    ///
    /// # Errors
    ///
    /// [`ProcError::Unblocked`] when the queue is in unblocked mode.
    pub fn put_dup(&self, elem: &T) -> ProcResult<()> {
        let copy = match &self.duplicator {
            Some(dup) => dup(elem),
            None => elem.clone(),
        };
        self.put(copy).map_err(|_| ProcError::Unblocked)
    }
}
