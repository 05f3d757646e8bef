// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Per-instance statistics bookkeeping: bitrate accumulators, the input-PTS ring, and
//! latency aggregation. The stats thread in
//! [`proc_instance`](super::proc_instance) publishes from these once per
//! [`STATS_PERIOD`].

use std::{sync::{Mutex, OnceLock, PoisonError,
                 atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering}},
          time::{Duration, Instant}};

/// Interval between statistics measurements (1 000 000 µs). Because the bitrate
/// accumulator is drained once per period, the published sample is directly in
/// bits per second.
pub const STATS_PERIOD: Duration = Duration::from_micros(1_000_000);

/// Number of entries in the input-PTS ring.
pub const PTS_RING_LEN: usize = 128;

/// Monotonic nanosecond reading against a process-wide anchor. Only differences are
/// meaningful.
#[must_use]
pub fn monotonic_ns() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    u64::try_from(anchor.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Byte-traffic accumulator for one I/O direction.
///
/// [`account`] runs on the hot path under a short dedicated mutex; once per
/// measurement period the stats thread calls [`publish`], which atomically
/// takes-and-zeroes the accumulator and exposes it as the current bits-per-second
/// sample.
///
/// [`account`]: Self::account
/// [`publish`]: Self::publish
#[derive(Debug, Default)]
pub struct TrafficMeter {
    accumulated_bits: Mutex<u64>,
    published_bps: AtomicU64,
}

impl TrafficMeter {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Adds one frame's payload to the accumulator, shifted to bits.
    pub fn account(&self, bytes: usize) {
        let mut bits = self
            .accumulated_bits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *bits = bits.saturating_add(bytes as u64 * 8);
    }

    /// Drains the accumulator into the published sample.
    pub fn publish(&self) {
        let bits = {
            let mut acc = self
                .accumulated_bits
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *acc)
        };
        self.published_bps.store(bits, Ordering::Relaxed);
    }

    /// The most recently published sample, in bits per second.
    #[must_use]
    pub fn bits_per_sec(&self) -> u64 { self.published_bps.load(Ordering::Relaxed) }
}

/// Circular buffer pairing the last [`PTS_RING_LEN`] input presentation timestamps
/// with the monotonic nanosecond reading at which each was observed.
///
/// The input path writes and the output path scans **without synchronization** - the
/// measurements are advisory, and duplicate or stale matches are tolerated because
/// they never violate bounds. Do not add locking here; it would contend with hot I/O.
#[derive(Debug)]
pub struct PtsRegister {
    entries: [PtsStamp; PTS_RING_LEN],
    next: AtomicUsize,
}

#[derive(Debug)]
struct PtsStamp {
    pts: AtomicI64,
    at_ns: AtomicU64,
}

impl Default for PtsRegister {
    fn default() -> Self { Self::new() }
}

impl PtsRegister {
    /// All entries start at pts = −1 (no observation).
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| PtsStamp {
                pts: AtomicI64::new(-1),
                at_ns: AtomicU64::new(0),
            }),
            next: AtomicUsize::new(0),
        }
    }

    /// Records `pts` as observed at `at_ns`, overwriting the oldest entry.
    pub fn record(&self, pts: i64, at_ns: u64) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % PTS_RING_LEN;
        let entry = &self.entries[index];
        entry.pts.store(pts, Ordering::Relaxed);
        entry.at_ns.store(at_ns, Ordering::Relaxed);
    }

    /// Linear scan for an entry matching `pts`; returns its observation time.
    #[must_use]
    pub fn lookup(&self, pts: i64) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.pts.load(Ordering::Relaxed) == pts)
            .map(|entry| entry.at_ns.load(Ordering::Relaxed))
    }
}

/// Input-to-output latency aggregation.
///
/// The output path calls [`accumulate`] with each matched delay; the stats thread
/// calls [`publish`] once per period to fold the window into the published
/// average/min/max microsecond figures. −1 means "no sample yet".
///
/// [`accumulate`]: Self::accumulate
/// [`publish`]: Self::publish
#[derive(Debug)]
pub struct LatencyMeter {
    window: Mutex<LatencyWindow>,
    avg_usec: AtomicI64,
    min_usec: AtomicI64,
    max_usec: AtomicI64,
}

#[derive(Debug, Default)]
struct LatencyWindow {
    accumulated_ns: u64,
    count: u64,
}

impl Default for LatencyMeter {
    fn default() -> Self { Self::new() }
}

impl LatencyMeter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: Mutex::new(LatencyWindow::default()),
            avg_usec: AtomicI64::new(-1),
            min_usec: AtomicI64::new(-1),
            max_usec: AtomicI64::new(-1),
        }
    }

    /// Adds one observed input→output delay to the current window.
    pub fn accumulate(&self, delta_ns: u64) {
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        window.accumulated_ns = window.accumulated_ns.saturating_add(delta_ns);
        window.count += 1;
    }

    /// Folds the window into the published figures, then resets it. A window with no
    /// samples leaves the published figures untouched.
    pub fn publish(&self) {
        let average_ns = {
            let mut window = self
                .window
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if window.count == 0 {
                return;
            }
            let average = window.accumulated_ns / window.count;
            *window = LatencyWindow::default();
            average
        };

        let average_usec = i64::try_from(average_ns / 1_000).unwrap_or(i64::MAX);
        self.avg_usec.store(average_usec, Ordering::Relaxed);

        let min = self.min_usec.load(Ordering::Relaxed);
        if min < 0 || average_usec < min {
            self.min_usec.store(average_usec, Ordering::Relaxed);
        }
        let max = self.max_usec.load(Ordering::Relaxed);
        if max < 0 || average_usec > max {
            self.max_usec.store(average_usec, Ordering::Relaxed);
        }
    }

    /// Last published average in microseconds, if any window has been published.
    #[must_use]
    pub fn average_usec(&self) -> Option<i64> {
        let value = self.avg_usec.load(Ordering::Relaxed);
        (value >= 0).then_some(value)
    }

    #[must_use]
    pub fn min_usec(&self) -> Option<i64> {
        let value = self.min_usec.load(Ordering::Relaxed);
        (value >= 0).then_some(value)
    }

    #[must_use]
    pub fn max_usec(&self) -> Option<i64> {
        let value = self.max_usec.load(Ordering::Relaxed);
        (value >= 0).then_some(value)
    }
}
