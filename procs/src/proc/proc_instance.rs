// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The generic host that runs one live processor: worker thread, queue pair, stats
//! thread, and the uniform control surface. See [`ProcInstance`] for the lifecycle and
//! [`ProcHost`] for the facilities hooks can reach.

use super::{proc_descriptor::{ProcDescriptor, ProcFlags, ProcUnit},
            proc_stats::{LatencyMeter, PtsRegister, STATS_PERIOD, TrafficMeter,
                         monotonic_ns}};
use crate::{BoundedQueue, FairMutex, Frame, InterruptibleSleep, ProcError, ProcResult,
            Settings};
use serde_json::{Map, Value, json};
use std::{sync::{Arc, Mutex, MutexGuard, PoisonError,
                 atomic::{AtomicBool, Ordering}},
          thread::JoinHandle};

/// Key the host prepends to a state tree when the `LATENCY` feature is on.
pub const KEY_LATENCY_AVG_USEC: &str = "latency_avg_usec";

/// Key of the type-private settings object inside a state tree.
pub const KEY_SETTINGS: &str = "settings";

/// The common header of every live processor - the part of the instance the host owns
/// and every hook can see.
///
/// Hooks receive `&ProcHost` so a specialization can reuse the host's bookkeeping
/// (PTS registration, latency pairing, traffic accounting) and its queue pair while
/// overriding only the behavior it cares about.
#[derive(Debug)]
pub struct ProcHost {
    descriptor: ProcDescriptor,
    slot_index: usize,
    input_queue: BoundedQueue<Frame>,
    output_queue: BoundedQueue<Frame>,
    /// Orders producers among themselves and against slot mutation.
    pub(crate) input_gate: FairMutex,
    /// Orders consumers likewise.
    pub(crate) output_gate: FairMutex,
    /// Serializes all control operations on this instance.
    ctl_lock: Mutex<()>,
    input_traffic: TrafficMeter,
    output_traffic: TrafficMeter,
    pts_register: PtsRegister,
    latency: LatencyMeter,
    exit_flag: AtomicBool,
    stats_tick: InterruptibleSleep,
}

impl ProcHost {
    #[must_use]
    pub fn descriptor(&self) -> &ProcDescriptor { &self.descriptor }

    /// The instance's registry handle.
    #[must_use]
    pub fn slot_index(&self) -> usize { self.slot_index }

    #[must_use]
    pub fn input_queue(&self) -> &BoundedQueue<Frame> { &self.input_queue }

    #[must_use]
    pub fn output_queue(&self) -> &BoundedQueue<Frame> { &self.output_queue }

    /// Default `process_frame`: move one element from input to output. No
    /// duplication - the queue owns the element throughout. A rejected put releases
    /// the element.
    ///
    /// # Errors
    ///
    /// [`ProcError::Unblocked`] when either queue is in unblocked mode.
    pub fn forward_one(&self) -> ProcResult<()> {
        let frame = self.input_queue.get()?;
        self.output_queue
            .put(frame)
            .map_err(|rejected| {
                drop(rejected.into_inner());
                ProcError::Unblocked
            })
    }

    /// Default `send_frame` body: PTS registration and byte accounting per the type's
    /// feature flags, then a duplicate into the input queue (the caller keeps the
    /// original).
    ///
    /// # Errors
    ///
    /// [`ProcError::Unblocked`] when the input queue is in unblocked mode.
    pub fn default_send(&self, frame: &Frame) -> ProcResult<()> {
        let flags = self.descriptor.flags;
        if flags.contains(ProcFlags::REGISTER_PTS | ProcFlags::LATENCY) {
            self.register_input_pts(frame.pts);
        }
        if flags.contains(ProcFlags::BITRATE) {
            self.input_traffic.account(frame.payload_len());
        }
        self.input_queue.put_dup(frame)
    }

    /// Default `recv_frame` body: take from the output queue, then account bytes if
    /// the `BITRATE` feature is on.
    ///
    /// # Errors
    ///
    /// [`ProcError::Unblocked`] when the output queue is in unblocked mode.
    pub fn default_recv(&self) -> ProcResult<Frame> {
        let frame = self.output_queue.get()?;
        if self.descriptor.flags.contains(ProcFlags::BITRATE) {
            self.output_traffic.account(frame.payload_len());
        }
        Ok(frame)
    }

    /// Records an input PTS paired with the current monotonic reading.
    pub fn register_input_pts(&self, pts: i64) {
        self.pts_register.record(pts, monotonic_ns());
    }

    /// Pairs an output frame's PTS against the input ring and accumulates the delay.
    /// Called by specializations when a frame leaves the system. The scan is lock-free
    /// against the writer; stale matches are tolerated.
    pub fn accumulate_latency(&self, output_pts: i64) {
        if let Some(then_ns) = self.pts_register.lookup(output_pts) {
            let now_ns = monotonic_ns();
            if now_ns > then_ns {
                self.latency.accumulate(now_ns - then_ns);
            }
        }
    }

    /// Adds `bytes` to the input-direction accumulator (for send hooks that bypass
    /// [`Self::default_send`]).
    pub fn account_input(&self, bytes: usize) { self.input_traffic.account(bytes); }

    /// As [`Self::account_input`] for the output direction.
    pub fn account_output(&self, bytes: usize) { self.output_traffic.account(bytes); }

    /// Last published input bitrate sample, bits per second.
    #[must_use]
    pub fn input_bits_per_sec(&self) -> u64 { self.input_traffic.bits_per_sec() }

    /// Last published output bitrate sample, bits per second.
    #[must_use]
    pub fn output_bits_per_sec(&self) -> u64 { self.output_traffic.bits_per_sec() }

    /// Last published average latency in microseconds, if any.
    #[must_use]
    pub fn latency_avg_usec(&self) -> Option<i64> { self.latency.average_usec() }

    #[must_use]
    pub fn exit_requested(&self) -> bool { self.exit_flag.load(Ordering::SeqCst) }

    /// Asks the worker (and stats) thread to exit at the next check.
    pub fn request_exit(&self) { self.exit_flag.store(true, Ordering::SeqCst); }

    /// Puts both queues into unblocked mode, bouncing every blocked producer and
    /// consumer with [`ProcError::Unblocked`].
    pub fn unblock_queues(&self) {
        self.input_queue.set_blocking_mode(false);
        self.output_queue.set_blocking_mode(false);
    }

    fn lock_ctl(&self) -> MutexGuard<'_, ()> {
        self.ctl_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A live processor: the host header, the type's specialization, and the two threads
/// the host runs for it.
///
/// All operations are safe to call concurrently except [`open`] and [`close`], which
/// bracket the lifetime. Producers call [`send_frame`], consumers call [`recv_frame`],
/// controllers use the `ctl_*` verbs - all at once, against the same instance.
///
/// [`open`]: Self::open
/// [`close`]: Self::close
/// [`send_frame`]: Self::send_frame
/// [`recv_frame`]: Self::recv_frame
pub struct ProcInstance {
    /// Declared before `host`: fields drop in declaration order, and the
    /// specialization must be torn down while the host's locks are still alive.
    unit: Arc<dyn ProcUnit>,
    host: Arc<ProcHost>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProcInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcInstance")
            .field("name", &self.host.descriptor.name)
            .field("slot_index", &self.host.slot_index)
            .finish_non_exhaustive()
    }
}

impl ProcInstance {
    /// Constructs and starts a processor: parse settings, run the type's constructor
    /// hook (which may reject them), initialize the queue pair with the type's element
    /// duplicators, then spawn the stats thread (only when a stats feature flag is
    /// set) and the worker thread. Any failure unwinds the steps already taken, in
    /// inverse order.
    ///
    /// # Errors
    ///
    /// [`ProcError::Invalid`] for rejected or malformed settings;
    /// [`ProcError::OutOfMemory`] when a thread cannot be spawned.
    pub fn open(
        descriptor: &ProcDescriptor,
        settings_str: &str,
        slot_index: usize,
        queue_capacities: [usize; 2],
    ) -> ProcResult<Self> {
        let settings = Settings::parse(settings_str)?;
        let unit: Arc<dyn ProcUnit> = Arc::from(descriptor.build(&settings)?);

        let input_queue = match descriptor.input_dup() {
            Some(dup) => BoundedQueue::with_duplicator(queue_capacities[0], dup),
            None => BoundedQueue::new(queue_capacities[0]),
        };
        let output_queue = match descriptor.output_dup() {
            Some(dup) => BoundedQueue::with_duplicator(queue_capacities[1], dup),
            None => BoundedQueue::new(queue_capacities[1]),
        };

        let host = Arc::new(ProcHost {
            descriptor: descriptor.clone(),
            slot_index,
            input_queue,
            output_queue,
            input_gate: FairMutex::new(),
            output_gate: FairMutex::new(),
            ctl_lock: Mutex::new(()),
            input_traffic: TrafficMeter::new(),
            output_traffic: TrafficMeter::new(),
            pts_register: PtsRegister::new(),
            latency: LatencyMeter::new(),
            exit_flag: AtomicBool::new(false),
            stats_tick: InterruptibleSleep::new(),
        });

        let stats = if descriptor.flags.needs_stats_thread() {
            let host_for_stats = Arc::clone(&host);
            let handle = std::thread::Builder::new()
                .name(format!("proc-{slot_index}-stats"))
                .spawn(move || stats_loop(&host_for_stats))
                .map_err(|_| ProcError::OutOfMemory)?;
            Some(handle)
        } else {
            None
        };

        let worker = {
            let host_for_worker = Arc::clone(&host);
            let unit_for_worker = Arc::clone(&unit);
            let spawned = std::thread::Builder::new()
                .name(format!("proc-{slot_index}-worker"))
                .spawn(move || worker_loop(&host_for_worker, &*unit_for_worker));
            match spawned {
                Ok(handle) => handle,
                Err(_) => {
                    // Unwind the stats thread before surfacing the failure.
                    host.request_exit();
                    host.stats_tick.interrupt();
                    if let Some(handle) = stats {
                        let _unused = handle.join();
                    }
                    return Err(ProcError::OutOfMemory);
                }
            }
        };

        tracing::debug!(
            "proc '{}' opened on slot {}",
            descriptor.name,
            slot_index
        );

        Ok(Self {
            unit,
            host,
            worker: Mutex::new(Some(worker)),
            stats: Mutex::new(stats),
        })
    }

    #[must_use]
    pub fn host(&self) -> &ProcHost { &self.host }

    /// The instance's type name.
    #[must_use]
    pub fn name(&self) -> &str { &self.host.descriptor.name }

    /// Stops the instance. The order is load-bearing:
    ///
    /// 1. set the exit flag;
    /// 2. force both queues into unblocked mode (wakes blocked producers/consumers);
    /// 3. call the type's `unblock` hook (wakes anyone stuck inside a hook);
    /// 4. join the worker;
    /// 5. interrupt the stats sleep and join the stats thread.
    ///
    /// The specialization itself is dropped only when the last reference to the
    /// instance goes away - after the joins, so it never observes an outstanding
    /// thread, and while the host's locks are still alive.
    ///
    /// Idempotent; concurrent calls are safe.
    pub fn close(&self) {
        self.host.request_exit();
        self.host.unblock_queues();
        self.unit.unblock();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            let _unused = handle.join();
        }

        self.host.stats_tick.interrupt();
        let stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = stats {
            let _unused = handle.join();
        }

        tracing::debug!(
            "proc '{}' closed on slot {}",
            self.host.descriptor.name,
            self.host.slot_index
        );
    }

    /// Producer verb. Takes the input-direction fair lock, then dispatches to the
    /// type's `send_frame` hook (host default unless overridden).
    ///
    /// # Errors
    ///
    /// [`ProcError::Unblocked`] during shutdown or slot mutation; otherwise whatever
    /// the hook returns.
    pub fn send_frame(&self, frame: &Frame) -> ProcResult<()> {
        let _gate = self.host.input_gate.lock();
        self.unit.send_frame(&self.host, frame)
    }

    /// Consumer verb. Takes the output-direction fair lock, then dispatches to the
    /// type's `recv_frame` hook.
    ///
    /// # Errors
    ///
    /// [`ProcError::Unblocked`] during shutdown or slot mutation; otherwise whatever
    /// the hook returns.
    pub fn recv_frame(&self) -> ProcResult<Frame> {
        let _gate = self.host.output_gate.lock();
        self.unit.recv_frame(&self.host)
    }

    /// Control verb: force both queues unblocked, then let the type wake anything
    /// stuck inside its own hooks.
    pub fn ctl_unblock(&self) {
        let _ctl = self.host.lock_ctl();
        self.unblock_locked();
    }

    /// Control verb: the instance's state tree. The type's `rest_get` output, with
    /// `latency_avg_usec` prepended when the `LATENCY` feature is on.
    ///
    /// # Errors
    ///
    /// Currently infallible in the host; typed as a result so specializations can
    /// grow failure modes behind the same verb.
    pub fn ctl_get(&self) -> ProcResult<Value> {
        let _ctl = self.host.lock_ctl();
        Ok(self.get_locked())
    }

    /// Control verb: parse a dual-form settings payload and forward it to the type's
    /// `rest_put` hook.
    ///
    /// # Errors
    ///
    /// [`ProcError::Invalid`] for a malformed payload; [`ProcError::NotFound`] when
    /// the type has no settings surface.
    pub fn ctl_put(&self, settings_str: &str) -> ProcResult<()> {
        let _ctl = self.host.lock_ctl();
        let settings = Settings::parse(settings_str)?;
        self.unit.rest_put(&settings)
    }

    /// Uniform control dispatcher. `"UNBLOCK"`, `"GET"`, and `"PUT"` route to the
    /// corresponding verbs; any other tag is forwarded to the type's generic `opt`
    /// hook. Tags match by full equality.
    ///
    /// # Errors
    ///
    /// [`ProcError::Invalid`] when `"PUT"` arrives without a payload;
    /// [`ProcError::NotFound`] for a tag the type does not handle.
    pub fn ctl_opt(&self, tag: &str, arg: Option<&str>) -> ProcResult<Option<String>> {
        let _ctl = self.host.lock_ctl();
        match tag {
            "UNBLOCK" => {
                self.unblock_locked();
                Ok(None)
            }
            "GET" => Ok(Some(self.get_locked().to_string())),
            "PUT" => {
                let raw = arg.ok_or(ProcError::Invalid)?;
                let settings = Settings::parse(raw)?;
                self.unit.rest_put(&settings)?;
                Ok(None)
            }
            _ => self.unit.opt(tag, arg),
        }
    }

    fn unblock_locked(&self) {
        self.host.unblock_queues();
        self.unit.unblock();
    }

    fn get_locked(&self) -> Value {
        let tree = self.unit.rest_get();
        if !self.host.descriptor.flags.contains(ProcFlags::LATENCY) {
            return tree;
        }
        let latency = self.host.latency.average_usec().unwrap_or(-1);
        let mut merged = Map::new();
        merged.insert(KEY_LATENCY_AVG_USEC.into(), json!(latency));
        if let Value::Object(type_tree) = tree {
            merged.extend(type_tree);
        }
        Value::Object(merged)
    }
}

impl Drop for ProcInstance {
    fn drop(&mut self) { self.close(); }
}

/// Worker thread body. A non-success from `process_frame` is either terminal (`Eof` ⇒
/// set the exit flag) or transient (yield to the scheduler to avoid a busy closed
/// loop). The worker never panics the process on a hook failure.
fn worker_loop(host: &ProcHost, unit: &dyn ProcUnit) {
    tracing::debug!("worker started for slot {}", host.slot_index);
    loop {
        if host.exit_requested() {
            break;
        }
        match unit.process_frame(host) {
            Ok(()) => {}
            Err(ProcError::Eof) => host.request_exit(),
            Err(_) => std::thread::yield_now(),
        }
    }
    tracing::debug!("worker exiting for slot {}", host.slot_index);
}

/// Stats thread body: one interruptible measurement period per cycle, then publish
/// per the type's feature flags.
fn stats_loop(host: &ProcHost) {
    loop {
        if host.exit_requested() {
            break;
        }
        host.stats_tick.sleep_for(STATS_PERIOD);
        if host.exit_requested() {
            break;
        }
        let flags = host.descriptor.flags;
        if flags.contains(ProcFlags::BITRATE) {
            host.input_traffic.publish();
            host.output_traffic.publish();
        }
        if flags.contains(ProcFlags::LATENCY) {
            host.latency.publish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Pure pass-through: every hook at its host default.
    struct Forwarder;
    impl ProcUnit for Forwarder {}

    fn forwarder_descriptor(flags: ProcFlags) -> ProcDescriptor {
        ProcDescriptor::new(
            "forwarder",
            "test",
            "application/octet-stream",
            flags,
            |_settings| Ok(Box::new(Forwarder)),
        )
    }

    #[test]
    fn frames_flow_through_in_fifo_order() {
        let descriptor = forwarder_descriptor(ProcFlags::empty());
        let instance = ProcInstance::open(&descriptor, "", 0, [2, 2]).unwrap();

        for pts in [100, 200, 300] {
            instance
                .send_frame(&Frame::from_bytes(vec![0u8; 16], pts))
                .unwrap();
        }
        let received: Vec<i64> =
            (0..3).map(|_| instance.recv_frame().unwrap().pts).collect();
        assert_eq!(received, vec![100, 200, 300]);

        instance.close();
    }

    #[test]
    fn eof_from_process_frame_terminates_worker() {
        struct OneShot {
            remaining: AtomicUsize,
        }
        impl ProcUnit for OneShot {
            fn process_frame(&self, host: &ProcHost) -> ProcResult<()> {
                if self.remaining.fetch_sub(1, Ordering::SeqCst) <= 1 {
                    return Err(ProcError::Eof);
                }
                host.forward_one()
            }
        }

        let descriptor = ProcDescriptor::new(
            "one-shot",
            "test",
            "application/octet-stream",
            ProcFlags::empty(),
            |_settings| {
                Ok(Box::new(OneShot { remaining: AtomicUsize::new(2) }))
            },
        );
        let instance = ProcInstance::open(&descriptor, "", 3, [2, 2]).unwrap();
        instance
            .send_frame(&Frame::from_bytes(vec![1, 2, 3], 7))
            .unwrap();
        assert_eq!(instance.recv_frame().unwrap().pts, 7);

        // The worker sets the exit flag on Eof; close() then joins promptly.
        instance.close();
        assert!(instance.host().exit_requested());
    }

    #[test]
    fn state_tree_carries_latency_field_when_feature_is_on() {
        let with = forwarder_descriptor(ProcFlags::LATENCY);
        let instance = ProcInstance::open(&with, "", 0, [2, 2]).unwrap();
        let tree = instance.ctl_get().unwrap();
        // No window published yet.
        assert_eq!(tree[KEY_LATENCY_AVG_USEC], json!(-1));
        instance.close();

        let without = forwarder_descriptor(ProcFlags::empty());
        let instance = ProcInstance::open(&without, "", 0, [2, 2]).unwrap();
        let tree = instance.ctl_get().unwrap();
        assert!(tree.get(KEY_LATENCY_AVG_USEC).is_none());
        instance.close();
    }

    #[test]
    fn unknown_tag_without_hook_is_not_found() {
        let descriptor = forwarder_descriptor(ProcFlags::empty());
        let instance = ProcInstance::open(&descriptor, "", 0, [2, 2]).unwrap();
        assert_eq!(
            instance.ctl_opt("FLUSH", None).unwrap_err(),
            ProcError::NotFound
        );
        instance.close();
    }

    #[test]
    fn close_is_idempotent() {
        let descriptor = forwarder_descriptor(ProcFlags::BITRATE);
        let instance = ProcInstance::open(&descriptor, "", 0, [2, 2]).unwrap();
        instance.close();
        instance.close();
    }

    #[test]
    fn rejected_settings_fail_open() {
        let descriptor = ProcDescriptor::new(
            "picky",
            "test",
            "application/octet-stream",
            ProcFlags::empty(),
            |settings| {
                if settings.contains_key("bad") {
                    return Err(ProcError::Invalid);
                }
                Ok(Box::new(Forwarder) as Box<dyn ProcUnit>)
            },
        );
        assert_eq!(
            ProcInstance::open(&descriptor, "bad=1", 0, [2, 2]).unwrap_err(),
            ProcError::Invalid
        );
    }
}
