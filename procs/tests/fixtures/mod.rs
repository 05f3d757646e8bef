// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// Each test binary uses a subset of these.
#![allow(dead_code)]

//! Processor types shared by the integration tests.

use r3bl_procs::{Frame, ProcDescriptor, ProcError, ProcFlags, ProcHost, ProcResult,
                 ProcUnit, Settings};
use serde_json::{Value, json};
use std::{sync::{Arc, Mutex,
                 atomic::{AtomicUsize, Ordering}},
          thread,
          time::Duration};

/// Pure pass-through: every hook at its host default.
pub struct Forwarder;

impl ProcUnit for Forwarder {}

pub fn forwarder_descriptor(name: &str, flags: ProcFlags) -> ProcDescriptor {
    ProcDescriptor::new(
        name,
        "pass-through",
        "application/octet-stream",
        flags,
        |_settings| Ok(Box::new(Forwarder)),
    )
}

/// An encoder stand-in with one recognized setting, `bitrate`. Unrecognized settings
/// are silently dropped, both at open and on PUT - which is what lets settings carry
/// over across a type substitution on a best-effort basis.
pub struct TunableEnc {
    bitrate: Mutex<Option<i64>>,
}

impl ProcUnit for TunableEnc {
    fn rest_get(&self) -> Value {
        match *self.bitrate.lock().unwrap() {
            Some(bitrate) => json!({ "settings": { "bitrate": bitrate } }),
            None => json!({ "settings": {} }),
        }
    }

    fn rest_put(&self, settings: &Settings) -> ProcResult<()> {
        if let Some(bitrate) = settings.get_i64("bitrate") {
            *self.bitrate.lock().unwrap() = Some(bitrate);
        }
        Ok(())
    }
}

/// A descriptor for [`TunableEnc`] that counts constructor runs in `opens`, so tests
/// can tell a plain settings PUT apart from a full instance reopen.
pub fn tunable_enc_descriptor(
    name: &str,
    opens: Arc<AtomicUsize>,
) -> ProcDescriptor {
    ProcDescriptor::new(
        name,
        "video_encoder",
        "video/H264",
        ProcFlags::empty(),
        move |settings| {
            opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TunableEnc {
                bitrate: Mutex::new(settings.get_i64("bitrate")),
            }))
        },
    )
}

/// Forwarder that holds each frame for a fixed delay, and pairs output PTS values
/// against the host's input ring on the consumer side.
pub struct DelayedForwarder {
    pub delay: Duration,
}

impl ProcUnit for DelayedForwarder {
    fn process_frame(&self, host: &ProcHost) -> ProcResult<()> {
        let frame = host.input_queue().get()?;
        thread::sleep(self.delay);
        host.output_queue().put(frame).map_err(|rejected| {
            drop(rejected.into_inner());
            ProcError::Unblocked
        })
    }

    fn recv_frame(&self, host: &ProcHost) -> ProcResult<Frame> {
        let frame = host.default_recv()?;
        host.accumulate_latency(frame.pts);
        Ok(frame)
    }
}

pub fn delayed_forwarder_descriptor(name: &str, delay: Duration) -> ProcDescriptor {
    ProcDescriptor::new(
        name,
        "pass-through",
        "application/octet-stream",
        ProcFlags::REGISTER_PTS | ProcFlags::LATENCY,
        move |_settings| Ok(Box::new(DelayedForwarder { delay })),
    )
}
