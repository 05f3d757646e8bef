// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Published statistics: bitrate sampling and latency pairing. These drive real
//! worker/stats threads against the one-second measurement period, so the bounds are
//! deliberately loose - the deterministic arithmetic is covered by the unit tests of
//! the meters themselves.

mod fixtures;

use fixtures::{delayed_forwarder_descriptor, forwarder_descriptor};
use r3bl_procs::{Frame, ProcFlags, ProcInstance};
use std::{sync::{Arc,
                 atomic::{AtomicBool, Ordering}},
          thread,
          time::{Duration, Instant}};

/// Streams ~100 KB/s through a forwarder for a few measurement periods and checks
/// the published input bitrate sample is in the right region.
#[test]
fn input_bitrate_sample_tracks_the_stream() {
    const FRAME_BYTES: usize = 2_000;
    const SEND_PERIOD: Duration = Duration::from_millis(20);
    // 2 000 B / 20 ms = 100 kB/s = 800 kbit/s.
    const EXPECTED_BPS: u64 = 800_000;

    let descriptor = forwarder_descriptor("meter", ProcFlags::BITRATE);
    let instance =
        Arc::new(ProcInstance::open(&descriptor, "", 0, [2, 2]).unwrap());

    let stop = Arc::new(AtomicBool::new(false));
    let consumer = {
        let instance = Arc::clone(&instance);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let _unused = instance.recv_frame();
            }
        })
    };

    let started = Instant::now();
    let mut best_sample = 0u64;
    let mut pts = 0;
    while started.elapsed() < Duration::from_millis(2_600) {
        pts += 1;
        instance
            .send_frame(&Frame::from_bytes(vec![0u8; FRAME_BYTES], pts))
            .unwrap();
        best_sample = best_sample.max(instance.host().input_bits_per_sec());
        thread::sleep(SEND_PERIOD);
    }

    stop.store(true, Ordering::SeqCst);
    instance.close();
    consumer.join().unwrap();

    assert!(
        best_sample > EXPECTED_BPS / 2 && best_sample < EXPECTED_BPS * 2,
        "published sample {best_sample} b/s is not near {EXPECTED_BPS} b/s"
    );
}

/// A forwarder that delays each frame ~40 ms must publish an average latency in
/// that region once the stats thread has sampled a full window.
#[test]
fn latency_average_tracks_the_pipeline_delay() {
    const DELAY: Duration = Duration::from_millis(40);

    let descriptor = delayed_forwarder_descriptor("laggy", DELAY);
    let instance =
        Arc::new(ProcInstance::open(&descriptor, "", 0, [2, 2]).unwrap());

    let stop = Arc::new(AtomicBool::new(false));
    let consumer = {
        let instance = Arc::clone(&instance);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let _unused = instance.recv_frame();
            }
        })
    };

    let started = Instant::now();
    let mut pts = 0;
    while started.elapsed() < Duration::from_millis(2_600) {
        pts += 1;
        instance
            .send_frame(&Frame::from_bytes(vec![0u8; 64], pts))
            .unwrap();
        thread::sleep(DELAY);
    }

    let published = instance.host().latency_avg_usec();
    stop.store(true, Ordering::SeqCst);
    instance.close();
    consumer.join().unwrap();

    let average = published.expect("stats thread should have published a window");
    assert!(
        (20_000..=500_000).contains(&average),
        "published latency {average} µs is not near {DELAY:?}"
    );
}
