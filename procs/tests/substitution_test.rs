// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! In-place type substitution: slot identity, settings carry-over, and behavior under
//! concurrent I/O.

mod fixtures;

use fixtures::{forwarder_descriptor, tunable_enc_descriptor};
use pretty_assertions::assert_eq;
use r3bl_procs::{Frame, ProcCatalog, ProcError, ProcFlags, ProcRegistry};
use std::{sync::{Arc,
                 atomic::{AtomicUsize, Ordering}},
          thread,
          time::Duration};

fn enc_pair_registry() -> (ProcRegistry, Arc<AtomicUsize>) {
    let opens = Arc::new(AtomicUsize::new(0));
    let catalog = Arc::new(ProcCatalog::new());
    catalog
        .register(tunable_enc_descriptor("enc-a", Arc::clone(&opens)))
        .unwrap();
    catalog
        .register(tunable_enc_descriptor("enc-b", Arc::clone(&opens)))
        .unwrap();
    let registry = ProcRegistry::open(catalog, 4, None, None).unwrap();
    (registry, opens)
}

#[test]
fn substitution_preserves_slot_and_carries_recognized_settings() {
    let (registry, _opens) = enc_pair_registry();

    let handle = registry
        .create("enc-a", "bitrate=500&codec_private_a=x")
        .unwrap();
    assert_eq!(handle, 0);

    registry.put_settings(handle, "proc_name=enc-b").unwrap();

    let state = registry.get_state(handle).unwrap();
    assert_eq!(state["settings"]["proc_name"], "enc-b");
    assert_eq!(state["settings"]["bitrate"], 500);
    // The field enc-a never recognized did not survive the carry-over.
    assert!(state["settings"].get("codec_private_a").is_none());

    // The handle never changed hands.
    let enumeration = registry.enumerate(None).unwrap();
    let entry = &enumeration["procs"].as_array().unwrap()[0];
    assert_eq!(entry["proc_id"], 0);
    assert_eq!(entry["proc_name"], "enc-b");
}

#[test]
fn same_name_put_is_a_plain_settings_put() {
    let (registry, opens) = enc_pair_registry();

    let handle = registry.create("enc-a", "bitrate=500").unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    registry
        .put_settings(handle, "proc_name=enc-a&bitrate=700")
        .unwrap();

    // No teardown, no reopen - the same instance took the new bitrate.
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    let state = registry.get_state(handle).unwrap();
    assert_eq!(state["settings"]["proc_name"], "enc-a");
    assert_eq!(state["settings"]["bitrate"], 700);
}

#[test]
fn substitution_to_unknown_type_leaves_the_old_in_place() {
    let (registry, opens) = enc_pair_registry();

    let handle = registry.create("enc-a", "bitrate=9").unwrap();
    assert_eq!(
        registry
            .put_settings(handle, "proc_name=ghost")
            .unwrap_err(),
        ProcError::Invalid
    );
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    let state = registry.get_state(handle).unwrap();
    assert_eq!(state["settings"]["proc_name"], "enc-a");
    assert_eq!(state["settings"]["bitrate"], 9);
}

#[test]
fn put_on_empty_slot_is_not_found() {
    let (registry, _opens) = enc_pair_registry();
    assert_eq!(
        registry.put_settings(2, "bitrate=1").unwrap_err(),
        ProcError::NotFound
    );
    assert_eq!(registry.get_state(2).unwrap_err(), ProcError::NotFound);
}

/// Mid-stream substitution under a live producer and consumer: the stream stays
/// strictly ordered, loss is bounded to the frames in flight at the boundary, and the
/// slot reports the new type afterwards.
#[test]
fn substitution_under_concurrent_io_keeps_order_and_bounded_loss() {
    const TOTAL: i64 = 400;
    // One past the stream: sent after the substitution has completed, so it always
    // arrives and bounds the consumer's run even if `TOTAL` itself was in flight at
    // the swap.
    const SENTINEL: i64 = TOTAL + 1;
    // Frames that can sit in the old instance at the swap: input queue + output
    // queue + one in the worker's hands.
    const IN_FLIGHT_BOUND: i64 = 5;

    let catalog = Arc::new(ProcCatalog::new());
    catalog
        .register(forwarder_descriptor("proc-x", ProcFlags::empty()))
        .unwrap();
    catalog
        .register(forwarder_descriptor("proc-y", ProcFlags::empty()))
        .unwrap();
    let registry =
        Arc::new(ProcRegistry::open(catalog, 2, None, None).unwrap());
    let handle = registry.create("proc-x", "").unwrap();

    let producer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for pts in 1..=TOTAL {
                let frame = Frame::from_bytes(vec![0u8; 64], pts);
                // Retry through the substitution window so no PTS is skipped at
                // the source.
                while registry.send_frame(handle, &frame).is_err() {
                    thread::yield_now();
                }
            }
        })
    };

    let consumer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            let mut received = Vec::new();
            loop {
                match registry.recv_frame(handle) {
                    Ok(frame) => {
                        let done = frame.pts >= TOTAL;
                        received.push(frame.pts);
                        if done {
                            break;
                        }
                    }
                    Err(_) => thread::yield_now(),
                }
            }
            received
        })
    };

    // Let the stream get going, then swap the type out from under it.
    thread::sleep(Duration::from_millis(30));
    registry.put_settings(handle, "proc_name=proc-y").unwrap();
    producer.join().unwrap();

    // Post-substitution marker; nothing can disturb its delivery now.
    let sentinel = Frame::from_bytes(vec![0u8; 64], SENTINEL);
    while registry.send_frame(handle, &sentinel).is_err() {
        thread::yield_now();
    }
    let received = consumer.join().unwrap();

    assert!(
        received.windows(2).all(|pair| pair[0] < pair[1]),
        "PTS order violated: {received:?}"
    );
    assert!(
        received.len() as i64 >= TOTAL - IN_FLIGHT_BOUND,
        "lost more than the in-flight bound: got {} of {TOTAL}",
        received.len()
    );

    let state = registry.get_state(handle).unwrap();
    assert_eq!(state["settings"]["proc_name"], "proc-y");
}
