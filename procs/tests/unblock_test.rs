// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Shutdown liveness: deleting a processor must bounce every blocked producer and
//! consumer instead of leaving them stuck.

mod fixtures;

use fixtures::forwarder_descriptor;
use pretty_assertions::assert_eq;
use r3bl_procs::{Frame, ProcCatalog, ProcError, ProcFlags, ProcRegistry};
use std::{sync::Arc, thread, time::{Duration, Instant}};

fn forwarder_registry() -> ProcRegistry {
    let catalog = Arc::new(ProcCatalog::new());
    catalog
        .register(forwarder_descriptor("forwarder", ProcFlags::empty()))
        .unwrap();
    ProcRegistry::open(catalog, 4, None, None).unwrap()
}

#[test]
fn delete_unblocks_a_stuck_producer() {
    let registry = Arc::new(forwarder_registry());
    let handle = registry.create("forwarder", "").unwrap();

    // Input and output queues hold 2 each, the worker one more: the sixth send
    // cannot complete while nothing consumes.
    let producer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            let mut outcomes = Vec::new();
            for pts in 1..=6 {
                let frame = Frame::from_bytes(vec![0u8; 16], pts);
                outcomes.push(registry.send_frame(handle, &frame));
            }
            outcomes
        })
    };

    // Give the producer time to wedge against the full pipeline.
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    registry.delete(handle).unwrap();
    let outcomes = producer.join().unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "blocked producer took {:?} to come back",
        started.elapsed()
    );

    // The wedged send came back with the unblock status, not a hang or a crash.
    assert_eq!(outcomes.last().unwrap(), &Err(ProcError::Unblocked));
    // At least the input queue's capacity worth of sends got in first.
    assert!(outcomes.iter().filter(|outcome| outcome.is_ok()).count() >= 2);

    // The slot is a well-defined miss now.
    assert_eq!(
        registry.recv_frame(handle).unwrap_err(),
        ProcError::NotFound
    );
}

#[test]
fn delete_unblocks_a_stuck_consumer() {
    let registry = Arc::new(forwarder_registry());
    let handle = registry.create("forwarder", "").unwrap();

    let consumer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.recv_frame(handle))
    };

    thread::sleep(Duration::from_millis(100));
    registry.delete(handle).unwrap();

    let outcome = consumer.join().unwrap();
    assert!(matches!(
        outcome,
        Err(ProcError::Unblocked | ProcError::NotFound)
    ));
}

#[test]
fn unblock_verb_bounces_io_without_deleting() {
    let registry = Arc::new(forwarder_registry());
    let handle = registry.create("forwarder", "").unwrap();

    let consumer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.recv_frame(handle))
    };

    thread::sleep(Duration::from_millis(50));
    registry.unblock(handle).unwrap();

    assert_eq!(consumer.join().unwrap(), Err(ProcError::Unblocked));
    // The processor itself is still installed.
    let enumeration = registry.enumerate(None).unwrap();
    assert_eq!(enumeration["procs"].as_array().unwrap().len(), 1);
}
