// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words procs demuxers muxers unblocks

//! # r3bl_procs
//!
//! A runtime for composing pipelines of media processors - encoders, decoders,
//! multiplexers, demultiplexers - where each processor is an independent unit
//! consuming frames at an input port and producing frames at an output port.
//! Applications instantiate processors dynamically, stream frames through them from
//! producer/consumer threads, and inspect or reconfigure them at any time through a
//! uniform control surface.
//!
//! Two subsystems carry the design:
//!
//! 1. **The processor instance runtime** ([`ProcInstance`]) - a generic host that owns
//!    a processor's worker thread, its bounded input/output queues, its per-direction
//!    fair locking, and its periodic statistics thread; and exposes the control verbs
//!    (open, close, send/recv frame, get-state, put-settings, unblock).
//! 2. **The processor registry** ([`ProcRegistry`]) - a bounded slotted container of
//!    live instances that serves fast concurrent I/O against slots while asynchronous
//!    create/destroy/reconfigure operations - including in-place **type substitution**
//!    of a running processor - proceed against the same population.
//!
//! Both solve one problem: let high-throughput frame I/O run in parallel with
//! low-rate control operations, without either starving or corrupting the other,
//! across a population of processors any of which may be added, removed, or replaced
//! at any instant.
//!
//! # Quick start
//!
//! ```
//! use r3bl_procs::{Frame, ProcCatalog, ProcDescriptor, ProcFlags, ProcRegistry,
//!                  ProcUnit};
//! use std::sync::Arc;
//!
//! // A processor type: every hook at its host default = a pure forwarder.
//! struct Forwarder;
//! impl ProcUnit for Forwarder {}
//!
//! let catalog = Arc::new(ProcCatalog::new());
//! catalog
//!     .register(ProcDescriptor::new(
//!         "forwarder",
//!         "pass-through",
//!         "application/octet-stream",
//!         ProcFlags::empty(),
//!         |_settings| Ok(Box::new(Forwarder)),
//!     ))
//!     .unwrap();
//!
//! let registry = ProcRegistry::open(catalog, 4, None, None).unwrap();
//! let handle = registry.create("forwarder", "").unwrap();
//!
//! registry
//!     .send_frame(handle, &Frame::from_bytes(vec![1, 2, 3], 100))
//!     .unwrap();
//! let frame = registry.recv_frame(handle).unwrap();
//! assert_eq!(frame.pts, 100);
//!
//! registry.delete(handle).unwrap();
//! ```
//!
//! # Threading model
//!
//! Parallel preemptive threads throughout. Each instance runs a dedicated worker and
//! (when a stats feature flag is set) a stats sampler; the application contributes
//! producers, consumers, and controllers. Shutdown is cooperative: the exit flag, the
//! queues' unblock mode, and the interruptible stats sleep together make every
//! dedicated thread joinable promptly.
//!
//! Lock hierarchy, acquired top-down and never the reverse: catalog mutex → registry
//! mutex → slot ctl mutex → slot fair gates (input then output) → instance ctl mutex
//! → queue internal mutexes.

// Attach sources.
pub mod catalog;
pub mod error;
pub mod frame;
pub mod log_init;
pub mod proc;
pub mod registry;
pub mod rest;
pub mod settings;
pub mod sync;

// Re-export.
pub use catalog::*;
pub use error::*;
pub use frame::*;
pub use log_init::*;
pub use proc::*;
pub use registry::*;
pub use rest::*;
pub use settings::*;
pub use sync::*;
