// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Processor type descriptors and the specialization seam. See [`ProcDescriptor`] and
//! [`ProcUnit`] for details.

use super::proc_instance::ProcHost;
use crate::{Duplicator, Frame, ProcError, ProcResult, Settings};
use serde_json::{Value, json};
use std::{fmt, sync::Arc};

bitflags::bitflags! {
    /// Feature flags a processor type opts into.
    ///
    /// `BITRATE`, `REGISTER_PTS`, and `LATENCY` switch on the corresponding
    /// bookkeeping in the host's default I/O hooks; an instance spawns its stats
    /// thread only when at least one of the three is set. `RD`/`WR` advertise which
    /// I/O directions the type serves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcFlags: u32 {
        const BITRATE      = 1 << 0;
        const REGISTER_PTS = 1 << 1;
        const LATENCY      = 1 << 2;
        const RD           = 1 << 3;
        const WR           = 1 << 4;
    }
}

impl ProcFlags {
    /// The flags that require the per-instance stats thread.
    pub const STATS: Self = Self::BITRATE
        .union(Self::REGISTER_PTS)
        .union(Self::LATENCY);

    #[must_use]
    pub fn needs_stats_thread(&self) -> bool { self.intersects(Self::STATS) }
}

/// Constructor hook of a processor type. Receives the parsed settings payload and may
/// reject it with [`ProcError::Invalid`]. The C `open` hook of the hook table.
pub type ProcFactory =
    Arc<dyn Fn(&Settings) -> ProcResult<Box<dyn ProcUnit>> + Send + Sync>;

/// Immutable record describing a processor type: identity, feature flags, and the
/// hooks the runtime is polymorphic over.
///
/// Descriptors are cheap to clone and are stored **by value** in the type catalog, so
/// a registered type stays usable even if the code that registered it unregisters
/// later. Uniqueness is keyed on [`name`].
///
/// The hook table of the C ancestry maps onto Rust seams as follows: `open` is
/// [`factory`], `close` is the unit's [`Drop`], the remaining hooks are [`ProcUnit`]
/// methods, and the element dup/release pair is [`Clone`]/[`Drop`] on [`Frame`] unless
/// a per-direction [`Duplicator`] override is installed here.
///
/// [`name`]: Self::name
/// [`factory`]: ProcFactory
#[derive(Clone)]
pub struct ProcDescriptor {
    /// Unique type name, e.g. `"ffmpeg_x264_enc"`.
    pub name: String,
    /// Human-readable category, e.g. `"video_encoder"`.
    pub category: String,
    /// Media-type label, e.g. `"video/H264"`.
    pub media_type: String,
    pub flags: ProcFlags,
    factory: ProcFactory,
    input_dup: Option<Duplicator<Frame>>,
    output_dup: Option<Duplicator<Frame>>,
}

impl fmt::Debug for ProcDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("media_type", &self.media_type)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl ProcDescriptor {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        media_type: impl Into<String>,
        flags: ProcFlags,
        factory: impl Fn(&Settings) -> ProcResult<Box<dyn ProcUnit>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            media_type: media_type.into(),
            flags,
            factory: Arc::new(factory),
            input_dup: None,
            output_dup: None,
        }
    }

    /// Overrides the input queue's element duplicator.
    #[must_use]
    pub fn with_input_dup(mut self, dup: Duplicator<Frame>) -> Self {
        self.input_dup = Some(dup);
        self
    }

    /// Overrides the output queue's element duplicator.
    #[must_use]
    pub fn with_output_dup(mut self, dup: Duplicator<Frame>) -> Self {
        self.output_dup = Some(dup);
        self
    }

    /// Invokes the type's constructor hook.
    ///
    /// # Errors
    ///
    /// Whatever the factory returns; conventionally [`ProcError::Invalid`] for
    /// rejected settings.
    pub fn build(&self, settings: &Settings) -> ProcResult<Box<dyn ProcUnit>> {
        (self.factory)(settings)
    }

    #[must_use]
    pub fn input_dup(&self) -> Option<Duplicator<Frame>> { self.input_dup.clone() }

    #[must_use]
    pub fn output_dup(&self) -> Option<Duplicator<Frame>> { self.output_dup.clone() }
}

/// The specialization of a processor instance - the "inner" state behind the common
/// host header.
///
/// Every method has a provided default that encodes "hook absent": I/O hooks fall back
/// to the host's default behavior, control hooks report [`ProcError::NotFound`].
/// Implementations run concurrently on the worker thread, producer/consumer threads,
/// and control threads, so a unit guards its private mutable state with its own locks
/// (hence `&self` receivers and the `Send + Sync` bound).
pub trait ProcUnit: Send + Sync {
    /// One unit of work on the worker thread. [`Err(Eof)`] is the clean terminal
    /// status; any other error makes the worker yield and retry.
    ///
    /// Default: move one element from the input queue to the output queue.
    ///
    /// # Errors
    ///
    /// [`ProcError::Eof`] to end the worker; [`ProcError::Unblocked`] while shutting
    /// down; transient codes otherwise.
    ///
    /// [`Err(Eof)`]: ProcError::Eof
    fn process_frame(&self, host: &ProcHost) -> ProcResult<()> { host.forward_one() }

    /// Producer-side ingestion. Default: register the input PTS (when both
    /// `REGISTER_PTS` and `LATENCY` are on), account input bytes (when `BITRATE` is
    /// on), then duplicate into the input queue.
    ///
    /// # Errors
    ///
    /// [`ProcError::Unblocked`] when the input queue is in unblocked mode.
    fn send_frame(&self, host: &ProcHost, frame: &Frame) -> ProcResult<()> {
        host.default_send(frame)
    }

    /// Consumer-side extraction. Default: take from the output queue, then account
    /// output bytes (when `BITRATE` is on).
    ///
    /// # Errors
    ///
    /// [`ProcError::Unblocked`] when the output queue is in unblocked mode.
    fn recv_frame(&self, host: &ProcHost) -> ProcResult<Frame> {
        host.default_recv()
    }

    /// Wakes any thread blocked *inside* a hook of this unit (the host unblocks its
    /// own queues separately). Default: nothing to wake.
    fn unblock(&self) {}

    /// Type-private state tree for the control surface. The host prepends
    /// `latency_avg_usec` and the registry inserts `proc_name`; everything else in
    /// the tree belongs to the type. Default: an empty `settings` object.
    fn rest_get(&self) -> Value { json!({ "settings": {} }) }

    /// Applies a settings payload. Unrecognized fields are silently dropped by
    /// convention (settings carry-over across type substitution relies on this).
    ///
    /// # Errors
    ///
    /// [`ProcError::NotFound`] when the type has no settings surface (the default).
    fn rest_put(&self, settings: &Settings) -> ProcResult<()> {
        let _ = settings;
        Err(ProcError::NotFound)
    }

    /// Generic type-private control verb.
    ///
    /// # Errors
    ///
    /// [`ProcError::NotFound`] for an unhandled tag (the default).
    fn opt(&self, tag: &str, arg: Option<&str>) -> ProcResult<Option<String>> {
        let _ = (tag, arg);
        Err(ProcError::NotFound)
    }
}

impl fmt::Debug for dyn ProcUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("dyn ProcUnit") }
}
