// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Status taxonomy shared by every layer of the runtime. See [`ProcError`] for details.

/// Result alias used across the crate. `Ok(())` is the `SUCCESS` of the control
/// surface; every other status is a [`ProcError`] variant.
pub type ProcResult<T> = Result<T, ProcError>;

/// Non-success statuses of the processor runtime and registry.
///
/// These are statuses, not programming errors - most of them are expected outcomes of
/// normal operation:
///
/// | Variant         | Meaning                                                            |
/// | :-------------- | :----------------------------------------------------------------- |
/// | [`Eof`]         | `process_frame` sentinel; the only status that cleanly ends a worker |
/// | [`Unblocked`]   | A queue in unblocked mode bounced the caller; unwind               |
/// | [`NotFound`]    | Empty slot, unknown tag, unknown type, or absent hook              |
/// | [`Invalid`]     | Malformed settings, out-of-range slot, rejected configuration      |
/// | [`Conflict`]    | Type name already registered, or a forced slot is occupied         |
/// | [`OutOfMemory`] | Allocation failure, or no free slot left in a registry             |
/// | [`NotModified`] | Cache-semantics variant of a read                                  |
///
/// [`Eof`]: Self::Eof
/// [`Unblocked`]: Self::Unblocked
/// [`NotFound`]: Self::NotFound
/// [`Invalid`]: Self::Invalid
/// [`Conflict`]: Self::Conflict
/// [`OutOfMemory`]: Self::OutOfMemory
/// [`NotModified`]: Self::NotModified
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum ProcError {
    /// End of stream. Returned by a `process_frame` hook to terminate the worker
    /// thread cleanly.
    #[error("end of stream")]
    #[diagnostic(code(r3bl_procs::eof))]
    Eof,

    /// A blocking queue operation was aborted because the queue is in unblocked mode.
    /// The C ancestry calls this `EAGAIN`.
    #[error("operation unblocked")]
    #[diagnostic(code(r3bl_procs::unblocked))]
    Unblocked,

    /// Slot is empty, tag is unknown, type is unknown, or the hook is absent.
    #[error("not found")]
    #[diagnostic(code(r3bl_procs::not_found))]
    NotFound,

    /// Malformed settings, out-of-range slot index, or a configuration the target
    /// rejected.
    #[error("invalid argument or settings")]
    #[diagnostic(code(r3bl_procs::invalid))]
    Invalid,

    /// The name is already registered, or a `forced_proc_id` slot is occupied.
    #[error("conflict with existing resource")]
    #[diagnostic(code(r3bl_procs::conflict))]
    Conflict,

    /// Allocation failure, or no free slot left in the registry.
    #[error("out of memory or capacity")]
    #[diagnostic(code(r3bl_procs::out_of_memory))]
    OutOfMemory,

    /// Read variant with cache semantics (maps to HTTP 304).
    #[error("not modified")]
    #[diagnostic(code(r3bl_procs::not_modified))]
    NotModified,
}

impl ProcError {
    /// Whether the status is one a caller should treat as a clean unwind rather than a
    /// failure: the queue was drained by unblock mode or the stream ended.
    #[must_use]
    pub fn is_unwind(&self) -> bool { matches!(self, Self::Unblocked | Self::Eof) }
}
