// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// Attach sources.
pub mod proc_registry;

// Re-export.
pub use proc_registry::*;
