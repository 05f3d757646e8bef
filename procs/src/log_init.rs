// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Minimal tracing bootstrap for binaries and tests that embed the runtime.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber. The `RUST_LOG` environment variable wins over
/// `default_directive` when set. Safe to call more than once - later calls are no-ops
/// (handy in tests, where any test may run first).
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _unused = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
