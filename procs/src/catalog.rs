// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Process-wide set of registered processor types. See [`ProcCatalog`] for details.

use crate::{ProcDescriptor, ProcError, ProcResult};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// The set of processor types a registry can instantiate, keyed by unique name.
///
/// Descriptors are stored by value and handed out by clone, so a looked-up type stays
/// valid regardless of later catalog mutations. Name matching is **full equality** -
/// `"x264"` never matches `"x264_enc"`.
///
/// Most applications use the process-wide [`ProcCatalog::global`] and register their
/// types once at startup, before opening any registry. Isolated catalogs (one per
/// registry, or per test) are also supported via [`ProcCatalog::new`].
#[derive(Debug, Default)]
pub struct ProcCatalog {
    types: Mutex<Vec<ProcDescriptor>>,
}

impl ProcCatalog {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// The process-wide catalog. Registries hold a reference, so the handle is
    /// shared rather than borrowed.
    #[must_use]
    pub fn global() -> Arc<ProcCatalog> {
        static SINGLETON: OnceLock<Arc<ProcCatalog>> = OnceLock::new();
        Arc::clone(SINGLETON.get_or_init(|| Arc::new(ProcCatalog::new())))
    }

    /// Registers a type.
    ///
    /// # Errors
    ///
    /// [`ProcError::Conflict`] when the name is already present; the original
    /// registration is preserved.
    pub fn register(&self, descriptor: ProcDescriptor) -> ProcResult<()> {
        let mut types = self.lock_types();
        if types.iter().any(|existing| existing.name == descriptor.name) {
            return Err(ProcError::Conflict);
        }
        tracing::debug!("registering proc type '{}'", descriptor.name);
        types.push(descriptor);
        Ok(())
    }

    /// Removes a type by name.
    ///
    /// # Errors
    ///
    /// [`ProcError::NotFound`] when no type with that exact name is registered.
    pub fn unregister(&self, name: &str) -> ProcResult<()> {
        let mut types = self.lock_types();
        let index = types
            .iter()
            .position(|descriptor| descriptor.name == name)
            .ok_or(ProcError::NotFound)?;
        types.remove(index);
        Ok(())
    }

    /// Looks up a type by exact name, cloning the descriptor out.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ProcDescriptor> {
        self.lock_types()
            .iter()
            .find(|descriptor| descriptor.name == name)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize { self.lock_types().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.lock_types().is_empty() }

    fn lock_types(&self) -> std::sync::MutexGuard<'_, Vec<ProcDescriptor>> {
        self.types.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
