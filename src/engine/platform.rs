//! Collaborator bundle handed to the connection builder.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use super::collaborators::{
    DeviceConditions, Navigator, OriginVerifier, PackageResolver, WarmupPool,
};
use super::memory::MemoryPlatform;

// ============================================================================
// Platform
// ============================================================================

/// One implementation of every engine collaborator.
#[derive(Clone)]
pub struct Platform {
    /// Engine initialization and spare renderers.
    pub warmup: Arc<dyn WarmupPool>,
    /// Speculative loads, prefetch and detached requests.
    pub navigator: Arc<dyn Navigator>,
    /// Package ↔ origin verification.
    pub verifier: Arc<dyn OriginVerifier>,
    /// Device and settings state.
    pub device: Arc<dyn DeviceConditions>,
    /// UID → package lookup.
    pub packages: Arc<dyn PackageResolver>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

impl Platform {
    /// Uses one [`MemoryPlatform`] for every collaborator.
    #[must_use]
    pub fn in_memory(engine: Arc<MemoryPlatform>) -> Self {
        Self {
            warmup: engine.clone(),
            navigator: engine.clone(),
            verifier: engine.clone(),
            device: engine.clone(),
            packages: engine,
        }
    }
}
