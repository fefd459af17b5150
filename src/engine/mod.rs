//! Browser-engine collaborators.
//!
//! The connection never renders or navigates itself. It drives an external
//! engine through the traits in this module:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`WarmupPool`] | Engine initialization and spare renderers |
//! | [`Navigator`] | Prerender / hidden-tab loads, prefetch, detached requests |
//! | [`OriginVerifier`] | Asynchronous package ↔ origin verification |
//! | [`DeviceConditions`] | Low-end device, cellular, cookie settings |
//! | [`PackageResolver`] | UID → package name |
//! | [`PageChannel`] | Message pipe into a live page |
//!
//! [`Platform`] bundles one implementation of each. [`MemoryPlatform`]
//! implements all of them in-process, tracking renderer handles so leaks
//! and double destruction are observable.

// ============================================================================
// Submodules
// ============================================================================

/// Collaborator traits and renderer handles.
pub mod collaborators;

/// In-process engine implementation.
pub mod memory;

/// Collaborator bundle.
pub mod platform;

// ============================================================================
// Re-exports
// ============================================================================

pub use collaborators::{
    DeviceConditions, Navigator, OriginVerifier, PackageResolver, PageChannel, Relation,
    RendererHandle, RendererKind, WarmupPool,
};
pub use memory::{MemoryPage, MemoryPlatform};
pub use platform::Platform;
