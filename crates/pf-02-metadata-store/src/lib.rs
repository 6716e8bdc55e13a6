//! # Metadata Store - Photo Record Persistence Contract
//!
//! Subsystem 2. Record-oriented storage for [`shared_types::PhotoRecord`]
//! rows: point lookups, ordered range queries per client/user, text search,
//! counts, and multi-row transactions. Production deployments back the
//! [`MetadataStore`] trait with a document or relational database; this
//! crate ships a transactional in-memory reference implementation.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod contract;
pub mod memory;

// Re-export main types
pub use contract::{MetadataError, MetadataStore, MetadataTransaction, PhotoFilter};
pub use memory::InMemoryMetadataStore;
