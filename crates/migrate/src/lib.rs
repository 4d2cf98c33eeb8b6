//! One-shot migration of legacy on-disk files into provider-managed storage.
//!
//! The surrounding application historically wrote uploads straight to disk
//! and stored the path in whichever table referenced them. This crate walks
//! those references category by category, copies each file into the
//! configured [`StorageProvider`](fieldops_storage::StorageProvider),
//! verifies the copy by checksum, rewrites the referencing record, and
//! tracks every file in a persistent ledger so interrupted or partially
//! failed runs can simply be re-run.

mod engine;
pub mod error;
mod sources;

pub use crate::engine::{CategoryCounts, MigrationEngine, MigrationSummary};
pub use crate::sources::{LegacyFile, LegacySource, default_sources};
