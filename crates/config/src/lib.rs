//! Storage configuration resolution and provider construction.
//!
//! The selected backend is a runtime decision made by operators through the
//! application's settings rows, not a compile-time or deploy-time one. This
//! crate turns those rows into a [`StorageConfig`] snapshot and builds the
//! matching provider through [`ProviderFactory`], which also owns the
//! short-lived instance cache.

pub mod error;
mod factory;
mod model;

pub use crate::factory::{DEFAULT_CACHE_TTL, ProviderFactory};
pub use crate::model::{StorageConfig, StorageDriver};
