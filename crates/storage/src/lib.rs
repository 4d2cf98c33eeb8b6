pub mod backend;
pub mod error;
pub mod file;
pub mod path;

pub use crate::backend::{ConnectionReport, DeletePolicy, PutOptions, StorageProvider, StoredPath};
pub use crate::file::FileMetadata;
pub use crate::path::{partitioned as partitioned_path, validate as validate_path};
use std::sync::Arc;

pub type ProviderHandle = Arc<dyn StorageProvider + Send + Sync>;
