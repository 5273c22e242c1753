//! Places the archive is pushed to.
//!
//! Each destination implements [`StorageBackend`]. The uploader only ever
//! lists a folder and copies local files into one.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::{BatchOptions, BatchOutcome, StorageBackend};
pub use crate::models::FileInfo;
pub use crate::path::normalize as normalize_key;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
