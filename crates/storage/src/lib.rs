//! Read-only access to the files of a folio library.
//!
//! Everything in here is deliberately incapable of modifying the library: the
//! [`StorageBackend`] trait exposes listing, stat and read operations only.

pub mod backend;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::{FileInfo, Fingerprint};
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
