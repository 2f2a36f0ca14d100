//! CLI command implementations.

pub mod inspect;
pub mod query;
pub mod rebuild;
pub mod verify;

use shelfdb_core::{Config, CoreResult, FileBackend};
use std::path::Path;

/// Opens an existing database; never creates one.
pub fn open_existing(path: &Path) -> CoreResult<FileBackend> {
    FileBackend::open_with_config(path, Config::new().create_if_missing(false))
}
