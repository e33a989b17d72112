//! CLI command implementations.

pub mod inspect;
pub mod rebuild;
pub mod verify;

use sidx_core::{IndexDir, Manifest};
use std::path::Path;

/// Opens an existing index directory and reads its manifest.
pub fn open_existing(path: &Path) -> Result<(IndexDir, Manifest), Box<dyn std::error::Error>> {
    let dir = IndexDir::open(path, false, false)?;
    let manifest = dir
        .load_manifest()?
        .ok_or_else(|| format!("No checkpoint found at {}", path.display()))?;
    Ok((dir, manifest))
}
