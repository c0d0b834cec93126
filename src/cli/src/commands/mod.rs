pub mod channel;
pub mod config;
pub mod simulate;
pub mod state;

use anyhow::{Context, Result};
use std::path::Path;

/// Read a whole input file.
pub(crate) fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
