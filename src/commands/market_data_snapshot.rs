use crate::store::SnapshotStore;
use anyhow::{anyhow, Result};
use std::path::Path;

pub fn ensure_market_data_file(path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }

    Err(anyhow!(
        "Market data snapshot not found at {}. Convert a JSON export with `import` before running this command.",
        path.display()
    ))
}

pub fn load_market_data(path: &Path) -> Result<SnapshotStore> {
    ensure_market_data_file(path)?;
    SnapshotStore::load_from_file(path)
}
