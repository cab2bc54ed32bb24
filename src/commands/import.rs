use crate::store::SnapshotStore;
use anyhow::Result;
use log::info;
use std::path::Path;

pub fn run(input: &Path, output: &Path) -> Result<()> {
    info!("Importing JSON market data from {}", input.display());
    let store = SnapshotStore::import_json(input)?;
    let symbols = store.symbols();
    let sessions = store.sessions().count();

    store.save_to_file(output)?;
    info!(
        "Market data snapshot with {} symbols and {} sessions written to {}",
        symbols.len(),
        sessions,
        output.display()
    );
    Ok(())
}
