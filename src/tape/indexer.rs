//! Indexer — given a mounted tape, walks it and records every file into
//! the catalog.
//!
//! Grounded on `original_source/tapevault.py`'s `index_tape` walk, with
//! `os.walk` replaced by the `walkdir` crate (the ecosystem-idiomatic
//! choice the `ram-shortage-BRindeX` indexer also makes for the same
//! recursive-directory-walk need).

use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use walkdir::WalkDir;

use crate::catalog::CatalogStore;
use crate::error::Result;
use crate::tape::changer::InventorySnapshot;
use crate::tape::orchestrator::TapeOrchestrator;

/// Walk a mounted tape and replace its catalog entries.
pub struct Indexer<'a> {
    orchestrator: &'a TapeOrchestrator,
}

impl<'a> Indexer<'a> {
    pub fn new(orchestrator: &'a TapeOrchestrator) -> Self {
        Indexer { orchestrator }
    }

    /// Acquire `volume_tag`, walk its mount tree, replace its catalog
    /// contents, and release the mount handle.
    pub fn index_tape(
        &self,
        catalog: &mut CatalogStore,
        volume_tag: &str,
        inventory: &InventorySnapshot,
    ) -> Result<usize> {
        let handle = self.orchestrator.acquire(volume_tag, inventory)?;

        let mount_path = handle.mount_path.clone();
        let total_space = handle.total_space as i64;
        let free_space = handle.free_space as i64;

        let mut entries = Vec::new();
        for entry in WalkDir::new(&mount_path).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(&mount_path) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let rel_path = relative.to_string_lossy().replace('\\', "/");
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            entries.push((rel_path, metadata.len() as i64, mtime));
        }

        let count = entries.len();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let result =
            catalog.replace_tape_contents(volume_tag, now, total_space, free_space, entries);

        self.orchestrator.release(handle);

        result?;
        info!("indexed {count} files for {volume_tag} (total={total_space}, free={free_space})");
        Ok(count)
    }
}
