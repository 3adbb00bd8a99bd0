//! Inventory Reconciler — at startup, diffs the changer inventory against
//! the catalog: drops vanished tapes (and their files), indexes new ones.
//!
//! Grounded on `original_source/tapevault.py`'s `inventory_and_index`,
//! generalized to the Catalog Store's typed operations and to the
//! orchestrator's `acquire`/`release` pair instead of ad hoc load/unload
//! calls.

use std::collections::HashSet;

use log::{error, info};

use crate::catalog::CatalogStore;
use crate::error::Result;
use crate::tape::changer::ChangerInterface;
use crate::tape::indexer::Indexer;
use crate::tape::orchestrator::TapeOrchestrator;

/// Runs the startup reconciliation pass described in spec.md §4.6.
pub struct Reconciler<'a> {
    changer: &'a ChangerInterface,
    orchestrator: &'a TapeOrchestrator,
}

impl<'a> Reconciler<'a> {
    pub fn new(changer: &'a ChangerInterface, orchestrator: &'a TapeOrchestrator) -> Self {
        Reconciler {
            changer,
            orchestrator,
        }
    }

    /// Probe the changer, drop tapes that vanished, and index tapes that
    /// are newly present. Per-tape failures during indexing are logged and
    /// skipped rather than aborting the batch.
    pub fn reconcile(&self, catalog: &mut CatalogStore) -> Result<()> {
        info!("starting inventory reconciliation");
        let snapshot = self.changer.probe()?;

        let present = snapshot.present_volume_tags();
        let known: HashSet<String> = catalog.list_volume_tags()?.into_iter().collect();

        for vanished in known.difference(&present) {
            info!("dropping vanished tape {vanished} from catalog");
            catalog.drop_tape(vanished)?;
        }

        let new_tapes: Vec<&String> = present.difference(&known).collect();
        if new_tapes.is_empty() {
            info!("no new tapes to index");
            return Ok(());
        }

        let indexer = Indexer::new(self.orchestrator);
        for tag in new_tapes {
            match indexer.index_tape(catalog, tag, &snapshot) {
                Ok(count) => info!("indexed {tag}: {count} files"),
                Err(err) => error!("failed to index tape {tag}: {err}"),
            }
        }

        Ok(())
    }
}
