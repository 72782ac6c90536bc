//! Orphaned-grant reclamation.
//!
//! Generic-linked grants survive the deletion of their target and must be
//! swept out-of-band. Direct-linked grants are protected by referential
//! integrity (cascade on target delete) and are not scanned.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::model::GrantId;
use crate::store::Store;

/// Controls for a reclaim run.
#[derive(Debug, Clone, Default)]
pub struct ReclaimOptions {
    /// Scan in chunks of this many rows; `None` scans everything in one
    /// pass.
    pub batch_size: Option<u64>,
    /// Stop after this many batches in this run.
    pub max_batches: Option<u64>,
    /// Skip this many batches first, to resume a partial run.
    pub skip_batches: u64,
    /// Soft time budget, checked at batch boundaries only. The in-flight
    /// batch always completes.
    pub max_duration: Option<Duration>,
}

/// Scan the generic grant table and delete grants whose target no longer
/// exists. Returns the number of rows removed; 0 when there are no orphans.
pub fn reclaim_orphans(store: &Store, options: &ReclaimOptions) -> u64 {
    let started = Instant::now();
    let batch_size = match options.batch_size {
        Some(size) if size > 0 => size,
        _ => {
            // Unbatched: one full pass, treated as a single batch.
            let total = store.generic_grant_count();
            let rows = store.generic_grant_page(0, total);
            let orphans: Vec<GrantId> = rows
                .iter()
                .filter(|row| !store.object_exists(row.content_type, &row.object_pk))
                .map(|row| row.id)
                .collect();
            let removed = store.delete_generic_grants(&orphans);
            info!(scanned = rows.len(), removed, "orphan cleanup finished");
            return removed;
        }
    };

    let mut offset = options.skip_batches * batch_size;
    let mut removed = 0;
    let mut scanned = 0;
    let mut batches = 0;

    loop {
        if let Some(max_batches) = options.max_batches {
            if batches >= max_batches {
                break;
            }
        }
        if let Some(budget) = options.max_duration {
            if started.elapsed() >= budget {
                info!(budget_secs = budget.as_secs(), "time budget reached");
                break;
            }
        }

        let rows = store.generic_grant_page(offset, batch_size);
        if rows.is_empty() {
            break;
        }
        scanned += rows.len() as u64;
        batches += 1;

        let orphans: Vec<GrantId> = rows
            .iter()
            .filter(|row| !store.object_exists(row.content_type, &row.object_pk))
            .map(|row| row.id)
            .collect();
        let deleted = store.delete_generic_grants(&orphans);
        removed += deleted;
        // Advance by the rows kept: deleted rows shift later pages left, so
        // a fixed stride would skip survivors' neighbors.
        offset += rows.len() as u64 - deleted;

        debug!(batch = batches, scanned, deleted, "processed orphan batch");
    }

    info!(
        scanned,
        removed,
        batches,
        "orphan cleanup finished"
    );
    if options.max_batches.is_some() || options.max_duration.is_some() {
        info!(
            batch_size,
            skip_batches = options.skip_batches + batches,
            "to resume cleanup, rerun with these options"
        );
    }
    removed
}
