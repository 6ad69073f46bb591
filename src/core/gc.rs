//! Vector-blob garbage collection: walk every reference root (operations,
//! pending operations, staging, stashes, known-state) and delete blobs
//! outside the referenced set. Blobs are content-addressed, so re-creating
//! a collected hash later is idempotent.

use std::collections::HashSet;

use tracing::debug;

use crate::core::repository::Repository;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct GcReport {
    pub scanned: usize,
    pub deleted: usize,
}

impl Repository {
    pub fn collect_garbage(&self) -> Result<GcReport> {
        let mut referenced: HashSet<String> = HashSet::new();
        let mut keep = |hash: &str| {
            if !hash.is_empty() {
                referenced.insert(hash.to_string());
            }
        };

        for commit_id in self.store().commit_ids()? {
            for op in self.store().operations_for_commit(&commit_id)? {
                keep(&op.vector_hash);
                // shallow clones may hold operations whose introducing
                // commit is absent, so previous hashes count as roots too
                keep(&op.previous_vector_hash);
            }
        }
        for op in self.store().pending_operations()? {
            keep(&op.vector_hash);
            keep(&op.previous_vector_hash);
        }
        for (_, change) in self.store().staged_changes()? {
            keep(&change.vector_hash);
            keep(&change.previous_vector_hash);
        }
        for stash in self.store().stashes()? {
            for item in &stash.changes {
                keep(&item.change.vector_hash);
                keep(&item.change.previous_vector_hash);
            }
        }
        for (_, known) in self.store().known_objects()? {
            keep(&known.vector_hash);
        }

        let mut report = GcReport::default();
        for hash in self.store().vector_hashes()? {
            report.scanned += 1;
            if !referenced.contains(&hash) {
                debug!(%hash, "collecting unreferenced vector blob");
                self.store().delete_vector(&hash)?;
                report.deleted += 1;
            }
        }
        Ok(report)
    }
}
