//! Commit creation. Two entry points: a fresh-diff commit of everything
//! pending, and a commit of exactly what staging holds. Both funnel into the
//! store's atomic finalize.

use chrono::Utc;
use tracing::warn;

use crate::core::context::Context;
use crate::core::diff::{schema_diff, DiffEntry};
use crate::core::hash;
use crate::core::models::{
    object_key, Commit, KnownObject, Operation, OperationType, StagedChange,
};
use crate::core::repository::Repository;
use crate::core::store::CommitFinalize;
use crate::error::{Result, WvcError};

impl Repository {
    /// Commit everything that differs between the live store and HEAD.
    pub fn commit(&self, ctx: &Context, message: &str) -> Result<Commit> {
        let (entries, stats) = self.diff_with_stats(ctx)?;
        let schema = self.objects().get_schema(ctx)?;
        let pending_schema = schema_diff(&self.head_schema()?, &schema);
        if entries.is_empty() && pending_schema.is_empty() {
            return Err(WvcError::NoChanges);
        }

        self.record_diff_entries(&entries)?;
        let commit = self.store().finalize_commit(CommitFinalize {
            message,
            merge_parent_id: None,
            timestamp: Utc::now(),
            schema: &schema,
            scan_updates: stats,
            clear_staging: true,
        })?;
        self.refresh_known_state(&commit.id);
        Ok(commit)
    }

    /// Commit exactly the staged changes. Unstaged edits stay pending, so
    /// class watermarks are not advanced here; the next incremental diff
    /// falls back to a full scan for the touched classes.
    pub fn commit_staged(&self, ctx: &Context, message: &str) -> Result<Commit> {
        let staged = self.store().staged_changes()?;
        let schema = self.objects().get_schema(ctx)?;
        let pending_schema = schema_diff(&self.head_schema()?, &schema);
        if staged.is_empty() && pending_schema.is_empty() {
            return Err(WvcError::NoChanges);
        }

        let now = Utc::now();
        for (_, change) in &staged {
            let mut op = staged_to_operation(change, now);
            self.store().append_pending_operation(&mut op)?;
        }
        let commit = self.store().finalize_commit(CommitFinalize {
            message,
            merge_parent_id: None,
            timestamp: now,
            schema: &schema,
            scan_updates: vec![],
            clear_staging: true,
        })?;
        self.refresh_known_state(&commit.id);
        Ok(commit)
    }

    /// Persist vector blobs and pending operations for a set of diff rows.
    pub(crate) fn record_diff_entries(&self, entries: &[DiffEntry]) -> Result<()> {
        let now = Utc::now();
        for entry in entries {
            if !entry.vector.is_empty() {
                self.store().save_vector_blob(
                    &hash::vector_bytes(&entry.vector),
                    entry.vector.len() as u32,
                )?;
            }
            let mut op = Operation {
                commit_id: String::new(),
                seq: 0,
                op_type: entry.change_type,
                class: entry.class.clone(),
                object_id: entry.object_id.clone(),
                object_data: entry.object_data.clone(),
                previous_data: entry.previous_data.clone(),
                vector_hash: entry.vector_hash.clone(),
                previous_vector_hash: entry.previous_vector_hash.clone(),
                committed: false,
                reverted: false,
                timestamp: now,
            };
            self.store().append_pending_operation(&mut op)?;
        }
        Ok(())
    }

    /// Fold a sealed commit's operations into the known-state table. A
    /// failure here does not violate data invariants, so it is downgraded
    /// to a warning.
    pub(crate) fn refresh_known_state(&self, commit_id: &str) {
        if let Err(err) = self.try_refresh_known_state(commit_id) {
            warn!(%commit_id, %err, "known-state rebuild failed");
        }
    }

    fn try_refresh_known_state(&self, commit_id: &str) -> Result<()> {
        for op in self.store().operations_for_commit(commit_id)? {
            let key = object_key(&op.class, &op.object_id);
            match op.op_type {
                OperationType::Insert | OperationType::Update => {
                    self.store().set_known_object(
                        &key,
                        &KnownObject {
                            object_hash: hash::sha256_hex(op.object_data.as_bytes()),
                            vector_hash: op.vector_hash.clone(),
                            object_json: op.object_data.clone(),
                        },
                    )?;
                }
                OperationType::Delete => {
                    self.store().delete_known_object(&key)?;
                }
            }
        }
        Ok(())
    }

    /// Primary-parent history from HEAD, newest first. Stops at the root or
    /// at a shallow boundary.
    pub fn log(&self) -> Result<Vec<Commit>> {
        let mut history = Vec::new();
        let mut cursor = self.store().head()?;
        while !cursor.is_empty() {
            let commit = match self.store().try_get_commit(&cursor)? {
                Some(commit) => commit,
                None => break,
            };
            cursor = commit.parent_id.clone();
            history.push(commit);
        }
        Ok(history)
    }

    pub fn commit_details(&self, commit_id: &str) -> Result<(Commit, Vec<Operation>)> {
        let commit = self.store().get_commit(commit_id)?;
        let ops = self.store().operations_for_commit(commit_id)?;
        Ok((commit, ops))
    }
}

fn staged_to_operation(change: &StagedChange, now: chrono::DateTime<Utc>) -> Operation {
    Operation {
        commit_id: String::new(),
        seq: 0,
        op_type: change.change_type,
        class: change.class.clone(),
        object_id: change.object_id.clone(),
        object_data: change.object_data.clone(),
        previous_data: change.previous_data.clone(),
        vector_hash: change.vector_hash.clone(),
        previous_vector_hash: change.previous_vector_hash.clone(),
        committed: false,
        reverted: false,
        timestamp: now,
    }
}
