//! Stashes: park staged + unstaged changes, roll the live store back to
//! HEAD, and replay later. Index 0 addresses the newest stash. Vector blobs
//! a stash captures are pinned with a reference and released on drop.

use chrono::Utc;
use tracing::warn;

use crate::core::checkout::StateEntry;
use crate::core::context::Context;
use crate::core::hash;
use crate::core::models::{object_key, OperationType, StagedChange, Stash, StashChange};
use crate::core::repository::Repository;
use crate::error::{Result, WvcError};

impl Repository {
    pub fn stash_push(&self, ctx: &Context, message: Option<&str>) -> Result<Stash> {
        let head = self.store().head()?;
        if head.is_empty() {
            return Err(WvcError::invalid_ref("HEAD", "no commits yet"));
        }
        let branch = self.store().current_branch()?;

        let staged = self.store().staged_changes()?;
        let unstaged = self.diff_incremental(ctx)?;
        if staged.is_empty() && unstaged.is_empty() {
            return Err(WvcError::NoChanges);
        }

        let now = Utc::now();
        let mut changes: Vec<StashChange> = staged
            .into_iter()
            .map(|(_, change)| StashChange {
                change,
                was_staged: true,
            })
            .collect();
        for entry in &unstaged {
            if !entry.vector.is_empty() {
                self.store()
                    .save_vector_blob(&hash::vector_bytes(&entry.vector), entry.vector.len() as u32)?;
            }
            changes.push(StashChange {
                change: StagedChange {
                    class: entry.class.clone(),
                    object_id: entry.object_id.clone(),
                    change_type: entry.change_type,
                    object_data: entry.object_data.clone(),
                    previous_data: entry.previous_data.clone(),
                    vector_hash: entry.vector_hash.clone(),
                    previous_vector_hash: entry.previous_vector_hash.clone(),
                    staged_at: now,
                },
                was_staged: false,
            });
        }

        for change in &changes {
            if !change.change.vector_hash.is_empty() {
                self.store().add_vector_ref(&change.change.vector_hash)?;
            }
        }

        let message = message.map(str::to_string).unwrap_or_else(|| {
            format!(
                "WIP on {}",
                if branch.is_empty() { "HEAD" } else { branch.as_str() }
            )
        });
        let stash = Stash {
            id: self.store().next_stash_id()?,
            message,
            branch_name: branch,
            commit_id: head.clone(),
            created_at: now,
            changes,
        };
        self.store().put_stash(&stash)?;

        self.store().clear_staging()?;
        for warning in self.restore_state(ctx, &head)? {
            warn!(%warning, "while rolling back to HEAD for stash");
        }
        Ok(stash)
    }

    pub fn stash_list(&self) -> Result<Vec<Stash>> {
        self.store().stashes()
    }

    pub fn stash_get(&self, index: usize) -> Result<Stash> {
        self.stash_list()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| WvcError::not_found("stash", format!("stash@{{{index}}}")))
    }

    /// Replay a stash onto the live store; `was_staged` changes go back into
    /// staging. The stash itself is kept.
    pub fn stash_apply(&self, ctx: &Context, index: usize) -> Result<Stash> {
        let stash = self.stash_get(index)?;
        for item in &stash.changes {
            ctx.check()?;
            let change = &item.change;
            match change.change_type {
                OperationType::Insert | OperationType::Update => {
                    let entry = StateEntry {
                        object_json: change.object_data.clone(),
                        vector_hash: change.vector_hash.clone(),
                    };
                    let object = self.state_to_object(&entry)?;
                    let exists = self
                        .objects()
                        .get_object(ctx, &object.class, &object.id)?
                        .is_some();
                    if exists {
                        self.objects().update_object(ctx, &object)?;
                    } else {
                        self.objects().create_object(ctx, &object)?;
                    }
                }
                OperationType::Delete => {
                    if let Err(err) = self
                        .objects()
                        .delete_object(ctx, &change.class, &change.object_id)
                    {
                        warn!(%err, class = %change.class, id = %change.object_id,
                            "stashed delete had nothing to delete");
                    }
                }
            }
            if item.was_staged {
                self.store()
                    .put_staged_change(&object_key(&change.class, &change.object_id), change)?;
            }
        }
        Ok(stash)
    }

    pub fn stash_pop(&self, ctx: &Context, index: usize) -> Result<Stash> {
        let stash = self.stash_apply(ctx, index)?;
        self.drop_stash_entry(&stash)?;
        Ok(stash)
    }

    pub fn stash_drop(&self, index: usize) -> Result<Stash> {
        let stash = self.stash_get(index)?;
        self.drop_stash_entry(&stash)?;
        Ok(stash)
    }

    pub fn stash_clear(&self) -> Result<usize> {
        let stashes = self.stash_list()?;
        let count = stashes.len();
        for stash in stashes {
            self.drop_stash_entry(&stash)?;
        }
        Ok(count)
    }

    fn drop_stash_entry(&self, stash: &Stash) -> Result<()> {
        for item in &stash.changes {
            if !item.change.vector_hash.is_empty() {
                self.store().release_vector_ref(&item.change.vector_hash)?;
            }
        }
        self.store().delete_stash(stash.id)
    }
}
