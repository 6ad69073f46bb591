//! Staging: materializes diff rows into the staging bucket keyed by
//! `class/id`. Staging never mutates the object store, and never touches
//! vector refcounts; blob bytes are parked content-addressed so a later
//! commit can seal them.

use chrono::Utc;

use crate::core::context::Context;
use crate::core::diff::DiffEntry;
use crate::core::hash;
use crate::core::models::{object_key, StagedChange};
use crate::core::repository::Repository;
use crate::error::Result;

impl Repository {
    pub fn stage_all(&self, ctx: &Context) -> Result<usize> {
        let entries = self.diff(ctx)?;
        self.stage_entries(&entries)
    }

    pub fn stage_class(&self, ctx: &Context, class: &str) -> Result<usize> {
        let entries = self.diff_class(ctx, class)?;
        self.stage_entries(&entries)
    }

    pub fn stage_object(&self, ctx: &Context, class: &str, id: &str) -> Result<usize> {
        match self.diff_object(ctx, class, id)? {
            Some(entry) => self.stage_entries(&[entry]),
            None => Ok(0),
        }
    }

    fn stage_entries(&self, entries: &[DiffEntry]) -> Result<usize> {
        let now = Utc::now();
        for entry in entries {
            if !entry.vector.is_empty() {
                self.store().save_vector_blob(
                    &hash::vector_bytes(&entry.vector),
                    entry.vector.len() as u32,
                )?;
            }
            let change = StagedChange {
                class: entry.class.clone(),
                object_id: entry.object_id.clone(),
                change_type: entry.change_type,
                object_data: entry.object_data.clone(),
                previous_data: entry.previous_data.clone(),
                vector_hash: entry.vector_hash.clone(),
                previous_vector_hash: entry.previous_vector_hash.clone(),
                staged_at: now,
            };
            self.store().put_staged_change(&entry.key(), &change)?;
        }
        Ok(entries.len())
    }

    pub fn unstage_all(&self) -> Result<usize> {
        let count = self.store().staged_changes()?.len();
        self.store().clear_staging()?;
        Ok(count)
    }

    pub fn unstage_class(&self, class: &str) -> Result<usize> {
        let prefix = format!("{class}/");
        let mut removed = 0;
        for (key, _) in self.store().staged_changes()? {
            if key.starts_with(&prefix) {
                self.store().delete_staged_change(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn unstage_object(&self, class: &str, id: &str) -> Result<usize> {
        let key = object_key(class, id);
        if self.store().staged_change(&key)?.is_some() {
            self.store().delete_staged_change(&key)?;
            Ok(1)
        } else {
            Ok(0)
        }
    }
}
