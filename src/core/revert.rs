//! Revert: undo one commit by applying the reverse of each of its
//! operations in reverse sequence order, bracketed by the schema steps the
//! data depends on, then seal the reversal as a new commit on HEAD.

use chrono::Utc;

use crate::core::checkout::StateEntry;
use crate::core::context::Context;
use crate::core::diff::schema_diff;
use crate::core::models::{Commit, Operation, OperationType};
use crate::core::repository::Repository;
use crate::core::store::CommitFinalize;
use crate::error::Result;

impl Repository {
    pub fn revert(&self, ctx: &Context, reference: &str) -> Result<(Commit, Vec<String>)> {
        let target = self.resolve_commit(reference)?;
        let parent_schema = self.schema_at(&target.parent_id)?;
        let target_schema = self.schema_at(&target.id)?;
        // what the target commit did to the schema
        let changes = schema_diff(&parent_schema, &target_schema);

        let mut warnings = Vec::new();

        // classes and properties the commit deleted must exist again before
        // their objects come back
        for name in &changes.removed_classes {
            if let Some(class) = parent_schema.class(name) {
                if self.objects().get_schema(ctx)?.class(name).is_none() {
                    self.objects().create_class(ctx, class)?;
                }
            }
        }
        for (class, prop) in &changes.removed_properties {
            if let Some(property) = parent_schema.class(class).and_then(|c| c.property(prop)) {
                self.objects().add_property(ctx, class, property)?;
            }
        }

        let ops = self.store().operations_for_commit(&target.id)?;
        let now = Utc::now();
        for op in ops.iter().rev() {
            ctx.check()?;
            let mut reverse = reverse_operation(op, now);
            self.apply_reverse(ctx, &reverse)?;
            self.store().append_pending_operation(&mut reverse)?;
        }

        // classes the commit introduced go away after their objects did
        for name in &changes.added_classes {
            if let Err(err) = self.objects().delete_class(ctx, name) {
                warnings.push(format!("cannot delete class {name}: {err}"));
            }
        }
        for (class, prop) in &changes.added_properties {
            warnings.push(format!("class {class}: cannot remove property {prop}"));
        }
        for class in &changes.changed_vectorizers {
            warnings.push(format!("class {class}: cannot revert vectorizer change"));
        }
        for (class, prop) in &changes.changed_property_types {
            warnings.push(format!(
                "class {class}: cannot revert type change of property {prop}"
            ));
        }

        let schema = self.objects().get_schema(ctx)?;
        let commit = self.store().finalize_commit(CommitFinalize {
            message: &format!("Revert: {}", target.message),
            merge_parent_id: None,
            timestamp: now,
            schema: &schema,
            scan_updates: vec![],
            clear_staging: false,
        })?;
        self.refresh_known_state(&commit.id);
        Ok((commit, warnings))
    }

    fn apply_reverse(&self, ctx: &Context, reverse: &Operation) -> Result<()> {
        match reverse.op_type {
            OperationType::Insert | OperationType::Update => {
                let entry = StateEntry {
                    object_json: reverse.object_data.clone(),
                    vector_hash: reverse.vector_hash.clone(),
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
                Ok(())
            }
            OperationType::Delete => {
                self.objects()
                    .delete_object(ctx, &reverse.class, &reverse.object_id)
            }
        }
    }
}

/// Swap an operation's direction: inserts delete, deletes re-insert the
/// previous object with its previous vector, updates write the previous
/// state back.
fn reverse_operation(op: &Operation, now: chrono::DateTime<Utc>) -> Operation {
    let op_type = match op.op_type {
        OperationType::Insert => OperationType::Delete,
        OperationType::Delete => OperationType::Insert,
        OperationType::Update => OperationType::Update,
    };
    Operation {
        commit_id: String::new(),
        seq: 0,
        op_type,
        class: op.class.clone(),
        object_id: op.object_id.clone(),
        object_data: op.previous_data.clone(),
        previous_data: op.object_data.clone(),
        vector_hash: op.previous_vector_hash.clone(),
        previous_vector_hash: op.vector_hash.clone(),
        committed: false,
        reverted: true,
        timestamp: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reverse_swaps_direction_and_payloads() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let op = Operation {
            commit_id: "c1".to_string(),
            seq: 3,
            op_type: OperationType::Update,
            class: "Article".to_string(),
            object_id: "obj-001".to_string(),
            object_data: "after".to_string(),
            previous_data: "before".to_string(),
            vector_hash: "new".to_string(),
            previous_vector_hash: "old".to_string(),
            committed: true,
            reverted: false,
            timestamp: now,
        };
        let reverse = reverse_operation(&op, now);
        assert_eq!(reverse.op_type, OperationType::Update);
        assert_eq!(reverse.object_data, "before");
        assert_eq!(reverse.previous_data, "after");
        assert_eq!(reverse.vector_hash, "old");
        assert_eq!(reverse.previous_vector_hash, "new");
        assert!(reverse.reverted);

        let insert = Operation {
            op_type: OperationType::Insert,
            ..op.clone()
        };
        assert_eq!(reverse_operation(&insert, now).op_type, OperationType::Delete);
        let delete = Operation {
            op_type: OperationType::Delete,
            ..op
        };
        assert_eq!(reverse_operation(&delete, now).op_type, OperationType::Insert);
    }
}
