//! Checkout and reset: reconstruct the object set at any commit by replaying
//! the primary-parent chain, then drive the live store to match. Vectors are
//! restored byte-exact from the blob store, never re-derived.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::warn;

use crate::core::context::Context;
use crate::core::diff::DiffEntry;
use crate::core::hash;
use crate::core::models::{object_key, KnownObject, OperationType, Schema, VectorObject};
use crate::core::refs::{validate_branch_name, ResolvedRef};
use crate::core::repository::Repository;
use crate::error::{Result, WvcError};

/// One object in a reconstructed historical state.
#[derive(Debug, Clone)]
pub struct StateEntry {
    /// Canonical JSON of the object (class, id, properties).
    pub object_json: String,
    pub vector_hash: String,
}

impl StateEntry {
    pub fn object_hash(&self) -> String {
        hash::sha256_hex(self.object_json.as_bytes())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutOptions {
    pub force: bool,
    /// Create this branch at the target and switch to it.
    pub create_branch: Option<String>,
}

#[derive(Debug)]
pub struct CheckoutResult {
    pub commit_id: String,
    /// Empty when the checkout left HEAD detached.
    pub branch: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Soft,
    Mixed,
    Hard,
}

impl ResetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetMode::Soft => "soft",
            ResetMode::Mixed => "mixed",
            ResetMode::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "soft" => Ok(ResetMode::Soft),
            "mixed" => Ok(ResetMode::Mixed),
            "hard" => Ok(ResetMode::Hard),
            other => Err(WvcError::InvalidInput(format!(
                "unknown reset mode '{other}'"
            ))),
        }
    }
}

impl Repository {
    /// Replay operations along the root→commit primary-parent path into a
    /// `class/id → state` map; last writer wins, deletes remove. On a
    /// shallow clone the replay starts at the oldest locally-present commit.
    pub fn reconstruct_state(&self, commit_id: &str) -> Result<BTreeMap<String, StateEntry>> {
        let mut path = Vec::new();
        let mut cursor = commit_id.to_string();
        while !cursor.is_empty() {
            match self.store().try_get_commit(&cursor)? {
                Some(commit) => {
                    cursor = commit.parent_id.clone();
                    path.push(commit.id);
                }
                None => break,
            }
        }
        path.reverse();

        let mut state = BTreeMap::new();
        for id in path {
            for op in self.store().operations_for_commit(&id)? {
                let key = object_key(&op.class, &op.object_id);
                match op.op_type {
                    OperationType::Insert | OperationType::Update => {
                        state.insert(
                            key,
                            StateEntry {
                                object_json: op.object_data,
                                vector_hash: op.vector_hash,
                            },
                        );
                    }
                    OperationType::Delete => {
                        state.remove(&key);
                    }
                }
            }
        }
        Ok(state)
    }

    /// Materialize a state entry into a live object, pulling the exact
    /// vector bytes out of the blob store.
    pub(crate) fn state_to_object(&self, entry: &StateEntry) -> Result<VectorObject> {
        let value: Value = serde_json::from_str(&entry.object_json)?;
        let class = value
            .get("class")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let properties = match value.get("properties") {
            Some(Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };

        let vector = if entry.vector_hash.is_empty() {
            vec![]
        } else {
            let blob = self
                .store()
                .get_vector(&entry.vector_hash)?
                .ok_or_else(|| WvcError::not_found("vector", &entry.vector_hash))?;
            decode_vector(&blob.bytes)
        };

        Ok(VectorObject {
            id,
            class,
            properties,
            vector,
            last_update_time_unix: 0,
        })
    }

    pub fn checkout(
        &self,
        ctx: &Context,
        target: Option<&str>,
        opts: CheckoutOptions,
    ) -> Result<CheckoutResult> {
        if !opts.force && self.has_uncommitted_changes(ctx)? {
            return Err(WvcError::DirtyWorkingSet);
        }

        let resolved = match (target, &opts.create_branch) {
            (Some(reference), _) => self.resolve_ref(reference)?,
            (None, Some(_)) => {
                let head = self.store().head()?;
                if head.is_empty() {
                    return Err(WvcError::invalid_ref("HEAD", "no commits yet"));
                }
                ResolvedRef {
                    commit_id: head,
                    branch: String::new(),
                }
            }
            (None, None) => {
                return Err(WvcError::InvalidInput(
                    "checkout needs a ref or -b <name>".to_string(),
                ))
            }
        };

        if let Some(name) = &opts.create_branch {
            validate_branch_name(name)?;
            if self.store().branch(name)?.is_some() {
                return Err(WvcError::already_exists("branch", name));
            }
        }

        let mut warnings = self.restore_state(ctx, &resolved.commit_id)?;
        if !self.store().staged_changes()?.is_empty() {
            self.store().clear_staging()?;
            warnings.push("cleared stale staged changes".to_string());
        }

        self.store().set_head(&resolved.commit_id)?;
        let branch = if let Some(name) = opts.create_branch {
            self.store().set_branch(&name, &resolved.commit_id)?;
            self.store().set_current_branch(&name)?;
            name
        } else {
            // detached unless the target was a local branch
            self.store().set_current_branch(&resolved.branch)?;
            resolved.branch
        };

        Ok(CheckoutResult {
            commit_id: resolved.commit_id,
            branch,
            warnings,
        })
    }

    pub fn reset(&self, ctx: &Context, target: &str, mode: ResetMode) -> Result<CheckoutResult> {
        let resolved = self.resolve_ref(target)?;
        let mut warnings = Vec::new();

        // every mode moves HEAD, and the current branch with it
        self.store().set_head(&resolved.commit_id)?;
        let current = self.store().current_branch()?;
        if !current.is_empty() {
            self.store().set_branch(&current, &resolved.commit_id)?;
        }

        match mode {
            ResetMode::Soft => {
                self.rebuild_known_from(&resolved.commit_id)?;
                let staged = self.stage_all(ctx)?;
                if staged > 0 {
                    warnings.push(format!("auto-staged {staged} pending changes"));
                }
            }
            ResetMode::Mixed => {
                self.store().clear_staging()?;
                self.rebuild_known_from(&resolved.commit_id)?;
            }
            ResetMode::Hard => {
                self.store().clear_staging()?;
                warnings.extend(self.restore_state(ctx, &resolved.commit_id)?);
            }
        }

        Ok(CheckoutResult {
            commit_id: resolved.commit_id,
            branch: current,
            warnings,
        })
    }

    /// Drive live schema + objects to the state at `commit_id`, then rebuild
    /// known-state. Schema failures and known-state rebuild failures are
    /// collected as warnings, not errors.
    pub(crate) fn restore_state(&self, ctx: &Context, commit_id: &str) -> Result<Vec<String>> {
        let state = self.reconstruct_state(commit_id)?;
        let schema = self.schema_at(commit_id)?;

        let mut warnings = self.restore_schema(ctx, &schema)?;
        self.apply_state_to_live(ctx, &state)?;

        if let Err(err) = self.rebuild_known_from_state(&state) {
            warn!(%err, "known-state rebuild failed");
            warnings.push(format!("known-state rebuild failed: {err}"));
        }
        Ok(warnings)
    }

    /// Create missing classes and properties; surplus classes are deleted
    /// (failure downgraded to a warning) and property removals or type
    /// changes are warned about, since the backing store cannot undo them.
    pub(crate) fn restore_schema(&self, ctx: &Context, target: &Schema) -> Result<Vec<String>> {
        let live = self.objects().get_schema(ctx)?;
        let mut warnings = Vec::new();

        for class in &target.classes {
            match live.class(&class.name) {
                None => self.objects().create_class(ctx, class)?,
                Some(existing) => {
                    if existing.vectorizer != class.vectorizer {
                        warnings.push(format!(
                            "class {}: vectorizer differs ({} vs {}), cannot change",
                            class.name, existing.vectorizer, class.vectorizer
                        ));
                    }
                    for prop in &class.properties {
                        match existing.property(&prop.name) {
                            None => self.objects().add_property(ctx, &class.name, prop)?,
                            Some(p) if p.data_type != prop.data_type => {
                                warnings.push(format!(
                                    "class {}: property {} type differs ({} vs {}), cannot change",
                                    class.name, prop.name, p.data_type, prop.data_type
                                ));
                            }
                            Some(_) => {}
                        }
                    }
                    for prop in &existing.properties {
                        if class.property(&prop.name).is_none() {
                            warnings.push(format!(
                                "class {}: cannot remove property {}",
                                class.name, prop.name
                            ));
                        }
                    }
                }
            }
        }

        for class in &live.classes {
            if target.class(&class.name).is_none() {
                if let Err(err) = self.objects().delete_class(ctx, &class.name) {
                    warnings.push(format!("cannot delete class {}: {err}", class.name));
                }
            }
        }
        Ok(warnings)
    }

    /// Issue the minimum create/update/delete set that turns the live store
    /// into `state`. Returns what was applied, diff-row shaped, so callers
    /// that need operations (merge) can record them.
    pub(crate) fn apply_state_to_live(
        &self,
        ctx: &Context,
        state: &BTreeMap<String, StateEntry>,
    ) -> Result<Vec<DiffEntry>> {
        let live = self.objects().get_all_objects_all_classes(ctx)?;
        let mut live_map: HashMap<String, VectorObject> = HashMap::new();
        for object in live {
            live_map.insert(object.key(), object);
        }

        let mut applied = Vec::new();

        for (key, entry) in state {
            ctx.check()?;
            let target_hash = entry.object_hash();
            match live_map.remove(key) {
                None => {
                    let object = self.state_to_object(entry)?;
                    self.objects().create_object(ctx, &object)?;
                    applied.push(DiffEntry {
                        change_type: OperationType::Insert,
                        class: object.class.clone(),
                        object_id: object.id.clone(),
                        object_data: entry.object_json.clone(),
                        previous_data: String::new(),
                        vector_hash: entry.vector_hash.clone(),
                        previous_vector_hash: String::new(),
                        vector_only: false,
                        vector: object.vector,
                    });
                }
                Some(existing) => {
                    let (live_hash, live_vector_hash) = hash::hash_object_full(&existing);
                    if live_hash == target_hash && live_vector_hash == entry.vector_hash {
                        continue;
                    }
                    let object = self.state_to_object(entry)?;
                    self.objects().update_object(ctx, &object)?;
                    applied.push(DiffEntry {
                        change_type: OperationType::Update,
                        class: object.class.clone(),
                        object_id: object.id.clone(),
                        object_data: entry.object_json.clone(),
                        previous_data: hash::canonical_object_json(
                            &existing.class,
                            &existing.id,
                            &existing.properties,
                        ),
                        vector_hash: entry.vector_hash.clone(),
                        previous_vector_hash: live_vector_hash,
                        vector_only: live_hash == target_hash,
                        vector: object.vector,
                    });
                }
            }
        }

        // anything left in the live map has no counterpart in the target
        for (_, existing) in live_map {
            ctx.check()?;
            self.objects()
                .delete_object(ctx, &existing.class, &existing.id)?;
            let (_, live_vector_hash) = hash::hash_object_full(&existing);
            applied.push(DiffEntry {
                change_type: OperationType::Delete,
                class: existing.class.clone(),
                object_id: existing.id.clone(),
                object_data: String::new(),
                previous_data: hash::canonical_object_json(
                    &existing.class,
                    &existing.id,
                    &existing.properties,
                ),
                vector_hash: String::new(),
                previous_vector_hash: live_vector_hash,
                vector_only: false,
                vector: vec![],
            });
        }

        Ok(applied)
    }

    pub(crate) fn rebuild_known_from(&self, commit_id: &str) -> Result<()> {
        let state = self.reconstruct_state(commit_id)?;
        self.rebuild_known_from_state(&state)
    }

    fn rebuild_known_from_state(&self, state: &BTreeMap<String, StateEntry>) -> Result<()> {
        let rows: Vec<(String, KnownObject)> = state
            .iter()
            .map(|(key, entry)| {
                (
                    key.clone(),
                    KnownObject {
                        object_hash: entry.object_hash(),
                        vector_hash: entry.vector_hash.clone(),
                        object_json: entry.object_json.clone(),
                    },
                )
            })
            .collect();
        self.store().replace_known_objects(&rows)
    }
}

pub(crate) fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
