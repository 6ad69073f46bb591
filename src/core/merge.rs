//! Three-way merge over reconstructed states. Ancestry is computed over the
//! commit DAG (primary + merge parents, ids only); the merge base is the
//! first BFS hit from the other side that is also an ancestor of ours.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use chrono::Utc;

use crate::core::checkout::StateEntry;
use crate::core::context::Context;
use crate::core::models::Commit;
use crate::core::repository::Repository;
use crate::core::store::CommitFinalize;
use crate::error::{Result, WvcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Report conflicts and change nothing.
    Abort,
    Ours,
    Theirs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    AddAdd,
    ModifyModify,
    ModifyDelete,
    DeleteModify,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::AddAdd => "add/add",
            ConflictType::ModifyModify => "modify/modify",
            ConflictType::ModifyDelete => "modify/delete",
            ConflictType::DeleteModify => "delete/modify",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeConflict {
    pub class: String,
    pub object_id: String,
    pub conflict_type: ConflictType,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub no_ff: bool,
    pub strategy: Option<MergeStrategy>,
    pub message: Option<String>,
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub success: bool,
    pub fast_forward: bool,
    pub merge_commit: Option<Commit>,
    pub conflicts: Vec<MergeConflict>,
    pub resolved_conflicts: usize,
    pub warnings: Vec<String>,
}

impl MergeOutcome {
    fn up_to_date() -> Self {
        MergeOutcome {
            success: true,
            fast_forward: false,
            merge_commit: None,
            conflicts: vec![],
            resolved_conflicts: 0,
            warnings: vec!["already up to date".to_string()],
        }
    }
}

impl Repository {
    /// Closure of commits reachable from `commit_id` over primary and merge
    /// parents, the commit itself included. Missing parents (shallow
    /// boundary) end the walk on that edge.
    pub fn ancestors(&self, commit_id: &str) -> Result<HashSet<String>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(commit_id.to_string());
        while let Some(id) = queue.pop_front() {
            if id.is_empty() || !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.store().try_get_commit(&id)? {
                queue.push_back(commit.parent_id);
                queue.push_back(commit.merge_parent_id);
            }
        }
        Ok(seen)
    }

    /// First BFS hit from `theirs` that is an ancestor of `ours`. With
    /// multiple candidate bases this returns one valid ancestor; callers
    /// must not depend on which.
    pub fn merge_base(&self, ours: &str, theirs: &str) -> Result<Option<String>> {
        let our_ancestors = self.ancestors(ours)?;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(theirs.to_string());
        while let Some(id) = queue.pop_front() {
            if id.is_empty() || !seen.insert(id.clone()) {
                continue;
            }
            if our_ancestors.contains(&id) {
                return Ok(Some(id));
            }
            if let Some(commit) = self.store().try_get_commit(&id)? {
                queue.push_back(commit.parent_id);
                queue.push_back(commit.merge_parent_id);
            }
        }
        Ok(None)
    }

    pub fn merge(&self, ctx: &Context, target: &str, opts: MergeOptions) -> Result<MergeOutcome> {
        let current = self.store().current_branch()?;
        if current.is_empty() {
            return Err(WvcError::DetachedHead("merge needs a branch".to_string()));
        }
        if target == current {
            return Err(WvcError::InvalidInput(format!(
                "cannot merge branch '{current}' into itself"
            )));
        }
        if self.has_uncommitted_changes(ctx)? {
            return Err(WvcError::DirtyWorkingSet);
        }

        let theirs = self.resolve_ref(target)?.commit_id;
        let ours = self.store().head()?;
        if ours.is_empty() {
            return Err(WvcError::invalid_ref("HEAD", "no commits yet"));
        }
        if ours == theirs {
            return Ok(MergeOutcome::up_to_date());
        }

        // fast-forward when we are strictly behind
        if !opts.no_ff && self.ancestors(&theirs)?.contains(&ours) {
            let warnings = self.restore_state(ctx, &theirs)?;
            self.store().set_head(&theirs)?;
            self.store().set_branch(&current, &theirs)?;
            return Ok(MergeOutcome {
                success: true,
                fast_forward: true,
                merge_commit: None,
                conflicts: vec![],
                resolved_conflicts: 0,
                warnings,
            });
        }

        if self.ancestors(&ours)?.contains(&theirs) {
            // they are strictly behind us
            return Ok(MergeOutcome::up_to_date());
        }

        let base_id = self.merge_base(&ours, &theirs)?;
        let base = match &base_id {
            Some(id) => self.reconstruct_state(id)?,
            None => BTreeMap::new(),
        };
        let ours_state = self.reconstruct_state(&ours)?;
        let theirs_state = self.reconstruct_state(&theirs)?;

        let mut keys: BTreeSet<String> = BTreeSet::new();
        keys.extend(base.keys().cloned());
        keys.extend(ours_state.keys().cloned());
        keys.extend(theirs_state.keys().cloned());

        let mut merged = ours_state.clone();
        let mut conflicts = Vec::new();
        for key in &keys {
            let b = hashes_of(base.get(key));
            let o = hashes_of(ours_state.get(key));
            let t = hashes_of(theirs_state.get(key));

            if o == b {
                if t != b {
                    // only they changed it
                    match theirs_state.get(key) {
                        Some(entry) => {
                            merged.insert(key.clone(), entry.clone());
                        }
                        None => {
                            merged.remove(key);
                        }
                    }
                }
                continue;
            }
            if t == b || o == t {
                continue;
            }

            let (class, object_id) = key.split_once('/').unwrap_or((key.as_str(), ""));
            let conflict_type = if base.get(key).is_none() {
                ConflictType::AddAdd
            } else if ours_state.get(key).is_none() {
                ConflictType::DeleteModify
            } else if theirs_state.get(key).is_none() {
                ConflictType::ModifyDelete
            } else {
                ConflictType::ModifyModify
            };
            conflicts.push(MergeConflict {
                class: class.to_string(),
                object_id: object_id.to_string(),
                conflict_type,
            });
        }

        let mut resolved = 0;
        if !conflicts.is_empty() {
            match opts.strategy.unwrap_or(MergeStrategy::Abort) {
                MergeStrategy::Abort => {
                    return Ok(MergeOutcome {
                        success: false,
                        fast_forward: false,
                        merge_commit: None,
                        conflicts,
                        resolved_conflicts: 0,
                        warnings: vec![],
                    });
                }
                MergeStrategy::Ours => {
                    // merged already carries our side for conflicting keys
                    resolved = conflicts.len();
                }
                MergeStrategy::Theirs => {
                    for conflict in &conflicts {
                        let key = format!("{}/{}", conflict.class, conflict.object_id);
                        match theirs_state.get(&key) {
                            Some(entry) => {
                                merged.insert(key, entry.clone());
                            }
                            None => {
                                merged.remove(&key);
                            }
                        }
                    }
                    resolved = conflicts.len();
                }
            }
        }

        let applied = self.apply_state_to_live(ctx, &merged)?;
        self.record_diff_entries(&applied)?;

        let message = opts
            .message
            .unwrap_or_else(|| format!("Merge branch '{target}' into {current}"));
        let schema = self.objects().get_schema(ctx)?;
        let commit = self.store().finalize_commit(CommitFinalize {
            message: &message,
            merge_parent_id: Some(&theirs),
            timestamp: Utc::now(),
            schema: &schema,
            scan_updates: vec![],
            clear_staging: true,
        })?;
        self.refresh_known_state(&commit.id);

        Ok(MergeOutcome {
            success: true,
            fast_forward: false,
            merge_commit: Some(commit),
            conflicts,
            resolved_conflicts: resolved,
            warnings: vec![],
        })
    }
}

fn hashes_of(entry: Option<&StateEntry>) -> (String, String) {
    match entry {
        Some(entry) => (entry.object_hash(), entry.vector_hash.clone()),
        None => (String::new(), String::new()),
    }
}
