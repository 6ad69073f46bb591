//! Branches, HEAD, and ref resolution. Branch names are weak pointers into
//! the commit DAG; HEAD and the current-branch name live in the store, never
//! in process state.

use crate::core::models::Commit;
use crate::core::repository::Repository;
use crate::error::{Result, WvcError};

pub const RESERVED_NAMES: [&str; 3] = ["HEAD", "MERGE_HEAD", "FETCH_HEAD"];

const MIN_SHORT_ID: usize = 4;

pub fn validate_branch_name(name: &str) -> Result<()> {
    if RESERVED_NAMES.contains(&name) {
        return Err(WvcError::ReservedName(name.to_string()));
    }
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(WvcError::InvalidName {
            name: name.to_string(),
            reason: "branch names may only contain letters, digits, '_' and '-'".to_string(),
        });
    }
    Ok(())
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// A resolved ref: the commit it points at, and the branch name when the
/// ref was a local branch (empty otherwise).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub commit_id: String,
    pub branch: String,
}

impl Repository {
    pub fn head(&self) -> Result<String> {
        self.store().head()
    }

    pub fn current_branch(&self) -> Result<String> {
        self.store().current_branch()
    }

    pub fn create_branch(&self, name: &str, start_point: Option<&str>) -> Result<String> {
        validate_branch_name(name)?;
        if self.store().branch(name)?.is_some() {
            return Err(WvcError::already_exists("branch", name));
        }
        let commit_id = match start_point {
            Some(reference) => self.resolve_ref(reference)?.commit_id,
            None => {
                let head = self.store().head()?;
                if head.is_empty() {
                    return Err(WvcError::invalid_ref("HEAD", "no commits yet"));
                }
                head
            }
        };
        self.store().set_branch(name, &commit_id)?;
        Ok(commit_id)
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        if self.store().branch(name)?.is_none() {
            return Err(WvcError::not_found("branch", name));
        }
        if self.store().current_branch()? == name {
            return Err(WvcError::InvalidInput(format!(
                "cannot delete the current branch '{name}'"
            )));
        }
        self.store().delete_branch(name)
    }

    /// All branches plus the current one (empty when detached).
    pub fn list_branches(&self) -> Result<(Vec<(String, String)>, String)> {
        Ok((self.store().branches()?, self.store().current_branch()?))
    }

    /// Resolution ladder: `HEAD`, `HEAD~N`, branch, `<remote>/<branch>`,
    /// full commit id, then unique short id (≥ 4 hex chars).
    pub fn resolve_ref(&self, reference: &str) -> Result<ResolvedRef> {
        if reference == "HEAD" {
            let head = self.store().head()?;
            if head.is_empty() {
                return Err(WvcError::invalid_ref(reference, "no commits yet"));
            }
            return Ok(ResolvedRef {
                commit_id: head,
                branch: self.store().current_branch()?,
            });
        }

        if let Some(suffix) = reference.strip_prefix("HEAD~") {
            let steps: u64 = suffix.parse().map_err(|_| {
                WvcError::invalid_ref(reference, "expected HEAD~N with a non-negative number")
            })?;
            let head = self.store().head()?;
            if head.is_empty() {
                return Err(WvcError::invalid_ref(reference, "no commits yet"));
            }
            let mut cursor = head;
            for _ in 0..steps {
                let commit = self.store().get_commit(&cursor)?;
                if commit.parent_id.is_empty() {
                    return Err(WvcError::invalid_ref(
                        reference,
                        "walked past the root commit",
                    ));
                }
                cursor = commit.parent_id;
            }
            return Ok(ResolvedRef {
                commit_id: cursor,
                branch: String::new(),
            });
        }

        if let Some(commit_id) = self.store().branch(reference)? {
            return Ok(ResolvedRef {
                commit_id,
                branch: reference.to_string(),
            });
        }

        if let Some((remote, branch)) = reference.split_once('/') {
            if self.store().remote(remote)?.is_some() {
                if let Some(commit_id) = self.store().remote_ref(remote, branch)? {
                    return Ok(ResolvedRef {
                        commit_id,
                        branch: String::new(),
                    });
                }
            }
        }

        if reference.len() == 64 && is_hex(reference) && self.store().has_commit(reference)? {
            return Ok(ResolvedRef {
                commit_id: reference.to_string(),
                branch: String::new(),
            });
        }

        if reference.len() >= MIN_SHORT_ID && reference.len() < 64 && is_hex(reference) {
            let matches: Vec<String> = self
                .store()
                .commit_ids()?
                .into_iter()
                .filter(|id| id.starts_with(reference))
                .collect();
            match matches.len() {
                0 => {}
                1 => {
                    return Ok(ResolvedRef {
                        commit_id: matches.into_iter().next().unwrap_or_default(),
                        branch: String::new(),
                    })
                }
                _ => return Err(WvcError::AmbiguousRef(reference.to_string())),
            }
        }

        Err(WvcError::not_found("ref", reference))
    }

    pub fn resolve_commit(&self, reference: &str) -> Result<Commit> {
        let resolved = self.resolve_ref(reference)?;
        self.store().get_commit(&resolved.commit_id)
    }
}
