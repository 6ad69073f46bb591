//! Remotes: stored configuration, token resolution, and the client
//! interface the sync engine talks through. `MemoryRemote` carries the
//! receiver-side semantics (CAS branch updates, content-addressed blob and
//! bundle storage) for tests; `HttpRemoteClient` is the thin JSON-over-HTTP
//! mapping of the same calls.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::context::Context;
use crate::core::hash;
use crate::core::models::{CommitBundle, Remote};
use crate::core::refs::RESERVED_NAMES;
use crate::core::repository::Repository;
use crate::error::{Result, WvcError};

pub const TOKEN_ENV: &str = "WVC_REMOTE_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiatePushResponse {
    pub missing: Vec<String>,
    /// Empty when the remote branch does not exist yet.
    pub remote_tip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiatePullResponse {
    /// Tip-first: the newest missing commit leads.
    pub missing: Vec<String>,
    pub remote_tip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckVectorsResponse {
    pub have: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub commit_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub default_branch: String,
}

pub trait RemoteClient: Send + Sync {
    fn negotiate_push(
        &self,
        ctx: &Context,
        branch: &str,
        commit_ids: &[String],
    ) -> Result<NegotiatePushResponse>;
    fn negotiate_pull(
        &self,
        ctx: &Context,
        branch: &str,
        local_tip: &str,
        depth: u32,
    ) -> Result<NegotiatePullResponse>;
    fn check_vectors(&self, ctx: &Context, hashes: &[String]) -> Result<CheckVectorsResponse>;
    fn upload_vector(&self, ctx: &Context, hash: &str, bytes: &[u8], dims: u32) -> Result<()>;
    fn download_vector(&self, ctx: &Context, hash: &str) -> Result<(Vec<u8>, u32)>;
    fn upload_commit_bundle(&self, ctx: &Context, bundle: &CommitBundle) -> Result<()>;
    fn download_commit_bundle(&self, ctx: &Context, id: &str) -> Result<CommitBundle>;
    /// Compare-and-swap: fails when the server-side tip no longer equals
    /// `expected_tip`.
    fn update_branch(&self, ctx: &Context, branch: &str, new_tip: &str, expected_tip: &str)
        -> Result<()>;
    fn delete_branch(&self, ctx: &Context, branch: &str) -> Result<()>;
    fn list_branches(&self, ctx: &Context) -> Result<Vec<BranchInfo>>;
    fn get_branch(&self, ctx: &Context, branch: &str) -> Result<Option<BranchInfo>>;
    fn get_repo_info(&self, ctx: &Context) -> Result<RepoInfo>;
}

pub fn validate_remote_name(name: &str) -> Result<()> {
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
            reason: "remote names may only contain letters, digits, '_' and '-'".to_string(),
        });
    }
    Ok(())
}

pub fn validate_remote_url(raw: &str) -> Result<()> {
    let url = url::Url::parse(raw).map_err(|e| WvcError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(WvcError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().unwrap_or("").is_empty() {
        return Err(WvcError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    if url.path().trim_matches('/').is_empty() {
        return Err(WvcError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing repository path".to_string(),
        });
    }
    Ok(())
}

/// Per-remote env token overrides the global env token overrides the stored
/// one. The per-remote variable is the uppercased remote name with
/// non-alphanumeric characters mapped to '_'.
pub fn resolve_token(remote: &Remote) -> Option<String> {
    let suffix: String = remote
        .name
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if let Ok(token) = std::env::var(format!("{TOKEN_ENV}_{suffix}")) {
        if !token.is_empty() {
            return Some(token);
        }
    }
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.is_empty() {
            return Some(token);
        }
    }
    remote.token.clone()
}

impl Repository {
    pub fn remote_add(&self, name: &str, url: &str, token: Option<String>) -> Result<Remote> {
        validate_remote_name(name)?;
        validate_remote_url(url)?;
        if self.store().remote(name)?.is_some() {
            return Err(WvcError::already_exists("remote", name));
        }
        let remote = Remote {
            name: name.to_string(),
            url: url.to_string(),
            token,
        };
        self.store().put_remote(&remote)?;
        Ok(remote)
    }

    pub fn remote_remove(&self, name: &str) -> Result<()> {
        if self.store().remote(name)?.is_none() {
            return Err(WvcError::not_found("remote", name));
        }
        self.store().delete_remote(name)?;
        self.store().delete_remote_refs(name)
    }

    pub fn remote_set_url(&self, name: &str, url: &str) -> Result<()> {
        validate_remote_url(url)?;
        let mut remote = self
            .store()
            .remote(name)?
            .ok_or_else(|| WvcError::not_found("remote", name))?;
        remote.url = url.to_string();
        self.store().put_remote(&remote)
    }

    pub fn remote_set_token(&self, name: &str, token: Option<String>) -> Result<()> {
        let mut remote = self
            .store()
            .remote(name)?
            .ok_or_else(|| WvcError::not_found("remote", name))?;
        remote.token = token;
        self.store().put_remote(&remote)
    }

    pub fn remote_list(&self) -> Result<Vec<Remote>> {
        self.store().remotes()
    }

    /// Named remote, or the only configured one.
    pub fn get_remote(&self, name: Option<&str>) -> Result<Remote> {
        match name {
            Some(name) => self
                .store()
                .remote(name)?
                .ok_or_else(|| WvcError::not_found("remote", name)),
            None => {
                let mut remotes = self.store().remotes()?;
                match remotes.len() {
                    0 => Err(WvcError::not_found("remote", "<default>")),
                    1 => Ok(remotes.remove(0)),
                    _ => Err(WvcError::InvalidInput(
                        "multiple remotes configured; name one".to_string(),
                    )),
                }
            }
        }
    }
}

// ---- in-memory remote (receiver semantics, used by tests) ----

#[derive(Default)]
struct MemoryRemoteState {
    bundles: HashMap<String, CommitBundle>,
    vectors: HashMap<String, (Vec<u8>, u32)>,
    branches: HashMap<String, String>,
    fail_vector_downloads: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryRemoteState>,
    /// Method-call trace, for asserting wire behavior in tests.
    calls: Mutex<Vec<String>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryRemoteState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn branch_tip(&self, branch: &str) -> Option<String> {
        self.lock().branches.get(branch).cloned()
    }

    pub fn bundle_count(&self) -> usize {
        self.lock().bundles.len()
    }

    pub fn has_vector(&self, hash: &str) -> bool {
        self.lock().vectors.contains_key(hash)
    }

    /// Make future downloads of this hash fail, for atomicity tests.
    pub fn fail_vector_download(&self, hash: &str) {
        self.lock().fail_vector_downloads.insert(hash.to_string());
    }

    /// Commits reachable from `tip` that `local_tip` does not reach,
    /// tip-first.
    fn missing_between(
        state: &MemoryRemoteState,
        tip: &str,
        local_tip: &str,
        depth: u32,
    ) -> Vec<String> {
        let mut have = HashSet::new();
        let mut queue = vec![local_tip.to_string()];
        while let Some(id) = queue.pop() {
            if id.is_empty() || !have.insert(id.clone()) {
                continue;
            }
            if let Some(bundle) = state.bundles.get(&id) {
                queue.push(bundle.commit.parent_id.clone());
                queue.push(bundle.commit.merge_parent_id.clone());
            }
        }

        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(tip.to_string());
        while let Some(id) = queue.pop_front() {
            if id.is_empty() || have.contains(&id) || !seen.insert(id.clone()) {
                continue;
            }
            if depth > 0 && missing.len() as u32 >= depth {
                break;
            }
            if let Some(bundle) = state.bundles.get(&id) {
                missing.push(id);
                queue.push_back(bundle.commit.parent_id.clone());
                queue.push_back(bundle.commit.merge_parent_id.clone());
            }
        }
        missing
    }
}

impl RemoteClient for MemoryRemote {
    fn negotiate_push(
        &self,
        ctx: &Context,
        branch: &str,
        commit_ids: &[String],
    ) -> Result<NegotiatePushResponse> {
        ctx.check()?;
        self.record(format!("negotiate_push({branch})"));
        let state = self.lock();
        let missing = commit_ids
            .iter()
            .filter(|id| !state.bundles.contains_key(*id))
            .cloned()
            .collect();
        Ok(NegotiatePushResponse {
            missing,
            remote_tip: state.branches.get(branch).cloned().unwrap_or_default(),
        })
    }

    fn negotiate_pull(
        &self,
        ctx: &Context,
        branch: &str,
        local_tip: &str,
        depth: u32,
    ) -> Result<NegotiatePullResponse> {
        ctx.check()?;
        self.record(format!("negotiate_pull({branch},{local_tip},{depth})"));
        let state = self.lock();
        let remote_tip = state.branches.get(branch).cloned().unwrap_or_default();
        let missing = Self::missing_between(&state, &remote_tip, local_tip, depth);
        Ok(NegotiatePullResponse { missing, remote_tip })
    }

    fn check_vectors(&self, ctx: &Context, hashes: &[String]) -> Result<CheckVectorsResponse> {
        ctx.check()?;
        self.record(format!("check_vectors({})", hashes.len()));
        let state = self.lock();
        let (have, missing): (Vec<String>, Vec<String>) = hashes
            .iter()
            .cloned()
            .partition(|hash| state.vectors.contains_key(hash));
        Ok(CheckVectorsResponse { have, missing })
    }

    fn upload_vector(&self, ctx: &Context, hash: &str, bytes: &[u8], dims: u32) -> Result<()> {
        ctx.check()?;
        self.record(format!("upload_vector({hash})"));
        if bytes.len() as u32 != dims * 4 {
            return Err(WvcError::Remote(format!(
                "vector {hash}: {} bytes do not match {dims} declared dims",
                bytes.len()
            )));
        }
        if hash::sha256_hex(bytes) != hash {
            return Err(WvcError::Remote(format!("vector {hash}: content mismatch")));
        }
        self.lock()
            .vectors
            .insert(hash.to_string(), (bytes.to_vec(), dims));
        Ok(())
    }

    fn download_vector(&self, ctx: &Context, hash: &str) -> Result<(Vec<u8>, u32)> {
        ctx.check()?;
        self.record(format!("download_vector({hash})"));
        let state = self.lock();
        if state.fail_vector_downloads.contains(hash) {
            return Err(WvcError::Remote(format!("vector {hash}: injected failure")));
        }
        state
            .vectors
            .get(hash)
            .cloned()
            .ok_or_else(|| WvcError::not_found("vector", hash))
    }

    fn upload_commit_bundle(&self, ctx: &Context, bundle: &CommitBundle) -> Result<()> {
        ctx.check()?;
        self.record(format!("upload_commit_bundle({})", bundle.commit.id));
        self.lock()
            .bundles
            .insert(bundle.commit.id.clone(), bundle.clone());
        Ok(())
    }

    fn download_commit_bundle(&self, ctx: &Context, id: &str) -> Result<CommitBundle> {
        ctx.check()?;
        self.record(format!("download_commit_bundle({id})"));
        self.lock()
            .bundles
            .get(id)
            .cloned()
            .ok_or_else(|| WvcError::not_found("commit", id))
    }

    fn update_branch(
        &self,
        ctx: &Context,
        branch: &str,
        new_tip: &str,
        expected_tip: &str,
    ) -> Result<()> {
        ctx.check()?;
        self.record(format!("update_branch({branch},{new_tip},{expected_tip})"));
        let mut state = self.lock();
        let current = state.branches.get(branch).cloned().unwrap_or_default();
        if current != expected_tip {
            return Err(WvcError::CasConflict);
        }
        state.branches.insert(branch.to_string(), new_tip.to_string());
        Ok(())
    }

    fn delete_branch(&self, ctx: &Context, branch: &str) -> Result<()> {
        ctx.check()?;
        self.record(format!("delete_branch({branch})"));
        self.lock()
            .branches
            .remove(branch)
            .map(|_| ())
            .ok_or_else(|| WvcError::not_found("branch", branch))
    }

    fn list_branches(&self, ctx: &Context) -> Result<Vec<BranchInfo>> {
        ctx.check()?;
        let state = self.lock();
        let mut branches: Vec<BranchInfo> = state
            .branches
            .iter()
            .map(|(name, commit_id)| BranchInfo {
                name: name.clone(),
                commit_id: commit_id.clone(),
            })
            .collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    fn get_branch(&self, ctx: &Context, branch: &str) -> Result<Option<BranchInfo>> {
        ctx.check()?;
        Ok(self.lock().branches.get(branch).map(|commit_id| BranchInfo {
            name: branch.to_string(),
            commit_id: commit_id.clone(),
        }))
    }

    fn get_repo_info(&self, ctx: &Context) -> Result<RepoInfo> {
        ctx.check()?;
        Ok(RepoInfo {
            name: "memory".to_string(),
            default_branch: "main".to_string(),
        })
    }
}

// ---- HTTP client ----

pub struct HttpRemoteClient {
    agent: ureq::Agent,
    base: String,
    token: Option<String>,
}

impl HttpRemoteClient {
    pub fn new(remote: &Remote) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base: remote.url.trim_end_matches('/').to_string(),
            token: resolve_token(remote),
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let mut req = self.agent.request(method, &format!("{}{}", self.base, path));
        if let Some(token) = &self.token {
            req = req.set("Authorization", &format!("Bearer {token}"));
        }
        req
    }

    fn map_err(err: ureq::Error, what: &str) -> WvcError {
        match err {
            ureq::Error::Status(409, _) => WvcError::CasConflict,
            ureq::Error::Status(404, _) => WvcError::not_found("remote resource", what),
            ureq::Error::Status(code, _) => {
                WvcError::Remote(format!("{what}: server returned {code}"))
            }
            other => WvcError::Remote(format!("{what}: {other}")),
        }
    }

    fn json<T: serde::de::DeserializeOwned>(resp: ureq::Response, what: &str) -> Result<T> {
        resp.into_json()
            .map_err(|e| WvcError::Remote(format!("{what}: bad response body: {e}")))
    }
}

impl RemoteClient for HttpRemoteClient {
    fn negotiate_push(
        &self,
        ctx: &Context,
        branch: &str,
        commit_ids: &[String],
    ) -> Result<NegotiatePushResponse> {
        ctx.check()?;
        let resp = self
            .request("POST", "/negotiate/push")
            .send_json(serde_json::json!({ "branch": branch, "commit_ids": commit_ids }))
            .map_err(|e| Self::map_err(e, "negotiate push"))?;
        Self::json(resp, "negotiate push")
    }

    fn negotiate_pull(
        &self,
        ctx: &Context,
        branch: &str,
        local_tip: &str,
        depth: u32,
    ) -> Result<NegotiatePullResponse> {
        ctx.check()?;
        let resp = self
            .request("POST", "/negotiate/pull")
            .send_json(serde_json::json!({
                "branch": branch,
                "local_tip": local_tip,
                "depth": depth,
            }))
            .map_err(|e| Self::map_err(e, "negotiate pull"))?;
        Self::json(resp, "negotiate pull")
    }

    fn check_vectors(&self, ctx: &Context, hashes: &[String]) -> Result<CheckVectorsResponse> {
        ctx.check()?;
        let resp = self
            .request("POST", "/vectors/check")
            .send_json(serde_json::json!({ "hashes": hashes }))
            .map_err(|e| Self::map_err(e, "check vectors"))?;
        Self::json(resp, "check vectors")
    }

    fn upload_vector(&self, ctx: &Context, hash: &str, bytes: &[u8], dims: u32) -> Result<()> {
        ctx.check()?;
        self.request("PUT", &format!("/vectors/{hash}"))
            .set("X-Vector-Dims", &dims.to_string())
            .set("Content-Type", "application/octet-stream")
            .send_bytes(bytes)
            .map_err(|e| Self::map_err(e, "upload vector"))?;
        Ok(())
    }

    fn download_vector(&self, ctx: &Context, hash: &str) -> Result<(Vec<u8>, u32)> {
        ctx.check()?;
        let resp = self
            .request("GET", &format!("/vectors/{hash}"))
            .call()
            .map_err(|e| Self::map_err(e, "download vector"))?;
        let dims = resp
            .header("X-Vector-Dims")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut bytes = Vec::new();
        resp.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| WvcError::Remote(format!("download vector: {e}")))?;
        Ok((bytes, dims))
    }

    fn upload_commit_bundle(&self, ctx: &Context, bundle: &CommitBundle) -> Result<()> {
        ctx.check()?;
        self.request("POST", "/bundles")
            .send_json(serde_json::to_value(bundle)?)
            .map_err(|e| Self::map_err(e, "upload bundle"))?;
        Ok(())
    }

    fn download_commit_bundle(&self, ctx: &Context, id: &str) -> Result<CommitBundle> {
        ctx.check()?;
        let resp = self
            .request("GET", &format!("/bundles/{id}"))
            .call()
            .map_err(|e| Self::map_err(e, "download bundle"))?;
        Self::json(resp, "download bundle")
    }

    fn update_branch(
        &self,
        ctx: &Context,
        branch: &str,
        new_tip: &str,
        expected_tip: &str,
    ) -> Result<()> {
        ctx.check()?;
        self.request("PUT", &format!("/branches/{branch}"))
            .send_json(serde_json::json!({
                "new_tip": new_tip,
                "expected_tip": expected_tip,
            }))
            .map_err(|e| Self::map_err(e, "update branch"))?;
        Ok(())
    }

    fn delete_branch(&self, ctx: &Context, branch: &str) -> Result<()> {
        ctx.check()?;
        self.request("DELETE", &format!("/branches/{branch}"))
            .call()
            .map_err(|e| Self::map_err(e, "delete branch"))?;
        Ok(())
    }

    fn list_branches(&self, ctx: &Context) -> Result<Vec<BranchInfo>> {
        ctx.check()?;
        let resp = self
            .request("GET", "/branches")
            .call()
            .map_err(|e| Self::map_err(e, "list branches"))?;
        Self::json(resp, "list branches")
    }

    fn get_branch(&self, ctx: &Context, branch: &str) -> Result<Option<BranchInfo>> {
        ctx.check()?;
        match self.request("GET", &format!("/branches/{branch}")).call() {
            Ok(resp) => Ok(Some(Self::json(resp, "get branch")?)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(Self::map_err(err, "get branch")),
        }
    }

    fn get_repo_info(&self, ctx: &Context) -> Result<RepoInfo> {
        ctx.check()?;
        let resp = self
            .request("GET", "/info")
            .call()
            .map_err(|e| Self::map_err(e, "repo info"))?;
        Self::json(resp, "repo info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validation_requires_http_host_and_path() {
        assert!(validate_remote_url("https://host.example/repos/demo").is_ok());
        assert!(validate_remote_url("http://host.example/demo").is_ok());
        assert!(matches!(
            validate_remote_url("ftp://host.example/demo"),
            Err(WvcError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_remote_url("host.example/demo"),
            Err(WvcError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_remote_url("https://host.example/"),
            Err(WvcError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn reserved_remote_names_rejected() {
        assert!(matches!(
            validate_remote_name("HEAD"),
            Err(WvcError::ReservedName(_))
        ));
        assert!(validate_remote_name("origin").is_ok());
        assert!(validate_remote_name("bad name").is_err());
    }

    #[test]
    fn memory_remote_update_branch_enforces_cas() {
        let ctx = Context::new();
        let remote = MemoryRemote::new();
        remote.update_branch(&ctx, "main", "tip1", "").unwrap();
        assert!(matches!(
            remote.update_branch(&ctx, "main", "tip2", "wrong"),
            Err(WvcError::CasConflict)
        ));
        remote.update_branch(&ctx, "main", "tip2", "tip1").unwrap();
        assert_eq!(remote.branch_tip("main").as_deref(), Some("tip2"));
    }
}
