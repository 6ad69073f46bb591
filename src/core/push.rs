//! Push: walk the local chain, negotiate what the server lacks, upload
//! missing vectors with a bounded worker pool, ship bundles oldest-first,
//! then advance the remote branch with a compare-and-swap.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::mpsc;
use std::sync::Arc;

use threadpool::ThreadPool;

use crate::core::context::Context;
use crate::core::models::{CommitBundle, SchemaSnapshot};
use crate::core::remote::RemoteClient;
use crate::core::repository::Repository;
use crate::error::{Result, WvcError};

/// Concurrent vector transfers per push or fetch.
pub const VECTOR_WORKERS: usize = 4;

#[derive(Debug)]
pub struct PushReport {
    pub remote: String,
    pub branch: String,
    pub uploaded_commits: usize,
    pub uploaded_vectors: usize,
    pub new_tip: String,
    pub up_to_date: bool,
}

impl Repository {
    pub fn push(
        &self,
        ctx: &Context,
        client: Arc<dyn RemoteClient>,
        remote_name: Option<&str>,
        branch: Option<&str>,
        force: bool,
    ) -> Result<PushReport> {
        let remote = self.get_remote(remote_name)?;
        let branch = match branch {
            Some(name) => name.to_string(),
            None => {
                let current = self.store().current_branch()?;
                if current.is_empty() {
                    return Err(WvcError::DetachedHead("push needs a branch".to_string()));
                }
                current
            }
        };
        let tip = self
            .store()
            .branch(&branch)?
            .ok_or_else(|| WvcError::not_found("branch", &branch))?;

        let chain = self.commit_chain(&tip)?;
        let nego = client.negotiate_push(ctx, &branch, &chain)?;
        if nego.missing.is_empty() && nego.remote_tip == tip {
            self.store().set_remote_ref(&remote.name, &branch, &tip)?;
            return Ok(PushReport {
                remote: remote.name,
                branch,
                uploaded_commits: 0,
                uploaded_vectors: 0,
                new_tip: tip,
                up_to_date: true,
            });
        }

        // keep our tip-first chain order for the server's missing subset
        let missing_set: HashSet<&String> = nego.missing.iter().collect();
        let missing: Vec<String> = chain
            .iter()
            .filter(|id| missing_set.contains(id))
            .cloned()
            .collect();

        let mut hashes: BTreeSet<String> = BTreeSet::new();
        for id in &missing {
            for op in self.store().operations_for_commit(id)? {
                if !op.vector_hash.is_empty() {
                    hashes.insert(op.vector_hash);
                }
            }
        }
        let hashes: Vec<String> = hashes.into_iter().collect();
        let check = client.check_vectors(ctx, &hashes)?;

        let mut jobs = Vec::new();
        for hash in &check.missing {
            let blob = self
                .store()
                .get_vector(hash)?
                .ok_or_else(|| WvcError::not_found("vector", hash))?;
            jobs.push((hash.clone(), blob.bytes, blob.dims));
        }
        let uploaded_vectors = jobs.len();
        upload_vectors(ctx, &client, jobs)?;

        // bundles go oldest-first so the receiver always has the parents
        for id in missing.iter().rev() {
            ctx.check()?;
            let bundle = self.bundle_for(id)?;
            client.upload_commit_bundle(ctx, &bundle)?;
        }

        if !force && !nego.remote_tip.is_empty() && !chain.contains(&nego.remote_tip) {
            return Err(WvcError::Diverged(
                "push rejected: remote branch has diverged; pull first or push --force".to_string(),
            ));
        }

        client.update_branch(ctx, &branch, &tip, &nego.remote_tip)?;
        self.store().set_remote_ref(&remote.name, &branch, &tip)?;

        Ok(PushReport {
            remote: remote.name,
            branch,
            uploaded_commits: missing.len(),
            uploaded_vectors,
            new_tip: tip,
            up_to_date: false,
        })
    }

    /// Full chain tip→root, BFS over primary and merge parents, tip first.
    pub(crate) fn commit_chain(&self, tip: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(tip.to_string());
        while let Some(id) = queue.pop_front() {
            if id.is_empty() || !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.store().try_get_commit(&id)? {
                chain.push(id);
                queue.push_back(commit.parent_id);
                queue.push_back(commit.merge_parent_id);
            }
        }
        Ok(chain)
    }

    pub(crate) fn bundle_for(&self, commit_id: &str) -> Result<CommitBundle> {
        let commit = self.store().get_commit(commit_id)?;
        let operations = self.store().operations_for_commit(commit_id)?;
        let schema = self
            .store()
            .schema_version(commit_id)?
            .map(|version| SchemaSnapshot {
                schema_json: version.schema_json,
                schema_hash: version.schema_hash,
            });
        Ok(CommitBundle {
            commit,
            operations,
            schema,
        })
    }
}

/// Upload blobs with a bounded pool; the first failure cancels the
/// remaining workers through a pool-wide context.
fn upload_vectors(
    ctx: &Context,
    client: &Arc<dyn RemoteClient>,
    jobs: Vec<(String, Vec<u8>, u32)>,
) -> Result<()> {
    if jobs.is_empty() {
        return Ok(());
    }
    let pool = ThreadPool::new(VECTOR_WORKERS.min(jobs.len()));
    let pool_ctx = Context::new();
    let (tx, rx) = mpsc::channel();

    for (hash, bytes, dims) in jobs {
        let client = client.clone();
        let outer = ctx.clone();
        let pool_ctx = pool_ctx.clone();
        let tx = tx.clone();
        pool.execute(move || {
            let result = if outer.is_cancelled() || pool_ctx.is_cancelled() {
                Err(WvcError::Cancelled)
            } else {
                client.upload_vector(&pool_ctx, &hash, &bytes, dims)
            };
            if result.is_err() {
                pool_ctx.cancel();
            }
            let _ = tx.send(result);
        });
    }
    drop(tx);

    let mut first_error = None;
    let mut cancelled = false;
    for result in rx {
        match result {
            Ok(()) => {}
            Err(WvcError::Cancelled) => cancelled = true,
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    pool.join();

    match first_error {
        Some(err) => Err(err),
        None if cancelled => Err(WvcError::Cancelled),
        None => Ok(()),
    }
}
