//! Fetch and pull. The fetch ordering discipline is strict: bundles are
//! held in memory first, vector blobs are downloaded and verified second,
//! and only then are commits persisted one atomic bundle at a time — so any
//! commit on disk can always resolve its vectors locally.

use std::collections::BTreeSet;
use std::sync::mpsc;
use std::sync::Arc;

use threadpool::ThreadPool;
use tracing::warn;

use crate::core::context::Context;
use crate::core::hash;
use crate::core::models::CommitBundle;
use crate::core::push::VECTOR_WORKERS;
use crate::core::remote::RemoteClient;
use crate::core::repository::Repository;
use crate::error::{Result, WvcError};

#[derive(Debug)]
pub struct FetchReport {
    pub remote: String,
    pub branch: String,
    pub fetched_commits: usize,
    pub fetched_vectors: usize,
    pub remote_tip: String,
    pub up_to_date: bool,
    pub shallow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    /// Local branch was created or advanced to the remote tip.
    FastForwarded,
    UpToDate,
    /// Local branch is ahead of the remote; nothing to do.
    Ahead,
    /// Histories diverged; the local branch was left untouched.
    Diverged,
}

#[derive(Debug)]
pub struct PullReport {
    pub fetch: FetchReport,
    pub branch: String,
    pub status: PullStatus,
    pub new_tip: String,
}

impl Repository {
    pub fn fetch(
        &self,
        ctx: &Context,
        client: Arc<dyn RemoteClient>,
        remote_name: Option<&str>,
        branch: Option<&str>,
        depth: u32,
    ) -> Result<FetchReport> {
        let remote = self.get_remote(remote_name)?;
        let branch = match branch {
            Some(name) => name.to_string(),
            None => {
                let current = self.store().current_branch()?;
                if current.is_empty() {
                    client.get_repo_info(ctx)?.default_branch
                } else {
                    current
                }
            }
        };

        let local_tracking = self
            .store()
            .remote_ref(&remote.name, &branch)?
            .unwrap_or_default();
        let nego = client.negotiate_pull(ctx, &branch, &local_tracking, depth)?;

        if nego.missing.is_empty() {
            if !nego.remote_tip.is_empty() {
                self.store()
                    .set_remote_ref(&remote.name, &branch, &nego.remote_tip)?;
            }
            return Ok(FetchReport {
                remote: remote.name,
                branch,
                fetched_commits: 0,
                fetched_vectors: 0,
                remote_tip: nego.remote_tip,
                up_to_date: true,
                shallow: false,
            });
        }

        // phase 1: bundles fully into memory, nothing persisted yet
        let mut bundles: Vec<CommitBundle> = Vec::with_capacity(nego.missing.len());
        for id in &nego.missing {
            ctx.check()?;
            bundles.push(client.download_commit_bundle(ctx, id)?);
        }

        // phase 2: verified vector blobs
        let mut needed: BTreeSet<String> = BTreeSet::new();
        for bundle in &bundles {
            for op in &bundle.operations {
                for hash in [&op.vector_hash, &op.previous_vector_hash] {
                    if !hash.is_empty() && !self.store().has_vector(hash)? {
                        needed.insert(hash.clone());
                    }
                }
            }
        }
        let fetched_vectors = needed.len();
        self.download_vectors(ctx, &client, needed.into_iter().collect())?;

        // phase 3: oldest-first atomic bundle inserts
        for bundle in bundles.iter().rev() {
            ctx.check()?;
            self.store().insert_commit_bundle(bundle)?;
        }

        let mut shallow = false;
        if depth > 0 {
            if let Some(oldest) = bundles.last() {
                let parent = &oldest.commit.parent_id;
                if !parent.is_empty() && !self.store().has_commit(parent)? {
                    self.store().mark_shallow(&oldest.commit.id)?;
                    shallow = true;
                }
            }
        }

        self.store()
            .set_remote_ref(&remote.name, &branch, &nego.remote_tip)?;
        Ok(FetchReport {
            remote: remote.name,
            branch,
            fetched_commits: bundles.len(),
            fetched_vectors,
            remote_tip: nego.remote_tip,
            up_to_date: false,
            shallow,
        })
    }

    /// Fetch, then fast-forward the local branch when history allows it.
    pub fn pull(
        &self,
        ctx: &Context,
        client: Arc<dyn RemoteClient>,
        remote_name: Option<&str>,
        branch: Option<&str>,
        depth: u32,
    ) -> Result<PullReport> {
        if self.has_uncommitted_changes(ctx)? {
            return Err(WvcError::DirtyWorkingSet);
        }

        let fetch = self.fetch(ctx, client, remote_name, branch, depth)?;
        let branch = fetch.branch.clone();
        let remote_tip = fetch.remote_tip.clone();
        if remote_tip.is_empty() {
            return Ok(PullReport {
                fetch,
                branch,
                status: PullStatus::UpToDate,
                new_tip: String::new(),
            });
        }

        let local_tip = self.store().branch(&branch)?.unwrap_or_default();
        let current = self.store().current_branch()?;

        let status = if local_tip.is_empty() {
            self.advance_branch(ctx, &branch, &remote_tip, current == branch)?;
            PullStatus::FastForwarded
        } else if local_tip == remote_tip {
            PullStatus::UpToDate
        } else if self.ancestors(&remote_tip)?.contains(&local_tip) {
            self.advance_branch(ctx, &branch, &remote_tip, current == branch)?;
            PullStatus::FastForwarded
        } else if self.ancestors(&local_tip)?.contains(&remote_tip) {
            PullStatus::Ahead
        } else {
            PullStatus::Diverged
        };

        let new_tip = self.store().branch(&branch)?.unwrap_or_default();
        Ok(PullReport {
            fetch,
            branch,
            status,
            new_tip,
        })
    }

    fn advance_branch(
        &self,
        ctx: &Context,
        branch: &str,
        tip: &str,
        checked_out: bool,
    ) -> Result<()> {
        if checked_out {
            // restore the live store first so HEAD and state move together
            for warning in self.restore_state(ctx, tip)? {
                warn!(%warning, "while fast-forwarding");
            }
            self.store().set_branch(branch, tip)?;
            self.store().set_head(tip)?;
        } else {
            self.store().set_branch(branch, tip)?;
        }
        Ok(())
    }

    /// Download blobs with a bounded pool. Each worker verifies the content
    /// hash before handing the bytes over; the main thread persists them.
    /// Any failure aborts the fetch before a single commit is written.
    fn download_vectors(
        &self,
        ctx: &Context,
        client: &Arc<dyn RemoteClient>,
        hashes: Vec<String>,
    ) -> Result<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }
        let pool = ThreadPool::new(VECTOR_WORKERS.min(hashes.len()));
        let pool_ctx = Context::new();
        let (tx, rx) = mpsc::channel();

        for hash in hashes {
            let client = client.clone();
            let outer = ctx.clone();
            let pool_ctx = pool_ctx.clone();
            let tx = tx.clone();
            pool.execute(move || {
                let result = if outer.is_cancelled() || pool_ctx.is_cancelled() {
                    Err(WvcError::Cancelled)
                } else {
                    client
                        .download_vector(&pool_ctx, &hash)
                        .and_then(|(bytes, dims)| {
                            let actual = hash::sha256_hex(&bytes);
                            if actual != hash {
                                Err(WvcError::HashMismatch { hash: hash.clone(), actual })
                            } else {
                                Ok((hash.clone(), bytes, dims))
                            }
                        })
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
        let mut persisted = 0;
        for result in rx {
            match result {
                Ok((_, bytes, dims)) => {
                    // verified blobs persist even if a sibling later fails;
                    // content addressing makes the retry reuse them
                    self.store().save_vector_blob(&bytes, dims)?;
                    persisted += 1;
                }
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
            None => Ok(persisted),
        }
    }
}
