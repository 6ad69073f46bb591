use std::path::Path;
use std::sync::Arc;

use crate::core::context::Context;
use crate::core::diff::{DiffEntry, SchemaDiff};
use crate::core::models::StagedChange;
use crate::core::object_store::{LocalObjectStore, ObjectStore};
use crate::core::store::Store;
use crate::error::{Result, WvcError};

pub const REPO_DIR: &str = ".wvc";
pub const DEFAULT_BRANCH: &str = "main";

/// A local repository: the persistent store plus the object store it
/// versions. All engine entry points hang off this type, spread across the
/// core modules.
pub struct Repository {
    store: Arc<Store>,
    objects: Arc<dyn ObjectStore>,
}

impl Repository {
    /// Create `.wvc/` under `root` and open it against the embedded local
    /// object store.
    pub fn init(root: impl AsRef<Path>) -> Result<Self> {
        let store = Self::open_store(root.as_ref(), true)?;
        let objects = Arc::new(LocalObjectStore::new(store.clone()));
        Self::bootstrap(store, objects)
    }

    /// Open an existing repository against the embedded local object store.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let store = Self::open_store(root.as_ref(), false)?;
        let objects = Arc::new(LocalObjectStore::new(store.clone()));
        Ok(Self { store, objects })
    }

    /// Open (creating if needed) against an external object-store adapter.
    pub fn with_object_store(
        root: impl AsRef<Path>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let store = Self::open_store(root.as_ref(), true)?;
        Self::bootstrap(store, objects)
    }

    fn open_store(root: &Path, create: bool) -> Result<Arc<Store>> {
        let repo_dir = root.join(REPO_DIR);
        if !repo_dir.exists() {
            if !create {
                return Err(WvcError::not_found(
                    "repository",
                    root.display().to_string(),
                ));
            }
            std::fs::create_dir_all(&repo_dir)?;
        }
        Ok(Arc::new(Store::open(repo_dir.join("db"))?))
    }

    fn bootstrap(store: Arc<Store>, objects: Arc<dyn ObjectStore>) -> Result<Self> {
        // A fresh repository starts on an unborn default branch; the first
        // commit creates the branch record.
        if store.head()?.is_empty() && store.current_branch()?.is_empty() {
            store.set_current_branch(DEFAULT_BRANCH)?;
        }
        Ok(Self { store, objects })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    /// Staged + unstaged + schema changes, the dirty-working-set gate used
    /// by checkout, merge, and pull.
    pub fn has_uncommitted_changes(&self, ctx: &Context) -> Result<bool> {
        if !self.store.staged_changes()?.is_empty() {
            return Ok(true);
        }
        if !self.diff_incremental(ctx)?.is_empty() {
            return Ok(true);
        }
        Ok(!self.pending_schema_diff(ctx)?.is_empty())
    }

    pub fn status(&self, ctx: &Context) -> Result<RepoStatus> {
        Ok(RepoStatus {
            head: self.store.head()?,
            branch: self.store.current_branch()?,
            staged: self.store.staged_changes()?,
            unstaged: self.diff_incremental(ctx)?,
            schema: self.pending_schema_diff(ctx)?,
        })
    }
}

pub struct RepoStatus {
    pub head: String,
    /// Empty when HEAD is detached.
    pub branch: String,
    pub staged: Vec<(String, StagedChange)>,
    pub unstaged: Vec<DiffEntry>,
    pub schema: SchemaDiff,
}
