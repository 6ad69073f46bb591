//! Embedded persistent store. One RocksDB database per repository, logical
//! buckets mapped to column families. Single puts are atomic on their own;
//! commit finalization and bundle insertion go through one `WriteBatch` so a
//! crash can never leave a half-sealed commit behind.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::core::hash;
use crate::core::models::{
    operation_key, Commit, CommitBundle, KnownObject, Operation, Remote, ScanMeta, Schema,
    SchemaVersion, StagedChange, Stash, VectorBlob,
};
use crate::error::{Result, WvcError};

pub const CF_COMMITS: &str = "commits";
pub const CF_OPERATIONS: &str = "operations";
pub const CF_BRANCHES: &str = "branches";
pub const CF_META: &str = "meta";
pub const CF_KNOWN_OBJECTS: &str = "known_objects";
pub const CF_STAGING: &str = "staging";
pub const CF_SCHEMAS: &str = "schemas";
pub const CF_VECTORS: &str = "vectors";
pub const CF_REMOTES: &str = "remotes";
pub const CF_REMOTE_REFS: &str = "remote_refs";
pub const CF_SHALLOW: &str = "shallow";
pub const CF_SCAN_META: &str = "scan_meta";
pub const CF_STASHES: &str = "stashes";
pub const CF_OBJECTS: &str = "objects";
pub const CF_CLASSES: &str = "classes";

const ALL_CFS: [&str; 15] = [
    CF_COMMITS,
    CF_OPERATIONS,
    CF_BRANCHES,
    CF_META,
    CF_KNOWN_OBJECTS,
    CF_STAGING,
    CF_SCHEMAS,
    CF_VECTORS,
    CF_REMOTES,
    CF_REMOTE_REFS,
    CF_SHALLOW,
    CF_SCAN_META,
    CF_STASHES,
    CF_OBJECTS,
    CF_CLASSES,
];

const META_HEAD: &str = "HEAD";
const META_CURRENT_BRANCH: &str = "current_branch";
const META_NEXT_SEQ: &str = "next_seq";
const META_NEXT_STASH: &str = "next_stash";

pub struct Store {
    db: DB,
}

/// Inputs for the atomic commit-sealing transaction.
pub struct CommitFinalize<'a> {
    pub message: &'a str,
    pub merge_parent_id: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
    pub schema: &'a Schema,
    /// Per-class watermark/count advances, applied only here.
    pub scan_updates: Vec<(String, ScanMeta)>,
    pub clear_staging: bool,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf(&opts, path, ALL_CFS)?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> &ColumnFamily {
        // the full CF set is created at open; a miss is a programmer bug
        self.db
            .cf_handle(name)
            .unwrap_or_else(|| panic!("column family '{name}' missing"))
    }

    // ---- generic typed access ----

    pub(crate) fn get_bin<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf), key.as_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn put_bin<T: Serialize>(&self, cf: &str, key: &str, value: &T) -> Result<()> {
        self.db
            .put_cf(self.cf(cf), key.as_bytes(), bincode::serialize(value)?)?;
        Ok(())
    }

    pub(crate) fn delete(&self, cf: &str, key: &str) -> Result<()> {
        self.db.delete_cf(self.cf(cf), key.as_bytes())?;
        Ok(())
    }

    fn get_str(&self, cf: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .db
            .get_cf(self.cf(cf), key.as_bytes())?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    fn put_str(&self, cf: &str, key: &str, value: &str) -> Result<()> {
        self.db
            .put_cf(self.cf(cf), key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub(crate) fn scan_prefix(&self, cf: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix.as_bytes(), Direction::Forward)
        };
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf), mode) {
            let (key, value) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key, value.into_vec()));
        }
        Ok(rows)
    }

    // ---- meta: HEAD, current branch, counters ----

    /// Commit id HEAD points at; empty before the first commit.
    pub fn head(&self) -> Result<String> {
        Ok(self.get_str(CF_META, META_HEAD)?.unwrap_or_default())
    }

    pub fn set_head(&self, commit_id: &str) -> Result<()> {
        self.put_str(CF_META, META_HEAD, commit_id)
    }

    /// Current branch name; empty means detached HEAD.
    pub fn current_branch(&self) -> Result<String> {
        Ok(self
            .get_str(CF_META, META_CURRENT_BRANCH)?
            .unwrap_or_default())
    }

    pub fn set_current_branch(&self, name: &str) -> Result<()> {
        self.put_str(CF_META, META_CURRENT_BRANCH, name)
    }

    fn counter(&self, key: &str) -> Result<u64> {
        match self.db.get_cf(self.cf(CF_META), key.as_bytes())? {
            Some(raw) if raw.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&raw);
                Ok(u64::from_le_bytes(buf))
            }
            _ => Ok(0),
        }
    }

    fn bump_counter(&self, key: &str) -> Result<u64> {
        let next = self.counter(key)? + 1;
        self.db
            .put_cf(self.cf(CF_META), key.as_bytes(), next.to_le_bytes())?;
        Ok(next)
    }

    // ---- commits ----

    pub fn get_commit(&self, id: &str) -> Result<Commit> {
        self.get_bin(CF_COMMITS, id)?
            .ok_or_else(|| WvcError::not_found("commit", id))
    }

    pub fn try_get_commit(&self, id: &str) -> Result<Option<Commit>> {
        self.get_bin(CF_COMMITS, id)
    }

    pub fn has_commit(&self, id: &str) -> Result<bool> {
        Ok(self.db.get_cf(self.cf(CF_COMMITS), id.as_bytes())?.is_some())
    }

    pub fn commit_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .scan_prefix(CF_COMMITS, "")?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    // ---- operations ----

    /// Persist an uncommitted operation, assigning it the next sequence
    /// number. Pending operations live under the empty commit-id prefix
    /// until finalize seals them.
    pub fn append_pending_operation(&self, op: &mut Operation) -> Result<()> {
        op.seq = self.bump_counter(META_NEXT_SEQ)?;
        op.commit_id = String::new();
        op.committed = false;
        self.put_bin(CF_OPERATIONS, &op.key(), op)
    }

    pub fn pending_operations(&self) -> Result<Vec<Operation>> {
        let mut ops = Vec::new();
        for (_, raw) in self.scan_prefix(CF_OPERATIONS, "/")? {
            ops.push(bincode::deserialize::<Operation>(&raw)?);
        }
        ops.sort_by_key(|op| op.seq);
        Ok(ops)
    }

    pub fn operations_for_commit(&self, commit_id: &str) -> Result<Vec<Operation>> {
        let mut ops = Vec::new();
        for (_, raw) in self.scan_prefix(CF_OPERATIONS, &format!("{commit_id}/"))? {
            ops.push(bincode::deserialize::<Operation>(&raw)?);
        }
        ops.sort_by_key(|op| op.seq);
        Ok(ops)
    }

    /// Seal the pending operations into a new commit: one write batch covers
    /// the sealed operations, the commit record, the schema snapshot, HEAD,
    /// the branch pointer, scan watermarks, staging cleanup, and vector
    /// refcounts. Partial execution is impossible.
    pub fn finalize_commit(&self, req: CommitFinalize<'_>) -> Result<Commit> {
        let parent_id = self.head()?;
        let ops = self.pending_operations()?;

        let id = match req.merge_parent_id {
            Some(merge_parent) => hash::merge_commit_id(
                req.message,
                &req.timestamp,
                &parent_id,
                merge_parent,
                &ops,
            ),
            None => hash::commit_id(req.message, &req.timestamp, &parent_id, &ops),
        };

        let commit = Commit {
            id: id.clone(),
            parent_id,
            merge_parent_id: req.merge_parent_id.unwrap_or_default().to_string(),
            message: req.message.to_string(),
            timestamp: req.timestamp,
            operation_count: ops.len() as u64,
        };

        let mut batch = WriteBatch::default();
        let ops_cf = self.cf(CF_OPERATIONS);

        let mut ref_bumps: HashMap<String, u64> = HashMap::new();
        for op in &ops {
            batch.delete_cf(ops_cf, op.key().as_bytes());
            let mut sealed = op.clone();
            sealed.commit_id = id.clone();
            sealed.committed = true;
            batch.put_cf(
                ops_cf,
                operation_key(&id, sealed.seq).as_bytes(),
                bincode::serialize(&sealed)?,
            );
            if !sealed.vector_hash.is_empty() {
                *ref_bumps.entry(sealed.vector_hash.clone()).or_default() += 1;
            }
        }
        self.batch_vector_refs(&mut batch, &ref_bumps)?;

        batch.put_cf(
            self.cf(CF_COMMITS),
            id.as_bytes(),
            bincode::serialize(&commit)?,
        );

        let schema_json = serde_json::to_string(req.schema)?;
        let schema_hash = hash::schema_hash(req.schema);
        let version = SchemaVersion {
            id: schema_hash.clone(),
            schema_json,
            schema_hash,
            commit_id: id.clone(),
        };
        batch.put_cf(
            self.cf(CF_SCHEMAS),
            id.as_bytes(),
            bincode::serialize(&version)?,
        );

        batch.put_cf(self.cf(CF_META), META_HEAD.as_bytes(), id.as_bytes());

        // Detached HEAD moves alone; a named current branch is advanced, or
        // created here when the branch is still unborn.
        let current = self.current_branch()?;
        if !current.is_empty() {
            batch.put_cf(self.cf(CF_BRANCHES), current.as_bytes(), id.as_bytes());
        }

        for (class, meta) in &req.scan_updates {
            batch.put_cf(
                self.cf(CF_SCAN_META),
                class.as_bytes(),
                bincode::serialize(meta)?,
            );
        }

        if req.clear_staging {
            for (key, _) in self.scan_prefix(CF_STAGING, "")? {
                batch.delete_cf(self.cf(CF_STAGING), key.as_bytes());
            }
        }

        self.db.write(batch)?;
        Ok(commit)
    }

    /// Insert one fetched commit bundle atomically. Vector blobs referenced
    /// by the bundle's operations must already be persisted.
    pub fn insert_commit_bundle(&self, bundle: &CommitBundle) -> Result<()> {
        let mut batch = WriteBatch::default();
        let commit = &bundle.commit;

        batch.put_cf(
            self.cf(CF_COMMITS),
            commit.id.as_bytes(),
            bincode::serialize(commit)?,
        );

        let mut ref_bumps: HashMap<String, u64> = HashMap::new();
        for op in &bundle.operations {
            let mut sealed = op.clone();
            sealed.commit_id = commit.id.clone();
            sealed.committed = true;
            batch.put_cf(
                self.cf(CF_OPERATIONS),
                operation_key(&commit.id, sealed.seq).as_bytes(),
                bincode::serialize(&sealed)?,
            );
            if !sealed.vector_hash.is_empty() {
                *ref_bumps.entry(sealed.vector_hash.clone()).or_default() += 1;
            }
        }
        self.batch_vector_refs(&mut batch, &ref_bumps)?;

        if let Some(snapshot) = &bundle.schema {
            let version = SchemaVersion {
                id: snapshot.schema_hash.clone(),
                schema_json: snapshot.schema_json.clone(),
                schema_hash: snapshot.schema_hash.clone(),
                commit_id: commit.id.clone(),
            };
            batch.put_cf(
                self.cf(CF_SCHEMAS),
                commit.id.as_bytes(),
                bincode::serialize(&version)?,
            );
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn batch_vector_refs(&self, batch: &mut WriteBatch, bumps: &HashMap<String, u64>) -> Result<()> {
        for (hash, count) in bumps {
            match self.get_bin::<VectorBlob>(CF_VECTORS, hash)? {
                Some(mut blob) => {
                    blob.refcount += count;
                    batch.put_cf(
                        self.cf(CF_VECTORS),
                        hash.as_bytes(),
                        bincode::serialize(&blob)?,
                    );
                }
                None => warn!(%hash, "vector blob missing while sealing references"),
            }
        }
        Ok(())
    }

    // ---- vector blobs ----

    /// Idempotent content-addressed insert. New blobs start at refcount 0;
    /// references are added when operations sealing them land.
    pub fn save_vector_blob(&self, bytes: &[u8], dims: u32) -> Result<String> {
        let hash = hash::sha256_hex(bytes);
        if self.get_bin::<VectorBlob>(CF_VECTORS, &hash)?.is_none() {
            let blob = VectorBlob {
                bytes: bytes.to_vec(),
                dims,
                refcount: 0,
            };
            self.put_bin(CF_VECTORS, &hash, &blob)?;
        }
        Ok(hash)
    }

    pub fn get_vector(&self, hash: &str) -> Result<Option<VectorBlob>> {
        self.get_bin(CF_VECTORS, hash)
    }

    pub fn has_vector(&self, hash: &str) -> Result<bool> {
        Ok(self.db.get_cf(self.cf(CF_VECTORS), hash.as_bytes())?.is_some())
    }

    pub fn add_vector_ref(&self, hash: &str) -> Result<()> {
        match self.get_bin::<VectorBlob>(CF_VECTORS, hash)? {
            Some(mut blob) => {
                blob.refcount += 1;
                self.put_bin(CF_VECTORS, hash, &blob)
            }
            None => Err(WvcError::not_found("vector", hash)),
        }
    }

    /// Drop one reference; the blob is deleted when the count reaches zero.
    pub fn release_vector_ref(&self, hash: &str) -> Result<()> {
        if let Some(mut blob) = self.get_bin::<VectorBlob>(CF_VECTORS, hash)? {
            blob.refcount = blob.refcount.saturating_sub(1);
            if blob.refcount == 0 {
                self.delete(CF_VECTORS, hash)?;
            } else {
                self.put_bin(CF_VECTORS, hash, &blob)?;
            }
        }
        Ok(())
    }

    pub fn vector_hashes(&self) -> Result<Vec<String>> {
        Ok(self
            .scan_prefix(CF_VECTORS, "")?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    pub fn delete_vector(&self, hash: &str) -> Result<()> {
        self.delete(CF_VECTORS, hash)
    }

    // ---- branches ----

    pub fn branch(&self, name: &str) -> Result<Option<String>> {
        self.get_str(CF_BRANCHES, name)
    }

    pub fn set_branch(&self, name: &str, commit_id: &str) -> Result<()> {
        self.put_str(CF_BRANCHES, name, commit_id)
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.delete(CF_BRANCHES, name)
    }

    pub fn branches(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .scan_prefix(CF_BRANCHES, "")?
            .into_iter()
            .map(|(name, raw)| (name, String::from_utf8_lossy(&raw).into_owned()))
            .collect())
    }

    // ---- known objects ----

    pub fn known_object(&self, key: &str) -> Result<Option<KnownObject>> {
        self.get_bin(CF_KNOWN_OBJECTS, key)
    }

    pub fn set_known_object(&self, key: &str, known: &KnownObject) -> Result<()> {
        self.put_bin(CF_KNOWN_OBJECTS, key, known)
    }

    pub fn delete_known_object(&self, key: &str) -> Result<()> {
        self.delete(CF_KNOWN_OBJECTS, key)
    }

    pub fn known_objects(&self) -> Result<Vec<(String, KnownObject)>> {
        let mut rows = Vec::new();
        for (key, raw) in self.scan_prefix(CF_KNOWN_OBJECTS, "")? {
            rows.push((key, bincode::deserialize::<KnownObject>(&raw)?));
        }
        Ok(rows)
    }

    /// Replace the whole known-state table in one batch.
    pub fn replace_known_objects(&self, rows: &[(String, KnownObject)]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for (key, _) in self.scan_prefix(CF_KNOWN_OBJECTS, "")? {
            batch.delete_cf(self.cf(CF_KNOWN_OBJECTS), key.as_bytes());
        }
        for (key, _) in self.scan_prefix(CF_SCAN_META, "")? {
            batch.delete_cf(self.cf(CF_SCAN_META), key.as_bytes());
        }
        for (key, known) in rows {
            batch.put_cf(
                self.cf(CF_KNOWN_OBJECTS),
                key.as_bytes(),
                bincode::serialize(known)?,
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    // ---- staging ----

    pub fn staged_change(&self, key: &str) -> Result<Option<StagedChange>> {
        self.get_bin(CF_STAGING, key)
    }

    pub fn put_staged_change(&self, key: &str, change: &StagedChange) -> Result<()> {
        self.put_bin(CF_STAGING, key, change)
    }

    pub fn delete_staged_change(&self, key: &str) -> Result<()> {
        self.delete(CF_STAGING, key)
    }

    pub fn staged_changes(&self) -> Result<Vec<(String, StagedChange)>> {
        let mut rows = Vec::new();
        for (key, raw) in self.scan_prefix(CF_STAGING, "")? {
            rows.push((key, bincode::deserialize::<StagedChange>(&raw)?));
        }
        Ok(rows)
    }

    pub fn clear_staging(&self) -> Result<()> {
        let mut batch = WriteBatch::default();
        for (key, _) in self.scan_prefix(CF_STAGING, "")? {
            batch.delete_cf(self.cf(CF_STAGING), key.as_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }

    // ---- scan metadata ----

    pub fn scan_meta(&self, class: &str) -> Result<Option<ScanMeta>> {
        self.get_bin(CF_SCAN_META, class)
    }

    // ---- schema versions ----

    pub fn schema_version(&self, commit_id: &str) -> Result<Option<SchemaVersion>> {
        self.get_bin(CF_SCHEMAS, commit_id)
    }

    // ---- remotes ----

    pub fn remote(&self, name: &str) -> Result<Option<Remote>> {
        self.get_bin(CF_REMOTES, name)
    }

    pub fn put_remote(&self, remote: &Remote) -> Result<()> {
        self.put_bin(CF_REMOTES, &remote.name, remote)
    }

    pub fn delete_remote(&self, name: &str) -> Result<()> {
        self.delete(CF_REMOTES, name)
    }

    pub fn remotes(&self) -> Result<Vec<Remote>> {
        let mut rows = Vec::new();
        for (_, raw) in self.scan_prefix(CF_REMOTES, "")? {
            rows.push(bincode::deserialize::<Remote>(&raw)?);
        }
        Ok(rows)
    }

    // ---- remote-tracking refs ----

    pub fn remote_ref(&self, remote: &str, branch: &str) -> Result<Option<String>> {
        self.get_str(CF_REMOTE_REFS, &format!("{remote}/{branch}"))
    }

    pub fn set_remote_ref(&self, remote: &str, branch: &str, commit_id: &str) -> Result<()> {
        self.put_str(CF_REMOTE_REFS, &format!("{remote}/{branch}"), commit_id)
    }

    pub fn delete_remote_refs(&self, remote: &str) -> Result<()> {
        for (key, _) in self.scan_prefix(CF_REMOTE_REFS, &format!("{remote}/"))? {
            self.delete(CF_REMOTE_REFS, &key)?;
        }
        Ok(())
    }

    // ---- shallow boundary ----

    pub fn mark_shallow(&self, commit_id: &str) -> Result<()> {
        self.put_str(CF_SHALLOW, commit_id, "")
    }

    pub fn is_shallow(&self, commit_id: &str) -> Result<bool> {
        Ok(self
            .db
            .get_cf(self.cf(CF_SHALLOW), commit_id.as_bytes())?
            .is_some())
    }

    // ---- stashes ----

    pub fn next_stash_id(&self) -> Result<u64> {
        self.bump_counter(META_NEXT_STASH)
    }

    pub fn put_stash(&self, stash: &Stash) -> Result<()> {
        self.put_bin(CF_STASHES, &format!("{:010}", stash.id), stash)
    }

    pub fn delete_stash(&self, id: u64) -> Result<()> {
        self.delete(CF_STASHES, &format!("{id:010}"))
    }

    /// Newest first, so index 0 addresses the latest stash.
    pub fn stashes(&self) -> Result<Vec<Stash>> {
        let mut rows = Vec::new();
        for (_, raw) in self.scan_prefix(CF_STASHES, "")? {
            rows.push(bincode::deserialize::<Stash>(&raw)?);
        }
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::OperationType;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("open store");
        (dir, store)
    }

    fn pending_op(class: &str, id: &str, vector_hash: &str) -> Operation {
        Operation {
            commit_id: String::new(),
            seq: 0,
            op_type: OperationType::Insert,
            class: class.to_string(),
            object_id: id.to_string(),
            object_data: format!(r#"{{"class":"{class}","id":"{id}","properties":{{}}}}"#),
            previous_data: String::new(),
            vector_hash: vector_hash.to_string(),
            previous_vector_hash: String::new(),
            committed: false,
            reverted: false,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn head_and_branch_meta_roundtrip() {
        let (_dir, store) = open_store();
        assert_eq!(store.head().unwrap(), "");
        store.set_head("abc").unwrap();
        store.set_current_branch("main").unwrap();
        assert_eq!(store.head().unwrap(), "abc");
        assert_eq!(store.current_branch().unwrap(), "main");
    }

    #[test]
    fn finalize_seals_pending_operations_atomically() {
        let (_dir, store) = open_store();
        store.set_current_branch("main").unwrap();
        let vhash = store.save_vector_blob(&[0u8, 1, 2, 3], 1).unwrap();

        let mut op = pending_op("Article", "obj-001", &vhash);
        store.append_pending_operation(&mut op).unwrap();
        assert_eq!(store.pending_operations().unwrap().len(), 1);

        let commit = store
            .finalize_commit(CommitFinalize {
                message: "Initial",
                merge_parent_id: None,
                timestamp: Utc.timestamp_opt(1_700_000_001, 0).unwrap(),
                schema: &Schema::default(),
                scan_updates: vec![],
                clear_staging: false,
            })
            .unwrap();

        assert_eq!(commit.id.len(), 64);
        assert_eq!(commit.parent_id, "");
        assert!(store.pending_operations().unwrap().is_empty());

        let sealed = store.operations_for_commit(&commit.id).unwrap();
        assert_eq!(sealed.len(), 1);
        assert!(sealed[0].committed);
        assert_eq!(sealed[0].commit_id, commit.id);

        assert_eq!(store.head().unwrap(), commit.id);
        assert_eq!(store.branch("main").unwrap().as_deref(), Some(commit.id.as_str()));
        assert_eq!(store.get_vector(&vhash).unwrap().unwrap().refcount, 1);
        assert!(store.schema_version(&commit.id).unwrap().is_some());
    }

    #[test]
    fn detached_finalize_moves_only_head() {
        let (_dir, store) = open_store();
        let mut op = pending_op("Article", "obj-001", "");
        store.append_pending_operation(&mut op).unwrap();
        let commit = store
            .finalize_commit(CommitFinalize {
                message: "detached",
                merge_parent_id: None,
                timestamp: Utc.timestamp_opt(1_700_000_002, 0).unwrap(),
                schema: &Schema::default(),
                scan_updates: vec![],
                clear_staging: false,
            })
            .unwrap();
        assert_eq!(store.head().unwrap(), commit.id);
        assert!(store.branches().unwrap().is_empty());
    }

    #[test]
    fn vector_blob_refcount_lifecycle() {
        let (_dir, store) = open_store();
        let hash = store.save_vector_blob(&[1, 2, 3, 4], 1).unwrap();
        // idempotent re-save keeps the same row
        assert_eq!(store.save_vector_blob(&[1, 2, 3, 4], 1).unwrap(), hash);
        assert_eq!(store.get_vector(&hash).unwrap().unwrap().refcount, 0);

        store.add_vector_ref(&hash).unwrap();
        store.add_vector_ref(&hash).unwrap();
        assert_eq!(store.get_vector(&hash).unwrap().unwrap().refcount, 2);

        store.release_vector_ref(&hash).unwrap();
        assert!(store.has_vector(&hash).unwrap());
        store.release_vector_ref(&hash).unwrap();
        assert!(!store.has_vector(&hash).unwrap());
    }

    #[test]
    fn stash_listing_is_newest_first() {
        let (_dir, store) = open_store();
        for msg in ["first", "second"] {
            let id = store.next_stash_id().unwrap();
            store
                .put_stash(&Stash {
                    id,
                    message: msg.to_string(),
                    branch_name: "main".to_string(),
                    commit_id: String::new(),
                    created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                    changes: vec![],
                })
                .unwrap();
        }
        let stashes = store.stashes().unwrap();
        assert_eq!(stashes[0].message, "second");
        assert_eq!(stashes[1].message, "first");
    }
}
