//! Diff engine: compares the live object store against the known-state
//! baseline at HEAD. Full mode reads everything; incremental mode skips
//! objects whose update time sits at or below the class watermark recorded
//! at the last commit.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::core::context::Context;
use crate::core::hash;
use crate::core::models::{
    object_key, KnownObject, OperationType, ScanMeta, Schema, VectorObject,
};
use crate::core::repository::Repository;
use crate::error::Result;

/// One pending change between the live store and known-state.
#[derive(Debug, Clone)]
pub struct DiffEntry {
    pub change_type: OperationType,
    pub class: String,
    pub object_id: String,
    /// Canonical JSON after the change; empty for deletes.
    pub object_data: String,
    /// Canonical JSON before the change; empty for inserts.
    pub previous_data: String,
    pub vector_hash: String,
    pub previous_vector_hash: String,
    /// Set when only the vector differs.
    pub vector_only: bool,
    /// Live vector bytes, carried so staging/commit can persist the blob.
    pub vector: Vec<f32>,
}

impl DiffEntry {
    pub fn key(&self) -> String {
        object_key(&self.class, &self.object_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaDiff {
    pub added_classes: Vec<String>,
    pub removed_classes: Vec<String>,
    /// (class, property)
    pub added_properties: Vec<(String, String)>,
    pub removed_properties: Vec<(String, String)>,
    pub changed_vectorizers: Vec<String>,
    /// (class, property) whose data type changed
    pub changed_property_types: Vec<(String, String)>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added_classes.is_empty()
            && self.removed_classes.is_empty()
            && self.added_properties.is_empty()
            && self.removed_properties.is_empty()
            && self.changed_vectorizers.is_empty()
            && self.changed_property_types.is_empty()
    }
}

pub fn schema_diff(old: &Schema, new: &Schema) -> SchemaDiff {
    let mut diff = SchemaDiff::default();
    for class in &new.classes {
        match old.class(&class.name) {
            None => diff.added_classes.push(class.name.clone()),
            Some(before) => {
                if before.vectorizer != class.vectorizer {
                    diff.changed_vectorizers.push(class.name.clone());
                }
                for prop in &class.properties {
                    match before.property(&prop.name) {
                        None => diff
                            .added_properties
                            .push((class.name.clone(), prop.name.clone())),
                        Some(p) if p.data_type != prop.data_type => diff
                            .changed_property_types
                            .push((class.name.clone(), prop.name.clone())),
                        Some(_) => {}
                    }
                }
                for prop in &before.properties {
                    if class.property(&prop.name).is_none() {
                        diff.removed_properties
                            .push((class.name.clone(), prop.name.clone()));
                    }
                }
            }
        }
    }
    for class in &old.classes {
        if new.class(&class.name).is_none() {
            diff.removed_classes.push(class.name.clone());
        }
    }
    diff
}

fn insert_entry(live: &VectorObject) -> DiffEntry {
    let vector_hash = hash::vector_hash(&live.vector);
    DiffEntry {
        change_type: OperationType::Insert,
        class: live.class.clone(),
        object_id: live.id.clone(),
        object_data: hash::canonical_object_json(&live.class, &live.id, &live.properties),
        previous_data: String::new(),
        vector_hash,
        previous_vector_hash: String::new(),
        vector_only: false,
        vector: live.vector.clone(),
    }
}

fn delete_entry(class: &str, id: &str, known: &KnownObject) -> DiffEntry {
    DiffEntry {
        change_type: OperationType::Delete,
        class: class.to_string(),
        object_id: id.to_string(),
        object_data: String::new(),
        previous_data: known.object_json.clone(),
        vector_hash: String::new(),
        previous_vector_hash: known.vector_hash.clone(),
        vector_only: false,
        vector: vec![],
    }
}

/// None when live and known agree on both hashes.
fn compare(live: &VectorObject, known: &KnownObject) -> Option<DiffEntry> {
    let (object_hash, vector_hash) = hash::hash_object_full(live);
    if object_hash == known.object_hash && vector_hash == known.vector_hash {
        return None;
    }
    Some(DiffEntry {
        change_type: OperationType::Update,
        class: live.class.clone(),
        object_id: live.id.clone(),
        object_data: hash::canonical_object_json(&live.class, &live.id, &live.properties),
        previous_data: known.object_json.clone(),
        vector_hash,
        previous_vector_hash: known.vector_hash.clone(),
        vector_only: object_hash == known.object_hash,
        vector: live.vector.clone(),
    })
}

impl Repository {
    /// Full diff across all classes.
    pub fn diff(&self, ctx: &Context) -> Result<Vec<DiffEntry>> {
        Ok(self.diff_with_stats(ctx)?.0)
    }

    /// Full diff plus per-class scan stats of the live state, for commit
    /// finalization to advance watermarks.
    pub(crate) fn diff_with_stats(
        &self,
        ctx: &Context,
    ) -> Result<(Vec<DiffEntry>, Vec<(String, ScanMeta)>)> {
        ctx.check()?;
        let live = self.objects().get_all_objects_all_classes(ctx)?;
        let known: BTreeMap<String, KnownObject> =
            self.store().known_objects()?.into_iter().collect();

        let mut stats: HashMap<String, ScanMeta> = HashMap::new();
        let mut entries = Vec::new();
        let mut live_keys = HashSet::new();

        for object in &live {
            let stat = stats.entry(object.class.clone()).or_insert(ScanMeta {
                watermark: 0,
                object_count: 0,
            });
            stat.object_count += 1;
            stat.watermark = stat.watermark.max(object.last_update_time_unix);

            let key = object.key();
            live_keys.insert(key.clone());
            match known.get(&key) {
                None => entries.push(insert_entry(object)),
                Some(existing) => {
                    if let Some(entry) = compare(object, existing) {
                        entries.push(entry);
                    }
                }
            }
        }

        for (key, existing) in &known {
            if !live_keys.contains(key) {
                if let Some((class, id)) = key.split_once('/') {
                    entries.push(delete_entry(class, id, existing));
                }
            }
        }

        let mut stats: Vec<(String, ScanMeta)> = stats.into_iter().collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        Ok((entries, stats))
    }

    /// Full diff restricted to one class.
    pub fn diff_class(&self, ctx: &Context, class: &str) -> Result<Vec<DiffEntry>> {
        ctx.check()?;
        let live = self.objects().get_all_objects(ctx, class)?;
        let prefix = format!("{class}/");
        let known: BTreeMap<String, KnownObject> = self
            .store()
            .known_objects()?
            .into_iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .collect();

        let mut entries = Vec::new();
        let mut live_keys = HashSet::new();
        for object in &live {
            let key = object.key();
            live_keys.insert(key.clone());
            match known.get(&key) {
                None => entries.push(insert_entry(object)),
                Some(existing) => {
                    if let Some(entry) = compare(object, existing) {
                        entries.push(entry);
                    }
                }
            }
        }
        for (key, existing) in &known {
            if !live_keys.contains(key) {
                if let Some((class, id)) = key.split_once('/') {
                    entries.push(delete_entry(class, id, existing));
                }
            }
        }
        Ok(entries)
    }

    /// Diff of a single object.
    pub fn diff_object(&self, ctx: &Context, class: &str, id: &str) -> Result<Option<DiffEntry>> {
        ctx.check()?;
        let key = object_key(class, id);
        let live = self.objects().get_object(ctx, class, id)?;
        let known = self.store().known_object(&key)?;
        Ok(match (live, known) {
            (Some(object), Some(existing)) => compare(&object, &existing),
            (Some(object), None) => Some(insert_entry(&object)),
            (None, Some(existing)) => Some(delete_entry(class, id, &existing)),
            (None, None) => None,
        })
    }

    /// Incremental diff: per class, falls back to a full scan when there is
    /// no watermark or the live count drifted from the known count;
    /// otherwise only objects updated past the watermark are compared.
    /// Objects already staged are excluded. Deleted classes are detected by
    /// diffing the known class set against the live one.
    pub fn diff_incremental(&self, ctx: &Context) -> Result<Vec<DiffEntry>> {
        ctx.check()?;
        let staged: HashSet<String> = self
            .store()
            .staged_changes()?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let known_all = self.store().known_objects()?;
        let mut known_by_class: BTreeMap<String, BTreeMap<String, KnownObject>> = BTreeMap::new();
        for (key, known) in known_all {
            if let Some((class, id)) = key.split_once('/') {
                known_by_class
                    .entry(class.to_string())
                    .or_default()
                    .insert(id.to_string(), known);
            }
        }

        let live_classes = self.objects().get_classes(ctx)?;
        let mut entries = Vec::new();

        for class in &live_classes {
            ctx.check()?;
            let known = known_by_class.remove(class).unwrap_or_default();
            let live = self.objects().get_all_objects(ctx, class)?;
            let meta = self.store().scan_meta(class)?;

            let full_scan = match &meta {
                None => true,
                Some(meta) => meta.object_count != live.len() as u64,
            };
            let watermark = meta.map(|m| m.watermark).unwrap_or(i64::MIN);

            let mut live_keys = HashSet::new();
            for object in &live {
                live_keys.insert(object.id.clone());
                if !full_scan && object.last_update_time_unix <= watermark {
                    continue;
                }
                match known.get(&object.id) {
                    None => entries.push(insert_entry(object)),
                    Some(existing) => {
                        if let Some(entry) = compare(object, existing) {
                            entries.push(entry);
                        }
                    }
                }
            }
            for (id, existing) in &known {
                if !live_keys.contains(id) {
                    entries.push(delete_entry(class, id, existing));
                }
            }
        }

        // classes that vanished entirely from the live store
        for (class, known) in known_by_class {
            for (id, existing) in known {
                entries.push(delete_entry(&class, &id, &existing));
            }
        }

        entries.retain(|entry| !staged.contains(&entry.key()));
        Ok(entries)
    }

    /// Live schema against the schema snapshot bound to HEAD.
    pub fn pending_schema_diff(&self, ctx: &Context) -> Result<SchemaDiff> {
        let live = self.objects().get_schema(ctx)?;
        Ok(schema_diff(&self.head_schema()?, &live))
    }

    /// Schema snapshot at HEAD; empty before the first commit.
    pub(crate) fn head_schema(&self) -> Result<Schema> {
        let head = self.store().head()?;
        self.schema_at(&head)
    }

    pub(crate) fn schema_at(&self, commit_id: &str) -> Result<Schema> {
        if commit_id.is_empty() {
            return Ok(Schema::default());
        }
        match self.store().schema_version(commit_id)? {
            Some(version) => Ok(serde_json::from_str(&version.schema_json)?),
            None => Ok(Schema::default()),
        }
    }
}
