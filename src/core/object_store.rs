//! The backing vector database, seen through a capability trait. The engine
//! only ever lists, fetches, and mutates objects and schema through this
//! interface; a production adapter is a thin protocol client.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::context::Context;
use crate::core::models::{object_key, ClassSchema, PropertySchema, Schema, VectorObject};
use crate::core::store::{Store, CF_CLASSES, CF_OBJECTS};
use crate::error::{Result, WvcError};

pub trait ObjectStore: Send + Sync {
    fn get_classes(&self, ctx: &Context) -> Result<Vec<String>>;
    fn get_class_count(&self, ctx: &Context, class: &str) -> Result<u64>;
    fn get_all_objects(&self, ctx: &Context, class: &str) -> Result<Vec<VectorObject>>;
    fn get_all_objects_all_classes(&self, ctx: &Context) -> Result<Vec<VectorObject>>;
    fn get_object(&self, ctx: &Context, class: &str, id: &str) -> Result<Option<VectorObject>>;
    fn create_object(&self, ctx: &Context, object: &VectorObject) -> Result<()>;
    fn update_object(&self, ctx: &Context, object: &VectorObject) -> Result<()>;
    fn delete_object(&self, ctx: &Context, class: &str, id: &str) -> Result<()>;
    fn get_schema(&self, ctx: &Context) -> Result<Schema>;
    fn create_class(&self, ctx: &Context, class: &ClassSchema) -> Result<()>;
    fn delete_class(&self, ctx: &Context, name: &str) -> Result<()>;
    fn add_property(&self, ctx: &Context, class: &str, property: &PropertySchema) -> Result<()>;
}

/// In-memory object store. Mutation timestamps come from a logical clock so
/// incremental scans behave deterministically under test.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<MemoryState>,
    clock: AtomicI64,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<String, BTreeMap<String, VectorObject>>,
    schema: Schema,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert an object directly, keeping its timestamp. Test setup helper.
    pub fn seed_object(&self, object: VectorObject) {
        let mut state = self.lock();
        state
            .objects
            .entry(object.class.clone())
            .or_default()
            .insert(object.id.clone(), object);
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_classes(&self, ctx: &Context) -> Result<Vec<String>> {
        ctx.check()?;
        let state = self.lock();
        let mut classes: Vec<String> = state.objects.keys().cloned().collect();
        for class in &state.schema.classes {
            if !classes.contains(&class.name) {
                classes.push(class.name.clone());
            }
        }
        classes.sort();
        Ok(classes)
    }

    fn get_class_count(&self, ctx: &Context, class: &str) -> Result<u64> {
        ctx.check()?;
        Ok(self
            .lock()
            .objects
            .get(class)
            .map(|m| m.len() as u64)
            .unwrap_or(0))
    }

    fn get_all_objects(&self, ctx: &Context, class: &str) -> Result<Vec<VectorObject>> {
        ctx.check()?;
        Ok(self
            .lock()
            .objects
            .get(class)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn get_all_objects_all_classes(&self, ctx: &Context) -> Result<Vec<VectorObject>> {
        ctx.check()?;
        Ok(self
            .lock()
            .objects
            .values()
            .flat_map(|m| m.values().cloned())
            .collect())
    }

    fn get_object(&self, ctx: &Context, class: &str, id: &str) -> Result<Option<VectorObject>> {
        ctx.check()?;
        Ok(self
            .lock()
            .objects
            .get(class)
            .and_then(|m| m.get(id))
            .cloned())
    }

    fn create_object(&self, ctx: &Context, object: &VectorObject) -> Result<()> {
        ctx.check()?;
        let mut stored = object.clone();
        stored.last_update_time_unix = self.tick();
        let mut state = self.lock();
        state
            .objects
            .entry(stored.class.clone())
            .or_default()
            .insert(stored.id.clone(), stored);
        Ok(())
    }

    fn update_object(&self, ctx: &Context, object: &VectorObject) -> Result<()> {
        ctx.check()?;
        let mut stored = object.clone();
        stored.last_update_time_unix = self.tick();
        let mut state = self.lock();
        let class = state
            .objects
            .get_mut(&stored.class)
            .ok_or_else(|| WvcError::not_found("class", &stored.class))?;
        if !class.contains_key(&stored.id) {
            return Err(WvcError::not_found(
                "object",
                object_key(&stored.class, &stored.id),
            ));
        }
        class.insert(stored.id.clone(), stored);
        Ok(())
    }

    fn delete_object(&self, ctx: &Context, class: &str, id: &str) -> Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        let removed = state
            .objects
            .get_mut(class)
            .and_then(|m| m.remove(id))
            .is_some();
        let emptied = state.objects.get(class).map_or(false, |m| m.is_empty());
        if emptied {
            state.objects.remove(class);
        }
        if removed {
            Ok(())
        } else {
            Err(WvcError::not_found("object", object_key(class, id)))
        }
    }

    fn get_schema(&self, ctx: &Context) -> Result<Schema> {
        ctx.check()?;
        Ok(self.lock().schema.clone())
    }

    fn create_class(&self, ctx: &Context, class: &ClassSchema) -> Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        if state.schema.class(&class.name).is_some() {
            return Err(WvcError::already_exists("class", &class.name));
        }
        state.schema.classes.push(class.clone());
        Ok(())
    }

    fn delete_class(&self, ctx: &Context, name: &str) -> Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        state.schema.classes.retain(|c| c.name != name);
        state.objects.remove(name);
        Ok(())
    }

    fn add_property(&self, ctx: &Context, class: &str, property: &PropertySchema) -> Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        let class = state
            .schema
            .classes
            .iter_mut()
            .find(|c| c.name == class)
            .ok_or_else(|| WvcError::not_found("class", class))?;
        if class.property(&property.name).is_none() {
            class.properties.push(property.clone());
        }
        Ok(())
    }
}

/// Object store persisted in the repository's own database, keyed `class/id`.
/// This is what the binary runs against when no external adapter is wired.
pub struct LocalObjectStore {
    store: Arc<Store>,
}

impl LocalObjectStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl ObjectStore for LocalObjectStore {
    fn get_classes(&self, ctx: &Context) -> Result<Vec<String>> {
        ctx.check()?;
        let mut classes: Vec<String> = self
            .store
            .scan_prefix(CF_CLASSES, "")?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        for (key, _) in self.store.scan_prefix(CF_OBJECTS, "")? {
            if let Some((class, _)) = key.split_once('/') {
                if !classes.iter().any(|c| c == class) {
                    classes.push(class.to_string());
                }
            }
        }
        classes.sort();
        Ok(classes)
    }

    fn get_class_count(&self, ctx: &Context, class: &str) -> Result<u64> {
        ctx.check()?;
        Ok(self.store.scan_prefix(CF_OBJECTS, &format!("{class}/"))?.len() as u64)
    }

    fn get_all_objects(&self, ctx: &Context, class: &str) -> Result<Vec<VectorObject>> {
        ctx.check()?;
        let mut objects = Vec::new();
        for (_, raw) in self.store.scan_prefix(CF_OBJECTS, &format!("{class}/"))? {
            objects.push(bincode::deserialize::<VectorObject>(&raw)?);
        }
        Ok(objects)
    }

    fn get_all_objects_all_classes(&self, ctx: &Context) -> Result<Vec<VectorObject>> {
        ctx.check()?;
        let mut objects = Vec::new();
        for (_, raw) in self.store.scan_prefix(CF_OBJECTS, "")? {
            objects.push(bincode::deserialize::<VectorObject>(&raw)?);
        }
        Ok(objects)
    }

    fn get_object(&self, ctx: &Context, class: &str, id: &str) -> Result<Option<VectorObject>> {
        ctx.check()?;
        self.store.get_bin(CF_OBJECTS, &object_key(class, id))
    }

    fn create_object(&self, ctx: &Context, object: &VectorObject) -> Result<()> {
        ctx.check()?;
        let mut stored = object.clone();
        stored.last_update_time_unix = self.now();
        self.store.put_bin(CF_OBJECTS, &stored.key(), &stored)
    }

    fn update_object(&self, ctx: &Context, object: &VectorObject) -> Result<()> {
        ctx.check()?;
        let key = object.key();
        if self.store.get_bin::<VectorObject>(CF_OBJECTS, &key)?.is_none() {
            return Err(WvcError::not_found("object", key));
        }
        let mut stored = object.clone();
        stored.last_update_time_unix = self.now();
        self.store.put_bin(CF_OBJECTS, &key, &stored)
    }

    fn delete_object(&self, ctx: &Context, class: &str, id: &str) -> Result<()> {
        ctx.check()?;
        self.store.delete(CF_OBJECTS, &object_key(class, id))
    }

    fn get_schema(&self, ctx: &Context) -> Result<Schema> {
        ctx.check()?;
        let mut classes = Vec::new();
        for (_, raw) in self.store.scan_prefix(CF_CLASSES, "")? {
            classes.push(bincode::deserialize::<ClassSchema>(&raw)?);
        }
        Ok(Schema { classes })
    }

    fn create_class(&self, ctx: &Context, class: &ClassSchema) -> Result<()> {
        ctx.check()?;
        if self
            .store
            .get_bin::<ClassSchema>(CF_CLASSES, &class.name)?
            .is_some()
        {
            return Err(WvcError::already_exists("class", &class.name));
        }
        self.store.put_bin(CF_CLASSES, &class.name, class)
    }

    fn delete_class(&self, ctx: &Context, name: &str) -> Result<()> {
        ctx.check()?;
        self.store.delete(CF_CLASSES, name)?;
        for (key, _) in self.store.scan_prefix(CF_OBJECTS, &format!("{name}/"))? {
            self.store.delete(CF_OBJECTS, &key)?;
        }
        Ok(())
    }

    fn add_property(&self, ctx: &Context, class: &str, property: &PropertySchema) -> Result<()> {
        ctx.check()?;
        let mut schema = self
            .store
            .get_bin::<ClassSchema>(CF_CLASSES, class)?
            .ok_or_else(|| WvcError::not_found("class", class))?;
        if schema.property(&property.name).is_none() {
            schema.properties.push(property.clone());
            self.store.put_bin(CF_CLASSES, class, &schema)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(class: &str, id: &str, title: &str) -> VectorObject {
        let mut properties = serde_json::Map::new();
        properties.insert("title".to_string(), json!(title));
        VectorObject {
            id: id.to_string(),
            class: class.to_string(),
            properties,
            vector: vec![],
            last_update_time_unix: 0,
        }
    }

    #[test]
    fn memory_store_tracks_objects_and_logical_time() {
        let ctx = Context::new();
        let store = MemoryObjectStore::new();
        store.create_object(&ctx, &obj("Article", "a", "one")).unwrap();
        store.create_object(&ctx, &obj("Article", "b", "two")).unwrap();

        let a = store.get_object(&ctx, "Article", "a").unwrap().unwrap();
        let b = store.get_object(&ctx, "Article", "b").unwrap().unwrap();
        assert!(b.last_update_time_unix > a.last_update_time_unix);
        assert_eq!(store.get_class_count(&ctx, "Article").unwrap(), 2);

        store.delete_object(&ctx, "Article", "a").unwrap();
        assert!(store.get_object(&ctx, "Article", "a").unwrap().is_none());
    }

    #[test]
    fn memory_store_update_requires_existing_object() {
        let ctx = Context::new();
        let store = MemoryObjectStore::new();
        let err = store.update_object(&ctx, &obj("Article", "a", "one"));
        assert!(err.is_err());
    }

    #[test]
    fn memory_schema_mutations() {
        let ctx = Context::new();
        let store = MemoryObjectStore::new();
        store
            .create_class(
                &ctx,
                &ClassSchema {
                    name: "Article".to_string(),
                    vectorizer: "none".to_string(),
                    properties: vec![],
                },
            )
            .unwrap();
        store
            .add_property(
                &ctx,
                "Article",
                &PropertySchema {
                    name: "title".to_string(),
                    data_type: "text".to_string(),
                },
            )
            .unwrap();
        let schema = store.get_schema(&ctx).unwrap();
        assert!(schema.class("Article").unwrap().property("title").is_some());

        store.delete_class(&ctx, "Article").unwrap();
        assert!(store.get_schema(&ctx).unwrap().classes.is_empty());
    }
}
