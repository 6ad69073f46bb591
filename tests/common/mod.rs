// not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use wvc::core::context::Context;
use wvc::core::models::VectorObject;
use wvc::core::object_store::{MemoryObjectStore, ObjectStore};
use wvc::core::repository::Repository;

pub struct TestRepo {
    // held so the store directory outlives the repository
    pub _dir: TempDir,
    pub objects: Arc<MemoryObjectStore>,
    pub repo: Repository,
    pub ctx: Context,
}

pub fn setup() -> TestRepo {
    let dir = tempfile::tempdir().expect("tempdir");
    let objects = Arc::new(MemoryObjectStore::new());
    let repo =
        Repository::with_object_store(dir.path(), objects.clone()).expect("open repository");
    TestRepo {
        _dir: dir,
        objects,
        repo,
        ctx: Context::new(),
    }
}

pub fn make_object(class: &str, id: &str, title: &str, vector: &[f32]) -> VectorObject {
    let mut properties = serde_json::Map::new();
    properties.insert("title".to_string(), json!(title));
    VectorObject {
        id: id.to_string(),
        class: class.to_string(),
        properties,
        vector: vector.to_vec(),
        last_update_time_unix: 0,
    }
}

pub fn put_object(repo: &TestRepo, class: &str, id: &str, title: &str, vector: &[f32]) {
    let object = make_object(class, id, title, vector);
    let exists = repo
        .objects
        .get_object(&repo.ctx, class, id)
        .expect("get object")
        .is_some();
    if exists {
        repo.objects
            .update_object(&repo.ctx, &object)
            .expect("update object");
    } else {
        repo.objects
            .create_object(&repo.ctx, &object)
            .expect("create object");
    }
}

pub fn delete_object(repo: &TestRepo, class: &str, id: &str) {
    repo.objects
        .delete_object(&repo.ctx, class, id)
        .expect("delete object");
}

pub fn live_title(repo: &TestRepo, class: &str, id: &str) -> Option<String> {
    repo.objects
        .get_object(&repo.ctx, class, id)
        .expect("get object")
        .map(|o| {
            o.properties
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        })
}

pub fn live_vector(repo: &TestRepo, class: &str, id: &str) -> Option<Vec<f32>> {
    repo.objects
        .get_object(&repo.ctx, class, id)
        .expect("get object")
        .map(|o| o.vector)
}
