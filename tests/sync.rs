//! Push, fetch, and pull against the in-memory remote: vector dedup,
//! bundle ordering, CAS updates, divergence, fetch atomicity, and the
//! push-then-fetch round trip onto a fresh client.

mod common;

use std::sync::Arc;

use common::{live_title, live_vector, put_object, setup, TestRepo};
use wvc::core::hash;
use wvc::core::fetch::PullStatus;
use wvc::core::remote::{MemoryRemote, RemoteClient};
use wvc::error::WvcError;

const REMOTE_URL: &str = "https://wvc.example.com/repos/demo";

fn with_remote(t: &TestRepo) -> Arc<MemoryRemote> {
    t.repo.remote_add("origin", REMOTE_URL, None).unwrap();
    Arc::new(MemoryRemote::new())
}

fn client(remote: &Arc<MemoryRemote>) -> Arc<dyn RemoteClient> {
    remote.clone()
}

#[test]
fn push_dedups_vectors_and_uploads_bundles_oldest_first() {
    let t = setup();
    let remote = with_remote(&t);

    // two commits referencing the same vector bytes, one blob on the wire
    let shared = [0.5_f32, 1.5, -2.0];
    put_object(&t, "Article", "obj-001", "First", &shared);
    let c1 = t.repo.commit(&t.ctx, "one").unwrap();
    put_object(&t, "Article", "obj-002", "Second", &shared);
    let c2 = t.repo.commit(&t.ctx, "two").unwrap();

    let report = t
        .repo
        .push(&t.ctx, client(&remote), Some("origin"), None, false)
        .unwrap();
    assert!(!report.up_to_date);
    assert_eq!(report.uploaded_commits, 2);
    assert_eq!(report.uploaded_vectors, 1);

    let calls = remote.calls();
    let uploads: Vec<&String> = calls
        .iter()
        .filter(|c| c.starts_with("upload_vector("))
        .collect();
    assert_eq!(uploads.len(), 1);
    let vector_hash = hash::vector_hash(&shared);
    assert_eq!(*uploads[0], format!("upload_vector({vector_hash})"));

    let bundles: Vec<&String> = calls
        .iter()
        .filter(|c| c.starts_with("upload_commit_bundle("))
        .collect();
    assert_eq!(
        bundles,
        vec![
            &format!("upload_commit_bundle({})", c1.id),
            &format!("upload_commit_bundle({})", c2.id),
        ]
    );

    assert!(calls
        .iter()
        .any(|c| c == &format!("update_branch(main,{},)", c2.id)));
    assert_eq!(remote.branch_tip("main").as_deref(), Some(c2.id.as_str()));
    assert_eq!(
        t.repo.store().remote_ref("origin", "main").unwrap().as_deref(),
        Some(c2.id.as_str())
    );

    // a second push has nothing to do
    let report = t
        .repo
        .push(&t.ctx, client(&remote), Some("origin"), None, false)
        .unwrap();
    assert!(report.up_to_date);
}

#[test]
fn push_rejects_diverged_remote_unless_forced() {
    let t = setup();
    let remote = with_remote(&t);

    put_object(&t, "Article", "obj-001", "First", &[]);
    let c1 = t.repo.commit(&t.ctx, "one").unwrap();
    t.repo
        .push(&t.ctx, client(&remote), Some("origin"), None, false)
        .unwrap();

    // someone else moved the remote branch to a tip we do not have
    let foreign_tip = "f".repeat(64);
    remote
        .update_branch(&t.ctx, "main", &foreign_tip, &c1.id)
        .unwrap();

    put_object(&t, "Article", "obj-002", "Second", &[]);
    let c2 = t.repo.commit(&t.ctx, "two").unwrap();

    assert!(matches!(
        t.repo
            .push(&t.ctx, client(&remote), Some("origin"), None, false),
        Err(WvcError::Diverged(_))
    ));
    assert_eq!(remote.branch_tip("main").as_deref(), Some(foreign_tip.as_str()));

    t.repo
        .push(&t.ctx, client(&remote), Some("origin"), None, true)
        .unwrap();
    assert_eq!(remote.branch_tip("main").as_deref(), Some(c2.id.as_str()));
}

#[test]
fn push_then_fetch_reproduces_history_byte_exact() {
    let a = setup();
    let remote = with_remote(&a);

    put_object(&a, "Article", "obj-001", "First", &[0.25, -1.5]);
    let c1 = a.repo.commit(&a.ctx, "one").unwrap();
    put_object(&a, "Article", "obj-001", "Changed", &[3.5, 4.5]);
    put_object(&a, "Article", "obj-002", "Second", &[]);
    let c2 = a.repo.commit(&a.ctx, "two").unwrap();
    a.repo
        .push(&a.ctx, client(&remote), Some("origin"), None, false)
        .unwrap();

    // a fresh client pulls the same branch
    let b = setup();
    b.repo.remote_add("origin", REMOTE_URL, None).unwrap();
    let report = b
        .repo
        .pull(&b.ctx, client(&remote), Some("origin"), Some("main"), 0)
        .unwrap();
    assert_eq!(report.status, PullStatus::FastForwarded);
    assert_eq!(report.new_tip, c2.id);
    assert_eq!(b.repo.head().unwrap(), c2.id);

    // identical DAG and operations
    let mut ours: Vec<String> = a.repo.store().commit_ids().unwrap();
    let mut theirs: Vec<String> = b.repo.store().commit_ids().unwrap();
    ours.sort();
    theirs.sort();
    assert_eq!(ours, theirs);
    for id in [&c1.id, &c2.id] {
        let (_, a_ops) = a.repo.commit_details(id).unwrap();
        let (_, b_ops) = b.repo.commit_details(id).unwrap();
        assert_eq!(a_ops.len(), b_ops.len());
        for (x, y) in a_ops.iter().zip(&b_ops) {
            assert_eq!(x.op_type, y.op_type);
            assert_eq!(x.object_data, y.object_data);
            assert_eq!(x.vector_hash, y.vector_hash);
        }
    }

    // live state restored on B, vectors byte-exact
    assert_eq!(live_title(&b, "Article", "obj-001").as_deref(), Some("Changed"));
    assert_eq!(live_vector(&b, "Article", "obj-001"), Some(vec![3.5, 4.5]));
    assert_eq!(
        live_vector(&a, "Article", "obj-001"),
        live_vector(&b, "Article", "obj-001")
    );

    // every fetched commit can resolve its vectors locally
    for id in b.repo.store().commit_ids().unwrap() {
        for op in b.repo.store().operations_for_commit(&id).unwrap() {
            if !op.vector_hash.is_empty() {
                assert!(b.repo.store().has_vector(&op.vector_hash).unwrap());
            }
        }
    }
}

#[test]
fn fetch_persists_nothing_when_a_vector_download_fails() {
    let a = setup();
    let remote = with_remote(&a);

    put_object(&a, "Article", "obj-001", "First", &[1.0, 0.0]);
    a.repo.commit(&a.ctx, "one").unwrap();
    put_object(&a, "Article", "obj-002", "Second", &[0.0, 1.0]);
    a.repo.commit(&a.ctx, "two").unwrap();
    a.repo
        .push(&a.ctx, client(&remote), Some("origin"), None, false)
        .unwrap();

    let failing = hash::vector_hash(&[0.0, 1.0]);
    remote.fail_vector_download(&failing);

    let b = setup();
    b.repo.remote_add("origin", REMOTE_URL, None).unwrap();
    let err = b
        .repo
        .fetch(&b.ctx, client(&remote), Some("origin"), Some("main"), 0)
        .unwrap_err();
    assert!(matches!(err, WvcError::Remote(_)));

    // no commits landed, the tracking ref is untouched
    assert!(b.repo.store().commit_ids().unwrap().is_empty());
    assert!(b.repo.store().remote_ref("origin", "main").unwrap().is_none());

    // retry succeeds once the remote behaves; content addressing reuses
    // whatever blob already landed
    let remote_ok = Arc::new(MemoryRemote::new());
    a.repo
        .push(&a.ctx, client(&remote_ok), Some("origin"), None, false)
        .unwrap();
    let report = b
        .repo
        .fetch(&b.ctx, client(&remote_ok), Some("origin"), Some("main"), 0)
        .unwrap();
    assert_eq!(report.fetched_commits, 2);
    assert_eq!(
        b.repo.store().remote_ref("origin", "main").unwrap(),
        Some(report.remote_tip)
    );
}

#[test]
fn pull_reports_divergence_without_touching_the_branch() {
    let a = setup();
    let remote = with_remote(&a);
    put_object(&a, "Article", "obj-001", "First", &[]);
    a.repo.commit(&a.ctx, "one").unwrap();
    a.repo
        .push(&a.ctx, client(&remote), Some("origin"), None, false)
        .unwrap();

    // B starts from the shared history...
    let b = setup();
    b.repo.remote_add("origin", REMOTE_URL, None).unwrap();
    b.repo
        .pull(&b.ctx, client(&remote), Some("origin"), Some("main"), 0)
        .unwrap();

    // ...then both sides commit independently
    put_object(&a, "Article", "obj-002", "A side", &[]);
    a.repo.commit(&a.ctx, "a2").unwrap();
    a.repo
        .push(&a.ctx, client(&remote), Some("origin"), None, false)
        .unwrap();

    put_object(&b, "Article", "obj-003", "B side", &[]);
    let b_tip = b.repo.commit(&b.ctx, "b2").unwrap();

    let report = b
        .repo
        .pull(&b.ctx, client(&remote), Some("origin"), Some("main"), 0)
        .unwrap();
    assert_eq!(report.status, PullStatus::Diverged);
    assert_eq!(
        b.repo.store().branch("main").unwrap().as_deref(),
        Some(b_tip.id.as_str())
    );
    assert_eq!(b.repo.head().unwrap(), b_tip.id);
}

#[test]
fn pull_with_dirty_working_set_fails() {
    let a = setup();
    let remote = with_remote(&a);
    put_object(&a, "Article", "obj-001", "First", &[]);
    a.repo.commit(&a.ctx, "one").unwrap();
    a.repo
        .push(&a.ctx, client(&remote), Some("origin"), None, false)
        .unwrap();

    put_object(&a, "Article", "obj-001", "Dirty", &[]);
    assert!(matches!(
        a.repo
            .pull(&a.ctx, client(&remote), Some("origin"), Some("main"), 0),
        Err(WvcError::DirtyWorkingSet)
    ));
}

#[test]
fn depth_limited_fetch_marks_shallow_boundary() {
    let a = setup();
    let remote = with_remote(&a);
    for (id, msg) in [("obj-001", "one"), ("obj-002", "two"), ("obj-003", "three")] {
        put_object(&a, "Article", id, msg, &[]);
        a.repo.commit(&a.ctx, msg).unwrap();
    }
    a.repo
        .push(&a.ctx, client(&remote), Some("origin"), None, false)
        .unwrap();

    let b = setup();
    b.repo.remote_add("origin", REMOTE_URL, None).unwrap();
    let report = b
        .repo
        .fetch(&b.ctx, client(&remote), Some("origin"), Some("main"), 2)
        .unwrap();
    assert_eq!(report.fetched_commits, 2);
    assert!(report.shallow);

    // the oldest fetched commit is the boundary: present, parent absent
    let tip = report.remote_tip;
    let tip_commit = b.repo.store().get_commit(&tip).unwrap();
    let boundary = b.repo.store().get_commit(&tip_commit.parent_id).unwrap();
    assert!(b.repo.store().is_shallow(&boundary.id).unwrap());
    assert!(!b.repo.store().has_commit(&boundary.parent_id).unwrap());
}

#[test]
fn remote_configuration_rules() {
    let t = setup();
    t.repo.remote_add("origin", REMOTE_URL, None).unwrap();
    assert!(matches!(
        t.repo.remote_add("origin", REMOTE_URL, None),
        Err(WvcError::AlreadyExists { .. })
    ));
    assert!(matches!(
        t.repo.remote_add("second", "ftp://bad.example/x", None),
        Err(WvcError::InvalidUrl { .. })
    ));

    // with exactly one remote it is the default
    assert_eq!(t.repo.get_remote(None).unwrap().name, "origin");
    t.repo
        .remote_add("mirror", "https://mirror.example/repos/demo", None)
        .unwrap();
    assert!(t.repo.get_remote(None).is_err());

    t.repo.remote_remove("mirror").unwrap();
    assert!(matches!(
        t.repo.remote_remove("mirror"),
        Err(WvcError::NotFound { .. })
    ));
}
