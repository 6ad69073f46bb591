//! Merge scenarios: fast-forward, three-way without conflicts, conflict
//! classification and strategies, and ancestry invariants.

mod common;

use common::{live_title, put_object, setup};
use wvc::core::checkout::CheckoutOptions;
use wvc::core::merge::{ConflictType, MergeOptions, MergeStrategy};
use wvc::error::WvcError;

fn checkout(t: &common::TestRepo, reference: &str) {
    t.repo
        .checkout(&t.ctx, Some(reference), CheckoutOptions::default())
        .expect("checkout");
}

#[test]
fn linear_history_fast_forwards() {
    let t = setup();
    put_object(&t, "Article", "obj-001", "First", &[]);
    t.repo.commit(&t.ctx, "Initial").unwrap();

    t.repo.create_branch("feature", None).unwrap();
    checkout(&t, "feature");
    put_object(&t, "Article", "obj-002", "Feature", &[]);
    let feature_tip = t.repo.commit(&t.ctx, "feature work").unwrap();

    checkout(&t, "main");
    assert!(live_title(&t, "Article", "obj-002").is_none());

    let outcome = t
        .repo
        .merge(&t.ctx, "feature", MergeOptions::default())
        .unwrap();
    assert!(outcome.success);
    assert!(outcome.fast_forward);
    assert!(outcome.merge_commit.is_none());

    assert_eq!(t.repo.head().unwrap(), feature_tip.id);
    assert_eq!(
        t.repo.store().branch("main").unwrap().as_deref(),
        Some(feature_tip.id.as_str())
    );
    assert!(live_title(&t, "Article", "obj-001").is_some());
    assert!(live_title(&t, "Article", "obj-002").is_some());
}

#[test]
fn three_way_merge_without_conflicts() {
    let t = setup();
    put_object(&t, "Article", "obj-001", "First", &[]);
    t.repo.commit(&t.ctx, "Initial").unwrap();
    t.repo.create_branch("feature", None).unwrap();

    checkout(&t, "feature");
    put_object(&t, "Article", "obj-002", "Feature", &[]);
    t.repo.commit(&t.ctx, "feature adds obj-002").unwrap();

    checkout(&t, "main");
    put_object(&t, "Article", "obj-003", "Main", &[]);
    let ours = t.repo.commit(&t.ctx, "main adds obj-003").unwrap();

    let outcome = t
        .repo
        .merge(&t.ctx, "feature", MergeOptions::default())
        .unwrap();
    assert!(outcome.success);
    assert!(!outcome.fast_forward);
    let merge_commit = outcome.merge_commit.expect("merge commit");
    assert_eq!(merge_commit.parent_id, ours.id);
    assert!(!merge_commit.merge_parent_id.is_empty());
    assert!(outcome.conflicts.is_empty());

    for id in ["obj-001", "obj-002", "obj-003"] {
        assert!(live_title(&t, "Article", id).is_some(), "{id} missing");
    }
}

#[test]
fn modify_modify_conflict_aborts_then_resolves_ours() {
    let t = setup();
    put_object(&t, "Article", "obj-001", "Initial", &[]);
    t.repo.commit(&t.ctx, "Initial").unwrap();
    t.repo.create_branch("feature", None).unwrap();

    put_object(&t, "Article", "obj-001", "Main", &[]);
    t.repo.commit(&t.ctx, "main edit").unwrap();

    checkout(&t, "feature");
    put_object(&t, "Article", "obj-001", "Feature", &[]);
    t.repo.commit(&t.ctx, "feature edit").unwrap();

    checkout(&t, "main");
    assert_eq!(live_title(&t, "Article", "obj-001").as_deref(), Some("Main"));
    let head_before = t.repo.head().unwrap();

    let outcome = t
        .repo
        .merge(&t.ctx, "feature", MergeOptions::default())
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].conflict_type, ConflictType::ModifyModify);
    assert_eq!(outcome.conflicts[0].object_id, "obj-001");
    // abort leaves everything untouched
    assert_eq!(t.repo.head().unwrap(), head_before);
    assert_eq!(live_title(&t, "Article", "obj-001").as_deref(), Some("Main"));
    assert!(t.repo.store().staged_changes().unwrap().is_empty());

    let outcome = t
        .repo
        .merge(
            &t.ctx,
            "feature",
            MergeOptions {
                no_ff: false,
                strategy: Some(MergeStrategy::Ours),
                message: None,
            },
        )
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.resolved_conflicts, 1);
    assert!(outcome.merge_commit.is_some());
    assert_eq!(live_title(&t, "Article", "obj-001").as_deref(), Some("Main"));
}

#[test]
fn theirs_strategy_takes_their_side() {
    let t = setup();
    put_object(&t, "Article", "obj-001", "Initial", &[]);
    t.repo.commit(&t.ctx, "Initial").unwrap();
    t.repo.create_branch("feature", None).unwrap();

    put_object(&t, "Article", "obj-001", "Main", &[]);
    t.repo.commit(&t.ctx, "main edit").unwrap();

    checkout(&t, "feature");
    put_object(&t, "Article", "obj-001", "Feature", &[]);
    t.repo.commit(&t.ctx, "feature edit").unwrap();

    checkout(&t, "main");
    let outcome = t
        .repo
        .merge(
            &t.ctx,
            "feature",
            MergeOptions {
                no_ff: false,
                strategy: Some(MergeStrategy::Theirs),
                message: None,
            },
        )
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.resolved_conflicts, 1);
    assert_eq!(
        live_title(&t, "Article", "obj-001").as_deref(),
        Some("Feature")
    );
}

#[test]
fn delete_modify_classification() {
    let t = setup();
    put_object(&t, "Article", "obj-001", "Initial", &[]);
    t.repo.commit(&t.ctx, "Initial").unwrap();
    t.repo.create_branch("feature", None).unwrap();

    // ours deletes, theirs modifies
    common::delete_object(&t, "Article", "obj-001");
    t.repo.commit(&t.ctx, "main deletes").unwrap();

    checkout(&t, "feature");
    put_object(&t, "Article", "obj-001", "Feature", &[]);
    t.repo.commit(&t.ctx, "feature edits").unwrap();

    checkout(&t, "main");
    let outcome = t
        .repo
        .merge(&t.ctx, "feature", MergeOptions::default())
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.conflicts[0].conflict_type, ConflictType::DeleteModify);
}

#[test]
fn no_ff_creates_merge_commit_even_when_behind() {
    let t = setup();
    put_object(&t, "Article", "obj-001", "First", &[]);
    t.repo.commit(&t.ctx, "Initial").unwrap();
    t.repo.create_branch("feature", None).unwrap();

    checkout(&t, "feature");
    put_object(&t, "Article", "obj-002", "Feature", &[]);
    t.repo.commit(&t.ctx, "feature work").unwrap();

    checkout(&t, "main");
    let outcome = t
        .repo
        .merge(
            &t.ctx,
            "feature",
            MergeOptions {
                no_ff: true,
                strategy: None,
                message: None,
            },
        )
        .unwrap();
    assert!(outcome.success);
    assert!(!outcome.fast_forward);
    let commit = outcome.merge_commit.expect("merge commit");
    assert!(commit.is_merge());
    assert!(live_title(&t, "Article", "obj-002").is_some());
}

#[test]
fn merge_guards() {
    let t = setup();
    put_object(&t, "Article", "obj-001", "First", &[]);
    t.repo.commit(&t.ctx, "Initial").unwrap();

    // a branch cannot merge into itself
    assert!(matches!(
        t.repo.merge(&t.ctx, "main", MergeOptions::default()),
        Err(WvcError::InvalidInput(_))
    ));

    // dirty working set blocks merging
    t.repo.create_branch("feature", None).unwrap();
    put_object(&t, "Article", "obj-001", "Dirty", &[]);
    assert!(matches!(
        t.repo.merge(&t.ctx, "feature", MergeOptions::default()),
        Err(WvcError::DirtyWorkingSet)
    ));

    // detached HEAD refuses to merge
    let head = t.repo.head().unwrap();
    t.repo
        .checkout(
            &t.ctx,
            Some(&head),
            CheckoutOptions {
                force: true,
                create_branch: None,
            },
        )
        .unwrap();
    assert!(matches!(
        t.repo.merge(&t.ctx, "feature", MergeOptions::default()),
        Err(WvcError::DetachedHead(_))
    ));
}

#[test]
fn merging_an_already_merged_branch_is_up_to_date() {
    let t = setup();
    put_object(&t, "Article", "obj-001", "First", &[]);
    t.repo.commit(&t.ctx, "Initial").unwrap();
    t.repo.create_branch("feature", None).unwrap();

    // feature still points at our ancestor
    put_object(&t, "Article", "obj-002", "Second", &[]);
    t.repo.commit(&t.ctx, "ahead").unwrap();

    let outcome = t
        .repo
        .merge(&t.ctx, "feature", MergeOptions::default())
        .unwrap();
    assert!(outcome.success);
    assert!(!outcome.fast_forward);
    assert!(outcome.merge_commit.is_none());
    assert!(!outcome.warnings.is_empty());
}

#[test]
fn ancestors_are_monotone_along_parent_edges() {
    let t = setup();
    put_object(&t, "Article", "obj-001", "First", &[]);
    let c1 = t.repo.commit(&t.ctx, "one").unwrap();
    put_object(&t, "Article", "obj-002", "Second", &[]);
    let c2 = t.repo.commit(&t.ctx, "two").unwrap();
    put_object(&t, "Article", "obj-003", "Third", &[]);
    let c3 = t.repo.commit(&t.ctx, "three").unwrap();

    let a1 = t.repo.ancestors(&c1.id).unwrap();
    let a2 = t.repo.ancestors(&c2.id).unwrap();
    let a3 = t.repo.ancestors(&c3.id).unwrap();
    assert!(a1.is_subset(&a2));
    assert!(a2.is_subset(&a3));
    assert!(a3.contains(&c1.id));

    assert_eq!(t.repo.merge_base(&c3.id, &c2.id).unwrap(), Some(c2.id));
}
