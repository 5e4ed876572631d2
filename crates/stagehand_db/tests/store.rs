//! Store-level tests: arrival records, conditional transitions, history.

use stagehand_db::{Actor, DbError, FileStatus, Identity, Store};
use tempfile::TempDir;

async fn open_store() -> (TempDir, Store) {
    let temp = TempDir::new().expect("temp dir");
    let store = Store::open(temp.path().join("ledger.sqlite3"))
        .await
        .expect("open store");
    (temp, store)
}

fn identity(hash: &str, size: u64) -> Identity {
    Identity {
        hash: hash.to_string(),
        size,
    }
}

#[tokio::test]
async fn create_record_starts_new_with_creation_history() {
    let (_temp, store) = open_store().await;

    let record = store
        .create_record(&identity("abc123", 5), "/drop/a.txt", "a.txt", 1_000)
        .await
        .unwrap();

    assert_eq!(record.status, FileStatus::New);
    assert_eq!(record.path, "/drop/a.txt");
    assert_eq!(record.identity.size, 5);
    assert!(record.tags.is_empty());

    let history = store.history(record.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from, None);
    assert_eq!(history[0].to, FileStatus::New);
    assert_eq!(history[0].actor, Actor::System);
}

#[tokio::test]
async fn second_live_record_for_same_identity_is_rejected() {
    let (_temp, store) = open_store().await;

    store
        .create_record(&identity("abc123", 5), "/drop/a.txt", "a.txt", 1_000)
        .await
        .unwrap();

    let err = store
        .create_record(&identity("abc123", 5), "/drop/copy.txt", "copy.txt", 2_000)
        .await
        .unwrap_err();
    assert!(err.is_unique_violation(), "expected unique violation: {err}");
}

#[tokio::test]
async fn terminal_record_frees_identity_for_a_new_one() {
    let (_temp, store) = open_store().await;

    let first = store
        .create_record(&identity("abc123", 5), "/drop/a.txt", "a.txt", 1_000)
        .await
        .unwrap();
    store
        .apply_transition(first.id, FileStatus::New, FileStatus::Archived, Actor::User)
        .await
        .unwrap();

    // Same content arriving again gets a fresh record, not a reopened one.
    let second = store
        .create_record(&identity("abc123", 5), "/drop/a.txt", "a.txt", 3_000)
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.status, FileStatus::New);

    let live = store
        .get_live_by_identity(&identity("abc123", 5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.id, second.id);
}

#[tokio::test]
async fn transition_is_conditional_on_prior_status() {
    let (_temp, store) = open_store().await;

    let record = store
        .create_record(&identity("h", 1), "/drop/x", "x", 0)
        .await
        .unwrap();

    let applied = store
        .apply_transition(record.id, FileStatus::New, FileStatus::Reviewed, Actor::User)
        .await
        .unwrap();
    assert_eq!(applied.from, FileStatus::New);

    // A second request against the stale prior state must fail without mutating.
    let err = store
        .apply_transition(record.id, FileStatus::New, FileStatus::Rejected, Actor::User)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::StaleState(_)), "got {err}");

    let record = store.get_record(record.id).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Reviewed);
    assert_eq!(store.history(record.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn transition_on_unknown_record_is_not_found() {
    let (_temp, store) = open_store().await;

    let err = store
        .apply_transition(999, FileStatus::New, FileStatus::Reviewed, Actor::User)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)), "got {err}");
}

#[tokio::test]
async fn revert_restores_status_and_removes_history_entry() {
    let (_temp, store) = open_store().await;

    let record = store
        .create_record(&identity("h", 1), "/drop/x", "x", 0)
        .await
        .unwrap();
    let applied = store
        .apply_transition(record.id, FileStatus::New, FileStatus::Archived, Actor::User)
        .await
        .unwrap();

    store.revert_transition(&applied).await.unwrap();

    let record = store.get_record(record.id).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::New);

    let history = store.history(record.id).await.unwrap();
    assert_eq!(history.len(), 1, "archive entry should be gone");
    assert_eq!(history[0].to, FileStatus::New);
}

#[tokio::test]
async fn path_update_leaves_identity_status_history_alone() {
    let (_temp, store) = open_store().await;

    let record = store
        .create_record(&identity("h", 9), "/drop/old.txt", "old.txt", 0)
        .await
        .unwrap();

    store.update_path(record.id, "/drop/new.txt").await.unwrap();

    let record = store.get_record(record.id).await.unwrap().unwrap();
    assert_eq!(record.path, "/drop/new.txt");
    assert_eq!(record.original_name, "old.txt");
    assert_eq!(record.status, FileStatus::New);
    assert_eq!(record.identity, identity("h", 9));
    assert_eq!(store.history(record.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn tags_merge_dedupe_and_sort() {
    let (_temp, store) = open_store().await;

    let record = store
        .create_record(&identity("h", 1), "/drop/x", "x", 0)
        .await
        .unwrap();

    let tags = store
        .add_tags(record.id, &["zeta".into(), "alpha".into()])
        .await
        .unwrap();
    assert_eq!(tags, vec!["alpha", "zeta"]);

    let tags = store
        .add_tags(record.id, &["alpha".into(), "  ".into(), "mid".into()])
        .await
        .unwrap();
    assert_eq!(tags, vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn counts_and_list_filtering() {
    let (_temp, store) = open_store().await;

    let a = store
        .create_record(&identity("a", 1), "/drop/a", "a", 0)
        .await
        .unwrap();
    let b = store
        .create_record(&identity("b", 1), "/drop/b", "b", 0)
        .await
        .unwrap();
    store
        .create_record(&identity("c", 1), "/drop/c", "c", 0)
        .await
        .unwrap();

    store
        .apply_transition(a.id, FileStatus::New, FileStatus::Reviewed, Actor::User)
        .await
        .unwrap();
    store
        .apply_transition(b.id, FileStatus::New, FileStatus::Rejected, Actor::User)
        .await
        .unwrap();

    let counts = store.counts_by_status().await.unwrap();
    assert_eq!(counts.new, 1);
    assert_eq!(counts.reviewed, 1);
    assert_eq!(counts.rejected, 1);
    assert_eq!(counts.archived, 0);
    assert_eq!(counts.total(), 3);

    let reviewed = store
        .list_records(Some(FileStatus::Reviewed), 100)
        .await
        .unwrap();
    assert_eq!(reviewed.len(), 1);
    assert_eq!(reviewed[0].id, a.id);

    let all = store.list_records(None, 100).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn meta_roundtrip() {
    let (_temp, store) = open_store().await;

    assert_eq!(store.get_meta("last_scan_at").await.unwrap(), None);
    store.set_meta("last_scan_at", "1700000000000").await.unwrap();
    store.set_meta("last_scan_at", "1700000001000").await.unwrap();
    assert_eq!(
        store.get_meta("last_scan_at").await.unwrap().as_deref(),
        Some("1700000001000")
    );
}
