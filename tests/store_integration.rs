//! Integration tests for the version-controlled template store.
//!
//! These tests run against real repositories in temp directories. The wire
//! protocol tests need the `git` executable and are skipped without it.

use std::fs;
use std::process::Command;

use tempfile::TempDir;

use hl7conv::core::types::BranchName;
use hl7conv::git::wire::{self, WireService};
use hl7conv::git::{Author, StoreError, TemplateStore, INITIAL_BRANCH};

// =============================================================================
// Test Fixtures
// =============================================================================

fn author() -> Author {
    Author::new("Test User", "test@example.com")
}

fn branch(name: &str) -> BranchName {
    BranchName::new(name).unwrap()
}

/// A store over a template directory seeded with two files.
fn seeded_store() -> (TempDir, TemplateStore) {
    let temp = TempDir::new().expect("failed to create temp dir");
    let dir = temp.path().join("templates");
    fs::create_dir_all(dir.join("partials")).unwrap();
    fs::write(dir.join("ADT_A01.json"), "{}").unwrap();
    fs::write(dir.join("partials/Patient.json"), "{}").unwrap();

    let store = TemplateStore::open_or_init(&dir, &author()).unwrap();
    (temp, store)
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// =============================================================================
// Repository operations
// =============================================================================

#[tokio::test]
async fn bootstrap_commits_existing_templates() {
    let (_temp, store) = seeded_store();

    assert!(store.status().await.unwrap().is_empty());
    let branches = store.branches().await.unwrap();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].name.as_str(), INITIAL_BRANCH);
    assert!(branches[0].current);
    assert!(branches[0].head.is_some());
}

#[tokio::test]
async fn status_lists_changes_in_order() {
    let (_temp, store) = seeded_store();
    let dir = store.work_dir();

    fs::write(dir.join("b.json"), "{}").unwrap();
    fs::write(dir.join("ADT_A01.json"), "{\"changed\": true}").unwrap();
    fs::remove_file(dir.join("partials/Patient.json")).unwrap();

    assert_eq!(
        store.status().await.unwrap(),
        vec!["ADT_A01.json", "b.json", "partials/Patient.json"]
    );
}

#[tokio::test]
async fn clean_commit_is_conflict() {
    let (_temp, store) = seeded_store();
    let before = store.branches().await.unwrap()[0].head.clone();

    let result = store.commit_all_changes("nothing".into(), author()).await;
    assert!(matches!(result, Err(StoreError::Conflict { .. })));
    assert_eq!(store.branches().await.unwrap()[0].head, before);
}

#[tokio::test]
async fn commit_includes_deletions() {
    let (_temp, store) = seeded_store();
    fs::remove_file(store.work_dir().join("ADT_A01.json")).unwrap();

    store
        .commit_all_changes("drop ADT".into(), author())
        .await
        .unwrap();
    assert!(store.status().await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_branch_is_conflict_and_changes_nothing() {
    let (_temp, store) = seeded_store();
    store.create_branch(branch("feature"), None).await.unwrap();
    let before = store.branches().await.unwrap();

    let result = store.create_branch(branch("feature"), None).await;
    assert!(matches!(result, Err(StoreError::Conflict { .. })));
    assert_eq!(store.branches().await.unwrap(), before);
}

#[tokio::test]
async fn unknown_base_is_conflict() {
    let (_temp, store) = seeded_store();
    let result = store
        .create_branch(branch("feature"), Some(branch("missing")))
        .await;
    assert!(matches!(result, Err(StoreError::Conflict { .. })));
}

#[tokio::test]
async fn branch_records_base() {
    let (_temp, store) = seeded_store();
    let info = store
        .create_branch(branch("feature"), Some(branch("main")))
        .await
        .unwrap();
    assert_eq!(info.base_branch, Some(branch("main")));
    assert!(!info.current);
}

#[tokio::test]
async fn checkout_restores_committed_state() {
    let (_temp, store) = seeded_store();
    let dir = store.work_dir();

    store.create_branch(branch("feature"), None).await.unwrap();
    store.checkout_branch(branch("feature")).await.unwrap();
    fs::write(dir.join("ADT_A01.json"), "{\"feature\": true}").unwrap();
    store
        .commit_all_changes("feature edit".into(), author())
        .await
        .unwrap();

    store.checkout_branch(branch("main")).await.unwrap();
    assert_eq!(fs::read_to_string(dir.join("ADT_A01.json")).unwrap(), "{}");

    let current: Vec<_> = store
        .branches()
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.current)
        .map(|b| b.name)
        .collect();
    assert_eq!(current, vec![branch("main")]);
}

#[tokio::test]
async fn checkout_unknown_branch_is_not_found() {
    let (_temp, store) = seeded_store();
    fs::write(store.work_dir().join("draft.json"), "{}").unwrap();

    let result = store.checkout_branch(branch("missing")).await;
    assert!(matches!(result, Err(StoreError::NotFound { .. })));
    assert!(store.work_dir().join("draft.json").is_file());
}

// =============================================================================
// Wire protocol
// =============================================================================

#[tokio::test]
async fn advertisement_lists_main() {
    if !git_available() {
        eprintln!("skipping: git executable not available");
        return;
    }
    let (_temp, store) = seeded_store();

    let body = wire::advertise_refs(&store.work_dir(), WireService::UploadPack)
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&body);
    assert!(text.starts_with("001e# service=git-upload-pack\n0000"));
    assert!(text.contains("refs/heads/main"));
}

#[test]
fn pkt_line_framing() {
    assert_eq!(wire::pkt_line("a\n"), b"0006a\n".to_vec());
    assert_eq!(wire::FLUSH_PKT, b"0000");
}

#[test]
fn repo_names_match_with_optional_suffix() {
    assert!(wire::matches_repo_name("templates", "templates.git"));
    assert!(wire::matches_repo_name("templates.git", "templates"));
    assert!(!wire::matches_repo_name("other.git", "templates.git"));
}
