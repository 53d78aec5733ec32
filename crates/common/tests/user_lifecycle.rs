//! User lifecycle against a fake drush that keeps accounts as files
#![cfg(unix)]

use std::path::{Path, PathBuf};

use cmsprobe_common::{Drush, DrushConfig, Error, FixtureStore, UserClient};
use tempfile::TempDir;

const FAKE_DRUSH: &str = include_str!("fixtures/fake_drush.sh");

struct Harness {
    dir: TempDir,
    users: UserClient,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("drush.sh");
        std::fs::write(&script, FAKE_DRUSH).unwrap();

        let fixtures = dir.path().join("fixtures");
        std::fs::create_dir_all(fixtures.join("users")).unwrap();
        std::fs::write(
            fixtures.join("users/site_admin.json"),
            r#"{"firstname":"Site","lastname":"Admin","password":"pw#1","email":"site.admin@example.com","role":"site_admin"}"#,
        )
        .unwrap();

        let drush = Drush::new(&DrushConfig {
            command: Some(vec!["sh".to_string(), script.display().to_string()]),
            ..Default::default()
        });
        let users = UserClient::new(drush, FixtureStore::new(fixtures));
        Self { dir, users }
    }

    fn account(&self, name: &str) -> PathBuf {
        self.dir.path().join("accounts").join(name)
    }

    fn calls(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("calls.log"))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn create_then_delete_leaves_no_account() {
    let h = Harness::new();

    h.users.create_user("alice", "secret", "alice@example.com", "editor").await.unwrap();
    assert!(h.users.user_exists("alice").await.unwrap());
    assert_eq!(read_lines(&h.account("alice")), vec!["editor"]);

    h.users.delete_user("alice").await.unwrap();
    assert!(!h.users.user_exists("alice").await.unwrap());
    assert!(!h.account("alice").exists());
}

#[tokio::test]
async fn drush_receives_expected_arguments() {
    let h = Harness::new();

    h.users.create_user("bob", "p w", "bob@example.com", "administrator").await.unwrap();
    h.users.delete_user("bob").await.unwrap();

    assert_eq!(
        h.calls(),
        vec![
            "user:create bob --mail=bob@example.com --password=p w",
            "user:role:add administrator bob",
            "user:information bob",
            "-y user:cancel --delete-content bob",
        ]
    );
}

#[tokio::test]
async fn creating_an_existing_user_is_tolerated() {
    let h = Harness::new();

    h.users.create_user("carol", "pw", "carol@example.com", "editor").await.unwrap();
    h.users.create_user("carol", "pw", "carol@example.com", "editor").await.unwrap();

    assert!(h.users.user_exists("carol").await.unwrap());
}

#[tokio::test]
async fn verification_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // Every call fails: the create and role steps are tolerated, the lookup is not
    let drush = Drush::new(&DrushConfig {
        command: Some(vec!["false".to_string()]),
        ..Default::default()
    });
    let users = UserClient::new(drush, FixtureStore::new(dir.path()));

    let result = users.create_user("dave", "pw", "dave@example.com", "editor").await;
    match result {
        Err(Error::CommandFailed { command, .. }) => assert!(command.contains("user:information dave")),
        other => panic!("expected a failed existence check, got {:?}", other),
    }
}

#[tokio::test]
async fn deleting_a_missing_user_is_fatal() {
    let h = Harness::new();
    let result = h.users.delete_user("nobody").await;
    assert!(matches!(result, Err(Error::CommandFailed { .. })));
}

#[tokio::test]
async fn fixture_user_round_trip() {
    let h = Harness::new();

    let username = h.users.create_fixture_user("site_admin").await.unwrap();
    assert_eq!(username, "SiteAdmin");
    assert_eq!(read_lines(&h.account("SiteAdmin")), vec!["site_admin"]);

    h.users.delete_fixture_user("site_admin").await.unwrap();
    assert!(!h.users.user_exists("SiteAdmin").await.unwrap());
}
