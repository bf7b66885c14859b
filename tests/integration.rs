//! Integration tests for the graph-dedup command line

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Isolated config file and token cache under a temp directory
struct TestEnv {
    temp_dir: TempDir,
    config_path: PathBuf,
    token_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        Self::with_config("")
    }

    /// `extra` is appended after the `[auth]` table.
    fn with_config(extra: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let token_path = temp_dir.path().join("state").join("token.json");

        let config = format!(
            "[auth]\ntoken_cache = {:?}\n\n{}",
            token_path.to_str().unwrap(),
            extra
        );
        fs::write(&config_path, config).unwrap();

        Self {
            temp_dir,
            config_path,
            token_path,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Write a contacts file in the format produced by `export`
    fn write_contacts(&self, name: &str, json: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, json).unwrap();
        path
    }

    fn cmd(&self) -> AssertCommand {
        let mut cmd = cmd();
        cmd.args(["--config", self.config_path.to_str().unwrap()])
            .env_remove("RUST_LOG");
        cmd
    }

    fn groups(&self, input: &Path, extra: &[&str]) -> AssertCommand {
        let mut cmd = self.cmd();
        cmd.args(["groups", "--input", input.to_str().unwrap()])
            .args(extra);
        cmd
    }
}

/// Get the graph-dedup binary command
fn cmd() -> AssertCommand {
    AssertCommand::cargo_bin("graph-dedup").unwrap()
}

const CONTACTS: &str = r#"[
  {
    "id": "1",
    "display_name": "Jo Smith",
    "given_name": "Jo",
    "email_addresses": ["jo@example.com"],
    "folder_name": "Contacts",
    "updated_at": "2024-01-02T03:04:05Z"
  },
  { "id": "2", "display_name": " Jo Smith ", "folder_name": "Work" },
  { "id": "3", "display_name": "jo smith", "given_name": "Jo Anne", "folder_name": "Contacts" },
  { "id": "4", "display_name": "Ann Lee", "phone_numbers": ["+1 555 0100"], "folder_name": "Contacts" },
  { "id": "5", "display_name": "", "folder_name": "Contacts" },
  { "id": "6", "display_name": "   ", "folder_name": "Contacts" }
]"#;

// =============================================================================
// CLI surface
// =============================================================================

#[test]
fn test_help_lists_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("logout"))
        .stdout(predicate::str::contains("groups"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("remove"));
}

#[test]
fn test_remove_requires_ids() {
    let env = TestEnv::new();
    env.cmd().arg("remove").assert().failure();
}

#[test]
fn test_unknown_strategy_rejected() {
    let env = TestEnv::new();
    let input = env.write_contacts("contacts.json", CONTACTS);
    env.groups(&input, &["--strategy", "surname"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("surname"));
}

// =============================================================================
// Offline grouping
// =============================================================================

#[test]
fn test_groups_prints_duplicates_in_ordinal_order() {
    let env = TestEnv::new();
    let input = env.write_contacts("contacts.json", CONTACTS);

    let output = env.groups(&input, &[]).assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output).unwrap();

    let expected = "\
(no name) (2)
  5  [Contacts]
  6  [Contacts]
Jo Smith (2)
  1  jo@example.com  [Contacts]  updated 2024-01-02
  2  [Work]
";
    assert_eq!(stdout, expected);
}

#[test]
fn test_groups_all_includes_singletons() {
    let env = TestEnv::new();
    let input = env.write_contacts("contacts.json", CONTACTS);

    let output = env.groups(&input, &["--all"]).assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output).unwrap();
    let headers: Vec<&str> = stdout.lines().filter(|l| !l.starts_with(' ')).collect();

    // Case-sensitive keys sort byte-wise: uppercase before lowercase
    assert_eq!(
        headers,
        vec!["(no name) (2)", "Ann Lee (1)", "Jo Smith (2)", "jo smith (1)"]
    );
    assert!(stdout.contains("  4  +1 555 0100  [Contacts]"));
}

#[test]
fn test_groups_json_output() {
    let env = TestEnv::new();
    let input = env.write_contacts("contacts.json", CONTACTS);

    let output = env.groups(&input, &["--json"]).assert().success().get_output().stdout.clone();
    let groups: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let groups = groups.as_array().unwrap();

    let keys: Vec<&str> = groups.iter().map(|g| g["key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["", "Jo Smith"]);

    let jo = &groups[1];
    assert_eq!(jo["count"], 2);
    let ids: Vec<&str> = jo["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(jo["members"][1]["folder_name"], "Work");
}

#[test]
fn test_groups_by_first_given_name() {
    let env = TestEnv::new();
    let input = env.write_contacts("contacts.json", CONTACTS);

    env.groups(&input, &["--strategy", "first-given-name"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Jo (2)"))
        .stdout(predicate::str::contains("  3  [Contacts]"))
        .stdout(predicate::str::contains("(no name)").not());
}

#[test]
fn test_groups_strategy_from_config() {
    let env = TestEnv::with_config("[grouping]\nstrategy = \"first-given-name\"\n");
    let input = env.write_contacts("contacts.json", CONTACTS);

    env.groups(&input, &[])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Jo (2)\n"));
}

#[test]
fn test_groups_repeated_id_keeps_later_entry() {
    let env = TestEnv::new();
    let input = env.write_contacts(
        "contacts.json",
        r#"[
          { "id": "1", "display_name": "Old Name" },
          { "id": "2", "display_name": "New Name" },
          { "id": "1", "display_name": "New Name" }
        ]"#,
    );

    env.groups(&input, &["--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("New Name (2)"))
        .stdout(predicate::str::contains("Old Name").not());
}

#[test]
fn test_groups_without_duplicates() {
    let env = TestEnv::new();
    let input = env.write_contacts(
        "contacts.json",
        r#"[{ "id": "1", "display_name": "Ann" }, { "id": "2", "display_name": "Bob" }]"#,
    );

    env.groups(&input, &[])
        .assert()
        .success()
        .stdout("No duplicates among 2 contact(s).\n");
}

#[test]
fn test_groups_rejects_malformed_input() {
    let env = TestEnv::new();
    let input = env.write_contacts("contacts.json", "{ not json");

    env.groups(&input, &[])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse contacts"));
}

// =============================================================================
// Sign-in state
// =============================================================================

#[test]
fn test_logout_removes_token_cache() {
    let env = TestEnv::new();
    fs::create_dir_all(env.token_path.parent().unwrap()).unwrap();
    fs::write(&env.token_path, "{}").unwrap();

    env.cmd()
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Signed out"));
    assert!(!env.token_path.exists());

    env.cmd()
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("No cached credential"));
}

#[test]
fn test_commands_needing_sign_in_require_client_id() {
    let env = TestEnv::new();

    for args in [
        vec!["login"],
        vec!["export"],
        vec!["groups"],
        vec!["remove", "AAMk1", "--yes"],
    ] {
        env.cmd()
            .arg("--no-interactive")
            .args(&args)
            .assert()
            .failure()
            .stderr(predicate::str::contains("auth.client_id"));
    }
}

// =============================================================================
// Configuration errors
// =============================================================================

#[test]
fn test_missing_explicit_config() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("nope.toml");

    cmd()
        .args(["--config", missing.to_str().unwrap(), "logout"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn test_key_collision_rejected() {
    let env = TestEnv::with_config("[keys.global]\nrefresh = \"j\"\n");

    env.cmd()
        .arg("logout")
        .assert()
        .failure()
        .stderr(predicate::str::contains("collision"));
}

#[test]
fn test_invalid_page_size_rejected() {
    let env = TestEnv::with_config("[graph]\npage_size = 5000\n");

    env.cmd()
        .arg("logout")
        .assert()
        .failure()
        .stderr(predicate::str::contains("graph.page_size"));
}

#[test]
fn test_unknown_config_key_warns() {
    let env = TestEnv::with_config("[graph]\nbogus = 1\n");
    let input = env.write_contacts("contacts.json", CONTACTS);

    env.groups(&input, &[])
        .assert()
        .success()
        .stderr(predicate::str::contains("warning: unknown"));
}
