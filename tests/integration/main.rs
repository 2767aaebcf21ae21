//! Integration tests for Hangar

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// A config whose database lives in the temp dir
    fn workspace() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.toml");
        let db = temp.path().join("state").join("hangar.db");
        std::fs::write(
            &config,
            format!("[database]\npath = {:?}\n", db.display().to_string()),
        )
        .unwrap();
        (temp, config)
    }

    fn hangar(config: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("hangar");
        cmd.env("CI", "1").arg("--config").arg(config);
        cmd
    }

    fn write_pipeline(dir: &Path) -> PathBuf {
        let path = dir.join("pipeline.toml");
        std::fs::write(
            &path,
            r#"
[[resources]]
name = "repo"
type = "git"
check_every = "30s"
source = { uri = "https://example.com/repo.git" }

[[jobs]]
name = "unit"
"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("hangar")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Resource cache"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("hangar")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("hangar"));
    }

    #[test]
    fn config_path_follows_flag() {
        let (_temp, config) = workspace();
        hangar(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let (_temp, config) = workspace();
        hangar(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[radar]"));
    }

    #[test]
    fn config_set_persists() {
        let (_temp, config) = workspace();
        hangar(&config)
            .args(["config", "set", "radar.lock_lease_secs", "42"])
            .assert()
            .success();
        hangar(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("lock_lease_secs = 42"));
    }

    #[test]
    fn pipeline_set_list_and_pause() {
        let (temp, config) = workspace();
        let file = write_pipeline(temp.path());

        hangar(&config)
            .args(["pipeline", "set", "main"])
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("Pipeline main saved"));

        hangar(&config)
            .args(["pipeline", "pause", "main"])
            .assert()
            .success();

        hangar(&config)
            .args(["pipeline", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"paused\": true"));
    }

    #[test]
    fn pause_unknown_pipeline_fails_with_hint() {
        let (_temp, config) = workspace();
        hangar(&config)
            .args(["pipeline", "pause", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("pipeline 'nope' not found"))
            .stderr(predicate::str::contains("hangar pipeline set"));
    }

    #[test]
    fn check_unknown_pipeline_fails() {
        let (_temp, config) = workspace();
        hangar(&config)
            .args(["check", "nope", "repo"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("pipeline 'nope' not found"));
    }

    #[test]
    fn check_rejects_malformed_version() {
        let (_temp, config) = workspace();
        hangar(&config)
            .args(["check", "main", "repo", "--from", "abc"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("expected KEY=VALUE"));
    }

    #[test]
    fn gc_on_empty_store() {
        let (_temp, config) = workspace();
        hangar(&config)
            .args(["gc", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"caches\": 0"));
    }

    #[test]
    fn nothing_to_delete() {
        let (_temp, config) = workspace();
        hangar(&config)
            .arg("containers")
            .assert()
            .success()
            .stdout(predicate::str::contains("No containers eligible"));
        hangar(&config)
            .args(["volumes", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::diff("[]\n"));
    }
}
