/// Acceptance tests for the actionkey CLI
///
/// Each test runs the binary against an isolated exec root and cache
/// directory, with config discovery pointed away from the user's files.
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

struct TestWorkspace {
    exec_root: TempDir,
    cache_dir: TempDir,
    config_home: TempDir,
}

impl TestWorkspace {
    fn new() -> Self {
        Self {
            exec_root: TempDir::new().unwrap(),
            cache_dir: TempDir::new().unwrap(),
            config_home: TempDir::new().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.exec_root.path()
    }

    fn actionkey(&self) -> Command {
        let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_actionkey"));
        cmd.current_dir(self.path())
            .env("ACTIONKEY_EXEC_ROOT", self.path())
            .env("ACTIONKEY_CACHE_DIR", self.cache_dir.path())
            .env("XDG_CONFIG_HOME", self.config_home.path())
            .env("ACTIONKEY_LOG_FORMAT", "compact")
            .env_remove("ACTIONKEY_CONFIG")
            .env_remove("ACTIONKEY_NO_CACHE");
        cmd
    }

    fn create_file(&self, path: &str, content: &str) {
        let file_path = self.path().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(file_path, content).unwrap();
    }

    fn read_file(&self, path: &str) -> String {
        fs::read_to_string(self.path().join(path)).unwrap()
    }

    fn baseline(&self, files: &[&str]) -> Command {
        let mut cmd = self.actionkey();
        cmd.arg("baseline")
            .args(files)
            .args(["--package", "app", "--target", "lib"]);
        cmd
    }
}

const BASELINE_OUTPUT: &str = "bazel-out/testlogs/app/lib/baseline_coverage.dat";

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap().trim().to_string()
}

#[test]
fn test_baseline_writes_lcov_records() {
    let ws = TestWorkspace::new();

    ws.baseline(&["app/Foo.java", "app/Bar.java"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Wrote"));

    assert_eq!(
        ws.read_file(BASELINE_OUTPUT),
        "SF:app/Bar.java\nend_of_record\nSF:app/Foo.java\nend_of_record\n"
    );
}

#[test]
fn test_baseline_second_run_is_cached() {
    let ws = TestWorkspace::new();

    let first = stdout_of(&mut ws.baseline(&["app/Foo.java"]));
    ws.baseline(&["app/Foo.java"])
        .assert()
        .success()
        .stdout(predicate::str::contains(first.as_str()))
        .stderr(predicate::str::contains("Up to date"));

    ws.baseline(&["app/Foo.java", "app/Baz.java"])
        .assert()
        .success()
        .stdout(predicate::str::contains(first.as_str()).not())
        .stderr(predicate::str::contains("Wrote"));
}

#[test]
fn test_baseline_deleted_output_is_rewritten() {
    let ws = TestWorkspace::new();

    ws.baseline(&["app/Foo.java"]).assert().success();
    fs::remove_file(ws.path().join(BASELINE_OUTPUT)).unwrap();

    ws.baseline(&["app/Foo.java"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Wrote"));
    assert_eq!(
        ws.read_file(BASELINE_OUTPUT),
        "SF:app/Foo.java\nend_of_record\n"
    );
}

#[test]
fn test_baseline_dry_run_prints_key_only() {
    let ws = TestWorkspace::new();

    let key = stdout_of(ws.baseline(&["app/Foo.java"]).arg("--dry-run"));
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(!ws.path().join(BASELINE_OUTPUT).exists());

    // Same inputs from a fresh process give the same key
    let again = stdout_of(ws.baseline(&["app/Foo.java"]).arg("--dry-run"));
    assert_eq!(key, again);
}

#[test]
fn test_baseline_expands_globs() {
    let ws = TestWorkspace::new();
    ws.create_file("app/src/B.java", "class B {}");
    ws.create_file("app/src/A.java", "class A {}");
    ws.create_file("app/src/README.md", "");

    ws.baseline(&["app/src/*.java"]).assert().success();

    assert_eq!(
        ws.read_file(BASELINE_OUTPUT),
        "SF:app/src/A.java\nend_of_record\nSF:app/src/B.java\nend_of_record\n"
    );
}

#[test]
fn test_write_and_cache_management() {
    let ws = TestWorkspace::new();

    ws.actionkey()
        .args(["write", "--output", "bin/run.sh", "--content", "echo hi", "--executable"])
        .assert()
        .success();
    assert_eq!(ws.read_file("bin/run.sh"), "echo hi");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(ws.path().join("bin/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    ws.actionkey()
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries: 1"));

    ws.actionkey()
        .args(["cache", "clean", "bin/run.sh"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Removed cache entry for bin/run.sh"));

    ws.actionkey()
        .args(["cache", "clean", "--all"])
        .assert()
        .success();

    ws.actionkey()
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries: 0"));
}

#[test]
fn test_cache_clean_requires_target() {
    let ws = TestWorkspace::new();
    ws.actionkey()
        .args(["cache", "clean"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn test_no_cache_always_executes() {
    let ws = TestWorkspace::new();
    for _ in 0..2 {
        ws.baseline(&["app/Foo.java"])
            .arg("--no-cache")
            .assert()
            .success()
            .stderr(predicate::str::contains("Wrote"));
    }
}

#[test]
fn test_discovered_config_is_used() {
    let ws = TestWorkspace::new();
    ws.create_file(
        "actionkey.toml",
        "[exec]\ntestlogs_dir = \"out/testlogs\"\n",
    );

    ws.baseline(&["app/Foo.java"]).assert().success();
    assert_eq!(
        ws.read_file("out/testlogs/app/lib/baseline_coverage.dat"),
        "SF:app/Foo.java\nend_of_record\n"
    );
}

#[test]
fn test_config_generate_and_validate() {
    let ws = TestWorkspace::new();

    let example = stdout_of(ws.actionkey().args(["config", "generate"]));
    ws.create_file("good.toml", &example);
    ws.actionkey()
        .args(["config", "validate", "good.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file is valid"));

    ws.create_file("bad.toml", "[exec]\ntestlogs_dir = \"/abs\"\n");
    ws.actionkey()
        .args(["config", "validate", "bad.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("testlogs_dir"));
}
