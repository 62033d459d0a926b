//! Integration tests for sandkit

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Command isolated from the user's config, state, and cache dirs
    fn sandkit(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("sandkit");
        cmd.env("HOME", home.path())
            .env_remove("XDG_CONFIG_HOME")
            .env_remove("XDG_STATE_HOME")
            .env_remove("XDG_CACHE_HOME")
            .env_remove("XDG_DATA_HOME")
            .env_remove("SANDKIT_CONFIG");
        cmd
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        sandkit(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("sandbox images"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        sandkit(&home)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("sandkit"));
    }

    #[test]
    fn plan_builtin_java() {
        let home = TempDir::new().unwrap();
        sandkit(&home)
            .args(["plan", "java", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("tool:jdk@21"))
            .stdout(predicate::str::contains("tool:gradle@8.5"))
            .stdout(predicate::str::contains("configure-2"));
    }

    #[test]
    fn plan_json_is_parseable() {
        let home = TempDir::new().unwrap();
        let output = sandkit(&home)
            .args(["plan", "node", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let steps: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let steps = steps.as_array().unwrap();
        assert!(!steps.is_empty());
        assert_eq!(steps[0]["index"], 0);
    }

    #[test]
    fn plan_lists_builtins() {
        let home = TempDir::new().unwrap();
        sandkit(&home)
            .args(["plan", "--list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("java"))
            .stdout(predicate::str::contains("node"));
    }

    #[test]
    fn plan_unknown_spec_fails() {
        let home = TempDir::new().unwrap();
        sandkit(&home)
            .args(["plan", "does-not-exist"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn plan_rejects_unpinned_tool() {
        let home = TempDir::new().unwrap();
        let spec = home.path().join("bad.toml");
        std::fs::write(
            &spec,
            "name = \"bad\"\nbase_image = \"ubuntu:22.04\"\n\n[[tools]]\nname = \"maven\"\nversion = \"\"\n",
        )
        .unwrap();

        sandkit(&home)
            .arg("plan")
            .arg(&spec)
            .assert()
            .failure()
            .stderr(predicate::str::contains("maven"));
    }

    #[test]
    fn catalog_lists_tools() {
        let home = TempDir::new().unwrap();
        sandkit(&home)
            .args(["catalog", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("jdk"))
            .stdout(predicate::str::contains("maven"));
    }

    #[test]
    fn config_path_honors_env() {
        let home = TempDir::new().unwrap();
        let config = home.path().join("custom.toml");
        sandkit(&home)
            .env("SANDKIT_CONFIG", &config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let home = TempDir::new().unwrap();
        sandkit(&home)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[runtime]"))
            .stdout(predicate::str::contains("[retry]"));
    }

    #[test]
    fn config_init_then_invalid_value_rejected() {
        let home = TempDir::new().unwrap();
        let config = home.path().join("config.toml");

        sandkit(&home)
            .arg("--config")
            .arg(&config)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(config.exists());

        std::fs::write(&config, "[runtime]\nengine = \"lxc\"\n").unwrap();
        sandkit(&home)
            .arg("--config")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("runtime.engine"));
    }

    #[test]
    fn cache_path_uses_configured_root() {
        let home = TempDir::new().unwrap();
        let root = home.path().join("store");
        let config = home.path().join("config.toml");
        std::fs::write(&config, format!("[cache]\nroot = {:?}\n", root.display().to_string())).unwrap();

        sandkit(&home)
            .arg("--config")
            .arg(&config)
            .args(["cache", "path", "jdk-21"])
            .assert()
            .success()
            .stdout(predicate::str::contains("store"))
            .stdout(predicate::str::contains("jdk-21"));
    }

    #[test]
    fn cache_list_empty() {
        let home = TempDir::new().unwrap();
        sandkit(&home)
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn cache_clear_needs_target() {
        let home = TempDir::new().unwrap();
        sandkit(&home).args(["cache", "clear"]).assert().failure();
    }

    #[test]
    fn history_empty() {
        let home = TempDir::new().unwrap();
        sandkit(&home)
            .args(["history", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn build_requires_spec() {
        let home = TempDir::new().unwrap();
        sandkit(&home).arg("build").assert().failure();
    }
}
