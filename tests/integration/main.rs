//! Integration tests for imgcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn imgcache() -> Command {
        let mut cmd = cargo_bin_cmd!("imgcache");
        cmd.env_remove("IMGCACHE_CONFIG")
            .env_remove("IMGCACHE_CACHE_FILE");
        cmd
    }

    fn config_arg(dir: &Path) -> String {
        dir.join("imgcache.toml").display().to_string()
    }

    #[test]
    fn help_displays() {
        imgcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Build avoidance for container images"));
    }

    #[test]
    fn version_displays() {
        imgcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("imgcache"));
    }

    #[test]
    fn config_show_defaults() {
        let temp = TempDir::new().unwrap();
        imgcache()
            .args(["--config", &config_arg(temp.path()), "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]").and(predicate::str::contains("[daemon]")));
    }

    #[test]
    fn config_path_follows_flag() {
        let temp = TempDir::new().unwrap();
        imgcache()
            .args(["--config", &config_arg(temp.path()), "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("imgcache.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let temp = TempDir::new().unwrap();
        let config = config_arg(temp.path());

        imgcache()
            .args(["--config", &config, "config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));

        imgcache()
            .args(["--config", &config, "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[[artifacts]]"));
    }

    #[test]
    fn invalid_config_reports_error() {
        let temp = TempDir::new().unwrap();
        let config = config_arg(temp.path());
        std::fs::write(&config, "[cache\nenabled = ").unwrap();

        imgcache()
            .args(["--config", &config, "config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn cache_path_follows_flag() {
        let temp = TempDir::new().unwrap();
        let cache_file = temp.path().join("my-cache").display().to_string();

        imgcache()
            .args(["--config", &config_arg(temp.path())])
            .args(["cache", "path", "--cache-file", &cache_file])
            .assert()
            .success()
            .stdout(predicate::str::contains("my-cache"));
    }

    #[test]
    fn cache_list_empty() {
        let temp = TempDir::new().unwrap();
        let cache_file = temp.path().join("cache");
        std::fs::write(&cache_file, "").unwrap();

        imgcache()
            .args(["--config", &config_arg(temp.path())])
            .args(["cache", "list", "--cache-file", &cache_file.display().to_string()])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries found"));
    }

    #[test]
    fn cache_list_plain_prints_keys() {
        let temp = TempDir::new().unwrap();
        let cache_file = temp.path().join("cache");
        std::fs::write(&cache_file, "abc123:\n  id: sha256:1\ndef456:\n  digest: sha256:2\n")
            .unwrap();

        imgcache()
            .args(["--config", &config_arg(temp.path())])
            .args(["cache", "list", "--format", "plain"])
            .args(["--cache-file", &cache_file.display().to_string()])
            .assert()
            .success()
            .stdout(predicate::str::diff("abc123\ndef456\n"));
    }

    #[test]
    fn cache_list_json() {
        let temp = TempDir::new().unwrap();
        let cache_file = temp.path().join("cache");
        std::fs::write(&cache_file, "abc123:\n  id: sha256:1\n").unwrap();

        imgcache()
            .args(["--config", &config_arg(temp.path())])
            .args(["cache", "list", "--format", "json"])
            .args(["--cache-file", &cache_file.display().to_string()])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"id\": \"sha256:1\""));
    }

    #[test]
    fn cache_hash_prints_key_per_artifact() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("app")).unwrap();
        std::fs::write(temp.path().join("app/Dockerfile"), "FROM scratch\n").unwrap();
        let config = config_arg(temp.path());
        std::fs::write(&config, "[[artifacts]]\nimage = \"example/app\"\ncontext = \"app\"\n")
            .unwrap();

        imgcache()
            .args(["--config", &config])
            .args(["cache", "hash", "--cache-file", &temp.path().join("c").display().to_string()])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("example/app:latest")
                    .and(predicate::str::contains("not cached")),
            );
    }

    #[test]
    fn build_without_artifacts_fails() {
        let temp = TempDir::new().unwrap();

        imgcache()
            .args(["--config", &config_arg(temp.path()), "build"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn unknown_subcommand_fails() {
        imgcache().arg("frobnicate").assert().failure();
    }
}
