//! Integration tests for the slidesmith binary.

mod common;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A slidesmith command isolated from the caller's environment.
fn slidesmith() -> Command {
    let mut cmd = cargo_bin_cmd!("slidesmith");
    for var in [
        "SLIDESMITH_ENDPOINT",
        "SLIDESMITH_NETWORK_TIMEOUT",
        "SLIDESMITH_EXEC_TIMEOUT",
        "SLIDESMITH_ARTIFACT_EXTENSION",
        "SLIDESMITH_RETENTION",
        "SLIDESMITH_INTERPRETER",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn write_config(project: &Path, content: &str) {
    let dir = project.join(".slidesmith");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("slidesmith.toml"), content).unwrap();
}

/// Configuration that runs generated programs with `sh`.
fn shell_config(project: &Path, endpoint: &str) {
    write_config(
        project,
        &format!(
            r#"
[service]
endpoint = "{}"
timeout_secs = 10

[execution]
interpreter = "sh"
program_file = "program.sh"
timeout_secs = 10
isolate_network = false
confine_filesystem = {}
"#,
            endpoint,
            cfg!(target_os = "linux")
        ),
    );
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        slidesmith()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("generate"))
            .stdout(predicate::str::contains("serve"));
    }

    #[test]
    fn test_version() {
        slidesmith().arg("--version").assert().success();
    }

    #[test]
    fn test_generate_requires_prompt() {
        slidesmith().arg("generate").assert().failure();
    }
}

// =============================================================================
// Config Command Tests
// =============================================================================

mod config_command {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();

        slidesmith()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created slidesmith.toml"));

        let content = fs::read_to_string(dir.path().join(".slidesmith/slidesmith.toml")).unwrap();
        assert!(content.contains("[execution]"));
        assert!(content.contains("python3"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "[service]\nendpoint = \"http://localhost:1/x\"\n");

        slidesmith()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".slidesmith/slidesmith.toml")).unwrap();
        assert!(content.contains("localhost:1"));
    }

    #[test]
    fn test_config_show_without_file_uses_defaults() {
        let dir = TempDir::new().unwrap();

        slidesmith()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using default configuration"))
            .stdout(predicate::str::contains("endpoint = (not set)"));
    }

    #[test]
    fn test_config_show_applies_cli_overrides() {
        let dir = TempDir::new().unwrap();

        slidesmith()
            .current_dir(dir.path())
            .args(["config", "show", "--endpoint", "http://localhost:9/hook"])
            .args(["--extension", ".DOCX"])
            .assert()
            .success()
            .stdout(predicate::str::contains("endpoint = \"http://localhost:9/hook\""))
            .stdout(predicate::str::contains("extension = \".docx\""));
    }

    #[test]
    fn test_config_validate_reports_missing_endpoint() {
        let dir = TempDir::new().unwrap();

        slidesmith()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No generation endpoint configured"));
    }

    #[test]
    fn test_config_validate_accepts_complete_file() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "[service]\nendpoint = \"https://gen.example.com/hook\"\n");

        slidesmith()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_fails_on_errors() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            "[service]\nendpoint = \"https://gen.example.com/hook\"\n\n\
             [execution]\ntimeout_secs = 0\nprogram_file = \"../x.py\"\n\n\
             [artifact]\nextension = \".exe\"\n",
        );

        slidesmith()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Configuration errors:"))
            .stdout(predicate::str::contains("[execution].timeout_secs"))
            .stdout(predicate::str::contains("'../x.py'"))
            .stdout(predicate::str::contains("'.exe'"));
    }

    #[test]
    fn test_generate_refuses_invalid_config() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            "[service]\nendpoint = \"http://127.0.0.1:9/hook\"\n\n[artifact]\nextension = \".exe\"\n",
        );

        slidesmith()
            .current_dir(dir.path())
            .args(["generate", "cats"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("'.exe'"));
    }

    #[test]
    fn test_bad_env_override_is_an_error() {
        let dir = TempDir::new().unwrap();

        slidesmith()
            .current_dir(dir.path())
            .env("SLIDESMITH_EXEC_TIMEOUT", "soon")
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("SLIDESMITH_EXEC_TIMEOUT"));
    }
}

// =============================================================================
// Generate Command Tests
// =============================================================================

#[cfg(unix)]
mod generate_command {
    use super::*;
    use common::{MockReply, spawn_service};

    #[test]
    fn test_generate_without_endpoint_fails() {
        let dir = TempDir::new().unwrap();

        slidesmith()
            .current_dir(dir.path())
            .args(["generate", "cats"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No generation endpoint configured"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_saves_document() {
        let project = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let endpoint = spawn_service(|_| MockReply::program("printf deck > cats.pptx")).await;
        shell_config(project.path(), &endpoint);

        let project_dir = project.path().to_path_buf();
        let output_dir = output.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            slidesmith()
                .current_dir(&project_dir)
                .args(["generate", "Create a 3-slide intro to cats", "--output"])
                .arg(&output_dir)
                .assert()
                .success()
                .stdout(predicate::str::contains("cats.pptx"));
        })
        .await
        .unwrap();

        assert_eq!(fs::read(output.path().join("cats.pptx")).unwrap(), b"deck");
        let workspaces = project.path().join(".slidesmith/workspaces");
        assert_eq!(fs::read_dir(workspaces).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_with_name_override() {
        let project = TempDir::new().unwrap();
        let endpoint = spawn_service(|_| MockReply::program("printf deck > cats.pptx")).await;
        shell_config(project.path(), &endpoint);

        let project_dir = project.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            slidesmith()
                .current_dir(&project_dir)
                .args(["generate", "cats", "--output", "out", "--name", "Presentation"])
                .assert()
                .success();
        })
        .await
        .unwrap();

        assert!(project.path().join("out/Presentation.pptx").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_reports_program_failure() {
        let project = TempDir::new().unwrap();
        let endpoint =
            spawn_service(|_| MockReply::program("undefined_slide_builder --deck cats")).await;
        shell_config(project.path(), &endpoint);

        let project_dir = project.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            slidesmith()
                .current_dir(&project_dir)
                .args(["generate", "cats"])
                .assert()
                .failure()
                .stderr(predicate::str::contains("Error while generating the document"))
                .stderr(predicate::str::contains("undefined_slide_builder"));
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_reports_service_error() {
        let project = TempDir::new().unwrap();
        let endpoint = spawn_service(|_| MockReply::raw(500, "upstream exploded")).await;
        shell_config(project.path(), &endpoint);

        let project_dir = project.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            slidesmith()
                .current_dir(&project_dir)
                .args(["generate", "cats"])
                .assert()
                .failure()
                .stderr(predicate::str::contains("Generation failed"))
                .stderr(predicate::str::contains("upstream exploded"));
        })
        .await
        .unwrap();
    }
}
