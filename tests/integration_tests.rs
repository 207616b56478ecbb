//! Integration tests for devloop
//!
//! These drive the binary end to end, with in-process stand-ins for the
//! model server and the target application where a command needs them.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use axum::{Json, Router, routing::post};
use devloop::protocol::mock::{self, MockTarget};
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use tempfile::TempDir;

fn devloop() -> Command {
    cargo_bin_cmd!("devloop")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_devloop_help() {
        devloop()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve-mock"));
    }

    #[test]
    fn test_devloop_version() {
        devloop().arg("--version").assert().success();
    }

    #[test]
    fn test_run_requires_request() {
        devloop().arg("run").assert().failure();
    }

    #[test]
    fn test_missing_project_dir_fails() {
        let dir = create_temp_project();
        devloop()
            .arg("--project-dir")
            .arg(dir.path().join("missing"))
            .arg("history")
            .assert()
            .failure()
            .stderr(predicate::str::contains("project directory"));
    }
}

mod config_commands {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        devloop()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No config file"))
            .stdout(predicate::str::contains("max_attempts = 10"))
            .stdout(predicate::str::contains("split_threshold = 21"));
    }

    #[test]
    fn test_config_init_writes_file_and_prompts() {
        let dir = create_temp_project();
        devloop()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("devloop.toml"));

        assert!(dir.path().join(".devloop/devloop.toml").is_file());
        for agent in ["architect", "analyst", "developer"] {
            let prompt = dir.path().join(format!(".devloop/prompts/{}.json", agent));
            assert!(prompt.is_file(), "missing {}", prompt.display());
        }

        devloop()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_file_and_env_layers() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".devloop")).unwrap();
        fs::write(
            dir.path().join(".devloop/devloop.toml"),
            "[llm]\nmodel = \"file-model\"\napi_key = \"hunter2\"\n",
        )
        .unwrap();

        devloop()
            .current_dir(dir.path())
            .env("DEVLOOP_MAX_ATTEMPTS", "4")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("file-model"))
            .stdout(predicate::str::contains("max_attempts = 4"))
            .stdout(predicate::str::contains("hunter2").not());
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".devloop")).unwrap();
        fs::write(
            dir.path().join(".devloop/devloop.toml"),
            "[pipeline]\nmax_attempts = 0\n",
        )
        .unwrap();

        devloop()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("warning: pipeline.max_attempts"));
    }
}

mod apply_command {
    use super::*;

    #[test]
    fn test_apply_file_and_method_commands() {
        let dir = create_temp_project();
        fs::write(
            dir.path().join("Player.cs"),
            "public class Player {\n    void Jump() {\n        y += 1;\n    }\n}\n",
        )
        .unwrap();
        let commands = json!({
            "fileCommands": [
                {"action": "create", "path": "Scripts/Score.cs", "content": "public class Score {}"}
            ],
            "methodCommands": [
                {"action": "add", "className": "Player", "methodSignature": "void Run()", "methodBody": "{ x += 1; }"}
            ]
        });
        let file = dir.path().join("commands.json");
        fs::write(&file, commands.to_string()).unwrap();

        devloop()
            .current_dir(dir.path())
            .arg("apply")
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("file: applied 1"))
            .stdout(predicate::str::contains("method: applied 1"));

        assert_eq!(
            fs::read_to_string(dir.path().join("Scripts/Score.cs")).unwrap(),
            "public class Score {}"
        );
        let player = fs::read_to_string(dir.path().join("Player.cs")).unwrap();
        assert!(player.contains("void Run()"));
        assert!(player.contains("void Jump()"));
        assert!(!dir.path().join("Player.cs.bak").exists());
    }

    #[test]
    fn test_apply_failed_batch_leaves_tree_untouched() {
        let dir = create_temp_project();
        fs::write(dir.path().join("keep.txt"), "original").unwrap();
        let commands = json!({
            "fileCommands": [
                {"action": "update", "path": "keep.txt", "content": "changed"},
                {"action": "create", "path": "../escape.txt", "content": "nope"}
            ]
        });
        let file = dir.path().join("commands.json");
        fs::write(&file, commands.to_string()).unwrap();

        devloop()
            .current_dir(dir.path())
            .arg("apply")
            .arg(&file)
            .assert()
            .failure()
            .stdout(predicate::str::contains("file: FAILED"));

        assert_eq!(
            fs::read_to_string(dir.path().join("keep.txt")).unwrap(),
            "original"
        );
    }

    #[test]
    fn test_apply_rejects_invalid_json() {
        let dir = create_temp_project();
        let file = dir.path().join("commands.json");
        fs::write(&file, "not json").unwrap();

        devloop()
            .current_dir(dir.path())
            .arg("apply")
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid command set"));
    }
}

mod history_command {
    use super::*;

    #[test]
    fn test_history_without_runs() {
        let dir = create_temp_project();
        devloop()
            .current_dir(dir.path())
            .arg("history")
            .assert()
            .success()
            .stdout(predicate::str::contains("No runs recorded"));
    }
}

mod against_servers {
    use super::*;

    /// Chat endpoint that answers by role, named in the system message.
    async fn fake_llm(Json(request): Json<Value>) -> Json<Value> {
        let system = request["messages"][0]["content"].as_str().unwrap_or_default();
        let content = if system.contains("software architect") {
            "Put the greeting in its own file.".to_string()
        } else if system.contains("technical analyst") {
            json!({"tasks": [{"number": 1, "name": "Add greeting", "storyPoints": 2}]}).to_string()
        } else {
            json!({
                "fileCommands": [{"action": "create", "path": "hello.txt", "content": "hello"}],
                "mcpCommands": [{"action": "get-status", "parameters": {}}]
            })
            .to_string()
        };
        Json(json!({"message": {"role": "assistant", "content": content}}))
    }

    async fn spawn_llm() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/api/chat", post(fake_llm));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_against_mock_target() {
        let addr = mock::spawn(MockTarget::default()).await.unwrap();
        let dir = create_temp_project();
        let path = dir.path().to_path_buf();
        let endpoint = format!("http://{}/", addr);

        tokio::task::spawn_blocking(move || {
            devloop()
                .current_dir(&path)
                .args(["send", "start", "--protocol-endpoint", &endpoint])
                .assert()
                .success()
                .stdout(predicate::str::contains("Successful"));

            devloop()
                .current_dir(&path)
                .args(["send", "explode", "--protocol-endpoint", &endpoint])
                .assert()
                .failure()
                .stderr(predicate::str::contains("unknown action explode"));
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_end_to_end() {
        let llm = spawn_llm().await;
        let target = MockTarget::with_logs(vec![
            "NullReferenceException: greeting".to_string(),
            "All good".to_string(),
        ]);
        let protocol = mock::spawn(target.clone()).await.unwrap();
        let dir = create_temp_project();
        let path = dir.path().to_path_buf();

        tokio::task::spawn_blocking(move || {
            devloop()
                .current_dir(&path)
                .args([
                    "run",
                    "say hello",
                    "--llm-endpoint",
                    &format!("http://{}/api/chat", llm),
                    "--protocol-endpoint",
                    &format!("http://{}/", protocol),
                ])
                .assert()
                .success()
                .stdout(predicate::str::contains("Add greeting"))
                .stdout(predicate::str::contains("1 of 1 tasks verified"));

            devloop()
                .current_dir(&path)
                .arg("history")
                .assert()
                .success()
                .stdout(predicate::str::contains("say hello"));
        })
        .await
        .unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "hello");
        assert!(dir.path().join(".devloop/devloop.db").is_file());
        let received = target.received();
        assert_eq!(received.iter().filter(|a| *a == "get-log").count(), 2);
        assert!(received.contains(&"get-status".to_string()));
    }
}
