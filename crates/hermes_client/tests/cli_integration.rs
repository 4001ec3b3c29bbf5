//! Integration tests for the `hermes` binary.
//! Runs the binary with a temp config against an in-process WebSocket server.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::net::TcpListener as StdTcpListener;

fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Config pointing both URLs at `port`, with the health probe off and a
/// single connect attempt so failures surface quickly.
fn write_config(dir: &tempfile::TempDir, port: u16) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        format!(
            "backend:\n  api_url: http://127.0.0.1:{port}\n  ws_url: ws://127.0.0.1:{port}\n  health_check: false\n  connect_timeout_secs: 2\nreconnect:\n  max_attempts: 1\n  backoff_secs: 1\n"
        ),
    )
    .unwrap();
    path
}

/// Accept one connection, wait for the question, reply with a rag turn.
fn spawn_test_server(port: u16) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            use futures_util::{SinkExt, StreamExt};
            use tokio_tungstenite::tungstenite::Message;

            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
                .await
                .unwrap();
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let (mut write, mut read) = ws.split();

            let _ = read.next().await;
            for frame in [
                r#"{"type":"sources","mode":"rag","sources":[{"source":"ΚΑΝ-12.pdf","score":0.9}]}"#,
                r#"{"type":"token","content":"Test ","mode":"rag"}"#,
                r#"{"type":"token","content":"answer.","mode":"rag"}"#,
                r#"{"type":"done"}"#,
            ] {
                write.send(Message::Text(frame.into())).await.unwrap();
            }
            // Wait for the client's close.
            while let Some(Ok(msg)) = read.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });
    })
}

fn hermes() -> Command {
    let mut cmd = Command::from(cargo_bin_cmd!("hermes"));
    cmd.env_remove("HERMES_API_URL")
        .env_remove("HERMES_WS_URL")
        .env_remove("HERMES_CONFIG")
        .env_remove("HERMES_LOG");
    cmd
}

#[test]
fn ask_from_stdin_prints_streamed_answer_and_sources() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port);

    let _server = spawn_test_server(port);
    std::thread::sleep(std::time::Duration::from_millis(100));

    let mut cmd = hermes();
    cmd.arg("--config")
        .arg(&config_path)
        .write_stdin("Ποιες είναι οι διαδικασίες για άδεια;\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Test answer."))
        .stdout(predicate::str::contains("Sources:"))
        .stdout(predicate::str::contains("ΚΑΝ-12.pdf"));
}

#[test]
fn ask_with_config_env_var_and_positional_question() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port);

    let _server = spawn_test_server(port);
    std::thread::sleep(std::time::Duration::from_millis(100));

    let mut cmd = hermes();
    cmd.env("HERMES_CONFIG", &config_path)
        .args(["ask", "Τι ισχύει για τις άδειες;"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Test answer."));
}

#[test]
fn ask_fails_when_backend_is_down() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port);

    let mut cmd = hermes();
    cmd.arg("--config")
        .arg(&config_path)
        .args(["ask", "anyone there?"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn empty_question_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, free_port());

    let mut cmd = hermes();
    cmd.arg("--config").arg(&config_path).write_stdin("   \n");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no question provided"));
}

#[test]
fn health_reports_unavailable_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, free_port());

    let mut cmd = hermes();
    cmd.arg("--config").arg(&config_path).arg("health");

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("unavailable"));
}

#[test]
fn whoami_without_session_fails() {
    let home = tempfile::tempdir().unwrap();
    let config_path = write_config(&home, free_port());

    let mut cmd = hermes();
    cmd.env("HOME", home.path())
        .env("USERPROFILE", home.path())
        .arg("--config")
        .arg(&config_path)
        .arg("whoami");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn whoami_prints_stored_user() {
    let home = tempfile::tempdir().unwrap();
    let config_path = write_config(&home, free_port());
    let session_dir = home.path().join(".hermes");
    std::fs::create_dir_all(&session_dir).unwrap();
    std::fs::write(
        session_dir.join("session.json"),
        r#"{"access_token":"tok","user":{"username":"giorgos"}}"#,
    )
    .unwrap();

    let mut cmd = hermes();
    cmd.env("HOME", home.path())
        .env("USERPROFILE", home.path())
        .arg("--config")
        .arg(&config_path)
        .arg("whoami");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("giorgos"));
}
