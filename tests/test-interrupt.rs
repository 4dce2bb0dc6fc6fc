#![cfg(unix)]

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::tempdir;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time;

const TIMEOUT_2_SEC: Duration = Duration::from_millis(2000);

async fn append(path: &Path, bytes: &[u8]) {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .unwrap();
    file.write_all(bytes).await.unwrap();
    file.sync_all().await.unwrap();
}

/// Polls `path` until it contains `needle`, returning the whole content.
async fn wait_for(path: &Path, needle: &str) -> String {
    let poll = async {
        loop {
            if let Ok(content) = fs::read_to_string(path).await {
                if content.contains(needle) {
                    return content;
                }
            }
            time::sleep(Duration::from_millis(50)).await;
        }
    };

    time::timeout(TIMEOUT_2_SEC, poll)
        .await
        .unwrap_or_else(|_| panic!("{} never contained {needle:?}", path.display()))
}

fn spawn_splex(out: &Path, log: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_splex"))
        .arg("-o")
        .arg(out)
        .arg(log)
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap()
}

async fn run_until(signal: Signal) {
    let dir = tempdir().unwrap();
    let log = dir.path().join("a.log");
    let out = dir.path().join("out.log");
    append(&log, b"before startup\n").await;
    let log_name = log.to_str().unwrap();

    let mut child = spawn_splex(&out, &log);

    wait_for(&out, &format!("Setting up listener for: {log_name}")).await;
    time::sleep(Duration::from_millis(200)).await;

    append(&log, b"hello\n").await;
    let rendered = format!("# {log_name}: hello");
    wait_for(&out, &rendered).await;

    let pid = Pid::from_raw(child.id().unwrap() as i32);
    kill(pid, signal).unwrap();

    let status = time::timeout(TIMEOUT_2_SEC, child.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success(), "exited with {status:?}");

    let content = fs::read_to_string(&out).await.unwrap();
    let expected = format!(
        "-------------------\n  Starting SpleX   \n----- 🦈  🦈 ------\n\
         Setting up listener for: {log_name}\n\
         {rendered}\n"
    );
    assert_eq!(content, expected);
}

#[tokio::test]
pub async fn test_sigint_flushes_and_exits_cleanly() {
    run_until(Signal::SIGINT).await;
}

#[tokio::test]
pub async fn test_sigterm_flushes_and_exits_cleanly() {
    run_until(Signal::SIGTERM).await;
}
