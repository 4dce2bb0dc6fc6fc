use splex::{merge, Message, Palette, SourceRegistry};
use std::time::Duration;
use tempfile::tempdir;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time;

const TIMEOUT_2_SEC: Duration = Duration::from_millis(2000);

async fn append(path: &std::path::Path, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .unwrap();
    file.write_all(bytes).await.unwrap();
    file.sync_all().await.unwrap();
}

#[tokio::test]
pub async fn test_newline() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("foo.log");
    append(&logfile, b"already there\n").await;

    let (feed, mut merger) = merge::channel();
    let mut registry = SourceRegistry::new(Palette::default());
    registry.register([logfile.to_str().unwrap()]);
    registry.start_all(&feed).unwrap();
    drop(feed);
    time::sleep(Duration::from_millis(200)).await;

    // One line, split over several appends.
    append(&logfile, b"foo").await;
    time::sleep(Duration::from_millis(100)).await;
    append(&logfile, b" ba").await;
    time::sleep(Duration::from_millis(100)).await;
    append(&logfile, b"r\nbaz\n").await;

    let mut lines = Vec::new();
    while lines.len() < 2 {
        match time::timeout(TIMEOUT_2_SEC, merger.next_message()).await.unwrap() {
            Some(Message::Line(line)) => lines.push(line.text().to_string()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    assert_eq!(lines, ["foo bar", "baz"]);

    // Nothing else shows up, in particular nothing from before startup.
    let extra = time::timeout(Duration::from_millis(300), merger.next_message()).await;
    assert!(extra.is_err(), "unexpected message: {extra:?}");
}
