//! Watch-mode behaviour over real filesystem notifications.
//!
//! These tests drive the debouncer with genuine editor-style write bursts,
//! so they lean on generous waits rather than exact timings.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relay_engine::{
    CancellationToken, ChangeKind, EngineConfig, FileWatcher, Scanner, SyncEngine, SyncMode,
    SyncProfile,
};

/// Polls `condition` for up to five seconds.
async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn burst_of_writes_coalesces_into_one_event() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();

    let watcher =
        FileWatcher::new(Duration::from_millis(100), Arc::new(Scanner::new(1))).expect("watcher");
    watcher.add(&root).expect("add root");

    let cancel = CancellationToken::new();
    watcher.start(&cancel).expect("start");
    let mut events = watcher.take_events().expect("events");

    // Let the backend finish registering before producing changes.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Create + modify + modify within the debounce window.
    let target = root.join("a.txt");
    fs::write(&target, b"1").expect("write");
    tokio::time::sleep(Duration::from_millis(20)).await;
    fs::write(&target, b"12").expect("write");
    tokio::time::sleep(Duration::from_millis(20)).await;
    fs::write(&target, b"12345").expect("write");

    // Wait well past the debounce window, then drain.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.path == target {
            seen.push(event);
        }
    }

    assert_eq!(
        seen.len(),
        1,
        "burst must collapse into exactly one event, got {seen:?}"
    );
    let event = &seen[0];
    assert!(matches!(event.kind, ChangeKind::Create | ChangeKind::Modify));
    let record = event.record.as_ref().expect("record");
    assert_eq!(record.size, 5, "record must reflect the final write");

    watcher.stop().expect("stop");
    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn separate_bursts_deliver_separate_events() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();

    let watcher =
        FileWatcher::new(Duration::from_millis(80), Arc::new(Scanner::new(1))).expect("watcher");
    watcher.add(&root).expect("add root");

    let cancel = CancellationToken::new();
    watcher.start(&cancel).expect("start");
    let mut events = watcher.take_events().expect("events");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let target = root.join("b.txt");
    fs::write(&target, b"first").expect("write");
    tokio::time::sleep(Duration::from_millis(500)).await;
    fs::write(&target, b"second burst").expect("write");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        if event.path == target {
            count += 1;
        }
    }
    assert_eq!(count, 2, "quiet gaps must yield one event per burst");

    watcher.stop().expect("stop");
    cancel.cancel();
}

fn watch_engine(source: &Path, destination: &Path) -> Arc<SyncEngine> {
    let config = EngineConfig {
        profile: SyncProfile {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            mode: SyncMode::Watch,
            workers: 0,
            buffer_size: 0,
        },
        ..EngineConfig::default()
    };
    Arc::new(SyncEngine::with_config(config).expect("engine"))
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_mode_mirrors_creations_and_deletions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let source = temp.path().join("src");
    let destination = temp.path().join("dst");
    fs::create_dir_all(&source).expect("mkdir src");
    fs::create_dir_all(&destination).expect("mkdir dst");

    let engine = watch_engine(&source, &destination);
    let cancel = CancellationToken::new();

    let watch_task = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.watch(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;

    let source_file = source.join("note.txt");
    let dest_file: PathBuf = destination.join("note.txt");
    fs::write(&source_file, b"watch me").expect("write");

    assert!(
        eventually(|| dest_file.exists()).await,
        "created file must be mirrored"
    );
    assert_eq!(fs::read(&dest_file).expect("read"), b"watch me");

    fs::remove_file(&source_file).expect("remove source");
    assert!(
        eventually(|| !dest_file.exists()).await,
        "deletion must be mirrored"
    );

    cancel.cancel();
    watch_task
        .await
        .expect("watch task")
        .expect("watch result");
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_mode_applies_the_last_content_of_a_burst() {
    let temp = tempfile::tempdir().expect("tempdir");
    let source = temp.path().join("src");
    let destination = temp.path().join("dst");
    fs::create_dir_all(&source).expect("mkdir src");
    fs::create_dir_all(&destination).expect("mkdir dst");

    let engine = watch_engine(&source, &destination);
    let cancel = CancellationToken::new();

    let watch_task = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.watch(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;

    let source_file = source.join("burst.txt");
    let dest_file = destination.join("burst.txt");
    fs::write(&source_file, b"a").expect("write");
    tokio::time::sleep(Duration::from_millis(20)).await;
    fs::write(&source_file, b"ab").expect("write");
    tokio::time::sleep(Duration::from_millis(20)).await;
    fs::write(&source_file, b"final-content").expect("write");

    assert!(
        eventually(|| {
            fs::read(&dest_file)
                .map(|bytes| bytes == b"final-content")
                .unwrap_or(false)
        })
        .await,
        "destination must converge on the last write"
    );

    cancel.cancel();
    watch_task
        .await
        .expect("watch task")
        .expect("watch result");
}
