use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ferryfile_core::{
    CancelReason, ConflictPolicy, ConflictResolution, FileFailure, OperationId, OperationKind,
    OperationState, Phase, TransferConfig, TransferError, TransferEvent, is_internal_name,
};
use ferryfile_ops::{TransferEngine, VolumeInspector};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

/// Canonical temp root with empty `a/` and `b/` directories.
fn fixture() -> (TempDir, PathBuf, PathBuf) {
    let temp = TempDir::new().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let a = root.join("a");
    let b = root.join("b");
    fs::create_dir(&a).unwrap();
    fs::create_dir(&b).unwrap();
    (temp, a, b)
}

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

fn config(policy: ConflictPolicy) -> TransferConfig {
    TransferConfig::builder()
        .conflict_policy(policy)
        .build()
        .unwrap()
}

fn leftovers(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| is_internal_name(&entry.file_name()))
        .map(|entry| entry.path())
        .collect()
}

async fn next_event(rx: &mut UnboundedReceiver<TransferEvent>) -> TransferEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Collect events of `id` up to and including its terminal event.
async fn until_terminal(
    rx: &mut UnboundedReceiver<TransferEvent>,
    id: OperationId,
) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        if event.operation_id() != id {
            continue;
        }
        let done = event.is_terminal();
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Wait for the next conflict of `id`, failing if the operation ends first.
async fn until_conflict(
    rx: &mut UnboundedReceiver<TransferEvent>,
    id: OperationId,
) -> ferryfile_core::ConflictDescriptor {
    loop {
        match next_event(rx).await {
            TransferEvent::Conflict {
                operation_id,
                descriptor,
            } if operation_id == id => return descriptor,
            event if event.operation_id() == id && event.is_terminal() => {
                panic!("operation ended before a conflict: {event:?}")
            }
            _ => {}
        }
    }
}

/// Failures of a completed operation; panics on any other outcome.
fn failures(events: &[TransferEvent]) -> &[FileFailure] {
    match events.last() {
        Some(TransferEvent::Complete { failures, .. }) => failures,
        other => panic!("operation did not complete: {other:?}"),
    }
}

fn modified(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

fn set_modified(path: &Path, days_ago: u64) {
    let time = SystemTime::now() - Duration::from_secs(days_ago * 24 * 60 * 60);
    let file = if path.is_dir() {
        fs::File::open(path).unwrap()
    } else {
        fs::File::options().write(true).open(path).unwrap()
    };
    file.set_modified(time).unwrap();
}

fn conflicts(events: &[TransferEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, TransferEvent::Conflict { .. }))
        .count()
}

fn last_progress(events: &[TransferEvent]) -> ferryfile_core::ProgressSnapshot {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            TransferEvent::Progress { snapshot, .. } => Some(snapshot.clone()),
            _ => None,
        })
        .expect("no progress event")
}

/// Volumes that put everything under one directory on its own volume.
struct SplitVolumes {
    foreign: PathBuf,
}

impl VolumeInspector for SplitVolumes {
    fn volume_id(&self, path: &Path) -> io::Result<u64> {
        Ok(if path.starts_with(&self.foreign) { 2 } else { 1 })
    }
}

#[tokio::test]
async fn test_copy_reports_files_and_bytes() {
    let (_temp, a, b) = fixture();
    write(&a.join("1.txt"), &"x".repeat(100));
    write(&a.join("sub/2.txt"), &"y".repeat(50));

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(
            vec![a.join("1.txt"), a.join("sub/2.txt")],
            b.clone(),
            TransferConfig::default(),
        )
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    match events.last().unwrap() {
        TransferEvent::Complete {
            kind,
            files_processed,
            bytes_processed,
            failures,
            ..
        } => {
            assert_eq!(*kind, OperationKind::Copy);
            assert_eq!(*files_processed, 2);
            assert_eq!(*bytes_processed, 150);
            assert!(failures.is_empty());
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }

    // The final snapshot comes right before the terminal event.
    assert!(matches!(
        events[events.len() - 2],
        TransferEvent::Progress { .. }
    ));
    assert_eq!(read(&b.join("1.txt")).len(), 100);
    assert_eq!(read(&b.join("2.txt")).len(), 50);
    assert!(a.join("1.txt").exists());
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_copy_directory_tree() {
    let (_temp, a, b) = fixture();
    write(&a.join("project/src/main.rs"), "fn main() {}");
    write(&a.join("project/README"), "hi");
    fs::create_dir(a.join("project/empty")).unwrap();

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("project")], b.clone(), TransferConfig::default())
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Complete {
            files_processed: 2,
            bytes_processed: 14,
            ..
        })
    ));
    assert_eq!(read(&b.join("project/src/main.rs")), "fn main() {}");
    assert!(b.join("project/empty").is_dir());
}

#[tokio::test]
async fn test_stop_conflict_skip_leaves_destination() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "new contents");
    write(&b.join("x.txt"), "old");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("x.txt")], b.clone(), config(ConflictPolicy::Stop))
        .unwrap();

    let descriptor = until_conflict(&mut rx, id).await;
    assert_eq!(descriptor.destination_path, b.join("x.txt"));
    assert_eq!(descriptor.source_size, 12);
    assert_eq!(descriptor.destination_size, 3);
    assert_eq!(read(&b.join("x.txt")), "old");

    assert!(engine.resolve_conflict(id, ConflictResolution::Skip, false));
    let events = until_terminal(&mut rx, id).await;

    assert_eq!(conflicts(&events), 0);
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Complete { failures, .. }) if failures.is_empty()
    ));
    assert_eq!(read(&b.join("x.txt")), "old");
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_stop_conflict_overwrite() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "new");
    write(&b.join("x.txt"), "old contents");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("x.txt")], b.clone(), config(ConflictPolicy::Stop))
        .unwrap();

    until_conflict(&mut rx, id).await;
    assert!(engine.resolve_conflict(id, ConflictResolution::Overwrite, false));
    // Already answered.
    assert!(!engine.resolve_conflict(id, ConflictResolution::Skip, false));

    let events = until_terminal(&mut rx, id).await;
    assert!(matches!(events.last(), Some(TransferEvent::Complete { .. })));
    assert_eq!(read(&b.join("x.txt")), "new");
}

#[tokio::test]
async fn test_failed_overwrite_restores_destination_directory() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "file");
    write(&b.join("x.txt/keep.txt"), "keep");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("x.txt")], b.clone(), config(ConflictPolicy::Stop))
        .unwrap();

    until_conflict(&mut rx, id).await;
    fs::remove_file(a.join("x.txt")).unwrap();
    assert!(engine.resolve_conflict(id, ConflictResolution::Overwrite, false));

    let events = until_terminal(&mut rx, id).await;
    let failures = failures(&events);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].path, a.join("x.txt"));
    assert!(matches!(failures[0].error, TransferError::SourceNotFound { .. }));

    assert_eq!(read(&b.join("x.txt/keep.txt")), "keep");
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_overwrite_replaces_directory_with_file() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "file");
    write(&b.join("x.txt/keep.txt"), "keep");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(
            vec![a.join("x.txt")],
            b.clone(),
            config(ConflictPolicy::Overwrite),
        )
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    assert!(failures(&events).is_empty());
    assert_eq!(read(&b.join("x.txt")), "file");
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_failed_entry_reported_and_rest_copied() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "new");
    write(&a.join("y.txt"), "vanishes");
    write(&a.join("z.txt"), "stays");
    write(&b.join("x.txt"), "old");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(
            vec![a.join("x.txt"), a.join("y.txt"), a.join("z.txt")],
            b.clone(),
            config(ConflictPolicy::Stop),
        )
        .unwrap();

    until_conflict(&mut rx, id).await;
    fs::remove_file(a.join("y.txt")).unwrap();
    assert!(engine.resolve_conflict(id, ConflictResolution::Skip, false));

    let events = until_terminal(&mut rx, id).await;
    let failures = failures(&events);
    assert_eq!(failures.len(), 1, "{failures:?}");
    assert_eq!(failures[0].path, a.join("y.txt"));
    assert!(matches!(failures[0].error, TransferError::SourceNotFound { .. }));
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Complete {
            files_processed: 3,
            ..
        })
    ));

    assert_eq!(read(&b.join("x.txt")), "old");
    assert!(!b.join("y.txt").exists());
    assert_eq!(read(&b.join("z.txt")), "stays");
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_copy_keeps_timestamps() {
    let (_temp, a, b) = fixture();
    write(&a.join("tree/sub/f.txt"), "aged");
    set_modified(&a.join("tree/sub/f.txt"), 30);
    set_modified(&a.join("tree/sub"), 20);
    set_modified(&a.join("tree"), 10);

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("tree")], b.clone(), TransferConfig::default())
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    assert!(failures(&events).is_empty());
    for relative in ["tree", "tree/sub", "tree/sub/f.txt"] {
        assert_eq!(
            modified(&b.join(relative)),
            modified(&a.join(relative)),
            "{relative}"
        );
    }
}

#[tokio::test]
async fn test_rename_policy_keeps_both() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "new");
    write(&b.join("x.txt"), "old");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("x.txt")], b.clone(), config(ConflictPolicy::Rename))
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    assert_eq!(conflicts(&events), 0);
    assert_eq!(read(&b.join("x.txt")), "old");
    assert_eq!(read(&b.join("x (1).txt")), "new");
}

#[tokio::test]
async fn test_apply_to_all_answers_later_conflicts() {
    let (_temp, a, b) = fixture();
    for name in ["x.txt", "y.txt", "z.txt"] {
        write(&a.join(name), "new");
        write(&b.join(name), "old");
    }

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(
            vec![a.join("x.txt"), a.join("y.txt"), a.join("z.txt")],
            b.clone(),
            config(ConflictPolicy::Stop),
        )
        .unwrap();

    until_conflict(&mut rx, id).await;
    assert!(engine.resolve_conflict(id, ConflictResolution::Overwrite, true));

    let events = until_terminal(&mut rx, id).await;
    assert_eq!(conflicts(&events), 0);
    for name in ["x.txt", "y.txt", "z.txt"] {
        assert_eq!(read(&b.join(name)), "new");
    }
}

#[tokio::test]
async fn test_unanswered_conflict_times_out() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "new");
    write(&b.join("x.txt"), "old");

    let config = TransferConfig::builder()
        .conflict_timeout_ms(50u64)
        .build()
        .unwrap();
    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("x.txt")], b.clone(), config)
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    assert_eq!(conflicts(&events), 1);
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Cancelled {
            reason: CancelReason::ConflictTimeout,
            ..
        })
    ));
    assert_eq!(read(&b.join("x.txt")), "old");
    assert_eq!(engine.status(id).unwrap().state, OperationState::Cancelled);
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "new");
    write(&b.join("x.txt"), "old");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("x.txt")], b.clone(), config(ConflictPolicy::Stop))
        .unwrap();

    until_conflict(&mut rx, id).await;
    assert!(engine.cancel(id));

    let events = until_terminal(&mut rx, id).await;
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Cancelled {
            reason: CancelReason::User,
            files_processed: 0,
            ..
        })
    ));
    assert_eq!(read(&b.join("x.txt")), "old");
    assert!(!engine.cancel(id));
}

#[tokio::test]
async fn test_same_volume_move_renames_without_scanning() {
    let (_temp, a, b) = fixture();
    write(&a.join("one.txt"), "1111");
    write(&a.join("two.txt"), "22");
    write(&a.join("dir/three.txt"), "333");

    // Long interval: only the final snapshot is published.
    let config = TransferConfig::builder()
        .progress_interval_ms(60_000u64)
        .build()
        .unwrap();
    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_move(
            vec![a.join("one.txt"), a.join("two.txt"), a.join("dir")],
            b.clone(),
            config,
        )
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Complete {
            files_processed: 3,
            bytes_processed: 0,
            ..
        })
    ));
    let snapshot = last_progress(&events);
    assert_eq!(snapshot.phase, Phase::Finalizing);
    assert_eq!(snapshot.files_total, 3);
    assert_eq!(snapshot.bytes_total, 0);

    assert!(!a.join("one.txt").exists());
    assert!(!a.join("dir").exists());
    assert_eq!(read(&b.join("dir/three.txt")), "333");
    assert_eq!(read(&b.join("two.txt")), "22");
}

#[tokio::test]
async fn test_cross_volume_move_stages_and_removes_sources() {
    let (_temp, a, b) = fixture();
    write(&a.join("tree/f1"), &"1".repeat(10));
    write(&a.join("tree/sub/f2"), &"2".repeat(20));
    write(&a.join("solo.txt"), "55555");

    let (engine, mut rx) = TransferEngine::with_channel();
    let engine = engine.with_inspector(SplitVolumes {
        foreign: b.clone(),
    });
    let id = engine
        .start_move(
            vec![a.join("tree"), a.join("solo.txt")],
            b.clone(),
            TransferConfig::default(),
        )
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    match events.last().unwrap() {
        TransferEvent::Complete {
            files_processed,
            bytes_processed,
            failures,
            ..
        } => {
            assert_eq!(*files_processed, 3);
            assert_eq!(*bytes_processed, 35);
            assert!(failures.is_empty(), "{failures:?}");
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }

    assert!(!a.join("tree").exists());
    assert!(!a.join("solo.txt").exists());
    assert_eq!(read(&b.join("tree/sub/f2")), "2".repeat(20));
    assert_eq!(read(&b.join("solo.txt")), "55555");
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_cancelled_staged_move_keeps_unmoved_sources() {
    let (_temp, a, b) = fixture();
    write(&a.join("alpha/f"), "alpha");
    write(&a.join("beta.txt"), "beta");
    write(&b.join("beta.txt"), "old");

    let (engine, mut rx) = TransferEngine::with_channel();
    let engine = engine.with_inspector(SplitVolumes {
        foreign: b.clone(),
    });
    let id = engine
        .start_move(
            vec![a.join("alpha"), a.join("beta.txt")],
            b.clone(),
            config(ConflictPolicy::Stop),
        )
        .unwrap();

    let descriptor = until_conflict(&mut rx, id).await;
    assert_eq!(descriptor.destination_path, b.join("beta.txt"));
    assert!(engine.cancel(id));

    let events = until_terminal(&mut rx, id).await;
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Cancelled {
            reason: CancelReason::User,
            ..
        })
    ));

    // The first item was fully moved before the pause.
    assert!(!a.join("alpha").exists());
    assert_eq!(read(&b.join("alpha/f")), "alpha");
    // The second was never touched.
    assert_eq!(read(&a.join("beta.txt")), "beta");
    assert_eq!(read(&b.join("beta.txt")), "old");
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_failed_move_overwrite_restores_destination_directory() {
    let (_temp, a, b) = fixture();
    write(&a.join("d/new.txt"), "new");
    write(&b.join("d/keep.txt"), "keep");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_move(vec![a.join("d")], b.clone(), config(ConflictPolicy::Stop))
        .unwrap();

    until_conflict(&mut rx, id).await;
    fs::remove_dir_all(a.join("d")).unwrap();
    assert!(engine.resolve_conflict(id, ConflictResolution::Overwrite, false));

    let events = until_terminal(&mut rx, id).await;
    let failures = failures(&events);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].path, a.join("d"));

    assert_eq!(read(&b.join("d/keep.txt")), "keep");
    assert!(!b.join("d/new.txt").exists());
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_move_overwrite_replaces_directory() {
    let (_temp, a, b) = fixture();
    write(&a.join("d/new.txt"), "new");
    write(&b.join("d/keep.txt"), "keep");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_move(
            vec![a.join("d")],
            b.clone(),
            config(ConflictPolicy::Overwrite),
        )
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    assert!(failures(&events).is_empty());
    assert_eq!(read(&b.join("d/new.txt")), "new");
    assert!(!b.join("d/keep.txt").exists());
    assert!(!a.join("d").exists());
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_incomplete_staged_item_not_promoted() {
    let (_temp, a, b) = fixture();
    write(&a.join("first.txt"), "first");
    write(&a.join("tree/f1"), "one");
    write(&a.join("tree/f2"), "two");
    write(&b.join("first.txt"), "old");

    let (engine, mut rx) = TransferEngine::with_channel();
    let engine = engine.with_inspector(SplitVolumes {
        foreign: b.clone(),
    });
    let id = engine
        .start_move(
            vec![a.join("first.txt"), a.join("tree")],
            b.clone(),
            config(ConflictPolicy::Stop),
        )
        .unwrap();

    until_conflict(&mut rx, id).await;
    fs::remove_file(a.join("tree/f2")).unwrap();
    assert!(engine.resolve_conflict(id, ConflictResolution::Skip, false));

    let events = until_terminal(&mut rx, id).await;
    let failures = failures(&events);
    assert_eq!(failures.len(), 1, "{failures:?}");
    assert_eq!(failures[0].path, a.join("tree/f2"));
    assert!(matches!(failures[0].error, TransferError::SourceNotFound { .. }));

    // Nothing of the item reached the destination and its source is intact.
    assert!(!b.join("tree").exists());
    assert_eq!(read(&a.join("tree/f1")), "one");
    assert_eq!(read(&a.join("first.txt")), "first");
    assert_eq!(read(&b.join("first.txt")), "old");
    assert!(leftovers(&b).is_empty());
}

#[tokio::test]
async fn test_dry_run_matches_real_run_without_mutation() {
    let (_temp, a, b) = fixture();
    write(&a.join("data/one"), "123");
    write(&a.join("data/nested/two"), "4567");
    write(&a.join("data/nested/three"), "89");
    write(&b.join("data/one"), "existing");

    let dry = TransferConfig::builder().dry_run(true).build().unwrap();
    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("data")], b.clone(), dry)
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    let preview = match events.last().unwrap() {
        TransferEvent::DryRunComplete { result, .. } => result.clone(),
        other => panic!("unexpected terminal event: {other:?}"),
    };
    assert_eq!(preview.files_total, 3);
    assert_eq!(preview.bytes_total, 9);
    assert_eq!(preview.conflicts_total, 1);
    assert_eq!(preview.conflicts[0].destination_path, b.join("data/one"));
    assert!(events.iter().any(|e| matches!(e, TransferEvent::ScanConflict { .. })));
    assert!(!events.iter().any(|e| matches!(e, TransferEvent::Progress { .. })));

    // Nothing was written.
    assert!(!b.join("data/nested").exists());
    assert_eq!(read(&b.join("data/one")), "existing");

    let id = engine
        .start_copy(
            vec![a.join("data")],
            b.clone(),
            config(ConflictPolicy::Overwrite),
        )
        .unwrap();
    let events = until_terminal(&mut rx, id).await;
    let snapshot = last_progress(&events);
    assert_eq!(snapshot.files_total, preview.files_total);
    assert_eq!(snapshot.bytes_total, preview.bytes_total);
    assert_eq!(read(&b.join("data/one")), "123");
}

#[tokio::test]
async fn test_dry_run_delete_removes_nothing() {
    let (_temp, a, _b) = fixture();
    write(&a.join("junk/one"), "1");
    write(&a.join("junk/two"), "22");

    let dry = TransferConfig::builder().dry_run(true).build().unwrap();
    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine.start_delete(vec![a.join("junk")], dry).unwrap();

    let events = until_terminal(&mut rx, id).await;
    match events.last().unwrap() {
        TransferEvent::DryRunComplete { kind, result, .. } => {
            assert_eq!(*kind, OperationKind::Delete);
            // Two files and the directory itself.
            assert_eq!(result.files_total, 3);
            assert_eq!(result.bytes_total, 3);
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
    assert!(a.join("junk/two").exists());
}

#[tokio::test]
async fn test_delete_tree() {
    let (_temp, a, _b) = fixture();
    write(&a.join("junk/one"), "1");
    write(&a.join("junk/deep/two"), "22");
    write(&a.join("loose.txt"), "333");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_delete(
            vec![a.join("junk"), a.join("loose.txt")],
            TransferConfig::default(),
        )
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Complete {
            files_processed: 5,
            bytes_processed: 6,
            ..
        })
    ));
    assert!(!a.join("junk").exists());
    assert!(!a.join("loose.txt").exists());
    assert!(a.exists());
}

#[tokio::test]
async fn test_delete_overlapping_sources() {
    let (_temp, a, _b) = fixture();
    write(&a.join("junk/one"), "1");
    write(&a.join("junk/deep/two"), "22");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_delete(
            vec![a.join("junk/deep"), a.join("junk"), a.join("junk")],
            TransferConfig::default(),
        )
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    assert!(failures(&events).is_empty(), "{:?}", failures(&events));
    assert!(matches!(
        events.last(),
        Some(TransferEvent::Complete {
            files_processed: 4,
            bytes_processed: 3,
            ..
        })
    ));
    assert!(!a.join("junk").exists());
}

#[test]
fn test_structural_errors_rejected_up_front() {
    let (_temp, a, b) = fixture();
    write(&a.join("dir/file"), "x");
    write(&a.join("plain.txt"), "x");
    let engine = TransferEngine::new(ferryfile_ops::NullSink);

    let err = engine
        .start_copy(vec![a.join("dir")], a.join("dir"), TransferConfig::default())
        .unwrap_err();
    assert!(matches!(err, TransferError::DestinationInsideSource { .. }));

    let err = engine
        .start_move(vec![a.join("plain.txt")], a.clone(), TransferConfig::default())
        .unwrap_err();
    assert!(matches!(err, TransferError::SameLocation { .. }));

    let err = engine
        .start_copy(vec![a.join("missing")], b.clone(), TransferConfig::default())
        .unwrap_err();
    assert!(matches!(err, TransferError::SourceNotFound { .. }));

    let err = engine
        .start_copy(
            vec![a.join("plain.txt")],
            a.join("dir/file"),
            TransferConfig::default(),
        )
        .unwrap_err();
    assert!(matches!(err, TransferError::Io { .. }));

    let err = engine
        .start_delete(vec![a.join("missing")], TransferConfig::default())
        .unwrap_err();
    assert!(matches!(err, TransferError::SourceNotFound { .. }));

    // Nothing was registered.
    assert!(engine.list_active_operations().is_empty());
}

#[tokio::test]
async fn test_status_list_and_acknowledge() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "new");
    write(&b.join("x.txt"), "old");

    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("x.txt")], b.clone(), config(ConflictPolicy::Stop))
        .unwrap();
    until_conflict(&mut rx, id).await;

    let active = engine.list_active_operations();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].operation_id, id);
    assert_eq!(active[0].kind, OperationKind::Copy);

    let status = engine.status(id).unwrap();
    assert_eq!(status.state, OperationState::AwaitingConflict);
    assert!(status.pending_conflict.is_some());
    assert!(!engine.acknowledge(id));

    engine.resolve_conflict(id, ConflictResolution::Skip, false);
    until_terminal(&mut rx, id).await;

    let status = engine.status(id).unwrap();
    assert_eq!(status.state, OperationState::Completed);
    assert!(status.pending_conflict.is_none());
    assert!(engine.list_active_operations().is_empty());

    assert!(engine.acknowledge(id));
    assert!(engine.status(id).is_none());
    assert!(!engine.acknowledge(id));
}

#[tokio::test]
async fn test_finished_operation_expires() {
    let (_temp, a, b) = fixture();
    write(&a.join("x.txt"), "x");

    let (engine, mut rx) = TransferEngine::with_channel();
    let engine = engine.with_retention(Duration::from_millis(20));
    let id = engine
        .start_copy(vec![a.join("x.txt")], b.clone(), TransferConfig::default())
        .unwrap();
    until_terminal(&mut rx, id).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(engine.status(id).is_none());
}

#[tokio::test]
async fn test_single_terminal_event_and_bounded_progress() {
    let (_temp, a, b) = fixture();
    for i in 0..50 {
        write(&a.join(format!("many/{i:02}.bin")), &"z".repeat(i * 10));
    }

    let config = TransferConfig::builder()
        .progress_interval_ms(1u64)
        .build()
        .unwrap();
    let (engine, mut rx) = TransferEngine::with_channel();
    let id = engine
        .start_copy(vec![a.join("many")], b.clone(), config)
        .unwrap();

    let events = until_terminal(&mut rx, id).await;
    for event in &events {
        if let TransferEvent::Progress { snapshot, .. } = event {
            assert!(snapshot.files_done <= snapshot.files_total);
            assert!(snapshot.bytes_done <= snapshot.bytes_total);
        }
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    // The emitter is stopped before the terminal event: nothing follows.
    let after = timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(after.is_err(), "unexpected event after terminal: {after:?}");
}

#[tokio::test]
async fn test_concurrent_operations_are_independent() {
    let (_temp, a, b) = fixture();
    write(&a.join("first/f"), "first");
    write(&a.join("second/f"), "second");
    fs::create_dir(b.join("one")).unwrap();
    fs::create_dir(b.join("two")).unwrap();

    let (engine, mut rx) = TransferEngine::with_channel();
    let first = engine
        .start_copy(vec![a.join("first")], b.join("one"), TransferConfig::default())
        .unwrap();
    let second = engine
        .start_copy(vec![a.join("second")], b.join("two"), TransferConfig::default())
        .unwrap();
    assert_ne!(first, second);

    let mut finished = Vec::new();
    while finished.len() < 2 {
        let event = next_event(&mut rx).await;
        if event.is_terminal() {
            assert!(matches!(event, TransferEvent::Complete { .. }));
            finished.push(event.operation_id());
        }
    }
    finished.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(finished, expected);

    assert_eq!(read(&b.join("one/first/f")), "first");
    assert_eq!(read(&b.join("two/second/f")), "second");
}
