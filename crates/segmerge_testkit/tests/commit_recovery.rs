//! Commit failure and crash recovery tests.

use segmerge_core::{CodecRegistry, CoreError, SegmentInfos, SegmentManager};
use segmerge_storage::{DataOutput, Directory, RamDirectory};
use segmerge_testkit::{build_ledger, flush_segment, init_tracing, varied_shapes, FakeSegmentMerger, FaultyDirectory};
use std::sync::Arc;

fn faulty_ram() -> Arc<FaultyDirectory> {
    Arc::new(FaultyDirectory::new(Arc::new(RamDirectory::new())))
}

fn pending_files(dir: &dyn Directory) -> Vec<String> {
    dir.list_all()
        .unwrap()
        .into_iter()
        .filter(|f| f.starts_with("pending_segments"))
        .collect()
}

#[test]
fn failed_rename_rolls_back_commit() {
    init_tracing();
    let dir = faulty_ram();
    let mut infos = build_ledger(dir.as_ref(), &varied_shapes(3)).unwrap();
    assert_eq!(infos.commit(dir.as_ref()).unwrap(), "segments_1");

    dir.set_fail_on_rename(true);
    let err = infos.commit(dir.as_ref()).unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)), "{err}");
    assert_eq!(infos.generation(), 1);
    assert_eq!(infos.last_generation(), 1);
    assert!(pending_files(dir.as_ref()).is_empty());
    assert!(!infos.is_pending_commit());

    // the previous commit is still the newest one
    let read = SegmentInfos::read_latest_commit(dir.as_ref(), &CodecRegistry::new()).unwrap();
    assert_eq!(read.generation(), 1);

    // an attempted generation is never reused
    dir.reset();
    assert_eq!(infos.commit(dir.as_ref()).unwrap(), "segments_3");
}

#[test]
fn failed_pending_write_leaves_no_file() {
    let dir = faulty_ram();
    let mut infos = build_ledger(dir.as_ref(), &varied_shapes(2)).unwrap();
    dir.fail_creates_with_prefix(Some("pending_segments"));
    assert!(infos.commit(dir.as_ref()).is_err());
    assert_eq!(infos.generation(), 0);
    assert!(pending_files(dir.as_ref()).is_empty());
    assert!(matches!(
        SegmentInfos::read_latest_commit(dir.as_ref(), &CodecRegistry::new()),
        Err(CoreError::IndexNotFound { .. })
    ));
}

#[test]
fn failed_pending_sync_is_rolled_back() {
    let dir = faulty_ram();
    let mut infos = build_ledger(dir.as_ref(), &varied_shapes(2)).unwrap();
    dir.set_fail_on_sync(true);
    assert!(infos.commit(dir.as_ref()).is_err());
    assert!(pending_files(dir.as_ref()).is_empty());
    dir.reset();
    assert_eq!(infos.commit(dir.as_ref()).unwrap(), "segments_2");
}

#[test]
fn failed_meta_sync_after_rename_removes_published_file() {
    init_tracing();
    let dir = faulty_ram();
    let mut infos = build_ledger(dir.as_ref(), &varied_shapes(3)).unwrap();
    assert_eq!(infos.commit(dir.as_ref()).unwrap(), "segments_1");

    infos.prepare_commit(dir.as_ref()).unwrap();
    assert!(infos.is_pending_commit());
    dir.set_fail_on_sync_meta_data(true);
    assert!(infos.finish_commit(dir.as_ref()).is_err());

    let files = dir.list_all().unwrap();
    assert!(!files.contains(&"segments_2".to_string()), "{files:?}");
    assert!(pending_files(dir.as_ref()).is_empty());
    assert!(files.contains(&"segments_1".to_string()));
    assert!(!infos.is_pending_commit());
    assert_eq!(infos.generation(), 1);
    assert_eq!(infos.last_generation(), 1);
    assert!(dir.injected_faults() > 0);

    let read = SegmentInfos::read_latest_commit(dir.as_ref(), &CodecRegistry::new()).unwrap();
    assert_eq!(read.generation(), 1);
}

#[test]
fn manager_commit_failure_keeps_previous_commit() {
    init_tracing();
    let dir = faulty_ram();
    let shared: Arc<dyn Directory> = dir.clone();
    let manager = SegmentManager::open(shared, Arc::new(FakeSegmentMerger::new())).unwrap();
    let first = flush_segment(&manager, 50, 4).unwrap();
    assert_eq!(manager.commit().unwrap(), "segments_1");

    let second = flush_segment(&manager, 50, 4).unwrap();
    dir.set_fail_on_rename(true);
    assert!(manager.commit().is_err());
    assert_eq!(manager.segment_infos().generation(), 1);

    let committed = SegmentInfos::read_latest_commit(dir.as_ref(), &CodecRegistry::new()).unwrap();
    assert_eq!(committed.len(), 1);
    assert!(committed.find(&first).is_some());

    dir.reset();
    assert_eq!(manager.commit().unwrap(), "segments_3");
    manager.close().unwrap();

    let reopened = SegmentManager::open(dir.clone(), Arc::new(FakeSegmentMerger::new())).unwrap();
    let infos = reopened.segment_infos();
    assert!(infos.find(&first).is_some());
    assert!(infos.find(&second).is_some());
    reopened.close().unwrap();
}

#[test]
fn open_deletes_files_left_by_a_crash() {
    let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
    let mut infos = build_ledger(dir.as_ref(), &varied_shapes(2)).unwrap();
    infos.commit(dir.as_ref()).unwrap();

    for stray in ["pending_segments_2", "_7.dat", "_7.si"] {
        let mut out = dir.create_output(stray).unwrap();
        out.write_bytes(b"partial").unwrap();
        out.close().unwrap();
    }
    let mut unrelated = dir.create_output("notes.txt").unwrap();
    unrelated.write_bytes(b"keep me").unwrap();
    unrelated.close().unwrap();

    let manager = SegmentManager::open(Arc::clone(&dir), Arc::new(FakeSegmentMerger::new())).unwrap();
    let files = dir.list_all().unwrap();
    assert!(!files.iter().any(|f| f == "pending_segments_2" || f.starts_with("_7")));
    assert!(files.contains(&"segments_1".to_string()));
    assert!(files.contains(&"notes.txt".to_string()));
    for sci in &infos {
        assert!(files.contains(&sci.info().descriptor_file_name()));
    }
    manager.close().unwrap();
}
