use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use cardcopy_engine::{
    plan_source, CollisionPolicy, CopyOptions, CopyRequest, EngineError, JobStatus, JobSupervisor,
    MergeActionKind, PathFilter, ProgressEventKind, Source,
};

fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, contents).expect("Failed to write file");
}

/// A card with one recording folder holding `files` files of `size` bytes.
fn make_card(root: &Path, folder: &str, prefix: &str, files: usize, size: usize) {
    for i in 0..files {
        write_file(&root.join(folder).join(format!("{prefix}_{i:04}.bin")), &vec![b'x'; size]);
    }
    write_file(&root.join(".pro_suc"), b"");
}

#[test]
fn test_two_cards_merge_into_one_folder() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card1 = temp_dir.path().join("card1");
    let card2 = temp_dir.path().join("card2");
    let dst = temp_dir.path().join("dst");
    make_card(&card1, "VID_001", "origin_1", 3, 100);
    make_card(&card2, "VID_001", "origin_2", 2, 50);
    write_file(&card2.join("PIC_007").join("img.jpg"), b"jpeg");
    write_file(&card2.join("notes").join("readme.txt"), b"ignored");

    let request = CopyRequest::new(vec![Source::new(&card1), Source::new(&card2)], &dst);
    let handle = JobSupervisor::new().start(request).expect("Failed to start");
    assert_eq!(handle.jobs().len(), 2);
    let outcome = handle.wait();

    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.iter().all(|r| r.status == JobStatus::Succeeded));
    assert!(!outcome.has_failures());
    assert_eq!(outcome.bytes_copied(), 300 + 100 + 4);

    let merged = fs::read_dir(dst.join("VID_001")).expect("Failed to list").count();
    assert_eq!(merged, 5);
    assert!(dst.join("PIC_007").join("img.jpg").exists());
    assert!(!dst.join("notes").exists());

    // Results come back in request order
    assert_eq!(outcome.results[0].source.id, "card1");
    assert_eq!(outcome.results[1].files_copied(), 3);
}

#[test]
fn test_second_run_is_idempotent() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card = temp_dir.path().join("card");
    let dst = temp_dir.path().join("dst");
    make_card(&card, "PIC_001", "img", 4, 64);
    make_card(&card, "VID_002", "clip", 2, 256);

    let supervisor = JobSupervisor::new();
    let first = supervisor
        .start(CopyRequest::new(vec![Source::new(&card)], &dst))
        .expect("Failed to start")
        .wait();
    assert_eq!(first.results[0].files_copied(), 6);

    let plans = plan_source(&card, &dst, &PathFilter).expect("Failed to plan");
    let copies: usize = plans.iter().map(|p| p.count(MergeActionKind::Copy)).sum();
    assert_eq!(copies, 0);

    let second = supervisor
        .start(CopyRequest::new(vec![Source::new(&card)], &dst))
        .expect("Failed to start")
        .wait();
    let result = &second.results[0];
    assert_eq!(result.status, JobStatus::Succeeded);
    assert_eq!(result.files_copied(), 0);
    assert_eq!(result.files_skipped(), 6);
    assert_eq!(result.bytes_total, 0);
}

#[test]
fn test_unreadable_source_fails_only_its_job() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card = temp_dir.path().join("card");
    let dst = temp_dir.path().join("dst");
    make_card(&card, "PIC_001", "img", 2, 10);

    let request = CopyRequest::new(
        vec![Source::new(temp_dir.path().join("ejected")), Source::new(&card)],
        &dst,
    );
    let outcome = JobSupervisor::new().start(request).expect("Failed to start").wait();

    assert_eq!(outcome.results[0].status, JobStatus::Failed);
    assert!(outcome.results[0]
        .job_error
        .as_deref()
        .is_some_and(|e| e.contains("Source unreadable")));
    assert_eq!(outcome.results[1].status, JobStatus::Succeeded);
    assert!(outcome.has_failures());
}

#[test]
fn test_file_failure_is_isolated_to_its_job() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card1 = temp_dir.path().join("card1");
    let card2 = temp_dir.path().join("card2");
    let dst = temp_dir.path().join("dst");
    make_card(&card1, "VID_001", "origin_1", 3, 10);
    make_card(&card2, "VID_002", "origin_2", 3, 10);
    // A directory occupies the destination of one file of card1
    fs::create_dir_all(dst.join("VID_001").join("origin_1_0001.bin")).expect("Failed to create dir");

    let request = CopyRequest::new(vec![Source::new(&card1), Source::new(&card2)], &dst);
    let outcome = JobSupervisor::new().start(request).expect("Failed to start").wait();

    let failed = &outcome.results[0];
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.errors.len(), 1);
    assert!(failed.errors[0].source_path.ends_with("origin_1_0001.bin"));
    assert_eq!(failed.files_copied(), 2);

    assert_eq!(outcome.results[1].status, JobStatus::Succeeded);
    assert_eq!(outcome.results[1].files_copied(), 3);
}

#[test]
fn test_cancel_mid_transfer_keeps_finished_job() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let small = temp_dir.path().join("small");
    let large = temp_dir.path().join("large");
    let dst = temp_dir.path().join("dst");
    make_card(&small, "PIC_001", "img", 1, 16);
    make_card(&large, "VID_001", "chunk", 2000, 1024);

    let request = CopyRequest::new(vec![Source::new(&small), Source::new(&large)], &dst);
    let handle = JobSupervisor::new().start(request).expect("Failed to start");
    let jobs = handle.jobs();
    let (small_id, large_id) = (jobs[0].id, jobs[1].id);

    let mut small_done = false;
    let mut large_started = false;
    for event in handle.events().iter() {
        match event.kind {
            ProgressEventKind::JobDone { .. } if event.job_id == small_id => small_done = true,
            ProgressEventKind::EntryStarted { .. } if event.job_id == large_id => large_started = true,
            _ => {}
        }
        if small_done && large_started {
            handle.cancel();
            handle.cancel();
            break;
        }
    }

    let outcome = handle.wait();
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].status, JobStatus::Succeeded);
    assert_eq!(outcome.results[1].status, JobStatus::Cancelled);
    assert!(outcome.results[1].files_copied() < 2000);
    assert!(outcome.was_cancelled());
    assert!(!outcome.has_failures());
}

#[test]
fn test_wait_returns_promptly_after_cancel() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let dst = temp_dir.path().join("dst");
    let mut sources = Vec::new();
    for i in 0..4 {
        let card = temp_dir.path().join(format!("card{i}"));
        make_card(&card, "VID_001", &format!("origin_{i}"), 500, 4096);
        sources.push(Source::new(&card));
    }

    let handle = JobSupervisor::new()
        .start(CopyRequest::new(sources, &dst))
        .expect("Failed to start");
    handle.cancel();
    let started = Instant::now();
    let outcome = handle.wait();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.results.len(), 4);
    assert!(outcome.results.iter().all(|r| r.status.is_terminal()));
}

#[test]
fn test_aggregated_progress_reaches_completion() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card1 = temp_dir.path().join("card1");
    let card2 = temp_dir.path().join("card2");
    let dst = temp_dir.path().join("dst");
    make_card(&card1, "VID_001", "origin_1", 5, 3000);
    make_card(&card2, "VID_001", "origin_2", 5, 3000);

    let options = CopyOptions {
        progress_interval: Duration::ZERO,
        copy_buffer_size: 1024,
        ..CopyOptions::default()
    };
    let request = CopyRequest::new(vec![Source::new(&card1), Source::new(&card2)], &dst)
        .with_options(options);
    let handle = JobSupervisor::new().start(request).expect("Failed to start");

    let mut progress = handle.aggregator();
    let mut last_done = 0;
    for event in handle.events().iter() {
        progress.apply(&event);
        let snapshot = progress.snapshot();
        assert!(snapshot.bytes_done <= snapshot.bytes_total);
        if snapshot.jobs_planned == 2 {
            assert!(snapshot.bytes_done >= last_done);
            last_done = snapshot.bytes_done;
        }
    }

    let snapshot = progress.snapshot();
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.jobs_succeeded, 2);
    assert_eq!(snapshot.bytes_total, 30_000);
    assert_eq!(snapshot.percent(), Some(100));
    assert!(snapshot.errors.is_empty());

    let outcome = handle.wait();
    assert_eq!(outcome.bytes_copied(), 30_000);
}

#[test]
fn test_merge_policy_copies_colliding_file_once() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card1 = temp_dir.path().join("card1");
    let card2 = temp_dir.path().join("card2");
    let dst = temp_dir.path().join("dst");
    write_file(&card1.join("VID_001").join("project.prj"), b"from card one");
    write_file(&card2.join("VID_001").join("project.prj"), b"card two");

    let request = CopyRequest::new(vec![Source::new(&card1), Source::new(&card2)], &dst);
    let outcome = JobSupervisor::new().start(request).expect("Failed to start").wait();

    let failures: usize = outcome.results.iter().map(|r| r.errors.len()).sum();
    assert_eq!(failures, 1);
    let succeeded = outcome
        .results
        .iter()
        .filter(|r| r.status == JobStatus::Succeeded)
        .count();
    assert_eq!(succeeded, 1);
    assert!(dst.join("VID_001").join("project.prj").is_file());
}

#[test]
fn test_namespace_policy_separates_sources() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card1 = temp_dir.path().join("card1");
    let card2 = temp_dir.path().join("card2");
    let dst = temp_dir.path().join("dst");
    write_file(&card1.join("VID_001").join("project.prj"), b"from card one");
    write_file(&card2.join("VID_001").join("project.prj"), b"card two");

    let options = CopyOptions {
        collision: CollisionPolicy::NamespaceBySource,
        ..CopyOptions::default()
    };
    let request = CopyRequest::new(vec![Source::new(&card1), Source::new(&card2)], &dst)
        .with_options(options);
    let outcome = JobSupervisor::new().start(request).expect("Failed to start").wait();

    assert!(outcome.results.iter().all(|r| r.status == JobStatus::Succeeded));
    assert_eq!(
        fs::read_to_string(dst.join("card1/VID_001/project.prj")).unwrap(),
        "from card one"
    );
    assert_eq!(
        fs::read_to_string(dst.join("card2/VID_001/project.prj")).unwrap(),
        "card two"
    );
}

#[test]
fn test_card_without_recordings_succeeds_empty() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card = temp_dir.path().join("card");
    write_file(&card.join("DCIM").join("thumb.jpg"), b"thumb");

    let outcome = JobSupervisor::new()
        .start(CopyRequest::new(vec![Source::new(&card)], temp_dir.path().join("dst")))
        .expect("Failed to start")
        .wait();

    let result = &outcome.results[0];
    assert_eq!(result.status, JobStatus::Succeeded);
    assert!(result.entries.is_empty());
    assert_eq!(result.bytes_copied, 0);
}

#[test]
fn test_dropping_handle_joins_workers() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card = temp_dir.path().join("card");
    make_card(&card, "VID_001", "clip", 200, 1024);

    let handle = JobSupervisor::new()
        .start(CopyRequest::new(vec![Source::new(&card)], temp_dir.path().join("dst")))
        .expect("Failed to start");
    let events = handle.events().clone();
    drop(handle);

    // All workers are gone, so the stream ends with a terminal event
    let last = events.iter().last().expect("Expected events");
    assert!(matches!(
        last.kind,
        ProgressEventKind::JobCancelled { .. } | ProgressEventKind::JobDone { .. }
    ));
}

#[test]
fn test_aggregated_progress_counts_bytes_of_failed_job() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card = temp_dir.path().join("card");
    let dst = temp_dir.path().join("dst");
    write_file(&card.join("PIC_001").join("a.bin"), &[1u8; 5000]);
    write_file(&card.join("PIC_001").join("b.bin"), &[2u8; 10]);
    fs::create_dir_all(dst.join("PIC_001").join("b.bin")).expect("Failed to create dir");

    let handle = JobSupervisor::new()
        .start(CopyRequest::new(vec![Source::new(&card)], &dst))
        .expect("Failed to start");
    let mut progress = handle.aggregator();
    for event in handle.events().iter() {
        progress.apply(&event);
    }
    let outcome = handle.wait();

    assert_eq!(outcome.results[0].status, JobStatus::Failed);
    assert_eq!(outcome.results[0].bytes_copied, 5000);

    let snapshot = progress.snapshot();
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.jobs_failed, 1);
    assert_eq!(snapshot.bytes_done, 5000);
    assert_eq!(snapshot.bytes_total, 5010);
    assert_eq!(snapshot.percent(), Some(99));
    assert_eq!(snapshot.errors.len(), 1);
}

#[test]
fn test_rerun_with_shared_file_already_present_succeeds() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card1 = temp_dir.path().join("card1");
    let card2 = temp_dir.path().join("card2");
    let dst = temp_dir.path().join("dst");
    write_file(&card1.join("VID_001").join("pro.prj"), b"same");
    write_file(&card2.join("VID_001").join("pro.prj"), b"same");
    write_file(&card1.join("VID_001").join("origin_1.mp4"), b"one");
    write_file(&card2.join("VID_001").join("origin_2.mp4"), b"two");
    write_file(&dst.join("VID_001").join("pro.prj"), b"same");

    let sources = vec![Source::new(&card1), Source::new(&card2)];
    let supervisor = JobSupervisor::new();
    for _ in 0..2 {
        let outcome = supervisor
            .start(CopyRequest::new(sources.clone(), &dst))
            .expect("Failed to start")
            .wait();
        assert!(
            outcome.results.iter().all(|r| r.status == JobStatus::Succeeded),
            "{:?}",
            outcome.results.iter().map(|r| &r.errors).collect::<Vec<_>>()
        );
        assert!(outcome.results.iter().all(|r| r.files_skipped() >= 1));
    }
    assert_eq!(fs::read_dir(dst.join("VID_001")).expect("Failed to list").count(), 3);
}

#[test]
fn test_namespaced_source_with_parent_component_stays_below_destination() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let card = temp_dir.path().join("media").join("card");
    let dst = temp_dir.path().join("dst");
    write_file(&card.join("VID_001").join("clip.mp4"), b"clip");
    fs::create_dir_all(card.join("sub")).expect("Failed to create dir");

    let options = CopyOptions {
        collision: CollisionPolicy::NamespaceBySource,
        ..CopyOptions::default()
    };
    let source = Source::new(card.join("sub").join(".."));
    assert_eq!(source.id, "card");

    let handle = JobSupervisor::new()
        .start(CopyRequest::new(vec![source], &dst).with_options(options.clone()))
        .expect("Failed to start");
    assert_eq!(handle.jobs()[0].destination_root, dst.join("card"));
    let outcome = handle.wait();
    assert_eq!(outcome.results[0].status, JobStatus::Succeeded);
    assert!(dst.join("card").join("VID_001").join("clip.mp4").is_file());
    assert!(!card.join("VID_001").join("VID_001").exists());

    // An id that is a path is refused before anything is written
    let absolute = card.to_string_lossy().into_owned();
    let request = CopyRequest::new(vec![Source::with_id(absolute, &card)], temp_dir.path().join("dst2"))
        .with_options(options);
    assert!(matches!(
        JobSupervisor::new().start(request),
        Err(EngineError::InvalidRequest { .. })
    ));
    assert!(!temp_dir.path().join("dst2").exists());
}
