mod common;

use std::path::Path;

use common::{segment_body, segment_lines, start_cdn, test_config};
use hlsvault_engine::state::{JournalContents, NameMapping};
use hlsvault_engine::{Engine, Job, VideoOutcome};
use tempfile::TempDir;

async fn journal(root: &Path) -> JournalContents {
    let content = tokio::fs::read_to_string(root.join("download_errors.json"))
        .await
        .unwrap_or_default();
    JournalContents::parse(&content)
}

async fn ledger(root: &Path) -> String {
    tokio::fs::read_to_string(root.join("successful_downloads.csv"))
        .await
        .unwrap_or_default()
}

#[tokio::test]
async fn complete_job_writes_ledger_and_local_playlist() {
    let cdn = start_cdn(4).await;
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 3, 2)).await.unwrap();

    let report = engine
        .run(Job::new("room1_ab12", cdn.playlist_url()))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.ledger_rows, 1);
    let Some(VideoOutcome::Completed {
        result,
        local_playlist: Some(local),
    }) = &report.video
    else {
        panic!("expected a completed video, got {:?}", report.video);
    };
    assert_eq!(result.total_segments, 4);
    assert_eq!(result.successful_segments, 4);

    let hls = root.path().join("room1_ab12").join("hls");
    let lines = segment_lines(local).await;
    assert_eq!(lines.len(), 4);
    for (i, line) in lines.iter().enumerate() {
        assert!(line.starts_with("ts/segment_"), "line {i}: {line}");
        let size = tokio::fs::metadata(hls.join(line)).await.unwrap().len();
        assert_eq!(size, segment_body(i).len() as u64);
    }

    let mapping = NameMapping::load(&hls.join("ts_mapping.json")).await.unwrap();
    assert_eq!(mapping.len(), 4);
    assert!(mapping.get("seg0.ts").unwrap().starts_with("segment_000000_room1_ab12_fetch_"));

    let ledger = ledger(root.path()).await;
    assert!(ledger.starts_with("content_id,url,timestamp\n"));
    assert!(ledger.contains(&format!("room1_ab12,{},", cdn.playlist_url())));
    assert!(!root.path().join("download_errors.json").exists());
}

#[tokio::test]
async fn ledger_hit_skips_without_any_request() {
    let cdn = start_cdn(3).await;
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 2, 2)).await.unwrap();
    engine
        .run(Job::new("room1_0001", cdn.playlist_url()))
        .await
        .unwrap();
    let requests = cdn.state.requests();

    // A fresh engine reloads the ledger from disk.
    let engine = Engine::new(test_config(root.path(), 2, 2)).await.unwrap();
    let report = engine
        .run(Job::new("room1_0002", cdn.playlist_url()))
        .await
        .unwrap();

    assert!(matches!(report.video, Some(VideoOutcome::Skipped)));
    assert!(report.is_success());
    assert_eq!(report.ledger_rows, 0);
    assert_eq!(cdn.state.requests(), requests);
}

#[tokio::test]
async fn reaching_threshold_aborts_and_journals() {
    let cdn = start_cdn(6).await;
    cdn.state.set_failing([0, 1]);
    cdn.state.set_slow([2, 3, 4, 5]);
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 2, 2)).await.unwrap();

    let report = engine
        .run(Job::new("room2_ab12", cdn.playlist_url()))
        .await
        .unwrap();

    let Some(VideoOutcome::Aborted { result }) = &report.video else {
        panic!("expected an aborted video, got {:?}", report.video);
    };
    assert!(!result.success);
    assert!(result.aborted);
    assert_eq!(result.failed_segments, 2);
    assert!(report.journaled);
    assert_eq!(report.ledger_rows, 0);
    assert!(!ledger(root.path()).await.contains("room2_ab12"));

    let journal = journal(root.path()).await;
    assert_eq!(journal.records.len(), 1);
    let failed = journal.records[0].failed_m3u8.as_ref().unwrap();
    assert!(failed.error.as_deref().unwrap().contains("threshold"));
    assert!(failed.failed_ts_segments.len() >= 2);
    let indices: Vec<usize> = failed.failed_ts_segments.iter().map(|s| s.index).collect();
    let mut sorted = indices.clone();
    sorted.sort_unstable();
    assert_eq!(indices, sorted);
}

#[tokio::test]
async fn failures_below_threshold_keep_job_successful() {
    let cdn = start_cdn(10).await;
    cdn.state.set_failing([2, 5]);
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 3, 3)).await.unwrap();

    let report = engine
        .run(Job::new("room3_ab12", cdn.playlist_url()))
        .await
        .unwrap();

    let Some(VideoOutcome::Partial {
        result,
        local_playlist: Some(local),
    }) = &report.video
    else {
        panic!("expected a partial video, got {:?}", report.video);
    };
    assert_eq!(result.total_segments, 10);
    assert_eq!(result.successful_segments, 8);
    assert_eq!(result.failed_segments, 2);
    assert!(result.success);
    let failed: Vec<usize> = result.failed.iter().map(|f| f.index).collect();
    assert_eq!(failed, vec![2, 5]);

    // Lines for failed segments keep their remote URI; the rest point at files.
    let lines = segment_lines(local).await;
    assert_eq!(lines[2], "seg2.ts");
    assert_eq!(lines[5], "seg5.ts");
    let hls = local.parent().unwrap();
    for line in lines.iter().filter(|l| l.starts_with("ts/")) {
        assert!(hls.join(line).exists(), "{line} should exist");
    }
    assert_eq!(lines.iter().filter(|l| l.starts_with("ts/")).count(), 8);

    assert!(report.journaled);
    let journal = journal(root.path()).await;
    let failed = journal.records[0].failed_m3u8.as_ref().unwrap();
    assert_eq!(failed.failed_ts_segments.len(), 2);
    assert_eq!(failed.total_ts_segments, 10);
}

#[tokio::test]
async fn retry_resolves_failed_segments_progressively() {
    let cdn = start_cdn(5).await;
    cdn.state.set_failing([1, 2, 3]);
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 2, 4)).await.unwrap();

    let report = engine
        .run(Job::new("room4_ab12", cdn.playlist_url()))
        .await
        .unwrap();
    assert!(report.journaled);
    assert_eq!(
        journal(root.path()).await.records[0]
            .failed_m3u8
            .as_ref()
            .unwrap()
            .failed_ts_segments
            .len(),
        3
    );

    cdn.state.set_failing([3]);
    let summary = engine.retry(None).await.unwrap();
    assert_eq!(summary.records, 1);
    assert_eq!(summary.resolved, 0);
    assert_eq!(summary.remaining, 1);

    let contents = journal(root.path()).await;
    let remaining = &contents.records[0].failed_m3u8.as_ref().unwrap().failed_ts_segments;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].index, 3);
    assert_eq!(remaining[0].retry_count, 1);
    assert!(!ledger(root.path()).await.contains("room4_ab12"));

    cdn.state.set_failing([]);
    let summary = engine.retry(None).await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.remaining, 0);
    assert!(!root.path().join("download_errors.json").exists());
    assert!(ledger(root.path()).await.contains(&format!("room4_ab12,{},", cdn.playlist_url())));

    let hls = root.path().join("room4_ab12").join("hls");
    let mut local = None;
    let mut entries = tokio::fs::read_dir(&hls).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains("_local_") {
            local = Some(entry.path());
        }
    }
    let lines = segment_lines(&local.unwrap()).await;
    assert_eq!(lines.len(), 5);
    for line in &lines {
        assert!(line.starts_with("ts/"), "{line}");
        assert!(hls.join(line).exists());
    }
}

#[tokio::test]
async fn unreachable_playlist_is_rerun_whole_on_retry() {
    let cdn = start_cdn(3).await;
    cdn.state
        .playlist_available
        .store(false, std::sync::atomic::Ordering::SeqCst);
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 2, 2)).await.unwrap();

    let report = engine
        .run(Job::new("room5_ab12", cdn.playlist_url()))
        .await
        .unwrap();
    assert!(matches!(report.video, Some(VideoOutcome::Failed { .. })));
    let contents = journal(root.path()).await;
    let failed = contents.records[0].failed_m3u8.as_ref().unwrap();
    assert!(failed.failed_ts_segments.is_empty());

    cdn.state
        .playlist_available
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let summary = engine.retry(None).await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert!(ledger(root.path()).await.contains("room5_ab12"));
    assert!(root.path().join("room5_ab12").join("hls").join("ts_mapping.json").exists());
}

#[tokio::test]
async fn images_are_downloaded_and_recorded() {
    let cdn = start_cdn(2).await;
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 2, 2)).await.unwrap();

    let job = Job::new("room6_ab12", cdn.playlist_url()).with_images(vec![cdn.image_url()]);
    let report = engine.run(job).await.unwrap();

    assert_eq!(report.images.downloaded.len(), 1);
    assert!(report.images.downloaded[0].starts_with(root.path().join("room6_ab12").join("images")));
    assert_eq!(report.ledger_rows, 2);
    let ledger = ledger(root.path()).await;
    assert!(ledger.contains(&cdn.image_url()));

    // Already recorded images are skipped on the next job.
    let again = Job::images_only("room6_cd34", vec![cdn.image_url()]);
    let report = engine.run(again).await.unwrap();
    assert_eq!(report.images.skipped, 1);
    assert!(report.images.downloaded.is_empty());
}

#[tokio::test]
async fn malformed_journal_lines_survive_a_retry() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("download_errors.json");
    tokio::fs::write(&path, "{\"content_id\": broken\n").await.unwrap();
    let engine = Engine::new(test_config(root.path(), 2, 2)).await.unwrap();

    let summary = engine.retry(None).await.unwrap();
    assert_eq!(summary.records, 0);
    assert_eq!(summary.malformed, 1);
    let content = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(content.contains("broken"));
}

#[tokio::test]
async fn input_list_isolates_bad_lines() {
    let cdn = start_cdn(2).await;
    let root = TempDir::new().unwrap();
    let input = root.path().join("rooms.csv");
    tokio::fs::write(
        &input,
        format!(
            "room_id,title,m3u8,images\nroom7,Title,{},{}\nbroken-line\n",
            cdn.playlist_url(),
            cdn.image_url()
        ),
    )
    .await
    .unwrap();
    let engine = Engine::new(test_config(root.path(), 2, 2)).await.unwrap();

    let summary = engine.process_input(&input, None).await.unwrap();

    assert_eq!(summary.total_records, 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.error_records[0].line_number, 3);

    let errors: serde_json::Value = serde_json::from_slice(
        &tokio::fs::read(root.path().join("processing_errors.json"))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(errors["error_count"], 1);
    assert_eq!(errors["error_records"][0]["data"], "broken-line");
    assert!(ledger(root.path()).await.contains("room7_"));
}

#[tokio::test]
async fn segments_differing_only_in_query_keep_their_own_files() {
    let cdn = start_cdn(3).await;
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 3, 2)).await.unwrap();

    let report = engine
        .run(Job::new("room8_ab12", cdn.query_playlist_url()))
        .await
        .unwrap();

    let Some(VideoOutcome::Completed {
        local_playlist: Some(local),
        ..
    }) = &report.video
    else {
        panic!("expected a completed video, got {:?}", report.video);
    };
    let hls = root.path().join("room8_ab12").join("hls");
    let lines = segment_lines(local).await;
    assert_eq!(lines.len(), 3);
    let mut sizes = Vec::new();
    for line in &lines {
        assert!(line.starts_with("ts/segment_"), "{line}");
        sizes.push(tokio::fs::metadata(hls.join(line)).await.unwrap().len());
    }
    assert_eq!(sizes, vec![188, 376, 564]);

    let mapping = NameMapping::load(&hls.join("ts_mapping.json")).await.unwrap();
    assert_eq!(mapping.len(), 3);
    assert!(mapping.get("seg.ts?n=1").unwrap().starts_with("segment_000001_"));
}

#[tokio::test]
async fn local_playlist_links_only_segments_fetched_by_its_own_run() {
    let cdn = start_cdn(3).await;
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 3, 2)).await.unwrap();
    engine
        .run(Job::new("room9_ab12", cdn.playlist_url()))
        .await
        .unwrap();

    // Same job directory, but this run only takes the first segment.
    let mut config = test_config(root.path(), 3, 2);
    config.pool.segment_limit = Some(1);
    config.storage.skip_completed = false;
    let engine = Engine::new(config).await.unwrap();
    let report = engine
        .run(Job::new("room9_ab12", cdn.playlist_url()))
        .await
        .unwrap();

    let local = match &report.video {
        Some(VideoOutcome::Completed {
            local_playlist: Some(local),
            ..
        })
        | Some(VideoOutcome::Partial {
            local_playlist: Some(local),
            ..
        }) => local.clone(),
        other => panic!("expected a local playlist, got {other:?}"),
    };
    let lines = segment_lines(&local).await;
    assert!(lines[0].starts_with("ts/segment_000000_"), "{}", lines[0]);
    assert_eq!(lines[1], "seg1.ts");
    assert_eq!(lines[2], "seg2.ts");
}

#[tokio::test]
async fn images_fixed_before_the_playlist_are_recorded_on_resolution() {
    use std::sync::atomic::Ordering;

    let cdn = start_cdn(3).await;
    cdn.state.images_available.store(false, Ordering::SeqCst);
    cdn.state.set_failing([1]);
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 2, 3)).await.unwrap();

    let job = Job::new("room10_ab12", cdn.playlist_url()).with_images(vec![cdn.image_url()]);
    let report = engine.run(job).await.unwrap();
    assert!(report.journaled);
    assert_eq!(report.images.failed.len(), 1);

    // First pass fixes the image only.
    cdn.state.images_available.store(true, Ordering::SeqCst);
    let summary = engine.retry(None).await.unwrap();
    assert_eq!(summary.remaining, 1);
    assert!(!ledger(root.path()).await.contains(&cdn.image_url()));
    let contents = journal(root.path()).await;
    let record = &contents.records[0];
    assert!(record.failed_images.is_empty());
    assert_eq!(record.recovered_images, vec![cdn.image_url()]);

    // Second pass fixes the segment and settles the whole record.
    cdn.state.set_failing([]);
    let summary = engine.retry(None).await.unwrap();
    assert_eq!(summary.resolved, 1);
    let ledger = ledger(root.path()).await;
    assert!(ledger.contains(&format!("room10_ab12,{},", cdn.image_url())));
    assert!(ledger.contains(&format!("room10_ab12,{},", cdn.playlist_url())));
}

#[tokio::test]
async fn records_journaled_during_a_retry_pass_are_kept() {
    let cdn = start_cdn(3).await;
    cdn.state.set_failing([1]);
    let root = TempDir::new().unwrap();
    let engine = Engine::new(test_config(root.path(), 2, 3)).await.unwrap();
    engine
        .run(Job::new("room11_ab12", cdn.playlist_url()))
        .await
        .unwrap();

    let offline = start_cdn(1).await;
    offline
        .state
        .playlist_available
        .store(false, std::sync::atomic::Ordering::SeqCst);
    cdn.state.set_failing([]);
    cdn.state.set_slow([1]);

    let (summary, report) = tokio::join!(engine.retry(None), async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine
            .run(Job::new("room12_ab12", offline.playlist_url()))
            .await
    });
    let summary = summary.unwrap();
    assert_eq!(summary.resolved, 1);
    assert!(report.unwrap().journaled);

    let contents = journal(root.path()).await;
    let ids: Vec<&str> = contents.records.iter().map(|r| r.content_id.as_str()).collect();
    assert_eq!(ids, vec!["room12_ab12"]);
}
