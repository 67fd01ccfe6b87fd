mod common;

use std::{sync::Arc, time::Duration};

use common::{FakeEngine, RecordingRepository, pipeline_with, pipeline_with_repository, write_file};
use ingest_runtime::{
    PipelineError,
    pipeline::{ContentItem, JobKind, OperationStatus},
};
use tempfile::TempDir;
use tokio::sync::Semaphore;

#[tokio::test]
async fn same_path_twice_is_a_no_op() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;
    let path = pipeline.documents().input_dir().join("notes.txt");
    write_file(&path, "first revision");

    let first = pipeline.enqueue_file(path.clone()).await?;
    assert_eq!(first.status, OperationStatus::Success);
    assert_eq!(first.message, "File 'notes.txt' indexed successfully");
    assert_eq!(engine.documents.lock().len(), 1);
    assert_eq!(engine.process_calls(), 1);

    let again = pipeline.enqueue_file(path.clone()).await?;
    assert_eq!(again.status, OperationStatus::Success);
    assert_eq!(again.message, "File 'notes.txt' was already indexed");

    // different content under the same path is not even read again
    write_file(&path, "second revision");
    let report = pipeline
        .enqueue_and_process(vec![ContentItem::File { path }], "track-2")
        .await?;
    assert_eq!(report.accepted, 0);
    assert!(report.enqueued.is_empty());
    assert!(!report.processed);
    assert_eq!(engine.documents.lock().len(), 1);
    assert_eq!(engine.process_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn scan_processes_files_in_collated_order() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;
    let input = pipeline.documents().input_dir().to_path_buf();
    for name in ["b.txt", "a.txt", "10.txt"] {
        write_file(&input.join(name), &format!("content of {name}"));
    }
    write_file(&input.join("image.bin"), "not indexed");

    let response = pipeline.scan_for_new_files().await?;
    assert_eq!(response.status, OperationStatus::Success);
    assert!(response.track_id.starts_with("scan-"));
    assert_eq!(engine.document_sources(), vec!["10.txt", "a.txt", "b.txt"]);
    assert!(pipeline.get_status().autoscanned);

    let again = pipeline.scan_for_new_files().await?;
    assert_eq!(again.message, "No new files to index");
    assert_eq!(engine.documents.lock().len(), 3);
    Ok(())
}

#[tokio::test]
async fn extraction_failure_only_rejects_that_file() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;
    let input = pipeline.documents().input_dir().to_path_buf();
    write_file(&input.join("good.md"), "# heading");
    write_file(&input.join("empty.txt"), "   \n");

    let report = pipeline
        .enqueue_and_process(
            vec![
                ContentItem::File {
                    path: input.join("good.md"),
                },
                ContentItem::File {
                    path: input.join("empty.txt"),
                },
            ],
            "track",
        )
        .await?;

    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].reason, "empty_content");
    assert_eq!(report.status(), OperationStatus::PartialSuccess);
    assert_eq!(
        engine.failures.lock().clone(),
        vec![("empty.txt".to_string(), "empty_content".to_string())]
    );

    // the rejected file is retried by the next scan, the indexed one is not
    assert!(pipeline.registry().is_indexed(&input.join("good.md")));
    assert!(!pipeline.registry().is_indexed(&input.join("empty.txt")));
    Ok(())
}

#[tokio::test]
async fn nothing_extracted_means_no_processing() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;

    let response = pipeline.insert_file("blob.txt", b"b'\\x00\\x01'").await?;
    assert_eq!(response.status, OperationStatus::Fail);
    assert_eq!(engine.process_calls(), 0);
    assert!(!pipeline.get_status().busy);
    Ok(())
}

#[tokio::test]
async fn temporary_upload_is_removed_after_extraction() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;

    let response = pipeline.insert_file("report.txt", b"quarterly numbers").await?;
    assert_eq!(response.status, OperationStatus::Success);
    assert_eq!(engine.document_sources(), vec!["report.txt"]);

    let temp_dir = pipeline.documents().temp_dir();
    let leftovers = std::fs::read_dir(&temp_dir)?.count();
    assert_eq!(leftovers, 0);

    let failed = pipeline.insert_file("broken.txt", &[0xff, 0xfe, 0x00]).await?;
    assert_eq!(failed.status, OperationStatus::Fail);
    assert_eq!(std::fs::read_dir(&temp_dir)?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn temporary_upload_is_removed_through_the_repository() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let repo = RecordingRepository::locking(&[]);
    let pipeline = pipeline_with_repository(FakeEngine::new(), dir.path(), repo.clone()).await?;

    let response = pipeline.insert_file("memo.txt", b"meeting notes").await?;
    assert_eq!(response.status, OperationStatus::Success);

    let temp_dir = pipeline.documents().temp_dir();
    let removed = repo.removed.lock().clone();
    assert_eq!(removed.len(), 1);
    assert!(removed[0].starts_with(&temp_dir));
    assert!(
        removed[0]
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with("_memo.txt"))
    );
    assert_eq!(std::fs::read_dir(&temp_dir)?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn upload_reports_duplicates() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;

    let first = pipeline.upload_file("guide.md", b"# Guide").await?;
    assert_eq!(first.status, OperationStatus::Success);
    assert!(pipeline.documents().input_dir().join("guide.md").exists());

    let second = pipeline.upload_file("guide.md", b"# Guide v2").await?;
    assert_eq!(second.status, OperationStatus::Duplicated);
    assert_eq!(
        second.message,
        "File 'guide.md' already exists in the input directory."
    );

    let unsupported = pipeline.upload_file("archive.exe", b"MZ").await;
    assert!(matches!(
        unsupported,
        Err(PipelineError::Extract(
            ingest_runtime::ExtractError::UnsupportedFormat { .. }
        ))
    ));
    Ok(())
}

#[tokio::test]
async fn batch_insert_counts_supported_files() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;

    let response = pipeline
        .insert_files(vec![
            ("a.txt".to_string(), b"alpha".to_vec()),
            ("b.exe".to_string(), b"MZ".to_vec()),
            ("c.md".to_string(), b"gamma".to_vec()),
        ])
        .await?;
    assert_eq!(response.status, OperationStatus::PartialSuccess);
    assert_eq!(response.message, "Partially inserted: 2 of 3 files");

    let none = pipeline
        .insert_files(vec![("x.exe".to_string(), b"MZ".to_vec())])
        .await?;
    assert_eq!(none.status, OperationStatus::Fail);
    assert_eq!(none.message, "No files were successfully inserted");
    Ok(())
}

#[tokio::test]
async fn texts_are_validated_and_padded() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;

    let response = pipeline
        .enqueue_texts(
            vec!["  first text ".to_string(), "second text".to_string()],
            Some(vec![" manual ".to_string()]),
            None,
        )
        .await?;
    assert_eq!(response.status, OperationStatus::Success);
    assert_eq!(engine.document_sources(), vec!["manual", "unknown_source"]);

    let mismatched = pipeline
        .enqueue_texts(
            vec!["a".to_string(), "b".to_string()],
            None,
            Some(vec!["only-one".to_string()]),
        )
        .await;
    assert!(matches!(mismatched, Err(PipelineError::InvalidRequest(_))));

    let repeated = pipeline
        .enqueue_texts(
            vec!["a".to_string(), "b".to_string()],
            None,
            Some(vec!["same".to_string(), " same".to_string()]),
        )
        .await;
    assert!(matches!(repeated, Err(PipelineError::InvalidRequest(_))));
    Ok(())
}

#[tokio::test]
async fn engine_failure_releases_status() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    engine
        .fail_enqueue
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;

    let response = pipeline
        .enqueue_texts(vec!["hello".to_string()], None, None)
        .await?;
    assert_eq!(response.status, OperationStatus::Fail);

    let status = pipeline.get_status();
    assert!(!status.busy);
    assert!(
        status
            .history_messages
            .iter()
            .any(|m| m.starts_with("Failed to enqueue documents"))
    );
    assert!(
        status
            .latest_message
            .starts_with("Document processing pipeline failed: Failed to enqueue documents"),
        "{}",
        status.latest_message
    );
    Ok(())
}

#[tokio::test]
async fn ingestion_is_busy_while_clearing() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;

    let clearing = pipeline
        .status_store()
        .try_begin(JobKind::Clearing, "Clearing Documents")
        .expect("pipeline idle");
    let response = pipeline
        .enqueue_texts(vec!["hello".to_string()], None, None)
        .await?;
    assert_eq!(response.status, OperationStatus::Busy);
    assert!(engine.documents.lock().is_empty());

    drop(clearing);
    let response = pipeline
        .enqueue_texts(vec!["hello".to_string()], None, None)
        .await?;
    assert_eq!(response.status, OperationStatus::Success);
    Ok(())
}

#[tokio::test]
async fn follower_request_triggers_another_processing_round() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let gate = Arc::new(Semaphore::new(0));
    *engine.gate.lock() = Some(gate.clone());
    let pipeline = Arc::new(pipeline_with(engine.clone(), dir.path()).await?);

    let owner = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .enqueue_texts(vec!["first".to_string()], None, None)
                .await
        })
    };
    while engine.process_calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let follower = pipeline
        .enqueue_texts(vec!["second".to_string()], None, None)
        .await?;
    assert_eq!(follower.status, OperationStatus::Success);
    assert!(pipeline.get_status().request_pending);

    gate.add_permits(2);
    let owner = owner.await??;
    assert_eq!(owner.status, OperationStatus::Success);
    assert_eq!(engine.process_calls(), 2);

    let status = pipeline.get_status();
    assert!(!status.busy);
    assert!(!status.request_pending);
    assert_eq!(engine.documents.lock().len(), 2);
    Ok(())
}

#[tokio::test]
async fn documents_are_grouped_by_status() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let engine = FakeEngine::new();
    let pipeline = pipeline_with(engine.clone(), dir.path()).await?;
    pipeline
        .enqueue_texts(vec!["one".to_string(), "two".to_string()], None, None)
        .await?;

    let grouped = pipeline.list_documents().await?;
    assert_eq!(grouped.len(), 4);
    assert_eq!(
        grouped[&ingest_runtime::storage::DocStatus::PROCESSED].len(),
        2
    );
    Ok(())
}

#[tokio::test]
async fn cache_modes_are_validated() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let pipeline = pipeline_with(FakeEngine::new(), dir.path()).await?;

    let cleared = pipeline
        .clear_cache(Some(vec!["local".to_string(), "mix".to_string()]))
        .await?;
    assert_eq!(cleared.status, OperationStatus::Success);
    assert_eq!(
        cleared.message,
        r#"Successfully cleared cache for modes: ["local", "mix"]"#
    );

    let all = pipeline.clear_cache(None).await?;
    assert_eq!(all.message, "Successfully cleared all cache");

    match pipeline
        .clear_cache(Some(vec!["local".to_string(), "bogus".to_string()]))
        .await
    {
        Err(PipelineError::InvalidCacheMode { invalid }) => assert_eq!(invalid, vec!["bogus"]),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}
