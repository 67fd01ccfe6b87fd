mod common;

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use common::FakeEngine;
use ingest_runtime::{
    engine::RetrievalEngine,
    import::{BulkImporter, ImportResults, RawRule, RecordStore, RecordTransaction, Regulation},
    storage::JsonRecordStore,
};
use tempfile::TempDir;

fn rule(id: &str, text: &str) -> RawRule {
    RawRule {
        id: id.to_string(),
        title: format!("Rule {id}"),
        text: text.to_string(),
        date: "2024/03/15".to_string(),
        authority: "RBI".to_string(),
        link: format!("https://example.org/{id}"),
    }
}

async fn record_store(dir: &TempDir) -> Result<Arc<JsonRecordStore>> {
    let store = Arc::new(JsonRecordStore::new(dir.path(), None));
    store.initialize().await?;
    Ok(store)
}

fn importer(engine: &Arc<FakeEngine>, records: Arc<dyn RecordStore>) -> BulkImporter {
    let engine: Arc<dyn RetrievalEngine> = engine.clone();
    BulkImporter::new(engine, records)
}

fn assert_each_record_once(results: &ImportResults, expected: &[&str]) {
    let mut seen: Vec<&str> = results
        .successful
        .iter()
        .map(String::as_str)
        .chain(results.failed.iter().map(|f| f.identifier.as_str()))
        .chain(results.skipped.iter().map(|s| s.identifier.as_str()))
        .collect();
    seen.sort_unstable();
    let mut expected = expected.to_vec();
    expected.sort_unstable();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn every_record_lands_in_exactly_one_bucket() -> Result<()> {
    let dir = TempDir::new()?;
    let records = record_store(&dir).await?;
    let engine = FakeEngine::new();

    // pre-existing record
    let mut tx = records.begin().await?;
    tx.bulk_create(vec![Regulation::from_rule(&rule("R-1", "old"))?]);
    tx.commit().await?;

    let mut invalid = rule("R-4", "text");
    invalid.date = "2024/13/40".to_string();
    let rules = vec![
        rule("R-1", "again"),
        rule("R-2", "body"),
        rule("R-3", "   "),
        invalid,
        rule("R-5", "body five"),
        rule("R-6", "body six"),
        rule("R-7", "body seven"),
    ];

    let results = importer(&engine, records.clone())
        .import(rules, 2, 3)
        .await;

    assert_each_record_once(&results, &["R-1", "R-2", "R-3", "R-4", "R-5", "R-6", "R-7"]);
    let successful: HashSet<&str> = results.successful.iter().map(String::as_str).collect();
    assert_eq!(successful, HashSet::from(["R-2", "R-5", "R-6", "R-7"]));

    let skipped: Vec<(&str, &str)> = results
        .skipped
        .iter()
        .map(|s| (s.identifier.as_str(), s.reason.as_str()))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    assert_eq!(
        skipped,
        vec![("R-1", "Already exists in DB"), ("R-3", "Empty content")]
    );
    assert_eq!(results.failed.len(), 1);
    assert_eq!(results.failed[0].reason, "Validation Error");
    assert!(
        results.failed[0]
            .details
            .as_deref()
            .is_some_and(|d| d.contains("date"))
    );

    assert_eq!(records.len().await, 5);
    assert_eq!(engine.documents.lock().len(), 4);
    Ok(())
}

#[tokio::test]
async fn engine_failure_commits_nothing_from_the_batch() -> Result<()> {
    let dir = TempDir::new()?;
    let records = record_store(&dir).await?;
    let engine = FakeEngine::new();
    engine.fail_insert.store(true, Ordering::SeqCst);

    let results = importer(&engine, records.clone())
        .import(vec![rule("A-1", "one"), rule("A-2", "two")], 5, 1)
        .await;

    assert!(results.successful.is_empty());
    assert_eq!(results.failed.len(), 2);
    assert!(results.failed.iter().all(|f| f.reason == "Insertion Error"));
    assert!(records.is_empty().await);
    assert!(records.get("A-1").await.is_none());
    Ok(())
}

struct RejectingStore;

struct RejectingTransaction;

#[async_trait]
impl RecordStore for RejectingStore {
    async fn exists(&self, _identifier: &str) -> Result<bool> {
        Ok(false)
    }

    async fn begin(&self) -> Result<Box<dyn RecordTransaction>> {
        Ok(Box::new(RejectingTransaction))
    }
}

#[async_trait]
impl RecordTransaction for RejectingTransaction {
    fn bulk_create(&mut self, _records: Vec<Regulation>) {}

    async fn commit(self: Box<Self>) -> Result<usize> {
        bail!("database is read-only")
    }
}

#[tokio::test]
async fn failed_commit_removes_inserted_documents() -> Result<()> {
    let engine = FakeEngine::new();
    let results = importer(&engine, Arc::new(RejectingStore))
        .import(vec![rule("B-1", "one"), rule("B-2", "two")], 2, 1)
        .await;

    assert_eq!(results.failed.len(), 2);
    assert!(
        results.failed[0]
            .details
            .as_deref()
            .is_some_and(|d| d.contains("database is read-only"))
    );
    assert!(engine.documents.lock().is_empty());
    let deleted: HashSet<String> = engine.deleted.lock().iter().cloned().collect();
    assert_eq!(
        deleted,
        HashSet::from(["B-1".to_string(), "B-2".to_string()])
    );
    Ok(())
}

#[tokio::test]
async fn duplicate_identifiers_are_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let records = record_store(&dir).await?;
    let engine = FakeEngine::new();

    let results = importer(&engine, records.clone())
        .import(vec![rule("D-1", "one"), rule("D-1", "dupe")], 10, 4)
        .await;

    assert_eq!(results.successful, vec!["D-1".to_string()]);
    assert_eq!(results.skipped.len(), 1);
    assert_eq!(results.skipped[0].reason, "Duplicate in import");
    assert_eq!(results.total_processed(), 2);
    assert_eq!(
        records.get("D-1").await.map(|r| r.text),
        Some("one".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn empty_input_is_a_no_op() -> Result<()> {
    let engine = FakeEngine::new();
    let results = importer(&engine, Arc::new(RejectingStore))
        .import(Vec::new(), 5, 2)
        .await;
    assert_eq!(results, ImportResults::default());
    Ok(())
}

/// Delegates to a JSON store; the first commit stalls so a second batch could overtake it.
struct SlowFirstCommit {
    inner: Arc<JsonRecordStore>,
    stalled: Arc<AtomicBool>,
}

struct SlowTransaction {
    inner: Box<dyn RecordTransaction>,
    stall: bool,
}

#[async_trait]
impl RecordStore for SlowFirstCommit {
    async fn exists(&self, identifier: &str) -> Result<bool> {
        self.inner.exists(identifier).await
    }

    async fn begin(&self) -> Result<Box<dyn RecordTransaction>> {
        Ok(Box::new(SlowTransaction {
            inner: self.inner.begin().await?,
            stall: !self.stalled.swap(true, Ordering::SeqCst),
        }))
    }
}

#[async_trait]
impl RecordTransaction for SlowTransaction {
    fn bulk_create(&mut self, records: Vec<Regulation>) {
        self.inner.bulk_create(records);
    }

    async fn commit(self: Box<Self>) -> Result<usize> {
        if self.stall {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.inner.commit().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identifier_repeated_across_batches_keeps_record_and_document() -> Result<()> {
    let dir = TempDir::new()?;
    let records = record_store(&dir).await?;
    let engine = FakeEngine::new();
    let store = Arc::new(SlowFirstCommit {
        inner: records.clone(),
        stalled: Arc::new(AtomicBool::new(false)),
    });

    let results = importer(&engine, store)
        .import(vec![rule("X", "first"), rule("X", "second")], 1, 2)
        .await;

    assert_eq!(results.successful, vec!["X".to_string()]);
    assert!(results.failed.is_empty());
    assert_eq!(results.skipped.len(), 1);
    assert_eq!(results.skipped[0].reason, "Duplicate in import");

    assert!(records.exists("X").await?);
    let documents: Vec<Option<String>> =
        engine.documents.lock().iter().map(|d| d.id.clone()).collect();
    assert_eq!(documents, vec![Some("X".to_string())]);
    assert!(engine.deleted.lock().is_empty());
    Ok(())
}
