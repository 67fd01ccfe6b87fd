//! Parallel bulk import.
//!
//! Rules are split into fixed-size batches and run on at most `workers` tasks.
//! Each batch accumulates its classification locally and merges it into the shared
//! results once, when the batch completes. The engine insert and the record commit
//! of a batch succeed or fail together.
//!
//! Identifiers are unique across the whole import before batching: two batches
//! never race on the same engine document.

use std::{collections::HashSet, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use super::{ImportResults, RecordStore, records::RawRule, records::Regulation};
use crate::engine::RetrievalEngine;

pub struct BulkImporter {
    engine: Arc<dyn RetrievalEngine>,
    records: Arc<dyn RecordStore>,
}

impl BulkImporter {
    pub fn new(engine: Arc<dyn RetrievalEngine>, records: Arc<dyn RecordStore>) -> Self {
        Self { engine, records }
    }

    pub async fn import(
        &self,
        rules: Vec<RawRule>,
        batch_size: usize,
        workers: usize,
    ) -> ImportResults {
        let total_rules = rules.len();
        let batch_size = batch_size.max(1);
        let (rules, duplicates) = dedup_identifiers(rules);
        let batches: Vec<Vec<RawRule>> = rules.chunks(batch_size).map(<[_]>::to_vec).collect();
        let total_batches = batches.len();
        if total_batches == 0 {
            info!("no rules to import");
            return duplicates;
        }

        let pool = workers.max(1).min(total_batches);
        info!("Processing {total_rules} rules (batch size: {batch_size}, workers: {pool})");

        let started = Instant::now();
        let results = Arc::new(Mutex::new(duplicates));
        let semaphore = Arc::new(Semaphore::new(pool));
        let mut pending = FuturesUnordered::new();

        for (index, batch) in batches.into_iter().enumerate() {
            let labels: Vec<String> = batch.iter().map(RawRule::label).collect();
            let engine = Arc::clone(&self.engine);
            let records = Arc::clone(&self.records);
            let results = Arc::clone(&results);
            let semaphore = Arc::clone(&semaphore);

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("import worker pool closed")?;
                let local = process_batch(engine.as_ref(), records.as_ref(), batch).await;
                results.lock().await.merge(local);
                Ok::<_, anyhow::Error>(())
            });
            pending.push(async move { (index, labels, handle.await) });
        }

        let mut completed = 0;
        while let Some((index, labels, joined)) = pending.next().await {
            let failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(err) => Some(err.to_string()),
            };

            let mut guard = results.lock().await;
            if let Some(message) = failure {
                error!(batch = index + 1, error = %message, "import batch failed");
                for label in labels {
                    guard.fail(label, "Batch Error", Some(format!("Batch failed: {message}")));
                }
            }
            completed += 1;
            report_progress(&guard, completed, total_batches, total_rules, started);
        }

        let results = std::mem::take(&mut *results.lock().await);
        info!(
            "Import completed in {:.2} seconds. Successfully processed: {}, Skipped: {}, Failed: {}.",
            started.elapsed().as_secs_f64(),
            results.successful.len(),
            results.skipped.len(),
            results.failed.len()
        );
        results
    }
}

/// Keeps the first rule per identifier; later ones are skipped up front.
/// Rules without an identifier stay in and fail validation in their batch.
fn dedup_identifiers(rules: Vec<RawRule>) -> (Vec<RawRule>, ImportResults) {
    let mut seen = HashSet::new();
    let mut duplicates = ImportResults::default();
    let mut unique = Vec::with_capacity(rules.len());
    for rule in rules {
        let id = rule.id.trim();
        if !id.is_empty() && !seen.insert(id.to_string()) {
            warn!(identifier = %id, "identifier repeated in import data");
            duplicates.skip(rule.label(), "Duplicate in import");
            continue;
        }
        unique.push(rule);
    }
    (unique, duplicates)
}

async fn process_batch(
    engine: &dyn RetrievalEngine,
    records: &dyn RecordStore,
    batch: Vec<RawRule>,
) -> ImportResults {
    let mut local = ImportResults::default();
    let mut survivors: Vec<Regulation> = Vec::new();

    for rule in batch {
        let label = rule.label();
        let regulation = match Regulation::from_rule(&rule) {
            Ok(regulation) => regulation,
            Err(errors) => {
                warn!(identifier = %label, error = %errors, "rule failed validation");
                local.fail(label, "Validation Error", Some(errors.to_string()));
                continue;
            }
        };

        match records.exists(&regulation.identifier).await {
            Ok(true) => {
                local.skip(label, "Already exists in DB");
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                local.fail(label, "Database Error", Some(format!("{err:#}")));
                continue;
            }
        }

        if !regulation.has_content() {
            local.skip(label, "Empty content");
            continue;
        }
        survivors.push(regulation);
    }

    if survivors.is_empty() {
        return local;
    }

    let identifiers: Vec<String> = survivors.iter().map(|r| r.identifier.clone()).collect();
    match insert_atomically(engine, records, survivors).await {
        Ok(()) => local.successful.extend(identifiers),
        Err(err) => {
            warn!(count = identifiers.len(), error = %err, "batch insertion failed");
            let details = format!("{err:#}");
            for identifier in identifiers {
                local.fail(identifier, "Insertion Error", Some(details.clone()));
            }
        }
    }
    local
}

/// Stages the records, inserts into the engine, then commits the records.
///
/// A failed commit deletes the documents the insert created.
async fn insert_atomically(
    engine: &dyn RetrievalEngine,
    records: &dyn RecordStore,
    regulations: Vec<Regulation>,
) -> Result<()> {
    let documents = regulations.iter().map(Regulation::to_document).collect();
    let mut transaction = records.begin().await.context("failed to open transaction")?;
    transaction.bulk_create(regulations);

    let created = engine
        .insert(documents)
        .await
        .context("engine insert failed")?;

    if let Err(err) = transaction.commit().await {
        if let Err(cleanup) = engine.delete_documents(&created).await {
            error!(error = %cleanup, "failed to remove documents of an uncommitted batch");
        }
        return Err(err.context("failed to commit records"));
    }
    Ok(())
}

fn report_progress(
    results: &ImportResults,
    completed: usize,
    total_batches: usize,
    total_rules: usize,
    started: Instant,
) {
    let processed = results.total_processed();
    let percent = if total_rules == 0 {
        100.0
    } else {
        processed as f64 / total_rules as f64 * 100.0
    };
    info!(
        "Completed {completed}/{total_batches} batches. Rules processed: {processed}/{total_rules} \
         ({percent:.1}%). Elapsed: {:.2}s. (Success: {}, Failed: {}, Skipped: {})",
        started.elapsed().as_secs_f64(),
        results.successful.len(),
        results.failed.len(),
        results.skipped.len()
    );
}
