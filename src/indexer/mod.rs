// Indexer module
// Synchronizes a documents directory into the vector store


use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::database::lancedb::{ChunkMetadata, EmbeddingRecord, SourceSummary, VectorStore};
use crate::embeddings::Embedder;
use crate::embeddings::chunking::{ChunkingConfig, TextChunk, chunk_document};
use crate::loader::{self, LoadedDocument};
use crate::{RagError, Result};

/// What an ingestion run should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    pub documents_dir: PathBuf,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Re-embed documents even when their fingerprint is unchanged
    pub force: bool,
    /// Delete a document's previous records before writing new ones
    pub replace: bool,
    /// Delete records of documents that no longer exist on disk
    pub prune: bool,
}

impl IngestOptions {
    #[inline]
    pub fn new<P: Into<PathBuf>>(documents_dir: P) -> Self {
        Self {
            documents_dir: documents_dir.into(),
            recursive: false,
            force: false,
            replace: false,
            prune: false,
        }
    }
}

/// A document that could not be ingested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDocument {
    pub source: String,
    pub reason: String,
}

/// Records left over from an earlier run with more chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleSource {
    pub source: String,
    pub stale_chunks: usize,
}

/// Outcome of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub discovered: usize,
    pub ingested: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedDocument>,
    pub chunks_written: usize,
    pub records_deleted: usize,
    /// Stored sources missing on disk that were left in place
    pub orphaned: Vec<String>,
    /// Stored sources missing on disk that were deleted
    pub pruned: Vec<String>,
    pub stale: Vec<StaleSource>,
}

impl IngestReport {
    #[inline]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    fn changed_store(&self) -> bool {
        self.chunks_written > 0 || self.records_deleted > 0
    }
}

/// Loads, chunks, embeds and stores documents
pub struct Ingestor {
    store: VectorStore,
    embedder: Box<dyn Embedder>,
    chunking: ChunkingConfig,
}

impl Ingestor {
    #[inline]
    pub fn new(store: VectorStore, embedder: Box<dyn Embedder>, chunking: ChunkingConfig) -> Self {
        Self {
            store,
            embedder,
            chunking,
        }
    }

    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    #[inline]
    pub fn into_store(self) -> VectorStore {
        self.store
    }

    /// Bring the store in line with the documents directory
    #[inline]
    pub async fn sync(&mut self, options: &IngestOptions) -> Result<IngestReport> {
        let paths = loader::discover_documents(&options.documents_dir, options.recursive)?;
        info!(
            "Found {} documents in {}",
            paths.len(),
            options.documents_dir.display()
        );

        let existing: BTreeMap<String, SourceSummary> = self
            .store
            .list_sources()
            .await?
            .into_iter()
            .map(|summary| (summary.source.clone(), summary))
            .collect();

        let mut report = IngestReport {
            discovered: paths.len(),
            ..IngestReport::default()
        };

        let bar = progress_bar(paths.len());
        let mut on_disk = BTreeSet::new();

        for path in &paths {
            let source = loader::source_key(&options.documents_dir, path);
            bar.set_message(source.clone());
            on_disk.insert(source.clone());

            self.sync_document(
                &options.documents_dir,
                path,
                existing.get(&source),
                options,
                &mut report,
            )
            .await?;

            bar.inc(1);
        }
        bar.finish_and_clear();

        self.reconcile_orphans(&existing, &on_disk, options.prune, &mut report)
            .await?;

        if report.changed_store() {
            if let Err(e) = self.store.optimize().await {
                warn!("Failed to optimize vector database: {}", e);
            }
        }

        info!(
            "Ingestion finished: {} ingested, {} unchanged, {} failed, {} chunks written",
            report.ingested.len(),
            report.skipped.len(),
            report.failed.len(),
            report.chunks_written
        );
        Ok(report)
    }

    async fn sync_document(
        &mut self,
        documents_dir: &Path,
        path: &Path,
        previous: Option<&SourceSummary>,
        options: &IngestOptions,
        report: &mut IngestReport,
    ) -> Result<()> {
        let source = loader::source_key(documents_dir, path);

        let document = match loader::load_document(documents_dir, path) {
            Ok(document) => document,
            Err(e) => {
                warn!("Skipping {}: {}", source, e);
                report.failed.push(FailedDocument {
                    source,
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        let chunks = chunk_document(&document, &self.chunking);
        if chunks.is_empty() {
            warn!("Skipping {}: no chunks produced", source);
            report.failed.push(FailedDocument {
                source,
                reason: "no text to index".to_string(),
            });
            return Ok(());
        }

        let fingerprint = fingerprint(
            &document.content_hash,
            &self.chunking,
            self.embedder.model_name(),
        );

        let stale_chunks = previous.and_then(|p| stale_chunk_count(p, chunks.len()));
        let current = previous.is_some_and(|p| p.is_current(&fingerprint, chunks.len()));

        // Current chunks are kept; a stale tail is only rewritten under --replace
        if current && !options.force && !(options.replace && stale_chunks.is_some()) {
            debug!("{} is unchanged, skipping", source);
            if let Some(stale_chunks) = stale_chunks {
                record_stale(report, &source, stale_chunks);
            }
            report.skipped.push(source);
            return Ok(());
        }

        let records = self.embed_chunks(&document, &chunks, &fingerprint)?;

        // Old records go only once the replacements are in hand
        if options.replace {
            report.records_deleted += self.store.delete_source(&source).await?;
        }

        let written = self.store.upsert_records(&records).await?;
        report.chunks_written += written;
        info!("Ingested {} ({} chunks)", source, written);

        if !options.replace {
            if let Some(stale_chunks) = stale_chunks {
                record_stale(report, &source, stale_chunks);
            }
        }

        report.ingested.push(source);
        Ok(())
    }

    fn embed_chunks(
        &self,
        document: &LoadedDocument,
        chunks: &[TextChunk],
        fingerprint: &str,
    ) -> Result<Vec<EmbeddingRecord>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts)?;

        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings for {}, got {}",
                chunks.len(),
                document.source,
                vectors.len()
            )));
        }

        let created_at = Utc::now().to_rfc3339();
        chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                Ok(EmbeddingRecord::new(
                    vector,
                    ChunkMetadata {
                        source: document.source.clone(),
                        chunk_index: to_u32(chunk.chunk_index, "chunk index")?,
                        page: chunk.page,
                        start_offset: to_u32(chunk.start_offset, "chunk offset")?,
                        content: chunk.content.clone(),
                        fingerprint: fingerprint.to_string(),
                        created_at: created_at.clone(),
                    },
                ))
            })
            .collect()
    }

    async fn reconcile_orphans(
        &mut self,
        existing: &BTreeMap<String, SourceSummary>,
        on_disk: &BTreeSet<String>,
        prune: bool,
        report: &mut IngestReport,
    ) -> Result<()> {
        for source in existing.keys().filter(|s| !on_disk.contains(*s)) {
            if prune {
                report.records_deleted += self.store.delete_source(source).await?;
                info!("Pruned records of removed document {}", source);
                report.pruned.push(source.clone());
            } else {
                warn!(
                    "{} is no longer in the documents directory; use --prune to remove it",
                    source
                );
                report.orphaned.push(source.clone());
            }
        }
        Ok(())
    }
}

/// Identify a document's content together with how it was chunked and embedded
#[inline]
pub fn fingerprint(content_hash: &str, chunking: &ChunkingConfig, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(chunking.chunk_size.to_le_bytes());
    hasher.update(chunking.chunk_overlap.to_le_bytes());
    hasher.update(b"\n");
    hasher.update(model.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

fn record_stale(report: &mut IngestReport, source: &str, stale_chunks: usize) {
    warn!(
        "{} still has {} chunks from an earlier run; use --replace to remove them",
        source, stale_chunks
    );
    report.stale.push(StaleSource {
        source: source.to_string(),
        stale_chunks,
    });
}

/// Stored chunks beyond the new chunk count, left behind by an upsert
fn stale_chunk_count(previous: &SourceSummary, chunk_count: usize) -> Option<usize> {
    let stored_end = previous.max_chunk_index as usize + 1;
    (stored_end > chunk_count).then(|| stored_end - chunk_count)
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| RagError::Database(format!("{} {} out of range", what, value)))
}

fn progress_bar(len: usize) -> ProgressBar {
    if console::user_attended_stderr() {
        let style = ProgressStyle::with_template("{spinner} [{pos}/{len}] Ingesting {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(len as u64).with_style(style)
    } else {
        ProgressBar::hidden()
    }
}
