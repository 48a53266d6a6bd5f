//! Embedding index: vectors attached to records, ranked by cosine similarity.
//!
//! Vectors live on their record's own row (see [`crate::store::EmbeddingSpec`]) as a
//! little-endian f32 blob plus a dimension tag, so deleting a record deletes its vector
//! in the same statement. Search is a brute-force scan: load candidates through the
//! record store, then [`rank`] them in memory.

pub mod codec;
pub mod rank;

pub use rank::{cosine, rank, rank_cancellable, Candidate, DimensionMismatch, Ranking, ScoredRecord};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::db::migrations;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StoreError};
use crate::store::{Filter, RecordKey, RecordStore, StoreTx, TableDescriptor};

/// How a re-index pass selects and batches records.
#[derive(Debug, Clone)]
pub struct ReindexOptions {
    /// Records embedded and committed per transaction.
    pub batch_size: usize,
    /// Only embed records that have no vector yet.
    pub only_missing: bool,
    /// Checked between batches; batches already committed stay committed.
    pub cancel: Option<CancellationToken>,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            only_missing: false,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub batches: usize,
    pub embedded: usize,
    /// Records whose source text was null or empty.
    pub skipped: usize,
}

/// Stored model identifier compared against the configured one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    /// No model has been recorded yet.
    Unset,
    Current,
    /// Stored vectors came from a different model; re-index before searching.
    Changed { stored: String },
}

/// Attaches, loads, and ranks embeddings of a fixed dimension.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    store: RecordStore,
    dimension: usize,
}

impl EmbeddingIndex {
    pub fn new(store: RecordStore, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(StoreError::validation("embedding dimension must be > 0"));
        }
        Ok(Self { store, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Attach `vector` to an existing record in its own transaction.
    pub fn attach(&self, table: &TableDescriptor, key: &RecordKey, vector: &[f32]) -> Result<()> {
        self.store
            .with_transaction(|tx| self.attach_in(tx, table, key, vector))
    }

    /// Attach `vector` inside a caller's transaction, typically right after inserting
    /// the record so both become visible together.
    pub fn attach_in(
        &self,
        tx: &StoreTx<'_>,
        table: &TableDescriptor,
        key: &RecordKey,
        vector: &[f32],
    ) -> Result<()> {
        self.check_vector(vector)?;
        tx.write_embedding(table, key, Some(codec::encode(vector)), Some(vector.len()))?;
        tracing::debug!(table = table.name, %key, dim = vector.len(), "embedding attached");
        Ok(())
    }

    /// Remove a record's vector, keeping the record.
    pub fn detach(&self, table: &TableDescriptor, key: &RecordKey) -> Result<()> {
        self.store
            .with_transaction(|tx| tx.write_embedding(table, key, None, None))
    }

    /// Decode the vectors of records matching `filter`, in key order.
    ///
    /// Blobs whose length disagrees with their dimension tag are skipped with a warning.
    pub fn load_candidates(
        &self,
        table: &TableDescriptor,
        filter: &Filter,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Candidate>> {
        let stored = self.store.embedding_rows(table, filter, cancel)?;
        let mut candidates = Vec::with_capacity(stored.len());
        for row in stored {
            let decoded = match (row.blob.as_deref(), row.dim) {
                (Some(blob), Some(dim)) => usize::try_from(dim)
                    .ok()
                    .and_then(|dim| codec::decode(blob, dim)),
                _ => None,
            };
            match decoded {
                Some(vector) => candidates.push(Candidate {
                    key: row.key,
                    vector,
                }),
                None => tracing::warn!(
                    table = table.name,
                    key = %row.key,
                    "stored embedding is corrupt, skipping"
                ),
            }
        }
        Ok(candidates)
    }

    /// Rank records matching `filter` against `query`.
    pub fn search(
        &self,
        table: &TableDescriptor,
        query: &[f32],
        filter: &Filter,
        top_k: usize,
    ) -> Result<Ranking> {
        self.check_vector(query)?;
        let candidates = self.load_candidates(table, filter, None)?;
        let ranking = rank(query, &candidates, top_k);
        tracing::debug!(
            table = table.name,
            candidates = candidates.len(),
            hits = ranking.hits.len(),
            warnings = ranking.warnings.len(),
            "search complete"
        );
        Ok(ranking)
    }

    /// [`EmbeddingIndex::search`] with cooperative cancellation during both load and rank.
    pub fn search_cancellable(
        &self,
        table: &TableDescriptor,
        query: &[f32],
        filter: &Filter,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Ranking> {
        self.check_vector(query)?;
        let candidates = self.load_candidates(table, filter, Some(cancel))?;
        rank_cancellable(query, &candidates, top_k, cancel)
    }

    /// Embed `text` with `provider`, then search.
    pub fn search_text(
        &self,
        provider: &dyn EmbeddingProvider,
        table: &TableDescriptor,
        text: &str,
        filter: &Filter,
        top_k: usize,
    ) -> Result<Ranking> {
        let query = provider.embed(text)?;
        self.search(table, &query, filter, top_k)
    }

    /// Re-embed records from the table's source text column, one transaction per batch.
    ///
    /// Records the provider's model once every batch has committed.
    pub fn reindex(
        &self,
        table: &TableDescriptor,
        provider: &dyn EmbeddingProvider,
        options: &ReindexOptions,
    ) -> Result<ReindexReport> {
        if options.batch_size == 0 {
            return Err(StoreError::validation("reindex batch size must be > 0"));
        }
        if provider.dimensions() != self.dimension {
            return Err(StoreError::validation(format!(
                "provider produces {} dimensions, index expects {}",
                provider.dimensions(),
                self.dimension
            )));
        }
        let spec = table.embedding.ok_or_else(|| {
            StoreError::validation(format!("table {:?} has no embedding column", table.name))
        })?;
        let filter = if options.only_missing {
            Filter::is_null(spec.dim_column)
        } else {
            Filter::All
        };

        let mut report = ReindexReport::default();
        let mut after: Option<RecordKey> = None;
        loop {
            if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                tracing::info!(table = table.name, ?report, "reindex cancelled");
                return Err(StoreError::Cancelled);
            }

            let page = self
                .store
                .source_page(table, &filter, after.as_ref(), options.batch_size)?;
            let Some((last, _)) = page.last() else {
                break;
            };
            after = Some(last.clone());

            let mut keys = Vec::with_capacity(page.len());
            let mut texts = Vec::with_capacity(page.len());
            for (key, source) in &page {
                match source.as_deref().map(str::trim) {
                    Some(text) if !text.is_empty() => {
                        keys.push(key);
                        texts.push(text);
                    }
                    _ => report.skipped += 1,
                }
            }
            if texts.is_empty() {
                continue;
            }

            let vectors = provider.embed_batch(&texts)?;
            if vectors.len() != keys.len() {
                return Err(StoreError::validation(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    keys.len()
                )));
            }
            self.store.with_transaction(|tx| {
                for (key, vector) in keys.iter().zip(&vectors) {
                    self.attach_in(tx, table, key, vector)?;
                }
                Ok::<_, StoreError>(())
            })?;

            report.batches += 1;
            report.embedded += vectors.len();
            tracing::debug!(table = table.name, batch = report.batches, size = vectors.len(), "reindex batch committed");
        }

        self.set_model(provider.model())?;
        tracing::info!(table = table.name, model = provider.model(), ?report, "reindex complete");
        Ok(report)
    }

    /// Compare the stored model identifier against `model`.
    pub fn check_model(&self, model: &str) -> Result<ModelStatus> {
        let stored = self
            .store
            .database()
            .read(|conn| Ok::<_, StoreError>(migrations::get_embedding_model(conn)?))?;
        Ok(match stored {
            None => ModelStatus::Unset,
            Some(stored) if stored == model => ModelStatus::Current,
            Some(stored) => {
                tracing::warn!(%stored, configured = model, "embedding model changed, re-index needed");
                ModelStatus::Changed { stored }
            }
        })
    }

    pub fn set_model(&self, model: &str) -> Result<()> {
        self.store
            .database()
            .with_transaction(|tx| Ok::<_, StoreError>(migrations::set_embedding_model(tx, model)?))
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(StoreError::validation(format!(
                "vector has {} dimensions, expected {}",
                vector.len(),
                self.dimension
            )));
        }
        if vector.iter().any(|c| !c.is_finite()) {
            return Err(StoreError::validation("vector has non-finite components"));
        }
        Ok(())
    }
}

/// Rank on a tokio blocking worker so large candidate sets do not stall the runtime.
///
/// Produces exactly the ordering of the synchronous [`rank`].
pub async fn rank_blocking(
    query: Vec<f32>,
    candidates: Vec<Candidate>,
    top_k: usize,
    cancel: Option<CancellationToken>,
) -> Result<Ranking> {
    let handle = tokio::task::spawn_blocking(move || match cancel {
        Some(cancel) => rank_cancellable(&query, &candidates, top_k, &cancel),
        None => Ok(rank(&query, &candidates, top_k)),
    });
    match handle.await {
        Ok(ranking) => ranking,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(StoreError::Cancelled),
    }
}
