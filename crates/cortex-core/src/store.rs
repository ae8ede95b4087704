//! The `Store` trait consumed by the core.
//!
//! The store exclusively owns persistence of memories, facts, edges, and
//! connectors. `cortex-store` provides the SQLite-backed implementation;
//! this crate only defines the contract so that `cortex-search`,
//! `cortex-sync`, and `cortex-reason` can depend on it without depending
//! on SQLite directly.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{Edge, Fact, FactType, Memory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    ImportedAtDesc,
    ImportedAtAsc,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryListOptions {
    pub limit: usize,
    pub sort: SortOrder,
}

#[derive(Debug, Clone, Default)]
pub struct FactListOptions {
    pub limit: usize,
    pub fact_type: Option<FactType>,
}

#[derive(Debug, Clone, Default)]
pub struct InferenceOptions {
    /// Restrict inference to facts touching these memory ids; empty means
    /// "consider the whole graph".
    pub memory_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct InferenceResult {
    pub edges_created: u64,
}

#[derive(Debug, Clone)]
pub struct AttributeConflict {
    pub subject: String,
    pub predicate: String,
    pub facts: Vec<Fact>,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub memory_count: u64,
    pub fact_count: u64,
    pub edge_count: u64,
    pub connector_count: u64,
}

/// A lexical search hit from `search_fts`. `rank` follows SQLite FTS5's
/// convention: more negative is a better match.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub memory_id: i64,
    pub rank: f64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn add_memory(&self, memory: Memory) -> Result<Memory>;
    async fn get_memory(&self, id: i64) -> Result<Option<Memory>>;
    async fn find_by_hash(&self, hash: &str) -> Result<Option<Memory>>;
    async fn list_memories(&self, opts: MemoryListOptions) -> Result<Vec<Memory>>;
    async fn delete_memory(&self, id: i64) -> Result<bool>;

    async fn add_fact(&self, fact: Fact) -> Result<Fact>;
    async fn get_fact(&self, id: i64) -> Result<Option<Fact>>;
    async fn list_facts(&self, opts: FactListOptions) -> Result<Vec<Fact>>;
    async fn facts_for_memory(&self, memory_id: i64) -> Result<Vec<Fact>>;
    async fn facts_for_memories(&self, memory_ids: &[i64]) -> Result<Vec<Fact>>;

    async fn add_embedding(&self, memory_id: i64, vector: Vec<f32>) -> Result<()>;
    async fn get_embedding(&self, memory_id: i64) -> Result<Option<Vec<f32>>>;
    /// All `(memory_id, vector)` pairs with an embedding, for brute-force
    /// cosine search.
    async fn all_embeddings(&self) -> Result<Vec<(i64, Vec<f32>)>>;

    /// BM25 full-text search over memory content via the store's inverted
    /// index (SQLite FTS5 in the reference implementation).
    async fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>>;

    async fn stale_facts(&self, max_confidence: f32, max_days: i64) -> Result<Vec<Fact>>;
    async fn get_attribute_conflicts_limit(&self, n: usize) -> Result<Vec<AttributeConflict>>;
    async fn count_edges(&self) -> Result<u64>;
    async fn count_edges_by_source(&self, source: &str) -> Result<u64>;
    async fn edges_for_fact(&self, fact_id: i64) -> Result<Vec<Edge>>;

    /// Best-effort: recompute fact clusters touched by `fact_ids`. Errors
    /// are logged by the caller, never propagated as a sync failure.
    async fn update_clusters(&self, fact_ids: &[i64]) -> Result<()>;

    async fn run_inference(
        &self,
        opts: InferenceOptions,
        cancel: &CancellationToken,
    ) -> Result<InferenceResult>;

    async fn stats(&self) -> Result<Stats>;
}
