//! Drives one or many connectors through the fetch → import → extract →
//! infer pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cortex_connectors::Registry;
use cortex_core::collab::Extractor;
use cortex_core::model::{Connector, Fact, Memory, content_hash};
use cortex_core::store::{InferenceOptions, Store};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connector_store::ConnectorStore;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub extract: bool,
    pub no_infer: bool,
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub provider: String,
    pub fetched: u64,
    pub imported: u64,
    pub skipped: u64,
    pub facts_extracted: u64,
    pub edges_inferred: u64,
    pub duration: Duration,
    pub synced_at: DateTime<Utc>,
    /// Empty on success.
    pub error: String,
}

impl SyncResult {
    fn started(provider: &str) -> (Self, Instant) {
        (
            SyncResult {
                provider: provider.to_string(),
                fetched: 0,
                imported: 0,
                skipped: 0,
                facts_extracted: 0,
                edges_inferred: 0,
                duration: Duration::ZERO,
                synced_at: Utc::now(),
                error: String::new(),
            },
            Instant::now(),
        )
    }
}

pub struct SyncEngine {
    store: Arc<dyn Store>,
    connector_store: Arc<dyn ConnectorStore>,
    registry: Arc<Registry>,
    extractor: Option<Arc<dyn Extractor>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn Store>,
        connector_store: Arc<dyn ConnectorStore>,
        registry: Arc<Registry>,
        extractor: Option<Arc<dyn Extractor>>,
    ) -> Self {
        Self { store, connector_store, registry, extractor }
    }

    pub async fn sync_one(&self, connector: &Connector, opts: &SyncOptions, cancel: &CancellationToken) -> SyncResult {
        let (mut result, started) = SyncResult::started(&connector.provider);

        let Some(provider) = self.registry.get(&connector.provider) else {
            result.error = format!("provider \"{}\" is not registered", connector.provider);
            let _ = self.connector_store.record_sync_error(&connector.provider, &result.error, cancel).await;
            result.duration = started.elapsed();
            return result;
        };

        let since = connector.last_sync_at;
        let records = match provider.fetch(&connector.config, since, cancel).await {
            Ok(records) => records,
            Err(err) => {
                result.error = err.to_string();
                let _ = self.connector_store.record_sync_error(&connector.provider, &result.error, cancel).await;
                result.duration = started.elapsed();
                return result;
            }
        };
        result.fetched = records.len() as u64;

        let mut new_memories: Vec<Memory> = Vec::new();
        for mut record in records {
            if let Some(agent_id) = &opts.agent_id {
                record.agent_id = Some(agent_id.clone());
            }
            let source_file = if record.source.is_empty() {
                connector.provider.clone()
            } else {
                format!("{}:{}", connector.provider, record.source)
            };
            let hash = content_hash(&record.content, &source_file);

            match self.store.find_by_hash(&hash).await {
                Ok(Some(_)) => {
                    // Existing memory with this hash ⇒ skip, independent of
                    // whether the lookup also surfaced an error.
                    result.skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(provider = %connector.provider, error = %err, "find_by_hash failed, attempting insert anyway");
                }
            }

            let mut memory = Memory::new(record.content, source_file);
            memory.source_section = record.section;
            memory.project = record.project;
            memory.memory_class = record.memory_class;
            if let Some(agent_id) = record.agent_id {
                memory.metadata.get_or_insert_with(Default::default).insert("agent_id".into(), agent_id.into());
            }

            match self.store.add_memory(memory).await {
                Ok(inserted) => {
                    result.imported += 1;
                    new_memories.push(inserted);
                }
                Err(err) if err.is_duplicate() => {
                    result.skipped += 1;
                }
                Err(err) => {
                    warn!(provider = %connector.provider, error = %err, "failed to insert memory, skipping record");
                    result.skipped += 1;
                }
            }
        }

        if opts.extract && !new_memories.is_empty() {
            if let Some(extractor) = &self.extractor {
                let mut new_fact_ids = Vec::new();
                for memory in &new_memories {
                    let mut metadata = std::collections::HashMap::new();
                    metadata.insert("source_file".to_string(), memory.source_file.clone());
                    if let Some(section) = &memory.source_section {
                        metadata.insert("source_section".to_string(), section.clone());
                    }
                    metadata.insert("format".to_string(), "markdown".to_string());
                    let extracted = match extractor.extract(&memory.content, &metadata).await {
                        Ok(facts) => facts,
                        Err(err) => {
                            warn!(provider = %connector.provider, error = %err, "extraction failed for memory, skipping");
                            continue;
                        }
                    };
                    for ext in extracted {
                        let fact = Fact {
                            id: 0,
                            memory_id: memory.id,
                            subject: ext.subject,
                            predicate: ext.predicate,
                            object: ext.object,
                            fact_type: ext.fact_type,
                            confidence: ext.confidence,
                            decay_rate: ext.decay_rate,
                            source_quote: ext.source_quote,
                            created_at: Utc::now(),
                            last_reinforced_at: Utc::now(),
                        };
                        if let Ok(inserted) = self.store.add_fact(fact).await {
                            result.facts_extracted += 1;
                            new_fact_ids.push(inserted.id);
                        }
                    }
                }

                if !new_fact_ids.is_empty() {
                    if let Err(err) = self.store.update_clusters(&new_fact_ids).await {
                        warn!(provider = %connector.provider, error = %err, "update_clusters failed, continuing");
                    }

                    if !opts.no_infer {
                        match self.store.run_inference(InferenceOptions { memory_ids: new_memories.iter().map(|m| m.id).collect() }, cancel).await {
                            Ok(inference) => result.edges_inferred = inference.edges_created,
                            Err(err) => warn!(provider = %connector.provider, error = %err, "run_inference failed"),
                        }
                    }
                }
            }
        }

        if let Err(err) = self.connector_store.record_sync_success(&connector.provider, result.imported, cancel).await {
            warn!(provider = %connector.provider, error = %err, "failed to record sync success");
        }

        info!(
            provider = %connector.provider,
            fetched = result.fetched,
            imported = result.imported,
            skipped = result.skipped,
            facts_extracted = result.facts_extracted,
            edges_inferred = result.edges_inferred,
            "sync cycle complete",
        );

        result.duration = started.elapsed();
        result
    }

    /// Runs every enabled connector sequentially, strictly one at a time.
    pub async fn sync_all(&self, opts: &SyncOptions, cancel: &CancellationToken) -> Vec<SyncResult> {
        let connectors = match self.connector_store.list(true, cancel).await {
            Ok(connectors) => connectors,
            Err(err) => {
                warn!(error = %err, "failed to list connectors for sync_all");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(connectors.len());
        for connector in connectors {
            if cancel.is_cancelled() {
                break;
            }
            results.push(self.sync_one(&connector, opts, cancel).await);
        }
        results
    }

    pub async fn sync_provider(&self, name: &str, opts: &SyncOptions, cancel: &CancellationToken) -> SyncResult {
        let (mut result, started) = SyncResult::started(name);
        let connector = match self.connector_store.get(name, cancel).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                result.error = format!("connector \"{name}\" is not configured");
                result.duration = started.elapsed();
                return result;
            }
            Err(err) => {
                result.error = err.to_string();
                result.duration = started.elapsed();
                return result;
            }
        };
        if !connector.enabled {
            result.error = format!("connector \"{name}\" is disabled");
            result.duration = started.elapsed();
            return result;
        }
        self.sync_one(&connector, opts, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_connectors::provider::Provider;
    use cortex_core::collab::ExtractedFact;
    use cortex_core::model::FactType;
    use cortex_store::SqliteStore;
    use serde_json::{Value, json};

    struct StaticProvider {
        records: Vec<cortex_connectors::Record>,
    }

    #[async_trait]
    impl Provider for StaticProvider {
        fn name(&self) -> &'static str {
            "local-vault"
        }
        fn display_name(&self) -> &'static str {
            "Static Test Provider"
        }
        fn default_config(&self) -> Value {
            json!({})
        }
        fn validate_config(&self, _cfg: &Value) -> cortex_core::error::Result<()> {
            Ok(())
        }
        async fn fetch(&self, _cfg: &Value, _since: Option<DateTime<Utc>>, _cancel: &CancellationToken) -> cortex_core::error::Result<Vec<cortex_connectors::Record>> {
            Ok(self.records.clone())
        }
    }

    struct EchoExtractor;

    #[async_trait]
    impl Extractor for EchoExtractor {
        async fn extract(&self, text: &str, _metadata: &std::collections::HashMap<String, String>) -> cortex_core::error::Result<Vec<ExtractedFact>> {
            Ok(vec![ExtractedFact {
                subject: "memory".into(),
                predicate: "mentions".into(),
                object: text.chars().take(20).collect(),
                fact_type: FactType::Attribute,
                confidence: 0.8,
                decay_rate: 0.01,
                source_quote: text.to_string(),
            }])
        }
    }

    /// Every extracted fact shares subject "project_status" and predicate
    /// "is", with an object that changes across records so inference can
    /// link them as a supersession chain.
    struct StatusExtractor;

    #[async_trait]
    impl Extractor for StatusExtractor {
        async fn extract(&self, text: &str, _metadata: &std::collections::HashMap<String, String>) -> cortex_core::error::Result<Vec<ExtractedFact>> {
            Ok(vec![ExtractedFact {
                subject: "project_status".into(),
                predicate: "is".into(),
                object: text.to_string(),
                fact_type: FactType::Attribute,
                confidence: 0.8,
                decay_rate: 0.01,
                source_quote: text.to_string(),
            }])
        }
    }

    fn test_registry(provider: StaticProvider) -> Arc<Registry> {
        let registry = Registry::new();
        registry.register(Arc::new(provider));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn sync_one_imports_new_records_and_dedupes_on_rerun() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let connector_store: Arc<dyn ConnectorStore> = Arc::new(crate::connector_store::SqliteConnectorStore::open_in_memory().unwrap());
        let cancel = CancellationToken::new();

        let connector = connector_store.add("local-vault", json!({}), &cancel).await.unwrap();
        let provider = StaticProvider {
            records: vec![cortex_connectors::Record::new("r1", "hello world", "note.md", Utc::now())],
        };
        let engine = SyncEngine::new(store.clone(), connector_store.clone(), test_registry(provider), Some(Arc::new(EchoExtractor)));

        let opts = SyncOptions { extract: true, no_infer: false, agent_id: None };
        let first = engine.sync_one(&connector, &opts, &cancel).await;
        assert_eq!(first.imported, 1);
        assert_eq!(first.skipped, 0);
        assert!(first.facts_extracted >= 1);
        assert!(first.error.is_empty());

        let connector_after = connector_store.get("local-vault", &cancel).await.unwrap().unwrap();
        let second = engine.sync_one(&connector_after, &opts, &cancel).await;
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.facts_extracted, 0);
    }

    #[tokio::test]
    async fn sync_one_infers_edges_across_three_records_sharing_a_subject_predicate() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let connector_store: Arc<dyn ConnectorStore> = Arc::new(crate::connector_store::SqliteConnectorStore::open_in_memory().unwrap());
        let cancel = CancellationToken::new();

        let connector = connector_store.add("local-vault", json!({}), &cancel).await.unwrap();
        let provider = StaticProvider {
            records: vec![
                cortex_connectors::Record::new("r1", "planning", "status/1.md", Utc::now()),
                cortex_connectors::Record::new("r2", "in-progress", "status/2.md", Utc::now()),
                cortex_connectors::Record::new("r3", "shipped", "status/3.md", Utc::now()),
            ],
        };
        let engine = SyncEngine::new(store.clone(), connector_store.clone(), test_registry(provider), Some(Arc::new(StatusExtractor)));

        let opts = SyncOptions { extract: true, no_infer: false, agent_id: None };
        let result = engine.sync_one(&connector, &opts, &cancel).await;

        assert_eq!(result.imported, 3);
        assert_eq!(result.facts_extracted, 3);
        assert!(result.error.is_empty());
        assert!(result.edges_inferred > 0, "expected at least one inferred edge across the shared subject/predicate facts");
    }

    #[tokio::test]
    async fn sync_one_records_error_for_unregistered_provider() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let connector_store: Arc<dyn ConnectorStore> = Arc::new(crate::connector_store::SqliteConnectorStore::open_in_memory().unwrap());
        let cancel = CancellationToken::new();
        let connector = connector_store.add("mail", json!({}), &cancel).await.unwrap();

        let registry = Arc::new(Registry::new());
        let engine = SyncEngine::new(store, connector_store.clone(), registry, None);
        let result = engine.sync_one(&connector, &SyncOptions::default(), &cancel).await;
        assert!(!result.error.is_empty());

        let after = connector_store.get("mail", &cancel).await.unwrap().unwrap();
        assert!(!after.last_error.is_empty());
    }
}
