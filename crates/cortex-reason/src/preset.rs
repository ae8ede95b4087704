//! Preset-mode reasoning: bundled templates, confidence-annotated context
//! assembly, and template substitution.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use cortex_core::collab::{ChatCompletion, ChatMessage, LlmClient};
use cortex_core::error::Result;
use cortex_core::model::{Fact, Memory, effective_confidence};
use cortex_core::store::Store;
use cortex_search::{Options, SearchEngine, SearchMode};
use serde::Deserialize;

pub const DEFAULT_MAX_CONTEXT: usize = 8000;

#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    pub description: String,
    pub system: String,
    pub template: String,
    pub max_tokens: u32,
    pub search_limit: usize,
    pub search_mode: SearchMode,
}

/// On-disk shape for a custom preset (`search_mode` as a plain string,
/// since [`SearchMode`] carries no serde impl of its own).
#[derive(Debug, Deserialize)]
struct PresetFile {
    name: String,
    description: String,
    system: String,
    template: String,
    max_tokens: u32,
    search_limit: usize,
    search_mode: String,
}

impl From<PresetFile> for Preset {
    fn from(f: PresetFile) -> Self {
        Preset {
            name: f.name,
            description: f.description,
            system: f.system,
            template: f.template,
            max_tokens: f.max_tokens,
            search_limit: f.search_limit,
            search_mode: mode_from_str(&f.search_mode),
        }
    }
}

fn mode_from_str(s: &str) -> SearchMode {
    match s {
        "semantic" => SearchMode::Semantic,
        "hybrid" => SearchMode::Hybrid,
        "rrf" => SearchMode::Rrf,
        _ => SearchMode::Keyword,
    }
}

fn builtin(name: &str, description: &str, system: &str, template: &str, max_tokens: u32, search_limit: usize, search_mode: &str) -> Preset {
    Preset {
        name: name.to_string(),
        description: description.to_string(),
        system: system.to_string(),
        template: template.to_string(),
        max_tokens,
        search_limit,
        search_mode: mode_from_str(search_mode),
    }
}

fn builtin_presets() -> Vec<Preset> {
    vec![
        builtin(
            "daily-digest",
            "Summarize what changed in the last day across connected sources.",
            "You are an assistant that summarizes an agent's recent activity concisely and factually.",
            "Summarize today's activity from the context below.\n\n{{context}}\n{{if .Query}}\nFocus specifically on: {{.Query}}\n{{end}}",
            1200,
            30,
            "hybrid",
        ),
        builtin(
            "fact-audit",
            "Surface stale or low-confidence facts that may need re-verification.",
            "You are an assistant that audits stored facts for staleness and contradictions.",
            "Review the facts implied by the context below and flag anything stale or questionable.\n\n{{context}}\n{{if .Query}}\nScope this audit to: {{.Query}}\n{{end}}",
            1500,
            40,
            "keyword",
        ),
        builtin(
            "weekly-dive",
            "Produce a deeper weekly retrospective across all sources.",
            "You are an assistant producing a thorough weekly retrospective from an agent's memory.",
            "Write a weekly retrospective using the context below.\n\n{{context}}\n{{if .Query}}\nEmphasize: {{.Query}}\n{{end}}",
            2000,
            60,
            "rrf",
        ),
        builtin(
            "conflict-check",
            "Identify contradictory facts across memories.",
            "You are an assistant that finds contradictions between stored facts.",
            "Identify any conflicting statements in the context below.\n\n{{context}}\n{{if .Query}}\nLimit the check to: {{.Query}}\n{{end}}",
            1500,
            40,
            "hybrid",
        ),
        builtin(
            "agent-review",
            "Review a specific agent's recent behavior and decisions.",
            "You are an assistant reviewing an agent's recent decisions and status updates.",
            "Review the agent activity in the context below.\n\n{{context}}\n{{if .Query}}\nFocus on: {{.Query}}\n{{end}}",
            1500,
            40,
            "hybrid",
        ),
    ]
}

/// Loads built-ins, then overlays any `*.toml` preset found under
/// `custom_dir` (same shape as [`Preset`]), which shadows a built-in of
/// the same name.
pub fn load_presets(custom_dir: Option<&Path>) -> HashMap<String, Preset> {
    let mut presets: HashMap<String, Preset> = builtin_presets().into_iter().map(|p| (p.name.clone(), p)).collect();

    let Some(dir) = custom_dir else { return presets };
    let Ok(entries) = std::fs::read_dir(dir) else { return presets };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(&path) else { continue };
        match toml::from_str::<PresetFile>(&raw) {
            Ok(file) => {
                let preset: Preset = file.into();
                presets.insert(preset.name.clone(), preset);
            }
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to parse custom preset"),
        }
    }
    presets
}

fn confidence_bucket(confidence: f32) -> &'static str {
    if confidence >= 0.80 {
        "[≥0.80]"
    } else if confidence >= 0.50 {
        "⚡ [0.50–0.80]"
    } else {
        "⚠️ STALE <0.50"
    }
}

fn memory_confidence(facts: &[Fact]) -> f32 {
    if facts.is_empty() {
        return 0.85;
    }
    let now = Utc::now();
    let sum: f32 = facts.iter().map(|f| effective_confidence(f, now)).sum();
    sum / facts.len() as f32
}

/// Builds the confidence-annotated memory block plus a trailing facts
/// block, truncated to `max_chars`.
pub fn build_context(memories: &[Memory], facts_by_memory: &HashMap<i64, Vec<Fact>>, max_chars: usize) -> String {
    let mut out = String::new();

    for memory in memories {
        let facts = facts_by_memory.get(&memory.id).map(Vec::as_slice).unwrap_or(&[]);
        let bucket = confidence_bucket(memory_confidence(facts));
        let project_suffix = memory.project.as_deref().map(|p| format!(", project: {p}")).unwrap_or_default();
        let line = format!("{bucket} {} — source: {}{project_suffix}\n", memory.content, memory.source_file);
        if out.len() + line.len() > max_chars {
            break;
        }
        out.push_str(&line);
    }

    let mut top_facts: Vec<&Fact> = facts_by_memory.values().flatten().collect();
    let now = Utc::now();
    top_facts.sort_by(|a, b| effective_confidence(b, now).partial_cmp(&effective_confidence(a, now)).unwrap_or(std::cmp::Ordering::Equal));
    top_facts.truncate(20);

    if !top_facts.is_empty() && out.len() < max_chars {
        let mut block = String::from("\nFacts:\n");
        for fact in top_facts {
            let line = format!("- {} {} {} (confidence {:.2})\n", fact.subject, fact.predicate, fact.object, effective_confidence(fact, now));
            if out.len() + block.len() + line.len() > max_chars {
                break;
            }
            block.push_str(&line);
        }
        out.push_str(&block);
    }

    out
}

/// Substitutes `{{context}}`, `{{.Query}}`, and `{{if .Query}}…{{end}}`
/// blocks. The conditional block is kept (with `{{.Query}}` substituted
/// inside) only when `query` is non-empty.
pub fn substitute_template(template: &str, context: &str, query: Option<&str>) -> String {
    let query = query.unwrap_or("").trim();
    let mut out = template.replace("{{context}}", context);

    loop {
        let Some(start) = out.find("{{if .Query}}") else { break };
        let Some(end_rel) = out[start..].find("{{end}}") else { break };
        let end = start + end_rel + "{{end}}".len();
        let inner_start = start + "{{if .Query}}".len();
        let inner_end = start + end_rel;
        let inner = &out[inner_start..inner_end];
        let replacement = if query.is_empty() { String::new() } else { inner.replace("{{.Query}}", query) };
        out.replace_range(start..end, &replacement);
    }

    out.replace("{{.Query}}", query)
}

pub struct PresetEngine<'a> {
    store: &'a dyn Store,
    search: &'a SearchEngine,
    llm: &'a dyn LlmClient,
    presets: HashMap<String, Preset>,
    max_context: usize,
}

impl<'a> PresetEngine<'a> {
    pub fn new(store: &'a dyn Store, search: &'a SearchEngine, llm: &'a dyn LlmClient, presets: HashMap<String, Preset>) -> Self {
        Self { store, search, llm, presets, max_context: DEFAULT_MAX_CONTEXT }
    }

    pub fn with_max_context(mut self, max_context: usize) -> Self {
        self.max_context = max_context;
        self
    }

    pub async fn run(&self, preset_name: &str, query: Option<&str>) -> Result<ChatCompletion> {
        let preset = self
            .presets
            .get(preset_name)
            .ok_or_else(|| cortex_core::error::CortexError::InvalidConfig(format!("unknown preset \"{preset_name}\"")))?;

        let search_query = query.unwrap_or(preset.name.as_str());
        let opts = Options { mode: preset.search_mode, limit: preset.search_limit, ..Options::default() };
        let hits = self.search.search(search_query, &opts).await?;

        let mut memories = Vec::with_capacity(hits.len());
        for hit in &hits {
            if let Some(memory) = self.store.get_memory(hit.memory_id).await? {
                memories.push(memory);
            }
        }

        let ids: Vec<i64> = memories.iter().map(|m| m.id).collect();
        let all_facts = self.store.facts_for_memories(&ids).await?;
        let mut facts_by_memory: HashMap<i64, Vec<Fact>> = HashMap::new();
        for fact in all_facts {
            facts_by_memory.entry(fact.memory_id).or_default().push(fact);
        }

        let context = build_context(&memories, &facts_by_memory, self.max_context);
        let user_content = substitute_template(&preset.template, &context, query);

        let messages = [ChatMessage::system(preset.system.clone()), ChatMessage::user(user_content)];
        self.llm.chat(&messages, preset.max_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_core::model::FactType;
    use cortex_search::SearchEngine;
    use cortex_store::SqliteStore;
    use std::time::Duration;

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn chat(&self, messages: &[ChatMessage], _max_tokens: u32) -> Result<ChatCompletion> {
            let user_turn = messages.iter().rev().find(|m| matches!(m.role, cortex_core::collab::ChatRole::User)).unwrap();
            Ok(ChatCompletion {
                content: format!("echoed: {}", user_turn.content),
                model: "stub".into(),
                provider: "stub".into(),
                prompt_tokens: 5,
                completion_tokens: 5,
                requested_at: Utc::now(),
                duration: Duration::from_millis(1),
            })
        }
    }

    #[tokio::test]
    async fn preset_engine_runs_search_and_calls_llm() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_memory(Memory::new("deploy pipeline uses canary rollouts", "notes/deploys.md")).await.unwrap();
        let search = SearchEngine::new(std::sync::Arc::new(store.clone()), None);
        let llm = StubLlm;

        let presets = load_presets(None);
        let engine = PresetEngine::new(&store, &search, &llm, presets);
        let completion = engine.run("daily-digest", Some("deploy")).await.unwrap();
        assert!(completion.content.starts_with("echoed:"));
        assert!(completion.content.contains("canary rollouts"));
    }

    #[test]
    fn builtin_presets_cover_all_five_names() {
        let presets = load_presets(None);
        for name in ["daily-digest", "fact-audit", "weekly-dive", "conflict-check", "agent-review"] {
            assert!(presets.contains_key(name), "missing preset {name}");
        }
    }

    #[test]
    fn substitute_template_keeps_conditional_when_query_present() {
        let template = "intro\n{{context}}\n{{if .Query}}about: {{.Query}}{{end}}";
        let out = substitute_template(template, "CTX", Some("deploys"));
        assert!(out.contains("CTX"));
        assert!(out.contains("about: deploys"));
    }

    #[test]
    fn substitute_template_drops_conditional_when_query_absent() {
        let template = "intro\n{{context}}\n{{if .Query}}about: {{.Query}}{{end}}";
        let out = substitute_template(template, "CTX", None);
        assert!(!out.contains("about:"));
    }

    #[test]
    fn confidence_bucket_thresholds_match_spec() {
        assert_eq!(confidence_bucket(0.9), "[≥0.80]");
        assert_eq!(confidence_bucket(0.6), "⚡ [0.50–0.80]");
        assert_eq!(confidence_bucket(0.2), "⚠️ STALE <0.50");
    }

    #[test]
    fn build_context_truncates_to_budget() {
        let memory = Memory::new("x".repeat(50), "notes/a.md");
        let memories = vec![memory.clone(), { let mut m = memory.clone(); m.id = 2; m }];
        let facts = HashMap::new();
        let context = build_context(&memories, &facts, 60);
        assert!(context.len() <= 90); // one line plus small overflow tolerance, never both
    }

    #[test]
    fn build_context_includes_top_facts_block() {
        let mut memory = Memory::new("hello", "notes/a.md");
        memory.id = 1;
        let fact = Fact {
            id: 1,
            memory_id: 1,
            subject: "s".into(),
            predicate: "p".into(),
            object: "o".into(),
            fact_type: FactType::Attribute,
            confidence: 0.9,
            decay_rate: 0.0,
            source_quote: String::new(),
            created_at: Utc::now(),
            last_reinforced_at: Utc::now(),
        };
        let mut facts_by_memory = HashMap::new();
        facts_by_memory.insert(1, vec![fact]);
        let context = build_context(&[memory], &facts_by_memory, DEFAULT_MAX_CONTEXT);
        assert!(context.contains("Facts:"));
        assert!(context.contains("s p o"));
    }
}
