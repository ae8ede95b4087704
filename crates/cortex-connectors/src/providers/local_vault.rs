//! Local markdown vault connector.
//!
//! The only provider with no network surface — `fetch` walks a
//! directory tree directly, so its logic is fully unit-testable against
//! a real temp directory rather than a mocked transport.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::error::{CortexError, Result};
use regex::Regex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::provider::{Provider, Record, require_str};

const DEFAULT_MAX_FILE_SIZE: u64 = 102_400;
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[".obsidian", ".trash", "_cortex", "node_modules"];

pub struct LocalVaultProvider;

impl LocalVaultProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalVaultProvider {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Splits a markdown file into `(front_matter_yaml, body)`. Returns
/// `(None, original)` when there's no `---` delimited header.
pub(crate) fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let Some(rest) = raw.strip_prefix("---\n") else { return (None, raw) };
    let Some(end) = rest.find("\n---\n") else { return (None, raw) };
    let front_matter = &rest[..end];
    let body = &rest[end + 5..];
    (Some(front_matter), body)
}

fn wikilink_regex() -> Regex {
    Regex::new(r"\[\[([^\]|]+)(?:\|([^\]]+))?\]\]").expect("static pattern compiles")
}

/// `[[target|display]]` → `display`; `[[target]]` → `target`.
pub(crate) fn resolve_wikilinks(body: &str) -> String {
    wikilink_regex()
        .replace_all(body, |caps: &regex::Captures| {
            caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_else(|| caps[1].to_string())
        })
        .into_owned()
}

/// Reads `tags:` out of a parsed front-matter YAML value, accepting both
/// a YAML list and a single scalar.
pub(crate) fn front_matter_tags(front_matter: &serde_yaml::Value) -> Vec<String> {
    match front_matter.get("tags") {
        Some(serde_yaml::Value::Sequence(seq)) => seq.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Some(serde_yaml::Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[async_trait]
impl Provider for LocalVaultProvider {
    fn name(&self) -> &'static str {
        "local-vault"
    }

    fn display_name(&self) -> &'static str {
        "Local Markdown Vault"
    }

    fn default_config(&self) -> Value {
        json!({
            "vault_path": "",
            "include_dirs": [],
            "exclude_dirs": DEFAULT_EXCLUDE_DIRS,
            "include_tags": [],
            "max_file_size": DEFAULT_MAX_FILE_SIZE,
            "project": null,
        })
    }

    fn validate_config(&self, cfg: &Value) -> Result<()> {
        let raw_path = require_str(cfg, "vault_path")?;
        let path = expand_tilde(raw_path);
        if !path.is_dir() {
            return Err(CortexError::InvalidConfig(format!("vault_path {} is not an existing directory", path.display())));
        }
        Ok(())
    }

    async fn fetch(
        &self,
        cfg: &Value,
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        self.validate_config(cfg)?;
        let vault_path = expand_tilde(require_str(cfg, "vault_path")?);
        let include_dirs: Vec<String> = cfg
            .get("include_dirs")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let exclude_dirs: Vec<String> = cfg
            .get("exclude_dirs")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_else(|| DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect());
        let include_tags: Vec<String> = cfg
            .get("include_tags")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let max_file_size = cfg.get("max_file_size").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_MAX_FILE_SIZE);
        let project = cfg.get("project").and_then(|v| v.as_str()).map(str::to_string);

        let mut records = Vec::new();

        for entry in WalkDir::new(&vault_path).into_iter().filter_entry(|e| !is_excluded(e.path(), &vault_path, &exclude_dirs)) {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if !include_dirs.is_empty() {
                let rel = path.strip_prefix(&vault_path).unwrap_or(path);
                let in_scope = include_dirs.iter().any(|d| rel.starts_with(d));
                if !in_scope {
                    continue;
                }
            }

            let Ok(metadata) = entry.metadata() else { continue };
            if metadata.len() > max_file_size {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
            if let Some(since) = since {
                if modified <= since {
                    continue;
                }
            }

            let Ok(raw) = std::fs::read_to_string(path) else { continue };
            let (front_matter_raw, body) = split_front_matter(&raw);
            let front_matter: Option<serde_yaml::Value> = front_matter_raw.and_then(|fm| serde_yaml::from_str(fm).ok());

            if !include_tags.is_empty() {
                let tags = front_matter.as_ref().map(front_matter_tags).unwrap_or_default();
                if !tags.iter().any(|t| include_tags.contains(t)) {
                    continue;
                }
            }

            let content = resolve_wikilinks(body.trim());
            let rel_path = path.strip_prefix(&vault_path).unwrap_or(path).display().to_string();

            let mut record = Record::new(rel_path.clone(), content, rel_path, modified);
            record.project = project.clone();
            records.push(record);
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

fn is_excluded(path: &Path, root: &Path, exclude_dirs: &[String]) -> bool {
    if path == root {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else { return false };
    if path.is_dir() {
        if name.starts_with('.') || exclude_dirs.iter().any(|d| d == name) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn split_front_matter_extracts_yaml_header() {
        let raw = "---\ntags: [a, b]\n---\nbody text";
        let (fm, body) = split_front_matter(raw);
        assert_eq!(fm, Some("tags: [a, b]"));
        assert_eq!(body, "body text");
    }

    #[test]
    fn split_front_matter_passes_through_without_header() {
        let raw = "no header here";
        let (fm, body) = split_front_matter(raw);
        assert_eq!(fm, None);
        assert_eq!(body, raw);
    }

    #[test]
    fn resolve_wikilinks_prefers_display_text() {
        assert_eq!(resolve_wikilinks("see [[Target Page|here]] for more"), "see here for more");
        assert_eq!(resolve_wikilinks("see [[Target Page]] for more"), "see Target Page for more");
    }

    #[test]
    fn front_matter_tags_reads_sequence_or_scalar() {
        let seq: serde_yaml::Value = serde_yaml::from_str("tags: [work, urgent]").unwrap();
        assert_eq!(front_matter_tags(&seq), vec!["work", "urgent"]);

        let scalar: serde_yaml::Value = serde_yaml::from_str("tags: solo").unwrap();
        assert_eq!(front_matter_tags(&scalar), vec!["solo"]);
    }

    #[tokio::test]
    async fn fetch_walks_vault_and_skips_excluded_and_non_markdown() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("note.md"), "hello world").unwrap();
        fs::write(dir.path().join("ignored.txt"), "not markdown").unwrap();
        fs::create_dir(dir.path().join(".obsidian")).unwrap();
        fs::write(dir.path().join(".obsidian/workspace.md"), "should be skipped").unwrap();

        let provider = LocalVaultProvider::new();
        let cfg = json!({ "vault_path": dir.path().to_string_lossy() });
        let records = provider.fetch(&cfg, None, &CancellationToken::new()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "hello world");
    }

    #[tokio::test]
    async fn fetch_skips_files_larger_than_max_file_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.md"), "x".repeat(200)).unwrap();

        let provider = LocalVaultProvider::new();
        let cfg = json!({ "vault_path": dir.path().to_string_lossy(), "max_file_size": 50 });
        let records = provider.fetch(&cfg, None, &CancellationToken::new()).await.unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn validate_config_rejects_missing_directory() {
        let provider = LocalVaultProvider::new();
        let cfg = json!({ "vault_path": "/does/not/exist/anywhere" });
        assert!(provider.validate_config(&cfg).is_err());
    }
}
