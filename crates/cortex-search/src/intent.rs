//! Intent filtering: classifies a memory's origin (manually authored,
//! imported, or connector-sourced) so `Options::intent` can narrow a
//! search to just one of those buckets.

use cortex_core::model::Memory;

use crate::ranking::KNOWN_PROVIDERS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    All,
    Memory,
    Connector,
    Import,
}

/// `""|"all"` → `All`; anything else recognized maps to its variant,
/// unrecognized strings also fall back to `All`.
pub fn normalize_intent(raw: &str) -> Intent {
    match raw.trim().to_lowercase().as_str() {
        "" | "all" => Intent::All,
        "memory" => Intent::Memory,
        "import" => Intent::Import,
        "connector" => Intent::Connector,
        _ => Intent::All,
    }
}

const MEMORY_DIR_PREFIX: &str = "memory/";
const CANONICAL_MEMORY_FILE: &str = "memory.md";

fn is_memory_path(source_file: &str) -> bool {
    let lower = source_file.to_lowercase();
    lower.starts_with(MEMORY_DIR_PREFIX) || lower == CANONICAL_MEMORY_FILE
}

pub fn matches_intent(memory: &Memory, intent: Intent) -> bool {
    match intent {
        Intent::All => true,
        Intent::Memory => is_memory_path(&memory.source_file),
        Intent::Connector => memory.is_connector_sourced(KNOWN_PROVIDERS),
        Intent::Import => !memory.is_connector_sourced(KNOWN_PROVIDERS) && !is_memory_path(&memory.source_file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_intent_defaults_unknown_to_all() {
        assert_eq!(normalize_intent(""), Intent::All);
        assert_eq!(normalize_intent("ALL"), Intent::All);
        assert_eq!(normalize_intent("nonsense"), Intent::All);
        assert_eq!(normalize_intent("memory"), Intent::Memory);
    }

    #[test]
    fn matches_intent_classifies_by_source_file() {
        let memory_file = Memory::new("x", "memory/today.md");
        let connector_file = Memory::new("x", "local-vault:notes/today.md");
        let import_file = Memory::new("x", "docs/onboarding.md");

        assert!(matches_intent(&memory_file, Intent::Memory));
        assert!(!matches_intent(&memory_file, Intent::Connector));

        assert!(matches_intent(&connector_file, Intent::Connector));
        assert!(!matches_intent(&connector_file, Intent::Import));

        assert!(matches_intent(&import_file, Intent::Import));
        assert!(!matches_intent(&import_file, Intent::Memory));
    }
}
