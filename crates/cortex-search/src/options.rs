//! Search request shape.

use crate::intent::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
    Rrf,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub mode: SearchMode,
    pub limit: usize,
    pub min_confidence: f32,
    pub project: Option<String>,
    /// Matched as a case-insensitive prefix of `memory.source_file`.
    pub source: Option<String>,
    pub boost_agent: Option<String>,
    pub boost_channel: Option<String>,
    pub intent: Intent,
    pub explain: bool,
    pub disable_recency: bool,
    pub disable_source_weight: bool,
    pub disable_confidence_decay: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: SearchMode::Keyword,
            limit: 10,
            min_confidence: 0.0,
            project: None,
            source: None,
            boost_agent: None,
            boost_channel: None,
            intent: Intent::All,
            explain: false,
            disable_recency: false,
            disable_source_weight: false,
            disable_confidence_decay: false,
        }
    }
}

/// A single ranked result. `explain` is populated only when `Options::explain`
/// is set.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub memory_id: i64,
    pub score: f64,
    pub match_type: String,
    pub explain: Vec<String>,
}
