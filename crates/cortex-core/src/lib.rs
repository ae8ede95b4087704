pub mod collab;
pub mod error;
pub mod model;
pub mod store;

pub use collab::{EmbeddingProvider, ExtractedFact, Extractor, LlmClient};
pub use error::CortexError;
pub use model::{
    Connector, Edge, Fact, FactType, Memory, MemoryClass, content_hash, effective_confidence,
};
pub use store::{
    AttributeConflict, FactListOptions, InferenceOptions, InferenceResult, MemoryListOptions,
    SortOrder, Stats, Store,
};
