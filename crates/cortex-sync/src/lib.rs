pub mod connector_store;
pub mod engine;

pub use connector_store::{ConnectorStore, SqliteConnectorStore};
pub use engine::{SyncEngine, SyncOptions, SyncResult};
