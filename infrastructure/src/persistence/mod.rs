pub mod engine;
pub mod rocks_repository;

// Re-export the registry and the repository implementation
pub use engine::{StoreConfig, StoreManager};
pub use rocks_repository::RocksDocumentStore;
