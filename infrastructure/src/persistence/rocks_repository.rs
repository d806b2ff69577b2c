use application::{DocumentRepository, DocumentStore, RepositoryError};
use async_trait::async_trait;
use domain::{Document, DocumentId, FieldMap};
use rocksdb::IteratorMode;
use std::sync::Arc;
use tokio::task;
use tracing::{error, instrument, warn};

use super::engine::{StoreConfig, StoreManager};

type RawEntry = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>;

/// Advances the iterator past `offset` raw entries before any decoding.
/// Running off the end is not an error; the caller's loop just sees the end.
fn skip_raw_entries(
    iter: &mut impl Iterator<Item = RawEntry>,
    offset: usize,
    store: &str,
) -> Result<(), RepositoryError> {
    for _ in 0..offset {
        match iter.next() {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(store = %store, "Engine iteration failed while skipping: {}", e);
                return Err(RepositoryError::backend(store, e));
            }
            None => return Ok(()),
        }
    }
    Ok(())
}

// --- Embedded-Engine Document Store ---

/// Engine-backed implementation of the repository contract, one isolated
/// store per tenant.
pub struct RocksDocumentStore {
    manager: Arc<StoreManager>,
}

impl RocksDocumentStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            manager: Arc::new(StoreManager::new(config)),
        }
    }

    /// Direct registry access, for maintenance tooling and tests.
    pub fn manager(&self) -> &Arc<StoreManager> {
        &self.manager
    }

    /// Dispatches a blocking engine call to the worker pool so the caller's
    /// scheduler is never blocked.
    async fn run_blocking<T, F>(&self, store_id: &str, op: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(Arc<StoreManager>) -> Result<T, RepositoryError> + Send + 'static,
        T: Send + 'static,
    {
        let manager = self.manager.clone();
        task::spawn_blocking(move || op(manager))
            .await
            .map_err(|e| RepositoryError::backend(store_id, e))?
    }

    /// Serializes the full entity and writes it under key = `id`.
    /// Overwrites silently if the key exists (upsert).
    async fn put(
        &self,
        store_id: &str,
        document: &Document,
    ) -> Result<Document, RepositoryError> {
        let store = store_id.to_string();
        let document = document.clone();
        self.run_blocking(store_id, move |manager| {
            let bytes = document.encode().map_err(|e| {
                error!(store = %store, doc_id = %document.id().as_str(), "Failed to encode document: {}", e);
                RepositoryError::Domain(e)
            })?;
            let db = manager.handle(&store)?;
            db.put(document.id().as_str().as_bytes(), bytes).map_err(|e| {
                error!(store = %store, doc_id = %document.id().as_str(), "Failed to write document: {}", e);
                RepositoryError::backend(store.clone(), e)
            })?;
            Ok(document)
        })
        .await
    }
}

#[async_trait]
impl DocumentRepository for RocksDocumentStore {
    #[instrument(skip(self, document), fields(store = %store_id, doc_id = %document.id().as_str()))]
    async fn create(
        &self,
        store_id: &str,
        document: &Document,
    ) -> Result<Document, RepositoryError> {
        self.put(store_id, document).await
    }

    #[instrument(skip(self), fields(store = %store_id, doc_id = %id.as_str()))]
    async fn retrieve(
        &self,
        store_id: &str,
        id: &DocumentId,
    ) -> Result<Document, RepositoryError> {
        let store = store_id.to_string();
        let id = id.clone();
        self.run_blocking(store_id, move |manager| {
            let db = manager.handle(&store)?;
            match db.get(id.as_str().as_bytes()) {
                Ok(Some(bytes)) => Document::decode(&bytes).map_err(|e| {
                    error!(store = %store, doc_id = %id.as_str(), "Stored document failed to decode: {}", e);
                    RepositoryError::Validation {
                        store: store.clone(),
                        source: e,
                    }
                }),
                Ok(None) => Err(RepositoryError::NotFound(id.as_str().to_string())),
                Err(e) => {
                    error!(store = %store, doc_id = %id.as_str(), "Failed to read document: {}", e);
                    Err(RepositoryError::backend(store.clone(), e))
                }
            }
        })
        .await
    }

    #[instrument(skip(self, document), fields(store = %store_id, doc_id = %document.id().as_str()))]
    async fn update(
        &self,
        store_id: &str,
        document: &Document,
    ) -> Result<Document, RepositoryError> {
        self.put(store_id, document).await
    }

    #[instrument(skip(self), fields(store = %store_id, doc_id = %id.as_str()))]
    async fn delete(&self, store_id: &str, id: &DocumentId) -> Result<(), RepositoryError> {
        let store = store_id.to_string();
        let id = id.clone();
        self.run_blocking(store_id, move |manager| {
            let db = manager.handle(&store)?;
            let existing = db.get(id.as_str().as_bytes()).map_err(|e| {
                error!(store = %store, doc_id = %id.as_str(), "Failed to read document: {}", e);
                RepositoryError::backend(store.clone(), e)
            })?;
            if existing.is_none() {
                return Err(RepositoryError::NotFound(id.as_str().to_string()));
            }
            db.delete(id.as_str().as_bytes()).map_err(|e| {
                error!(store = %store, doc_id = %id.as_str(), "Failed to delete document: {}", e);
                RepositoryError::backend(store.clone(), e)
            })
        })
        .await
    }

    #[instrument(skip(self), fields(store = %store_id))]
    async fn list(
        &self,
        store_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, RepositoryError> {
        self.scan(store_id, offset, limit).await
    }
}

#[async_trait]
impl DocumentStore for RocksDocumentStore {
    #[instrument(skip(self), fields(store = %store_id))]
    async fn open_or_create(&self, store_id: &str) -> Result<(), RepositoryError> {
        let store = store_id.to_string();
        self.run_blocking(store_id, move |manager| manager.handle(&store).map(|_| ()))
            .await
    }

    #[instrument(skip(self), fields(store = %store_id))]
    async fn destroy(&self, store_id: &str) -> Result<(), RepositoryError> {
        let store = store_id.to_string();
        self.run_blocking(store_id, move |manager| manager.destroy(&store))
            .await
    }

    #[instrument(skip(self), fields(store = %store_id))]
    async fn flush(&self, store_id: &str) -> Result<(), RepositoryError> {
        let store = store_id.to_string();
        self.run_blocking(store_id, move |manager| manager.flush(&store))
            .await
    }

    /// Unconditional enumeration over one consistent iterator snapshot.
    ///
    /// Best-effort per record: an entry that fails to decode is logged and
    /// skipped; it neither aborts the scan nor counts toward `limit`.
    /// Engine-level iteration failures are backend errors and do abort.
    #[instrument(skip(self), fields(store = %store_id, offset, limit))]
    async fn scan(
        &self,
        store_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, RepositoryError> {
        let store = store_id.to_string();
        self.run_blocking(store_id, move |manager| {
            let db = manager.handle(&store)?;
            let mut iter = db.iterator(IteratorMode::Start);
            skip_raw_entries(&mut iter, offset, &store)?;
            let mut documents = Vec::new();
            while documents.len() < limit {
                match iter.next() {
                    Some(Ok((key, value))) => match Document::decode(&value) {
                        Ok(document) => documents.push(document),
                        Err(e) => {
                            warn!(
                                store = %store,
                                key = %String::from_utf8_lossy(&key),
                                "Skipping undecodable record during scan: {}", e
                            );
                        }
                    },
                    Some(Err(e)) => {
                        error!(store = %store, "Engine iteration failed during scan: {}", e);
                        return Err(RepositoryError::backend(store.clone(), e));
                    }
                    None => break,
                }
            }
            Ok(documents)
        })
        .await
    }

    /// Predicate-filtered enumeration with the same traversal mechanics as
    /// `scan`: `offset` skips raw entries, `limit` counts yielded matches.
    ///
    /// Fail-closed per record: the first entry that fails to decode aborts
    /// the remaining traversal and the error surfaces.
    #[instrument(skip(self, filter), fields(store = %store_id, offset, limit))]
    async fn find(
        &self,
        store_id: &str,
        filter: &FieldMap,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, RepositoryError> {
        let store = store_id.to_string();
        let filter = filter.clone();
        self.run_blocking(store_id, move |manager| {
            let db = manager.handle(&store)?;
            let mut iter = db.iterator(IteratorMode::Start);
            skip_raw_entries(&mut iter, offset, &store)?;
            let mut documents = Vec::new();
            while documents.len() < limit {
                match iter.next() {
                    Some(Ok((_key, value))) => {
                        let document = Document::decode(&value).map_err(|e| {
                            error!(store = %store, "Aborting find on undecodable record: {}", e);
                            RepositoryError::Validation {
                                store: store.clone(),
                                source: e,
                            }
                        })?;
                        if document.matches(&filter) {
                            documents.push(document);
                        }
                    }
                    Some(Err(e)) => {
                        error!(store = %store, "Engine iteration failed during find: {}", e);
                        return Err(RepositoryError::backend(store.clone(), e));
                    }
                    None => break,
                }
            }
            Ok(documents)
        })
        .await
    }
}
