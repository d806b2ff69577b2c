use async_trait::async_trait;
use domain::{Document, DocumentId, DomainError, FieldMap, FieldValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Stored document in '{store}' failed to decode: {source}")]
    Validation {
        store: String,
        #[source]
        source: DomainError,
    },
    #[error("Backend failure in store '{store}': {source}")]
    Backend {
        store: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Destroy failed for store '{store}': {reason}")]
    Destroy { store: String, reason: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Domain validation error: {0}")]
    Domain(#[from] DomainError), // Propagate domain errors cleanly
}

impl RepositoryError {
    /// Wraps an engine-level failure with the store it happened in.
    pub fn backend(
        store: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        RepositoryError::Backend {
            store: store.into(),
            source: source.into(),
        }
    }
}

// --- Infrastructure Interfaces (Traits) ---

/// The uniform capability set every backend implements identically.
///
/// Consumers depend on this trait alone and never on backend identity.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Persists a new or upserted record and returns it.
    async fn create(
        &self,
        store_id: &str,
        document: &Document,
    ) -> Result<Document, RepositoryError>;
    /// Retrieves a record by id. Fails with `NotFound` if absent.
    async fn retrieve(
        &self,
        store_id: &str,
        id: &DocumentId,
    ) -> Result<Document, RepositoryError>;
    /// Upsert semantics identical to `create`.
    async fn update(
        &self,
        store_id: &str,
        document: &Document,
    ) -> Result<Document, RepositoryError>;
    /// Removes a record by id. Fails with `NotFound` if absent.
    async fn delete(&self, store_id: &str, id: &DocumentId) -> Result<(), RepositoryError>;
    /// Paginated enumeration in the backend's native key order; no business
    /// ordering is guaranteed.
    async fn list(
        &self,
        store_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, RepositoryError>;
}

/// The embedded-store capability set: tenant lifecycle plus enumeration with
/// the two distinct failure policies.
#[async_trait]
pub trait DocumentStore: DocumentRepository {
    /// Opens the tenant store, creating on-disk structures if absent.
    /// Idempotent; never errors when the store already exists.
    async fn open_or_create(&self, store_id: &str) -> Result<(), RepositoryError>;
    /// Irreversibly deletes all persisted data for the tenant. Fails with
    /// `Destroy` if the store is missing or its handle is concurrently held.
    async fn destroy(&self, store_id: &str) -> Result<(), RepositoryError>;
    /// Forces buffered mutations to durable storage before returning.
    async fn flush(&self, store_id: &str) -> Result<(), RepositoryError>;
    /// Unconditional enumeration. Best-effort: records that fail to decode
    /// are logged and skipped and do not count toward `limit`.
    async fn scan(
        &self,
        store_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, RepositoryError>;
    /// Predicate-filtered enumeration (exact match, AND across all filter
    /// entries). Fail-closed: the first record that fails to decode aborts
    /// the traversal and the error surfaces.
    async fn find(
        &self,
        store_id: &str,
        filter: &FieldMap,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>, RepositoryError>;
}

// --- Request/Response Models (Data Transfer Objects - DTOs) ---

/// Request to create or upsert a document (flexible fields).
#[derive(Deserialize, Debug)]
pub struct UpsertDocumentRequest {
    /// Caller-supplied id; a random one is generated when omitted.
    pub id: Option<String>,
    /// The kind tag of the concrete entity type.
    pub kind: String,
    /// The open fields of the document as a JSON object.
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

#[derive(Deserialize, Debug)]
pub struct ListRequest {
    /// Maximum number of records to return (page size). Optional.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Number of raw entries to skip (for pagination). Optional.
    #[serde(default)]
    pub offset: usize,
}

#[derive(Deserialize, Debug)]
pub struct FindRequest {
    /// Field name -> expected value; a record matches only if every entry
    /// matches exactly.
    pub filter: HashMap<String, Value>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

// Function to provide default limit for serde
fn default_limit() -> usize {
    25 // Default page size
}

/// A stored document rendered for the caller-facing boundary.
#[derive(Serialize, Debug, Clone)]
pub struct DocumentResponse {
    pub id: String,
    pub kind: String,
    pub fields: HashMap<String, Value>,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        let fields = document
            .fields()
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Self {
            id: document.id().as_str().to_string(),
            kind: document.kind().to_string(),
            fields,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct PageResponse {
    /// Records for the current page, in the backend's key order.
    pub documents: Vec<DocumentResponse>,
    pub limit: usize,
    pub offset: usize,
}

// --- Application Services (Use Cases) ---

// Sensible maximum page size to prevent abuse
const MAX_PAGE_LIMIT: usize = 1000;

/// Service for document CRUD, enumeration and tenant store lifecycle.
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
}

impl DocumentService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Validates a request and builds the domain document from it.
    fn build_document(request: UpsertDocumentRequest) -> Result<Document, RepositoryError> {
        if request.kind.trim().is_empty() {
            return Err(RepositoryError::InvalidInput(
                "Document kind cannot be empty".to_string(),
            ));
        }
        let mut document = match request.id {
            Some(id) if !id.trim().is_empty() => Document::new(request.kind).with_id(id),
            Some(_) => {
                return Err(RepositoryError::InvalidInput(
                    "Document id cannot be empty".to_string(),
                ));
            }
            None => Document::new(request.kind),
        };
        for (name, value) in &request.fields {
            let converted = FieldValue::from_json(name, value)
                .map_err(|e| RepositoryError::InvalidInput(e.to_string()))?;
            document.set_field(name.clone(), converted);
        }
        Ok(document)
    }

    /// Converts a JSON filter map into the typed filter used by `find`.
    fn build_filter(filter: HashMap<String, Value>) -> Result<FieldMap, RepositoryError> {
        let mut converted = FieldMap::new();
        for (name, value) in &filter {
            let typed = FieldValue::from_json(name, value)
                .map_err(|e| RepositoryError::InvalidInput(e.to_string()))?;
            converted.insert(name.clone(), typed);
        }
        Ok(converted)
    }

    /// Clamps a requested page size into `1..=MAX_PAGE_LIMIT`.
    fn clamp_limit(limit: usize) -> usize {
        limit.clamp(1, MAX_PAGE_LIMIT)
    }

    #[instrument(skip(self, request), fields(store = %store_id))]
    pub async fn create_document(
        &self,
        store_id: &str,
        request: UpsertDocumentRequest,
    ) -> Result<DocumentResponse, RepositoryError> {
        info!("Creating document");
        let document = Self::build_document(request)?;
        debug!(doc_id = %document.id().as_str(), kind = %document.kind(), "Request validated");
        let stored = self.store.create(store_id, &document).await?;
        Ok(stored.into())
    }

    /// Upsert with the same semantics as `create_document`.
    #[instrument(skip(self, request), fields(store = %store_id))]
    pub async fn update_document(
        &self,
        store_id: &str,
        request: UpsertDocumentRequest,
    ) -> Result<DocumentResponse, RepositoryError> {
        info!("Updating document");
        let document = Self::build_document(request)?;
        let stored = self.store.update(store_id, &document).await?;
        Ok(stored.into())
    }

    #[instrument(skip(self), fields(store = %store_id, doc_id = %id))]
    pub async fn get_document(
        &self,
        store_id: &str,
        id: &str,
    ) -> Result<DocumentResponse, RepositoryError> {
        info!("Retrieving document");
        let document = self.store.retrieve(store_id, &DocumentId::from(id)).await?;
        Ok(document.into())
    }

    #[instrument(skip(self), fields(store = %store_id, doc_id = %id))]
    pub async fn delete_document(&self, store_id: &str, id: &str) -> Result<(), RepositoryError> {
        info!("Deleting document");
        self.store.delete(store_id, &DocumentId::from(id)).await
    }

    #[instrument(skip(self, request), fields(store = %store_id, limit = request.limit, offset = request.offset))]
    pub async fn list_documents(
        &self,
        store_id: &str,
        request: ListRequest,
    ) -> Result<PageResponse, RepositoryError> {
        info!("Listing documents");
        let limit = Self::clamp_limit(request.limit);
        let documents = self.store.scan(store_id, request.offset, limit).await?;
        Ok(PageResponse {
            documents: documents.into_iter().map(Into::into).collect(),
            limit,
            offset: request.offset,
        })
    }

    #[instrument(skip(self, request), fields(store = %store_id, limit = request.limit, offset = request.offset))]
    pub async fn find_documents(
        &self,
        store_id: &str,
        request: FindRequest,
    ) -> Result<PageResponse, RepositoryError> {
        info!("Finding documents");
        let filter = Self::build_filter(request.filter)?;
        let limit = Self::clamp_limit(request.limit);
        let documents = self
            .store
            .find(store_id, &filter, request.offset, limit)
            .await?;
        Ok(PageResponse {
            documents: documents.into_iter().map(Into::into).collect(),
            limit,
            offset: request.offset,
        })
    }

    #[instrument(skip(self), fields(store = %store_id))]
    pub async fn create_store(&self, store_id: &str) -> Result<(), RepositoryError> {
        info!("Creating tenant store");
        self.store.open_or_create(store_id).await
    }

    #[instrument(skip(self), fields(store = %store_id))]
    pub async fn destroy_store(&self, store_id: &str) -> Result<(), RepositoryError> {
        warn!("Destroying tenant store (irreversible)");
        match self.store.destroy(store_id).await {
            Ok(()) => {
                info!("Tenant store destroyed");
                Ok(())
            }
            Err(e) => {
                error!("Failed to destroy tenant store: {}", e);
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(store = %store_id))]
    pub async fn flush_store(&self, store_id: &str) -> Result<(), RepositoryError> {
        info!("Flushing tenant store");
        self.store.flush(store_id).await
    }
}
