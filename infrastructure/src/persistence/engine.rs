use application::RepositoryError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rocksdb::{DB, DBCompressionType, Options};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Engine configuration shared by every tenant store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Fixed root prefix; each tenant lives at `<root>/<store_id>`
    pub root: PathBuf,
    /// Max open files per tenant handle (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per tenant handle (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir(),
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small buffers, dedicated root).
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }

    fn engine_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(DBCompressionType::Zstd);
        opts.set_max_open_files(self.max_open_files);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts
    }
}

/// Registry of long-lived tenant handles.
///
/// Exactly one engine handle exists per `store_id`; every operation shares
/// it through the registry instead of opening its own. The engine permits a
/// single concurrent holder per on-disk path.
pub struct StoreManager {
    config: StoreConfig,
    stores: DashMap<String, Arc<DB>>,
}

impl StoreManager {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            stores: DashMap::new(),
        }
    }

    /// On-disk location of a tenant store.
    pub fn store_path(&self, store_id: &str) -> PathBuf {
        self.config.root.join(store_id)
    }

    /// Returns the tenant handle, opening (and creating) the store on first
    /// access. Idempotent for an existing store.
    pub fn handle(&self, store_id: &str) -> Result<Arc<DB>, RepositoryError> {
        if let Some(db) = self.stores.get(store_id) {
            return Ok(db.clone());
        }
        match self.stores.entry(store_id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let path = self.store_path(store_id);
                debug!(store = %store_id, path = %path.display(), "Opening tenant store");
                let db = DB::open(&self.config.engine_options(), &path).map_err(|e| {
                    error!(store = %store_id, "Failed to open tenant store: {}", e);
                    RepositoryError::backend(store_id, e)
                })?;
                let db = Arc::new(db);
                entry.insert(db.clone());
                Ok(db)
            }
        }
    }

    /// Irreversibly removes the tenant's on-disk data.
    ///
    /// Takes the registry entry and requires sole ownership of the handle
    /// before touching the filesystem; an entry still shared with an
    /// in-flight operation is put back and the destroy fails. A racing
    /// holder of the path lock makes the engine-level destroy fail too.
    pub fn destroy(&self, store_id: &str) -> Result<(), RepositoryError> {
        let path = self.store_path(store_id);
        match self.stores.remove(store_id) {
            Some((key, db)) => match Arc::try_unwrap(db) {
                Ok(db) => {
                    drop(db);
                    DB::destroy(&Options::default(), &path).map_err(|e| {
                        error!(store = %store_id, "Failed to destroy tenant store: {}", e);
                        RepositoryError::Destroy {
                            store: store_id.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    info!(store = %store_id, "Tenant store destroyed");
                    Ok(())
                }
                Err(db) => {
                    self.stores.insert(key, db);
                    error!(store = %store_id, "Refusing to destroy tenant store with a held handle");
                    Err(RepositoryError::Destroy {
                        store: store_id.to_string(),
                        reason: "handle is held by a concurrent operation".to_string(),
                    })
                }
            },
            None => {
                if !path.exists() {
                    error!(store = %store_id, "Cannot destroy a tenant store that does not exist");
                    return Err(RepositoryError::Destroy {
                        store: store_id.to_string(),
                        reason: "store does not exist".to_string(),
                    });
                }
                // On disk but never opened by this process; the engine still
                // refuses if another holder has the path locked.
                DB::destroy(&Options::default(), &path).map_err(|e| {
                    error!(store = %store_id, "Failed to destroy tenant store: {}", e);
                    RepositoryError::Destroy {
                        store: store_id.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                info!(store = %store_id, "Tenant store destroyed");
                Ok(())
            }
        }
    }

    /// Releases the tenant handle without touching on-disk data.
    ///
    /// The engine handle closes once in-flight operations drop their clones;
    /// the next access reopens the store.
    pub fn close(&self, store_id: &str) {
        if self.stores.remove(store_id).is_some() {
            debug!(store = %store_id, "Released tenant handle");
        }
    }

    /// Forces buffered mutations to durable storage before returning.
    pub fn flush(&self, store_id: &str) -> Result<(), RepositoryError> {
        let db = self.handle(store_id)?;
        db.flush().map_err(|e| {
            error!(store = %store_id, "Failed to flush tenant store: {}", e);
            RepositoryError::backend(store_id, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (StoreManager, TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        (StoreManager::new(StoreConfig::for_testing(dir.path())), dir)
    }

    #[test]
    fn handle_is_shared_not_reopened() {
        let (manager, _dir) = manager();
        let first = manager.handle("tenant").unwrap();
        let second = manager.handle("tenant").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn close_releases_the_handle_for_destroy() {
        let (manager, _dir) = manager();
        let held = manager.handle("tenant").unwrap();

        manager.close("tenant");
        // The registry no longer owns it, but the clone keeps the path
        // locked until dropped
        drop(held);
        manager.destroy("tenant").unwrap();
        assert!(!manager.store_path("tenant").exists());
    }

    #[test]
    fn destroy_of_a_never_opened_path_still_works() {
        let (manager, _dir) = manager();
        {
            let _db = manager.handle("tenant").unwrap();
        }
        manager.close("tenant");

        // A fresh registry over the same root has no cached handle
        let fresh = StoreManager::new(StoreConfig::for_testing(
            manager.store_path("tenant").parent().unwrap(),
        ));
        fresh.destroy("tenant").unwrap();
        assert!(!fresh.store_path("tenant").exists());
    }
}
