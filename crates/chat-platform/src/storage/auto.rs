//! Storage backend selection.
//!
//! Priority: localStorage → Memory (fallback)

use std::rc::Rc;
use chat_core::ports::StoragePort;
use chat_types::config::StorageBackendType;
use super::{LocalStorage, MemoryStorage};

const PROBE_KEY: &str = "__chat_storage_probe__";

/// Open the best available backend.
/// Returns a trait object so callers are backend-agnostic.
pub async fn auto_detect_storage() -> Rc<dyn StoragePort> {
    match probe_local_storage().await {
        Ok(storage) => {
            log::info!("Storage backend: localStorage");
            Rc::new(storage)
        }
        Err(e) => {
            log::warn!("localStorage unavailable ({}), falling back to memory", e);
            Rc::new(MemoryStorage::new())
        }
    }
}

/// Open the configured backend, falling back to memory.
pub async fn open_storage(backend: &StorageBackendType) -> Rc<dyn StoragePort> {
    match backend {
        StorageBackendType::Auto => auto_detect_storage().await,
        StorageBackendType::Memory => Rc::new(MemoryStorage::new()),
        StorageBackendType::LocalStorage => match LocalStorage::open() {
            Ok(storage) => Rc::new(storage),
            Err(e) => {
                log::warn!("{}, falling back to memory", e);
                Rc::new(MemoryStorage::new())
            }
        },
    }
}

/// localStorage can exist yet refuse writes, so check with a round trip.
async fn probe_local_storage() -> chat_types::Result<LocalStorage> {
    let storage = LocalStorage::open()?;
    storage.set(PROBE_KEY, b"1").await?;
    storage.delete(PROBE_KEY).await?;
    Ok(storage)
}
