use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::utils;

/// Key/value persistence in the shape of browser local storage.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.items().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.items().remove(key);
        Ok(())
    }
}

/// Storage backed by one JSON object on disk. Every read goes to the file, so
/// a restarted process picks up whatever was last written.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(utils::load_json(&self.path)?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = utils::load_json(&self.path)?;
        items.insert(key.to_string(), value.to_string());
        utils::save_json(&items, &self.path)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = utils::load_json(&self.path)?;
        if items.remove(key).is_some() {
            utils::save_json(&items, &self.path)?;
        }
        Ok(())
    }
}

/// Change notification delivered to every attached tab except the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
    origin: Uuid,
}

/// A storage backend shared by several tabs, with change broadcast.
#[derive(Clone)]
pub struct SharedStore {
    storage: Arc<dyn Storage>,
    events: broadcast::Sender<StorageEvent>,
}

impl SharedStore {
    pub fn new(storage: impl Storage + 'static) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            storage: Arc::new(storage),
            events,
        }
    }

    pub fn memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Attaches a new tab with its own identity.
    pub fn attach(&self) -> TabStore {
        TabStore {
            id: Uuid::new_v4(),
            shared: self.clone(),
        }
    }
}

/// One tab's view of a [`SharedStore`].
#[derive(Clone)]
pub struct TabStore {
    id: Uuid,
    shared: SharedStore,
}

impl TabStore {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.shared.storage.get(key)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.shared.storage.set(key, value)?;
        self.broadcast(key, Some(value.to_string()));
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.shared.storage.remove(key)?;
        self.broadcast(key, None);
        Ok(())
    }

    /// Changes made through any other tab of the same store.
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            id: self.id,
            rx: self.shared.events.subscribe(),
        }
    }

    fn broadcast(&self, key: &str, new_value: Option<String>) {
        // No receivers just means no other tab is listening.
        let _ = self.shared.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
            origin: self.id,
        });
    }
}

pub struct StorageEvents {
    id: Uuid,
    rx: broadcast::Receiver<StorageEvent>,
}

impl StorageEvents {
    /// Next foreign change, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.id => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "storage listener lagged behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
