//! Agent Memory
//!
//! One JSON file per agent holding its typed state.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{write_atomic, StoreError};

pub struct MemoryStore<T> {
    path: PathBuf,
    _state: PhantomData<T>,
}

impl<T> MemoryStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(dir: &Path, agent_name: &str) -> Self {
        Self {
            path: dir.join(format!("{}.json", agent_name)),
            _state: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means first run; an unreadable one starts over.
    pub fn load(&self) -> T {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Corrupt memory {}, starting fresh: {}", self.path.display(), e);
                T::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
            Err(e) => {
                log::warn!("Failed to read memory {}: {}", self.path.display(), e);
                T::default()
            }
        }
    }

    pub fn save(&self, state: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json)
    }
}
