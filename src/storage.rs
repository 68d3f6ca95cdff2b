use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use heapless::FnvIndexMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, RuntimeError};

const MAX_MEMORY_KEYS: usize = 32;

/// Persistent key-value store for credentials and application settings.
pub trait Storage {
    fn write(&mut self, key: &str, value: &str) -> Result<()>;
    fn read(&self, key: &str) -> Option<String>;
    /// Erase everything. Used by factory reset.
    fn clear(&mut self) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for alloc::boxed::Box<S> {
    fn write(&mut self, key: &str, value: &str) -> Result<()> {
        (**self).write(key, value)
    }

    fn read(&self, key: &str) -> Option<String> {
        (**self).read(key)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

/// Volatile storage; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: FnvIndexMap<String, String, MAX_MEMORY_KEYS>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn write(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries
            .insert(key.to_string(), value.to_string())
            .map(|_| ())
            .map_err(|_| RuntimeError::Storage("memory storage full".to_string()))
    }

    fn read(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// A JSON object on the host filesystem, rewritten on every change.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStorage {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unreadable or corrupt one is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| RuntimeError::Storage(alloc::format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(RuntimeError::Storage(alloc::format!("{}: {}", path.display(), e)))
            }
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| RuntimeError::Storage(e.to_string()))?;
        std::fs::write(&self.path, contents)
            .map_err(|e| RuntimeError::Storage(alloc::format!("{}: {}", self.path.display(), e)))
    }
}

impl Storage for FileStorage {
    fn write(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn read(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::Storage(alloc::format!("{}: {}", self.path.display(), e))),
        }
    }
}
