//! Key/value persistence for conversations and preferences.
//!
//! Values are JSON strings under well-known keys, the same shape the web
//! client kept in browser storage. Writes are last-write-wins; nothing
//! coordinates two processes sharing a database.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::Conversation;

pub const CONVERSATIONS_KEY: &str = "conversations";
pub const DARK_MODE_KEY: &str = "darkMode";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait Storage: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Lives as long as the process, like a browser tab's session storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }
}

pub struct SqliteStorage {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        debug!("opened storage at {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// The `conversations` record list, most recently updated first.
pub struct ConversationStore {
    storage: Box<dyn Storage>,
}

impl ConversationStore {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Unreadable data is logged and treated as an empty history.
    ///
    /// Replies that were still streaming when they were saved come back
    /// finished, since nothing will ever append to them again.
    pub fn load(&self) -> Vec<Conversation> {
        let raw = match self.storage.get(CONVERSATIONS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("failed to read conversations: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<Conversation>>(&raw) {
            Ok(mut conversations) => {
                for c in conversations.iter_mut() {
                    if c.settle_interrupted() {
                        debug!("closed interrupted reply in conversation {}", c.id);
                    }
                }
                sort_recent_first(&mut conversations);
                conversations
            }
            Err(e) => {
                warn!("discarding unreadable conversation history: {}", e);
                Vec::new()
            }
        }
    }

    pub fn save_all(&mut self, conversations: &[Conversation]) -> Result<(), StorageError> {
        let json = serde_json::to_string(conversations)?;
        self.storage.set(CONVERSATIONS_KEY, &json)
    }

    pub fn upsert(&mut self, conversation: &Conversation) -> Result<(), StorageError> {
        let mut all = self.load();
        match all.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation.clone(),
            None => all.push(conversation.clone()),
        }
        sort_recent_first(&mut all);
        self.save_all(&all)
    }

    pub fn delete(&mut self, id: Uuid) -> Result<bool, StorageError> {
        let mut all = self.load();
        let before = all.len();
        all.retain(|c| c.id != id);
        if all.len() == before {
            return Ok(false);
        }
        self.save_all(&all)?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.storage.remove(CONVERSATIONS_KEY)
    }
}

fn sort_recent_first(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Persistent UI preferences.
pub struct Preferences {
    storage: Box<dyn Storage>,
}

impl Preferences {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn dark_mode(&self) -> bool {
        self.storage
            .get(DARK_MODE_KEY)
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str::<bool>(&raw).ok())
            .unwrap_or(true)
    }

    pub fn set_dark_mode(&mut self, enabled: bool) -> Result<(), StorageError> {
        self.storage.set(DARK_MODE_KEY, &serde_json::to_string(&enabled)?)
    }
}
