//! Client-side proof store.
//!
//! Mirrors the browser storage the Anon Aadhaar SDK writes to: string values
//! under string keys. The session value is a JSON document holding the
//! prover status and every proof generated so far.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::session::ProofStatus;

/// Key the SDK stores its session under.
pub const DEFAULT_STORE_KEY: &str = "anonAadhaar";

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while reading or writing the proof store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed store contents: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Store file {0:?} is not a JSON object")]
    NotAnObject(PathBuf),

    #[error("Stored proof {0:?} has no pcd")]
    MissingPcd(String),
}

/// String key-value storage.
pub trait ProofStore: Send + Sync {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// Store backed by a JSON object on disk.
#[derive(Debug, Clone)]
pub struct FileProofStore {
    path: PathBuf,
}

impl FileProofStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> StoreResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject(self.path.clone())),
        }
    }
}

impl ProofStore for FileProofStore {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        let mut items = self.read_all()?;
        Ok(items.remove(key).map(|value| match value {
            Value::String(s) => s,
            // Tolerate hand-edited files holding the document inline.
            other => other.to_string(),
        }))
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut items = self.read_all()?;
        items.insert(key.to_string(), Value::String(value.to_string()));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&Value::Object(items))?)?;
        debug!(path = ?self.path, key, "proof store updated");
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryProofStore {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryProofStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProofStore for MemoryProofStore {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The session document written by the SDK.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: ProofStatus,
    #[serde(default)]
    pub anon_aadhaar_proofs: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoredSession {
    pub fn parse(raw: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn is_empty(&self) -> bool {
        self.anon_aadhaar_proofs.is_empty()
    }

    /// Proof keys in insertion order.
    ///
    /// Array-index keys come first in ascending numeric order, followed by
    /// any other keys in the order they were written.
    pub fn insertion_order(&self) -> Vec<&str> {
        let (mut indexed, named): (Vec<&str>, Vec<&str>) = self
            .anon_aadhaar_proofs
            .keys()
            .map(String::as_str)
            .partition(|key| array_index(key).is_some());
        indexed.sort_by_key(|key| array_index(key));
        indexed.extend(named);
        indexed
    }

    /// Key and serialized PCD of the most recently added proof.
    pub fn latest_pcd(&self) -> StoreResult<Option<(String, String)>> {
        let Some(key) = self.insertion_order().last().map(|k| k.to_string()) else {
            return Ok(None);
        };
        let entry = &self.anon_aadhaar_proofs[&key];
        let pcd = match entry.get("pcd") {
            Some(Value::String(pcd)) => pcd.clone(),
            Some(value @ Value::Object(_)) => value.to_string(),
            _ => return Err(StoreError::MissingPcd(key)),
        };
        Ok(Some((key, pcd)))
    }

    /// Append a proof under the next array index and mark the session
    /// logged in. Returns the key used.
    pub fn push_pcd(&mut self, pcd: &str) -> String {
        let next = self
            .anon_aadhaar_proofs
            .keys()
            .filter_map(|key| array_index(key))
            .max()
            .map_or(0, |max| max + 1);
        let key = next.to_string();

        let mut entry = Map::new();
        entry.insert("pcd".to_string(), Value::String(pcd.to_string()));
        self.anon_aadhaar_proofs.insert(key.clone(), Value::Object(entry));
        self.status = ProofStatus::LoggedIn;
        key
    }
}

/// An unrecognised status never blocks reading the stored proofs.
fn lenient_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ProofStatus, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw.clone()).unwrap_or_else(|_| {
        debug!(status = %raw, "unrecognised proof status, treating as logged out");
        ProofStatus::default()
    }))
}

/// Canonical array index (`"0"`, `"17"`, never `"007"`).
fn array_index(key: &str) -> Option<u32> {
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse::<u32>().ok().filter(|index| *index != u32::MAX)
}

/// Read the session document, if one has been written.
pub fn read_session(store: &dyn ProofStore, key: &str) -> StoreResult<Option<StoredSession>> {
    store
        .get_item(key)?
        .map(|raw| StoredSession::parse(&raw))
        .transpose()
}

/// Serialized PCD of the most recent proof, if any.
pub fn latest_pcd(store: &dyn ProofStore, key: &str) -> StoreResult<Option<String>> {
    let Some(session) = read_session(store, key)? else {
        return Ok(None);
    };
    Ok(session.latest_pcd()?.map(|(index, pcd)| {
        debug!(index = %index, "selected latest stored proof");
        pcd
    }))
}

/// Append a serialized PCD to the store.
pub fn import_pcd(store: &dyn ProofStore, key: &str, pcd: &str) -> StoreResult<String> {
    let mut session = read_session(store, key)?.unwrap_or_default();
    let index = session.push_pcd(pcd);
    store.set_item(key, &serde_json::to_string(&session)?)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_with(proofs: Value) -> String {
        json!({ "status": "logged-in", "anonAadhaarProofs": proofs }).to_string()
    }

    #[test]
    fn test_missing_key_yields_nothing() {
        let store = MemoryProofStore::new();
        assert!(latest_pcd(&store, DEFAULT_STORE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_empty_proof_map_yields_nothing() {
        let store = MemoryProofStore::new();
        store.set_item(DEFAULT_STORE_KEY, &session_with(json!({}))).unwrap();

        assert!(latest_pcd(&store, DEFAULT_STORE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_latest_is_highest_index() {
        let store = MemoryProofStore::new();
        let proofs = json!({
            "0": { "pcd": "first" },
            "2": { "pcd": "third" },
            "1": { "pcd": "second" },
        });
        store.set_item(DEFAULT_STORE_KEY, &session_with(proofs)).unwrap();

        assert_eq!(latest_pcd(&store, DEFAULT_STORE_KEY).unwrap().as_deref(), Some("third"));
    }

    #[test]
    fn test_index_order_is_numeric() {
        let mut entries = Map::new();
        for i in 0..=10 {
            entries.insert(i.to_string(), json!({ "pcd": format!("pcd-{i}") }));
        }
        let session = StoredSession {
            anon_aadhaar_proofs: entries,
            ..Default::default()
        };

        let (key, pcd) = session.latest_pcd().unwrap().unwrap();
        assert_eq!(key, "10");
        assert_eq!(pcd, "pcd-10");
    }

    #[test]
    fn test_named_keys_follow_indices() {
        let proofs = json!({
            "session-b": { "pcd": "named" },
            "5": { "pcd": "indexed" },
        });
        let session = StoredSession::parse(&session_with(proofs)).unwrap();

        assert_eq!(session.insertion_order(), vec!["5", "session-b"]);
        assert_eq!(session.latest_pcd().unwrap().unwrap().1, "named");
    }

    #[test]
    fn test_session_written_mid_login() {
        let store = MemoryProofStore::new();
        let logging_in = |proofs: Value| json!({ "status": "logging-in", "anonAadhaarProofs": proofs }).to_string();

        store.set_item(DEFAULT_STORE_KEY, &logging_in(json!({}))).unwrap();
        assert!(latest_pcd(&store, DEFAULT_STORE_KEY).unwrap().is_none());

        store.set_item(DEFAULT_STORE_KEY, &logging_in(json!({ "0": { "pcd": "x" } }))).unwrap();
        assert_eq!(latest_pcd(&store, DEFAULT_STORE_KEY).unwrap().as_deref(), Some("x"));
        let session = read_session(&store, DEFAULT_STORE_KEY).unwrap().unwrap();
        assert_eq!(session.status, ProofStatus::LoggingIn);
    }

    #[test]
    fn test_unknown_status_still_loads_proofs() {
        let raw = json!({ "status": "verifying", "anonAadhaarProofs": { "0": { "pcd": "x" } } }).to_string();
        let session = StoredSession::parse(&raw).unwrap();

        assert_eq!(session.status, ProofStatus::LoggedOut);
        assert_eq!(session.latest_pcd().unwrap().unwrap().1, "x");

        let without_status = json!({ "anonAadhaarProofs": {} }).to_string();
        assert_eq!(StoredSession::parse(&without_status).unwrap().status, ProofStatus::LoggedOut);
    }

    #[test]
    fn test_entry_without_pcd() {
        let session = StoredSession::parse(&session_with(json!({ "0": { "other": 1 } }))).unwrap();
        assert!(matches!(session.latest_pcd(), Err(StoreError::MissingPcd(k)) if k == "0"));
    }

    #[test]
    fn test_malformed_session() {
        let store = MemoryProofStore::new();
        store.set_item(DEFAULT_STORE_KEY, "{not json").unwrap();
        assert!(matches!(
            latest_pcd(&store, DEFAULT_STORE_KEY),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn test_import_appends_and_logs_in() {
        let store = MemoryProofStore::new();

        assert_eq!(import_pcd(&store, DEFAULT_STORE_KEY, "a").unwrap(), "0");
        assert_eq!(import_pcd(&store, DEFAULT_STORE_KEY, "b").unwrap(), "1");

        let session = read_session(&store, DEFAULT_STORE_KEY).unwrap().unwrap();
        assert_eq!(session.status, ProofStatus::LoggedIn);
        assert_eq!(latest_pcd(&store, DEFAULT_STORE_KEY).unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");
        let store = FileProofStore::new(&path);

        assert!(store.get_item(DEFAULT_STORE_KEY).unwrap().is_none());
        import_pcd(&store, DEFAULT_STORE_KEY, "stored").unwrap();
        store.set_item("unrelated", "kept").unwrap();

        let reopened = FileProofStore::new(&path);
        assert_eq!(
            latest_pcd(&reopened, DEFAULT_STORE_KEY).unwrap().as_deref(),
            Some("stored")
        );
        assert_eq!(reopened.get_item("unrelated").unwrap().as_deref(), Some("kept"));
    }

    #[test]
    fn test_file_store_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        assert!(matches!(
            FileProofStore::new(&path).get_item(DEFAULT_STORE_KEY),
            Err(StoreError::NotAnObject(_))
        ));
    }
}
