//! JSON file stores shared with the query front end.
//!
//! Both files are small whole-file JSON documents. Readers never fail: a missing,
//! empty or corrupt file is logged and treated as the empty state.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{
    domain::{ListingId, QuerySnapshot, QuerySpec, SeenSet, UserId},
    errors::Error,
    ports::{QueryStore, SeenStore},
    Result,
};

/// `queries.json`: `{"<chat id>": [QuerySpec, ...]}`.
#[derive(Clone, Debug)]
pub struct JsonQueryStore {
    path: PathBuf,
}

impl JsonQueryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl QueryStore for JsonQueryStore {
    fn load(&self) -> QuerySnapshot {
        let raw = match read_json_file(&self.path) {
            Ok(Some(v)) => v,
            Ok(None) => return QuerySnapshot::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "query store unreadable, using empty snapshot");
                return QuerySnapshot::new();
            }
        };
        parse_query_snapshot(raw)
    }
}

fn parse_query_snapshot(raw: serde_json::Value) -> QuerySnapshot {
    let serde_json::Value::Object(users) = raw else {
        warn!("query store is not a JSON object, using empty snapshot");
        return QuerySnapshot::new();
    };

    let mut snapshot = QuerySnapshot::new();
    for (key, queries) in users {
        let Ok(user) = key.trim().parse::<i64>() else {
            warn!(key = %key, "skipping non-numeric user id in query store");
            continue;
        };
        let serde_json::Value::Array(items) = queries else {
            warn!(user, "skipping non-array query list");
            continue;
        };

        let mut specs = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<QuerySpec>(item) {
                Ok(spec) if !spec.term.trim().is_empty() => specs.push(spec),
                Ok(_) => debug!(user, "skipping query with empty term"),
                Err(e) => warn!(user, error = %e, "skipping malformed query"),
            }
        }
        if !specs.is_empty() {
            snapshot.insert(UserId(user), specs);
        }
    }
    snapshot
}

/// `cached_ads.json`: a JSON array of listing ids.
#[derive(Clone, Debug)]
pub struct JsonSeenStore {
    path: PathBuf,
}

impl JsonSeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SeenStore for JsonSeenStore {
    fn load(&self) -> SeenSet {
        match read_json_file(&self.path) {
            Ok(Some(v)) => parse_seen_ids(v),
            Ok(None) => SeenSet::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "seen-set store unreadable, using empty set");
                SeenSet::new()
            }
        }
    }

    fn save(&self, seen: &SeenSet) -> Result<()> {
        let txt = serde_json::to_string_pretty(&seen.to_sorted_vec())?;
        write_atomic(&self.path, &txt)
    }
}

fn parse_seen_ids(raw: serde_json::Value) -> SeenSet {
    let serde_json::Value::Array(items) = raw else {
        warn!("seen-set store is not a JSON array, using empty set");
        return SeenSet::new();
    };
    items
        .iter()
        .filter_map(|v| match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
        .map(ListingId)
        .collect()
}

fn read_json_file(path: &Path) -> Result<Option<serde_json::Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let v = serde_json::from_str(&txt)?;
    Ok(Some(v))
}

/// Write via a sibling temp file + rename so readers never see a torn file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Store {
            path: path.to_path_buf(),
            reason: "path has no file name".to_string(),
        })?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// In-memory Query Store (tests, dry runs).
#[derive(Debug, Default)]
pub struct MemoryQueryStore {
    snapshot: Mutex<QuerySnapshot>,
}

impl MemoryQueryStore {
    pub fn new(snapshot: QuerySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn replace(&self, snapshot: QuerySnapshot) {
        if let Ok(mut guard) = self.snapshot.lock() {
            *guard = snapshot;
        }
    }
}

impl QueryStore for MemoryQueryStore {
    fn load(&self) -> QuerySnapshot {
        self.snapshot
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

/// In-memory Seen-Set Store that counts saves (tests, dry runs).
#[derive(Debug, Default)]
pub struct MemorySeenStore {
    seen: Mutex<SeenSet>,
    saves: Mutex<usize>,
}

impl MemorySeenStore {
    pub fn snapshot(&self) -> SeenSet {
        self.seen.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|g| *g).unwrap_or_default()
    }

    /// Simulate a concurrent writer (e.g. the front end priming a new query).
    pub fn insert_external(&self, id: ListingId) {
        if let Ok(mut guard) = self.seen.lock() {
            guard.insert(id);
        }
    }
}

impl SeenStore for MemorySeenStore {
    fn load(&self) -> SeenSet {
        self.snapshot()
    }

    fn save(&self, seen: &SeenSet) -> Result<()> {
        let mut guard = self
            .seen
            .lock()
            .map_err(|_| Error::External("seen store lock poisoned".to_string()))?;
        *guard = seen.clone();
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}
