//! Subject repository
//!
//! `SubjectStore` is the persistence seam for subject records. Two backends:
//! `MemoryStore` for tests and ephemeral runs, and `JsonFileStore`, which
//! keeps the whole map in memory and rewrites a JSON file atomically
//! (temp file + rename) after every mutation.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Persisted usage record for one subject. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    /// Time of the last successful delivery, if any
    #[serde(default)]
    pub last_usage: Option<u64>,
    /// Successful deliveries
    #[serde(default)]
    pub usage_count: u64,
    pub joined_at: u64,
    /// Generation requests received, successful or not
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl SubjectRecord {
    /// Fresh record for a subject first seen at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_usage: None,
            usage_count: 0,
            joined_at: now_ms,
            total_requests: 0,
            username: None,
            display_name: None,
        }
    }
}

/// In-place edit applied to a record under the store's lock.
pub type Mutation = Box<dyn FnOnce(&mut SubjectRecord) + Send>;

/// Repository of subject records.
///
/// `upsert` is an atomic read-modify-write: the record is created with
/// `SubjectRecord::new(now_ms)` if absent, the mutation runs, and the result
/// is persisted before the updated record is returned.
pub trait SubjectStore: Send + Sync {
    fn get<'a>(
        &'a self,
        subject: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubjectRecord>>> + Send + 'a>>;

    fn upsert<'a>(
        &'a self,
        subject: &'a str,
        now_ms: u64,
        mutation: Mutation,
    ) -> Pin<Box<dyn Future<Output = Result<SubjectRecord>> + Send + 'a>>;

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<(String, SubjectRecord)>>> + Send + '_>>;
}

fn apply(
    state: &mut HashMap<String, SubjectRecord>,
    subject: &str,
    now_ms: u64,
    mutation: Mutation,
) -> SubjectRecord {
    let record = state
        .entry(subject.to_string())
        .or_insert_with(|| SubjectRecord::new(now_ms));
    mutation(record);
    record.clone()
}

/// Non-durable store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<HashMap<String, SubjectRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubjectStore for MemoryStore {
    fn get<'a>(
        &'a self,
        subject: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubjectRecord>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.state.lock().await.get(subject).cloned()) })
    }

    fn upsert<'a>(
        &'a self,
        subject: &'a str,
        now_ms: u64,
        mutation: Mutation,
    ) -> Pin<Box<dyn Future<Output = Result<SubjectRecord>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Ok(apply(&mut state, subject, now_ms, mutation))
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<(String, SubjectRecord)>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        })
    }
}

/// JSON file store.
///
/// The Mutex serializes mutations so each write sees the result of the one
/// before it; the file on disk is never partially written.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, SubjectRecord>>,
}

impl JsonFileStore {
    /// Load records from `path`, creating an empty `{}` file if it does not exist.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading subject store: {e}")))?;
            let subjects: HashMap<String, SubjectRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing subject store: {e}")))?;
            info!(path = %path.display(), subjects = subjects.len(), "loaded subject store");
            subjects
        } else {
            info!(path = %path.display(), "subject store not found, starting empty");
            let empty = HashMap::new();
            write_atomic(&path, &empty).await?;
            empty
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl SubjectStore for JsonFileStore {
    fn get<'a>(
        &'a self,
        subject: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubjectRecord>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.state.lock().await.get(subject).cloned()) })
    }

    fn upsert<'a>(
        &'a self,
        subject: &'a str,
        now_ms: u64,
        mutation: Mutation,
    ) -> Pin<Box<dyn Future<Output = Result<SubjectRecord>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let updated = apply(&mut state, subject, now_ms, mutation);
            write_atomic(&self.path, &state).await?;
            debug!(subject, "persisted subject record");
            Ok(updated)
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<(String, SubjectRecord)>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        })
    }
}

/// Write the subject map to `path` via a temp file in the same directory.
///
/// Permissions are 0600 on unix: the file holds user identifiers.
async fn write_atomic(path: &Path, data: &HashMap<String, SubjectRecord>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing subject store: {e}")))?;

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let tmp_path = dir.join(format!(".subjects.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp subject store: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting subject store permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp subject store: {e}")))?;

    Ok(())
}
