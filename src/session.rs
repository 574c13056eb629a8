//! # Session Manager
//!
//! Per-user isolation for the HTTP façade. Each session owns parsed
//! datasets keyed by filename plus a user-editable metadata map, and is
//! bounded by file count, per-file size, aggregate memory and a TTL.
//!
//! Locking is two-level: the session map is a concurrent map consulted
//! only to resolve a handle; each session is mutated under its own mutex.
//! Kernel work therefore never serializes across sessions. A single
//! background reaper task (spawned by the server) calls
//! [`SessionManager::cleanup_expired`] at a fixed cadence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::dataset::EchemDataset;

/// Default cap on files per session.
pub const MAX_FILES_PER_SESSION: usize = 100;
/// Default cap on a single uploaded file, in MiB.
pub const MAX_FILE_SIZE_MB: f64 = 50.0;
/// Default cap on a session's aggregate in-memory data, in MiB.
pub const MAX_MEMORY_PER_SESSION_MB: f64 = 500.0;
/// Default session TTL in hours.
pub const SESSION_TTL_HOURS: i64 = 24;
/// Default cadence of the background reaper, in minutes.
pub const CLEANUP_INTERVAL_MIN: u64 = 30;

/// Which quota an insertion violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    /// File count per session
    FileCount,
    /// Single-file size
    FileSize,
    /// Aggregate session memory
    Memory,
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuotaKind::FileCount => "file count",
            QuotaKind::FileSize => "file size",
            QuotaKind::Memory => "session memory",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A quota would be exceeded; reported per file in batch uploads
    #[error("Quota exceeded ({kind}): requested {want:.1}, limit {have:.1}")]
    QuotaExceeded {
        /// Which quota
        kind: QuotaKind,
        /// Requested amount (count or MiB)
        want: f64,
        /// The limit
        have: f64,
    },

    /// Unknown session id (or expired and reaped)
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Unknown dataset within a session
    #[error("File not found: {0}")]
    FileNotFound(String),
}

/// Session quotas and lifetime, overridable through the app config.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Maximum datasets per session
    pub max_files: usize,
    /// Maximum single-file size in MiB
    pub max_file_size_mb: f64,
    /// Maximum aggregate dataset memory per session in MiB
    pub max_memory_mb: f64,
    /// Idle lifetime before expiry
    pub ttl: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_files: MAX_FILES_PER_SESSION,
            max_file_size_mb: MAX_FILE_SIZE_MB,
            max_memory_mb: MAX_MEMORY_PER_SESSION_MB,
            ttl: Duration::hours(SESSION_TTL_HOURS),
        }
    }
}

/// All state belonging to one user session.
#[derive(Debug)]
pub struct SessionState {
    /// Opaque UUID identity
    pub session_id: String,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Advanced on every read or write; drives TTL expiry
    pub last_accessed: DateTime<Utc>,
    /// Parsed datasets keyed by filename
    pub datasets: HashMap<String, EchemDataset>,
    /// User-editable metadata per filename (labels, custom columns)
    pub file_metadata: HashMap<String, HashMap<String, String>>,
}

impl SessionState {
    fn new(session_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            last_accessed: now,
            datasets: HashMap::new(),
            file_metadata: HashMap::new(),
        }
    }

    /// Advance the access clock.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// Number of datasets held.
    pub fn file_count(&self) -> usize {
        self.datasets.len()
    }

    /// Estimated aggregate dataset memory in MiB.
    pub fn memory_estimate_mb(&self) -> f64 {
        self.datasets.values().map(EchemDataset::size_mb).sum()
    }

    /// Whether the session has outlived `ttl` since its last access.
    /// A session at exactly the TTL boundary counts as expired.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now() - self.last_accessed >= ttl
    }

    /// Patch the metadata map for one file. A `None` value deletes the key.
    pub fn update_metadata(&mut self, filename: &str, patch: HashMap<String, Option<String>>) {
        self.touch();
        if let Some(meta) = self.file_metadata.get_mut(filename) {
            for (key, value) in patch {
                match value {
                    Some(v) => {
                        meta.insert(key, v);
                    }
                    None => {
                        meta.remove(&key);
                    }
                }
            }
        }
    }

    /// Remove a dataset and its metadata.
    pub fn remove_dataset(&mut self, filename: &str) -> Result<(), SessionError> {
        self.touch();
        self.datasets
            .remove(filename)
            .ok_or_else(|| SessionError::FileNotFound(filename.to_string()))?;
        self.file_metadata.remove(filename);
        Ok(())
    }
}

/// Aggregate statistics over all live sessions.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SessionStats {
    /// Live (unexpired) sessions
    pub active_sessions: usize,
    /// Datasets across all sessions
    pub total_files: usize,
    /// Estimated memory across all sessions in MiB
    pub total_memory_mb: f64,
}

/// Process-wide registry of sessions.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Mutex<SessionState>>>,
    limits: SessionLimits,
}

impl SessionManager {
    /// Create a manager with the given limits.
    pub fn new(limits: SessionLimits) -> Self {
        Self { sessions: DashMap::new(), limits }
    }

    /// The configured limits.
    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// Create a fresh UUID-keyed session and return its id.
    pub fn create_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions
            .insert(id.clone(), Arc::new(Mutex::new(SessionState::new(id.clone()))));
        log::debug!("created session {id}");
        id
    }

    /// Resolve a session handle, dropping it first if expired. Touches the
    /// session on success.
    pub fn get_session(&self, session_id: &str) -> Option<Arc<Mutex<SessionState>>> {
        let handle = self.sessions.get(session_id)?.value().clone();
        {
            let mut session = handle.lock().expect("session mutex poisoned");
            if session.is_expired(self.limits.ttl) {
                drop(session);
                self.sessions.remove(session_id);
                return None;
            }
            session.touch();
        }
        Some(handle)
    }

    /// Return an existing live session or create a new one.
    ///
    /// The returned id differs from the argument when the presented id was
    /// unknown or expired.
    pub fn get_or_create(&self, session_id: Option<&str>) -> (String, Arc<Mutex<SessionState>>) {
        if let Some(id) = session_id {
            if let Some(handle) = self.get_session(id) {
                return (id.to_string(), handle);
            }
        }
        let id = self.create_session();
        let handle = self
            .sessions
            .get(&id)
            .map(|e| e.value().clone())
            .expect("session inserted above");
        (id, handle)
    }

    /// Insert a dataset, enforcing quotas atomically with the insertion.
    pub fn add_dataset(
        &self,
        session: &Mutex<SessionState>,
        dataset: EchemDataset,
    ) -> Result<(), SessionError> {
        let mut state = session.lock().expect("session mutex poisoned");
        state.touch();

        if state.file_count() >= self.limits.max_files {
            return Err(SessionError::QuotaExceeded {
                kind: QuotaKind::FileCount,
                want: (state.file_count() + 1) as f64,
                have: self.limits.max_files as f64,
            });
        }
        let size_mb = dataset.size_mb();
        if size_mb > self.limits.max_file_size_mb {
            return Err(SessionError::QuotaExceeded {
                kind: QuotaKind::FileSize,
                want: size_mb,
                have: self.limits.max_file_size_mb,
            });
        }
        let projected = state.memory_estimate_mb() + size_mb;
        if projected > self.limits.max_memory_mb {
            return Err(SessionError::QuotaExceeded {
                kind: QuotaKind::Memory,
                want: projected,
                have: self.limits.max_memory_mb,
            });
        }

        let mut meta = HashMap::new();
        meta.insert("label".to_string(), dataset.label.clone());
        state.file_metadata.insert(dataset.filename.clone(), meta);
        state.datasets.insert(dataset.filename.clone(), dataset);
        Ok(())
    }

    /// Delete a session outright.
    pub fn delete_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Drop every expired session; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.limits.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| {
            let state = handle.lock().expect("session mutex poisoned");
            !state.is_expired(ttl)
        });
        let removed = before - self.sessions.len();
        if removed > 0 {
            log::info!("reaped {removed} expired session(s)");
        }
        removed
    }

    /// Aggregate statistics over all sessions.
    pub fn stats(&self) -> SessionStats {
        let mut total_files = 0;
        let mut total_memory_mb = 0.0;
        for entry in self.sessions.iter() {
            let state = entry.value().lock().expect("session mutex poisoned");
            total_files += state.file_count();
            total_memory_mb += state.memory_estimate_mb();
        }
        SessionStats { active_sessions: self.sessions.len(), total_files, total_memory_mb }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DataTable;

    fn small_dataset(name: &str) -> EchemDataset {
        let table = DataTable::from_columns([("time_s".to_string(), vec![0.0, 1.0])]).unwrap();
        EchemDataset::new(name, table)
    }

    fn manager_with(max_files: usize) -> SessionManager {
        SessionManager::new(SessionLimits { max_files, ..Default::default() })
    }

    #[test]
    fn file_count_quota_enforced() {
        let mgr = manager_with(2);
        let (_, session) = mgr.get_or_create(None);

        mgr.add_dataset(&session, small_dataset("a.mpr")).unwrap();
        mgr.add_dataset(&session, small_dataset("b.mpr")).unwrap();
        let err = mgr.add_dataset(&session, small_dataset("c.mpr")).unwrap_err();
        assert!(matches!(
            err,
            SessionError::QuotaExceeded { kind: QuotaKind::FileCount, .. }
        ));
        assert_eq!(session.lock().unwrap().file_count(), 2);
    }

    #[test]
    fn unknown_session_creates_new_id() {
        let mgr = manager_with(10);
        let (id, _) = mgr.get_or_create(Some("not-a-session"));
        assert_ne!(id, "not-a-session");
        // Next call with the fresh id resolves the same session.
        let (id2, _) = mgr.get_or_create(Some(&id));
        assert_eq!(id, id2);
    }

    #[test]
    fn expired_session_is_unreachable() {
        let mgr = SessionManager::new(SessionLimits {
            ttl: Duration::zero(),
            ..Default::default()
        });
        let id = mgr.create_session();
        // TTL zero: already at the boundary, so expired on next access.
        assert!(mgr.get_session(&id).is_none());
        assert!(mgr.get_session(&id).is_none());
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let mgr = SessionManager::new(SessionLimits {
            ttl: Duration::hours(1),
            ..Default::default()
        });
        let keep = mgr.create_session();
        let drop_id = mgr.create_session();
        if let Some(handle) = mgr.sessions.get(&drop_id) {
            handle.lock().unwrap().last_accessed = Utc::now() - Duration::hours(2);
        }
        assert_eq!(mgr.cleanup_expired(), 1);
        assert!(mgr.get_session(&keep).is_some());
        assert!(mgr.get_session(&drop_id).is_none());
    }

    #[test]
    fn metadata_patch_deletes_on_null() {
        let mgr = manager_with(10);
        let (_, session) = mgr.get_or_create(None);
        mgr.add_dataset(&session, small_dataset("a.mpr")).unwrap();

        let mut state = session.lock().unwrap();
        let mut patch = HashMap::new();
        patch.insert("condition".to_string(), Some("1M KOH".to_string()));
        patch.insert("label".to_string(), None);
        state.update_metadata("a.mpr", patch);

        let meta = state.file_metadata.get("a.mpr").unwrap();
        assert_eq!(meta.get("condition").map(String::as_str), Some("1M KOH"));
        assert!(!meta.contains_key("label"));
    }

    #[test]
    fn stats_aggregate_sessions() {
        let mgr = manager_with(10);
        let (_, s1) = mgr.get_or_create(None);
        let (_, s2) = mgr.get_or_create(None);
        mgr.add_dataset(&s1, small_dataset("a.mpr")).unwrap();
        mgr.add_dataset(&s2, small_dataset("b.mpr")).unwrap();
        let stats = mgr.stats();
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.total_files, 2);
    }
}
