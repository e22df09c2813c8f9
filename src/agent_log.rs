//! Best-effort lifecycle records for every agent invocation.
//!
//! `start` hands back an optional id; terminal transitions run as detached
//! tasks on a [`TaskTracker`] and swallow every persistence failure. Nothing in
//! here may interrupt a turn.

use crate::error::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Orchestrator,
    WorldAdvance,
    FactionTurn,
    Narrator,
    SessionRecorder,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Orchestrator => "orchestrator",
            AgentKind::WorldAdvance => "world_advance",
            AgentKind::FactionTurn => "faction_turn",
            AgentKind::Narrator => "narrator",
            AgentKind::SessionRecorder => "session_recorder",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLogStatus {
    Started,
    Completed,
    Failed,
    Refused,
}

impl AgentLogStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentLogStatus::Started)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentLogId(Uuid);

impl AgentLogId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLogEntry {
    pub id: AgentLogId,
    pub conversation_id: Option<String>,
    pub agent_type: AgentKind,
    pub status: AgentLogStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert(&self, entry: AgentLogEntry) -> Result<(), PersistenceError>;
    async fn get(&self, id: AgentLogId) -> Result<AgentLogEntry, PersistenceError>;
    async fn update(&self, entry: AgentLogEntry) -> Result<(), PersistenceError>;
}

#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: Mutex<HashMap<AgentLogId, AgentLogEntry>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot ordered by start time.
    pub async fn entries(&self) -> Vec<AgentLogEntry> {
        let mut entries: Vec<_> = self.entries.lock().await.values().cloned().collect();
        entries.sort_by_key(|e| e.started_at);
        entries
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn insert(&self, entry: AgentLogEntry) -> Result<(), PersistenceError> {
        self.entries.lock().await.insert(entry.id, entry);
        Ok(())
    }

    async fn get(&self, id: AgentLogId) -> Result<AgentLogEntry, PersistenceError> {
        self.entries
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))
    }

    async fn update(&self, entry: AgentLogEntry) -> Result<(), PersistenceError> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry;
                Ok(())
            }
            None => Err(PersistenceError::NotFound(entry.id.to_string())),
        }
    }
}

/// One pretty-printed JSON file per entry under `dir`.
#[derive(Debug, Clone)]
pub struct FileLogStore {
    dir: PathBuf,
}

impl FileLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: AgentLogId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write(&self, entry: &AgentLogEntry) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_string_pretty(entry)?;
        tokio::fs::write(self.path_for(entry.id), data).await?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn insert(&self, entry: AgentLogEntry) -> Result<(), PersistenceError> {
        self.write(&entry).await
    }

    async fn get(&self, id: AgentLogId) -> Result<AgentLogEntry, PersistenceError> {
        let path = self.path_for(id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    async fn update(&self, entry: AgentLogEntry) -> Result<(), PersistenceError> {
        if !tokio::fs::try_exists(self.path_for(entry.id)).await? {
            return Err(PersistenceError::NotFound(entry.id.to_string()));
        }
        self.write(&entry).await
    }
}

#[derive(Clone)]
pub struct AgentLogger {
    store: Arc<dyn LogStore>,
    tasks: TaskTracker,
    // Serializes read-check-write of terminal transitions.
    transitions: Arc<Mutex<()>>,
}

impl AgentLogger {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self {
            store,
            tasks: TaskTracker::new(),
            transitions: Arc::new(Mutex::new(())),
        }
    }

    /// Record a `started` entry. `None` means logging is unavailable for this run;
    /// callers pass it on to the terminal calls unchanged.
    pub async fn start(
        &self,
        conversation_id: Option<&str>,
        agent: AgentKind,
        input: Option<Value>,
    ) -> Option<AgentLogId> {
        let entry = AgentLogEntry {
            id: AgentLogId::new(),
            conversation_id: conversation_id.map(str::to_string),
            agent_type: agent,
            status: AgentLogStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            input,
            output: None,
            error: None,
        };
        let id = entry.id;
        match self.store.insert(entry).await {
            Ok(()) => {
                log::debug!("Agent {agent} started, log id {id}");
                Some(id)
            }
            Err(e) => {
                log::warn!("Could not record start of agent {agent}: {e}");
                None
            }
        }
    }

    pub fn complete(&self, id: Option<AgentLogId>, output: Option<Value>) {
        self.dispatch(id, AgentLogStatus::Completed, output, None);
    }

    pub fn fail(&self, id: Option<AgentLogId>, error: impl Into<String>) {
        self.dispatch(id, AgentLogStatus::Failed, None, Some(error.into()));
    }

    pub fn refuse(&self, id: Option<AgentLogId>, reason: impl Into<String>) {
        let reason = reason.into();
        self.dispatch(
            id,
            AgentLogStatus::Refused,
            Some(Value::String(reason.clone())),
            Some(reason),
        );
    }

    /// Wait for every dispatched transition. The tracker is reopened afterwards
    /// so the logger stays usable.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn dispatch(
        &self,
        id: Option<AgentLogId>,
        status: AgentLogStatus,
        output: Option<Value>,
        error: Option<String>,
    ) {
        let Some(id) = id else {
            return;
        };
        let store = Arc::clone(&self.store);
        let transitions = Arc::clone(&self.transitions);
        self.tasks.spawn(async move {
            let _guard = transitions.lock().await;
            if let Err(e) = transition(store.as_ref(), id, status, output, error).await {
                log::warn!("Could not record {status:?} for agent log {id}: {e}");
            }
        });
    }
}

async fn transition(
    store: &dyn LogStore,
    id: AgentLogId,
    status: AgentLogStatus,
    output: Option<Value>,
    error: Option<String>,
) -> Result<(), PersistenceError> {
    let mut entry = store.get(id).await?;
    if entry.status.is_terminal() {
        return Err(PersistenceError::AlreadyTerminal(id.to_string()));
    }
    let now = Utc::now();
    entry.status = status;
    entry.completed_at = Some(now);
    entry.duration_ms = Some((now - entry.started_at).num_milliseconds().max(0));
    entry.output = output;
    entry.error = error;
    store.update(entry).await?;
    log::debug!("Agent log {id} -> {status:?}");
    Ok(())
}
