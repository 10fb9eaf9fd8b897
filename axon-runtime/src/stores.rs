//! Run and memory stores, plus the persistence subscriber.
//!
//! The in-memory implementations back tests and short-lived processes.
//! Writes are at-least-once from the runtime's perspective; consumers key
//! on `(run_id, monotonic_seq)` for idempotence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use axon_hooks::Subscriber;
use axon_types::{
    AgentId, EventPayload, EventRecord, HookError, MemoryEntry, MemoryReader, RunEvent, RunId,
    RunRecord, RunStatus, SessionId, StoreError,
};

/// Persistence surface for run records and the event log.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or update a run record. Idempotent by run id: the original
    /// `started_at` survives later upserts.
    async fn upsert_run(&self, record: RunRecord) -> Result<(), StoreError>;

    /// Append an event, assigning the next monotonic sequence number within
    /// the run.
    async fn append_event(&self, event: &RunEvent) -> Result<EventRecord, StoreError>;

    /// Load a run record.
    async fn load_run(&self, run_id: &RunId) -> Result<RunRecord, StoreError>;

    /// The run's event log, in sequence order.
    async fn list_events(&self, run_id: &RunId) -> Result<Vec<EventRecord>, StoreError>;
}

/// Agent memory: a readable, appendable note stream per session/agent pair.
#[async_trait]
pub trait MemoryStore: MemoryReader {
    /// Append a note.
    async fn append(&self, entry: MemoryEntry) -> Result<(), StoreError>;
}

/// In-memory run store backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, RunRecord>>,
    events: RwLock<HashMap<RunId, Vec<EventRecord>>>,
}

impl InMemoryRunStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn upsert_run(&self, mut record: RunRecord) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.get(&record.run_id) {
            record.started_at = existing.started_at;
        }
        runs.insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn append_event(&self, event: &RunEvent) -> Result<EventRecord, StoreError> {
        let payload_json = serde_json::to_value(event)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let event_type = payload_json
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("unknown")
            .to_string();
        let mut events = self.events.write().await;
        let log = events.entry(event.run_id.clone()).or_default();
        let record = EventRecord {
            event_type,
            run_id: event.run_id.clone(),
            agent_id: event.agent_id.clone(),
            session_id: event.session_id.clone(),
            turn_id: event.turn_id.clone(),
            payload_json,
            monotonic_seq: log.len() as u64,
        };
        log.push(record.clone());
        Ok(record)
    }

    async fn load_run(&self, run_id: &RunId) -> Result<RunRecord, StoreError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))
    }

    async fn list_events(&self, run_id: &RunId) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory memory store.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    notes: RwLock<HashMap<(SessionId, AgentId), Vec<MemoryEntry>>>,
}

impl InMemoryMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryReader for InMemoryMemoryStore {
    async fn read(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        let notes = self.notes.read().await;
        let stream = notes
            .get(&(session_id.clone(), agent_id.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(stream.into_iter().take(limit).collect())
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn append(&self, entry: MemoryEntry) -> Result<(), StoreError> {
        self.notes
            .write()
            .await
            .entry((entry.session_id.clone(), entry.agent_id.clone()))
            .or_default()
            .push(entry);
        Ok(())
    }
}

/// File-backed memory store: one JSON file per session/agent stream at
/// `{directory}/{session_id}__{agent_id}.json`. Suitable for single-process
/// deployments that need notes to survive restarts.
#[derive(Debug, Clone)]
pub struct FileMemoryStore {
    directory: PathBuf,
}

impl FileMemoryStore {
    /// Create a store rooted at the given directory. The directory is
    /// created on the first append.
    #[must_use]
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    fn path_for(&self, session_id: &SessionId, agent_id: &AgentId) -> PathBuf {
        self.directory
            .join(format!("{session_id}__{agent_id}.json"))
    }

    async fn load(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        let path = self.path_for(session_id, agent_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Other(Box::new(e))),
        };
        serde_json::from_str(&data).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl MemoryReader for FileMemoryStore {
    async fn read(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        let stream = self.load(session_id, agent_id).await?;
        Ok(stream.into_iter().take(limit).collect())
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn append(&self, entry: MemoryEntry) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| StoreError::Other(Box::new(e)))?;
        let mut stream = self.load(&entry.session_id, &entry.agent_id).await?;
        let path = self.path_for(&entry.session_id, &entry.agent_id);
        stream.push(entry);
        let json = serde_json::to_string_pretty(&stream)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StoreError::Other(Box::new(e)))
    }
}

/// Hook subscriber that persists events and keeps run records current.
pub struct PersistenceSubscriber {
    store: Arc<dyn RunStore>,
}

impl PersistenceSubscriber {
    /// Create a subscriber over a run store.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    fn status_for(event: &RunEvent) -> Option<RunStatus> {
        match &event.payload {
            EventPayload::RunStarted { .. } | EventPayload::RunResumed { .. } => {
                Some(RunStatus::Running)
            }
            EventPayload::RunPaused { .. } => Some(RunStatus::Paused),
            EventPayload::RunCompleted { status, .. } => Some(match status {
                axon_types::CompletionStatus::Success => RunStatus::Completed,
                axon_types::CompletionStatus::Failed => RunStatus::Failed,
                axon_types::CompletionStatus::Canceled => RunStatus::Canceled,
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl Subscriber for PersistenceSubscriber {
    async fn on_event(&self, event: &RunEvent) -> Result<(), HookError> {
        self.store
            .append_event(event)
            .await
            .map_err(|e| HookError::Subscriber(e.to_string()))?;
        if let Some(status) = Self::status_for(event) {
            let record = RunRecord {
                agent_id: event.agent_id.clone(),
                run_id: event.run_id.clone(),
                session_id: event.session_id.clone(),
                turn_id: event.turn_id.clone(),
                status,
                started_at: event.at,
                updated_at: event.at,
                labels: HashMap::new(),
                metadata: serde_json::Value::Null,
            };
            self.store
                .upsert_run(record)
                .await
                .map_err(|e| HookError::Subscriber(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_types::{RunContext, Usage};
    use chrono::Utc;

    fn event(payload: EventPayload) -> RunEvent {
        let ctx = RunContext::top_level("svc.chat".into(), "r-1".into(), "s-1".into());
        RunEvent::stamp(&ctx, Utc::now(), payload)
    }

    #[tokio::test]
    async fn upsert_preserves_started_at() {
        let store = InMemoryRunStore::new();
        let first = RunRecord {
            agent_id: "svc.chat".into(),
            run_id: "r-1".into(),
            session_id: "s-1".into(),
            turn_id: None,
            status: RunStatus::Running,
            started_at: Utc::now(),
            updated_at: Utc::now(),
            labels: HashMap::new(),
            metadata: serde_json::Value::Null,
        };
        store.upsert_run(first.clone()).await.unwrap();
        let mut second = first.clone();
        second.started_at = Utc::now() + chrono::Duration::hours(1);
        second.status = RunStatus::Completed;
        store.upsert_run(second).await.unwrap();
        let loaded = store.load_run(&"r-1".into()).await.unwrap();
        assert_eq!(loaded.started_at, first.started_at);
        assert_eq!(loaded.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn event_log_sequences_monotonically() {
        let store = InMemoryRunStore::new();
        for attempt in 1..=3 {
            store
                .append_event(&event(EventPayload::RunStarted { attempt }))
                .await
                .unwrap();
        }
        let log = store.list_events(&"r-1".into()).await.unwrap();
        let seqs: Vec<u64> = log.iter().map(|r| r.monotonic_seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(log[0].event_type, "run_started");
    }

    #[tokio::test]
    async fn persistence_subscriber_tracks_status() {
        let store = Arc::new(InMemoryRunStore::new());
        let subscriber = PersistenceSubscriber::new(store.clone());
        subscriber
            .on_event(&event(EventPayload::RunStarted { attempt: 1 }))
            .await
            .unwrap();
        subscriber
            .on_event(&event(EventPayload::Usage {
                usage: Usage::default(),
            }))
            .await
            .unwrap();
        subscriber
            .on_event(&event(EventPayload::RunPaused {
                reason: axon_types::PauseReason::Human,
                detail: None,
            }))
            .await
            .unwrap();
        let record = store.load_run(&"r-1".into()).await.unwrap();
        assert_eq!(record.status, RunStatus::Paused);
        assert_eq!(store.list_events(&"r-1".into()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn memory_round_trips() {
        let store = InMemoryMemoryStore::new();
        store
            .append(MemoryEntry {
                session_id: "s-1".into(),
                agent_id: "svc.chat".into(),
                note: "prefers brevity".into(),
                at: Utc::now(),
            })
            .await
            .unwrap();
        let notes = store
            .read(&"s-1".into(), &"svc.chat".into(), 10)
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].note, "prefers brevity");
    }

    fn note(session: &str, agent: &str, text: &str) -> MemoryEntry {
        MemoryEntry {
            session_id: session.into(),
            agent_id: agent.into(),
            note: text.into(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn file_memory_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::new(dir.path().to_path_buf());
        store.append(note("s-1", "svc.chat", "first")).await.unwrap();
        store.append(note("s-1", "svc.chat", "second")).await.unwrap();
        store.append(note("s-2", "svc.chat", "other session")).await.unwrap();

        let notes = store
            .read(&"s-1".into(), &"svc.chat".into(), 10)
            .await
            .unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].note, "first");
        assert_eq!(notes[1].note, "second");

        let limited = store
            .read(&"s-1".into(), &"svc.chat".into(), 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn file_memory_store_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileMemoryStore::new(dir.path().to_path_buf());
            store.append(note("s-1", "svc.chat", "durable")).await.unwrap();
        }
        let reopened = FileMemoryStore::new(dir.path().to_path_buf());
        let notes = reopened
            .read(&"s-1".into(), &"svc.chat".into(), 10)
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].note, "durable");
    }

    #[tokio::test]
    async fn file_memory_store_reads_empty_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::new(dir.path().to_path_buf());
        let notes = store
            .read(&"s-none".into(), &"svc.chat".into(), 10)
            .await
            .unwrap();
        assert!(notes.is_empty());
    }
}
