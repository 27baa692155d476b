//! Shared fakes for the engine integration tests.

#![allow(dead_code)]

use artifact_studio_core::{
    ChatMode, GenerationEvent, GenerationRequest, ModelTransport, PortError, PortResult,
    ProjectConfig, ProjectSession, QuotaState, QuotaStore, SessionStore, TextStream,
    TransportError,
};
use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

//=========================================================================================
// Stores
//=========================================================================================

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<Uuid, ProjectSession>>,
    saves: Mutex<usize>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }

    pub fn get(&self, id: Uuid) -> Option<ProjectSession> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_session(&self, session_id: Uuid) -> PortResult<ProjectSession> {
        self.get(session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn save_session(&self, session: &ProjectSession) -> PortResult<()> {
        *self.saves.lock().unwrap() += 1;
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn list_sessions(&self, owner_id: Uuid, limit: usize) -> PortResult<Vec<ProjectSession>> {
        let mut owned: Vec<ProjectSession> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        owned.truncate(limit);
        Ok(owned)
    }
}

#[derive(Default)]
pub struct InMemoryQuotaStore {
    quotas: Mutex<HashMap<Uuid, QuotaState>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, user_id: Uuid, quota: QuotaState) {
        self.quotas.lock().unwrap().insert(user_id, quota);
    }

    pub fn get(&self, user_id: Uuid) -> QuotaState {
        self.quotas
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn load_quota(&self, user_id: Uuid) -> PortResult<QuotaState> {
        Ok(self.get(user_id))
    }

    async fn save_quota(&self, user_id: Uuid, quota: &QuotaState) -> PortResult<()> {
        self.set(user_id, quota.clone());
        Ok(())
    }
}

//=========================================================================================
// Transports
//=========================================================================================

pub enum Attempt {
    Fail(TransportError),
    Deltas(Vec<Result<String, TransportError>>),
}

pub fn ok(deltas: &[&str]) -> Attempt {
    Attempt::Deltas(deltas.iter().map(|d| Ok(d.to_string())).collect())
}

pub fn limited() -> Attempt {
    Attempt::Fail(TransportError::rate_limited("429 Too Many Requests"))
}

/// Plays back one scripted attempt per call and records the requests it saw.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Attempt>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &GenerationRequest) -> Attempt {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Attempt::Fail(TransportError::fatal(None, "script exhausted")))
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        match self.next(request) {
            Attempt::Fail(err) => Err(err),
            Attempt::Deltas(deltas) => Ok(deltas.into_iter().filter_map(Result::ok).collect()),
        }
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TextStream, TransportError> {
        match self.next(request) {
            Attempt::Fail(err) => Err(err),
            Attempt::Deltas(deltas) => Ok(Box::pin(futures::stream::iter(deltas))),
        }
    }
}

/// A transport whose single stream is fed by the test through a channel.
pub struct ChannelTransport {
    receiver: Mutex<Option<fmpsc::UnboundedReceiver<Result<String, TransportError>>>>,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, fmpsc::UnboundedSender<Result<String, TransportError>>) {
        let (tx, rx) = fmpsc::unbounded();
        (
            Arc::new(Self {
                receiver: Mutex::new(Some(rx)),
            }),
            tx,
        )
    }
}

#[async_trait]
impl ModelTransport for ChannelTransport {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, TransportError> {
        Err(TransportError::fatal(None, "single-shot calls are not scripted"))
    }

    async fn generate_stream(&self, _request: &GenerationRequest) -> Result<TextStream, TransportError> {
        match self.receiver.lock().unwrap().take() {
            Some(rx) => Ok(Box::pin(rx)),
            None => Err(TransportError::fatal(None, "stream already taken")),
        }
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

pub fn config(mode: ChatMode) -> ProjectConfig {
    ProjectConfig {
        prompt: "a bakery landing page".to_string(),
        language: "HTML/CSS/JS".to_string(),
        model: "gemini-2.5-flash".to_string(),
        chat_mode: mode,
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<GenerationEvent>) -> Vec<GenerationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
