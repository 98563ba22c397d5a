//! Maps each queued action to the network call that delivers it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use thiserror::Error;

use crate::actions::{Action, ActionKind};
use crate::network::client::{ApiClient, Method};
use crate::network::NetworkError;
use crate::storage::QueuedAction;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{0}")]
    Network(#[from] NetworkError),

    #[error("No handler registered for action kind {0}")]
    UnknownKind(ActionKind),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl DispatchError {
    /// Transport failures and non-success responses may go through on a later
    /// attempt; everything else never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Network(_))
    }
}

/// Attempts delivery of one queued action.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, action: &QueuedAction) -> Result<(), DispatchError>;
}

/// Delivers actions of a single kind.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;

    async fn handle(&self, action: &Action) -> Result<(), DispatchError>;
}

/// One handler per action kind.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the stock handler for every kind, all sharing `client`.
    pub fn with_client(client: Arc<dyn ApiClient>) -> Self {
        Self::new()
            .register(QuestCompleteHandler::new(Arc::clone(&client)))
            .register(HealthSyncHandler::new(Arc::clone(&client)))
            .register(ProfileUpdateHandler::new(client))
    }

    /// Register `handler`, replacing any previous handler for its kind.
    pub fn register<H: ActionHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    pub fn handles(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[async_trait]
impl Dispatch for DispatchTable {
    async fn dispatch(&self, queued: &QueuedAction) -> Result<(), DispatchError> {
        let kind = queued.action.kind();
        let handler = match self.handlers.get(&kind) {
            Some(h) => Arc::clone(h),
            None => {
                log::error!("No dispatch handler for {} (action {})", kind, queued.id);
                return Err(DispatchError::UnknownKind(kind));
            }
        };

        handler.handle(&queued.action).await
    }
}

fn mismatch(expected: ActionKind, action: &Action) -> DispatchError {
    DispatchError::InvalidPayload(format!(
        "{} handler received a {} action",
        expected,
        action.kind()
    ))
}

/// `/quests/{quest_id}/complete` with the id percent-encoded as one segment.
fn quest_complete_path(quest_id: &str) -> Result<String, DispatchError> {
    if quest_id.trim().is_empty() {
        return Err(DispatchError::InvalidPayload("empty quest id".to_string()));
    }
    if quest_id == "." || quest_id == ".." {
        return Err(DispatchError::InvalidPayload(format!(
            "quest id {quest_id:?} is not a valid path segment"
        )));
    }

    let mut url = Url::parse("http://api.invalid/")
        .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| DispatchError::InvalidPayload("cannot build quest path".to_string()))?
        .clear()
        .extend(["quests", quest_id, "complete"]);

    Ok(url.path().to_string())
}

/// `POST /quests/{quest_id}/complete`
pub struct QuestCompleteHandler {
    client: Arc<dyn ApiClient>,
}

impl QuestCompleteHandler {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for QuestCompleteHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::QuestComplete
    }

    async fn handle(&self, action: &Action) -> Result<(), DispatchError> {
        let completion = match action {
            Action::QuestComplete(c) => c,
            other => return Err(mismatch(self.kind(), other)),
        };
        let path = quest_complete_path(&completion.quest_id)?;
        let body = json!({
            "value": completion.value,
            "completed_at": completion.completed_at,
        });
        self.client.call(Method::Post, &path, Some(body)).await?;
        Ok(())
    }
}

/// `POST /health/sync`
pub struct HealthSyncHandler {
    client: Arc<dyn ApiClient>,
}

impl HealthSyncHandler {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for HealthSyncHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::HealthSync
    }

    async fn handle(&self, action: &Action) -> Result<(), DispatchError> {
        let snapshot = match action {
            Action::HealthSync(s) => s,
            other => return Err(mismatch(self.kind(), other)),
        };

        let body = serde_json::to_value(snapshot)
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
        self.client.call(Method::Post, "/health/sync", Some(body)).await?;
        Ok(())
    }
}

/// `PATCH /profile` with only the fields that were set.
pub struct ProfileUpdateHandler {
    client: Arc<dyn ApiClient>,
}

impl ProfileUpdateHandler {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for ProfileUpdateHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ProfileUpdate
    }

    async fn handle(&self, action: &Action) -> Result<(), DispatchError> {
        let patch = match action {
            Action::ProfileUpdate(p) => p,
            other => return Err(mismatch(self.kind(), other)),
        };
        if patch.is_empty() {
            return Err(DispatchError::InvalidPayload(
                "profile patch has no fields".to_string(),
            ));
        }

        let body = serde_json::to_value(patch)
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
        self.client.call(Method::Patch, "/profile", Some(body)).await?;
        Ok(())
    }
}
