use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::app::domain::message::{GlobalSessionState, LocalSessionState, Message, MessageUpdate};
use crate::app::domain::types::{AppId, EventId, MessageId, SessionId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Migration error: {message}")]
    Migration { message: String },

    #[error("In-memory store lock poisoned: {message}")]
    LockPoisoned { message: String },
}

impl StoreError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn lock_poisoned(message: impl Into<String>) -> Self {
        Self::LockPoisoned {
            message: message.into(),
        }
    }
}

/// Durable local store for messages and scoped session state.
///
/// Every `put_*` is an upsert keyed by the record's identity.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put_message(&self, message: &Message) -> Result<(), StoreError>;

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, StoreError>;

    /// Messages of a session ordered by timestamp.
    async fn query_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError>;

    async fn put_local_state(&self, state: &LocalSessionState) -> Result<(), StoreError>;

    async fn put_global_state(&self, state: &GlobalSessionState) -> Result<(), StoreError>;

    async fn load_local_state(
        &self,
        session_id: &SessionId,
        event_id: &EventId,
    ) -> Result<Option<LocalSessionState>, StoreError>;

    async fn load_global_state(
        &self,
        app_id: &AppId,
        event_id: &EventId,
    ) -> Result<Option<GlobalSessionState>, StoreError>;
}

/// Apply a user edit to a stored message. The id never changes.
pub async fn update_message(
    store: &dyn SessionStore,
    id: &MessageId,
    update: MessageUpdate,
) -> Result<Message, StoreError> {
    let mut message = store
        .get_message(id)
        .await?
        .ok_or_else(|| StoreError::MessageNotFound {
            message_id: id.to_string(),
        })?;
    update.apply(&mut message);
    store.put_message(&message).await?;
    Ok(message)
}

pub struct InMemorySessionStore {
    messages: RwLock<IndexMap<MessageId, Message>>,
    local: RwLock<HashMap<(SessionId, EventId), LocalSessionState>>,
    global: RwLock<HashMap<(AppId, EventId), GlobalSessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(IndexMap::new()),
            local: RwLock::new(HashMap::new()),
            global: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|_| StoreError::lock_poisoned("messages"))?;
        messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let messages = self
            .messages
            .read()
            .map_err(|_| StoreError::lock_poisoned("messages"))?;
        Ok(messages.get(id).cloned())
    }

    async fn query_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let messages = self
            .messages
            .read()
            .map_err(|_| StoreError::lock_poisoned("messages"))?;
        let mut found: Vec<Message> = messages
            .values()
            .filter(|m| &m.session_id == session_id)
            .cloned()
            .collect();
        // Stable: equal timestamps keep first-insertion order.
        found.sort_by_key(|m| m.timestamp);
        Ok(found)
    }

    async fn put_local_state(&self, state: &LocalSessionState) -> Result<(), StoreError> {
        let mut local = self
            .local
            .write()
            .map_err(|_| StoreError::lock_poisoned("local state"))?;
        local.insert(
            (state.session_id.clone(), state.event_id.clone()),
            state.clone(),
        );
        Ok(())
    }

    async fn put_global_state(&self, state: &GlobalSessionState) -> Result<(), StoreError> {
        let mut global = self
            .global
            .write()
            .map_err(|_| StoreError::lock_poisoned("global state"))?;
        global.insert((state.app_id.clone(), state.event_id.clone()), state.clone());
        Ok(())
    }

    async fn load_local_state(
        &self,
        session_id: &SessionId,
        event_id: &EventId,
    ) -> Result<Option<LocalSessionState>, StoreError> {
        let local = self
            .local
            .read()
            .map_err(|_| StoreError::lock_poisoned("local state"))?;
        Ok(local
            .get(&(session_id.clone(), event_id.clone()))
            .cloned())
    }

    async fn load_global_state(
        &self,
        app_id: &AppId,
        event_id: &EventId,
    ) -> Result<Option<GlobalSessionState>, StoreError> {
        let global = self
            .global
            .read()
            .map_err(|_| StoreError::lock_poisoned("global state"))?;
        Ok(global.get(&(app_id.clone(), event_id.clone())).cloned())
    }
}
