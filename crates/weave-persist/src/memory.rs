use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

use crate::error::{PersistError, Result};
use crate::traits::MessageStore;
use weave_types::{Conversation, Message, MessagePatch, NewMessage};

#[derive(Default)]
struct StoreData {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
}

impl StoreData {
    fn push(&mut self, conversation_id: &str, message: NewMessage) -> Result<Message> {
        let conversation = self
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| PersistError::ConversationNotFound(conversation_id.to_string()))?;

        let stored = Message::from_new(conversation_id, message);
        conversation.updated_at = stored.created_at;
        self.messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }
}

/// Process-local store. Also the test double for the session layer.
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<StoreData>,
    fail_appends: AtomicBool,
    fail_lists: AtomicBool,
    append_calls: AtomicUsize,
    beacons: Mutex<Vec<(String, NewMessage)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conversation with a caller-chosen id
    pub async fn insert_conversation(&self, conversation: Conversation) {
        let mut data = self.data.write().await;
        data.conversations.insert(conversation.id.clone(), conversation);
    }

    /// Make every subsequent `append_message` fail
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `list_messages` fail
    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Number of `append_message` calls, failed ones included
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Every beacon handed to the store, in order
    pub fn beacons(&self) -> Vec<(String, NewMessage)> {
        match self.beacons.lock() {
            Ok(beacons) => beacons.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let conversation = Conversation::new(title);
        self.insert_conversation(conversation.clone()).await;
        tracing::debug!(conversation_id = %conversation.id, "Created conversation");
        Ok(conversation)
    }

    async fn append_message(&self, conversation_id: &str, message: NewMessage) -> Result<Message> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(PersistError::Connection("store unavailable".to_string()));
        }

        let mut data = self.data.write().await;
        data.push(conversation_id, message)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(PersistError::Connection("store unavailable".to_string()));
        }

        let data = self.data.read().await;
        if !data.conversations.contains_key(conversation_id) {
            return Err(PersistError::ConversationNotFound(conversation_id.to_string()));
        }

        let mut messages = data.messages.get(conversation_id).cloned().unwrap_or_default();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn update_message(&self, message_id: &str, patch: MessagePatch) -> Result<Message> {
        if patch.is_empty() {
            let data = self.data.read().await;
            return data
                .messages
                .values()
                .flatten()
                .find(|m| m.id == message_id)
                .cloned()
                .ok_or_else(|| PersistError::MessageNotFound(message_id.to_string()));
        }

        let mut data = self.data.write().await;
        let message = data
            .messages
            .values_mut()
            .flat_map(|messages| messages.iter_mut())
            .find(|m| m.id == message_id)
            .ok_or_else(|| PersistError::MessageNotFound(message_id.to_string()))?;

        message.apply_patch(patch);
        Ok(message.clone())
    }

    fn beacon(&self, conversation_id: &str, message: NewMessage) -> bool {
        match self.beacons.lock() {
            Ok(mut beacons) => beacons.push((conversation_id.to_string(), message.clone())),
            Err(poisoned) => poisoned.into_inner().push((conversation_id.to_string(), message.clone())),
        }

        // Never wait for the lock; a contended beacon is simply lost
        match self.data.try_write() {
            Ok(mut data) => data.push(conversation_id, message).is_ok(),
            Err(_) => false,
        }
    }
}
