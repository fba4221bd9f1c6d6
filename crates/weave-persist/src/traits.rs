use async_trait::async_trait;

use crate::error::Result;
use weave_types::{Conversation, Message, MessagePatch, NewMessage};

/// Conversation store the session layer persists to and reconciles from
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_conversation(&self, title: &str) -> Result<Conversation>;

    /// Append a message and return the stored record
    async fn append_message(&self, conversation_id: &str, message: NewMessage) -> Result<Message>;

    /// Canonical message list, ascending by `created_at`
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    async fn update_message(&self, message_id: &str, patch: MessagePatch) -> Result<Message>;

    /// Fire-and-forget append used while the process is going away.
    ///
    /// Must not block. Returns whether the attempt was handed off; delivery is
    /// never confirmed.
    fn beacon(&self, conversation_id: &str, message: NewMessage) -> bool;
}
