use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection};

use super::models::{MongoConversation, MongoMessage};
use crate::error::{PersistError, Result};
use crate::traits::MessageStore;
use weave_types::{Conversation, Message, MessagePatch, NewMessage};

/// MongoDB-backed store over the `conversations` and `messages` collections
#[derive(Clone)]
pub struct MongoMessageStore {
    conversations: Collection<MongoConversation>,
    messages: Collection<MongoMessage>,
}

impl MongoMessageStore {
    /// Connect to MongoDB and create client
    pub async fn connect(mongodb_uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(mongodb_uri)
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))?;

        let db = client.database(database);
        Ok(Self {
            conversations: db.collection("conversations"),
            messages: db.collection("messages"),
        })
    }

    async fn touch_conversation(&self, conversation_id: &str, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        self.conversations
            .update_one(
                doc! { "_id": conversation_id },
                doc! { "$set": { "updated_at": bson::DateTime::from_chrono(at) } },
            )
            .await?;
        Ok(())
    }
}

fn patch_document(patch: &MessagePatch) -> Result<Document> {
    let mut set = Document::new();
    if let Some(content) = &patch.content {
        set.insert("content", content.as_str());
    }
    if let Some(transcription) = &patch.transcription {
        set.insert("transcription", transcription.as_str());
    }
    if let Some(status) = &patch.transcription_status {
        set.insert("transcription_status", bson::to_bson(status)?);
    }
    Ok(set)
}

#[async_trait]
impl MessageStore for MongoMessageStore {
    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let conversation = Conversation::new(title);
        self.conversations
            .insert_one(MongoConversation::from(conversation.clone()))
            .await?;
        Ok(conversation)
    }

    async fn append_message(&self, conversation_id: &str, message: NewMessage) -> Result<Message> {
        let exists = self
            .conversations
            .find_one(doc! { "_id": conversation_id })
            .await?
            .is_some();
        if !exists {
            return Err(PersistError::ConversationNotFound(conversation_id.to_string()));
        }

        let stored = Message::from_new(conversation_id, message);
        self.messages.insert_one(MongoMessage::from(stored.clone())).await?;
        self.touch_conversation(conversation_id, stored.created_at).await?;
        Ok(stored)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let messages: Vec<MongoMessage> = self
            .messages
            .find(doc! { "conversation_id": conversation_id })
            .sort(doc! { "created_at": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(messages.into_iter().map(Message::from).collect())
    }

    async fn update_message(&self, message_id: &str, patch: MessagePatch) -> Result<Message> {
        let filter = doc! { "_id": message_id };

        let updated = if patch.is_empty() {
            self.messages.find_one(filter).await?
        } else {
            let set = patch_document(&patch)?;
            self.messages
                .find_one_and_update(filter, doc! { "$set": set })
                .return_document(ReturnDocument::After)
                .await?
        };

        updated
            .map(Message::from)
            .ok_or_else(|| PersistError::MessageNotFound(message_id.to_string()))
    }

    fn beacon(&self, conversation_id: &str, message: NewMessage) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };

        let messages = self.messages.clone();
        let stored = MongoMessage::from(Message::from_new(conversation_id, message));
        runtime.spawn(async move {
            if let Err(e) = messages.insert_one(stored).await {
                tracing::debug!(error = %e, "Beacon insert failed");
            }
        });
        true
    }
}
