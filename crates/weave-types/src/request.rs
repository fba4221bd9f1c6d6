use serde::{Deserialize, Serialize};

use crate::message::MediaRef;

/// Per-send toggles forwarded to the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    pub conversation_recall: bool,
    pub document_recall: bool,
    pub web_search: bool,
    pub media: Option<MediaRef>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation_recall(mut self, enabled: bool) -> Self {
        self.conversation_recall = enabled;
        self
    }

    pub fn with_document_recall(mut self, enabled: bool) -> Self {
        self.document_recall = enabled;
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }
}

/// One generation request for a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub conversation_id: String,
    pub message: String,
    pub params: RequestParams,
}

impl GenerationRequest {
    pub fn new(conversation_id: impl Into<String>, message: impl Into<String>, params: RequestParams) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message: message.into(),
            params,
        }
    }
}
