use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::search::SearchSource;
use crate::tool::ToolCallRecord;
use crate::usage::UsageIndicators;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

/// Reference to media uploaded alongside a user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn new(url: impl Into<String>, kind: MediaKind) -> Self {
        Self { url: url.into(), kind }
    }
}

impl MediaKind {
    /// Text shown for a user message that carries only media
    pub fn placeholder(self) -> &'static str {
        match self {
            MediaKind::Image => "[Imagem enviada]",
            MediaKind::Audio => "[Áudio enviado]",
        }
    }
}

/// Display text for a user message: trimmed text, or the media placeholder when blank
pub fn user_content(text: &str, media: Option<&MediaRef>) -> String {
    match (text.trim(), media) {
        ("", Some(media)) => media.kind.placeholder().to_string(),
        (trimmed, _) => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A conversation message as the store knows it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub tokens_used: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription_status: Option<TranscriptionStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SearchSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageIndicators>,
    /// Assembled locally and not yet confirmed by the store
    #[serde(skip)]
    pub optimistic: bool,
}

impl Message {
    pub fn new(conversation_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            tokens_used: 0,
            created_at: Utc::now(),
            media: None,
            transcription: None,
            transcription_status: None,
            sources: Vec::new(),
            thinking_content: None,
            tool_calls: Vec::new(),
            usage: None,
            optimistic: false,
        }
    }

    /// Builds the persisted form of an append payload
    pub fn from_new(conversation_id: impl Into<String>, new: NewMessage) -> Self {
        let mut message = Self::new(conversation_id, new.role, new.content);
        message.media = new.media;
        message
    }

    pub fn optimistic(mut self) -> Self {
        self.optimistic = true;
        self
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self.transcription_status = Some(TranscriptionStatus::Pending);
        self
    }

    /// A user message whose media transcript is still outstanding
    pub fn awaits_transcription(&self) -> bool {
        self.role == MessageRole::User
            && self.media.is_some()
            && self.transcription_status != Some(TranscriptionStatus::Completed)
    }

    pub fn apply_patch(&mut self, patch: MessagePatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(transcription) = patch.transcription {
            self.transcription = Some(transcription);
        }
        if let Some(status) = patch.transcription_status {
            self.transcription_status = Some(status);
        }
    }
}

/// Payload for appending a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

impl NewMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            media: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            media: None,
        }
    }
}

/// Partial update of a stored message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription_status: Option<TranscriptionStatus>,
}

impl MessagePatch {
    pub fn transcribed(text: impl Into<String>) -> Self {
        Self {
            content: None,
            transcription: Some(text.into()),
            transcription_status: Some(TranscriptionStatus::Completed),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.transcription.is_none() && self.transcription_status.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_content_placeholder() {
        let image = MediaRef::new("https://cdn/p.png", MediaKind::Image);
        let audio = MediaRef::new("https://cdn/a.ogg", MediaKind::Audio);

        assert_eq!(user_content("  ", Some(&image)), "[Imagem enviada]");
        assert_eq!(user_content("", Some(&audio)), "[Áudio enviado]");
        assert_eq!(user_content(" what is this? ", Some(&image)), "what is this?");
        assert_eq!(user_content(" hi ", None), "hi");
    }

    #[test]
    fn test_awaits_transcription() {
        let plain = Message::new("c1", MessageRole::User, "hi");
        assert!(!plain.awaits_transcription());

        let mut with_audio = Message::new("c1", MessageRole::User, "[audio]")
            .with_media(MediaRef::new("https://cdn/a.webm", MediaKind::Audio));
        assert!(with_audio.awaits_transcription());

        with_audio.apply_patch(MessagePatch::transcribed("hello there"));
        assert!(!with_audio.awaits_transcription());
        assert_eq!(with_audio.transcription.as_deref(), Some("hello there"));
    }

    #[test]
    fn test_optimistic_flag_not_serialized() {
        let message = Message::new("c1", MessageRole::Assistant, "done").optimistic();
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("optimistic").is_none());

        let back: Message = serde_json::from_value(json).unwrap();
        assert!(!back.optimistic);
        assert_eq!(back.content, "done");
    }
}
