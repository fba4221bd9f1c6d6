use serde::{Deserialize, Serialize};

/// Where media attached to a message was analysed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaAnalysisSource {
    /// Multimodal model handled the media directly
    Native,
    /// External transcription service
    Gemini,
}

/// Capabilities exercised while generating one reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageIndicators {
    /// Recall over prior conversations of the workspace
    #[serde(default)]
    pub conversation_recall: bool,
    /// Recall over the agent's documents
    #[serde(default)]
    pub document_recall: bool,
    #[serde(default)]
    pub web_search: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_analysis: Option<MediaAnalysisSource>,
}

impl UsageIndicators {
    pub fn any(&self) -> bool {
        self.conversation_recall || self.document_recall || self.web_search || self.media_analysis.is_some()
    }
}

/// Context window usage reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub usage_percent: f64,
    pub used_tokens: u64,
    pub max_tokens: u64,
    pub context_length: u64,
    #[serde(default)]
    pub needs_summarization: bool,
}
