use serde::{Deserialize, Serialize};

use crate::search::{SearchSource, SearchStep};
use crate::tool::ToolFamily;
use crate::usage::{ContextInfo, UsageIndicators};

/// Every event a generation stream can emit, in the order the backend sends them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Answer text (streamed token-by-token)
    Token {
        content: String,
    },

    /// Reasoning channel opened
    ThinkingStart,

    /// Reasoning text (streamed token-by-token)
    ThinkingToken {
        content: String,
    },

    /// Reasoning channel closed
    ThinkingEnd,

    /// Web-search progress
    SearchStep {
        step: SearchStep,
    },

    /// Complete snapshot of the sources found so far
    SearchSources {
        sources: Vec<SearchSource>,
    },

    /// External tool invocation started
    ToolCallStarted {
        family: ToolFamily,
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
        #[serde(default)]
        arguments: serde_json::Value,
    },

    /// External tool invocation finished
    ToolCallFinished {
        family: ToolFamily,
        id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },

    /// Transcript of the media attached to the user's message
    MediaTranscribed {
        text: String,
    },

    /// Which capabilities were exercised for this reply
    UsageIndicators {
        indicators: UsageIndicators,
    },

    /// Context window usage of the conversation
    ContextInfo {
        info: ContextInfo,
    },

    /// The backend compacted older history
    Summarization {
        message: String,
    },

    /// Generation finished
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_text: Option<String>,
    },

    /// Fatal stream error
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token { content: content.into() }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self::ThinkingToken { content: content.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ThinkingStart => "thinking_start",
            Self::ThinkingToken { .. } => "thinking_token",
            Self::ThinkingEnd => "thinking_end",
            Self::SearchStep { .. } => "search_step",
            Self::SearchSources { .. } => "search_sources",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallFinished { .. } => "tool_call_finished",
            Self::MediaTranscribed { .. } => "media_transcribed",
            Self::UsageIndicators { .. } => "usage_indicators",
            Self::ContextInfo { .. } => "context_info",
            Self::Summarization { .. } => "summarization",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}
