use serde::Serialize;

use weave_types::{ContextInfo, Message, SearchSource, SearchStep, ToolCallRecord, ToolFamily};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "level", content = "message", rename_all = "snake_case")]
pub enum Notice {
    Error(String),
    Info(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolFamilyView {
    pub calls: Vec<ToolCallRecord>,
    pub is_executing: bool,
}

/// UI-visible snapshot of the selected conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewState {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub is_streaming: bool,
    pub streaming_text: String,
    pub is_reasoning: bool,
    pub reasoning_text: String,
    pub search_steps: Vec<SearchStep>,
    pub is_searching: bool,
    pub sources: Vec<SearchSource>,
    pub integrations: ToolFamilyView,
    pub data_queries: ToolFamilyView,
    pub context_usage: Option<ContextInfo>,
    pub notice: Option<Notice>,
}

impl ViewState {
    pub fn is_visible(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }

    pub fn tools(&self, family: ToolFamily) -> &ToolFamilyView {
        match family {
            ToolFamily::Integration => &self.integrations,
            ToolFamily::DataQuery => &self.data_queries,
        }
    }

    pub fn tools_mut(&mut self, family: ToolFamily) -> &mut ToolFamilyView {
        match family {
            ToolFamily::Integration => &mut self.integrations,
            ToolFamily::DataQuery => &mut self.data_queries,
        }
    }

    /// Reset per-reply state for a new send
    pub fn begin_streaming(&mut self) {
        self.is_streaming = true;
        self.streaming_text.clear();
        self.is_reasoning = false;
        self.reasoning_text.clear();
        self.search_steps.clear();
        self.is_searching = false;
        self.sources.clear();
        self.integrations = ToolFamilyView::default();
        self.data_queries = ToolFamilyView::default();
        self.notice = None;
    }

    /// Drop the streaming-only flags. Accumulated text, steps and sources stay.
    pub fn freeze(&mut self) {
        self.is_streaming = false;
        self.is_reasoning = false;
        self.is_searching = false;
        self.integrations.is_executing = false;
        self.data_queries.is_executing = false;
    }

    /// Make `conversation_id` (or nothing) the visible conversation with an empty list
    pub fn show_conversation(&mut self, conversation_id: Option<String>) {
        *self = ViewState {
            conversation_id,
            ..ViewState::default()
        };
    }

    /// Install the canonical message list, replacing optimistic entries
    pub fn install_canonical(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.streaming_text.clear();
        self.reasoning_text.clear();
        self.search_steps.clear();
        self.sources.clear();
        self.integrations.calls.clear();
        self.data_queries.calls.clear();
    }
}
