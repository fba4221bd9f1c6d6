use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use weave_types::{RequestParams, SearchSource, SearchStep, ToolCallRecord, ToolFamily, UsageIndicators};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Text cell shared between the live consumer and the recovery path.
///
/// Both sides go through the same synchronous accessors, so recovery always
/// sees the latest appended chunk.
#[derive(Debug, Clone, Default)]
pub struct SharedText(Arc<Mutex<String>>);

impl SharedText {
    fn lock(&self) -> MutexGuard<'_, String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_str(&self, chunk: &str) {
        self.lock().push_str(chunk);
    }

    pub fn read(&self) -> String {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Where an executing tool call lives, in the session and in the view
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecutingCall {
    pub record: usize,
    pub view: Option<usize>,
}

/// Mutable state of one in-flight generation
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    conversation_id: String,
    params: RequestParams,
    cancel: CancellationToken,
    answer: SharedText,
    reasoning: SharedText,
    pub(crate) reasoning_active: bool,
    pub(crate) search_steps: Vec<SearchStep>,
    pub(crate) seen_steps: HashSet<String>,
    pub(crate) sources: Vec<SearchSource>,
    pub(crate) tool_calls: Vec<ToolCallRecord>,
    pub(crate) executing: HashMap<(ToolFamily, String), ExecutingCall>,
    pub(crate) usage: Option<UsageIndicators>,
    flush_attempted: bool,
}

impl StreamSession {
    pub(crate) fn new(conversation_id: impl Into<String>, params: RequestParams) -> Self {
        Self {
            id: SessionId::new(),
            conversation_id: conversation_id.into(),
            params,
            cancel: CancellationToken::new(),
            answer: SharedText::default(),
            reasoning: SharedText::default(),
            reasoning_active: false,
            search_steps: Vec::new(),
            seen_steps: HashSet::new(),
            sources: Vec::new(),
            tool_calls: Vec::new(),
            executing: HashMap::new(),
            usage: None,
            flush_attempted: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn answer(&self) -> &SharedText {
        &self.answer
    }

    pub fn reasoning(&self) -> &SharedText {
        &self.reasoning
    }

    pub fn is_reasoning(&self) -> bool {
        self.reasoning_active
    }

    pub fn search_steps(&self) -> &[SearchStep] {
        &self.search_steps
    }

    pub fn sources(&self) -> &[SearchSource] {
        &self.sources
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    pub fn usage(&self) -> Option<UsageIndicators> {
        self.usage
    }

    pub fn family_executing(&self, family: ToolFamily) -> bool {
        self.executing.keys().any(|(f, _)| *f == family)
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latch the single flush attempt. Returns false if it was already taken.
    pub(crate) fn latch_flush(&mut self) -> bool {
        !std::mem::replace(&mut self.flush_attempted, true)
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            conversation_id: self.conversation_id.clone(),
            cancel: self.cancel.clone(),
            answer: self.answer.clone(),
        }
    }

    /// Clear buffers; the token goes away with the session
    pub(crate) fn clear(&mut self) {
        self.answer.clear();
        self.reasoning.clear();
        self.reasoning_active = false;
        self.search_steps.clear();
        self.seen_steps.clear();
        self.sources.clear();
        self.tool_calls.clear();
        self.executing.clear();
        self.usage = None;
    }
}

/// Caller-side reference to a session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    conversation_id: String,
    cancel: CancellationToken,
    answer: SharedText,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Synchronous read of the answer buffer, independent of view updates
    pub fn read_partial_answer(&self) -> String {
        self.answer.read()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token handed to the backend for this request
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_reads_latest_answer() {
        let session = StreamSession::new("conv-1", RequestParams::new());
        let handle = session.handle();

        session.answer().push_str("Partial ");
        session.answer().push_str("respo");
        assert_eq!(handle.read_partial_answer(), "Partial respo");
        assert_eq!(handle.conversation_id(), "conv-1");
    }

    #[test]
    fn test_flush_latch_is_one_shot() {
        let mut session = StreamSession::new("conv-1", RequestParams::new());
        assert!(session.latch_flush());
        assert!(!session.latch_flush());
    }

    #[test]
    fn test_cancel_keeps_buffers() {
        let mut session = StreamSession::new("conv-1", RequestParams::new());
        let handle = session.handle();
        session.answer().push_str("kept");

        session.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.read_partial_answer(), "kept");

        session.clear();
        assert_eq!(handle.read_partial_answer(), "");
    }
}
