//! Applies envelope events to a session and, when given one, to the view.
//!
//! The caller passes a view only while the session is live and its
//! conversation is the visible one. Without a view, events still reach the
//! session buffers so a later flush sees everything that arrived.

use serde_json::Value;

use crate::session::{ExecutingCall, StreamSession};
use crate::state::{Notice, ViewState};
use weave_types::{Message, MessagePatch, MessageRole, SearchStep, StreamEvent, ToolCallRecord, ToolFamily};

/// What the caller must do after an event was applied
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Continue,
    /// `complete` arrived; carries the optimistic assistant message
    Completed(Message),
    /// `error` arrived
    Failed(String),
}

pub struct EventDispatcher;

impl EventDispatcher {
    pub fn apply(session: &mut StreamSession, mut view: Option<&mut ViewState>, event: StreamEvent) -> Dispatch {
        match event {
            StreamEvent::Token { content } => {
                session.answer().push_str(&content);
                if let Some(view) = view {
                    view.streaming_text.push_str(&content);
                }
            }

            StreamEvent::ThinkingStart => {
                session.reasoning_active = true;
                if let Some(view) = view {
                    view.is_reasoning = true;
                }
            }
            StreamEvent::ThinkingToken { content } => {
                session.reasoning().push_str(&content);
                if let Some(view) = view {
                    view.reasoning_text.push_str(&content);
                }
            }
            StreamEvent::ThinkingEnd => {
                session.reasoning_active = false;
                if let Some(view) = view {
                    view.is_reasoning = false;
                }
            }

            StreamEvent::SearchStep { step } => Self::search_step(session, view, step),
            StreamEvent::SearchSources { sources } => {
                if let Some(view) = view {
                    view.sources = sources.clone();
                }
                session.sources = sources;
            }

            StreamEvent::ToolCallStarted { family, id, name, server_name, arguments } => {
                Self::tool_started(session, view, family, id, name, server_name, arguments)
            }
            StreamEvent::ToolCallFinished { family, id, success, result, error, elapsed_ms } => {
                Self::tool_finished(session, view, family, id, success, result, error, elapsed_ms)
            }

            StreamEvent::UsageIndicators { indicators } => {
                session.usage = Some(indicators);
            }

            StreamEvent::MediaTranscribed { text } => {
                if session.params().media.is_none() {
                    tracing::debug!(session_id = %session.id(), "Transcript for a request without media");
                } else if let Some(view) = view.as_deref_mut() {
                    Self::media_transcribed(view, text);
                }
            }

            StreamEvent::ContextInfo { info } => {
                if let Some(view) = view {
                    view.context_usage = Some(info);
                }
            }
            StreamEvent::Summarization { message } => {
                if let Some(view) = view {
                    view.notice = Some(Notice::Info(message));
                }
            }

            StreamEvent::Complete { final_text } => {
                let message = Self::optimistic_reply(session, final_text);
                if let Some(view) = view {
                    view.freeze();
                    view.streaming_text.clear();
                    view.messages.push(message.clone());
                }
                return Dispatch::Completed(message);
            }
            StreamEvent::Error { message } => {
                if let Some(view) = view {
                    view.freeze();
                    view.streaming_text.clear();
                    view.notice = Some(Notice::Error(message.clone()));
                }
                return Dispatch::Failed(message);
            }
        }
        Dispatch::Continue
    }

    fn search_step(session: &mut StreamSession, view: Option<&mut ViewState>, step: SearchStep) {
        if !session.seen_steps.insert(step.id.clone()) {
            tracing::debug!(step_id = %step.id, "Ignoring duplicate search step");
            return;
        }
        if let Some(view) = view {
            view.is_searching = !step.is_complete();
            view.search_steps.push(step.clone());
        }
        session.search_steps.push(step);
    }

    fn tool_started(
        session: &mut StreamSession,
        view: Option<&mut ViewState>,
        family: ToolFamily,
        id: String,
        name: String,
        server_name: Option<String>,
        arguments: Value,
    ) {
        let key = (family, id);
        if session.executing.contains_key(&key) {
            tracing::debug!(family = %family, tool_id = %key.1, "Tool call already executing");
            return;
        }

        let record = ToolCallRecord::executing(family, key.1.clone(), name, server_name, arguments);
        let view_index = view.map(|view| {
            let tools = view.tools_mut(family);
            tools.calls.push(record.clone());
            tools.is_executing = true;
            tools.calls.len() - 1
        });

        session.tool_calls.push(record);
        session.executing.insert(
            key,
            ExecutingCall {
                record: session.tool_calls.len() - 1,
                view: view_index,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn tool_finished(
        session: &mut StreamSession,
        view: Option<&mut ViewState>,
        family: ToolFamily,
        id: String,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
        elapsed_ms: Option<u64>,
    ) {
        let Some(call) = session.executing.remove(&(family, id.clone())) else {
            tracing::debug!(family = %family, tool_id = %id, "No executing call to finish");
            return;
        };

        let Some(record) = session.tool_calls.get_mut(call.record) else {
            return;
        };
        record.finish(success, result, error, elapsed_ms);
        let finished = record.clone();

        if let Some(view) = view {
            let still_executing = session.family_executing(family);
            let tools = view.tools_mut(family);
            if let Some(slot) = call.view.and_then(|index| tools.calls.get_mut(index)) {
                *slot = finished;
            }
            tools.is_executing = still_executing;
        }
    }

    fn media_transcribed(view: &mut ViewState, text: String) {
        let target = view.messages.iter_mut().rev().find(|m| m.awaits_transcription());
        match target {
            Some(message) => message.apply_patch(MessagePatch::transcribed(text)),
            None => tracing::debug!("No user message awaiting transcription"),
        }
    }

    fn optimistic_reply(session: &StreamSession, final_text: Option<String>) -> Message {
        let content = final_text.unwrap_or_else(|| session.answer().read());
        let mut message = Message::new(session.conversation_id(), MessageRole::Assistant, content).optimistic();

        message.sources = session.sources.clone();
        if !session.reasoning().is_empty() {
            message.thinking_content = Some(session.reasoning().read());
        }
        message.tool_calls = session
            .tool_calls
            .iter()
            .filter(|call| !call.is_executing())
            .cloned()
            .collect();
        message.usage = session.usage;
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use crate::session::SessionHandle;
    use serde_json::json;
    use weave_types::{
        MediaKind, MediaRef, RequestParams, SearchSource, SearchStepKind, ToolCallStatus, TranscriptionStatus,
        UsageIndicators,
    };

    fn setup() -> (SessionRegistry, SessionHandle, ViewState) {
        setup_with(RequestParams::new())
    }

    fn setup_with(params: RequestParams) -> (SessionRegistry, SessionHandle, ViewState) {
        let mut registry = SessionRegistry::new();
        let handle = registry.start("conv-1", params).unwrap();
        let mut view = ViewState::default();
        view.show_conversation(Some("conv-1".to_string()));
        view.begin_streaming();
        (registry, handle, view)
    }

    fn started(family: ToolFamily, id: &str) -> StreamEvent {
        StreamEvent::ToolCallStarted {
            family,
            id: id.to_string(),
            name: id.to_string(),
            server_name: None,
            arguments: json!({}),
        }
    }

    fn finished(family: ToolFamily, id: &str, success: bool) -> StreamEvent {
        StreamEvent::ToolCallFinished {
            family,
            id: id.to_string(),
            success,
            result: None,
            error: None,
            elapsed_ms: Some(10),
        }
    }

    #[test]
    fn test_tokens_concatenate_into_reply() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();

        for chunk in ["Hel", "lo, ", "world"] {
            EventDispatcher::apply(session, Some(&mut view), StreamEvent::token(chunk));
        }
        assert_eq!(view.streaming_text, "Hello, world");

        let dispatch = EventDispatcher::apply(session, Some(&mut view), StreamEvent::Complete { final_text: None });
        match dispatch {
            Dispatch::Completed(message) => assert_eq!(message.content, "Hello, world"),
            other => panic!("Expected completion, got {:?}", other),
        }
        assert_eq!(view.messages.last().unwrap().content, "Hello, world");
        assert!(view.messages.last().unwrap().optimistic);
        assert!(!view.is_streaming);
        assert!(view.streaming_text.is_empty());
    }

    #[test]
    fn test_final_text_wins_over_buffer() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();

        EventDispatcher::apply(session, Some(&mut view), StreamEvent::token("draft"));
        let dispatch = EventDispatcher::apply(
            session,
            Some(&mut view),
            StreamEvent::Complete { final_text: Some("final".to_string()) },
        );
        assert!(matches!(dispatch, Dispatch::Completed(ref m) if m.content == "final"));
    }

    #[test]
    fn test_cancelled_session_buffers_without_view() {
        let (mut registry, handle, _view) = setup();
        registry.cancel(&handle);
        let session = registry.get_mut(&handle).unwrap();

        EventDispatcher::apply(session, None, StreamEvent::token("late"));
        EventDispatcher::apply(session, None, StreamEvent::thinking("hmm"));
        assert_eq!(handle.read_partial_answer(), "late");
        assert_eq!(session.reasoning().read(), "hmm");
    }

    #[test]
    fn test_thinking_flags() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();

        EventDispatcher::apply(session, Some(&mut view), StreamEvent::ThinkingStart);
        assert!(view.is_reasoning);
        assert!(session.is_reasoning());
        EventDispatcher::apply(session, Some(&mut view), StreamEvent::thinking("step one"));
        EventDispatcher::apply(session, Some(&mut view), StreamEvent::ThinkingEnd);
        assert!(!view.is_reasoning);
        assert_eq!(view.reasoning_text, "step one");

        let dispatch = EventDispatcher::apply(session, Some(&mut view), StreamEvent::Complete { final_text: None });
        assert!(matches!(
            dispatch,
            Dispatch::Completed(ref m) if m.thinking_content.as_deref() == Some("step one")
        ));
        // Reasoning stays visible until the canonical list arrives
        assert_eq!(view.reasoning_text, "step one");
    }

    #[test]
    fn test_duplicate_search_step_is_dropped() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();
        let step = SearchStep::new("s1", SearchStepKind::Searching, "Searching");

        EventDispatcher::apply(session, Some(&mut view), StreamEvent::SearchStep { step: step.clone() });
        EventDispatcher::apply(session, Some(&mut view), StreamEvent::SearchStep { step });
        assert_eq!(view.search_steps.len(), 1);
        assert_eq!(session.search_steps().len(), 1);
        assert!(view.is_searching);

        let done = SearchStep::new("s2", SearchStepKind::Complete, "Search finished");
        EventDispatcher::apply(session, Some(&mut view), StreamEvent::SearchStep { step: done });
        assert!(!view.is_searching);
    }

    #[test]
    fn test_sources_replace_wholesale() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();

        let first = vec![SearchSource::new("A", "https://a"), SearchSource::new("B", "https://b")];
        let second = vec![SearchSource::new("C", "https://c")];
        EventDispatcher::apply(session, Some(&mut view), StreamEvent::SearchSources { sources: first });
        EventDispatcher::apply(session, Some(&mut view), StreamEvent::SearchSources { sources: second.clone() });

        assert_eq!(view.sources, second);
        assert_eq!(session.sources(), second.as_slice());
    }

    #[test]
    fn test_duplicate_start_yields_one_executing_record() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();

        EventDispatcher::apply(session, Some(&mut view), started(ToolFamily::Integration, "crm:lookup"));
        EventDispatcher::apply(session, Some(&mut view), started(ToolFamily::Integration, "crm:lookup"));

        assert_eq!(session.tool_calls().len(), 1);
        assert_eq!(session.tool_calls()[0].status, ToolCallStatus::Executing);
        assert_eq!(view.integrations.calls.len(), 1);
        assert!(view.integrations.is_executing);
    }

    #[test]
    fn test_unmatched_finish_is_noop() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();

        EventDispatcher::apply(session, Some(&mut view), started(ToolFamily::DataQuery, "execute_query"));
        EventDispatcher::apply(session, Some(&mut view), finished(ToolFamily::DataQuery, "other", true));
        EventDispatcher::apply(session, Some(&mut view), finished(ToolFamily::Integration, "execute_query", true));

        assert_eq!(session.tool_calls().len(), 1);
        assert!(session.tool_calls()[0].is_executing());
        assert!(view.data_queries.is_executing);
    }

    #[test]
    fn test_family_flag_clears_when_last_call_finishes() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();

        EventDispatcher::apply(session, Some(&mut view), started(ToolFamily::Integration, "a"));
        EventDispatcher::apply(session, Some(&mut view), started(ToolFamily::Integration, "b"));
        EventDispatcher::apply(session, Some(&mut view), started(ToolFamily::DataQuery, "q"));

        EventDispatcher::apply(session, Some(&mut view), finished(ToolFamily::Integration, "a", true));
        assert!(view.integrations.is_executing);

        EventDispatcher::apply(session, Some(&mut view), finished(ToolFamily::Integration, "b", false));
        assert!(!view.integrations.is_executing);
        assert!(view.data_queries.is_executing);
        assert_eq!(view.integrations.calls[1].status, ToolCallStatus::Failed);
    }

    #[test]
    fn test_tool_id_reused_after_finish() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();

        EventDispatcher::apply(session, Some(&mut view), started(ToolFamily::DataQuery, "execute_query"));
        EventDispatcher::apply(session, Some(&mut view), finished(ToolFamily::DataQuery, "execute_query", true));
        EventDispatcher::apply(session, Some(&mut view), started(ToolFamily::DataQuery, "execute_query"));

        assert_eq!(session.tool_calls().len(), 2);
        assert_eq!(session.tool_calls()[0].status, ToolCallStatus::Completed);
        assert!(session.tool_calls()[1].is_executing());

        let dispatch = EventDispatcher::apply(session, Some(&mut view), StreamEvent::Complete { final_text: None });
        // Only finished calls are attached to the reply
        assert!(matches!(dispatch, Dispatch::Completed(ref m) if m.tool_calls.len() == 1));
    }

    #[test]
    fn test_media_transcribed_updates_latest_pending_message() {
        let audio = MediaRef::new("https://cdn/a.ogg", MediaKind::Audio);
        let (mut registry, handle, mut view) = setup_with(RequestParams::new().with_media(audio.clone()));
        let mut done = Message::new("conv-1", MessageRole::User, "").with_media(audio.clone());
        done.apply_patch(MessagePatch::transcribed("old"));
        view.messages.push(Message::new("conv-1", MessageRole::User, "").with_media(audio.clone()));
        view.messages.push(done);
        view.messages.push(Message::new("conv-1", MessageRole::User, "").with_media(audio));
        assert_eq!(view.messages[2].transcription_status, Some(TranscriptionStatus::Pending));

        let session = registry.get_mut(&handle).unwrap();
        EventDispatcher::apply(session, Some(&mut view), StreamEvent::MediaTranscribed { text: "new".to_string() });

        assert_eq!(view.messages[2].transcription.as_deref(), Some("new"));
        assert_eq!(view.messages[2].transcription_status, Some(TranscriptionStatus::Completed));
        assert!(view.messages[0].transcription.is_none());
        assert_eq!(view.messages[1].transcription.as_deref(), Some("old"));
    }

    #[test]
    fn test_transcript_ignored_without_media_request() {
        let (mut registry, handle, mut view) = setup();
        let audio = MediaRef::new("https://cdn/old.ogg", MediaKind::Audio);
        view.messages.push(Message::new("conv-1", MessageRole::User, "").with_media(audio));

        let session = registry.get_mut(&handle).unwrap();
        EventDispatcher::apply(session, Some(&mut view), StreamEvent::MediaTranscribed { text: "stray".to_string() });

        assert!(view.messages[0].transcription.is_none());
        assert_eq!(view.messages[0].transcription_status, Some(TranscriptionStatus::Pending));
    }

    #[test]
    fn test_error_clears_flags_without_message() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();

        EventDispatcher::apply(session, Some(&mut view), StreamEvent::token("partial"));
        EventDispatcher::apply(session, Some(&mut view), started(ToolFamily::Integration, "x"));
        let dispatch = EventDispatcher::apply(session, Some(&mut view), StreamEvent::error("boom"));

        assert_eq!(dispatch, Dispatch::Failed("boom".to_string()));
        assert!(view.messages.is_empty());
        assert!(!view.is_streaming);
        assert!(!view.integrations.is_executing);
        assert_eq!(view.notice, Some(Notice::Error("boom".to_string())));
    }

    #[test]
    fn test_usage_is_attached_to_reply() {
        let (mut registry, handle, mut view) = setup();
        let session = registry.get_mut(&handle).unwrap();
        let indicators = UsageIndicators { web_search: true, ..Default::default() };

        EventDispatcher::apply(session, Some(&mut view), StreamEvent::UsageIndicators { indicators });
        let dispatch = EventDispatcher::apply(session, Some(&mut view), StreamEvent::Complete { final_text: None });
        assert!(matches!(dispatch, Dispatch::Completed(ref m) if m.usage == Some(indicators)));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn reply_is_concatenation_of_tokens(tokens in proptest::collection::vec(any::<String>(), 0..32)) {
                let (mut registry, handle, mut view) = setup();
                let session = registry.get_mut(&handle).unwrap();

                for token in &tokens {
                    EventDispatcher::apply(session, Some(&mut view), StreamEvent::token(token.as_str()));
                }
                let dispatch = EventDispatcher::apply(session, Some(&mut view), StreamEvent::Complete { final_text: None });

                let expected = tokens.concat();
                prop_assert!(matches!(dispatch, Dispatch::Completed(ref m) if m.content == expected));
            }

            #[test]
            fn repeated_ids_recorded_once(events in proptest::collection::vec((any::<bool>(), 0u8..5), 0..40)) {
                let (mut registry, handle, mut view) = setup();
                let session = registry.get_mut(&handle).unwrap();

                let mut step_ids = std::collections::HashSet::new();
                let mut tool_ids = std::collections::HashSet::new();
                for (is_step, n) in events {
                    let event = if is_step {
                        step_ids.insert(n);
                        let step = SearchStep::new(format!("s{}", n), SearchStepKind::Searching, "Searching");
                        StreamEvent::SearchStep { step }
                    } else {
                        tool_ids.insert(n);
                        started(ToolFamily::Integration, &format!("t{}", n))
                    };
                    EventDispatcher::apply(session, Some(&mut view), event);
                }

                prop_assert_eq!(session.search_steps().len(), step_ids.len());
                prop_assert_eq!(view.search_steps.len(), step_ids.len());
                prop_assert_eq!(session.tool_calls().len(), tool_ids.len());
                prop_assert_eq!(view.tools(ToolFamily::Integration).calls.len(), tool_ids.len());
            }
        }
    }
}
