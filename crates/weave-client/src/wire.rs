//! Decoder for the backend's SSE JSON payloads.
//!
//! Each `data:` line carries an object with a `type` field. Older deployments
//! send OpenAI-style `choices[0].delta.content` chunks without a type; those are
//! read as answer tokens.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;

use crate::buffer_utils::SseLineParser;
use weave_types::{
    ContextInfo, MediaAnalysisSource, SearchSource, SearchStep, SearchStepKind, StepDetails,
    StreamEvent, ToolFamily, UsageIndicators,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Token {
        #[serde(default)]
        content: String,
    },
    ThinkingStart,
    ThinkingToken {
        #[serde(default)]
        content: String,
    },
    ThinkingEnd,
    SearchDecision {
        #[serde(default)]
        needs_search: bool,
        query: Option<String>,
    },
    TavilyToolCall {
        tool_id: Option<String>,
        query: Option<String>,
    },
    TavilyToolResponse {
        tool_id: Option<String>,
        status: Option<String>,
        duration: Option<f64>,
    },
    TavilyContent {
        #[serde(default)]
        sources: Vec<SearchSource>,
    },
    McpToolCall {
        server_id: String,
        server_name: Option<String>,
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },
    McpToolResult {
        server_id: String,
        tool_name: String,
        #[serde(default)]
        success: bool,
        result: Option<Value>,
        error: Option<String>,
        execution_time_ms: Option<u64>,
    },
    DataToolCall {
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },
    DataToolResult {
        tool_name: String,
        #[serde(default)]
        success: bool,
        data_count: Option<u64>,
        rows_affected: Option<u64>,
        error: Option<String>,
        execution_time_ms: Option<u64>,
    },
    MediaProcessing {
        source: Option<MediaAnalysisSource>,
        status: Option<String>,
    },
    MediaTranscriptionSource {
        source: Option<MediaAnalysisSource>,
    },
    MediaTranscribed {
        transcription: Option<String>,
    },
    ContextInfo {
        #[serde(default)]
        usage_percent: f64,
        #[serde(default)]
        used_tokens: u64,
        #[serde(default)]
        max_tokens: u64,
        #[serde(default)]
        context_length: u64,
        #[serde(default)]
        needs_summarization: bool,
    },
    Summarization {
        message: Option<String>,
    },
    Done {
        sources: Option<Vec<SearchSource>>,
        #[serde(default)]
        used_workspace_rag: bool,
        #[serde(default)]
        used_agent_rag: bool,
        #[serde(default)]
        used_web_search: bool,
    },
    Error {
        error: Option<String>,
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Stateful decoder for one request's SSE payloads
#[derive(Debug, Default)]
pub struct WireDecoder {
    seq: u64,
    search_started: Option<Instant>,
    pending_usage: Option<UsageIndicators>,
    saw_sources: bool,
}

impl WireDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{}_{}", prefix, self.seq)
    }

    fn search_elapsed_secs(&self) -> f64 {
        self.search_started
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn set_media_source(&mut self, source: MediaAnalysisSource) {
        self.pending_usage.get_or_insert_with(UsageIndicators::default).media_analysis = Some(source);
    }

    fn decode(&mut self, event: WireEvent) -> Vec<StreamEvent> {
        match event {
            WireEvent::Token { content } if !content.is_empty() => vec![StreamEvent::Token { content }],
            WireEvent::Token { .. } => Vec::new(),
            WireEvent::ThinkingStart => vec![StreamEvent::ThinkingStart],
            WireEvent::ThinkingToken { content } if !content.is_empty() => {
                vec![StreamEvent::ThinkingToken { content }]
            }
            WireEvent::ThinkingToken { .. } => Vec::new(),
            WireEvent::ThinkingEnd => vec![StreamEvent::ThinkingEnd],

            WireEvent::SearchDecision { needs_search, query } => {
                if !needs_search {
                    return Vec::new();
                }
                self.search_started = Some(Instant::now());
                let step = SearchStep::new(
                    self.next_id("decision"),
                    SearchStepKind::Thinking,
                    "Searching for up-to-date information...",
                )
                .with_details(StepDetails {
                    query,
                    ..Default::default()
                });
                vec![StreamEvent::SearchStep { step }]
            }
            WireEvent::TavilyToolCall { tool_id, query } => {
                let id = match &tool_id {
                    Some(id) => id.clone(),
                    None => self.next_id("tool_call"),
                };
                let message = format!("Searching: \"{}\"", query.as_deref().unwrap_or_default());
                let step = SearchStep::new(id, SearchStepKind::ToolCall, message).with_details(StepDetails {
                    query,
                    tool_id,
                    ..Default::default()
                });
                vec![StreamEvent::SearchStep { step }]
            }
            WireEvent::TavilyToolResponse { tool_id, status, duration } => {
                // Distinct id so the response is not folded into its call step
                let id = match tool_id {
                    Some(id) => format!("{}_response", id),
                    None => self.next_id("tool_response"),
                };
                let message = if status.as_deref() == Some("completed") {
                    "Search finished"
                } else {
                    "Search failed"
                };
                let step = SearchStep::new(id, SearchStepKind::ToolResponse, message)
                    .with_duration(duration.unwrap_or_else(|| self.search_elapsed_secs()));
                self.search_started = Some(Instant::now());
                vec![StreamEvent::SearchStep { step }]
            }
            WireEvent::TavilyContent { sources } => {
                let step = SearchStep::new(
                    self.next_id("analyzing"),
                    SearchStepKind::Analyzing,
                    format!("Analyzing {} results", sources.len()),
                )
                .with_details(StepDetails {
                    results_count: Some(sources.len()),
                    ..Default::default()
                });
                self.saw_sources |= !sources.is_empty();
                vec![StreamEvent::SearchStep { step }, StreamEvent::SearchSources { sources }]
            }

            WireEvent::McpToolCall { server_id, server_name, tool_name, arguments } => {
                vec![StreamEvent::ToolCallStarted {
                    family: ToolFamily::Integration,
                    id: integration_call_id(&server_id, &tool_name),
                    name: tool_name,
                    server_name,
                    arguments,
                }]
            }
            WireEvent::McpToolResult { server_id, tool_name, success, result, error, execution_time_ms } => {
                vec![StreamEvent::ToolCallFinished {
                    family: ToolFamily::Integration,
                    id: integration_call_id(&server_id, &tool_name),
                    success,
                    result,
                    error,
                    elapsed_ms: execution_time_ms,
                }]
            }
            WireEvent::DataToolCall { tool_name, arguments } => {
                vec![StreamEvent::ToolCallStarted {
                    family: ToolFamily::DataQuery,
                    id: tool_name.clone(),
                    name: tool_name,
                    server_name: None,
                    arguments,
                }]
            }
            WireEvent::DataToolResult {
                tool_name,
                success,
                data_count,
                rows_affected,
                error,
                execution_time_ms,
            } => {
                let mut summary = serde_json::Map::new();
                if let Some(count) = data_count {
                    summary.insert("data_count".to_string(), count.into());
                }
                if let Some(rows) = rows_affected {
                    summary.insert("rows_affected".to_string(), rows.into());
                }
                vec![StreamEvent::ToolCallFinished {
                    family: ToolFamily::DataQuery,
                    id: tool_name,
                    success,
                    result: (!summary.is_empty()).then(|| Value::Object(summary)),
                    error,
                    elapsed_ms: execution_time_ms,
                }]
            }

            WireEvent::MediaProcessing { source, status } => {
                if let (Some(source), Some("completed")) = (source, status.as_deref()) {
                    self.set_media_source(source);
                }
                Vec::new()
            }
            WireEvent::MediaTranscriptionSource { source } => {
                if let Some(source) = source {
                    self.set_media_source(source);
                }
                Vec::new()
            }
            WireEvent::MediaTranscribed { transcription } => match transcription {
                Some(text) if !text.is_empty() => vec![StreamEvent::MediaTranscribed { text }],
                _ => Vec::new(),
            },

            WireEvent::ContextInfo {
                usage_percent,
                used_tokens,
                max_tokens,
                context_length,
                needs_summarization,
            } => vec![StreamEvent::ContextInfo {
                info: ContextInfo {
                    usage_percent,
                    used_tokens,
                    max_tokens,
                    context_length,
                    needs_summarization,
                },
            }],
            WireEvent::Summarization { message } => match message {
                Some(message) if !message.is_empty() => vec![StreamEvent::Summarization { message }],
                _ => Vec::new(),
            },

            WireEvent::Done { sources, used_workspace_rag, used_agent_rag, used_web_search } => {
                let mut events = Vec::new();
                if let Some(sources) = sources {
                    self.saw_sources |= !sources.is_empty();
                    events.push(StreamEvent::SearchSources { sources });
                }
                if self.saw_sources {
                    let step = SearchStep::new(self.next_id("complete"), SearchStepKind::Complete, "Search finished");
                    events.push(StreamEvent::SearchStep { step });
                }
                // Media source may already be known from earlier media events
                let media_analysis = self.pending_usage.and_then(|usage| usage.media_analysis);
                self.pending_usage = Some(UsageIndicators {
                    conversation_recall: used_workspace_rag,
                    document_recall: used_agent_rag,
                    web_search: used_web_search,
                    media_analysis,
                });
                events
            }
            WireEvent::Error { error, message } => {
                let message = error.or(message).unwrap_or_else(|| "Unknown backend error".to_string());
                vec![StreamEvent::Error { message }]
            }
            WireEvent::Unknown => Vec::new(),
        }
    }
}

impl SseLineParser for WireDecoder {
    fn parse_data_line(&mut self, data: &str) -> Result<Vec<StreamEvent>> {
        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                // Partial or foreign payload; the backend is allowed to send these
                tracing::debug!(error = %e, payload = %preview(data), "Skipping unparseable SSE payload");
                return Ok(Vec::new());
            }
        };

        if value.get("type").is_none() {
            let legacy = value
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .filter(|content| !content.is_empty());
            return Ok(legacy.map(StreamEvent::token).into_iter().collect());
        }

        match serde_json::from_value::<WireEvent>(value) {
            Ok(event) => Ok(self.decode(event)),
            Err(e) => {
                tracing::debug!(error = %e, payload = %preview(data), "Skipping malformed SSE event");
                Ok(Vec::new())
            }
        }
    }

    fn on_done(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::with_capacity(2);
        if let Some(indicators) = self.pending_usage.take().filter(UsageIndicators::any) {
            events.push(StreamEvent::UsageIndicators { indicators });
        }
        events.push(StreamEvent::Complete { final_text: None });
        events
    }
}

/// Integration results carry no call id; server and tool name identify the call
fn integration_call_id(server_id: &str, tool_name: &str) -> String {
    format!("{}:{}", server_id, tool_name)
}

fn preview(data: &str) -> &str {
    match data.char_indices().nth(50) {
        Some((idx, _)) => &data[..idx],
        None => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(decoder: &mut WireDecoder, data: &str) -> Vec<StreamEvent> {
        decoder.parse_data_line(data).unwrap()
    }

    #[test]
    fn test_token_and_legacy_chunk() {
        let mut decoder = WireDecoder::new();

        assert_eq!(parse(&mut decoder, r#"{"type":"token","content":"Olá"}"#), vec![StreamEvent::token("Olá")]);
        assert_eq!(
            parse(&mut decoder, r#"{"choices":[{"index":0,"delta":{"content":" mundo"},"finish_reason":null}]}"#),
            vec![StreamEvent::token(" mundo")]
        );
        assert!(parse(&mut decoder, r#"{"type":"token","content":""}"#).is_empty());
    }

    #[test]
    fn test_garbage_is_skipped() {
        let mut decoder = WireDecoder::new();

        assert!(parse(&mut decoder, r#"{"type":"tok"#).is_empty());
        assert!(parse(&mut decoder, r#"{"type":"heartbeat"}"#).is_empty());
        assert!(parse(&mut decoder, r#"{"type":"mcp_tool_call"}"#).is_empty());
    }

    #[test]
    fn test_search_decision_only_when_needed() {
        let mut decoder = WireDecoder::new();

        assert!(parse(&mut decoder, r#"{"type":"search_decision","needs_search":false}"#).is_empty());

        let events = parse(&mut decoder, r#"{"type":"search_decision","needs_search":true,"query":"selic hoje"}"#);
        match &events[..] {
            [StreamEvent::SearchStep { step }] => {
                assert_eq!(step.kind, SearchStepKind::Thinking);
                assert_eq!(step.details.as_ref().unwrap().query.as_deref(), Some("selic hoje"));
            }
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_tool_response_has_own_step_id() {
        let mut decoder = WireDecoder::new();

        let call = parse(&mut decoder, r#"{"type":"tavily_tool_call","tool":"tavily","tool_id":"t1","query":"rust"}"#);
        let response = parse(&mut decoder, r#"{"type":"tavily_tool_response","tool_id":"t1","status":"completed","duration":1.5}"#);

        match (&call[..], &response[..]) {
            ([StreamEvent::SearchStep { step: a }], [StreamEvent::SearchStep { step: b }]) => {
                assert_eq!(a.id, "t1");
                assert_eq!(b.id, "t1_response");
                assert_eq!(b.kind, SearchStepKind::ToolResponse);
                assert_eq!(b.duration_secs, Some(1.5));
            }
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_tavily_content_emits_step_and_sources() {
        let mut decoder = WireDecoder::new();
        let events = parse(
            &mut decoder,
            r#"{"type":"tavily_content","content":"...","sources":[{"title":"A","url":"https://a"},{"title":"B","url":"https://b","score":0.4}]}"#,
        );

        assert_eq!(events.len(), 2);
        match &events[1] {
            StreamEvent::SearchSources { sources } => assert_eq!(sources.len(), 2),
            other => panic!("Expected sources, got {:?}", other),
        }
    }

    #[test]
    fn test_mcp_call_and_result_share_id() {
        let mut decoder = WireDecoder::new();
        let started = parse(
            &mut decoder,
            r#"{"type":"mcp_tool_call","server_id":"s1","server_name":"CRM","tool_name":"find_lead","arguments":{"email":"a@b.c"}}"#,
        );
        let finished = parse(
            &mut decoder,
            r#"{"type":"mcp_tool_result","server_id":"s1","server_name":"CRM","tool_name":"find_lead","success":true,"result":{"id":7},"execution_time_ms":120}"#,
        );

        match (&started[..], &finished[..]) {
            (
                [StreamEvent::ToolCallStarted { family, id: start_id, server_name, .. }],
                [StreamEvent::ToolCallFinished { id: finish_id, success, elapsed_ms, .. }],
            ) => {
                assert_eq!(*family, ToolFamily::Integration);
                assert_eq!(start_id, "s1:find_lead");
                assert_eq!(start_id, finish_id);
                assert_eq!(server_name.as_deref(), Some("CRM"));
                assert!(*success);
                assert_eq!(*elapsed_ms, Some(120));
            }
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_data_tool_result_summary() {
        let mut decoder = WireDecoder::new();
        let events = parse(
            &mut decoder,
            r#"{"type":"data_tool_result","tool_name":"execute_query","success":true,"data_count":42,"execution_time_ms":33}"#,
        );

        match &events[..] {
            [StreamEvent::ToolCallFinished { family, id, result, .. }] => {
                assert_eq!(*family, ToolFamily::DataQuery);
                assert_eq!(id, "execute_query");
                assert_eq!(result.as_ref().unwrap()["data_count"], 42);
                assert!(result.as_ref().unwrap().get("rows_affected").is_none());
            }
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_done_then_marker_yields_usage_before_complete() {
        let mut decoder = WireDecoder::new();

        parse(&mut decoder, r#"{"type":"media_processing","source":"gemini","status":"completed"}"#);
        let done = parse(
            &mut decoder,
            r#"{"type":"done","used_workspace_rag":true,"used_agent_rag":false,"used_web_search":false}"#,
        );
        assert!(done.is_empty());

        let tail = decoder.on_done();
        assert_eq!(
            tail,
            vec![
                StreamEvent::UsageIndicators {
                    indicators: UsageIndicators {
                        conversation_recall: true,
                        document_recall: false,
                        web_search: false,
                        media_analysis: Some(MediaAnalysisSource::Gemini),
                    },
                },
                StreamEvent::Complete { final_text: None },
            ]
        );
    }

    #[test]
    fn test_unused_capabilities_emit_no_usage() {
        let mut decoder = WireDecoder::new();
        parse(
            &mut decoder,
            r#"{"type":"done","used_workspace_rag":false,"used_agent_rag":false,"used_web_search":false}"#,
        );

        assert_eq!(decoder.on_done(), vec![StreamEvent::Complete { final_text: None }]);
    }

    #[test]
    fn test_done_with_sources_marks_search_complete() {
        let mut decoder = WireDecoder::new();
        let events = parse(
            &mut decoder,
            r#"{"type":"done","sources":[{"title":"A","url":"https://a"}],"used_web_search":true}"#,
        );

        assert!(matches!(events[0], StreamEvent::SearchSources { .. }));
        match &events[1] {
            StreamEvent::SearchStep { step } => assert!(step.is_complete()),
            other => panic!("Expected complete step, got {:?}", other),
        }
    }

    #[test]
    fn test_marker_without_done_event() {
        let mut decoder = WireDecoder::new();
        assert_eq!(decoder.on_done(), vec![StreamEvent::Complete { final_text: None }]);
    }

    #[test]
    fn test_backend_error_event() {
        let mut decoder = WireDecoder::new();
        assert_eq!(
            parse(&mut decoder, r#"{"type":"error","error":"rate limited"}"#),
            vec![StreamEvent::error("rate limited")]
        );
    }
}
