// SSE-over-HTTP generation backend

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::buffer_utils::parse_sse_stream;
use crate::traits::{EventStream, GenerationBackend};
use crate::wire::WireDecoder;
use weave_types::{GenerationRequest, MediaKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Full URL of the streaming chat endpoint
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_token: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

/// Request body understood by the chat endpoint
#[derive(Debug, Serialize)]
struct ChatStreamBody<'a> {
    conversation_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    workspace_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'static str>,
    use_rag: bool,
    use_agent_rag: bool,
    use_web_search: bool,
}

impl<'a> ChatStreamBody<'a> {
    fn new(request: &'a GenerationRequest, workspace_id: Option<&'a str>) -> Self {
        let media = request.params.media.as_ref();
        Self {
            conversation_id: &request.conversation_id,
            message: &request.message,
            workspace_id,
            media_url: media.map(|m| m.url.as_str()),
            content_type: media.map(|m| match m.kind {
                MediaKind::Image => "image",
                MediaKind::Audio => "audio",
            }),
            use_rag: request.params.conversation_recall,
            use_agent_rag: request.params.document_recall,
            use_web_search: request.params.web_search,
        }
    }
}

/// Backend client that POSTs the request and decodes the SSE response
pub struct HttpBackend {
    http_client: reqwest::Client,
    endpoint: String,
    api_token: String,
    workspace_id: Option<String>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint,
            api_token: config.api_token,
            workspace_id: config.workspace_id,
        })
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn stream(&self, request: GenerationRequest, cancel: CancellationToken) -> Result<EventStream> {
        let body = ChatStreamBody::new(&request, self.workspace_id.as_deref());

        tracing::debug!(
            conversation_id = %request.conversation_id,
            endpoint = %self.endpoint,
            has_media = request.params.media.is_some(),
            "Opening generation stream"
        );

        let send = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("Request cancelled before the stream opened"),
            response = send => response.context("Failed to send request")?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("backend returned {}: {}", status, error_details(&body));
        }

        Ok(parse_sse_stream(response.bytes_stream(), WireDecoder::new(), cancel))
    }
}

/// Error text from a JSON error body, else the raw body
fn error_details(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .or_else(|| value.get("message"))
                .and_then(|field| field.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}
