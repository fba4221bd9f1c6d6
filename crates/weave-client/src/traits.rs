use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use weave_types::{GenerationRequest, StreamEvent};

/// Ordered event channel of one generation request
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Model-serving backend that produces the event stream for a request.
///
/// `cancel` is cooperative: implementations should stop producing once it fires,
/// but consumers must tolerate events that were already in flight.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn stream(&self, request: GenerationRequest, cancel: CancellationToken) -> Result<EventStream>;
}
