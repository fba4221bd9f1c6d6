use std::fmt;
use std::sync::Arc;

use crate::registry::SessionRegistry;
use crate::session::SessionHandle;
use crate::state::ViewState;
use weave_persist::MessageStore;
use weave_types::NewMessage;

/// Why a live session is being interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptTrigger {
    ExplicitStop,
    ConversationSwitch,
    Unmount,
    PageUnload,
}

impl InterruptTrigger {
    pub fn flush_policy(self) -> FlushPolicy {
        match self {
            InterruptTrigger::PageUnload => FlushPolicy::BestEffort,
            _ => FlushPolicy::Awaited,
        }
    }
}

impl fmt::Display for InterruptTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptTrigger::ExplicitStop => write!(f, "explicit_stop"),
            InterruptTrigger::ConversationSwitch => write!(f, "conversation_switch"),
            InterruptTrigger::Unmount => write!(f, "unmount"),
            InterruptTrigger::PageUnload => write!(f, "page_unload"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Append and wait for the store; failures are logged
    Awaited,
    /// Single unacknowledged beacon
    BestEffort,
}

/// Interrupted partial answer, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct FlushPayload {
    pub conversation_id: String,
    pub message: NewMessage,
}

/// Interrupt-and-flush sequence shared by every teardown trigger
pub struct LifecycleController {
    store: Arc<dyn MessageStore>,
    marker: String,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn MessageStore>, marker: impl Into<String>) -> Self {
        Self {
            store,
            marker: marker.into(),
        }
    }

    /// Persisted form of a partial answer. `None` for blank input.
    pub fn interrupted_content(&self, partial: &str) -> Option<String> {
        if partial.trim().is_empty() {
            return None;
        }
        Some(format!("{}\n\n{}", partial, self.marker))
    }

    /// Synchronous phase: cancel, freeze the view, and take the flush payload.
    ///
    /// The payload is produced at most once per session, from the latest
    /// buffered answer.
    pub fn begin(
        &self,
        registry: &mut SessionRegistry,
        view: Option<&mut ViewState>,
        handle: &SessionHandle,
        trigger: InterruptTrigger,
    ) -> Option<FlushPayload> {
        registry.cancel(handle);
        if let Some(view) = view {
            view.freeze();
        }

        let session = registry.get_mut(handle)?;
        if !session.latch_flush() {
            tracing::debug!(session_id = %handle.id(), trigger = %trigger, "Flush already attempted");
            return None;
        }

        let partial = registry.read_partial_answer(handle);
        let content = self.interrupted_content(&partial)?;
        tracing::info!(
            conversation_id = %handle.conversation_id(),
            session_id = %handle.id(),
            trigger = %trigger,
            chars = partial.chars().count(),
            "Flushing interrupted answer"
        );

        Some(FlushPayload {
            conversation_id: handle.conversation_id().to_string(),
            message: NewMessage::assistant(content),
        })
    }

    /// Delivery phase. Never fails; returns whether the store took the payload.
    pub async fn deliver(&self, payload: FlushPayload, policy: FlushPolicy) -> bool {
        match policy {
            FlushPolicy::Awaited => {
                match self.store.append_message(&payload.conversation_id, payload.message).await {
                    Ok(stored) => {
                        tracing::debug!(message_id = %stored.id, "Interrupted answer persisted");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(
                            conversation_id = %payload.conversation_id,
                            error = %e,
                            "Failed to persist interrupted answer"
                        );
                        false
                    }
                }
            }
            FlushPolicy::BestEffort => self.beacon(payload),
        }
    }

    /// Fire-and-forget delivery; the outcome is not acted upon
    pub fn beacon(&self, payload: FlushPayload) -> bool {
        self.store.beacon(&payload.conversation_id, payload.message)
    }
}
