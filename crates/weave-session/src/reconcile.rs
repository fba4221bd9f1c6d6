use std::sync::Arc;

use crate::state::ViewState;
use weave_persist::MessageStore;
use weave_types::Message;

/// Replaces optimistic view entries with the store's canonical list
pub struct Reconciler {
    store: Arc<dyn MessageStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Canonical list for a conversation. A failed fetch is logged and yields `None`.
    pub async fn fetch(&self, conversation_id: &str) -> Option<Vec<Message>> {
        match self.store.list_messages(conversation_id).await {
            Ok(messages) => Some(messages),
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to reload messages, keeping local view"
                );
                None
            }
        }
    }

    /// Install `messages` if the conversation is still visible and idle.
    ///
    /// A reply streaming in the meantime owns the view until it reconciles itself.
    pub fn install(view: &mut ViewState, conversation_id: &str, messages: Vec<Message>) -> bool {
        if !view.is_visible(conversation_id) || view.is_streaming {
            tracing::debug!(conversation_id = %conversation_id, "Skipping stale reconciliation");
            return false;
        }
        view.install_canonical(messages);
        true
    }
}
