use std::collections::HashMap;
use thiserror::Error;

use crate::session::{SessionHandle, SessionId, StreamSession};
use weave_types::RequestParams;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Conversation {conversation_id} already has an active session ({session_id})")]
pub struct ConcurrentSessionError {
    pub conversation_id: String,
    pub session_id: SessionId,
}

/// Live sessions, at most one per conversation
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, StreamSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `conversation_id`.
    ///
    /// A cancelled predecessor is superseded; a live one is a conflict.
    pub fn start(
        &mut self,
        conversation_id: &str,
        params: RequestParams,
    ) -> Result<SessionHandle, ConcurrentSessionError> {
        if let Some(existing) = self.sessions.get_mut(conversation_id) {
            if !existing.is_cancelled() {
                return Err(ConcurrentSessionError {
                    conversation_id: conversation_id.to_string(),
                    session_id: existing.id(),
                });
            }
            tracing::debug!(
                conversation_id = %conversation_id,
                session_id = %existing.id(),
                "Superseding cancelled session"
            );
            existing.clear();
        }

        let session = StreamSession::new(conversation_id, params);
        let handle = session.handle();
        self.sessions.insert(conversation_id.to_string(), session);
        Ok(handle)
    }

    /// Set the cancellation flag. Buffers stay readable until teardown.
    pub fn cancel(&mut self, handle: &SessionHandle) -> bool {
        match self.get_mut(handle) {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    pub fn read_partial_answer(&self, handle: &SessionHandle) -> String {
        handle.read_partial_answer()
    }

    /// The session behind `handle`, unless it was torn down or superseded
    pub fn get(&self, handle: &SessionHandle) -> Option<&StreamSession> {
        self.sessions
            .get(handle.conversation_id())
            .filter(|session| session.id() == handle.id())
    }

    pub fn get_mut(&mut self, handle: &SessionHandle) -> Option<&mut StreamSession> {
        self.sessions
            .get_mut(handle.conversation_id())
            .filter(|session| session.id() == handle.id())
    }

    /// Clear buffers and drop the session. No-op for unknown or superseded handles.
    pub fn teardown(&mut self, handle: &SessionHandle) -> bool {
        if self.get(handle).is_none() {
            return false;
        }
        if let Some(mut session) = self.sessions.remove(handle.conversation_id()) {
            session.clear();
        }
        true
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_start_conflicts_until_cancelled() {
        let mut registry = SessionRegistry::new();
        let first = registry.start("conv-1", RequestParams::new()).unwrap();

        let err = registry.start("conv-1", RequestParams::new()).unwrap_err();
        assert_eq!(err.session_id, first.id());

        assert!(registry.cancel(&first));
        let second = registry.start("conv-1", RequestParams::new()).unwrap();
        assert_ne!(first.id(), second.id());
        assert!(registry.get(&first).is_none());
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_sessions_are_per_conversation() {
        let mut registry = SessionRegistry::new();
        registry.start("conv-1", RequestParams::new()).unwrap();
        assert!(registry.start("conv-2", RequestParams::new()).is_ok());
    }

    #[test]
    fn test_teardown_clears_and_ignores_stale_handles() {
        let mut registry = SessionRegistry::new();
        let handle = registry.start("conv-1", RequestParams::new()).unwrap();
        registry.get_mut(&handle).unwrap().answer().push_str("abc");

        registry.cancel(&handle);
        assert_eq!(registry.read_partial_answer(&handle), "abc");

        assert!(registry.teardown(&handle));
        assert_eq!(handle.read_partial_answer(), "");
        assert!(!registry.teardown(&handle));
        assert!(!registry.cancel(&handle));
    }

    #[test]
    fn test_superseded_handle_cannot_tear_down_successor() {
        let mut registry = SessionRegistry::new();
        let old = registry.start("conv-1", RequestParams::new()).unwrap();
        registry.cancel(&old);
        let new = registry.start("conv-1", RequestParams::new()).unwrap();

        assert!(!registry.teardown(&old));
        assert!(registry.get(&new).is_some());
    }
}
