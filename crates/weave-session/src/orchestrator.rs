use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatcher::{Dispatch, EventDispatcher};
use crate::lifecycle::{FlushPayload, FlushPolicy, InterruptTrigger, LifecycleController};
use crate::reconcile::Reconciler;
use crate::registry::{ConcurrentSessionError, SessionRegistry};
use crate::session::SessionHandle;
use crate::state::ViewState;
use weave_client::{EventStream, GenerationBackend};
use weave_persist::{MessageStore, PersistError};
use weave_types::{user_content, GenerationRequest, Message, MessageRole, RequestParams, StreamEvent};

pub const DEFAULT_INTERRUPTED_MARKER: &str = "*[Resposta interrompida]*";
pub const DEFAULT_CONVERSATION_TITLE: &str = "Nova conversa";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Appended to a partial answer persisted after an interruption
    pub interrupted_marker: String,
    /// Title of conversations created implicitly by `send`
    pub default_title: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interrupted_marker: DEFAULT_INTERRUPTED_MARKER.to_string(),
            default_title: DEFAULT_CONVERSATION_TITLE.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Concurrent(#[from] ConcurrentSessionError),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Backend error: {0}")]
    Backend(anyhow::Error),
}

struct Core {
    registry: SessionRegistry,
    active: Option<SessionHandle>,
}

impl Core {
    fn clear_active(&mut self, handle: &SessionHandle) {
        if self.active.as_ref().map(SessionHandle::id) == Some(handle.id()) {
            self.active = None;
        }
    }
}

/// Outcome of one pumped event
enum Pump {
    Continue,
    Stop { reconcile: bool },
}

struct Inner {
    backend: Arc<dyn GenerationBackend>,
    config: SessionConfig,
    store: Arc<dyn MessageStore>,
    lifecycle: LifecycleController,
    reconciler: Reconciler,
    core: Mutex<Core>,
    view: watch::Sender<ViewState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, handle: &SessionHandle) -> bool {
        self.lock()
            .registry
            .get(handle)
            .is_some_and(|session| !session.is_cancelled())
    }

    /// Apply one event under the core lock
    fn dispatch(&self, handle: &SessionHandle, event: StreamEvent) -> Pump {
        let mut core = self.lock();
        let Some(session) = core.registry.get_mut(handle) else {
            return Pump::Stop { reconcile: false };
        };

        let live = !session.is_cancelled();
        tracing::trace!(
            session_id = %handle.id(),
            event = event.kind(),
            live,
            "Dispatching event"
        );
        let mut visible = false;
        let mut outcome = Dispatch::Continue;
        self.view.send_if_modified(|view| {
            visible = live && view.is_visible(handle.conversation_id());
            outcome = EventDispatcher::apply(session, visible.then_some(view), event);
            visible
        });

        match outcome {
            Dispatch::Continue => Pump::Continue,
            Dispatch::Completed(message) => {
                if live {
                    tracing::info!(
                        conversation_id = %handle.conversation_id(),
                        session_id = %handle.id(),
                        chars = message.content.chars().count(),
                        tool_calls = message.tool_calls.len(),
                        "Generation complete"
                    );
                }
                core.registry.teardown(handle);
                core.clear_active(handle);
                Pump::Stop { reconcile: visible }
            }
            Dispatch::Failed(error) => {
                if live {
                    tracing::error!(
                        conversation_id = %handle.conversation_id(),
                        session_id = %handle.id(),
                        error = %error,
                        "Generation failed"
                    );
                }
                core.registry.teardown(handle);
                core.clear_active(handle);
                Pump::Stop { reconcile: false }
            }
        }
    }

    /// Single consumer of a session's stream
    async fn pump(self: Arc<Self>, handle: SessionHandle, mut stream: EventStream) {
        let mut terminated = false;
        let mut reconcile = false;

        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => StreamEvent::error(e.to_string()),
            };
            if let Pump::Stop { reconcile: fetch } = self.dispatch(&handle, event) {
                terminated = true;
                reconcile = fetch;
                break;
            }
        }

        if !terminated && self.is_live(&handle) {
            self.dispatch(&handle, StreamEvent::error("stream closed before completion"));
        }
        if reconcile {
            self.reconcile(handle.conversation_id()).await;
        }
        tracing::debug!(session_id = %handle.id(), "Stream consumer finished");
    }

    async fn reconcile(&self, conversation_id: &str) {
        let Some(messages) = self.reconciler.fetch(conversation_id).await else {
            return;
        };
        self.view
            .send_if_modified(|view| Reconciler::install(view, conversation_id, messages));
    }

    /// Synchronous phase of an interruption of the active session
    fn begin_interrupt(&self, trigger: InterruptTrigger) -> Option<(SessionHandle, Option<FlushPayload>)> {
        let mut guard = self.lock();
        let core = &mut *guard;
        let handle = core.active.take()?;

        tracing::info!(
            conversation_id = %handle.conversation_id(),
            session_id = %handle.id(),
            trigger = %trigger,
            "Interrupting generation"
        );

        let mut payload = None;
        self.view.send_if_modified(|view| {
            let visible = view.is_visible(handle.conversation_id());
            payload = self
                .lifecycle
                .begin(&mut core.registry, visible.then_some(view), &handle, trigger);
            visible
        });
        Some((handle, payload))
    }

    /// Full awaited interruption. Returns false if nothing was streaming.
    async fn interrupt(&self, trigger: InterruptTrigger) -> bool {
        let Some((handle, payload)) = self.begin_interrupt(trigger) else {
            return false;
        };
        if let Some(payload) = payload {
            self.lifecycle.deliver(payload, trigger.flush_policy()).await;
        }
        self.lock().registry.teardown(&handle);
        true
    }
}

/// Client-side coordinator of generation sessions for one chat view
pub struct ChatOrchestrator {
    inner: Arc<Inner>,
}

impl ChatOrchestrator {
    pub fn new(backend: Arc<dyn GenerationBackend>, store: Arc<dyn MessageStore>, config: SessionConfig) -> Self {
        let (view, _) = watch::channel(ViewState::default());
        let inner = Inner {
            lifecycle: LifecycleController::new(store.clone(), config.interrupted_marker.clone()),
            reconciler: Reconciler::new(store.clone()),
            backend,
            config,
            store,
            core: Mutex::new(Core {
                registry: SessionRegistry::new(),
                active: None,
            }),
            view,
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.inner.view.subscribe()
    }

    pub fn snapshot(&self) -> ViewState {
        self.inner.view.borrow().clone()
    }

    pub fn active_session(&self) -> Option<SessionHandle> {
        self.inner.lock().active.clone()
    }

    /// Send a user message and start streaming the reply.
    ///
    /// Returns once the stream is open; events are consumed on a spawned task.
    pub async fn send(&self, content: &str, params: RequestParams) -> Result<SessionHandle, OrchestratorError> {
        if content.trim().is_empty() && params.media.is_none() {
            return Err(OrchestratorError::EmptyMessage);
        }

        let visible = self.inner.view.borrow().conversation_id.clone();
        let conversation_id = match visible {
            Some(id) => id,
            None => self.create_conversation().await?,
        };

        let handle = {
            let mut core = self.inner.lock();
            if let Some(active) = core.active.as_ref().filter(|h| !h.is_cancelled()) {
                return Err(ConcurrentSessionError {
                    conversation_id: active.conversation_id().to_string(),
                    session_id: active.id(),
                }
                .into());
            }
            let handle = core.registry.start(&conversation_id, params.clone())?;
            core.active = Some(handle.clone());
            tracing::debug!(
                session_id = %handle.id(),
                active_sessions = core.registry.active_count(),
                "Session registered"
            );

            let display = user_content(content, params.media.as_ref());
            let mut user_message = Message::new(&conversation_id, MessageRole::User, display).optimistic();
            if let Some(media) = params.media.clone() {
                user_message = user_message.with_media(media);
            }
            self.inner.view.send_if_modified(|view| {
                if !view.is_visible(&conversation_id) {
                    return false;
                }
                view.messages.push(user_message);
                view.begin_streaming();
                true
            });
            handle
        };

        tracing::info!(
            conversation_id = %conversation_id,
            session_id = %handle.id(),
            web_search = params.web_search,
            has_media = params.media.is_some(),
            "Starting generation"
        );

        let request = GenerationRequest::new(&conversation_id, content, params);
        match self.inner.backend.stream(request, handle.cancellation_token()).await {
            Ok(stream) => {
                tokio::spawn(Inner::pump(self.inner.clone(), handle.clone(), stream));
                Ok(handle)
            }
            Err(e) => {
                self.inner.dispatch(&handle, StreamEvent::error(e.to_string()));
                Err(OrchestratorError::Backend(e))
            }
        }
    }

    async fn create_conversation(&self) -> Result<String, OrchestratorError> {
        let conversation = self
            .inner
            .store
            .create_conversation(&self.inner.config.default_title)
            .await?;
        tracing::info!(conversation_id = %conversation.id, "Created conversation");

        self.inner.view.send_if_modified(|view| {
            if view.conversation_id.is_some() {
                return false;
            }
            view.conversation_id = Some(conversation.id.clone());
            true
        });
        Ok(conversation.id)
    }

    /// Stop the active reply, persist what arrived, and reload the conversation
    pub async fn stop(&self) {
        let Some(conversation_id) = self.active_session().map(|h| h.conversation_id().to_string()) else {
            return;
        };
        if self.inner.interrupt(InterruptTrigger::ExplicitStop).await {
            self.inner.reconcile(&conversation_id).await;
        }
    }

    /// Flush the active reply, then show `conversation_id` with its canonical messages
    pub async fn switch_conversation(&self, conversation_id: &str) {
        self.inner.interrupt(InterruptTrigger::ConversationSwitch).await;
        self.inner
            .view
            .send_modify(|view| view.show_conversation(Some(conversation_id.to_string())));
        self.inner.reconcile(conversation_id).await;
    }

    pub async fn open_conversation(&self, conversation_id: &str) {
        self.switch_conversation(conversation_id).await;
    }

    /// Flush the active reply and clear the view; the next send creates a conversation
    pub async fn new_conversation(&self) {
        self.inner.interrupt(InterruptTrigger::ConversationSwitch).await;
        self.inner.view.send_modify(|view| view.show_conversation(None));
    }

    /// Interrupt for view teardown. The flush runs on the runtime when one is available.
    pub fn unmount(&self) -> Option<JoinHandle<()>> {
        let (handle, payload) = self.inner.begin_interrupt(InterruptTrigger::Unmount)?;
        let inner = self.inner.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(async move {
                if let Some(payload) = payload {
                    inner.lifecycle.deliver(payload, FlushPolicy::Awaited).await;
                }
                inner.lock().registry.teardown(&handle);
            })),
            Err(_) => {
                // Nothing left to await on
                if let Some(payload) = payload {
                    inner.lifecycle.beacon(payload);
                }
                inner.lock().registry.teardown(&handle);
                None
            }
        }
    }

    /// Process is going away: one beacon, no waiting, no error handling
    pub fn page_unload(&self) {
        let Some((handle, payload)) = self.inner.begin_interrupt(InterruptTrigger::PageUnload) else {
            return;
        };
        if let Some(payload) = payload {
            self.inner.lifecycle.beacon(payload);
        }
        self.inner.lock().registry.teardown(&handle);
    }
}

impl Drop for ChatOrchestrator {
    fn drop(&mut self) {
        let _ = self.unmount();
    }
}
