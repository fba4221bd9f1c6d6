pub mod dispatcher;
pub mod lifecycle;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod state;

pub use dispatcher::{Dispatch, EventDispatcher};
pub use lifecycle::{FlushPayload, FlushPolicy, InterruptTrigger, LifecycleController};
pub use orchestrator::{ChatOrchestrator, OrchestratorError, SessionConfig};
pub use reconcile::Reconciler;
pub use registry::{ConcurrentSessionError, SessionRegistry};
pub use session::{SessionHandle, SessionId, SharedText, StreamSession};
pub use state::{Notice, ToolFamilyView, ViewState};
