pub mod events;
pub mod message;
pub mod request;
pub mod search;
pub mod tool;
pub mod usage;

pub use events::StreamEvent;
pub use message::{
    user_content, Conversation, MediaKind, MediaRef, Message, MessagePatch, MessageRole, NewMessage,
    TranscriptionStatus,
};
pub use request::{GenerationRequest, RequestParams};
pub use search::{SearchSource, SearchStep, SearchStepKind, StepDetails};
pub use tool::{ToolCallRecord, ToolCallStatus, ToolFamily};
pub use usage::{ContextInfo, MediaAnalysisSource, UsageIndicators};
