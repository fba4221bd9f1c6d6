pub mod buffer_utils;
pub mod http;
pub mod traits;
pub mod wire;

pub use buffer_utils::{parse_sse_stream, CircularLineBuffer, SseLineParser};
pub use http::{HttpBackend, HttpBackendConfig};
pub use traits::{EventStream, GenerationBackend};
pub use wire::WireDecoder;
