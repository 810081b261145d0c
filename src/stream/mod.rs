//! 流式响应：缓冲、下游回调与协调器

pub mod buffer;
pub mod coordinator;
pub mod sink;

pub use buffer::StreamBuffer;
pub use coordinator::StreamCoordinator;
pub use sink::{EnvelopeSource, StreamSink, ToolCallEnvelope};
