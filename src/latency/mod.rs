pub mod consumer;
pub mod feed;
pub mod filters;
pub mod history;
pub mod producer;
pub mod publisher;
pub mod report;
pub mod scheduler;
pub mod schema;
pub mod sse;
pub mod types;

pub const STREAM_PATH: &str = "/api/latency/stream";
pub const READY_EVENT: &str = "ready";
pub const LATENCY_FRAME_EVENT: &str = "latency-frame";
pub const HEARTBEAT_EVENT: &str = "heartbeat";
