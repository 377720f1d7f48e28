//! Response payloads returned by session operations
//!
//! These are shapes only; wire encoding belongs to the transport.

use serde::Serialize;

/// Result of a queue query. An unknown queue yields `exists = false` with
/// every other field at its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueQueryResponse {
    pub exists: bool,
    pub durable: bool,
    pub temporary: bool,
    /// -1 for unbounded
    pub max_size: i32,
    pub consumer_count: usize,
    pub message_count: usize,
    pub filter_string: Option<String>,
    pub address: Option<String>,
}

impl Default for QueueQueryResponse {
    fn default() -> Self {
        Self {
            exists: false,
            durable: false,
            temporary: false,
            max_size: -1,
            consumer_count: 0,
            message_count: 0,
            filter_string: None,
            address: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindingQueryResponse {
    pub exists: bool,
    pub queue_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateConsumerResponse {
    pub consumer_id: String,
    /// Prefetch echoed back to the client
    pub prefetch: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateBrowserResponse {
    pub browser_id: String,
}
