use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

/// Events sent over the streaming chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatStreamEvent {
    /// Full assistant text received so far (not a delta)
    Snapshot { text: String },

    /// The reply finished and was stored
    Done { message: ChatMessage },

    /// The completion failed; nothing further will be sent
    Error { message: String },
}

impl ChatStreamEvent {
    /// SSE event name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => "snapshot",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
