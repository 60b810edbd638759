//! # events
//!
//! Defines [`AgentEvent`] — every message the agent streams to observers.
//!
//! Wire shape is a tagged object:
//! ```json
//! { "type": "decision", "payload": { "position_id": 7, "message": "...", "timestamp": "...", "data": { } } }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::PositionId;

// ─── EventBody ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBody {
    pub position_id: PositionId,
    pub message:     String,
    pub timestamp:   DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data:        Option<Value>,
}

// ─── AgentEvent ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Intermediate reasoning ("fetching position #7 …").
    Thought(EventBody),
    /// Scoring finished — data carries the recommendation.
    Analysis(EventBody),
    /// The Change Policy accepted a recommendation.
    Decision(EventBody),
    /// Executor accepted the strategy change — data carries the tx id.
    Execution(EventBody),
    /// Something failed for this position; the loop carries on.
    Error(EventBody),
}

impl AgentEvent {
    pub fn thought(position_id: PositionId, message: impl Into<String>) -> Self {
        AgentEvent::Thought(EventBody::new(position_id, message))
    }

    pub fn analysis(position_id: PositionId, message: impl Into<String>) -> Self {
        AgentEvent::Analysis(EventBody::new(position_id, message))
    }

    pub fn decision(position_id: PositionId, message: impl Into<String>) -> Self {
        AgentEvent::Decision(EventBody::new(position_id, message))
    }

    pub fn execution(position_id: PositionId, message: impl Into<String>) -> Self {
        AgentEvent::Execution(EventBody::new(position_id, message))
    }

    pub fn error(position_id: PositionId, message: impl Into<String>) -> Self {
        AgentEvent::Error(EventBody::new(position_id, message))
    }

    /// Attach a structured payload.  Serialization failures drop the payload
    /// rather than the event.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        self.body_mut().data = serde_json::to_value(data).ok();
        self
    }

    pub fn body(&self) -> &EventBody {
        match self {
            AgentEvent::Thought(b)
            | AgentEvent::Analysis(b)
            | AgentEvent::Decision(b)
            | AgentEvent::Execution(b)
            | AgentEvent::Error(b) => b,
        }
    }

    fn body_mut(&mut self) -> &mut EventBody {
        match self {
            AgentEvent::Thought(b)
            | AgentEvent::Analysis(b)
            | AgentEvent::Decision(b)
            | AgentEvent::Execution(b)
            | AgentEvent::Error(b) => b,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Thought(_)   => "thought",
            AgentEvent::Analysis(_)  => "analysis",
            AgentEvent::Decision(_)  => "decision",
            AgentEvent::Execution(_) => "execution",
            AgentEvent::Error(_)     => "error",
        }
    }

    /// JSON text frame for the WebSocket.
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","payload":{"message":"SERIALIZATION_ERROR"}}"#.to_string())
    }
}

impl EventBody {
    fn new(position_id: PositionId, message: impl Into<String>) -> Self {
        Self {
            position_id,
            message: message.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }
}
