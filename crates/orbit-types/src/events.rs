use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events pushed from the server to a connected client over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum SocketEvent {
    /// Sent once after the connection is authenticated. Never acknowledged.
    Ready {
        #[serde(rename = "userId")]
        user_id: Uuid,
        username: String,
    },

    /// A token delta for the placeholder message `id`.
    UpdateMessage(MessageDelta),

    /// Generation for the placeholder message `id` is over; `content` is the full text.
    FinishMessage(MessageDelta),
}

impl SocketEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::UpdateMessage(_) => "update-message",
            Self::FinishMessage(_) => "finish-message",
        }
    }

    /// Whether the client is expected to answer this event with an ack.
    pub fn wants_ack(&self) -> bool {
        !matches!(self, Self::Ready { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDelta {
    /// Correlation id: the id of the placeholder message being generated.
    pub id: String,
    pub chat_id: Uuid,
    pub content: String,
}

/// One server -> client websocket frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
    pub event: SocketEvent,
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GatewayCommand {
    /// Response to an envelope that carried an `ackId`.
    Ack {
        #[serde(rename = "ackId")]
        ack_id: u64,
        success: bool,
        message: String,
    },
}

impl GatewayCommand {
    pub fn ack(ack_id: u64, response: Acknowledgement) -> Self {
        Self::Ack {
            ack_id,
            success: response.success,
            message: response.message,
        }
    }
}

/// Body of an acknowledgement, also what the emitting side sees on timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub success: bool,
    pub message: String,
}

impl Acknowledgement {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: "OK".into(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            success: false,
            message: "Timeout".into(),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            success: false,
            message: "Disconnected".into(),
        }
    }
}
