use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, PartnerRole, RoomId, UserId};

/// A persisted chat message as the backend returns and relays it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub room_id: RoomId,
    #[serde(rename = "message")]
    pub text: String,
    /// Raw ISO-8601 string; older records may carry an empty or malformed value.
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPartner {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub role: PartnerRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub room_id: RoomId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: RoomId,
}

/// Frames the client emits on the relay connection. Each is one WebSocket
/// text frame of JSON, `{"event": ..., "data": ...}`, not a socket.io packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RelayCommand {
    RegisterUser(UserId),
    JoinRoom(RoomRef),
    LeaveRoom(RoomRef),
}

impl RelayCommand {
    pub fn join(room_id: RoomId) -> Self {
        RelayCommand::JoinRoom(RoomRef { room_id })
    }

    pub fn leave(room_id: RoomId) -> Self {
        RelayCommand::LeaveRoom(RoomRef { room_id })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelayCommand::RegisterUser(_) => "registerUser",
            RelayCommand::JoinRoom(_) => "joinRoom",
            RelayCommand::LeaveRoom(_) => "leaveRoom",
        }
    }
}

/// Frames the relay pushes to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RelayEvent {
    ReceiveMessage(ChatMessage),
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
