//! Client side of the room-based inbox: relay connection, room sessions,
//! backend calls and the view model the inbox renders from.

use shared::{
    domain::RoomId,
    protocol::{ChatMessage, ConversationPartner},
};

pub mod api;
pub mod config;
pub mod error;
pub mod inbox;
pub mod relay;
pub mod render;
pub mod session;

pub use api::{HttpInboxBackend, InboxBackend};
pub use config::{load_settings, InboxSettings};
pub use error::{FailureKind, InboxError, InboxFailure};
pub use inbox::Inbox;
pub use relay::{ReconnectPolicy, RelayConnector, RelayLink, RelayNotice, WsRelayConnector};
pub use session::{RoomSession, RoomSessionController, SelectOutcome, SendOutcome};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationsLoaded(Vec<ConversationPartner>),
    SessionChanged(RoomSession),
    MessageAppended {
        room_id: RoomId,
        message: ChatMessage,
    },
    Failure(InboxFailure),
}
