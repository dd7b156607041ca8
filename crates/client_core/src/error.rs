//! Error taxonomy for the inbox: hard errors returned by operations, and the
//! failure reports broadcast to whatever is rendering the inbox.

use shared::error::{ApiException, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("not signed in: missing user id or token")]
    NotSignedIn,
    #[error("no conversation is active")]
    NoActiveRoom,
    #[error("inbox is closed")]
    Closed,
    #[error("invalid relay address `{0}`")]
    InvalidAddress(String),
    #[error("backend returned {status}: {source}")]
    Api {
        status: u16,
        #[source]
        source: ApiException,
    },
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("relay connection failed: {0}")]
    Relay(String),
}

impl InboxError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            InboxError::Api { source, .. } => Some(source.code),
            InboxError::NotSignedIn => Some(ErrorCode::Unauthorized),
            _ => None,
        }
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(
            self.code(),
            Some(ErrorCode::Unauthorized) | Some(ErrorCode::Forbidden)
        )
    }
}

/// Which step of the messaging flow a reported failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Conversations,
    RoomResolution,
    HistoryFetch,
    Send,
    RelayDisconnect,
}

impl FailureKind {
    pub fn headline(self) -> &'static str {
        match self {
            FailureKind::Conversations => "Failed to fetch conversations",
            FailureKind::RoomResolution => "Failed to get room ID",
            FailureKind::HistoryFetch => "Failed to fetch messages",
            FailureKind::Send => "Message send failed",
            FailureKind::RelayDisconnect => "Lost connection to the message relay",
        }
    }
}

/// Non-fatal failure surfaced as a transient notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxFailure {
    pub kind: FailureKind,
    pub message: String,
    pub requires_reauth: bool,
    /// Text of a message that could not be sent, kept so it can be retried.
    pub unsent_text: Option<String>,
}

impl InboxFailure {
    pub fn new(kind: FailureKind, err: &InboxError) -> Self {
        Self {
            kind,
            message: err.to_string(),
            requires_reauth: err.requires_reauth(),
            unsent_text: None,
        }
    }

    pub fn with_unsent_text(mut self, text: impl Into<String>) -> Self {
        self.unsent_text = Some(text.into());
        self
    }

    pub fn toast(&self) -> String {
        format!("{}: {}", self.kind.headline(), self.message)
    }
}
