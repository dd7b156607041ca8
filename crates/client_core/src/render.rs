//! View model for the message stream: what a front end draws for the
//! current inbox state, independent of any widget toolkit.

use chrono::{DateTime, Local};
use shared::{
    domain::UserId,
    protocol::{ChatMessage, ConversationPartner},
};

use crate::session::RoomSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub alignment: Alignment,
    pub text: String,
    pub time_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxView {
    NoConversations,
    NoSelection,
    Loading {
        partner: ConversationPartner,
    },
    LoadFailed {
        partner: ConversationPartner,
        reason: String,
    },
    Conversation {
        partner: ConversationPartner,
        lines: Vec<RenderedLine>,
    },
}

impl InboxView {
    pub fn header(&self) -> Option<String> {
        match self {
            InboxView::Loading { partner }
            | InboxView::LoadFailed { partner, .. }
            | InboxView::Conversation { partner, .. } => Some(format!(
                "Chat with {} ({})",
                partner.name,
                partner.role.label()
            )),
            InboxView::NoConversations | InboxView::NoSelection => None,
        }
    }

    pub fn placeholder(&self) -> Option<&'static str> {
        match self {
            InboxView::NoConversations => Some("No conversations found."),
            InboxView::NoSelection => {
                Some("Select a conversation from the sidebar to start messaging.")
            }
            InboxView::Loading { .. } => Some("Loading messages..."),
            _ => None,
        }
    }
}

pub fn render_view(
    current_user: &UserId,
    conversations: &[ConversationPartner],
    session: &RoomSession,
) -> InboxView {
    let Some(partner) = session.partner.clone() else {
        return if conversations.is_empty() {
            InboxView::NoConversations
        } else {
            InboxView::NoSelection
        };
    };
    if session.is_loading_history {
        return InboxView::Loading { partner };
    }
    if let Some(reason) = &session.load_error {
        return InboxView::LoadFailed {
            partner,
            reason: reason.clone(),
        };
    }
    InboxView::Conversation {
        partner,
        lines: session
            .messages
            .iter()
            .map(|message| render_line(current_user, message))
            .collect(),
    }
}

pub fn render_line(current_user: &UserId, message: &ChatMessage) -> RenderedLine {
    let alignment = if &message.sender_id == current_user {
        Alignment::Right
    } else {
        Alignment::Left
    };
    RenderedLine {
        alignment,
        text: message.text.clone(),
        time_label: format_timestamp(&message.timestamp),
    }
}

/// Local `HH:MM`, or an empty string when the timestamp is missing or invalid.
pub fn format_timestamp(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed.with_timezone(&Local).format("%H:%M").to_string(),
        Err(err) => {
            tracing::warn!(timestamp = raw, %err, "render: invalid timestamp");
            String::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    Enter,
    Button,
    FocusLost,
}

/// Controlled compose input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeBuffer {
    text: String,
}

impl ComposeBuffer {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn push_str(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Returns the text to send and clears the buffer. Blank input and focus
    /// changes submit nothing.
    pub fn submit(&mut self, trigger: SubmitTrigger) -> Option<String> {
        if trigger == SubmitTrigger::FocusLost || self.text.trim().is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.text))
    }
}

/// Tracks list length so the view scrolls to the newest message when it grows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollFollower {
    seen: usize,
}

impl ScrollFollower {
    pub fn observe(&mut self, len: usize) -> bool {
        let grew = len > self.seen;
        self.seen = len;
        grew
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
