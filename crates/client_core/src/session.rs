//! Room session control: which room this inbox is subscribed to, and the
//! ordered message list shown for it.
//!
//! Every selection takes a fresh token. Results of a backend call are applied
//! only while their token is still the latest, so a slow response for an
//! abandoned partner can never overwrite the current conversation. Leaving the
//! old room and joining the new one happen while the state lock is held,
//! which keeps the relay subscription and the accepted-room gate in step.

use std::sync::Arc;

use futures::StreamExt;
use shared::{
    domain::{RoomId, UserId},
    protocol::{ChatMessage, ConversationPartner, RelayCommand, RelayEvent, SendMessageRequest},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use crate::{
    api::InboxBackend,
    error::{FailureKind, InboxError, InboxFailure},
    relay::{RelayLink, RelayNotice},
    ClientEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomPhase {
    NoRoom,
    Joining { token: u64 },
    Active(RoomId),
    Closed,
}

/// Snapshot of the conversation currently on screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSession {
    pub room_id: Option<RoomId>,
    pub partner: Option<ConversationPartner>,
    pub messages: Vec<ChatMessage>,
    pub is_loading_history: bool,
    pub load_error: Option<String>,
}

impl RoomSession {
    fn loading(partner: ConversationPartner) -> Self {
        Self {
            room_id: None,
            partner: Some(partner),
            messages: Vec::new(),
            is_loading_history: true,
            load_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Applied,
    /// A newer selection replaced this one before it finished.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveDisposition {
    Appended,
    /// Held until the history for the room arrives.
    Buffered,
    Dropped,
}

struct ControllerState {
    phase: RoomPhase,
    latest_token: u64,
    session: RoomSession,
    pending_live: Vec<ChatMessage>,
}

pub struct RoomSessionController {
    user_id: UserId,
    backend: Arc<dyn InboxBackend>,
    relay: Arc<dyn RelayLink>,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<ClientEvent>,
}

impl RoomSessionController {
    pub fn new(
        user_id: UserId,
        backend: Arc<dyn InboxBackend>,
        relay: Arc<dyn RelayLink>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            user_id,
            backend,
            relay,
            state: Mutex::new(ControllerState {
                phase: RoomPhase::NoRoom,
                latest_token: 0,
                session: RoomSession::default(),
                pending_live: Vec::new(),
            }),
            events,
        })
    }

    pub async fn session(&self) -> RoomSession {
        self.state.lock().await.session.clone()
    }

    pub async fn phase(&self) -> RoomPhase {
        self.state.lock().await.phase.clone()
    }

    pub async fn active_room(&self) -> Option<RoomId> {
        match &self.state.lock().await.phase {
            RoomPhase::Active(room_id) => Some(room_id.clone()),
            _ => None,
        }
    }

    pub async fn select_partner(
        &self,
        partner: ConversationPartner,
    ) -> Result<SelectOutcome, InboxError> {
        let token = {
            let mut state = self.state.lock().await;
            if state.phase == RoomPhase::Closed {
                return Err(InboxError::Closed);
            }
            state.latest_token += 1;
            let token = state.latest_token;
            let previous = std::mem::replace(&mut state.phase, RoomPhase::Joining { token });
            if let RoomPhase::Active(room_id) = previous {
                info!(%room_id, "session: leaving room");
                if let Err(err) = self.relay.emit(RelayCommand::leave(room_id)).await {
                    warn!(%err, "session: leaveRoom emit failed");
                }
            }
            state.session = RoomSession::loading(partner.clone());
            state.pending_live.clear();
            self.publish_session(&state.session);
            token
        };
        debug!(token, partner_id = %partner.id, "session: selecting partner");

        let room_id = match self.backend.resolve_room(&partner.id).await {
            Ok(room_id) => room_id,
            Err(err) => return self.fail_selection(token, FailureKind::RoomResolution, err).await,
        };

        {
            let mut state = self.state.lock().await;
            if state.latest_token != token {
                debug!(token, %room_id, "session: discarding stale room resolution");
                return Ok(SelectOutcome::Superseded);
            }
            state.phase = RoomPhase::Active(room_id.clone());
            state.session.room_id = Some(room_id.clone());
            info!(%room_id, partner_id = %partner.id, "session: joining room");
            if let Err(err) = self.relay.emit(RelayCommand::join(room_id.clone())).await {
                warn!(%room_id, %err, "session: joinRoom emit failed");
                self.report(InboxFailure::new(FailureKind::RelayDisconnect, &err));
            }
        }

        let history = match self.backend.fetch_history(&room_id).await {
            Ok(history) => history,
            Err(err) => return self.fail_selection(token, FailureKind::HistoryFetch, err).await,
        };

        let mut state = self.state.lock().await;
        if state.latest_token != token {
            debug!(token, %room_id, "session: discarding stale history");
            return Ok(SelectOutcome::Superseded);
        }
        let live = std::mem::take(&mut state.pending_live);
        let mut messages = history;
        for message in live {
            if !messages.iter().any(|existing| existing.id == message.id) {
                messages.push(message);
            }
        }
        debug!(%room_id, count = messages.len(), "session: history loaded");
        state.session.messages = messages;
        state.session.is_loading_history = false;
        self.publish_session(&state.session);
        Ok(SelectOutcome::Applied)
    }

    async fn fail_selection(
        &self,
        token: u64,
        kind: FailureKind,
        err: InboxError,
    ) -> Result<SelectOutcome, InboxError> {
        let mut state = self.state.lock().await;
        if state.latest_token != token {
            debug!(token, %err, "session: ignoring failure of superseded selection");
            return Ok(SelectOutcome::Superseded);
        }
        if kind == FailureKind::RoomResolution {
            state.phase = RoomPhase::NoRoom;
        }
        let failure = InboxFailure::new(kind, &err);
        warn!(token, kind = ?kind, %err, "session: failed to load chat");
        state.pending_live.clear();
        state.session.messages.clear();
        state.session.is_loading_history = false;
        state.session.load_error = Some(failure.message.clone());
        self.publish_session(&state.session);
        self.report(failure);
        Err(err)
    }

    pub async fn receive_live(&self, message: ChatMessage) -> LiveDisposition {
        let mut state = self.state.lock().await;
        let accepted = matches!(&state.phase, RoomPhase::Active(room_id) if *room_id == message.room_id);
        if !accepted {
            debug!(room_id = %message.room_id, message_id = %message.id, "session: dropping message for inactive room");
            return LiveDisposition::Dropped;
        }
        if state.session.is_loading_history {
            state.pending_live.push(message);
            return LiveDisposition::Buffered;
        }
        state.session.messages.push(message.clone());
        // The room is live again after a failed history load; redraw without the error.
        if let Some(reason) = state.session.load_error.take() {
            debug!(room_id = %message.room_id, %reason, "session: live message clears load error");
            self.publish_session(&state.session);
            return LiveDisposition::Appended;
        }
        let _ = self.events.send(ClientEvent::MessageAppended {
            room_id: message.room_id.clone(),
            message,
        });
        LiveDisposition::Appended
    }

    /// Persists a message. It shows up once the relay echoes it back.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, InboxError> {
        if text.trim().is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        let request = {
            let state = self.state.lock().await;
            match (&state.phase, &state.session.partner) {
                (RoomPhase::Closed, _) => return Err(InboxError::Closed),
                (RoomPhase::Active(room_id), Some(partner)) => SendMessageRequest {
                    sender_id: self.user_id.clone(),
                    receiver_id: partner.id.clone(),
                    room_id: room_id.clone(),
                    message: text.to_string(),
                },
                _ => return Err(InboxError::NoActiveRoom),
            }
        };

        let room_id = request.room_id.clone();
        if let Err(err) = self.backend.post_message(request).await {
            warn!(%room_id, %err, "session: message send failed");
            self.report(InboxFailure::new(FailureKind::Send, &err).with_unsent_text(text));
            return Err(err);
        }
        debug!(%room_id, "session: message posted");
        Ok(SendOutcome::Sent)
    }

    /// Starts the one relay subscriber for this controller's connection.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut notices = BroadcastStream::new(self.relay.subscribe());
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(notice) = notices.next().await {
                match notice {
                    Ok(RelayNotice::Event(RelayEvent::ReceiveMessage(message))) => {
                        controller.receive_live(message).await;
                    }
                    Ok(RelayNotice::Reconnected) => controller.rejoin_active_room().await,
                    Ok(RelayNotice::Disconnected { reason }) => {
                        controller.report(InboxFailure::new(
                            FailureKind::RelayDisconnect,
                            &InboxError::Relay(reason),
                        ));
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "session: relay listener lagged; messages were lost");
                    }
                }
            }
            debug!("session: relay listener finished");
        })
    }

    async fn rejoin_active_room(&self) {
        let state = self.state.lock().await;
        if let RoomPhase::Active(room_id) = &state.phase {
            info!(%room_id, "session: rejoining room after reconnect");
            if let Err(err) = self.relay.emit(RelayCommand::join(room_id.clone())).await {
                warn!(%room_id, %err, "session: rejoin failed");
            }
        }
    }

    /// Leaves the active room and refuses further work.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.phase == RoomPhase::Closed {
            return;
        }
        state.latest_token += 1;
        if let RoomPhase::Active(room_id) = std::mem::replace(&mut state.phase, RoomPhase::Closed)
        {
            let _ = self.relay.emit(RelayCommand::leave(room_id)).await;
        }
        state.pending_live.clear();
        state.session.is_loading_history = false;
    }

    fn publish_session(&self, session: &RoomSession) {
        let _ = self.events.send(ClientEvent::SessionChanged(session.clone()));
    }

    fn report(&self, failure: InboxFailure) {
        let _ = self.events.send(ClientEvent::Failure(failure));
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
