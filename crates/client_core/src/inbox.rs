use std::sync::Arc;

use shared::protocol::{ConversationPartner, RelayCommand};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    api::InboxBackend,
    config::InboxSettings,
    error::{FailureKind, InboxError, InboxFailure},
    relay::{RelayConnector, RelayLink},
    session::{RoomSession, RoomSessionController, SelectOutcome, SendOutcome},
    ClientEvent,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A mounted inbox view: owns the relay connection, its single listener and
/// the room session controller for as long as the view lives.
pub struct Inbox {
    relay: Arc<dyn RelayLink>,
    controller: Arc<RoomSessionController>,
    backend: Arc<dyn InboxBackend>,
    conversations: Mutex<Vec<ConversationPartner>>,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ClientEvent>,
}

impl Inbox {
    pub async fn mount(
        settings: &InboxSettings,
        connector: &dyn RelayConnector,
        backend: Arc<dyn InboxBackend>,
    ) -> Result<Self, InboxError> {
        let user_id = settings.user_id.clone().ok_or(InboxError::NotSignedIn)?;
        let relay = connector.open(&settings.relay_url).await?;
        if let Err(err) = relay.emit(RelayCommand::RegisterUser(user_id.clone())).await {
            relay.close().await;
            return Err(err);
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let controller = RoomSessionController::new(
            user_id.clone(),
            Arc::clone(&backend),
            Arc::clone(&relay),
            events.clone(),
        );
        let listener = controller.spawn_listener();
        info!(%user_id, relay_url = %settings.relay_url, "inbox: mounted");

        let inbox = Self {
            relay,
            controller,
            backend,
            conversations: Mutex::new(Vec::new()),
            listener: std::sync::Mutex::new(Some(listener)),
            events,
        };
        if let Err(err) = inbox.refresh_conversations().await {
            warn!(%err, "inbox: conversation list unavailable");
        }
        Ok(inbox)
    }

    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationPartner>, InboxError> {
        match self.backend.list_conversations().await {
            Ok(partners) => {
                *self.conversations.lock().await = partners.clone();
                let _ = self
                    .events
                    .send(ClientEvent::ConversationsLoaded(partners.clone()));
                Ok(partners)
            }
            Err(err) => {
                let _ = self.events.send(ClientEvent::Failure(InboxFailure::new(
                    FailureKind::Conversations,
                    &err,
                )));
                Err(err)
            }
        }
    }

    pub async fn conversations(&self) -> Vec<ConversationPartner> {
        self.conversations.lock().await.clone()
    }

    pub async fn select_partner(
        &self,
        partner: ConversationPartner,
    ) -> Result<SelectOutcome, InboxError> {
        self.controller.select_partner(partner).await
    }

    pub async fn send(&self, text: &str) -> Result<SendOutcome, InboxError> {
        self.controller.send(text).await
    }

    pub async fn session(&self) -> RoomSession {
        self.controller.session().await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Tears the view down. Safe to call more than once.
    pub async fn unmount(&self) {
        self.controller.close().await;
        if let Some(listener) = self.take_listener() {
            listener.abort();
        }
        if !self.relay.is_closed() {
            self.relay.close().await;
            info!("inbox: unmounted");
        }
    }

    fn take_listener(&self) -> Option<JoinHandle<()>> {
        match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        if let Some(listener) = self.take_listener() {
            listener.abort();
        }
        if self.relay.is_closed() {
            return;
        }
        let relay = Arc::clone(&self.relay);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { relay.close().await });
        }
    }
}

#[cfg(test)]
#[path = "tests/inbox_tests.rs"]
mod tests;
