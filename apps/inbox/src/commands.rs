//! Stdin commands and the background tasks that carry them out, so a slow
//! backend never stalls reading the next line.

use std::{sync::Arc, time::Duration};

use client_core::{Inbox, InboxError};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

const SEND_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    List,
    Refresh,
    /// Zero-based index into the conversation list; `None` when unparsable.
    Open(Option<usize>),
    Say(String),
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    match trimmed {
        "/quit" => Command::Quit,
        "/list" => Command::List,
        "/refresh" => Command::Refresh,
        _ if trimmed.starts_with("/open") => Command::Open(
            trimmed
                .trim_start_matches("/open")
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1)),
        ),
        _ => Command::Say(line.to_string()),
    }
}

/// Runs selections concurrently and sends one at a time, in typing order.
pub struct Dispatcher {
    inbox: Arc<Inbox>,
    outbox: mpsc::UnboundedSender<String>,
    sender: JoinHandle<()>,
}

impl Dispatcher {
    pub fn new(inbox: Arc<Inbox>) -> Self {
        let (outbox, queue) = mpsc::unbounded_channel();
        let sender = tokio::spawn(deliver(Arc::clone(&inbox), queue));
        Self {
            inbox,
            outbox,
            sender,
        }
    }

    /// Starts selecting the partner at `index`. Returns `None` when there is
    /// no such partner. The outcome arrives as session events.
    pub async fn open(&self, index: usize) -> Option<JoinHandle<()>> {
        let partner = self.inbox.conversations().await.get(index).cloned()?;
        let inbox = Arc::clone(&self.inbox);
        Some(tokio::spawn(async move {
            let partner_id = partner.id.clone();
            match inbox.select_partner(partner).await {
                Ok(outcome) => debug!(%partner_id, ?outcome, "inbox: selection finished"),
                Err(err) => debug!(%partner_id, %err, "inbox: selection did not complete"),
            }
        }))
    }

    pub fn say(&self, text: String) {
        if self.outbox.send(text).is_err() {
            debug!("inbox: send queue closed");
        }
    }

    /// Lets queued sends finish, up to a short grace period.
    pub async fn finish(self) {
        drop(self.outbox);
        let mut sender = self.sender;
        if tokio::time::timeout(SEND_DRAIN_GRACE, &mut sender).await.is_err() {
            debug!("inbox: abandoning queued sends");
            sender.abort();
        }
    }
}

async fn deliver(inbox: Arc<Inbox>, mut queue: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = queue.recv().await {
        match inbox.send(&text).await {
            Ok(outcome) => debug!(?outcome, "inbox: send finished"),
            Err(err @ (InboxError::NoActiveRoom | InboxError::Closed)) => println!("! {err}"),
            // Backend failures are already broadcast with the unsent text.
            Err(err) => debug!(%err, "inbox: send failed"),
        }
    }
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
