mod commands;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings,
    render::{
        render_line, render_view, Alignment, ComposeBuffer, InboxView, RenderedLine, SubmitTrigger,
    },
    ClientEvent, HttpInboxBackend, Inbox, InboxError, WsRelayConnector,
};
use shared::domain::UserId;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tracing_subscriber::EnvFilter;

use crate::commands::{parse_command, Command, Dispatcher};

/// Terminal front end for the room-based inbox.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    relay_url: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    token: Option<String>,
    /// Redial attempts after the relay drops; 0 disables reconnecting.
    #[arg(long)]
    reconnect_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings().context("failed to load inbox settings")?;
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }
    if let Some(relay_url) = args.relay_url {
        settings.relay_url = relay_url;
    }
    if let Some(user_id) = args.user_id {
        settings.user_id = Some(UserId::new(user_id));
    }
    if let Some(token) = args.token {
        settings.token = Some(token);
    }
    if let Some(attempts) = args.reconnect_attempts {
        settings.reconnect_attempts = attempts;
    }
    settings.validate()?;

    let token = settings.token.clone().ok_or(InboxError::NotSignedIn)?;
    let user_id = settings.user_id.clone().ok_or(InboxError::NotSignedIn)?;
    let backend = HttpInboxBackend::new(&settings.api_url, token)?;
    let connector = WsRelayConnector::new(settings.reconnect_policy());
    let inbox = Arc::new(
        Inbox::mount(&settings, &connector, Arc::new(backend))
            .await
            .context("failed to open inbox")?,
    );

    let printer = tokio::spawn(print_events(
        Arc::clone(&inbox),
        user_id,
        inbox.subscribe_events(),
    ));
    print_conversations(&inbox).await;
    println!("commands: /list, /open <n>, /refresh, /quit; anything else is sent");

    let dispatcher = Dispatcher::new(Arc::clone(&inbox));
    let mut compose = ComposeBuffer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Command::Quit => break,
            Command::List => print_conversations(&inbox).await,
            Command::Refresh => {
                let inbox = Arc::clone(&inbox);
                tokio::spawn(async move {
                    if inbox.refresh_conversations().await.is_ok() {
                        print_conversations(&inbox).await;
                    }
                });
            }
            Command::Open(index) => {
                let started = match index {
                    Some(index) => dispatcher.open(index).await.is_some(),
                    None => false,
                };
                if !started {
                    println!("usage: /open <n> with n from /list");
                }
            }
            Command::Say(text) => {
                compose.set(text);
                if let Some(text) = compose.submit(SubmitTrigger::Enter) {
                    dispatcher.say(text);
                }
            }
        }
    }

    dispatcher.finish().await;
    inbox.unmount().await;
    printer.abort();
    Ok(())
}

async fn print_conversations(inbox: &Inbox) {
    let partners = inbox.conversations().await;
    if partners.is_empty() {
        println!("No conversations found.");
        return;
    }
    for (idx, partner) in partners.iter().enumerate() {
        println!("{:>3}. {} ({})", idx + 1, partner.name, partner.role.label());
    }
}

fn print_line(line: &RenderedLine) {
    let time = if line.time_label.is_empty() {
        String::new()
    } else {
        format!(" [{}]", line.time_label)
    };
    match line.alignment {
        Alignment::Right => println!("{:>60}{time}", line.text),
        Alignment::Left => println!("{}{time}", line.text),
    }
}

async fn print_events(
    inbox: Arc<Inbox>,
    user_id: UserId,
    mut events: broadcast::Receiver<ClientEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "inbox: event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ClientEvent::SessionChanged(session) => {
                let view = render_view(&user_id, &inbox.conversations().await, &session);
                if let Some(header) = view.header() {
                    println!("== {header} ==");
                }
                if let Some(placeholder) = view.placeholder() {
                    println!("{placeholder}");
                }
                match view {
                    InboxView::LoadFailed { reason, .. } => {
                        println!("! {reason}");
                    }
                    InboxView::Conversation { lines, .. } => {
                        lines.iter().for_each(print_line);
                    }
                    _ => {}
                }
            }
            ClientEvent::MessageAppended { message, .. } => {
                print_line(&render_line(&user_id, &message));
            }
            ClientEvent::ConversationsLoaded(partners) => {
                tracing::debug!(count = partners.len(), "inbox: conversations loaded");
            }
            ClientEvent::Failure(failure) => {
                println!("! {}", failure.toast());
                if let Some(text) = failure.unsent_text {
                    println!("  unsent: {text}");
                }
                if failure.requires_reauth {
                    println!("  sign in again and restart the inbox");
                }
            }
        }
    }
}
