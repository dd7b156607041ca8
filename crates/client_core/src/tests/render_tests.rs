use super::*;
use shared::domain::{MessageId, PartnerRole, RoomId};

fn partner() -> ConversationPartner {
    ConversationPartner {
        id: UserId::from("dist-1"),
        name: "Northside Distribution".to_string(),
        role: PartnerRole::Distributor,
    }
}

fn message(id: &str, sender: &str, text: &str, timestamp: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::from(id),
        sender_id: UserId::from(sender),
        receiver_id: UserId::from("other"),
        room_id: RoomId::from("dist-1_shop-1"),
        text: text.to_string(),
        timestamp: timestamp.to_string(),
    }
}

#[test]
fn empty_inbox_has_distinct_states() {
    let me = UserId::from("shop-1");
    let session = RoomSession::default();

    assert_eq!(render_view(&me, &[], &session), InboxView::NoConversations);
    assert_eq!(
        render_view(&me, &[partner()], &session),
        InboxView::NoSelection
    );
    assert_eq!(
        InboxView::NoConversations.placeholder(),
        Some("No conversations found.")
    );
}

#[test]
fn loading_state_shows_new_partner_header() {
    let me = UserId::from("shop-1");
    let session = RoomSession {
        partner: Some(partner()),
        is_loading_history: true,
        ..RoomSession::default()
    };

    let view = render_view(&me, &[partner()], &session);
    assert_eq!(view, InboxView::Loading { partner: partner() });
    assert_eq!(
        view.header().as_deref(),
        Some("Chat with Northside Distribution (Distributor)")
    );
    assert_eq!(view.placeholder(), Some("Loading messages..."));
}

#[test]
fn load_error_is_rendered_instead_of_messages() {
    let me = UserId::from("shop-1");
    let session = RoomSession {
        partner: Some(partner()),
        load_error: Some("Failed to fetch messages".to_string()),
        ..RoomSession::default()
    };

    assert!(matches!(
        render_view(&me, &[partner()], &session),
        InboxView::LoadFailed { .. }
    ));
}

#[test]
fn own_messages_align_right() {
    let me = UserId::from("shop-1");
    let session = RoomSession {
        partner: Some(partner()),
        messages: vec![
            message("m1", "dist-1", "Stock arrived", "2025-05-01T10:30:00Z"),
            message("m2", "shop-1", "Great, thanks", "2025-05-01T10:31:00Z"),
        ],
        ..RoomSession::default()
    };

    let InboxView::Conversation { lines, .. } = render_view(&me, &[partner()], &session) else {
        panic!("expected conversation view");
    };
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].alignment, Alignment::Left);
    assert_eq!(lines[0].text, "Stock arrived");
    assert_eq!(lines[1].alignment, Alignment::Right);
}

#[test]
fn timestamps_format_as_clock_time_or_empty() {
    let label = format_timestamp("2025-05-01T10:30:00.000Z");
    assert_eq!(label.len(), 5);
    assert_eq!(&label[2..3], ":");

    assert_eq!(format_timestamp(""), "");
    assert_eq!(format_timestamp("yesterday-ish"), "");
}

#[test]
fn compose_submits_on_enter_or_button_only() {
    let mut compose = ComposeBuffer::default();
    compose.set("Please confirm batch 42");

    assert_eq!(compose.submit(SubmitTrigger::FocusLost), None);
    assert_eq!(compose.text(), "Please confirm batch 42");

    assert_eq!(
        compose.submit(SubmitTrigger::Enter).as_deref(),
        Some("Please confirm batch 42")
    );
    assert_eq!(compose.text(), "");

    compose.push_str("   ");
    assert_eq!(compose.submit(SubmitTrigger::Button), None);

    compose.push_str("ok");
    assert_eq!(compose.submit(SubmitTrigger::Button).as_deref(), Some("   ok"));
}

#[test]
fn scroll_follows_growth_only() {
    let mut follower = ScrollFollower::default();
    assert!(!follower.observe(0));
    assert!(follower.observe(3));
    assert!(!follower.observe(3));
    assert!(follower.observe(4));
    assert!(!follower.observe(0));
}
