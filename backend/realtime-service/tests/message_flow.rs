mod common;

use common::Harness;
use realtime_service::error::AppError;
use realtime_service::models::{MessageStatus, NewMessage, UserProfile};
use realtime_service::repository::{ChatRepository, MessageRepository};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

fn message_id(frame: &Value) -> Uuid {
    serde_json::from_value(frame["messageId"].clone()).expect("messageId")
}

#[tokio::test]
async fn test_concurrent_find_or_create_yields_one_conversation() {
    let h = Harness::new();
    let (alice, bob) = (h.user("Alice").await, h.user("Bob").await);
    let svc = &h.state.conversations;

    let (left, right) = tokio::join!(svc.start_direct(alice, bob), svc.start_direct(bob, alice));
    let (left, left_created) = left.unwrap();
    let (right, right_created) = right.unwrap();

    assert_eq!(left.id, right.id);
    assert!(left_created ^ right_created);
    assert_eq!(left.unread_for(alice), 0);
    assert_eq!(left.unread_for(bob), 0);
    assert_eq!(svc.list(alice).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_direct_honors_privacy_and_rejects_self() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    let bob = Uuid::new_v4();
    let mut private = UserProfile::new(bob, "Bob", "bob");
    private.allow_messages = false;
    h.users.upsert_profile(private).await;

    let svc = &h.state.conversations;
    assert!(matches!(
        svc.start_direct(alice, bob).await,
        Err(AppError::Forbidden)
    ));

    h.users.add_follower(bob, alice).await;
    assert!(svc.start_direct(alice, bob).await.is_ok());

    assert!(matches!(
        svc.start_direct(alice, alice).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        svc.start_direct(alice, Uuid::new_v4()).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_send_fans_out_ack_broadcast_and_chat_updates() {
    let h = Harness::new();
    let (alice, bob) = (h.user("Alice").await, h.user("Bob").await);
    let conversation = h.direct(alice, bob).await;

    let mut a1 = h.connect(alice).await;
    let mut a2 = h.connect(alice).await;
    let mut b = h.connect(bob).await;
    for client in [&a1, &a2, &b] {
        h.send(client, json!({ "type": "join_chat", "conversationId": conversation }))
            .await;
    }
    a1.drain();
    a2.drain();
    b.drain();

    h.send(
        &a1,
        json!({
            "type": "send_message",
            "conversationId": conversation,
            "text": "hello",
            "clientToken": "tmp-42"
        }),
    )
    .await;

    let a1_frames = a1.drain();
    let sent: Vec<&Value> = a1_frames
        .iter()
        .filter(|f| f["type"] == "message_sent")
        .collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["clientToken"], "tmp-42");
    let id = message_id(sent[0]);

    let a2_frames = a2.drain();
    assert!(a2_frames.iter().all(|f| f["type"] != "message_sent"));
    assert!(a2_frames
        .iter()
        .any(|f| f["type"] == "new_message" && f["message"]["id"] == json!(id)));

    let b_frames = b.drain();
    let new_message = b_frames
        .iter()
        .find(|f| f["type"] == "new_message")
        .expect("broadcast to conversation channel");
    assert_eq!(new_message["message"]["text"], "hello");
    assert_eq!(new_message["message"]["sender"]["name"], "Alice");
    assert_eq!(new_message["message"]["status"], "sent");

    let b_update = b_frames
        .iter()
        .find(|f| f["type"] == "chat_updated")
        .expect("private channel update");
    assert_eq!(b_update["unreadCount"], 1);

    let a_update = a1_frames
        .iter()
        .find(|f| f["type"] == "chat_updated")
        .expect("sender sees its own chat list move");
    assert_eq!(a_update["unreadCount"], 0);

    let stored = h.state.stores.messages.get(id).await.unwrap().unwrap();
    assert!(stored.is_read_by(alice));
    assert_eq!(stored.sequence, 1);
    let chat = h.state.stores.chats.get(conversation).await.unwrap().unwrap();
    assert_eq!(chat.unread_for(bob), 1);
    assert_eq!(chat.unread_for(alice), 0);
    assert_eq!(chat.last_message_id, Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_delivery_confirmed_to_both_sides_after_delay() {
    let h = Harness::new();
    let (alice, bob) = (h.user("Alice").await, h.user("Bob").await);
    let conversation = h.direct(alice, bob).await;
    let mut a = h.connect(alice).await;
    let mut b = h.connect(bob).await;

    h.send(
        &a,
        json!({ "type": "send_message", "conversationId": conversation, "text": "ping" }),
    )
    .await;
    let id = message_id(&a.drain_of("message_sent")[0]);
    assert_eq!(
        h.state.stores.messages.get(id).await.unwrap().unwrap().status,
        MessageStatus::Sent
    );

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let to_sender = a.drain_of("message_delivered");
    assert_eq!(to_sender.len(), 1);
    assert_eq!(to_sender[0]["toUserId"], json!(bob));
    assert_eq!(b.drain_of("message_delivered").len(), 1);

    let stored = h.state.stores.messages.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
    assert!(stored.is_delivered_to(bob));
}

#[tokio::test(start_paused = true)]
async fn test_read_before_delivery_timer_stays_read() {
    let h = Harness::new();
    let (alice, bob) = (h.user("Alice").await, h.user("Bob").await);
    let conversation = h.direct(alice, bob).await;
    let mut a = h.connect(alice).await;
    let b = h.connect(bob).await;

    h.send(
        &a,
        json!({ "type": "send_message", "conversationId": conversation, "text": "quick" }),
    )
    .await;
    let id = message_id(&a.drain_of("message_sent")[0]);

    h.send(
        &b,
        json!({ "type": "mark_as_read", "conversationId": conversation, "messageId": id }),
    )
    .await;
    let read = a.drain_of("message_read");
    assert_eq!(read.len(), 1);
    assert_eq!(read[0]["readerId"], json!(bob));
    assert_eq!(read[0]["messageIds"], json!([id]));

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(a.drain_of("message_delivered").is_empty());
    let stored = h.state.stores.messages.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
    let chat = h.state.stores.chats.get(conversation).await.unwrap().unwrap();
    assert_eq!(chat.unread_for(bob), 0);
}

#[tokio::test(start_paused = true)]
async fn test_offline_recipient_reads_on_opening_history() {
    let h = Harness::new();
    let (alice, bob) = (h.user("Alice").await, h.user("Bob").await);
    let conversation = h.direct(alice, bob).await;
    let mut a = h.connect(alice).await;

    h.send(
        &a,
        json!({ "type": "send_message", "conversationId": conversation, "text": "you there?" }),
    )
    .await;
    let id = message_id(&a.drain_of("message_sent")[0]);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(a.drain_of("message_delivered").is_empty());
    assert_eq!(
        h.state.stores.messages.get(id).await.unwrap().unwrap().status,
        MessageStatus::Sent
    );

    let svc = &h.state.conversations;
    assert_eq!(svc.list(bob).await.unwrap()[0].unread_count, 1);

    let page = svc.history(bob, conversation, 1).await.unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].status, MessageStatus::Read);
    assert!(!page.has_more);

    assert_eq!(svc.list(bob).await.unwrap()[0].unread_count, 0);
    let read = a.drain_of("message_read");
    assert_eq!(read.len(), 1);
    assert_eq!(read[0]["messageIds"], json!([id]));
}

#[tokio::test(start_paused = true)]
async fn test_message_notification_pushed_and_deduplicated() {
    let h = Harness::new();
    let (alice, bob) = (h.user("Alice").await, h.user("Bob").await);
    let conversation = h.direct(alice, bob).await;
    let a = h.connect(alice).await;
    let mut b = h.connect(bob).await;

    for text in ["first", "second"] {
        h.send(
            &a,
            json!({ "type": "send_message", "conversationId": conversation, "text": text }),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let pushed = b.drain_of("notification_received");
    assert_eq!(pushed.len(), 1, "second message falls inside the dedupe window");
    assert_eq!(pushed[0]["notification"]["type"], "message");
    assert_eq!(pushed[0]["notification"]["data"]["preview"], "first");
    assert_eq!(pushed[0]["unreadCount"], 1);
    assert_eq!(h.state.notifications.unread_count(bob).await.unwrap(), 1);
}

#[tokio::test]
async fn test_reaction_replaces_previous_one_from_same_user() {
    let h = Harness::new();
    let (alice, bob) = (h.user("Alice").await, h.user("Bob").await);
    let conversation = h.direct(alice, bob).await;
    let mut a = h.connect(alice).await;
    let b = h.connect(bob).await;
    h.send(&a, json!({ "type": "join_chat", "conversationId": conversation }))
        .await;

    let message = h
        .state
        .conversations
        .send(alice, conversation, NewMessage::text("react to me"), None, None)
        .await
        .unwrap();
    a.drain();

    for emoji in ["👍", "🔥"] {
        h.send(
            &b,
            json!({ "type": "react_to_message", "messageId": message.id, "emoji": emoji }),
        )
        .await;
    }

    let reacted = a.drain_of("message_reacted");
    assert_eq!(reacted.len(), 2);
    let latest = reacted[1]["reactions"].as_array().unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0]["emoji"], "🔥");
    assert_eq!(latest[0]["userId"], json!(bob));

    let stored = h.state.stores.messages.get(message.id).await.unwrap().unwrap();
    assert_eq!(stored.reactions.len(), 1);
}

#[tokio::test]
async fn test_soft_delete_by_sender_only_and_hidden_from_history() {
    let h = Harness::new();
    let (alice, bob) = (h.user("Alice").await, h.user("Bob").await);
    let conversation = h.direct(alice, bob).await;
    let mut b = h.connect(bob).await;
    h.send(&b, json!({ "type": "join_chat", "conversationId": conversation }))
        .await;

    let svc = &h.state.conversations;
    let keep = svc
        .send(alice, conversation, NewMessage::text("keep"), None, None)
        .await
        .unwrap();
    let gone = svc
        .send(alice, conversation, NewMessage::text("oops"), None, None)
        .await
        .unwrap();
    assert_eq!(gone.sequence, keep.sequence + 1);
    b.drain();

    assert!(matches!(
        svc.delete_message(bob, gone.id).await,
        Err(AppError::Forbidden)
    ));

    let deleted = svc.delete_message(alice, gone.id).await.unwrap();
    assert!(deleted.deleted);
    assert!(deleted.text.is_none());
    assert_eq!(b.drain_of("message_deleted").len(), 1);

    let page = svc.history(alice, conversation, 1).await.unwrap();
    let ids: Vec<Uuid> = page.messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![keep.id]);
}

#[tokio::test]
async fn test_delete_conversation_cascades_to_messages() {
    let h = Harness::new();
    let (alice, bob, carol) = (
        h.user("Alice").await,
        h.user("Bob").await,
        h.user("Carol").await,
    );
    let conversation = h.direct(alice, bob).await;
    let svc = &h.state.conversations;
    let message = svc
        .send(bob, conversation, NewMessage::text("bye"), None, None)
        .await
        .unwrap();

    assert!(matches!(
        svc.delete_conversation(carol, conversation).await,
        Err(AppError::Forbidden)
    ));

    assert_eq!(svc.delete_conversation(alice, conversation).await.unwrap(), 1);
    assert!(h.state.stores.chats.get(conversation).await.unwrap().is_none());
    assert!(h.state.stores.messages.get(message.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_group_creation_validates_members() {
    let h = Harness::new();
    let (alice, bob, carol) = (
        h.user("Alice").await,
        h.user("Bob").await,
        h.user("Carol").await,
    );
    let svc = &h.state.conversations;

    let group = svc
        .create_group(alice, "  Weekend  ".into(), vec![bob, carol, bob])
        .await
        .unwrap();
    assert!(group.is_group);
    assert_eq!(group.group_name.as_deref(), Some("Weekend"));
    assert_eq!(group.group_admin, Some(alice));
    assert_eq!(group.participants.len(), 3);
    assert!(group.participants.iter().all(|p| group.unread_for(*p) == 0));

    assert!(matches!(
        svc.create_group(alice, "".into(), vec![bob]).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        svc.create_group(alice, "Solo".into(), vec![alice]).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        svc.create_group(alice, "Ghosts".into(), vec![Uuid::new_v4()]).await,
        Err(AppError::NotFound(_))
    ));
}

async fn trio(h: &Harness) -> (Uuid, Uuid, Uuid, Uuid) {
    let (sam, rita, raj) = (
        h.user("Sam").await,
        h.user("Rita").await,
        h.user("Raj").await,
    );
    let group = h
        .state
        .conversations
        .create_group(sam, "Trio".into(), vec![rita, raj])
        .await
        .unwrap();
    (group.id, sam, rita, raj)
}

#[tokio::test(start_paused = true)]
async fn test_group_send_fans_out_to_every_recipient() {
    let h = Harness::new();
    let (conversation, sam, rita, raj) = trio(&h).await;
    let mut s = h.connect(sam).await;
    let mut r1 = h.connect(rita).await;
    let mut r2 = h.connect(raj).await;
    for client in [&mut s, &mut r1, &mut r2] {
        client.drain();
    }

    h.send(
        &s,
        json!({ "type": "send_message", "conversationId": conversation, "text": "hello both" }),
    )
    .await;
    let id = message_id(&s.drain_of("message_sent")[0]);
    tokio::time::sleep(Duration::from_millis(10)).await;

    for (client, user) in [(&mut r1, rita), (&mut r2, raj)] {
        let frames = client.drain();
        let updates: Vec<&Value> = frames.iter().filter(|f| f["type"] == "chat_updated").collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["unreadCount"], 1);
        assert_eq!(updates[0]["lastMessage"]["id"], json!(id));

        let pushed: Vec<&Value> = frames
            .iter()
            .filter(|f| f["type"] == "notification_received")
            .collect();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0]["notification"]["recipientId"], json!(user));
        assert_eq!(pushed[0]["notification"]["type"], "message");
    }

    let chat = h.state.stores.chats.get(conversation).await.unwrap().unwrap();
    assert_eq!(chat.unread_for(rita), 1);
    assert_eq!(chat.unread_for(raj), 1);
    assert_eq!(chat.unread_for(sam), 0);
    assert_eq!(h.state.notifications.unread_count(sam).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(r1.drain_of("message_delivered").len(), 1);
    assert_eq!(r2.drain_of("message_delivered").len(), 1);
    let mut confirmed: Vec<Uuid> = s
        .drain_of("message_delivered")
        .iter()
        .map(|f| serde_json::from_value(f["toUserId"].clone()).unwrap())
        .collect();
    confirmed.sort();
    let mut expected = vec![rita, raj];
    expected.sort();
    assert_eq!(confirmed, expected);

    let stored = h.state.stores.messages.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
    assert!(stored.is_delivered_to(rita) && stored.is_delivered_to(raj));
}

#[tokio::test(start_paused = true)]
async fn test_group_delivery_continues_after_first_reader() {
    let h = Harness::new();
    let (conversation, sam, rita, raj) = trio(&h).await;
    let mut s = h.connect(sam).await;
    let r1 = h.connect(rita).await;
    let mut r2 = h.connect(raj).await;

    h.send(
        &s,
        json!({ "type": "send_message", "conversationId": conversation, "text": "who's in?" }),
    )
    .await;
    let id = message_id(&s.drain_of("message_sent")[0]);

    h.send(
        &r1,
        json!({ "type": "mark_as_read", "conversationId": conversation, "messageId": id }),
    )
    .await;
    r2.drain();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(r2.drain_of("message_delivered").len(), 1);
    let to_sender = s.drain_of("message_delivered");
    assert_eq!(to_sender.len(), 1);
    assert_eq!(to_sender[0]["toUserId"], json!(raj));

    let stored = h.state.stores.messages.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
    assert!(stored.is_delivered_to(raj));
    assert!(!stored.is_delivered_to(rita));
}

#[tokio::test]
async fn test_soft_delete_keeps_unread_counter_in_step() {
    let h = Harness::new();
    let (alice, bob) = (h.user("Alice").await, h.user("Bob").await);
    let conversation = h.direct(alice, bob).await;
    let mut b = h.connect(bob).await;

    let svc = &h.state.conversations;
    let gone = svc
        .send(alice, conversation, NewMessage::text("typo"), None, None)
        .await
        .unwrap();
    svc.send(alice, conversation, NewMessage::text("fixed"), None, None)
        .await
        .unwrap();
    let chat = h.state.stores.chats.get(conversation).await.unwrap().unwrap();
    assert_eq!(chat.unread_for(bob), 2);
    b.drain();

    svc.delete_message(alice, gone.id).await.unwrap();

    let chat = h.state.stores.chats.get(conversation).await.unwrap().unwrap();
    let authoritative = h
        .state
        .stores
        .messages
        .count_unread(conversation, bob)
        .await
        .unwrap();
    assert_eq!(authoritative, 1);
    assert_eq!(chat.unread_for(bob), authoritative);
    assert_eq!(chat.unread_for(alice), 0);

    let updates = b.drain_of("chat_updated");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["unreadCount"], 1);

    // Reading the deleted message must not count it a second time.
    svc.mark_read(bob, gone.id).await.unwrap();
    let chat = h.state.stores.chats.get(conversation).await.unwrap().unwrap();
    assert_eq!(chat.unread_for(bob), 1);
}
