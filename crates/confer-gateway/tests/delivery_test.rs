/// End-to-end exercises of the delivery pipeline against an in-memory
/// database: fan-out, access control, reply validation, edit/delete
/// tombstones, reaction tallies and presence transitions.
use std::sync::Arc;

use uuid::Uuid;

use confer_db::Database;
use confer_gateway::dispatcher::Dispatcher;
use confer_gateway::error::GatewayError;
use confer_gateway::pipeline;
use confer_types::events::GatewayEvent;
use confer_types::models::PresenceStatus;

fn setup() -> (Arc<Database>, Dispatcher) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(db.clone());
    (db, dispatcher)
}

fn seed_user(db: &Database, username: &str) -> Uuid {
    let id = Uuid::new_v4();
    db.create_user(&id.to_string(), username, "hash", username)
        .unwrap();
    id
}

fn seed_direct(db: &Database, a: Uuid, b: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    db.create_conversation(
        &id.to_string(),
        "direct",
        None,
        &a.to_string(),
        &[a.to_string(), b.to_string()],
    )
    .unwrap();
    id
}

#[tokio::test]
async fn message_fan_out_reaches_every_subscriber() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let conv = seed_direct(&db, alice, bob);

    // Bob's connection and Alice's own second tab
    let mut bob_rx = dispatcher.subscribe();
    let mut alice_rx = dispatcher.subscribe();

    let sent = pipeline::send_message(&dispatcher, alice, conv, "hi", None, None).unwrap();
    assert_eq!(sent.content, "hi");
    assert_eq!(sent.sender_id, alice);
    assert_eq!(sent.sender_username, "alice");

    for rx in [&mut bob_rx, &mut alice_rx] {
        let event = rx.try_recv().unwrap();
        let GatewayEvent::NewMessage(message) = event else {
            panic!("expected new_message, got {:?}", event);
        };
        assert_eq!(message.conversation_id, conv);
        assert_eq!(message.content, "hi");
        assert_eq!(message.sender_id, alice);
        assert_eq!(message.id, sent.id);
        assert!(message.reactions.is_empty());
    }
}

#[tokio::test]
async fn non_participant_send_is_denied_without_side_effects() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let carol = seed_user(&db, "carol");
    let conv = seed_direct(&db, alice, bob);

    let mut rx = dispatcher.subscribe();

    let err = pipeline::send_message(&dispatcher, carol, conv, "let me in", None, None)
        .unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied(_)));

    // Nothing persisted, nothing broadcast
    assert!(db.get_messages(&conv.to_string(), 50, None).unwrap().is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn empty_content_is_rejected_before_persistence() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let conv = seed_direct(&db, alice, bob);

    let err = pipeline::send_message(&dispatcher, alice, conv, "   ", None, None).unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
    assert!(db.get_messages(&conv.to_string(), 50, None).unwrap().is_empty());
}

#[tokio::test]
async fn reply_must_target_the_same_conversation() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let carol = seed_user(&db, "carol");
    let conv = seed_direct(&db, alice, bob);
    let other = seed_direct(&db, alice, carol);

    let elsewhere =
        pipeline::send_message(&dispatcher, alice, other, "elsewhere", None, None).unwrap();

    let mut rx = dispatcher.subscribe();
    let err = pipeline::send_message(&dispatcher, alice, conv, "reply", None, Some(elsewhere.id))
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
    assert!(db.get_messages(&conv.to_string(), 50, None).unwrap().is_empty());
    assert!(rx.try_recv().is_err());

    let err = pipeline::send_message(
        &dispatcher,
        alice,
        conv,
        "reply",
        None,
        Some(Uuid::new_v4()),
    )
    .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn reply_within_conversation_carries_preview() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let conv = seed_direct(&db, alice, bob);

    let original = pipeline::send_message(&dispatcher, alice, conv, "original", None, None).unwrap();
    let reply =
        pipeline::send_message(&dispatcher, bob, conv, "reply", None, Some(original.id)).unwrap();

    let preview = reply.reply_to.expect("reply preview");
    assert_eq!(preview.id, original.id);
    assert_eq!(preview.sender_id, alice);
    assert_eq!(preview.content, "original");
}

#[tokio::test]
async fn edit_is_sender_bound_and_rebroadcast() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let conv = seed_direct(&db, alice, bob);

    let message = pipeline::send_message(&dispatcher, alice, conv, "draft", None, None).unwrap();

    let err = pipeline::edit_message(&dispatcher, bob, message.id, "hijacked").unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied(_)));

    let mut rx = dispatcher.subscribe();
    let edited = pipeline::edit_message(&dispatcher, alice, message.id, "final").unwrap();
    assert_eq!(edited.content, "final");
    assert!(edited.edited_at.is_some());

    let GatewayEvent::MessageEdited(broadcast) = rx.try_recv().unwrap() else {
        panic!("expected message_edited");
    };
    assert_eq!(broadcast.content, "final");

    // History reflects the committed edit
    let rows = db.get_messages(&conv.to_string(), 50, None).unwrap();
    assert_eq!(rows[0].content, "final");
}

#[tokio::test]
async fn delete_tombstones_and_broadcasts() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let conv = seed_direct(&db, alice, bob);

    let message = pipeline::send_message(&dispatcher, alice, conv, "oops", None, None).unwrap();

    let err = pipeline::delete_message(&dispatcher, bob, message.id).unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied(_)));

    let mut rx = dispatcher.subscribe();
    pipeline::delete_message(&dispatcher, alice, message.id).unwrap();

    match rx.try_recv().unwrap() {
        GatewayEvent::MessageDeleted {
            conversation_id,
            message_id,
        } => {
            assert_eq!(conversation_id, conv);
            assert_eq!(message_id, message.id);
        }
        other => panic!("expected message_deleted, got {:?}", other),
    }

    assert!(db.get_messages(&conv.to_string(), 50, None).unwrap().is_empty());

    // Deleting again: the message no longer exists for mutation
    let err = pipeline::delete_message(&dispatcher, alice, message.id).unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn reaction_updates_broadcast_the_full_tally() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let conv = seed_direct(&db, alice, bob);

    let message = pipeline::send_message(&dispatcher, alice, conv, "hi", None, None).unwrap();

    pipeline::add_reaction(&dispatcher, alice, message.id, "👍").unwrap();
    let tally = pipeline::add_reaction(&dispatcher, bob, message.id, "👍").unwrap();
    assert_eq!(tally.len(), 1);
    assert_eq!(tally[0].count, 2);

    // Re-reacting replaces, never duplicates
    let mut rx = dispatcher.subscribe();
    let tally = pipeline::add_reaction(&dispatcher, bob, message.id, "🎉").unwrap();
    assert_eq!(tally.len(), 2);
    let thumbs = tally.iter().find(|g| g.reaction == "👍").unwrap();
    let party = tally.iter().find(|g| g.reaction == "🎉").unwrap();
    assert_eq!(thumbs.user_ids, vec![alice]);
    assert_eq!(party.user_ids, vec![bob]);

    match rx.try_recv().unwrap() {
        GatewayEvent::MessageReactionUpdated {
            message_id,
            reactions,
            ..
        } => {
            assert_eq!(message_id, message.id);
            assert_eq!(reactions.len(), 2);
        }
        other => panic!("expected message_reaction_updated, got {:?}", other),
    }
}

#[tokio::test]
async fn removing_an_absent_reaction_is_not_found() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let conv = seed_direct(&db, alice, bob);

    let message = pipeline::send_message(&dispatcher, alice, conv, "hi", None, None).unwrap();

    let err = pipeline::remove_reaction(&dispatcher, bob, message.id).unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));

    pipeline::add_reaction(&dispatcher, bob, message.id, "👍").unwrap();
    let tally = pipeline::remove_reaction(&dispatcher, bob, message.id).unwrap();
    assert!(tally.is_empty());
}

#[tokio::test]
async fn typing_requires_active_membership() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let carol = seed_user(&db, "carol");
    let conv = seed_direct(&db, alice, bob);

    let err = pipeline::typing(&dispatcher, carol, "carol", conv, true).unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied(_)));

    let mut rx = dispatcher.subscribe();
    pipeline::typing(&dispatcher, alice, "alice", conv, true).unwrap();
    assert!(dispatcher.typing().is_typing(conv, alice));

    match rx.try_recv().unwrap() {
        GatewayEvent::UserTyping {
            user_id, is_typing, ..
        } => {
            assert_eq!(user_id, alice);
            assert!(is_typing);
        }
        other => panic!("expected user_typing, got {:?}", other),
    }

    pipeline::typing(&dispatcher, alice, "alice", conv, false).unwrap();
    assert!(!dispatcher.typing().is_typing(conv, alice));
}

#[tokio::test]
async fn presence_downgrades_only_after_last_disconnect() {
    let (db, dispatcher) = setup();
    let alice = seed_user(&db, "alice");

    let (conn_a, _tx_a, _rx_a) = dispatcher.registry().register(alice).await;
    let (conn_b, _tx_b, _rx_b) = dispatcher.registry().register(alice).await;
    dispatcher.presence().connected(alice).unwrap();

    let mut rx = dispatcher.subscribe();

    // First tab closes: still online, no broadcast
    let remaining = dispatcher.registry().unregister(alice, conn_a).await;
    dispatcher.presence().disconnected(alice, remaining).unwrap();
    assert!(rx.try_recv().is_err());
    let row = db.get_user_by_id(&alice.to_string()).unwrap().unwrap();
    assert_eq!(row.status(), PresenceStatus::Online);

    // Last tab closes: offline persisted and broadcast
    let remaining = dispatcher.registry().unregister(alice, conn_b).await;
    dispatcher.presence().disconnected(alice, remaining).unwrap();
    match rx.try_recv().unwrap() {
        GatewayEvent::UserStatusChanged {
            user_id, status, ..
        } => {
            assert_eq!(user_id, alice);
            assert_eq!(status, PresenceStatus::Offline);
        }
        other => panic!("expected user_status_changed, got {:?}", other),
    }
    let row = db.get_user_by_id(&alice.to_string()).unwrap().unwrap();
    assert_eq!(row.status(), PresenceStatus::Offline);
}
