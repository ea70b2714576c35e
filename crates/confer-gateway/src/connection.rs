use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use confer_types::events::{ErrorCode, GatewayCommand, GatewayEvent};
use confer_types::models::PresenceStatus;

use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;
use crate::pipeline;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Rooms this connection receives events for, shared between the send task
/// (filtering) and the recv task (join/leave commands).
type RoomSet = Arc<std::sync::RwLock<HashSet<Uuid>>>;

/// Handle a single WebSocket connection. The client must identify with a
/// JWT within 10 seconds; an invalid or missing credential closes the
/// socket before any registration or room join happens.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, user_id, username).await;
}

/// Everything after a successful identify. Registration happens first and
/// the cleanup tail runs on every exit path, so no disconnect (normal
/// close, socket error, task abort) can leak a registry entry.
async fn run_connection_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
    username: String,
) {
    let (conn_id, conn_tx, mut conn_rx) = dispatcher.registry().register(user_id).await;

    // Bulk room join: every conversation with an active participant row
    let rooms: HashSet<Uuid> = match dispatcher
        .db()
        .conversation_ids_for_user(&user_id.to_string())
    {
        Ok(ids) => ids.iter().filter_map(|id| id.parse().ok()).collect(),
        Err(e) => {
            warn!("room resolution failed for {}: {:#}", user_id, e);
            HashSet::new()
        }
    };
    let subscribed_rooms: RoomSet = Arc::new(std::sync::RwLock::new(rooms));
    let send_subscriptions = subscribed_rooms.clone();

    // Tell this client who is already online, then go online ourselves
    // (which broadcasts to everyone including our other tabs).
    let mut setup_ok = true;
    for uid in dispatcher.registry().online_user_ids().await {
        if uid == user_id {
            continue;
        }
        let event = GatewayEvent::UserStatusChanged {
            user_id: uid,
            status: PresenceStatus::Online,
            last_seen: None,
        };
        if sender
            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
            .await
            .is_err()
        {
            setup_ok = false;
            break;
        }
    }

    if setup_ok {
        if let Err(e) = dispatcher.presence().connected(user_id) {
            warn!("presence update failed for {}: {:#}", user_id, e);
        }

        let mut broadcast_rx = dispatcher.subscribe();
        let dispatcher_clone = dispatcher.clone();

        let pong_received = Arc::new(AtomicBool::new(true));
        let pong_flag_send = pong_received.clone();
        let pong_flag_recv = pong_received.clone();

        // Forward room broadcasts + targeted events -> client, with heartbeat
        let mut send_task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            let mut missed_heartbeats: u8 = 0;

            loop {
                tokio::select! {
                    result = broadcast_rx.recv() => {
                        let event = match result {
                            Ok(event) => event,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Broadcast receiver lagged by {} events", n);
                                continue;
                            }
                            Err(_) => break,
                        };

                        if let Some(room) = event.conversation_id() {
                            let subs = send_subscriptions.read()
                                .expect("room set lock poisoned");
                            if !subs.contains(&room) {
                                continue;
                            }
                        }

                        if sender
                            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    result = conn_rx.recv() => {
                        let event = match result {
                            Some(event) => event,
                            None => break,
                        };
                        if sender
                            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    _ = heartbeat.tick() => {
                        if pong_flag_send.swap(false, Ordering::Acquire) {
                            missed_heartbeats = 0;
                        } else {
                            missed_heartbeats += 1;
                            if missed_heartbeats >= 2 {
                                warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                                break;
                            }
                        }
                        if sender.send(Message::Ping(vec![].into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Read commands from client
        let username_recv = username.clone();
        let recv_rooms = subscribed_rooms.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<GatewayCommand>(&text) {
                            Ok(cmd) => {
                                handle_command(
                                    &dispatcher_clone,
                                    user_id,
                                    &username_recv,
                                    cmd,
                                    &recv_rooms,
                                    &conn_tx,
                                )
                                .await;
                            }
                            Err(e) => {
                                warn!(
                                    "{} ({}) bad command: {} -- raw: {}",
                                    username_recv,
                                    user_id,
                                    e,
                                    &text[..text.len().min(200)]
                                );
                                let _ = conn_tx.send(GatewayEvent::Error {
                                    code: ErrorCode::Validation,
                                    message: "malformed command".into(),
                                });
                            }
                        }
                    }
                    Message::Pong(_) => {
                        pong_flag_recv.store(true, Ordering::Release);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        // Wait for either task to finish
        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }
    }

    // Cleanup tail: decrement first, then decide whether to downgrade.
    let remaining = dispatcher.registry().unregister(user_id, conn_id).await;
    if let Err(e) = dispatcher.presence().disconnected(user_id, remaining) {
        warn!("presence update failed for {}: {:#}", user_id, e);
    }
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use confer_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
    rooms: &RoomSet,
    conn_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    let result = match cmd {
        GatewayCommand::Identify { .. } => Ok(()), // Already handled

        GatewayCommand::JoinConversation { conversation_id } => {
            join_conversation(dispatcher, user_id, username, conversation_id, rooms, conn_tx)
        }

        GatewayCommand::LeaveConversation { conversation_id } => {
            leave_conversation(dispatcher, user_id, username, conversation_id, rooms)
        }

        GatewayCommand::SendMessage {
            conversation_id,
            content,
            message_type,
            reply_to_id,
        } => pipeline::send_message(
            dispatcher,
            user_id,
            conversation_id,
            &content,
            message_type.as_deref(),
            reply_to_id,
        )
        .map(|_| ()),

        GatewayCommand::EditMessage {
            message_id,
            content,
        } => pipeline::edit_message(dispatcher, user_id, message_id, &content).map(|_| ()),

        GatewayCommand::DeleteMessage { message_id } => {
            pipeline::delete_message(dispatcher, user_id, message_id)
        }

        GatewayCommand::AddReaction {
            message_id,
            reaction,
        } => pipeline::add_reaction(dispatcher, user_id, message_id, &reaction).map(|_| ()),

        GatewayCommand::RemoveReaction { message_id } => {
            pipeline::remove_reaction(dispatcher, user_id, message_id).map(|_| ())
        }

        GatewayCommand::TypingStart { conversation_id } => {
            pipeline::typing(dispatcher, user_id, username, conversation_id, true)
        }

        GatewayCommand::TypingStop { conversation_id } => {
            pipeline::typing(dispatcher, user_id, username, conversation_id, false)
        }
    };

    // Failures go to this connection only, never to the room
    if let Err(err) = result {
        let _ = conn_tx.send(err.into_event());
    }
}

fn join_conversation(
    dispatcher: &Dispatcher,
    user_id: Uuid,
    username: &str,
    conversation_id: Uuid,
    rooms: &RoomSet,
    conn_tx: &mpsc::UnboundedSender<GatewayEvent>,
) -> Result<(), GatewayError> {
    if !dispatcher
        .db()
        .is_active_participant(&conversation_id.to_string(), &user_id.to_string())?
    {
        return Err(GatewayError::AccessDenied(
            "not an active participant of this conversation".into(),
        ));
    }

    let newly_joined = rooms
        .write()
        .expect("room set lock poisoned")
        .insert(conversation_id);

    let _ = conn_tx.send(GatewayEvent::JoinedConversation { conversation_id });

    if newly_joined {
        dispatcher.publish(GatewayEvent::UserJoinedConversation {
            conversation_id,
            user_id,
            username: username.to_string(),
        });
    }
    Ok(())
}

fn leave_conversation(
    dispatcher: &Dispatcher,
    user_id: Uuid,
    username: &str,
    conversation_id: Uuid,
    rooms: &RoomSet,
) -> Result<(), GatewayError> {
    let was_member = rooms
        .write()
        .expect("room set lock poisoned")
        .remove(&conversation_id);

    if was_member {
        dispatcher.publish(GatewayEvent::UserLeftConversation {
            conversation_id,
            user_id,
            username: username.to_string(),
        });
    }
    Ok(())
}
