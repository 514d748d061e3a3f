use crate::app::AppState;
use crate::registry::Outbound;
use crate::wire::message_body;
use courier_proto::{
    decode_client_event, encode_server_event, ClientEvent, ReadReceiptBody, ServerEvent,
    TypingBody,
};
use courier_storage::{MessageRecord, StorageError};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};

#[derive(Clone, Copy)]
enum SessionState {
    Unauthenticated,
    Authenticated { user_id: i64, connection_id: u64 },
}

/// Runs one live connection to completion: WebSocket handshake, the
/// per-connection protocol state machine, and disconnect cleanup. Inbound
/// events are handled strictly in arrival order; each handler completes
/// before the next event is read.
pub async fn run_session(state: Arc<AppState>, stream: TcpStream, remote: SocketAddr) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(err) => {
            debug!(remote = %remote, "websocket handshake failed: {}", err);
            return;
        }
    };
    let (sink, mut reader) = socket.split();
    let (tx, rx) = mpsc::channel(state.config.outbound_buffer);
    let writer = tokio::spawn(pump_outbound(sink, rx, Arc::clone(&state)));
    state.metrics.incr_connections();
    let mut session = SessionState::Unauthenticated;

    while let Some(frame) = reader.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                debug!(remote = %remote, "websocket read failed: {}", err);
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        state.metrics.mark_ingress();
        let event = match decode_client_event(&text) {
            Ok(event) => event,
            Err(err) => {
                debug!(remote = %remote, "dropping inbound event: {}", err);
                continue;
            }
        };
        match (session, event) {
            (SessionState::Unauthenticated, ClientEvent::Authenticate { user_id }) => {
                if let Some(connection_id) = authenticate(&state, user_id, tx.clone()).await {
                    info!(user = user_id, connection = connection_id, "connection authenticated");
                    session = SessionState::Authenticated {
                        user_id,
                        connection_id,
                    };
                }
            }
            (SessionState::Unauthenticated, _) => {
                debug!(remote = %remote, "event before authentication dropped");
            }
            (SessionState::Authenticated { user_id, .. }, event) => {
                dispatch_event(&state, user_id, event).await;
            }
        }
    }

    if let SessionState::Authenticated {
        user_id,
        connection_id,
    } = session
    {
        disconnect(&state, user_id, connection_id).await;
    }
    state.metrics.decr_connections();
    drop(tx);
    let _ = writer.await;
}

async fn pump_outbound(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    state: Arc<AppState>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Event(event) => match encode_server_event(&event) {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                    state.metrics.mark_egress();
                }
                Err(err) => warn!("outbound encode failed: {}", err),
            },
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Registers an authenticated identity, shutting down any connection it
/// displaces, and announces the presence transition.
pub async fn authenticate(
    state: &AppState,
    user_id: i64,
    sender: mpsc::Sender<Outbound>,
) -> Option<u64> {
    match state.repository.find_user(user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            debug!(user = user_id, "authenticate for unknown user dropped");
            return None;
        }
        Err(err) => {
            warn!(user = user_id, "user lookup during authenticate failed: {}", err);
            return None;
        }
    }
    let (connection_id, displaced) = state.registry.register(user_id, sender).await;
    if let Some(previous) = displaced {
        debug!(user = user_id, connection = previous.connection_id, "closing displaced connection");
        let _ = previous.sender.send(Outbound::Close).await;
    }
    state.presence.mark_online(user_id).await;
    Some(connection_id)
}

/// Unregisters the connection and, only if it was still the current entry
/// for the user, announces the offline transition.
pub async fn disconnect(state: &AppState, user_id: i64, connection_id: u64) {
    if state.registry.unregister(user_id, connection_id).await {
        info!(user = user_id, connection = connection_id, "connection closed");
        state.presence.mark_offline(user_id).await;
    } else {
        debug!(user = user_id, connection = connection_id, "stale disconnect ignored");
    }
}

/// Handles one inbound event from an authenticated connection. The live
/// channel never surfaces failures to the client: persistence errors are
/// logged and the dependent pushes skipped.
pub async fn dispatch_event(state: &AppState, sender_id: i64, event: ClientEvent) {
    match event {
        ClientEvent::Authenticate { .. } => {
            debug!(user = sender_id, "re-authentication dropped");
        }
        ClientEvent::Message {
            receiver_id,
            content,
        } => {
            if let Err(err) = deliver_message(state, sender_id, receiver_id, &content).await {
                warn!(
                    sender = sender_id,
                    receiver = receiver_id,
                    "message persistence failed: {}",
                    err
                );
            }
        }
        ClientEvent::ReadReceipt { message_id } => {
            match deliver_read_receipt(state, message_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(message = message_id, "read receipt for unknown message dropped");
                }
                Err(err) => {
                    warn!(message = message_id, "read receipt persistence failed: {}", err);
                }
            }
        }
        ClientEvent::Typing {
            receiver_id,
            is_typing,
        } => {
            deliver_typing(state, sender_id, receiver_id, is_typing).await;
        }
    }
}

async fn push(state: &AppState, user_id: i64, event: ServerEvent) {
    if let Some(handle) = state.registry.lookup(user_id).await {
        if handle.sender.send(Outbound::Event(event)).await.is_err() {
            state.metrics.mark_delivery_dropped();
        }
    }
}

/// Persists a message and performs the live pushes. The pushes only run
/// once the durable record exists; the `message_sent` confirmation carries
/// the persisted record with its server-assigned id and timestamp. Shared
/// by the live channel and the HTTP send endpoint.
pub async fn deliver_message(
    state: &AppState,
    sender_id: i64,
    receiver_id: i64,
    content: &str,
) -> Result<MessageRecord, StorageError> {
    let record = state
        .repository
        .create_message(sender_id, receiver_id, content)
        .await?;
    state.metrics.mark_message_persisted();
    push(state, receiver_id, ServerEvent::Message(message_body(&record))).await;
    push(state, sender_id, ServerEvent::MessageSent(message_body(&record))).await;
    Ok(record)
}

/// Marks a message read and notifies its original sender. Shared by the
/// live channel and the HTTP mark-read endpoint.
pub async fn deliver_read_receipt(
    state: &AppState,
    message_id: i64,
) -> Result<Option<MessageRecord>, StorageError> {
    let record = match state.repository.mark_message_read(message_id).await? {
        Some(record) => record,
        None => return Ok(None),
    };
    if let Some(read_at) = record.read_at {
        push(
            state,
            record.sender_id,
            ServerEvent::ReadReceipt(ReadReceiptBody {
                message_id: record.id,
                read_at,
            }),
        )
        .await;
    }
    Ok(Some(record))
}

pub async fn deliver_typing(state: &AppState, sender_id: i64, receiver_id: i64, is_typing: bool) {
    push(
        state,
        receiver_id,
        ServerEvent::Typing(TypingBody {
            sender_id,
            is_typing,
        }),
    )
    .await;
}
