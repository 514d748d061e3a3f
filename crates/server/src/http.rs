use crate::app::AppState;
use crate::session::{deliver_message, deliver_read_receipt};
use crate::wire::{contact_body, conversation_body, message_body, user_body};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Serves the companion request/response surface. Every call yields an
/// explicit success or failure to the caller; send and mark-read route
/// through the same delivery functions as the live channel.
pub async fn serve(state: Arc<AppState>, listener: TcpListener) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("http accept failed: {}", err);
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: Request<Incoming>| {
                let state = Arc::clone(&state);
                async move { handle_request(state, req).await }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!("http connection ended: {}", err);
            }
        });
    }
}

async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = req.into_body().collect().await?.to_bytes();
    let (status, payload) = route(&state, &method, &path, &body).await;
    let content_type = if path == "/metrics" {
        "text/plain; version=0.0.4"
    } else {
        "application/json"
    };
    let response = Response::builder()
        .status(status)
        .header("content-type", content_type)
        .body(Full::from(payload))
        .unwrap();
    Ok(response)
}

fn ok(value: serde_json::Value) -> (StatusCode, String) {
    (StatusCode::OK, value.to_string())
}

fn rejection(status: StatusCode, reason: &str) -> (StatusCode, String) {
    (status, json!({ "error": reason }).to_string())
}

fn storage_failure() -> (StatusCode, String) {
    rejection(StatusCode::INTERNAL_SERVER_ERROR, "storage failure")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddContactRequest {
    owner_id: Option<i64>,
    contact_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    sender_id: Option<i64>,
    receiver_id: Option<i64>,
    content: Option<String>,
}

/// Dispatches one request. Kept free of hyper body types so the routing
/// contract is directly testable.
pub async fn route(
    state: &AppState,
    method: &Method,
    path: &str,
    body: &[u8],
) -> (StatusCode, String) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match (method.as_str(), segments.as_slice()) {
        ("GET", ["healthz"]) => ok(json!({ "status": "ok" })),
        ("GET", ["readyz"]) => match state.repository.readiness().await {
            Ok(()) => ok(json!({ "status": "ready" })),
            Err(err) => {
                warn!("readiness probe failed: {}", err);
                rejection(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
            }
        },
        ("GET", ["metrics"]) => (StatusCode::OK, state.metrics.encode_prometheus()),
        ("GET", ["api", "contacts", user_id]) => {
            let Ok(user_id) = user_id.parse::<i64>() else {
                return rejection(StatusCode::BAD_REQUEST, "invalid user id");
            };
            match state.repository.find_user(user_id).await {
                Ok(Some(_)) => {}
                Ok(None) => return rejection(StatusCode::NOT_FOUND, "user not found"),
                Err(_) => return storage_failure(),
            }
            match state.repository.list_contacts(user_id).await {
                Ok(contacts) => {
                    let bodies: Vec<_> = contacts.iter().map(user_body).collect();
                    ok(json!(bodies))
                }
                Err(_) => storage_failure(),
            }
        }
        ("POST", ["api", "contacts"]) => {
            let Ok(request) = serde_json::from_slice::<AddContactRequest>(body) else {
                return rejection(StatusCode::BAD_REQUEST, "malformed request body");
            };
            let Some(owner_id) = request.owner_id else {
                return rejection(StatusCode::BAD_REQUEST, "ownerId is required");
            };
            let Some(contact_id) = request.contact_id else {
                return rejection(StatusCode::BAD_REQUEST, "contactId is required");
            };
            match state.repository.add_contact(owner_id, contact_id).await {
                Ok(edge) => ok(json!(contact_body(&edge))),
                Err(courier_storage::StorageError::Invalid) => {
                    rejection(StatusCode::BAD_REQUEST, "owner and contact must differ")
                }
                Err(courier_storage::StorageError::Missing) => {
                    rejection(StatusCode::NOT_FOUND, "user not found")
                }
                Err(_) => storage_failure(),
            }
        }
        ("DELETE", ["api", "contacts", owner_id, contact_id]) => {
            let (Ok(owner_id), Ok(contact_id)) =
                (owner_id.parse::<i64>(), contact_id.parse::<i64>())
            else {
                return rejection(StatusCode::BAD_REQUEST, "invalid user id");
            };
            match state.repository.remove_contact(owner_id, contact_id).await {
                Ok(removed) => ok(json!({ "removed": removed })),
                Err(_) => storage_failure(),
            }
        }
        ("GET", ["api", "messages", user_id, contact_id]) => {
            let (Ok(user_id), Ok(contact_id)) =
                (user_id.parse::<i64>(), contact_id.parse::<i64>())
            else {
                return rejection(StatusCode::BAD_REQUEST, "invalid user id");
            };
            match state.repository.list_messages(user_id, contact_id).await {
                Ok(messages) => {
                    let bodies: Vec<_> = messages.iter().map(message_body).collect();
                    ok(json!(bodies))
                }
                Err(_) => storage_failure(),
            }
        }
        ("POST", ["api", "messages"]) => {
            let Ok(request) = serde_json::from_slice::<SendMessageRequest>(body) else {
                return rejection(StatusCode::BAD_REQUEST, "malformed request body");
            };
            let Some(sender_id) = request.sender_id else {
                return rejection(StatusCode::BAD_REQUEST, "senderId is required");
            };
            let Some(receiver_id) = request.receiver_id else {
                return rejection(StatusCode::BAD_REQUEST, "receiverId is required");
            };
            let content = request.content.unwrap_or_default();
            if content.is_empty() {
                return rejection(StatusCode::BAD_REQUEST, "content is required");
            }
            if sender_id == receiver_id {
                return rejection(StatusCode::BAD_REQUEST, "sender and receiver must differ");
            }
            match deliver_message(state, sender_id, receiver_id, &content).await {
                Ok(record) => ok(json!(message_body(&record))),
                Err(courier_storage::StorageError::Missing) => {
                    rejection(StatusCode::NOT_FOUND, "unknown sender or receiver")
                }
                Err(courier_storage::StorageError::Invalid) => {
                    rejection(StatusCode::BAD_REQUEST, "content is required")
                }
                Err(_) => storage_failure(),
            }
        }
        ("POST", ["api", "messages", message_id, "read"]) => {
            let Ok(message_id) = message_id.parse::<i64>() else {
                return rejection(StatusCode::BAD_REQUEST, "invalid message id");
            };
            match deliver_read_receipt(state, message_id).await {
                Ok(Some(record)) => ok(json!(message_body(&record))),
                Ok(None) => rejection(StatusCode::NOT_FOUND, "message not found"),
                Err(_) => storage_failure(),
            }
        }
        ("GET", ["api", "conversations", user_id]) => {
            let Ok(user_id) = user_id.parse::<i64>() else {
                return rejection(StatusCode::BAD_REQUEST, "invalid user id");
            };
            match state.repository.find_user(user_id).await {
                Ok(Some(_)) => {}
                Ok(None) => return rejection(StatusCode::NOT_FOUND, "user not found"),
                Err(_) => return storage_failure(),
            }
            match state.repository.list_recent_conversations(user_id).await {
                Ok(summaries) => {
                    let bodies: Vec<_> = summaries.iter().map(conversation_body).collect();
                    ok(json!(bodies))
                }
                Err(_) => storage_failure(),
            }
        }
        _ => rejection(StatusCode::NOT_FOUND, "no such resource"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_state;
    use crate::registry::Outbound;
    use courier_proto::ServerEvent;
    use courier_storage::{MemoryRepository, NewUser, Repository};
    use serde_json::Value;
    use tokio::sync::mpsc;

    async fn seed(state: &AppState, username: &str) -> i64 {
        state
            .repository
            .create_user(&NewUser {
                username: username.to_string(),
                display_name: username.to_string(),
                avatar_url: None,
            })
            .await
            .expect("user")
            .id
    }

    #[tokio::test]
    async fn contact_roundtrip() {
        let state = test_state(Arc::new(MemoryRepository::new()));
        let alice = seed(&state, "alice").await;
        let bob = seed(&state, "bob").await;

        let body = format!(r#"{{"ownerId":{},"contactId":{}}}"#, alice, bob);
        let (status, payload) =
            route(&state, &Method::POST, "/api/contacts", body.as_bytes()).await;
        assert_eq!(status, StatusCode::OK);
        let edge: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(edge["ownerId"], alice);
        assert_eq!(edge["contactId"], bob);

        // idempotent: same edge again
        let (status, second) =
            route(&state, &Method::POST, "/api/contacts", body.as_bytes()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second, payload);

        let path = format!("/api/contacts/{}", alice);
        let (status, listing) = route(&state, &Method::GET, &path, b"").await;
        assert_eq!(status, StatusCode::OK);
        let listing: Value = serde_json::from_str(&listing).unwrap();
        assert_eq!(listing.as_array().unwrap().len(), 1);
        assert_eq!(listing[0]["username"], "bob");

        let path = format!("/api/contacts/{}/{}", alice, bob);
        let (status, removed) = route(&state, &Method::DELETE, &path, b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(removed, r#"{"removed":true}"#);
        let (_, removed_again) = route(&state, &Method::DELETE, &path, b"").await;
        assert_eq!(removed_again, r#"{"removed":false}"#);
    }

    #[tokio::test]
    async fn contact_validation_errors_are_descriptive() {
        let state = test_state(Arc::new(MemoryRepository::new()));
        let alice = seed(&state, "alice").await;

        let (status, payload) = route(
            &state,
            &Method::POST,
            "/api/contacts",
            br#"{"ownerId":1}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(payload.contains("contactId is required"));

        let body = format!(r#"{{"ownerId":{},"contactId":{}}}"#, alice, alice);
        let (status, _) = route(&state, &Method::POST, "/api/contacts", body.as_bytes()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let body = format!(r#"{{"ownerId":{},"contactId":999}}"#, alice);
        let (status, _) = route(&state, &Method::POST, "/api/contacts", body.as_bytes()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_endpoint_persists_and_pushes_like_the_live_path() {
        let state = test_state(Arc::new(MemoryRepository::new()));
        let alice = seed(&state, "alice").await;
        let bob = seed(&state, "bob").await;
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        state.registry.register(bob, bob_tx).await;

        let body = format!(
            r#"{{"senderId":{},"receiverId":{},"content":"hi"}}"#,
            alice, bob
        );
        let (status, payload) =
            route(&state, &Method::POST, "/api/messages", body.as_bytes()).await;
        assert_eq!(status, StatusCode::OK);
        let sent: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(sent["content"], "hi");

        // the authoritative send also produced the live push
        let pushed = bob_rx.recv().await.expect("push");
        let Outbound::Event(ServerEvent::Message(pushed)) = pushed else {
            panic!("expected message push");
        };
        assert_eq!(pushed.id, sent["id"].as_i64().unwrap());

        // and polling the fetch surface agrees with what was pushed
        let path = format!("/api/messages/{}/{}", alice, bob);
        let (_, listing) = route(&state, &Method::GET, &path, b"").await;
        let listing: Value = serde_json::from_str(&listing).unwrap();
        assert_eq!(listing.as_array().unwrap().len(), 1);
        assert_eq!(listing[0]["id"], sent["id"]);
    }

    #[tokio::test]
    async fn send_endpoint_rejects_bad_requests() {
        let state = test_state(Arc::new(MemoryRepository::new()));
        let alice = seed(&state, "alice").await;
        let bob = seed(&state, "bob").await;

        let body = format!(r#"{{"senderId":{},"receiverId":{}}}"#, alice, bob);
        let (status, payload) =
            route(&state, &Method::POST, "/api/messages", body.as_bytes()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(payload.contains("content is required"));

        let body = format!(r#"{{"senderId":{},"receiverId":999,"content":"hi"}}"#, alice);
        let (status, _) = route(&state, &Method::POST, "/api/messages", body.as_bytes()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mark_read_returns_the_updated_record() {
        let state = test_state(Arc::new(MemoryRepository::new()));
        let alice = seed(&state, "alice").await;
        let bob = seed(&state, "bob").await;
        let record = state
            .repository
            .create_message(alice, bob, "hi")
            .await
            .unwrap();

        let path = format!("/api/messages/{}/read", record.id);
        let (status, payload) = route(&state, &Method::POST, &path, b"").await;
        assert_eq!(status, StatusCode::OK);
        let updated: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(updated["isRead"], true);
        assert!(updated["readAt"].is_string());

        let (status, _) = route(&state, &Method::POST, "/api/messages/999/read", b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn conversations_listing_follows_recency() {
        let state = test_state(Arc::new(MemoryRepository::new()));
        let alice = seed(&state, "alice").await;
        let bob = seed(&state, "bob").await;
        let carol = seed(&state, "carol").await;
        state.repository.add_contact(alice, bob).await.unwrap();
        state.repository.add_contact(alice, carol).await.unwrap();
        state.repository.create_message(alice, bob, "hi").await.unwrap();

        let path = format!("/api/conversations/{}", alice);
        let (status, payload) = route(&state, &Method::GET, &path, b"").await;
        assert_eq!(status, StatusCode::OK);
        let listing: Value = serde_json::from_str(&payload).unwrap();
        // carol has no history and is omitted
        assert_eq!(listing.as_array().unwrap().len(), 1);
        assert_eq!(listing[0]["contact"]["username"], "bob");
        assert_eq!(listing[0]["lastMessage"]["content"], "hi");
    }

    #[tokio::test]
    async fn probes_and_unknown_routes() {
        let state = test_state(Arc::new(MemoryRepository::new()));
        let (status, _) = route(&state, &Method::GET, "/healthz", b"").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = route(&state, &Method::GET, "/readyz", b"").await;
        assert_eq!(status, StatusCode::OK);
        let (status, metrics) = route(&state, &Method::GET, "/metrics", b"").await;
        assert_eq!(status, StatusCode::OK);
        assert!(metrics.contains("courier_connections_active"));
        let (status, _) = route(&state, &Method::GET, "/nope", b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
