use crate::metrics::Metrics;
use crate::registry::{ConnectionRegistry, Outbound};
use chrono::Utc;
use courier_proto::{ServerEvent, StatusChangeBody};
use courier_storage::Repository;
use std::sync::Arc;
use tracing::warn;

/// Translates connect/disconnect transitions into durable presence state and
/// a `status_change` broadcast. Persistence and broadcast are independently
/// best-effort.
pub struct PresenceCoordinator {
    repository: Arc<dyn Repository>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
}

impl PresenceCoordinator {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        PresenceCoordinator {
            repository,
            registry,
            metrics,
        }
    }

    /// The freshly authenticated user is excluded from its own broadcast.
    pub async fn mark_online(&self, user_id: i64) {
        self.persist(user_id, true).await;
        self.broadcast(user_id, true, Some(user_id)).await;
    }

    /// Runs after the registry entry is purged, so no exclusion is needed.
    pub async fn mark_offline(&self, user_id: i64) {
        self.persist(user_id, false).await;
        self.broadcast(user_id, false, None).await;
    }

    async fn persist(&self, user_id: i64, is_online: bool) {
        match self
            .repository
            .set_user_presence(user_id, is_online, Utc::now())
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => warn!(user = user_id, "presence update for unknown user"),
            Err(err) => warn!(user = user_id, "presence persistence failed: {}", err),
        }
    }

    async fn broadcast(&self, user_id: i64, is_online: bool, exclude: Option<i64>) {
        let event = ServerEvent::StatusChange(StatusChangeBody {
            user_id,
            is_online,
        });
        for (entry_user, handle) in self.registry.all_entries().await {
            if Some(entry_user) == exclude {
                continue;
            }
            if handle.sender.send(Outbound::Event(event.clone())).await.is_err() {
                self.metrics.mark_delivery_dropped();
            }
        }
    }
}
