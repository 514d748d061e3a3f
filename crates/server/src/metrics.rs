use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    connections_active: AtomicU64,
    events_ingress: AtomicU64,
    events_egress: AtomicU64,
    messages_persisted: AtomicU64,
    deliveries_dropped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_connections(&self) {
        self.connections_active.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decr_connections(&self) {
        self.connections_active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn mark_ingress(&self) {
        self.events_ingress.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_egress(&self) {
        self.events_egress.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_message_persisted(&self) {
        self.messages_persisted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_delivery_dropped(&self) {
        self.deliveries_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn encode_prometheus(&self) -> String {
        format!(
            "# TYPE courier_connections_active gauge\ncourier_connections_active {}\n# TYPE courier_events_ingress counter\ncourier_events_ingress {}\n# TYPE courier_events_egress counter\ncourier_events_egress {}\n# TYPE courier_messages_persisted counter\ncourier_messages_persisted {}\n# TYPE courier_deliveries_dropped counter\ncourier_deliveries_dropped {}\n",
            self.connections_active.load(Ordering::SeqCst),
            self.events_ingress.load(Ordering::SeqCst),
            self.events_egress.load(Ordering::SeqCst),
            self.messages_persisted.load(Ordering::SeqCst),
            self.deliveries_dropped.load(Ordering::SeqCst)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_tracks_counters() {
        let metrics = Metrics::new();
        metrics.incr_connections();
        metrics.mark_ingress();
        metrics.mark_ingress();
        metrics.mark_message_persisted();
        let text = metrics.encode_prometheus();
        assert!(text.contains("courier_connections_active 1"));
        assert!(text.contains("courier_events_ingress 2"));
        assert!(text.contains("courier_messages_persisted 1"));
        assert!(text.contains("courier_deliveries_dropped 0"));
    }
}
