//! Outbox relay: ships committed events to the bus with at-least-once
//! delivery. Runs as its own process, see `src/bin/outbox_relay.rs`.

use std::sync::Arc;
use std::time::Duration;

use crate::repository::Repository;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_BATCH: i64 = 100;

pub struct OutboxRelay {
    repo: Arc<Repository>,
}

impl OutboxRelay {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Poll-and-publish forever. Single instance preserves per-aggregate
    /// order; consumers deduplicate by event id.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        tracing::info!("outbox relay started");
        loop {
            ticker.tick().await;
            self.drain_once().await;
        }
    }

    /// One tick: publish each unprocessed event in commit order, marking it
    /// processed on success. Failed events stay unprocessed and are retried
    /// next tick.
    pub async fn drain_once(&self) {
        let events = match self.repo.poll_outbox(POLL_BATCH).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("poll outbox: {}", e);
                return;
            }
        };

        for event in events {
            if let Err(e) = self.repo.publish_event(&event).await {
                tracing::error!(event_id = event.id, "publish failed: {}", e);
                continue;
            }
            match self.repo.mark_outbox_processed(event.id).await {
                // A failed mark means the event is re-published next tick;
                // that is within the at-least-once contract.
                Err(e) => tracing::error!(event_id = event.id, "mark processed failed: {}", e),
                Ok(()) => tracing::info!(
                    event_id = event.id,
                    event_type = %event.event_type,
                    "outbox event published"
                ),
            }
        }
    }
}
