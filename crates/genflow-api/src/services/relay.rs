//! Bridges registry job events onto websocket subscribers.

use std::sync::Arc;

use genflow_models::{JobStatus, ServerMessage};
use genflow_notify::NotificationHub;
use genflow_registry::{JobEvent, JobRegistry};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::metrics;

/// Forward registry job events to websocket subscribers until shutdown
/// is signalled.
///
/// The caller subscribes and hands over the receiver so no event
/// published before the relay task is scheduled can be missed.
pub async fn relay_job_events(
    registry: Arc<JobRegistry>,
    hub: Arc<NotificationHub>,
    mut events: broadcast::Receiver<JobEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("job event relay started");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => deliver(&registry, &hub, event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Dropped frames are progress updates; the next
                    // event for each job supersedes them.
                    warn!(skipped, "job event relay lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("job event stream closed");
                    break;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("job event relay shutting down");
                    break;
                }
            }
        }
    }
}

async fn deliver(registry: &JobRegistry, hub: &NotificationHub, event: JobEvent) {
    record_job_metrics(registry, &event).await;

    let message = ServerMessage::JobProgress {
        job_id: event.job_id.to_string(),
        kind: event.kind,
        status: event.status,
        progress: event.progress,
        result_urls: event.result_urls.clone(),
        error: event.error.clone(),
    };

    // Room delivery first; a tab that has not joined its tenant room
    // yet still hears about its own jobs through the user channel.
    let room = event.owner.room();
    let delivered = hub.broadcast_room(&room, &message).await;
    if delivered == 0 {
        hub.send_to_user(&event.owner.user_id, &message).await;
    }

    debug!(
        job_id = %event.job_id,
        status = %event.status,
        room = %room,
        delivered,
        "job event relayed"
    );
}

async fn record_job_metrics(registry: &JobRegistry, event: &JobEvent) {
    match event.status {
        JobStatus::Pending => metrics::record_job_submitted(event.kind.as_str()),
        JobStatus::Succeeded => metrics::record_job_completed(event.kind.as_str()),
        JobStatus::Failed => metrics::record_job_failed(event.kind.as_str()),
        JobStatus::Cancelled => metrics::record_job_cancelled(event.kind.as_str()),
        JobStatus::Processing => {}
    }
    metrics::set_registry_jobs(registry.len().await as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use genflow_models::{Job, JobKind, OwnerScope, Role};
    use genflow_notify::HubConfig;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Next JOB_PROGRESS frame, skipping presence chatter from joins.
    async fn recv_progress(
        messages: &mut tokio::sync::mpsc::UnboundedReceiver<ServerMessage>,
    ) -> ServerMessage {
        timeout(Duration::from_secs(1), async {
            loop {
                match messages.recv().await.expect("hub dropped the connection") {
                    msg @ ServerMessage::JobProgress { .. } => return msg,
                    _ => continue,
                }
            }
        })
        .await
        .expect("timed out waiting for job progress")
    }

    #[tokio::test]
    async fn relays_events_to_room_subscribers() {
        let registry = Arc::new(JobRegistry::default());
        let hub = Arc::new(NotificationHub::new(HubConfig::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (conn, mut messages) = hub
            .register("user-1", "acme", Role::User, "sess-1")
            .await
            .unwrap();
        hub.join_room(&conn, "client_acme").await.unwrap();

        let events = registry.subscribe();
        let relay = tokio::spawn(relay_job_events(
            Arc::clone(&registry),
            Arc::clone(&hub),
            events,
            shutdown_rx,
        ));

        let job = Job::new(OwnerScope::new("acme", "user-1"), JobKind::Image, "prov-1");
        registry.insert(job.clone()).await.unwrap();

        match recv_progress(&mut messages).await {
            ServerMessage::JobProgress { job_id, status, .. } => {
                assert_eq!(job_id, job.id.to_string());
                assert_eq!(status, JobStatus::Pending);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        shutdown_tx.send(true).unwrap();
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn falls_back_to_user_channel_when_room_is_empty() {
        let registry = Arc::new(JobRegistry::default());
        let hub = Arc::new(NotificationHub::new(HubConfig::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Registered but never joined its tenant room.
        let (_conn, mut messages) = hub
            .register("user-1", "acme", Role::User, "sess-1")
            .await
            .unwrap();

        let events = registry.subscribe();
        let relay = tokio::spawn(relay_job_events(
            Arc::clone(&registry),
            Arc::clone(&hub),
            events,
            shutdown_rx,
        ));

        let job = Job::new(OwnerScope::new("acme", "user-1"), JobKind::Video, "prov-2");
        registry.insert(job.clone()).await.unwrap();

        match recv_progress(&mut messages).await {
            ServerMessage::JobProgress { job_id, .. } => {
                assert_eq!(job_id, job.id.to_string());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        shutdown_tx.send(true).unwrap();
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn room_delivery_suppresses_the_user_fallback() {
        let registry = Arc::new(JobRegistry::default());
        let hub = Arc::new(NotificationHub::new(HubConfig::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (joined, mut joined_rx) = hub
            .register("user-1", "acme", Role::User, "sess-1")
            .await
            .unwrap();
        hub.join_room(&joined, "client_acme").await.unwrap();
        let (_idle, mut idle_rx) = hub
            .register("user-1", "acme", Role::User, "sess-2")
            .await
            .unwrap();

        let events = registry.subscribe();
        let relay = tokio::spawn(relay_job_events(
            Arc::clone(&registry),
            Arc::clone(&hub),
            events,
            shutdown_rx,
        ));

        let job = Job::new(OwnerScope::new("acme", "user-1"), JobKind::Image, "prov-3");
        registry.insert(job).await.unwrap();

        match recv_progress(&mut joined_rx).await {
            ServerMessage::JobProgress { .. } => {}
            other => panic!("unexpected message: {other:?}"),
        }

        // The un-joined tab must not receive a duplicate.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(idle_rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        relay.await.unwrap();
    }
}
