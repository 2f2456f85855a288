//! In-process fan-out of job state transitions.

use tokio::sync::broadcast;
use tracing::trace;

use refrax_model::JobEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast bus for job lifecycle events. Subscribers that lag beyond the
/// channel capacity observe a `Lagged` error and simply miss frames; SSE
/// clients tolerate that.
#[derive(Debug)]
pub struct JobEventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl JobEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver to every live subscriber. Events without subscribers are
    /// dropped silently.
    pub fn publish(&self, event: JobEvent) {
        trace!(kind = event.kind.as_str(), job_id = %event.job_id, "job event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refrax_model::JobEventKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn events_reach_every_subscriber_in_order() {
        let bus = JobEventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);

        let id = Uuid::new_v4();
        bus.publish(JobEvent::new(JobEventKind::Started, id, "clip.mp4"));
        bus.publish(
            JobEvent::new(JobEventKind::Progress, id, "clip.mp4").with_progress(40),
        );

        for rx in [&mut first, &mut second] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.kind, JobEventKind::Started);
            let event = rx.recv().await.unwrap();
            assert_eq!(event.kind, JobEventKind::Progress);
            assert_eq!(event.progress, Some(40));
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = JobEventBus::default();
        bus.publish(JobEvent::new(JobEventKind::Created, Uuid::new_v4(), "x.mp4"));
    }
}
