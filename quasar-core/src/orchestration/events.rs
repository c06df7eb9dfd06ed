use std::fmt;

use chrono::{DateTime, Utc};
use quasar_model::{
    FailureCause, FindingId, JobId, Severity, SessionId, SessionState,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::trace;

/// Notifications published while sessions progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
        cause: Option<FailureCause>,
        at: DateTime<Utc>,
    },
    FindingRecorded {
        session_id: SessionId,
        finding_id: FindingId,
        sequence_number: u64,
        severity: Severity,
        algorithm_name: String,
    },
    RetryScheduled {
        session_id: SessionId,
        operation: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    JobSubmitted {
        session_id: SessionId,
        job_id: JobId,
        external_id: String,
        spec: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::StateChanged { session_id, .. }
            | SessionEvent::FindingRecorded { session_id, .. }
            | SessionEvent::RetryScheduled { session_id, .. }
            | SessionEvent::JobSubmitted { session_id, .. } => *session_id,
        }
    }
}

/// In-process fan-out of [`SessionEvent`]s. Publishing never blocks and is a
/// no-op when nobody listens.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn publish(&self, event: SessionEvent) {
        trace!(session_id = %event.session_id(), ?event, "session event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Stream of events from now on. Events missed by a lagging subscriber
    /// are skipped.
    pub fn stream(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(Result::ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_receives_published_events() {
        let bus = EventBus::new(8);
        let mut stream = Box::pin(bus.stream());
        let session_id = SessionId::new();
        bus.publish(SessionEvent::RetryScheduled {
            session_id,
            operation: "submit".into(),
            attempt: 1,
            delay_ms: 100,
            error: "rate limited".into(),
        });

        let event = stream.next().await.unwrap();
        assert_eq!(event.session_id(), session_id);
        assert!(matches!(event, SessionEvent::RetryScheduled { attempt: 1, .. }));
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::new(1);
        bus.publish(SessionEvent::JobSubmitted {
            session_id: SessionId::new(),
            job_id: JobId::new(),
            external_id: "sim-1".into(),
            spec: "bounded_search".into(),
        });
    }
}
