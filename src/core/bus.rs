//! Event bus: fans lifecycle events out to notification subscribers.
//!
//! Every subscriber runs in its own tokio task fed by an unbounded channel,
//! so a slow or failing subscriber never stalls stage execution. Each
//! subscriber sees events in emission order; a subscriber error is logged
//! and does not affect delivery to anyone else.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapters::NotificationSink;
use crate::domain::Event;

struct Subscriber {
    name: String,
    tx: mpsc::UnboundedSender<Event>,
    handle: JoinHandle<()>,
}

/// Publish/subscribe hub owned by the orchestrator
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bus with the given subscribers, in registration order.
    /// Must be called inside a tokio runtime.
    pub fn with_sinks(sinks: impl IntoIterator<Item = Arc<dyn NotificationSink>>) -> Self {
        let mut bus = Self::new();
        for sink in sinks {
            bus.subscribe(sink);
        }
        bus
    }

    /// Register a subscriber and start its delivery task
    pub fn subscribe(&mut self, sink: Arc<dyn NotificationSink>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let name = sink.name().to_string();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.notify(&event).await {
                    warn!(
                        subscriber = %task_name,
                        kind = %event.kind,
                        error = %e,
                        "Subscriber failed to handle event"
                    );
                }
            }
            debug!(subscriber = %task_name, "Subscriber drained");
        });

        self.subscribers.push(Subscriber { name, tx, handle });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver an event to every subscriber, in registration order
    pub fn publish(&self, event: &Event) {
        for subscriber in &self.subscribers {
            if subscriber.tx.send(event.clone()).is_err() {
                warn!(
                    subscriber = %subscriber.name,
                    kind = %event.kind,
                    "Subscriber task is gone; event dropped"
                );
            }
        }
    }

    /// Close every channel and wait for subscribers to drain queued events
    pub async fn shutdown(self) {
        for subscriber in self.subscribers {
            drop(subscriber.tx);
            if let Err(e) = subscriber.handle.await {
                warn!(subscriber = %subscriber.name, error = %e, "Subscriber task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl NotificationSink for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        async fn notify(&self, event: &Event) -> Result<()> {
            self.seen.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    struct Slow;

    #[async_trait]
    impl NotificationSink for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn notify(&self, _event: &Event) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            anyhow::bail!("downstream timeout")
        }
    }

    fn event(kind: EventKind) -> Event {
        Event::new(Uuid::new_v4(), "demo", None, kind, "")
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_emission_order() {
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());
        let bus = EventBus::with_sinks([
            first.clone() as Arc<dyn NotificationSink>,
            second.clone() as Arc<dyn NotificationSink>,
        ]);
        assert_eq!(bus.subscriber_count(), 2);

        for kind in EventKind::ALL {
            bus.publish(&event(kind));
        }
        bus.shutdown().await;

        assert_eq!(*first.seen.lock().unwrap(), EventKind::ALL.to_vec());
        assert_eq!(*second.seen.lock().unwrap(), EventKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let collect = Arc::new(Collect::default());
        let bus = EventBus::with_sinks([
            Arc::new(Slow) as Arc<dyn NotificationSink>,
            collect.clone() as Arc<dyn NotificationSink>,
        ]);

        bus.publish(&event(EventKind::BuildStarted));
        bus.publish(&event(EventKind::BuildFailed));
        bus.shutdown().await;

        assert_eq!(
            *collect.seen.lock().unwrap(),
            vec![EventKind::BuildStarted, EventKind::BuildFailed]
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(&event(EventKind::PipelineSucceeded));
        bus.shutdown().await;
    }
}
