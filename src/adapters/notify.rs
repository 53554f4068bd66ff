//! Built-in notification sinks and wiring from pipeline config.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::core::pipeline::{ChannelKind, NotificationConfig};
use crate::domain::{Event, EventKind};

use super::slack::SlackWebhook;
use super::NotificationSink;

/// Writes every event to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        let stage = event.stage.as_deref().unwrap_or("-");
        if event.kind.is_failure() {
            error!(
                run_id = %event.run_id,
                pipeline = %event.pipeline,
                stage,
                kind = %event.kind,
                error = event.error.as_deref().unwrap_or(""),
                "{}", event.detail
            );
        } else {
            info!(
                run_id = %event.run_id,
                pipeline = %event.pipeline,
                stage,
                kind = %event.kind,
                "{}", event.detail
            );
        }
        Ok(())
    }
}

/// A topic: filters events by kind and re-publishes them to its channels
pub struct TopicSink {
    name: String,

    /// Forwarded kinds; empty = all
    events: HashSet<EventKind>,

    channels: Vec<Arc<dyn NotificationSink>>,
}

impl TopicSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: HashSet::new(),
            channels: Vec::new(),
        }
    }

    pub fn with_events(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.events.extend(kinds);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationSink>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn accepts(&self, kind: EventKind) -> bool {
        self.events.is_empty() || self.events.contains(&kind)
    }
}

#[async_trait]
impl NotificationSink for TopicSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        if !self.accepts(event.kind) {
            return Ok(());
        }

        let mut failed = Vec::new();
        for channel in &self.channels {
            if let Err(e) = channel.notify(event).await {
                warn!(topic = %self.name, channel = channel.name(), error = %e, "Channel delivery failed");
                failed.push(channel.name().to_string());
            }
        }

        if !failed.is_empty() {
            anyhow::bail!("delivery failed for channel(s): {}", failed.join(", "));
        }
        Ok(())
    }
}

/// Build the subscriber list for a pipeline: the log sink first, then one
/// topic per configured topic, in declaration order.
pub fn sinks_from_config(config: &NotificationConfig) -> Result<Vec<Arc<dyn NotificationSink>>> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];

    for topic in &config.topics {
        let mut sink = TopicSink::new(&topic.name).with_events(topic.events.iter().copied());

        for channel_name in &topic.channels {
            let Some(channel) = config.channel(channel_name) else {
                anyhow::bail!(
                    "Topic '{}' references unknown channel '{}'",
                    topic.name,
                    channel_name
                );
            };
            let channel: Arc<dyn NotificationSink> = match &channel.kind {
                ChannelKind::Slack { webhook_url_env } => {
                    Arc::new(SlackWebhook::from_env(&channel.name, webhook_url_env)?)
                }
            };
            sink = sink.with_channel(channel);
        }

        info!(topic = %topic.name, channels = topic.channels.len(), "Registered notification topic");
        sinks.push(Arc::new(sink));
    }

    Ok(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl NotificationSink for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn notify(&self, event: &Event) -> Result<()> {
            self.seen.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl NotificationSink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn notify(&self, _event: &Event) -> Result<()> {
            anyhow::bail!("chat service unavailable")
        }
    }

    fn event(kind: EventKind) -> Event {
        Event::new(Uuid::new_v4(), "demo", None, kind, "")
    }

    #[tokio::test]
    async fn test_topic_filters_by_kind() {
        let recorder = Arc::new(Recorder::default());
        let topic = TopicSink::new("release-events")
            .with_events([EventKind::PipelineFailed, EventKind::StageAwaitingApproval])
            .with_channel(recorder.clone());

        for kind in EventKind::ALL {
            topic.notify(&event(kind)).await.unwrap();
        }

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![EventKind::StageAwaitingApproval, EventKind::PipelineFailed]
        );
    }

    #[tokio::test]
    async fn test_topic_keeps_delivering_after_channel_error() {
        let recorder = Arc::new(Recorder::default());
        let topic = TopicSink::new("all")
            .with_channel(Arc::new(Broken))
            .with_channel(recorder.clone());

        let result = topic.notify(&event(EventKind::BuildStarted)).await;
        assert!(result.is_err());
        assert_eq!(*recorder.seen.lock().unwrap(), vec![EventKind::BuildStarted]);
    }

    #[test]
    fn test_default_config_has_log_sink_only() {
        let sinks = sinks_from_config(&NotificationConfig::default()).unwrap();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].name(), "log");
    }
}
