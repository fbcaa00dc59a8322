//! Engine event channel
//!
//! Events fan out over a tokio broadcast channel. Sending never blocks the
//! control thread; a slow subscriber that falls behind skips the events it
//! missed.

use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Notifications emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Periodic playhead report from `TransportScheduler::tick`
    #[serde(rename_all = "camelCase")]
    Progress { position_ms: f64 },

    /// Play/pause/stop transitions
    #[serde(rename_all = "camelCase")]
    Transport {
        playing: bool,
        position_ms: f64,
        bpm: f64,
    },

    /// Outcome of decoding one source during a load
    #[serde(rename_all = "camelCase")]
    Buffer {
        url: String,
        ready: bool,
        error: Option<String>,
        generation: u64,
    },
}

/// Cloneable sending half of the event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send to every current subscriber
    ///
    /// Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            trace!("engine event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`
    pub fn stream(&self) -> impl Stream<Item = EngineEvent> + Send + 'static {
        into_stream(self.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::EngineConfig::default().event_capacity)
    }
}

/// Adapt a broadcast receiver into a stream that ends when the bus closes
pub fn into_stream(
    rx: broadcast::Receiver<EngineEvent>,
) -> impl Stream<Item = EngineEvent> + Send + 'static {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::Progress { position_ms: 12.5 });
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::Progress { position_ms: 12.5 }
        );
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(EngineEvent::Progress { position_ms: 0.0 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_ends_when_bus_dropped() {
        let bus = EventBus::new(8);
        let stream = bus.stream();
        bus.emit(EngineEvent::Transport {
            playing: true,
            position_ms: 0.0,
            bpm: 120.0,
        });
        drop(bus);

        let events: Vec<EngineEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_lagged_stream_skips_ahead() {
        let bus = EventBus::new(2);
        let stream = bus.stream();
        for i in 0..5 {
            bus.emit(EngineEvent::Progress {
                position_ms: i as f64,
            });
        }
        drop(bus);

        let events: Vec<EngineEvent> = stream.collect().await;
        assert_eq!(
            events,
            vec![
                EngineEvent::Progress { position_ms: 3.0 },
                EngineEvent::Progress { position_ms: 4.0 },
            ]
        );
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let json = serde_json::to_value(EngineEvent::Buffer {
            url: "a.wav".to_string(),
            ready: false,
            error: Some("missing".to_string()),
            generation: 3,
        })
        .unwrap();
        assert_eq!(json["type"], "buffer");
        assert_eq!(json["generation"], 3);
    }
}
