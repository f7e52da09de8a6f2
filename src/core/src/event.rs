use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Pull progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PullEvent {
    /// Reference is being resolved against the registry
    ImageResolving { reference: String },

    /// Image record already present in the image store
    ImageCached { digest: String },

    /// Image record written to the image store
    ImageStored { digest: String },

    /// Layer is about to be ensured in the layer store
    LayerStarted { digest: String },

    /// Layer directory already present in the layer store
    LayerCached { digest: String },

    /// Layer fetched and unpacked into the layer store
    LayerFetched { digest: String },
}

impl PullEvent {
    /// Event key from the catalog in [`events`].
    pub fn key(&self) -> &'static str {
        match self {
            PullEvent::ImageResolving { .. } => events::IMAGE_RESOLVING,
            PullEvent::ImageCached { .. } => events::IMAGE_CACHED,
            PullEvent::ImageStored { .. } => events::IMAGE_STORED,
            PullEvent::LayerStarted { .. } => events::LAYER_STARTED,
            PullEvent::LayerCached { .. } => events::LAYER_CACHED,
            PullEvent::LayerFetched { .. } => events::LAYER_FETCHED,
        }
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<PullEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event
    pub fn emit(&self, event: PullEvent) {
        tracing::trace!(key = event.key(), "Emitting pull event");
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Stream of pull events for one subscriber
pub struct EventStream {
    receiver: broadcast::Receiver<PullEvent>,
}

impl EventStream {
    /// Receive the next event.
    ///
    /// Returns `None` once every emitter has been dropped. Events missed
    /// by a lagging subscriber are skipped.
    pub async fn recv(&mut self) -> Option<PullEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Pull event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Event catalog - predefined event keys
pub mod events {
    pub const IMAGE_RESOLVING: &str = "image.resolving";
    pub const IMAGE_CACHED: &str = "image.cached";
    pub const IMAGE_STORED: &str = "image.stored";
    pub const LAYER_STARTED: &str = "layer.started";
    pub const LAYER_CACHED: &str = "layer.cached";
    pub const LAYER_FETCHED: &str = "layer.fetched";
}
