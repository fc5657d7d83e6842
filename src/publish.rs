//! Downstream publishing of task events.
//!
//! The orchestrator hands every forwarded event to an [`EventPublisher`].
//! [`BroadcastPublisher`] fans events out to in-process subscribers; the
//! binary attaches one subscriber that prints each event as a JSON line.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;
use tracing::trace;

use crate::models::event::PublishedEvent;
use crate::{AppError, Result};

/// Sink for events forwarded to downstream consumers.
pub trait EventPublisher: Send + Sync {
    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Publish` if the event cannot be delivered.
    fn publish(
        &self,
        event: PublishedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Publisher backed by a [`broadcast`] channel.
///
/// Publishing with no active subscriber is not an error: the event is
/// simply dropped.
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    /// Create a publisher whose subscribers buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(
        &self,
        event: PublishedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.tx.receiver_count() == 0 {
                trace!(event_name = %event.event.event_name, "no subscribers, dropping event");
                return Ok(());
            }

            self.tx
                .send(event)
                .map(|_| ())
                .map_err(|err| AppError::Publish(format!("broadcast failed: {err}")))
        })
    }
}
