//! Publishing side of the fabric.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::bus::{MessageBus, MessageHeaders, OutboundMessage};
use crate::envelope::SagaEvent;
use crate::error::{MessagingError, Result};

const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Publishes saga events with bounded retry and linearly increasing backoff.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    retry_count: u32,
    retry_delay: Duration,
}

impl Publisher {
    /// Creates a publisher with the default retry policy.
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Overrides the retry policy.
    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Publishes a saga event under `saga.<service>.<event_type>`.
    ///
    /// Populates the envelope `id` and `timestamp` if absent, serializes the
    /// envelope to JSON, and retries transient broker errors up to the
    /// configured attempt count with a linearly increasing delay.
    pub async fn publish(&self, mut event: SagaEvent) -> Result<()> {
        if event.id.is_nil() {
            event.id = Uuid::new_v4();
        }
        if event.timestamp.timestamp() == 0 {
            event.timestamp = chrono::Utc::now();
        }

        let routing_key = event.routing_key();
        let body = serde_json::to_string(&event)?;
        let message = OutboundMessage {
            body,
            content_type: crate::bus::CONTENT_TYPE_JSON,
            headers: MessageHeaders {
                saga_id: event.saga_id.as_uuid(),
                order_id: event.order_id.as_uuid(),
                correlation_id: event.correlation_id,
                service: event.service.clone(),
                event_type: event.event_type.as_str().to_string(),
                redeliveries: 0,
            },
        };

        let mut last_error = None;
        for attempt in 1..=self.retry_count {
            match self.bus.publish(&routing_key, message.clone()).await {
                Ok(()) => {
                    tracing::debug!(%routing_key, event_type = %event.event_type, "event published");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        %routing_key,
                        attempt,
                        max_attempts = self.retry_count,
                        error = %e,
                        "publish attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < self.retry_count {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(MessagingError::Publish {
            attempts: self.retry_count,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}
