use crate::errors::{RedemptionEngineError, Result};
use crate::models::EngineEvent;
use async_nats::Client;
use tracing::info;

pub struct NatsProducer {
    client: Client,
    topic_prefix: String,
}

impl NatsProducer {
    pub async fn new(url: &str, topic_prefix: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| RedemptionEngineError::Nats(e.to_string()))?;

        info!("Connected to NATS at {}", url);

        Ok(NatsProducer {
            client,
            topic_prefix: topic_prefix.to_string(),
        })
    }

    /// Publish an engine event; callers treat failures as non-fatal
    pub async fn publish_event(&self, event: &EngineEvent) -> Result<()> {
        let subject = match event {
            EngineEvent::NoShowMarked { .. }
            | EngineEvent::DisputeSubmitted { .. }
            | EngineEvent::DisputeResolved { .. } => {
                format!("{}.noshow.events", self.topic_prefix)
            }
            _ => format!("{}.redemption.events", self.topic_prefix),
        };

        let payload = serde_json::to_vec(event)
            .map_err(|e| RedemptionEngineError::Nats(format!("Serialization error: {}", e)))?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| RedemptionEngineError::Nats(format!("Failed to publish event: {}", e)))?;

        info!("Published engine event to subject {}", subject);

        Ok(())
    }
}
