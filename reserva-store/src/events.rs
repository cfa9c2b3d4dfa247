use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, warn};

use reserva_core::notify::{AnalyticsRecorder, NotificationDispatcher};
use reserva_domain::events::BookingEvent;

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(0)))
            .await
        {
            Ok(delivery) => {
                debug!(
                    topic,
                    key,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "event published"
                );
                Ok(())
            }
            Err((err, _message)) => {
                warn!(topic, key, error = %err, "event publish failed");
                Err(err)
            }
        }
    }
}

async fn publish_event(producer: &EventProducer, topic: &str, event: &BookingEvent) {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize booking event");
            return;
        }
    };
    // Fire-and-forget: a lost event never fails the booking flow.
    let _ = producer
        .publish(topic, &event.booking_id().to_string(), &payload)
        .await;
}

/// Publishes lifecycle events to the notification topic.
pub struct KafkaNotifier {
    producer: EventProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer) -> Self {
        Self {
            producer,
            topic: "bookings.lifecycle".to_string(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for KafkaNotifier {
    async fn send(&self, event: &BookingEvent) {
        publish_event(&self.producer, &self.topic, event).await;
    }
}

/// Publishes lifecycle events to the analytics topic.
pub struct KafkaAnalytics {
    producer: EventProducer,
    topic: String,
}

impl KafkaAnalytics {
    pub fn new(producer: EventProducer) -> Self {
        Self {
            producer,
            topic: "analytics.bookings".to_string(),
        }
    }
}

#[async_trait]
impl AnalyticsRecorder for KafkaAnalytics {
    async fn record(&self, event: &BookingEvent) {
        publish_event(&self.producer, &self.topic, event).await;
    }
}
