use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use schema_registry_converter::async_impl::easy_avro::EasyAvroEncoder;
use schema_registry_converter::async_impl::schema_registry::SrSettings;
use schema_registry_converter::schema_registry_common::SubjectNameStrategy;

use crate::core_types::TraceId;

use super::{DomainEvent, EventEmitter, SCHEMA_VERSION};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaEventEmitter {
    producer: FutureProducer,
    avro_encoder: EasyAvroEncoder,
}

impl KafkaEventEmitter {
    pub fn new(brokers: &str, schema_registry_url: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "10000")
            .set("enable.idempotence", "true")
            .create()?;

        let sr_settings = SrSettings::new(schema_registry_url.to_string());
        let avro_encoder = EasyAvroEncoder::new(sr_settings);

        Ok(Self { producer, avro_encoder })
    }
}

#[async_trait]
impl EventEmitter for KafkaEventEmitter {
    async fn emit(&self, event: DomainEvent, trace_id: &TraceId) {
        let event_id = event.event_id();
        let partition_key = event.product_id().to_string();
        let topic = event.topic();

        let strategy = SubjectNameStrategy::TopicNameStrategy(topic.to_string(), false);
        let payload = match self.avro_encoder.encode_struct(&event, &strategy).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to Avro-encode domain event against schema registry, dropping");
                return;
            }
        };

        let record = FutureRecord::to(topic)
            .key(&partition_key)
            .payload(&payload)
            .headers(
                rdkafka::message::OwnedHeaders::new()
                    .insert(rdkafka::message::Header {
                        key: "trace-id",
                        value: Some(trace_id.0.as_str()),
                    })
                    .insert(rdkafka::message::Header {
                        key: "schema-version",
                        value: Some(SCHEMA_VERSION.to_string().as_str()),
                    }),
            );

        match self.producer.send(record, SEND_TIMEOUT).await {
            Ok(_) => {
                tracing::debug!(
                    event_type = event.event_type(),
                    event_id = %event_id,
                    trace_id = %trace_id,
                    "published domain event"
                );
            }
            Err((e, _)) => {
                // At-least-once: the caller already committed the durable
                // transition this event describes. A send failure here is
                // logged, not retried inline — the next reconciliation
                // pass re-derives and re-emits from durable state.
                tracing::error!(
                    error = %e,
                    event_type = event.event_type(),
                    event_id = %event_id,
                    "failed to publish domain event"
                );
            }
        }
    }
}
