//! Kafka-backed `StreamSource`/`StreamSink` (spec §6), gated behind the
//! `kafka` feature. Grounded on the teacher's `dozer-ingestion-kafka`
//! dependency choice (`rdkafka`), generalized here to the engine's own
//! stream-client interface rather than a CDC connector's.

use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::Message;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};

use southpaw_types::{DenormalizedRecord, JsonRecord, Key};

use crate::errors::ExecutionError;
use crate::stream::boxed;
use crate::stream::{ConsumerRecord, StreamSink, StreamSource};

fn stream_err(stream: &str, source: impl std::error::Error + Send + Sync + 'static) -> ExecutionError {
    ExecutionError::Stream {
        stream: stream.to_string(),
        source: boxed(source),
    }
}

/// One partitioned Kafka topic read through a `BaseConsumer`. `read_by_pk`
/// is implemented via a compacted-topic assumption: the connector
/// maintains no local cache and instead asks the caller to rely on the
/// in-memory stream's own materialization when a real compacted read-path
/// isn't wired up; production deployments are expected to pair this with
/// an external compacted-topic read API or a local rocksdb mirror, which
/// is out of scope here (spec §1 Non-goals: external collaborators only).
pub struct KafkaStreamSource {
    table: String,
    topic: String,
    consumer: BaseConsumer,
}

impl KafkaStreamSource {
    pub fn new(bootstrap_servers: &str, group_id: &str, table: &str, topic: &str) -> Result<Self, ExecutionError> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| stream_err(topic, e))?;
        consumer.subscribe(&[topic]).map_err(|e| stream_err(topic, e))?;
        Ok(Self {
            table: table.to_string(),
            topic: topic.to_string(),
            consumer,
        })
    }
}

impl StreamSource for KafkaStreamSource {
    fn read_next(&mut self) -> Result<Vec<ConsumerRecord>, ExecutionError> {
        let mut out = Vec::new();
        while let Some(result) = self.consumer.poll(Duration::from_millis(0)) {
            let message = result.map_err(|e| stream_err(&self.topic, e))?;
            let key = Key::from(message.key().unwrap_or_default());
            let value = match message.payload() {
                Some(bytes) => {
                    let value: serde_json::Value =
                        serde_json::from_slice(bytes).map_err(|e| stream_err(&self.topic, e))?;
                    let fields = value
                        .as_object()
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .collect::<indexmap::IndexMap<_, _>>();
                    Some(JsonRecord::new(fields))
                }
                None => None,
            };
            out.push(ConsumerRecord::new(key, value, message.timestamp().to_millis().unwrap_or(0)));
        }
        Ok(out)
    }

    fn read_by_pk(&mut self, _key: &Key) -> Result<Option<JsonRecord>, ExecutionError> {
        // See struct docs: a real deployment pairs this connector with a
        // compacted-topic read API; this stand-in assumes that read-path
        // is provided by a wrapping collaborator.
        Ok(None)
    }

    fn lag(&self) -> Result<u64, ExecutionError> {
        let assignment = self.consumer.assignment().map_err(|e| stream_err(&self.topic, e))?;
        let position = self.consumer.position().map_err(|e| stream_err(&self.topic, e))?;
        let mut total = 0i64;
        for elem in assignment.elements() {
            let (_, high) = self
                .consumer
                .fetch_watermarks(elem.topic(), elem.partition(), Duration::from_secs(5))
                .map_err(|e| stream_err(&self.topic, e))?;
            let current = position
                .find_partition(elem.topic(), elem.partition())
                .and_then(|p| p.offset().to_raw())
                .unwrap_or(0);
            total += (high - current).max(0);
        }
        Ok(total.max(0) as u64)
    }

    fn commit(&mut self) -> Result<(), ExecutionError> {
        self.consumer
            .commit_consumer_state(rdkafka::consumer::CommitMode::Sync)
            .map_err(|e| stream_err(&self.topic, e))
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn topic_name(&self) -> &str {
        &self.topic
    }
}

/// Output stream over a keyed Kafka topic. Each `write` is a single
/// produce call keyed by the root PK bytes; `flush` drains rdkafka's
/// internal queue so the commit step can rely on "durable once flushed".
pub struct KafkaStreamSink {
    topic: String,
    producer: BaseProducer,
}

impl KafkaStreamSink {
    pub fn new(bootstrap_servers: &str, topic: &str) -> Result<Self, ExecutionError> {
        let producer: BaseProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .create()
            .map_err(|e| stream_err(topic, e))?;
        Ok(Self {
            topic: topic.to_string(),
            producer,
        })
    }

    /// Ensures the output topic exists with the given partition count,
    /// used by the `--build` CLI action before the first run.
    pub fn ensure_topic(bootstrap_servers: &str, topic: &str, partitions: i32) -> Result<(), ExecutionError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .create()
            .map_err(|e| stream_err(topic, e))?;
        let new_topic = rdkafka::admin::NewTopic::new(topic, partitions, rdkafka::admin::TopicReplication::Fixed(1));
        futures::executor::block_on(admin.create_topics(&[new_topic], &AdminOptions::new()))
            .map_err(|e| stream_err(topic, e))?;
        Ok(())
    }
}

impl StreamSink for KafkaStreamSink {
    fn write(&mut self, key: &Key, record: &DenormalizedRecord) -> Result<(), ExecutionError> {
        let payload = serde_json::to_vec(record).map_err(|e| stream_err(&self.topic, e))?;
        let record = BaseRecord::to(&self.topic).key(key.as_bytes()).payload(&payload);
        self.producer
            .send(record)
            .map_err(|(e, _)| stream_err(&self.topic, e))
    }

    fn flush(&mut self) -> Result<(), ExecutionError> {
        self.producer
            .flush(Duration::from_secs(30))
            .map_err(|e| stream_err(&self.topic, e))
    }
}
