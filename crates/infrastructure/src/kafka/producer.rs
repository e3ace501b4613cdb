//! Kafka 事件发布者
//!
//! 使用聚合 id 作为分区键，确保同一聚合事件的有序性。

use crate::kafka::{KafkaError, KafkaResult};
use application::{EventPublisher, PublishError};
use async_trait::async_trait;
use config::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error, info};

/// Kafka 事件发布者
///
/// 中继循环通过 EventPublisher 接口使用本类型，发送带有界超时，
/// 不会无限阻塞调用方。
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaEventPublisher {
    /// 创建新的 Kafka 生产者
    pub fn new(config: &KafkaConfig) -> KafkaResult<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", config.brokers.join(","))
            .set("message.timeout.ms", config.send_timeout_ms.to_string())
            .set("acks", &config.acks)
            .set("compression.type", "snappy")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5");

        let producer: FutureProducer =
            client_config
                .create()
                .map_err(|e| KafkaError::ConfigError {
                    message: format!("创建 Kafka 生产者失败: {}", e),
                })?;

        info!("Kafka 生产者创建成功，连接到: {}", config.brokers.join(","));

        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        })
    }

    /// 刷新生产者缓冲区
    pub fn flush(&self) -> KafkaResult<()> {
        self.producer
            .flush(Timeout::After(Duration::from_secs(10)))
            .map_err(|e| KafkaError::ProducerError {
                message: format!("刷新生产者缓冲区失败: {}", e),
            })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        let record = FutureRecord::to(topic).payload(payload).key(key);

        match self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok((partition, offset)) => {
                debug!(
                    topic = topic,
                    key = key,
                    partition = partition,
                    offset = offset,
                    "事件发送成功"
                );
                Ok(())
            }
            Err((kafka_err, _)) => {
                error!(topic = topic, key = key, error = %kafka_err, "事件发送失败");
                Err(PublishError::failed(format!("发送失败: {}", kafka_err)))
            }
        }
    }
}

impl Drop for KafkaEventPublisher {
    fn drop(&mut self) {
        info!("Kafka 生产者正在关闭");
    }
}
