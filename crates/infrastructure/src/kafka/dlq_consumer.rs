//! 死信队列消费者
//!
//! 订阅死信主题，把每条消息转交给处理器后手动提交偏移量。
//! 提交无条件执行：死信通道里的毒消息同样不能造成堵塞。

use crate::kafka::{KafkaError, KafkaResult};
use application::{DeadLetterMessage, DeadLetterProcessor};
use config::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// 死信消费者
///
/// 支持优雅关闭；接收错误按指数退避重试，达到上限后退出循环。
pub struct DlqConsumer {
    consumer: StreamConsumer,
    topic: String,
    processor: Arc<DeadLetterProcessor>,
    shutdown_signal: Arc<AtomicBool>,
}

impl DlqConsumer {
    /// 创建新的死信消费者
    pub fn new(config: &KafkaConfig, processor: Arc<DeadLetterProcessor>) -> KafkaResult<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("group.id", &config.dlq_consumer_group_id)
            .set("bootstrap.servers", config.brokers.join(","))
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "10000")
            .set("heartbeat.interval.ms", "3000")
            // 手动提交：处理完成（无论成败）后才推进偏移量
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest");

        let consumer: StreamConsumer =
            client_config
                .create()
                .map_err(|e| KafkaError::ConfigError {
                    message: format!("创建死信消费者失败: {}", e),
                })?;

        info!(
            "死信消费者创建成功，消费者组: {}",
            config.dlq_consumer_group_id
        );

        Ok(Self {
            consumer,
            topic: config.dlq_topic.clone(),
            processor,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 订阅死信主题并开始消费，直到关闭信号或重试耗尽
    pub async fn run(&self) -> KafkaResult<()> {
        self.consumer
            .subscribe(&[&self.topic])
            .map_err(|e| KafkaError::ConsumerError {
                message: format!("订阅死信主题失败: {}", e),
            })?;

        info!("已订阅死信主题: {}", self.topic);

        let mut retry_count = 0;
        const MAX_RETRIES: u32 = 5;

        while !self.shutdown_signal.load(Ordering::Relaxed) {
            match self.consumer.recv().await {
                Ok(message) => {
                    retry_count = 0;

                    let dead_letter = to_dead_letter_message(&message);
                    self.processor.handle_dead_letter(dead_letter).await;

                    // 无条件提交：handle_dead_letter 永不失败
                    if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                        error!(error = %e, "提交死信偏移量失败");
                    }
                }
                Err(e) => {
                    error!("接收死信消息失败: {}", e);
                    retry_count += 1;

                    if retry_count >= MAX_RETRIES {
                        error!("达到最大重试次数，停止死信消费");
                        return Err(KafkaError::ConsumerError {
                            message: format!("死信消费失败，已重试 {} 次", MAX_RETRIES),
                        });
                    }

                    let delay = Duration::from_millis(1000 * (2_u64.pow(retry_count - 1)));
                    warn!("等待 {:?} 后重试...", delay);
                    sleep(delay).await;
                }
            }
        }

        info!("死信消费循环已停止");
        Ok(())
    }

    /// 优雅关闭消费者
    pub fn shutdown(&self) {
        info!("开始关闭死信消费者");
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }

    /// 检查消费者是否正在运行
    pub fn is_running(&self) -> bool {
        !self.shutdown_signal.load(Ordering::Relaxed)
    }
}

impl Drop for DlqConsumer {
    fn drop(&mut self) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
        info!("死信消费者正在释放资源");
    }
}

/// 把 Kafka 消息转换为与传输层解耦的死信视图
///
/// 负载或头部损坏时用空串/跳过，绝不因为消息内容而失败。
fn to_dead_letter_message<M: Message>(message: &M) -> DeadLetterMessage {
    let key = message
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned());
    let payload = message
        .payload()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .unwrap_or_default();

    let mut headers = HashMap::new();
    if let Some(raw_headers) = message.headers() {
        for header in raw_headers.iter() {
            if let Some(value) = header.value {
                headers.insert(
                    header.key.to_string(),
                    String::from_utf8_lossy(value).into_owned(),
                );
            }
        }
    }

    DeadLetterMessage {
        key,
        payload,
        headers,
        offset: message.offset(),
    }
}
