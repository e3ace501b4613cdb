//! Relay Worker 服务
//!
//! 承载可靠事件中继与实时推送的后台循环：outbox 发布 tick、过期清理、
//! 计数对账、死信消费、跨实例广播监听。收到 ctrl-c 后优雅停机。

use std::sync::Arc;
use std::time::Duration;

use application::{
    DeadLetterProcessor, LogAlertPublisher, OutboundDispatcher, OutboxRelay, ReconcileService,
    SseRegistry,
};
use config::{AppConfig, FanoutMode};
use infrastructure::{
    create_pool, DlqConsumer, FanoutListener, KafkaEventPublisher, PgOutboxRepository,
    PgSubscriberCountSource, RedisEventCache, RedisSubscriberCountCache,
};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Relay Worker 启动中...");

    // 加载配置
    let app_config = AppConfig::from_env();
    app_config
        .validate()
        .map_err(|e| anyhow::anyhow!("配置验证失败: {}", e))?;

    // 数据库连接池
    let pool = Arc::new(create_pool(&app_config.database).await?);

    // 运行迁移
    sqlx::migrate!("../../migrations").run(pool.as_ref()).await?;

    // Outbox 中继
    let outbox_repository = Arc::new(PgOutboxRepository::new(pool.clone()));
    let publisher = Arc::new(KafkaEventPublisher::new(&app_config.kafka)?);
    let relay = Arc::new(OutboxRelay::new(
        outbox_repository,
        publisher.clone(),
        app_config.outbox.clone(),
    ));

    // 死信消费者
    let processor = Arc::new(DeadLetterProcessor::new(Arc::new(LogAlertPublisher)));
    let dlq_consumer = Arc::new(DlqConsumer::new(&app_config.kafka, processor)?);

    // 计数对账
    let count_cache = Arc::new(RedisSubscriberCountCache::new(&app_config.redis.url).await?);
    let reconcile = Arc::new(ReconcileService::new(
        Arc::new(PgSubscriberCountSource::new(pool.clone())),
        count_cache,
        app_config.reconcile.clone(),
    ));

    // SSE 注册表与跨实例广播监听
    let connection_timeout = Duration::from_secs(app_config.sse.connection_timeout_secs);
    let (registry, fanout_listener): (Arc<SseRegistry>, Option<Arc<FanoutListener>>) =
        match app_config.fanout_mode {
            FanoutMode::Redis => {
                let cache =
                    Arc::new(RedisEventCache::new(&app_config.redis.url, &app_config.sse).await?);
                let registry = Arc::new(SseRegistry::new(cache, connection_timeout));
                let listener = Arc::new(FanoutListener::new(
                    &app_config.redis,
                    registry.clone() as Arc<dyn OutboundDispatcher>,
                )?);
                (registry, Some(listener))
            }
            FanoutMode::Local => {
                // 单实例模式：广播方与连接在同一进程，无需跨实例监听
                let cache = Arc::new(application::InMemoryEventCache::new(
                    app_config.sse.event_cache_max_size,
                    Duration::from_secs(app_config.sse.event_cache_ttl_secs),
                ));
                (Arc::new(SseRegistry::new(cache, connection_timeout)), None)
            }
        };

    // 周期任务：outbox 发布
    let publish_relay = relay.clone();
    let publish_interval = Duration::from_millis(app_config.outbox.poll_interval_ms);
    let publish_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            publish_relay.publish_pending().await;
        }
    });

    // 周期任务：过期清理（第一次 tick 立即返回，跳过以免每次重启都清理）
    let cleanup_relay = relay.clone();
    let cleanup_interval = Duration::from_secs(app_config.outbox.cleanup_interval_secs);
    let cleanup_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cleanup_relay.cleanup_old_events().await;
        }
    });

    // 周期任务：计数对账
    let reconcile_interval = Duration::from_secs(app_config.reconcile.interval_secs);
    let reconcile_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            reconcile.reconcile_all().await;
        }
    });

    // 周期任务：SSE 心跳，及时注销已消失的客户端
    let heartbeat_registry = registry.clone();
    let heartbeat_interval = Duration::from_secs(app_config.sse.heartbeat_interval_secs);
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            heartbeat_registry.send_heartbeats();
        }
    });

    // 死信消费循环
    let dlq_task = {
        let dlq_consumer = dlq_consumer.clone();
        tokio::spawn(async move {
            if let Err(e) = dlq_consumer.run().await {
                error!(error = %e, "死信消费循环退出");
            }
        })
    };

    // 广播监听循环
    let listener_task = fanout_listener.clone().map(|listener| {
        tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                error!(error = %e, "广播监听循环退出");
            }
        })
    });

    info!(
        fanout_mode = ?app_config.fanout_mode,
        local_connections = registry.connection_count(),
        "Relay Worker 启动完成"
    );

    // 等待关闭信号
    tokio::signal::ctrl_c().await?;
    info!("收到关闭信号，开始优雅停机");

    dlq_consumer.shutdown();
    if let Some(listener) = &fanout_listener {
        listener.shutdown();
    }
    publish_task.abort();
    cleanup_task.abort();
    reconcile_task.abort();
    heartbeat_task.abort();

    // 等待消费循环退出后再刷新生产者缓冲
    let _ = dlq_task.await;
    if let Some(task) = listener_task {
        let _ = task.await;
    }
    if let Err(e) = publisher.flush() {
        error!(error = %e, "刷新 Kafka 生产者失败");
    }

    info!("Relay Worker 已停止");
    Ok(())
}
