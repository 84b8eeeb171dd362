use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use techstore::broker::MemoryBroker;
use techstore::cache::{CacheManager, MemoryCache};
use techstore::config::{redact_url, Config};
use techstore::coordinator::DistributedCacheCoordinator;
use techstore::events::EventBus;
use techstore::storage::InMemoryStore;
use techstore_core::cache::DistributedCache;
use techstore_core::events::{headers, Broker, EventHandler, Message};

/// Existence filter holding the ids of relayed messages.
const SEEN_FILTER: &str = "relay-seen";

/// techstore relay - Consume topics and keep their latest messages cached
#[derive(Parser, Debug)]
#[command(name = "techstore-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Topics to consume
    #[arg(
        long,
        short,
        value_delimiter = ',',
        default_value = "audit-logs",
        env = "RELAY_TOPICS"
    )]
    topics: Vec<String>,

    /// Stable consumer name; a restarted relay with the same name gets its
    /// uncommitted messages again
    #[arg(long, env = "RELAY_CONSUMER_NAME")]
    consumer_name: Option<String>,
}

/// Stores every consumed message and remembers the latest one per topic.
struct RelayHandler {
    cache: Arc<CacheManager>,
    coordinator: Arc<DistributedCacheCoordinator>,
    latest_ttl: Duration,
}

impl RelayHandler {
    /// A filter miss is final. A filter hit may be a false positive, so it
    /// only counts once the relayed copy is found.
    async fn already_relayed(&self, item: &str, key: &str) -> anyhow::Result<bool> {
        if !self.coordinator.existence_check(SEEN_FILTER, item).await? {
            return Ok(false);
        }
        let stored = self.coordinator.get_with_cache::<Value>(key).await?;
        Ok(stored.is_some())
    }
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        let item = format!("{}:{}", message.topic, message.id);
        let key = format!("relay:{}", item);
        if self.already_relayed(&item, &key).await? {
            tracing::debug!(topic = %message.topic, id = %message.id, "Skipping redelivered message");
            return Ok(());
        }

        self.coordinator.write_behind(&key, &message.payload).await?;
        self.coordinator.existence_add(SEEN_FILTER, &item).await?;
        self.cache
            .set(
                &format!("relay:latest:{}", message.topic),
                &message.payload,
                self.latest_ttl,
            )
            .await?;

        tracing::info!(
            topic = %message.topic,
            id = %message.id,
            event_type = message.header(headers::EVENT_TYPE).unwrap_or("unknown"),
            "Relayed message"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "techstore=debug,techstore_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(service = %config.service_name, topics = ?cli.topics, "Starting relay");

    let cache = Arc::new(build_cache_manager(&config));
    let state = cache.initialize().await;
    tracing::info!(state = %state.as_str(), "Cache manager ready");

    let coordinator = Arc::new(DistributedCacheCoordinator::new(
        Arc::new(InMemoryStore::new()),
        build_distributed_tier(&config).await,
        config.coordinator_config(),
    ));

    let bus = EventBus::new(build_broker(&config), config.service_name.clone())
        .with_publish_retry(config.publish_retry_policy());
    let mut consumer = bus.consumer();
    if let Some(name) = cli.consumer_name {
        consumer = consumer.with_name(name);
    }
    let consumer = Arc::new(consumer);

    let handler: Arc<dyn EventHandler> = Arc::new(RelayHandler {
        cache: Arc::clone(&cache),
        coordinator: Arc::clone(&coordinator),
        latest_ttl: config.cache_default_ttl(),
    });
    for topic in &cli.topics {
        consumer.subscribe_shared(topic, Arc::clone(&handler)).await?;
    }

    let mut consumer_task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run().await }
    });

    let finished = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut consumer_task => Some(result),
    };
    let result = match finished {
        Some(result) => result,
        None => {
            consumer.shutdown();
            consumer_task.await
        }
    };
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "Event consumer failed"),
        Err(err) => tracing::error!(error = %err, "Event consumer task panicked"),
    }

    coordinator.shutdown().await;
    if let Err(err) = bus.disconnect().await {
        tracing::warn!(error = %err, "Failed to disconnect from the broker");
    }
    cache.shutdown().await;

    tracing::info!("Relay stopped");
    Ok(())
}

fn build_cache_manager(config: &Config) -> CacheManager {
    let local = in_process_tier(config);
    if !config.remote_cache_enabled {
        return CacheManager::local_only(local);
    }
    remote_cache_manager(config, local)
}

#[cfg(feature = "redis")]
fn remote_cache_manager(config: &Config, local: MemoryCache) -> CacheManager {
    use techstore::cache::RedisConnector;

    tracing::info!(url = %redact_url(&config.redis_url), "Using Redis cache");
    CacheManager::new(Arc::new(RedisConnector::new(&config.redis_url)), local)
        .with_retry_policy(config.connect_retry_policy())
}

#[cfg(not(feature = "redis"))]
fn remote_cache_manager(_config: &Config, local: MemoryCache) -> CacheManager {
    tracing::warn!("Remote cache enabled but the redis feature is not compiled in");
    CacheManager::local_only(local)
}

#[cfg(feature = "redis")]
async fn build_distributed_tier(config: &Config) -> Arc<dyn DistributedCache> {
    use techstore::cache::RedisCache;

    if config.remote_cache_enabled {
        match RedisCache::new(&config.redis_url).await {
            Ok(cache) => return Arc::new(cache.with_filter_config(config.filter_config())),
            Err(err) => {
                tracing::warn!(error = %err, "Redis unavailable, distributed tier stays in-process")
            }
        }
    }
    Arc::new(in_process_tier(config))
}

#[cfg(not(feature = "redis"))]
async fn build_distributed_tier(config: &Config) -> Arc<dyn DistributedCache> {
    Arc::new(in_process_tier(config))
}

fn in_process_tier(config: &Config) -> MemoryCache {
    MemoryCache::new(config.cache_max_entries).with_filter_config(config.filter_config())
}

fn build_broker(config: &Config) -> Arc<dyn Broker> {
    match &config.event_broker_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            tracing::info!(url = %redact_url(url), "Using Redis Streams broker");
            Arc::new(techstore::broker::RedisStreamsBroker::new(url.clone()))
        }
        #[cfg(not(feature = "redis"))]
        Some(url) => {
            tracing::warn!(
                url = %redact_url(url),
                "Broker URL set but the redis feature is not compiled in, using the in-process broker"
            );
            Arc::new(MemoryBroker::new())
        }
        None => {
            tracing::info!("Using the in-process broker");
            Arc::new(MemoryBroker::new())
        }
    }
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
