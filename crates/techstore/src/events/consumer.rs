//! Event consumer.
//!
//! One handler per topic. Messages are committed only after their handler
//! returns, so a crash between delivery and commit redelivers the message
//! (at-least-once): the broker hands it to another member of the group once
//! it has sat uncommitted for the broker's claim idle time. Handler failures
//! are logged and the message is still committed; forwarding to the
//! dead-letter queue is left to the handler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use techstore_core::connection::ConnectionState;
use techstore_core::events::schema::{user_event_envelope, SchemaRegistry};
use techstore_core::events::{BrokerRecord, EventHandler, Message};

use super::link::BrokerLink;
use super::{EventBusError, Result};

/// Records fetched per poll.
const DEFAULT_BATCH_SIZE: usize = 32;
/// How long a poll waits for new records.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Consumes subscribed topics on behalf of a consumer group.
pub struct EventConsumer {
    link: Arc<BrokerLink>,
    registry: Arc<SchemaRegistry>,
    group: String,
    name: String,
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
    /// Topics whose broker subscription is in progress.
    reserved: Mutex<HashSet<String>>,
    batch_size: usize,
    poll_timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl EventConsumer {
    pub(crate) fn new(link: Arc<BrokerLink>, registry: Arc<SchemaRegistry>, group: String) -> Self {
        let name = format!("{}-{}", group.trim_end_matches("-group"), Uuid::new_v4().simple());
        let (shutdown, _) = watch::channel(false);
        Self {
            link,
            registry,
            group,
            name,
            handlers: RwLock::new(HashMap::new()),
            reserved: Mutex::new(HashSet::new()),
            batch_size: DEFAULT_BATCH_SIZE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            shutdown,
        }
    }

    /// Sets the consumer name. A restarted instance reusing its name gets its
    /// uncommitted messages back right away instead of after the claim idle
    /// time.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Registers `handler` for `topic`.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::DuplicateSubscription` if the topic already
    /// has a handler, or a connection error if the broker is unreachable.
    pub async fn subscribe<H>(&self, topic: &str, handler: H) -> Result<()>
    where
        H: EventHandler + 'static,
    {
        self.subscribe_shared(topic, Arc::new(handler)).await
    }

    /// Like [`subscribe`](Self::subscribe) for a handler shared with other code.
    pub async fn subscribe_shared(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        {
            let mut reserved = self.reserved.lock().await;
            if reserved.contains(topic) || self.handlers.read().await.contains_key(topic) {
                return Err(EventBusError::DuplicateSubscription(topic.to_string()));
            }
            reserved.insert(topic.to_string());
        }

        let joined = self.join(topic).await;
        if joined.is_ok() {
            self.handlers.write().await.insert(topic.to_string(), handler);
            tracing::info!(topic = %topic, group = %self.group, "Subscribed to topic");
        }
        self.reserved.lock().await.remove(topic);
        joined
    }

    async fn join(&self, topic: &str) -> Result<()> {
        self.link.ensure_connected().await?;
        self.link.broker().subscribe(&self.group, topic).await?;
        Ok(())
    }

    /// Topics with a handler, sorted.
    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Fetches one batch and dispatches it. Returns the number of messages
    /// handed to handlers.
    pub async fn poll_once(&self) -> Result<usize> {
        let records = self.fetch().await?;
        Ok(self.dispatch(records).await)
    }

    /// Consumes until [`shutdown`](Self::shutdown) is called.
    ///
    /// A batch being dispatched when shutdown is requested is finished first.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the broker cannot be reached. Other
    /// broker errors are logged and polling resumes after a pause.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        self.link.ensure_connected().await?;
        tracing::info!(group = %self.group, consumer = %self.name, "Event consumer started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let fetched = tokio::select! {
                _ = shutdown.changed() => break,
                fetched = self.fetch() => fetched,
            };

            match fetched {
                Ok(records) => {
                    self.dispatch(records).await;
                }
                Err(err) if err.is_connection_failure() => {
                    tracing::error!(error = %err, "Event consumer lost the broker");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Poll failed, retrying");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(group = %self.group, consumer = %self.name, "Event consumer stopped");
        Ok(())
    }

    /// Asks a running [`run`](Self::run) loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    async fn fetch(&self) -> Result<Vec<BrokerRecord>> {
        let topics = self.topics().await;
        if topics.is_empty() {
            tokio::time::sleep(self.poll_timeout).await;
            return Ok(Vec::new());
        }

        self.link.ensure_connected().await?;
        let records = self
            .link
            .broker()
            .poll(&self.group, &self.name, &topics, self.batch_size, self.poll_timeout)
            .await?;
        Ok(records)
    }

    async fn dispatch(&self, records: Vec<BrokerRecord>) -> usize {
        let mut dispatched = 0;

        for record in records {
            let handler = self.handlers.read().await.get(&record.topic).cloned();

            match (handler, self.decode(&record)) {
                (Some(handler), Ok(payload)) => {
                    let message = Message {
                        topic: record.topic.clone(),
                        id: record.id.clone(),
                        key: record.key.clone(),
                        headers: record.headers.clone(),
                        payload,
                    };
                    if let Err(err) = handler.handle(&message).await {
                        tracing::error!(
                            topic = %record.topic,
                            id = %record.id,
                            error = %err,
                            "Event handler failed"
                        );
                    }
                    dispatched += 1;
                }
                (None, _) => {
                    tracing::warn!(topic = %record.topic, id = %record.id, "No handler for message");
                }
                (Some(_), Err(err)) => {
                    tracing::error!(
                        topic = %record.topic,
                        id = %record.id,
                        error = %err,
                        "Undecodable message, skipping"
                    );
                }
            }

            if let Err(err) = self.link.broker().commit(&self.group, &record).await {
                tracing::warn!(topic = %record.topic, id = %record.id, error = %err, "Commit failed, message will be redelivered");
            }
        }

        dispatched
    }

    fn decode(&self, record: &BrokerRecord) -> Result<Value> {
        match self.registry.get(&record.topic) {
            Some(schema) => {
                let decoded = schema.decode(&record.value)?;
                let envelope = user_event_envelope(&decoded)?;
                serde_json::to_value(envelope).map_err(|e| EventBusError::Serialization(e.to_string()))
            }
            None => serde_json::from_slice(&record.value)
                .map_err(|e| EventBusError::Serialization(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::events::EventProducer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use techstore_core::connection::RetryPolicy;
    use techstore_core::events::{
        Broker, BrokerError, DomainEvent, EventMetadata, EventType, Headers, OrderPayload,
        OutboundRecord, UserPayload,
    };

    const GROUP: &str = "audit-service-group";

    struct Fixture {
        broker: Arc<MemoryBroker>,
        producer: EventProducer,
        consumer: EventConsumer,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(MemoryBroker::new());
        let link = Arc::new(BrokerLink::new(broker.clone() as Arc<dyn Broker>));
        let registry = Arc::new(SchemaRegistry::with_defaults());
        let producer = EventProducer::new(
            Arc::clone(&link),
            Arc::clone(&registry),
            RetryPolicy::publish(),
            "audit-service".to_string(),
        );
        let consumer = EventConsumer::new(link, registry, GROUP.to_string())
            .with_poll_timeout(Duration::from_millis(50));
        Fixture {
            broker,
            producer,
            consumer,
        }
    }

    /// Records every message it sees and fails when told to.
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<Message>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, message: &Message) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(message.clone());
            if self.fail {
                anyhow::bail!("handler exploded");
            }
            Ok(())
        }
    }

    fn order_created() -> DomainEvent {
        DomainEvent::new(
            EventType::OrderCreated,
            OrderPayload::new("A-1"),
            EventMetadata::new("order-service"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_subscription_is_rejected() {
        let f = fixture();
        let handler = Arc::new(RecordingHandler::default());

        f.consumer.subscribe_shared("order.created", handler.clone()).await.unwrap();
        let result = f.consumer.subscribe_shared("order.created", handler).await;

        assert_eq!(
            result,
            Err(EventBusError::DuplicateSubscription("order.created".to_string()))
        );
    }

    /// Holds every group subscription until released.
    #[derive(Default)]
    struct SlowSubscribeBroker {
        inner: MemoryBroker,
        subscribing: AtomicBool,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl Broker for SlowSubscribeBroker {
        fn name(&self) -> &'static str {
            "slow-subscribe"
        }

        async fn connect(&self) -> std::result::Result<(), BrokerError> {
            self.inner.connect().await
        }

        async fn disconnect(&self) -> std::result::Result<(), BrokerError> {
            self.inner.disconnect().await
        }

        async fn send(
            &self,
            topic: &str,
            record: OutboundRecord,
        ) -> std::result::Result<String, BrokerError> {
            self.inner.send(topic, record).await
        }

        async fn subscribe(&self, group: &str, topic: &str) -> std::result::Result<(), BrokerError> {
            self.subscribing.store(true, Ordering::SeqCst);
            self.release.notified().await;
            self.inner.subscribe(group, topic).await
        }

        async fn poll(
            &self,
            group: &str,
            consumer: &str,
            topics: &[String],
            max: usize,
            block: Duration,
        ) -> std::result::Result<Vec<BrokerRecord>, BrokerError> {
            self.inner.poll(group, consumer, topics, max, block).await
        }

        async fn commit(
            &self,
            group: &str,
            record: &BrokerRecord,
        ) -> std::result::Result<(), BrokerError> {
            self.inner.commit(group, record).await
        }
    }

    #[tokio::test]
    async fn test_subscription_in_progress_does_not_block_polling() {
        let broker = Arc::new(SlowSubscribeBroker::default());
        let link = Arc::new(BrokerLink::new(broker.clone() as Arc<dyn Broker>));
        let consumer = Arc::new(EventConsumer::new(
            link,
            Arc::new(SchemaRegistry::with_defaults()),
            GROUP.to_string(),
        ));

        broker.release.notify_one();
        consumer
            .subscribe("order.created", RecordingHandler::default())
            .await
            .unwrap();
        broker.subscribing.store(false, Ordering::SeqCst);

        let pending = tokio::spawn({
            let consumer = Arc::clone(&consumer);
            async move {
                consumer
                    .subscribe("user-events", RecordingHandler::default())
                    .await
            }
        });
        for _ in 0..100 {
            if broker.subscribing.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(broker.subscribing.load(Ordering::SeqCst));

        let topics = tokio::time::timeout(Duration::from_millis(100), consumer.topics())
            .await
            .unwrap();
        assert_eq!(topics, vec!["order.created".to_string()]);

        // The topic is taken while its subscription is in flight
        let duplicate = consumer
            .subscribe("user-events", RecordingHandler::default())
            .await;
        assert_eq!(
            duplicate,
            Err(EventBusError::DuplicateSubscription("user-events".to_string()))
        );

        broker.release.notify_one();
        pending.await.unwrap().unwrap();
        assert_eq!(
            consumer.topics().await,
            vec!["order.created".to_string(), "user-events".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_subscription_frees_the_topic() {
        let f = fixture();
        f.broker.fail_connects(true);
        assert!(f
            .consumer
            .subscribe("order.created", RecordingHandler::default())
            .await
            .is_err());

        f.broker.fail_connects(false);
        f.consumer
            .subscribe("order.created", RecordingHandler::default())
            .await
            .unwrap();

        assert_eq!(f.consumer.topics().await, vec!["order.created".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_surfaces_connection_failure() {
        let f = fixture();
        f.broker.fail_connects(true);

        let result = f
            .consumer
            .subscribe("order.created", RecordingHandler::default())
            .await;

        assert!(matches!(result, Err(EventBusError::NotConnected(_))));
        assert!(f.consumer.topics().await.is_empty());
        assert_eq!(f.consumer.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_poll_dispatches_and_commits() {
        let f = fixture();
        let handler = Arc::new(RecordingHandler::default());
        f.consumer.subscribe_shared("order.created", handler.clone()).await.unwrap();
        let event = order_created();

        f.producer.publish(&event).await.unwrap();
        let dispatched = f.consumer.poll_once().await.unwrap();

        assert_eq!(dispatched, 1);
        let seen = handler.seen.lock().unwrap().clone();
        assert_eq!(seen[0].topic, "order.created");
        assert_eq!(seen[0].header("event-type"), Some("order.created"));
        assert_eq!(seen[0].event().unwrap(), event);
        assert_eq!(f.broker.pending_count(GROUP, "order.created").await, 0);
    }

    #[tokio::test]
    async fn test_handlers_only_see_their_topic() {
        let f = fixture();
        let orders = Arc::new(RecordingHandler::default());
        let users = Arc::new(RecordingHandler::default());
        f.consumer.subscribe_shared("order.created", orders.clone()).await.unwrap();
        f.consumer.subscribe_shared("user-events", users.clone()).await.unwrap();

        f.producer.publish(&order_created()).await.unwrap();
        let user_event = DomainEvent::new(
            EventType::UserLogin,
            UserPayload::new(5, "bob@example.com"),
            EventMetadata::new("user-service"),
        )
        .unwrap();
        f.producer.publish(&user_event).await.unwrap();

        assert_eq!(f.consumer.poll_once().await.unwrap(), 2);
        assert_eq!(orders.seen.lock().unwrap().len(), 1);

        // Binary user records reach the handler as JSON envelopes
        let seen = users.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event().unwrap(), user_event);
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_stop_consumption() {
        let f = fixture();
        let handler = Arc::new(RecordingHandler {
            fail: true,
            ..Default::default()
        });
        f.consumer.subscribe_shared("order.created", handler.clone()).await.unwrap();

        f.producer.publish(&order_created()).await.unwrap();
        f.producer.publish(&order_created()).await.unwrap();

        assert_eq!(f.consumer.poll_once().await.unwrap(), 2);
        assert_eq!(handler.seen.lock().unwrap().len(), 2);
        // Failures are not forwarded automatically
        assert!(f.broker.records("dead-letter-queue").await.is_empty());
        assert_eq!(f.broker.pending_count(GROUP, "order.created").await, 0);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_skipped() {
        let f = fixture();
        let handler = Arc::new(RecordingHandler::default());
        f.consumer.subscribe_shared("order.created", handler.clone()).await.unwrap();

        f.broker
            .send(
                "order.created",
                OutboundRecord {
                    key: None,
                    headers: Headers::new(),
                    value: b"not json".to_vec(),
                },
            )
            .await
            .unwrap();

        assert_eq!(f.consumer.poll_once().await.unwrap(), 0);
        assert!(handler.seen.lock().unwrap().is_empty());
        assert_eq!(f.broker.pending_count(GROUP, "order.created").await, 0);
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let f = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        f.consumer
            .subscribe("order.created", move |_msg: Message| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            })
            .await
            .unwrap();

        f.producer.publish(&order_created()).await.unwrap();
        f.consumer.poll_once().await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let f = fixture();
        let handler = Arc::new(RecordingHandler::default());
        f.consumer.subscribe_shared("order.created", handler.clone()).await.unwrap();
        let consumer = Arc::new(f.consumer);

        let running = tokio::spawn({
            let consumer = Arc::clone(&consumer);
            async move { consumer.run().await }
        });

        f.producer.publish(&order_created()).await.unwrap();
        for _ in 0..100 {
            if !handler.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.seen.lock().unwrap().len(), 1);

        consumer.shutdown();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_surfaces_connection_failure() {
        let f = fixture();
        f.broker.fail_connects(true);

        let result = f.consumer.run().await;

        assert!(matches!(result, Err(EventBusError::NotConnected(_))));
    }
}
