//! Inter-plugin communication bus.
//!
//! Channel broadcasts, direct messages and request/response all share one
//! priority queue. A periodic drain delivers messages one at a time; each
//! message reaches every receiver before the next one is dequeued.

use crate::config::BusSettings;
use crate::error::{BusError, PluginError, PluginResult};
use crate::events::{BusEvent, EventChannel};
use crate::plugin::Plugin;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, BinaryHeap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Delivery priority. Higher priorities drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    /// Background traffic
    Low,
    /// Regular traffic
    #[default]
    Normal,
    /// Time-sensitive traffic
    High,
    /// Control messages
    Critical,
}

/// How a message is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Sent to every subscriber of a channel
    Broadcast,
    /// Sent to one plugin
    Direct,
    /// Sent to one plugin, expecting a reply
    Request,
}

/// Bus message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier
    pub id: Uuid,

    /// Addressing mode
    pub kind: MessageKind,

    /// Channel of a broadcast
    pub channel: Option<String>,

    /// Addressee of a direct message or request
    pub recipient: Option<String>,

    /// Sending plugin, or the host
    pub sender: String,

    /// Message body
    pub payload: Value,

    /// Publish time
    pub timestamp: DateTime<Utc>,

    /// Time to live in milliseconds
    pub ttl_ms: u64,

    /// Delivery priority
    pub priority: MessagePriority,

    /// Correlation id of a request
    pub reply_to: Option<Uuid>,
}

impl Message {
    /// Time to live.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Whether the message expects a reply.
    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }
}

/// Per-send options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageOptions {
    /// Overrides the configured TTL
    pub ttl: Option<Duration>,
    /// Delivery priority
    pub priority: MessagePriority,
    /// Overrides the configured request timeout
    pub timeout: Option<Duration>,
}

impl MessageOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct Queued {
    priority: MessagePriority,
    enqueued: Instant,
    seq: u64,
    message: Message,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then older, then lower sequence.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued.cmp(&self.enqueued))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct BusCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    expired: AtomicU64,
    undeliverable: AtomicU64,
    handler_errors: AtomicU64,
}

/// Bus statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Messages waiting in the queue
    pub queue_depth: usize,
    /// Messages accepted
    pub published: u64,
    /// Messages that reached at least one receiver
    pub delivered: u64,
    /// Messages dropped after their TTL
    pub expired: u64,
    /// Direct messages to unknown plugins
    pub undeliverable: u64,
    /// Receiver handlers that returned an error
    pub handler_errors: u64,
    /// Requests awaiting a reply
    pub pending_requests: usize,
    /// Channels with at least one subscriber
    pub channels: usize,
    /// Registered plugin endpoints
    pub endpoints: usize,
}

type PendingReply = oneshot::Sender<PluginResult<Value>>;

/// Priority message bus between plugins and the host.
///
/// # Examples
///
/// ```rust
/// use nextplug_core::bus::{MessageBus, MessageOptions};
/// use nextplug_core::config::EngineConfig;
/// use nextplug_core::events::EventChannel;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let bus = MessageBus::new(EngineConfig::default().bus, Arc::new(EventChannel::new(16)));
/// let mut inbox = bus.subscribe_channel("updates");
///
/// bus.publish("host", "updates", json!({"n": 1}), MessageOptions::new()).unwrap();
/// assert_eq!(bus.process_queue().await, 1);
/// assert_eq!(inbox.try_recv().unwrap().payload, json!({"n": 1}));
/// # });
/// ```
pub struct MessageBus {
    settings: BusSettings,
    queue: Mutex<BinaryHeap<Queued>>,
    seq: AtomicU64,
    processing: AtomicBool,
    subscriptions: DashMap<String, BTreeSet<String>>,
    receivers: DashMap<String, Vec<mpsc::UnboundedSender<Message>>>,
    endpoints: DashMap<String, Arc<dyn Plugin>>,
    pending: DashMap<Uuid, PendingReply>,
    events: Arc<EventChannel<BusEvent>>,
    counters: BusCounters,
    shutdown: Mutex<CancellationToken>,
}

impl MessageBus {
    /// Create a bus.
    pub fn new(settings: BusSettings, events: Arc<EventChannel<BusEvent>>) -> Self {
        Self {
            settings,
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            processing: AtomicBool::new(false),
            subscriptions: DashMap::new(),
            receivers: DashMap::new(),
            endpoints: DashMap::new(),
            pending: DashMap::new(),
            events,
            counters: BusCounters::default(),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    fn envelope(&self, kind: MessageKind, sender: &str, payload: Value, opts: &MessageOptions) -> Message {
        let ttl = opts
            .ttl
            .unwrap_or_else(|| Duration::from_millis(self.settings.default_ttl_ms));
        Message {
            id: Uuid::new_v4(),
            kind,
            channel: None,
            recipient: None,
            sender: sender.to_string(),
            payload,
            timestamp: Utc::now(),
            ttl_ms: ttl.as_millis() as u64,
            priority: opts.priority,
            reply_to: None,
        }
    }

    fn enqueue(&self, message: Message) -> PluginResult<Uuid> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.settings.queue_capacity {
            return Err(BusError::QueueFull {
                capacity: self.settings.queue_capacity,
            }
            .into());
        }

        let id = message.id;
        queue.push(Queued {
            priority: message.priority,
            enqueued: Instant::now(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            message,
        });
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Broadcast to every subscriber of `channel`.
    pub fn publish(&self, sender: &str, channel: &str, payload: Value, opts: MessageOptions) -> PluginResult<Uuid> {
        let mut message = self.envelope(MessageKind::Broadcast, sender, payload, &opts);
        message.channel = Some(channel.to_string());
        self.enqueue(message)
    }

    /// Send to one plugin.
    pub fn send_direct(
        &self,
        sender: &str,
        recipient: &str,
        payload: Value,
        opts: MessageOptions,
    ) -> PluginResult<Uuid> {
        let mut message = self.envelope(MessageKind::Direct, sender, payload, &opts);
        message.recipient = Some(recipient.to_string());
        self.enqueue(message)
    }

    /// Send a request and wait for its reply.
    ///
    /// The reply is either the recipient's `handle_message` return value or
    /// an explicit [`respond`](Self::respond). Requests only complete while
    /// the queue is being drained.
    pub async fn request(
        &self,
        sender: &str,
        recipient: &str,
        payload: Value,
        opts: MessageOptions,
    ) -> PluginResult<Value> {
        let correlation = Uuid::new_v4();
        let window = opts
            .timeout
            .unwrap_or_else(|| Duration::from_millis(self.settings.request_timeout_ms));

        let mut message = self.envelope(MessageKind::Request, sender, payload, &opts);
        message.recipient = Some(recipient.to_string());
        message.reply_to = Some(correlation);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation, tx);
        if let Err(e) = self.enqueue(message) {
            self.pending.remove(&correlation);
            return Err(e);
        }

        let outcome = tokio::time::timeout(window, rx).await;
        self.pending.remove(&correlation);

        match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BusError::Cancelled {
                recipient: recipient.to_string(),
                reason: "bus shut down".to_string(),
            }
            .into()),
            Err(_) => {
                tracing::debug!(recipient = %recipient, timeout_ms = window.as_millis() as u64, "Request timed out");
                Err(BusError::RequestTimeout {
                    recipient: recipient.to_string(),
                    timeout_ms: window.as_millis() as u64,
                }
                .into())
            }
        }
    }

    /// Answer a pending request. Returns false when nothing awaits `reply_to`.
    pub fn respond(&self, reply_to: Uuid, payload: Value) -> bool {
        self.resolve(reply_to, Ok(payload))
    }

    fn resolve(&self, reply_to: Uuid, reply: PluginResult<Value>) -> bool {
        match self.pending.remove(&reply_to) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Drain the queue. Returns the number of messages dequeued.
    ///
    /// A drain already in progress makes this a no-op.
    pub async fn process_queue(&self) -> usize {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut handled = 0;
        loop {
            let next = self.queue.lock().pop();
            let Some(entry) = next else { break };
            handled += 1;

            let age = entry.enqueued.elapsed();
            if age > entry.message.ttl() {
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(message_id = %entry.message.id, age_ms = age.as_millis() as u64, "Message expired");
                if let Some(reply_to) = entry.message.reply_to {
                    self.resolve(
                        reply_to,
                        Err(PluginError::communication(
                            entry.message.recipient.clone().unwrap_or_default(),
                            "request expired before delivery",
                        )),
                    );
                }
                self.events.emit(BusEvent::Expired {
                    message_id: entry.message.id.to_string(),
                    age,
                });
                continue;
            }

            self.deliver(entry.message).await;
        }
        handled
    }

    async fn deliver(&self, message: Message) {
        let recipients = match message.kind {
            MessageKind::Broadcast => self.deliver_broadcast(&message).await,
            MessageKind::Direct | MessageKind::Request => self.deliver_direct(&message).await,
        };

        if recipients > 0 {
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            self.events.emit(BusEvent::Delivered {
                message_id: message.id.to_string(),
                recipients,
            });
        }
    }

    async fn deliver_broadcast(&self, message: &Message) -> usize {
        let Some(channel) = message.channel.as_deref() else {
            return 0;
        };

        let mut recipients = 0;
        if let Some(mut senders) = self.receivers.get_mut(channel) {
            senders.retain(|tx| tx.send(message.clone()).is_ok());
            recipients += senders.len();
        }

        let subscribers: Vec<Arc<dyn Plugin>> = self
            .subscriptions
            .get(channel)
            .map(|ids| {
                ids.iter()
                    .filter(|id| id.as_str() != message.sender)
                    .filter_map(|id| self.endpoints.get(id).map(|e| Arc::clone(e.value())))
                    .collect()
            })
            .unwrap_or_default();

        for endpoint in subscribers {
            recipients += 1;
            if let Err(e) = endpoint.handle_message(message).await {
                self.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(channel = %channel, message_id = %message.id, error = %e, "Subscriber failed to handle message");
            }
        }
        recipients
    }

    async fn deliver_direct(&self, message: &Message) -> usize {
        let recipient = message.recipient.clone().unwrap_or_default();
        let endpoint = self.endpoints.get(&recipient).map(|e| Arc::clone(e.value()));

        let Some(endpoint) = endpoint else {
            self.counters.undeliverable.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(recipient = %recipient, message_id = %message.id, "No endpoint for message");
            if let Some(reply_to) = message.reply_to {
                self.resolve(
                    reply_to,
                    Err(PluginError::communication(&recipient, "recipient is not reachable")),
                );
            }
            self.events.emit(BusEvent::Undeliverable {
                message_id: message.id.to_string(),
                recipient,
            });
            return 0;
        };

        match endpoint.handle_message(message).await {
            Ok(Some(reply)) => {
                if let Some(reply_to) = message.reply_to {
                    self.resolve(reply_to, Ok(reply));
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(recipient = %recipient, message_id = %message.id, error = %e, "Recipient failed to handle message");
                if let Some(reply_to) = message.reply_to {
                    self.resolve(reply_to, Err(e));
                }
            }
        }
        1
    }

    /// Spawn the periodic drain loop.
    ///
    /// A bus that was shut down can be started again.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        let shutdown = {
            let mut token = self.shutdown.lock();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
            token.clone()
        };
        let tick = Duration::from_millis(self.settings.tick_interval_ms);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        bus.process_queue().await;
                    }
                }
            }
            tracing::debug!("Message bus drain stopped");
        })
    }

    /// Stop the drain loop and fail outstanding requests.
    pub fn shutdown(&self) {
        self.shutdown.lock().cancel();
        self.pending.clear();
    }

    /// Subscribe a plugin endpoint to a channel.
    pub fn subscribe(&self, plugin_id: &str, channel: &str) -> bool {
        self.subscriptions
            .entry(channel.to_string())
            .or_default()
            .insert(plugin_id.to_string())
    }

    /// Remove a plugin's subscription.
    pub fn unsubscribe(&self, plugin_id: &str, channel: &str) -> bool {
        let removed = self
            .subscriptions
            .get_mut(channel)
            .map(|mut ids| ids.remove(plugin_id))
            .unwrap_or(false);
        self.subscriptions.remove_if(channel, |_, ids| ids.is_empty());
        removed
    }

    /// Remove every subscription of a plugin.
    pub fn unsubscribe_all(&self, plugin_id: &str) {
        for mut ids in self.subscriptions.iter_mut() {
            ids.remove(plugin_id);
        }
        self.subscriptions.retain(|_, ids| !ids.is_empty());
    }

    /// Channels a plugin is subscribed to.
    pub fn subscriptions_of(&self, plugin_id: &str) -> Vec<String> {
        let mut channels: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().contains(plugin_id))
            .map(|entry| entry.key().clone())
            .collect();
        channels.sort();
        channels
    }

    /// Receive a channel's broadcasts on the host side.
    pub fn subscribe_channel(&self, channel: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.receivers.entry(channel.to_string()).or_default().push(tx);
        rx
    }

    /// Route messages addressed to `plugin_id` to this plugin.
    pub fn register_endpoint(&self, plugin_id: &str, plugin: Arc<dyn Plugin>) {
        self.endpoints.insert(plugin_id.to_string(), plugin);
    }

    /// Stop routing messages to `plugin_id`.
    pub fn unregister_endpoint(&self, plugin_id: &str) -> bool {
        self.endpoints.remove(plugin_id).is_some()
    }

    /// Whether `plugin_id` has an endpoint.
    pub fn has_endpoint(&self, plugin_id: &str) -> bool {
        self.endpoints.contains_key(plugin_id)
    }

    /// Messages waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    /// Bus statistics.
    pub fn stats(&self) -> BusStats {
        BusStats {
            queue_depth: self.queue_depth(),
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            undeliverable: self.counters.undeliverable.load(Ordering::Relaxed),
            handler_errors: self.counters.handler_errors.load(Ordering::Relaxed),
            pending_requests: self.pending.len(),
            channels: self.subscriptions.len() + self.receivers.len(),
            endpoints: self.endpoints.len(),
        }
    }

    /// Subscribe to bus events.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }
}
