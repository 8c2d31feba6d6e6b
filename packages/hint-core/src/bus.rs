//! Topic-based event bus for rule handlers.
//!
//! # Guarantees
//!
//! - **Registration order**: for one publish, matching handlers run in the
//!   order they subscribed. Each handler (including its awaited async work)
//!   completes before the next one starts. Rules rely on this: a rule
//!   registered later may depend on side effects of an earlier rule for the
//!   same event instance.
//! - **Isolation**: a handler that returns an error or panics is recorded
//!   as a [`HandlerFault`] and the remaining handlers still run.
//! - **No global lock during dispatch**: the subscriber list is snapshotted
//!   when a publish starts, so publishes on unrelated topics proceed
//!   independently and handlers may subscribe/unsubscribe freely.
//!
//! Unsubscribing while a publish is in progress is safe; a handler that was
//! unsubscribed before its turn is skipped.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::event::Event;
use crate::topic::{Topic, TopicPattern};

/// Handler invoked for every event whose topic matches its pattern.
///
/// Closures of the shape `Fn(Arc<Event>) -> impl Future<Output = anyhow::Result<()>>`
/// implement this trait.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: Arc<Event>) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>) -> anyhow::Result<()> {
        (self)(event).await
    }
}

/// Identifies one subscription for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscription {
    id: u64,
    pattern: TopicPattern,
    rule_id: String,
    handler: Arc<dyn EventHandler>,
    active: AtomicBool,
}

/// A handler that failed while processing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    pub rule_id: String,
    pub topic: String,
    pub resource: String,
    pub message: String,
    pub panicked: bool,
}

/// What happened during one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub topic: Topic,
    /// Handlers that completed successfully
    pub delivered: usize,
    pub faults: Vec<HandlerFault>,
}

impl PublishResult {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    /// Handlers invoked, successful or not.
    pub fn invoked(&self) -> usize {
        self.delivered + self.faults.len()
    }
}

#[derive(Default)]
struct BusInner {
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
}

/// Pub-sub bus with exact and wildcard topic subscriptions.
///
/// Cheap to clone; clones share the same subscriptions.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` on behalf of `rule_id`.
    pub fn subscribe<H: EventHandler>(
        &self,
        pattern: TopicPattern,
        rule_id: impl Into<String>,
        handler: H,
    ) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            id,
            pattern,
            rule_id: rule_id.into(),
            handler: Arc::new(handler),
            active: AtomicBool::new(true),
        });

        debug!(
            rule = %subscription.rule_id,
            pattern = %subscription.pattern,
            "subscribed"
        );

        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(subscription);

        SubscriptionHandle(id)
    }

    /// Remove a subscription. Idempotent; returns whether it was still active.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        match subscriptions.iter().position(|s| s.id == handle.0) {
            Some(index) => {
                let removed = subscriptions.remove(index);
                removed.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Remove every subscription owned by `rule_id`. Returns how many were removed.
    pub fn unsubscribe_rule(&self, rule_id: &str) -> usize {
        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let before = subscriptions.len();
        subscriptions.retain(|s| {
            let keep = s.rule_id != rule_id;
            if !keep {
                s.active.store(false, Ordering::Release);
            }
            keep
        });
        before - subscriptions.len()
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        for s in subscriptions.drain(..) {
            s.active.store(false, Ordering::Release);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Number of subscriptions whose pattern matches `topic`.
    pub fn subscribers_for(&self, topic: &Topic) -> usize {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.pattern.matches(topic))
            .count()
    }

    /// Publish an event under its own topic.
    pub async fn emit(&self, event: Event) -> PublishResult {
        let topic = event.topic();
        self.publish(&topic, Arc::new(event)).await
    }

    /// Publish `event` under `topic`, awaiting each matching handler in
    /// registration order.
    pub async fn publish(&self, topic: &Topic, event: Arc<Event>) -> PublishResult {
        let snapshot: Vec<Arc<Subscription>> = {
            let subscriptions = self
                .inner
                .subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            subscriptions
                .iter()
                .filter(|s| s.pattern.matches(topic))
                .cloned()
                .collect()
        };

        debug!(topic = %topic, subscribers = snapshot.len(), "publishing");

        let mut result = PublishResult {
            topic: topic.clone(),
            delivered: 0,
            faults: Vec::new(),
        };

        for subscription in snapshot {
            if !subscription.active.load(Ordering::Acquire) {
                continue;
            }

            // AssertUnwindSafe is required because handlers are not UnwindSafe
            let outcome = AssertUnwindSafe(subscription.handler.handle(event.clone()))
                .catch_unwind()
                .await;

            let (message, panicked) = match outcome {
                Ok(Ok(())) => {
                    result.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => (format!("{e:#}"), false),
                Err(panic_info) => (extract_panic_message(&panic_info), true),
            };

            warn!(
                rule = %subscription.rule_id,
                topic = %topic,
                error = %message,
                panicked,
                "handler failed"
            );

            result.faults.push(HandlerFault {
                rule_id: subscription.rule_id.clone(),
                topic: topic.to_string(),
                resource: event.resource().to_string(),
                message,
                panicked,
            });
        }

        result
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Extract a message from a panic payload.
pub(crate) fn extract_panic_message(panic_info: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn traverse_end() -> Event {
        Event::TraverseEnd {
            resource: "https://x/".to_string(),
        }
    }

    fn pattern(raw: &str) -> TopicPattern {
        TopicPattern::parse(raw).unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let push = {
            let log = log.clone();
            move |entry: &str| log.lock().unwrap().push(entry.to_string())
        };
        (log, push)
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let (log, push) = recorder();

        for name in ["first", "second", "third"] {
            let push = push.clone();
            bus.subscribe(pattern("traverse::end"), name, move |_event: Arc<Event>| {
                let push = push.clone();
                async move {
                    push(name);
                    Ok(())
                }
            });
        }

        let result = bus.emit(traverse_end()).await;

        assert_eq!(result.delivered, 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_async_handler_completes_before_next_starts() {
        let bus = EventBus::new();
        let (log, push) = recorder();

        {
            let push = push.clone();
            bus.subscribe(pattern("traverse::end"), "slow", move |_event: Arc<Event>| {
                let push = push.clone();
                async move {
                    push("slow:start");
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    push("slow:end");
                    Ok(())
                }
            });
        }
        bus.subscribe(pattern("traverse::end"), "fast", move |_event: Arc<Event>| {
            let push = push.clone();
            async move {
                push("fast");
                Ok(())
            }
        });

        bus.emit(traverse_end()).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["slow:start", "slow:end", "fast"]
        );
    }

    #[tokio::test]
    async fn test_only_matching_patterns_receive() {
        let bus = EventBus::new();
        let (log, push) = recorder();

        let rules = [
            ("end", "traverse::end"),
            ("start", "traverse::start"),
            ("any", "traverse::*"),
        ];
        for (rule, p) in rules {
            let push = push.clone();
            bus.subscribe(pattern(p), rule, move |_event: Arc<Event>| {
                let push = push.clone();
                async move {
                    push(rule);
                    Ok(())
                }
            });
        }

        bus.emit(traverse_end()).await;

        assert_eq!(*log.lock().unwrap(), vec!["end", "any"]);
    }

    #[tokio::test]
    async fn test_publishes_on_unrelated_topics_interleave() {
        let bus = EventBus::new();
        let end_started = Arc::new(tokio::sync::Notify::new());
        let start_done = Arc::new(tokio::sync::Notify::new());

        // Each handler waits on the other, so serialized publishes never finish.
        {
            let end_started = end_started.clone();
            let start_done = start_done.clone();
            bus.subscribe(pattern("traverse::end"), "end", move |_event: Arc<Event>| {
                let end_started = end_started.clone();
                let start_done = start_done.clone();
                async move {
                    end_started.notify_one();
                    start_done.notified().await;
                    Ok(())
                }
            });
        }
        {
            let end_started = end_started.clone();
            let start_done = start_done.clone();
            bus.subscribe(pattern("traverse::start"), "start", move |_event: Arc<Event>| {
                let end_started = end_started.clone();
                let start_done = start_done.clone();
                async move {
                    end_started.notified().await;
                    start_done.notify_one();
                    Ok(())
                }
            });
        }

        let traverse_start = Event::TraverseStart {
            resource: "https://x/".to_string(),
        };
        let both = async { futures::join!(bus.emit(traverse_end()), bus.emit(traverse_start)) };
        let (end, start) = tokio::time::timeout(Duration::from_secs(1), both)
            .await
            .expect("publishes on different topics should not block each other");

        assert_eq!(end.delivered, 1);
        assert_eq!(start.delivered, 1);
    }

    #[tokio::test]
    async fn test_error_is_isolated() {
        let bus = EventBus::new();
        let (log, push) = recorder();

        bus.subscribe(pattern("traverse::end"), "broken", |_event: Arc<Event>| async {
            Err::<(), _>(anyhow::anyhow!("boom"))
        });
        bus.subscribe(pattern("traverse::end"), "healthy", move |_event: Arc<Event>| {
            let push = push.clone();
            async move {
                push("healthy");
                Ok(())
            }
        });

        let result = bus.emit(traverse_end()).await;

        assert_eq!(result.delivered, 1);
        assert_eq!(result.faults.len(), 1);
        assert_eq!(result.faults[0].rule_id, "broken");
        assert_eq!(result.faults[0].message, "boom");
        assert_eq!(result.faults[0].resource, "https://x/");
        assert!(!result.faults[0].panicked);
        assert_eq!(*log.lock().unwrap(), vec!["healthy"]);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let bus = EventBus::new();

        bus.subscribe(pattern("traverse::end"), "panics", |_event: Arc<Event>| async {
            if true {
                panic!("handler exploded");
            }
            Ok(())
        });
        bus.subscribe(pattern("traverse::end"), "after", |_event: Arc<Event>| async { Ok(()) });

        let result = bus.emit(traverse_end()).await;

        assert_eq!(result.delivered, 1);
        assert!(result.faults[0].panicked);
        assert!(result.faults[0].message.contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let handle =
            bus.subscribe(pattern("traverse::end"), "r", |_event: Arc<Event>| async { Ok(()) });

        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
        assert_eq!(bus.subscriber_count(), 0);

        let result = bus.emit(traverse_end()).await;
        assert_eq!(result.invoked(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_during_publish_skips_pending_handler() {
        let bus = EventBus::new();
        let (log, push) = recorder();
        let victim: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        {
            let inner_bus = bus.clone();
            let victim = victim.clone();
            let push = push.clone();
            bus.subscribe(pattern("traverse::end"), "killer", move |_event: Arc<Event>| {
                let bus = inner_bus.clone();
                let victim = victim.clone();
                let push = push.clone();
                async move {
                    push("killer");
                    if let Some(handle) = victim.lock().unwrap().take() {
                        bus.unsubscribe(handle);
                    }
                    Ok(())
                }
            });
        }

        let handle = bus.subscribe(pattern("traverse::end"), "victim", move |_event: Arc<Event>| {
            let push = push.clone();
            async move {
                push("victim");
                Ok(())
            }
        });
        *victim.lock().unwrap() = Some(handle);

        let result = bus.emit(traverse_end()).await;

        assert_eq!(result.delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["killer"]);
    }

    #[tokio::test]
    async fn test_subscribe_during_publish_does_not_join_current_dispatch() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicU64::new(0));

        {
            let inner_bus = bus.clone();
            let calls = calls.clone();
            bus.subscribe(pattern("traverse::end"), "spawner", move |_event: Arc<Event>| {
                let bus = inner_bus.clone();
                let calls = calls.clone();
                async move {
                    let calls = calls.clone();
                    bus.subscribe(pattern("traverse::end"), "late", move |_event: Arc<Event>| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    });
                    Ok(())
                }
            });
        }

        let result = bus.emit(traverse_end()).await;

        assert_eq!(result.invoked(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_rule_removes_all_its_handlers() {
        let bus = EventBus::new();
        bus.subscribe(pattern("traverse::end"), "a", |_event: Arc<Event>| async { Ok(()) });
        bus.subscribe(pattern("fetch::end::*"), "a", |_event: Arc<Event>| async { Ok(()) });
        bus.subscribe(pattern("traverse::end"), "b", |_event: Arc<Event>| async { Ok(()) });

        assert_eq!(bus.unsubscribe_rule("a"), 2);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.subscribers_for(&Topic::parse("traverse::end").unwrap()), 1);
    }

    #[test]
    fn test_debug_impl() {
        let bus = EventBus::new();
        let debug_str = format!("{:?}", bus);
        assert!(debug_str.contains("EventBus"));
        assert!(debug_str.contains("subscriber_count"));
    }
}
