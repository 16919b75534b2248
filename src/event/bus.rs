// =============================================================================
// EventBus — subject-routed async fan-out with error isolation
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map};
use tracing::{debug, error, warn};

use super::glob::glob_match;
use super::model::Event;
use super::store::EventStore;

/// Something that reacts to published events. Implementors must be
/// infallible with respect to the bus's own bookkeeping: a returned `Err`
/// is caught per-invocation and converted into a
/// `system.alert.handler_error` event rather than propagated to the
/// publisher.
#[async_trait]
pub trait Handler: Send + Sync {
    /// A stable, human-readable name used in alert events and logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

struct Subscription {
    pattern: String,
    handler: Arc<dyn Handler>,
}

/// Single process-wide event bus. Share one instance (behind an `Arc`)
/// across every module manager.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    store: Option<Arc<dyn EventStore>>,
}

impl EventBus {
    pub fn new(store: Option<Arc<dyn EventStore>>) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            store,
        }
    }

    /// Subscribe `handler` to `pattern`. The same handler may be subscribed
    /// under multiple patterns; it is still invoked at most once per event
    /// (see [`EventBus::matching_handlers`]).
    pub fn subscribe(&self, pattern: impl Into<String>, handler: Arc<dyn Handler>) {
        let pattern = pattern.into();
        debug!(pattern = %pattern, handler = handler.name(), "subscribed");
        self.subscriptions.write().push(Subscription { pattern, handler });
    }

    /// Publish `event`. If `persist` is true and a store is bound, the event
    /// is inserted before fan-out; store failures are logged but never stop
    /// delivery. Matching handlers run concurrently; this call awaits their
    /// completion. A handler that returns `Err` never propagates it to the
    /// caller — the error is logged and re-published as
    /// `system.alert.handler_error` (itself never persisted, breaking the
    /// recursion).
    pub async fn publish(&self, event: Event, persist: bool) {
        debug!(subject = %event.subject, persist, "publishing event");

        if persist {
            if let Some(store) = &self.store {
                if let Err(e) = store.insert(&event).await {
                    error!(error = %e, subject = %event.subject, "event persistence failed");
                }
            }
        }

        let handlers = self.matching_handlers(&event.subject);
        if handlers.is_empty() {
            return;
        }

        let invocations = handlers.into_iter().map(|handler| {
            let event = event.clone();
            async move {
                let name = handler.name().to_string();
                if let Err(e) = handler.handle(event.clone()).await {
                    warn!(
                        handler = %name,
                        subject = %event.subject,
                        error = %e,
                        "handler returned an error"
                    );
                    Some(alert_event(&event, &name, &e))
                } else {
                    None
                }
            }
        });

        let alerts: Vec<Event> = futures_util::future::join_all(invocations)
            .await
            .into_iter()
            .flatten()
            .collect();

        for alert in alerts {
            // persist=false: alert events are diagnostic noise, not part of
            // the durable event history, and must never re-trigger this
            // same path (an alert event never matches a handler pattern
            // that itself fails in a way that raises another alert, since
            // handler errors on the alert subject would recurse otherwise).
            self.dispatch(alert).await;
        }
    }

    /// Fan-out without persistence or alert re-raising, used for the alert
    /// subject itself so a failing alert handler cannot recurse.
    async fn dispatch(&self, event: Event) {
        let handlers = self.matching_handlers(&event.subject);
        let invocations = handlers.into_iter().map(|handler| {
            let event = event.clone();
            async move {
                let name = handler.name().to_string();
                if let Err(e) = handler.handle(event.clone()).await {
                    error!(handler = %name, subject = %event.subject, error = %e, "alert handler failed");
                }
            }
        });
        futures_util::future::join_all(invocations).await;
    }

    /// Every (pattern, handler) pair whose pattern matches `subject`,
    /// deduplicated by handler identity, preserving first-seen order.
    fn matching_handlers(&self, subject: &str) -> Vec<Arc<dyn Handler>> {
        let subs = self.subscriptions.read();
        let mut seen: Vec<*const ()> = Vec::new();
        let mut out = Vec::new();

        for sub in subs.iter() {
            if !glob_match(&sub.pattern, subject) {
                continue;
            }
            let ptr = Arc::as_ptr(&sub.handler) as *const ();
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            out.push(sub.handler.clone());
        }

        out
    }
}

fn alert_event(original: &Event, handler_name: &str, error: &anyhow::Error) -> Event {
    let mut data = Map::new();
    data.insert("original_subject".into(), json!(original.subject));
    data.insert("original_event_id".into(), json!(original.event_id));
    data.insert("handler_name".into(), json!(handler_name));
    data.insert("error_type".into(), json!("HandlerError"));
    data.insert("error_message".into(), json!(error.to_string()));
    Event::with_source("system.alert.handler_error", data, "event_bus")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::store::InMemoryEventStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        name: String,
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, _event: Event) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn wildcard_fanout_and_dedup() {
        let store = Arc::new(InMemoryEventStore::new(1000));
        let bus = EventBus::new(Some(store.clone()));

        let a_count = Arc::new(AtomicUsize::new(0));
        let b_count = Arc::new(AtomicUsize::new(0));

        let a: Arc<dyn Handler> = Arc::new(CountingHandler {
            name: "A".into(),
            count: a_count.clone(),
            fail: false,
        });
        let b: Arc<dyn Handler> = Arc::new(CountingHandler {
            name: "B".into(),
            count: b_count.clone(),
            fail: false,
        });

        bus.subscribe("order.*", a.clone());
        bus.subscribe("order.created", b.clone());

        bus.publish(Event::new("order.created", Map::new()), true).await;
        bus.publish(Event::new("order.updated", Map::new()), true).await;

        assert_eq!(a_count.load(Ordering::SeqCst), 2);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);

        let recent = store.query_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn handler_invoked_once_even_with_multiple_matching_patterns() {
        let bus = EventBus::new(None);
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn Handler> = Arc::new(CountingHandler {
            name: "multi".into(),
            count: count.clone(),
            fail: false,
        });

        bus.subscribe("order.*", handler.clone());
        bus.subscribe("*", handler.clone());

        bus.publish(Event::new("order.created", Map::new()), false).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_raises_alert_without_reaching_caller() {
        let bus = EventBus::new(None);
        let alert_count = Arc::new(AtomicUsize::new(0));

        let failing: Arc<dyn Handler> = Arc::new(CountingHandler {
            name: "failing".into(),
            count: Arc::new(AtomicUsize::new(0)),
            fail: true,
        });
        let alert_listener: Arc<dyn Handler> = Arc::new(CountingHandler {
            name: "alert_listener".into(),
            count: alert_count.clone(),
            fail: false,
        });

        bus.subscribe("order.created", failing);
        bus.subscribe("system.alert.*", alert_listener);

        bus.publish(Event::new("order.created", Map::new()), false).await;

        assert_eq!(alert_count.load(Ordering::SeqCst), 1);
    }
}
