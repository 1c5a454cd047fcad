//! Event subscribers and the registry that routes deliveries to them.
//!
//! A subscriber declares two things:
//!
//! 1. whether it is interested in a given [`Target`] at all
//!    ([`EventSubscriber::is_applicable`]), and
//! 2. which [`EventType`]s it wants ([`EventSubscriber::events`]).
//!
//! The [`SubscriberRegistry`] combines the first with the second to compute
//! the events a target's hook must deliver, and uses the second alone to route
//! an inbound delivery. New consumers are added by registering an
//! implementation; the registry itself never changes.
//!
//! Two built-in subscribers never claim any target:
//!
//! - [`PingSubscriber`] logs hook pings and treats them as a liveness signal
//!   that clears problem records.
//! - [`DuplicateEventsSubscriber`] feeds push delivery ids to the
//!   [`DuplicateDetector`].

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::duplicates::DuplicateDetector;
use crate::errors::SubscriberError;
use crate::problems::ProblemMonitor;
use crate::types::{DeliveryEvent, EventType, Target};

// ============================================================================
// EventSubscriber
// ============================================================================

/// A consumer of inbound deliveries.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Unique name, used for logging and [`SubscriberRegistry::unregister`].
    fn name(&self) -> &str;

    /// Returns `true` if this subscriber needs hooks for `target`.
    fn is_applicable(&self, target: &Target) -> bool;

    /// Events this subscriber wants. An empty set means none, never all.
    fn events(&self) -> BTreeSet<EventType>;

    /// Handles one delivery whose type is in [`EventSubscriber::events`].
    ///
    /// # Errors
    ///
    /// Any error is logged by the registry and does not affect other
    /// subscribers.
    async fn on_event(&self, event: &DeliveryEvent) -> Result<(), SubscriberError>;
}

// ============================================================================
// SubscriberRegistry
// ============================================================================

/// Result of dispatching one delivery.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers that handled the delivery successfully.
    pub delivered: Vec<String>,
    /// Subscribers that failed, with their error.
    pub failed: Vec<(String, SubscriberError)>,
}

impl DispatchReport {
    /// Returns `true` if no subscriber received the delivery.
    pub fn is_unrouted(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

/// The set of registered subscribers.
///
/// Constructed once at start-up and shared by reference with the webhook
/// manager and the inbound endpoint.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber`, replacing any existing one with the same name.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|s| s.name() != subscriber.name());
        debug!(subscriber = subscriber.name(), "Registered event subscriber");
        subscribers.push(subscriber);
    }

    /// Removes the subscriber named `name`. Returns `true` if one was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.name() != name);
        before != subscribers.len()
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns `true` if no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Union of the events wanted by every subscriber applicable to `target`.
    ///
    /// Empty if no subscriber is applicable.
    pub fn desired_events(&self, target: &Target) -> BTreeSet<EventType> {
        self.snapshot()
            .iter()
            .filter(|s| s.is_applicable(target))
            .flat_map(|s| s.events())
            .collect()
    }

    /// Returns `true` if any subscriber is applicable to `target`.
    pub fn is_wanted(&self, target: &Target) -> bool {
        !self.desired_events(target).is_empty()
    }

    /// Delivers `event` to every subscriber whose event set contains its type.
    ///
    /// Subscribers run one after another; a failure is logged and recorded in
    /// the report, and the remaining subscribers still receive the delivery.
    /// Unknown event types are delivered to nobody.
    #[instrument(skip(self, event), fields(
        event_type = %event.event_type,
        delivery_id = event.delivery_id.as_ref().map(|d| d.as_str()).unwrap_or("-"),
    ))]
    pub async fn dispatch(&self, event: &DeliveryEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        if !event.event_type.is_routable() {
            debug!("No subscriber routes unknown event types");
            return report;
        }

        let interested: Vec<Arc<dyn EventSubscriber>> = self
            .snapshot()
            .into_iter()
            .filter(|s| s.events().contains(&event.event_type))
            .collect();

        for subscriber in interested {
            let outcome = AssertUnwindSafe(subscriber.on_event(event))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(SubscriberError::new(panic_message(panic.as_ref()))));
            match outcome {
                Ok(()) => report.delivered.push(subscriber.name().to_string()),
                Err(err) => {
                    warn!(
                        subscriber = subscriber.name(),
                        error = %err,
                        "Subscriber failed to handle delivery"
                    );
                    report.failed.push((subscriber.name().to_string(), err));
                }
            }
        }

        if report.is_unrouted() {
            debug!("No subscriber is interested in this event");
        }
        report
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventSubscriber>> {
        self.subscribers.read().clone()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("subscriber panicked: {detail}")
}

// ============================================================================
// Built-in subscribers
// ============================================================================

/// Logs `ping` deliveries and clears problems for the pinged repository.
pub struct PingSubscriber {
    problems: Arc<ProblemMonitor>,
}

impl PingSubscriber {
    /// Registry name of this subscriber.
    pub const NAME: &'static str = "ping";

    /// Creates a ping subscriber reporting liveness to `problems`.
    pub fn new(problems: Arc<ProblemMonitor>) -> Self {
        Self { problems }
    }
}

#[async_trait]
impl EventSubscriber for PingSubscriber {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_applicable(&self, _target: &Target) -> bool {
        false
    }

    fn events(&self) -> BTreeSet<EventType> {
        BTreeSet::from([EventType::Ping])
    }

    async fn on_event(&self, event: &DeliveryEvent) -> Result<(), SubscriberError> {
        let payload = event.json()?;
        let hook_id = payload.get("hook_id").and_then(|v| v.as_u64());
        let zen = payload.get("zen").and_then(|v| v.as_str()).unwrap_or_default();

        let repositories = event.repositories();
        if repositories.is_empty() {
            info!(?hook_id, zen, origin = %event.origin, "Received ping for organisation hook");
        }
        for repo in repositories {
            info!(?hook_id, zen, repository = %repo, origin = %event.origin, "Received ping");
            self.problems.resolve_problem(&repo);
        }
        Ok(())
    }
}

/// Records push delivery ids so redeliveries can be flagged.
pub struct DuplicateEventsSubscriber {
    detector: Arc<DuplicateDetector>,
}

impl DuplicateEventsSubscriber {
    /// Registry name of this subscriber.
    pub const NAME: &'static str = "duplicate-events";

    /// Creates a subscriber feeding `detector`.
    pub fn new(detector: Arc<DuplicateDetector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl EventSubscriber for DuplicateEventsSubscriber {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_applicable(&self, _target: &Target) -> bool {
        false
    }

    fn events(&self) -> BTreeSet<EventType> {
        BTreeSet::from([EventType::Push])
    }

    async fn on_event(&self, event: &DeliveryEvent) -> Result<(), SubscriberError> {
        let count = self
            .detector
            .observe(event.delivery_id.as_ref(), event.received_at);
        if count > 1 {
            warn!(
                delivery_id = event.delivery_id.as_ref().map(|d| d.as_str()).unwrap_or("-"),
                count,
                origin = %event.origin,
                "Same delivery received more than once; check for duplicate hooks"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "subscribers_tests.rs"]
mod tests;
