//! Build triggers: the subscriber that turns deliveries into work for a target.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webhooks::{
    DeliveryEvent, DeliveryId, EventSubscriber, EventType, RepositoryIdentity, SubscriberError,
    Target, TargetName,
};

/// A request to run `target` because of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub target: TargetName,
    pub event: EventType,
    pub repository: RepositoryIdentity,
    pub delivery_id: Option<DeliveryId>,
}

/// Subscribes one target to its configured events.
///
/// The subscriber claims only its own target, so the hooks it causes are
/// limited to that target's repositories. Deliveries from other
/// repositories are ignored.
pub struct TriggerSubscriber {
    name: String,
    target: Target,
    events: BTreeSet<EventType>,
    sender: mpsc::Sender<TriggerRequest>,
}

impl TriggerSubscriber {
    /// Registry name used for `target`.
    pub fn registry_name(target: &TargetName) -> String {
        format!("trigger:{target}")
    }

    pub fn new(target: Target, events: BTreeSet<EventType>, sender: mpsc::Sender<TriggerRequest>) -> Self {
        Self {
            name: Self::registry_name(&target.name),
            target,
            events,
            sender,
        }
    }
}

#[async_trait]
impl EventSubscriber for TriggerSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_applicable(&self, target: &Target) -> bool {
        target.name == self.target.name
    }

    fn events(&self) -> BTreeSet<EventType> {
        self.events.clone()
    }

    async fn on_event(&self, event: &DeliveryEvent) -> Result<(), SubscriberError> {
        let Some(repository) = event
            .repositories()
            .into_iter()
            .find(|repo| self.target.references(repo))
        else {
            debug!(target = %self.target.name, event = %event.event_type, "Delivery is for another repository");
            return Ok(());
        };

        info!(
            target = %self.target.name,
            repository = %repository,
            event = %event.event_type,
            origin = %event.origin,
            "Triggering target"
        );
        let request = TriggerRequest {
            target: self.target.name.clone(),
            event: event.event_type.clone(),
            repository,
            delivery_id: event.delivery_id.clone(),
        };
        self.sender
            .try_send(request)
            .map_err(|err| SubscriberError::new(format!("trigger queue unavailable: {err}")))
    }
}

/// Consumes trigger requests until every sender is dropped.
pub fn spawn_trigger_log(mut receiver: mpsc::Receiver<TriggerRequest>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = receiver.recv().await {
            info!(
                target = %request.target,
                repository = %request.repository,
                event = %request.event,
                delivery_id = request.delivery_id.as_ref().map(|d| d.as_str()),
                "Trigger requested"
            );
        }
    })
}

#[cfg(test)]
#[path = "triggers_tests.rs"]
mod tests;
