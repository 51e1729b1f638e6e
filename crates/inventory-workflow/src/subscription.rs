//! Subscription registry: a topic→subscriber map, durable via
//! [`EntityStore`], that announces its own changes on the message bus.

use std::sync::Arc;
use std::time::Duration;

use inventory_bus::prelude::{Event, MessageBus};
use inventory_core::{EntityStore, Error};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// One subscriber's interest in a message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub message_type: String,
    pub wait_for_completion: bool,
    pub timeout: Duration,
}

/// A subscriber and everything it's subscribed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub subscriptions: Vec<Subscription>,
}

impl Subscriber {
    fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subscriptions: Vec::new(),
        }
    }
}

fn store_err(e: inventory_core::StoreError) -> Error {
    Error::Internal(e.to_string())
}

/// Topic→subscriber registry.
pub struct SubscriptionRegistry {
    store: Arc<dyn EntityStore<Subscriber>>,
    bus: Arc<MessageBus>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn EntityStore<Subscriber>>, bus: Arc<MessageBus>) -> Self {
        Self { store, bus }
    }

    /// Upsert a subscription. Replaces any existing entry for the same
    /// `message_type`.
    #[instrument(skip(self))]
    pub async fn add_subscription(
        &self,
        subscriber_id: &str,
        message_type: &str,
        wait: bool,
        timeout: Duration,
    ) -> Result<(), Error> {
        let mut subscriber = self
            .store
            .get(subscriber_id)
            .await
            .map_err(store_err)?
            .unwrap_or_else(|| Subscriber::empty(subscriber_id));

        match subscriber
            .subscriptions
            .iter_mut()
            .find(|s| s.message_type == message_type)
        {
            Some(existing) => {
                existing.wait_for_completion = wait;
                existing.timeout = timeout;
            }
            None => subscriber.subscriptions.push(Subscription {
                message_type: message_type.to_string(),
                wait_for_completion: wait,
                timeout,
            }),
        }

        self.store
            .put(subscriber_id, subscriber)
            .await
            .map_err(store_err)?;
        self.announce(subscriber_id, message_type).await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_subscription(&self, subscriber_id: &str, message_type: &str) -> Result<(), Error> {
        let Some(mut subscriber) = self.store.get(subscriber_id).await.map_err(store_err)? else {
            return Ok(());
        };
        subscriber.subscriptions.retain(|s| s.message_type != message_type);
        self.store
            .put(subscriber_id, subscriber)
            .await
            .map_err(store_err)?;
        self.announce(subscriber_id, message_type).await;
        Ok(())
    }

    /// Every subscriber currently interested in `message_type`.
    pub async fn list_subscriber_for(&self, message_type: &str) -> Result<Vec<Subscriber>, Error> {
        let all = self.store.list().await.map_err(store_err)?;
        Ok(all
            .into_iter()
            .filter(|s| s.subscriptions.iter().any(|sub| sub.message_type == message_type))
            .collect())
    }

    async fn announce(&self, subscriber_id: &str, message_type: &str) {
        self.bus
            .emit(Event::new("subscribers_changed").with_data(serde_json::json!({
                "subscriber_id": subscriber_id,
                "message_type": message_type,
            })))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory_core::MemoryEntityStore;

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(Arc::new(MemoryEntityStore::new()), Arc::new(MessageBus::new()))
    }

    #[tokio::test]
    async fn add_then_list_returns_subscriber() {
        let reg = registry();
        reg.add_subscription("sub_1", "collect", true, Duration::from_secs(30))
            .await
            .unwrap();
        let subs = reg.list_subscriber_for("collect").await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, "sub_1");
    }

    #[tokio::test]
    async fn re_adding_replaces_existing_subscription() {
        let reg = registry();
        reg.add_subscription("sub_1", "collect", true, Duration::from_secs(30))
            .await
            .unwrap();
        reg.add_subscription("sub_1", "collect", false, Duration::from_secs(60))
            .await
            .unwrap();
        let subs = reg.list_subscriber_for("collect").await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].subscriptions.len(), 1);
        assert!(!subs[0].subscriptions[0].wait_for_completion);
    }

    #[tokio::test]
    async fn remove_subscription_drops_it_from_listing() {
        let reg = registry();
        reg.add_subscription("sub_1", "collect", true, Duration::from_secs(30))
            .await
            .unwrap();
        reg.remove_subscription("sub_1", "collect").await.unwrap();
        assert!(reg.list_subscriber_for("collect").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn change_emits_subscribers_changed_event() {
        let bus = Arc::new(MessageBus::new());
        let reg = SubscriptionRegistry::new(Arc::new(MemoryEntityStore::new()), Arc::clone(&bus));
        let bus_for_waiter = Arc::clone(&bus);
        let waiter = tokio::spawn(async move { bus_for_waiter.wait_for("subscribers_changed", |_| true).await });
        tokio::task::yield_now().await;
        reg.add_subscription("sub_1", "collect", true, Duration::from_secs(30))
            .await
            .unwrap();
        let msg = waiter.await.unwrap();
        assert!(matches!(msg, inventory_bus::prelude::Message::Event(_)));
    }
}
