//! Process-local bus used by tests, benches and single-node deployments.

use std::sync::{Mutex, MutexGuard, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    #[error("subscriber list lock poisoned")]
    Poisoned,
}

/// Broadcasts each message to every live subscriber over std channels.
///
/// Subscribers whose receiving end was dropped are forgotten on the next
/// publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    outlets: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscribers still registered.
    pub fn subscriber_count(&self) -> usize {
        self.outlets().map(|outlets| outlets.len()).unwrap_or(0)
    }

    fn outlets(&self) -> Result<MutexGuard<'_, Vec<mpsc::Sender<M>>>, InMemoryBusError> {
        self.outlets.lock().map_err(|_| InMemoryBusError::Poisoned)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            outlets: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut outlets = self.outlets()?;
        outlets.retain(|outlet| outlet.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (outlet, inbox) = mpsc::channel();
        match self.outlets() {
            Ok(mut outlets) => outlets.push(outlet),
            // A poisoned bus hands out a subscription that never yields.
            Err(_) => drop(outlet),
        }
        Subscription::new(inbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_published_messages() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(1).unwrap();
        bus.publish(2).unwrap();

        assert_eq!(a.drain(), vec![1, 2]);
        assert_eq!(b.drain(), vec![1, 2]);
    }

    #[test]
    fn late_subscribers_miss_earlier_messages() {
        let bus: InMemoryEventBus<&str> = InMemoryEventBus::new();
        bus.publish("before").unwrap();
        let late = bus.subscribe();
        bus.publish("after").unwrap();

        assert_eq!(late.drain(), vec!["after"]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(7).unwrap();
        assert_eq!(keep.drain(), vec![7]);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
