//! Change notification for rating sets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// What changed in a rating set.
#[derive(Debug, Clone, PartialEq)]
pub enum RatingSetEvent {
    Added { effective_dates: Vec<i64> },
    Replaced { effective_dates: Vec<i64> },
    Removed { effective_dates: Vec<i64> },
    Materialized { effective_date: i64 },
    Pruned { effective_date: i64 },
    Refreshed,
    /// A child rating set owned by one of this set's ratings changed.
    SourceChanged { spec_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Listener = Arc<dyn Fn(&RatingSetEvent) + Send + Sync>;

/// Callback registry. Listeners run synchronously on the notifying thread.
#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RatingSetEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn notify(&self, event: &RatingSetEvent) {
        // snapshot so listeners may subscribe or unsubscribe while being called
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_notify_unsubscribe() {
        let observers = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = observers.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        assert_eq!(observers.listener_count(), 1);

        observers.notify(&RatingSetEvent::Refreshed);
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.notify(&RatingSetEvent::Pruned { effective_date: 5 });

        assert_eq!(*seen.lock().unwrap(), vec![RatingSetEvent::Refreshed]);
    }

    #[test]
    fn test_ids_are_distinct() {
        let observers = Observers::new();
        let a = observers.subscribe(|_| {});
        let b = observers.subscribe(|_| {});
        assert_ne!(a, b);
    }
}
