//! Reference-counted subscription registry.
//!
//! Tracks which (broker, exchange, symbol) streams are wanted and by how
//! many logical subscribers. A symbol appears at most once per key; the
//! physical broker subscription is only torn down when the last reference
//! is released. Pure data structure; callers serialize access.

use std::collections::HashMap;

use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::market_data::SubscriptionMode;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub broker: BrokerId,
    pub exchange: Exchange,
    pub symbol: String,
}

impl SubscriptionKey {
    pub fn new(broker: BrokerId, exchange: Exchange, symbol: impl Into<String>) -> Self {
        SubscriptionKey {
            broker,
            exchange,
            symbol: symbol.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub mode: SubscriptionMode,
    pub ref_count: u32,
}

/// Outcome of acquiring a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// First subscriber: the broker must be told.
    First,
    /// Further subscriber: already streaming.
    Again(u32),
}

/// Outcome of releasing a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Last subscriber gone: physically unsubscribe.
    Last,
    /// Others still hold it.
    Still(u32),
    /// Nothing was held; releasing is idempotent.
    NotHeld,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKey, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, key: SubscriptionKey, mode: SubscriptionMode) -> Acquire {
        match self.entries.get_mut(&key) {
            Some(subscription) => {
                subscription.ref_count += 1;
                // A deeper mode wins for the shared stream
                if mode_depth(mode) > mode_depth(subscription.mode) {
                    subscription.mode = mode;
                }
                Acquire::Again(subscription.ref_count)
            }
            None => {
                self.entries.insert(key, Subscription { mode, ref_count: 1 });
                Acquire::First
            }
        }
    }

    pub fn release(&mut self, key: &SubscriptionKey) -> Release {
        match self.entries.get_mut(key) {
            Some(subscription) if subscription.ref_count > 1 => {
                subscription.ref_count -= 1;
                Release::Still(subscription.ref_count)
            }
            Some(_) => {
                self.entries.remove(key);
                Release::Last
            }
            None => Release::NotHeld,
        }
    }

    pub fn ref_count(&self, key: &SubscriptionKey) -> u32 {
        self.entries.get(key).map(|s| s.ref_count).unwrap_or(0)
    }

    pub fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Everything currently referenced on one broker, for resubscription
    /// after a reconnect.
    pub fn snapshot_for(&self, broker: BrokerId) -> Vec<(String, Exchange, SubscriptionMode)> {
        self.entries
            .iter()
            .filter(|(key, _)| key.broker == broker)
            .map(|(key, sub)| (key.symbol.clone(), key.exchange, sub.mode))
            .collect()
    }

    pub fn broker_is_idle(&self, broker: BrokerId) -> bool {
        !self.entries.keys().any(|key| key.broker == broker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn mode_depth(mode: SubscriptionMode) -> u8 {
    match mode {
        SubscriptionMode::Ltp => 0,
        SubscriptionMode::Quote => 1,
        SubscriptionMode::Full => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(symbol: &str) -> SubscriptionKey {
        SubscriptionKey::new(BrokerId::Zerodha, Exchange::Nse, symbol)
    }

    #[test]
    fn test_first_acquire() {
        let mut registry = SubscriptionRegistry::new();
        assert_eq!(
            registry.acquire(key("INFY"), SubscriptionMode::Quote),
            Acquire::First
        );
        assert_eq!(registry.ref_count(&key("INFY")), 1);
    }

    #[test]
    fn test_refcount_tracks_subscribers() {
        let mut registry = SubscriptionRegistry::new();
        registry.acquire(key("INFY"), SubscriptionMode::Quote);
        assert_eq!(
            registry.acquire(key("INFY"), SubscriptionMode::Quote),
            Acquire::Again(2)
        );
        assert_eq!(registry.ref_count(&key("INFY")), 2);
        // One entry per (broker, exchange, symbol), not two
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_until_last() {
        let mut registry = SubscriptionRegistry::new();
        registry.acquire(key("INFY"), SubscriptionMode::Ltp);
        registry.acquire(key("INFY"), SubscriptionMode::Ltp);

        assert_eq!(registry.release(&key("INFY")), Release::Still(1));
        assert_eq!(registry.release(&key("INFY")), Release::Last);
        assert_eq!(registry.ref_count(&key("INFY")), 0);
    }

    #[test]
    fn test_release_not_held_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        assert_eq!(registry.release(&key("INFY")), Release::NotHeld);
        registry.acquire(key("INFY"), SubscriptionMode::Ltp);
        registry.release(&key("INFY"));
        assert_eq!(registry.release(&key("INFY")), Release::NotHeld);
    }

    #[test]
    fn test_refcount_never_negative() {
        let mut registry = SubscriptionRegistry::new();
        for _ in 0..5 {
            registry.release(&key("INFY"));
        }
        assert_eq!(registry.ref_count(&key("INFY")), 0);
    }

    #[test]
    fn test_deeper_mode_wins() {
        let mut registry = SubscriptionRegistry::new();
        registry.acquire(key("INFY"), SubscriptionMode::Ltp);
        registry.acquire(key("INFY"), SubscriptionMode::Full);
        let snapshot = registry.snapshot_for(BrokerId::Zerodha);
        assert_eq!(snapshot[0].2, SubscriptionMode::Full);
    }

    #[test]
    fn test_snapshot_filters_by_broker() {
        let mut registry = SubscriptionRegistry::new();
        registry.acquire(key("INFY"), SubscriptionMode::Quote);
        registry.acquire(
            SubscriptionKey::new(BrokerId::Upstox, Exchange::Nse, "TCS"),
            SubscriptionMode::Quote,
        );
        assert_eq!(registry.snapshot_for(BrokerId::Zerodha).len(), 1);
        assert_eq!(registry.snapshot_for(BrokerId::Upstox).len(), 1);
        assert!(!registry.broker_is_idle(BrokerId::Zerodha));
        registry.release(&key("INFY"));
        assert!(registry.broker_is_idle(BrokerId::Zerodha));
    }
}
