//! Subscription registry
//!
//! Tracks the server-side subscriptions opened on the shared connection and
//! which features hold them. At most one subscription is active per key:
//! a second owner asking for the same key is recorded without a resend.
//! Cancellation is only available per kind (`forget_all`), so cancelling
//! one owner's subscriptions re-issues the subscribes other owners still need.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::{debug, info};

use mura_core::{Envelope, Request, SubscriptionKey, SubscriptionKind};

use crate::features::FeatureKind;

const KINDS: [SubscriptionKind; 2] = [SubscriptionKind::Ticks, SubscriptionKind::Balance];

/// An active subscription
#[derive(Debug, Clone)]
struct Subscription {
    owners: HashSet<FeatureKind>,
    /// A push for this key has been seen
    confirmed: bool,
}

impl Subscription {
    fn new(owners: HashSet<FeatureKind>) -> Self {
        Self {
            owners,
            confirmed: false,
        }
    }
}

/// Client-side view of the server's subscriptions
#[derive(Default)]
pub struct SubscriptionRegistry {
    /// Key -> subscription, in subscribe order
    subscriptions: IndexMap<SubscriptionKey, Subscription>,
    /// Owner -> keys it holds
    owned: HashMap<FeatureKind, HashSet<SubscriptionKey>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `owner` as holding `key`
    ///
    /// Returns the subscribe request to send, or `None` when the key is
    /// already active.
    pub fn subscribe(&mut self, owner: FeatureKind, key: SubscriptionKey) -> Option<Request> {
        self.owned.entry(owner).or_default().insert(key.clone());

        if let Some(subscription) = self.subscriptions.get_mut(&key) {
            subscription.owners.insert(owner);
            debug!("[Registry] {} already active, adding owner {}", key, owner);
            return None;
        }

        debug!("[Registry] {} subscribing to {}", owner, key);
        let request = key.subscribe_request();
        self.subscriptions
            .insert(key, Subscription::new(HashSet::from([owner])));
        Some(request)
    }

    /// Cancel every subscription of `kind` on behalf of `owner`
    ///
    /// Emits `forget_all(kind)` first, then re-subscribes keys of that kind
    /// still held by other owners. A no-op when nothing of `kind` is active.
    pub fn unsubscribe_all(&mut self, kind: SubscriptionKind, owner: FeatureKind) -> Vec<Request> {
        if let Some(keys) = self.owned.get_mut(&owner) {
            keys.retain(|key| key.kind() != kind);
        }
        for (key, subscription) in self.subscriptions.iter_mut() {
            if key.kind() == kind {
                subscription.owners.remove(&owner);
            }
        }

        if !self.has_kind(kind) {
            return Vec::new();
        }
        self.cancel_kind(kind)
    }

    /// Drop every subscription held by `owner`
    ///
    /// Kinds left with an ownerless key are cancelled in bulk and the keys
    /// other owners still hold are re-subscribed.
    pub fn release(&mut self, owner: FeatureKind) -> Vec<Request> {
        let Some(keys) = self.owned.remove(&owner) else {
            return Vec::new();
        };

        let mut orphaned = HashSet::new();
        for key in &keys {
            if let Some(subscription) = self.subscriptions.get_mut(key) {
                subscription.owners.remove(&owner);
                if subscription.owners.is_empty() {
                    orphaned.insert(key.kind());
                }
            }
        }

        KINDS
            .into_iter()
            .filter(|kind| orphaned.contains(kind))
            .flat_map(|kind| self.cancel_kind(kind))
            .collect()
    }

    // Remove every key of `kind`, re-adding those that still have owners.
    fn cancel_kind(&mut self, kind: SubscriptionKind) -> Vec<Request> {
        let (cancelled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.subscriptions)
            .into_iter()
            .partition(|(key, _)| key.kind() == kind);
        self.subscriptions = kept.into_iter().collect();

        let mut requests = vec![Request::forget_all(kind)];
        for (key, subscription) in cancelled {
            if subscription.owners.is_empty() {
                continue;
            }
            requests.push(key.subscribe_request());
            self.subscriptions
                .insert(key, Subscription::new(subscription.owners));
        }

        info!(
            "[Registry] Cancelled all {} subscriptions ({} re-subscribed)",
            kind,
            requests.len() - 1
        );
        requests
    }

    /// Mark the subscription a push belongs to as confirmed
    ///
    /// Returns true on the first push for that key.
    pub fn observe(&mut self, envelope: &Envelope) -> bool {
        let key = match envelope {
            Envelope::Tick(tick) => SubscriptionKey::ticks(tick.symbol.as_str()),
            Envelope::Balance(_) => SubscriptionKey::Balance,
            _ => return false,
        };

        match self.subscriptions.get_mut(&key) {
            Some(subscription) if !subscription.confirmed => {
                subscription.confirmed = true;
                debug!("[Registry] {} confirmed", key);
                true
            }
            _ => false,
        }
    }

    /// Forget everything; the server drops subscriptions with the socket
    pub fn reset(&mut self) {
        if !self.subscriptions.is_empty() {
            info!(
                "[Registry] Reset, dropping {} subscriptions",
                self.subscriptions.len()
            );
        }
        self.subscriptions.clear();
        self.owned.clear();
    }

    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.subscriptions.contains_key(key)
    }

    pub fn is_confirmed(&self, key: &SubscriptionKey) -> bool {
        self.subscriptions
            .get(key)
            .map(|subscription| subscription.confirmed)
            .unwrap_or(false)
    }

    pub fn has_kind(&self, kind: SubscriptionKind) -> bool {
        self.subscriptions.keys().any(|key| key.kind() == kind)
    }

    /// Active keys in subscribe order
    pub fn active(&self) -> impl Iterator<Item = &SubscriptionKey> {
        self.subscriptions.keys()
    }

    /// Keys held by `owner`
    pub fn held_by(&self, owner: FeatureKind) -> Vec<&SubscriptionKey> {
        self.subscriptions
            .iter()
            .filter(|(_, subscription)| subscription.owners.contains(&owner))
            .map(|(key, _)| key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active", &self.subscriptions.len())
            .field("owners", &self.owned.len())
            .finish()
    }
}
