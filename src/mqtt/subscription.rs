//! The table of active topic filters.

use super::error::{Error, FilterError};
use super::packet::QoS;
use super::topic;
use super::{MAX_SUBSCRIPTIONS, MAX_TOPIC_LEN};
use heapless::{String, Vec};

/// One registered topic filter.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Subscription {
    filter: String<MAX_TOPIC_LEN>,
    requested: QoS,
    granted: QoS,
}

impl Subscription {
    /// The topic filter.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Level asked for in the last SUBSCRIBE. Used again when re-subscribing.
    pub fn requested(&self) -> QoS {
        self.requested
    }

    /// Level the broker granted.
    pub fn granted(&self) -> QoS {
        self.granted
    }
}

/// Filters in registration order, at most one entry per filter string.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: Vec<Subscription, MAX_SUBSCRIPTIONS>,
}

impl SubscriptionTable {
    /// An empty table.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record a granted subscription, updating an existing entry for the same
    /// filter in place.
    pub fn upsert(&mut self, filter: &str, requested: QoS, granted: QoS) -> Result<(), Error> {
        if let Some(entry) = self.entries.iter_mut().find(|s| s.filter == filter) {
            entry.requested = requested;
            entry.granted = granted;
            return Ok(());
        }
        let filter =
            String::try_from(filter).map_err(|_| Error::InvalidFilter(FilterError::TooLong))?;
        self.entries
            .push(Subscription {
                filter,
                requested,
                granted,
            })
            .map_err(|_| Error::BufferOverflow)
    }

    /// Remove a filter. Returns `false` if it was not registered.
    pub fn remove(&mut self, filter: &str) -> bool {
        match self.entries.iter().position(|s| s.filter == filter) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Look up a filter.
    pub fn get(&self, filter: &str) -> Option<&Subscription> {
        self.entries.iter().find(|s| s.filter == filter)
    }

    /// `true` if the filter is registered.
    pub fn contains(&self, filter: &str) -> bool {
        self.get(filter).is_some()
    }

    /// `true` if another new filter fits.
    pub fn has_room_for(&self, filter: &str) -> bool {
        self.contains(filter) || !self.entries.is_full()
    }

    /// Entry at `index`, in registration order.
    pub fn at(&self, index: usize) -> Option<&Subscription> {
        self.entries.get(index)
    }

    /// Replace the granted level of the entry at `index`. Out of range is a no-op.
    pub fn set_granted_at(&mut self, index: usize, granted: QoS) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.granted = granted;
        }
    }

    /// Remove the entry at `index`.
    pub fn remove_at(&mut self, index: usize) -> Subscription {
        self.entries.remove(index)
    }

    /// Registered filters in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Number of registered filters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no filter is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The strongest granted level across all filters matching `topic`, or
    /// `None` if no filter matches.
    pub fn match_qos(&self, topic: &str) -> Option<QoS> {
        self.entries
            .iter()
            .filter(|s| topic::matches(topic, &s.filter))
            .map(|s| s.granted)
            .max()
    }
}
