//! The alarm store and subscription fabric (SPEC_FULL.md §4.5). Holds the
//! authoritative `(state, description, level)` for every known id and fans
//! out [`Event`]s to pattern-matched subscribers.

use std::sync::RwLock;

use ahash::AHashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::engine::StoreReader;
use crate::id::AlarmId;
use crate::level::Level;
use crate::matcher::{self, Pattern};
use crate::state::{AlarmRecord, AlarmState, Event};
use crate::timestamp::Timestamp;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

struct Subscription {
    pattern: Pattern,
    sender: broadcast::Sender<Event>,
}

/// Holds current records and publishes notifications on every `put`/`delete`
/// (SPEC_FULL.md §4.5). Safe for concurrent readers per §5: all mutation
/// paths take a write lock only for the duration of the map update.
#[derive(Default)]
pub struct Store {
    records: RwLock<AHashMap<AlarmId, AlarmRecord>>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub fn put(
        &self,
        id: &AlarmId,
        state: AlarmState,
        description: Option<String>,
        level: Level,
        now: Timestamp,
    ) {
        let (previous_state, previous_timestamp) = {
            let records = self.records.read().unwrap();
            match records.get(id) {
                Some(r) => (r.state, r.timestamp),
                None => (AlarmState::Unknown, now),
            }
        };

        let record = AlarmRecord {
            state,
            description: description.clone(),
            level,
            timestamp: now,
            previous_state,
            previous_timestamp,
        };
        self.records.write().unwrap().insert(id.clone(), record);

        debug!(id = %id, ?state, "store put");
        self.publish(Event {
            id: id.clone(),
            state,
            previous_state,
            description,
            level,
            timestamp: now,
            previous_timestamp,
        });
    }

    pub fn get(&self, id: &AlarmId) -> Option<AlarmRecord> {
        self.records.read().unwrap().get(id).cloned()
    }

    pub fn get_or(&self, id: &AlarmId, default: AlarmRecord) -> AlarmRecord {
        self.get(id).unwrap_or(default)
    }

    pub fn delete(&self, id: &AlarmId, now: Timestamp) {
        let previous = self.records.write().unwrap().remove(id);
        let (previous_state, previous_timestamp) = previous
            .map(|r| (r.state, r.timestamp))
            .unwrap_or((AlarmState::Unknown, now));

        debug!(id = %id, "store delete");
        self.publish(Event {
            id: id.clone(),
            state: AlarmState::Unknown,
            previous_state,
            description: None,
            level: Level::default_leaf(),
            timestamp: now,
            previous_timestamp,
        });
    }

    pub fn get_all(&self) -> Vec<(AlarmId, AlarmRecord)> {
        self.records
            .read()
            .unwrap()
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect()
    }

    pub fn get_all_at_or_above(&self, threshold: Level) -> Vec<(AlarmId, AlarmRecord)> {
        self.records
            .read()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.level.at_least(threshold))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect()
    }

    /// Returns a receiver that yields every future [`Event`] whose id matches
    /// `pattern`. A lagging subscriber only loses its own backlog (SPEC_FULL.md
    /// §5: the store's fan-out must tolerate slow readers without blocking
    /// others); callers see this as `RecvError::Lagged` on their receiver.
    pub fn subscribe(&self, pattern: Pattern) -> broadcast::Receiver<Event> {
        let (tx, rx) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscriptions.write().unwrap().push(Subscription { pattern, sender: tx });
        rx
    }

    /// Drops every subscription registered for `pattern`. Patterns are
    /// compared structurally, so unsubscribing affects only subscriptions
    /// that registered with an identical pattern.
    pub fn unsubscribe(&self, pattern: &Pattern) {
        self.subscriptions.write().unwrap().retain(|s| &s.pattern != pattern);
    }

    fn publish(&self, event: Event) {
        let subscriptions = self.subscriptions.read().unwrap();
        for sub in subscriptions.iter() {
            if matcher::matches(&sub.pattern, &event.id) {
                if sub.sender.send(event.clone()).is_err() {
                    warn!(id = %event.id, "dropped event: no active subscriber receivers");
                }
            }
        }
    }
}

/// Adapts the Store as the Engine's [`StoreReader`], translating a missing
/// record to `Unknown` (SPEC_FULL.md §4.3.2).
impl StoreReader for Store {
    fn read(&self, id: &AlarmId) -> (AlarmState, Option<String>) {
        match self.get(id) {
            Some(r) => (r.state, r.description),
            None => (AlarmState::Unknown, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_reflects_the_written_record() {
        let store = Store::new();
        let id = AlarmId::atom("pump_failure");
        store.put(&id, AlarmState::Set, Some("overpressure".into()), Level::Error, 0);
        let record = store.get(&id).unwrap();
        assert_eq!(record.state, AlarmState::Set);
        assert_eq!(record.description.as_deref(), Some("overpressure"));
    }

    #[test]
    fn delete_transitions_to_unknown_and_publishes() {
        let store = Store::new();
        let id = AlarmId::atom("pump_failure");
        let mut rx = store.subscribe(Pattern::any());
        store.put(&id, AlarmState::Set, None, Level::Error, 0);
        store.delete(&id, 1);
        assert_eq!(store.get(&id), None);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.state, AlarmState::Set);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.state, AlarmState::Unknown);
        assert_eq!(second.previous_state, AlarmState::Set);
    }

    #[test]
    fn subscription_only_receives_matching_ids() {
        let store = Store::new();
        let mut rx = store.subscribe(Pattern::atom("a"));
        store.put(&AlarmId::atom("b"), AlarmState::Set, None, Level::Error, 0);
        store.put(&AlarmId::atom("a"), AlarmState::Set, None, Level::Error, 0);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.id, AlarmId::atom("a"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let store = Store::new();
        let pattern = Pattern::atom("a");
        let mut rx = store.subscribe(pattern.clone());
        store.unsubscribe(&pattern);
        store.put(&AlarmId::atom("a"), AlarmState::Set, None, Level::Error, 0);
        assert!(rx.try_recv().is_err());
    }
}
