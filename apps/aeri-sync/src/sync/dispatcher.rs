use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use super::mirror::SnapshotHandle;
use crate::model::{Delivery, FieldKey, FieldValue};

/// A command leaving the dispatcher for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub key: FieldKey,
    pub value: FieldValue,
    pub handle: SnapshotHandle,
    pub ticket: u64,
}

#[derive(Debug)]
struct Queued {
    value: FieldValue,
    handle: SnapshotHandle,
    ready_at: Instant,
    order: u64,
}

#[derive(Debug, Default)]
struct Slot {
    queued: Option<Queued>,
    in_flight: Option<u64>,
}

impl Slot {
    fn is_idle(&self) -> bool {
        self.queued.is_none() && self.in_flight.is_none()
    }
}

/// Per-field coalescing queue: last write wins, one command in flight per key.
pub struct Dispatcher {
    debounce: Duration,
    slots: HashMap<FieldKey, Slot>,
    next_order: u64,
    next_ticket: u64,
}

impl Dispatcher {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            slots: HashMap::new(),
            next_order: 0,
            next_ticket: 0,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn schedule(
        &mut self,
        key: FieldKey,
        value: FieldValue,
        handle: SnapshotHandle,
        delivery: Delivery,
        now: Instant,
    ) {
        let ready_at = match delivery {
            Delivery::Immediate => now,
            Delivery::Debounced => now + self.debounce,
        };
        self.next_order += 1;
        let slot = self.slots.entry(key).or_default();
        if let Some(previous) = slot.queued.as_ref() {
            trace!(target: "aeri.dispatch", %key, superseded = %previous.value, %value, "coalesced");
        }
        slot.queued = Some(Queued {
            value,
            handle,
            ready_at,
            order: self.next_order,
        });
    }

    /// Takes every queued command that is due and whose key is idle, in the
    /// order the commands were scheduled.
    pub fn poll_ready(&mut self, now: Instant) -> Vec<Dispatch> {
        let mut due: Vec<(u64, FieldKey)> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.in_flight.is_none())
            .filter_map(|(key, slot)| {
                let queued = slot.queued.as_ref()?;
                (queued.ready_at <= now).then_some((queued.order, *key))
            })
            .collect();
        due.sort_unstable();

        let mut ready = Vec::with_capacity(due.len());
        for (_, key) in due {
            let Some(slot) = self.slots.get_mut(&key) else {
                continue;
            };
            let Some(queued) = slot.queued.take() else {
                continue;
            };
            self.next_ticket += 1;
            slot.in_flight = Some(self.next_ticket);
            ready.push(Dispatch {
                key,
                value: queued.value,
                handle: queued.handle,
                ticket: self.next_ticket,
            });
        }
        ready
    }

    /// Clears the in-flight marker for `key`. A value queued behind it becomes
    /// due right away. Returns false for tickets that are not in flight.
    pub fn resolve(&mut self, key: FieldKey, ticket: u64, now: Instant) -> bool {
        let Some(slot) = self.slots.get_mut(&key) else {
            return false;
        };
        if slot.in_flight != Some(ticket) {
            return false;
        }
        slot.in_flight = None;
        if let Some(queued) = slot.queued.as_mut() {
            queued.ready_at = queued.ready_at.min(now);
        }
        if slot.is_idle() {
            self.slots.remove(&key);
        }
        true
    }

    /// Earliest instant at which `poll_ready` would release something.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .values()
            .filter(|slot| slot.in_flight.is_none())
            .filter_map(|slot| slot.queued.as_ref().map(|queued| queued.ready_at))
            .min()
    }

    pub fn queued_value(&self, key: FieldKey) -> Option<FieldValue> {
        self.slots
            .get(&key)
            .and_then(|slot| slot.queued.as_ref())
            .map(|queued| queued.value)
    }

    pub fn is_in_flight(&self, key: FieldKey) -> bool {
        self.slots
            .get(&key)
            .is_some_and(|slot| slot.in_flight.is_some())
    }

    pub fn in_flight(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.in_flight.is_some())
            .count()
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }
}
