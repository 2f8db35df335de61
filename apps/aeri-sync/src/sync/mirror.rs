use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::SyncError;
use crate::model::{DeviceSnapshot, FieldKey, FieldValue, Prior, Zone, ZoneId};

/// Called with the full mirrored state after every change.
pub type Renderer = Box<dyn FnMut(&DeviceSnapshot) + Send>;

/// Receipt for one optimistic write, used to confirm or undo exactly that
/// field later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    pub key: FieldKey,
    pub value: FieldValue,
    pub seq: u64,
    pub epoch: u64,
    pub connected_at_apply: bool,
    applied: Prior,
}

/// Per-field bookkeeping while an optimistic value is unconfirmed.
#[derive(Debug, Clone)]
struct PendingMark {
    /// Last value the device is known to hold for this field.
    confirmed: Prior,
    /// Sequence number of the newest write to this field.
    seq: u64,
    epoch: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaceReport {
    /// Fields where the incoming snapshot was older than a local edit.
    pub stale_fields: Vec<FieldKey>,
    /// Optimistic fields the snapshot overwrote.
    pub overwritten: usize,
}

pub struct Mirror {
    state: DeviceSnapshot,
    hydrated: bool,
    marks: HashMap<FieldKey, PendingMark>,
    seq: u64,
    renderer: Option<Renderer>,
}

impl Mirror {
    pub fn new() -> Self {
        Self {
            state: DeviceSnapshot::default(),
            hydrated: false,
            marks: HashMap::new(),
            seq: 0,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn state(&self) -> &DeviceSnapshot {
        &self.state
    }

    pub fn zone(&self, id: ZoneId) -> &Zone {
        self.state.zone(id)
    }

    /// False until the first authoritative snapshot lands; the state is then
    /// the built-in default.
    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn pending_fields(&self) -> usize {
        self.marks.len()
    }

    pub fn is_pending(&self, key: FieldKey) -> bool {
        self.marks.contains_key(&key)
    }

    pub fn apply_optimistic(
        &mut self,
        key: FieldKey,
        value: FieldValue,
        epoch: u64,
        connected: bool,
    ) -> Result<SnapshotHandle, SyncError> {
        let zone = self.state.zone_mut(key.zone);
        let prior = zone.write(key.field, value).ok_or(SyncError::UnsupportedField {
            zone: key.zone,
            field: key.field,
        })?;
        let applied = zone.capture(key.field).unwrap_or(prior);

        self.seq += 1;
        let seq = self.seq;
        self.marks
            .entry(key)
            .and_modify(|mark| {
                mark.seq = seq;
                mark.epoch = epoch;
            })
            .or_insert(PendingMark {
                confirmed: prior,
                seq,
                epoch,
            });
        trace!(target: "aeri.mirror", %key, %value, seq, epoch, "optimistic apply");
        self.render();

        Ok(SnapshotHandle {
            key,
            value,
            seq,
            epoch,
            connected_at_apply: connected,
            applied,
        })
    }

    /// Marks the device as holding the handle's value. A newer local write to
    /// the same field stays pending against that value.
    pub fn confirm(&mut self, handle: &SnapshotHandle) {
        let Some(mark) = self.marks.get_mut(&handle.key) else {
            return;
        };
        if mark.seq == handle.seq {
            self.marks.remove(&handle.key);
        } else {
            mark.confirmed = handle.applied;
        }
    }

    /// Restores the last confirmed value of the handle's field. Returns false
    /// without touching anything when a newer write or a snapshot replace has
    /// superseded the handle.
    pub fn rollback(&mut self, handle: &SnapshotHandle) -> bool {
        let current = matches!(self.marks.get(&handle.key), Some(mark) if mark.seq == handle.seq);
        if !current {
            debug!(target: "aeri.mirror", key = %handle.key, seq = handle.seq, "rollback superseded");
            return false;
        }
        let Some(mark) = self.marks.remove(&handle.key) else {
            return false;
        };
        self.state
            .zone_mut(handle.key.zone)
            .restore(handle.key.field, mark.confirmed);
        debug!(target: "aeri.mirror", key = %handle.key, seq = handle.seq, "rolled back");
        self.render();
        true
    }

    /// Replaces the mirror wholesale with an authoritative snapshot stamped
    /// with the connectivity epoch it was produced in.
    pub fn replace_all(&mut self, snapshot: DeviceSnapshot, stamp: u64) -> ReplaceReport {
        let previous = std::mem::replace(&mut self.state, snapshot);
        for id in ZoneId::ALL {
            self.state
                .zone_mut(id)
                .retain_hidden_colors(previous.zone(id));
        }

        let mut report = ReplaceReport::default();
        self.marks.retain(|key, mark| {
            if stamp >= mark.epoch {
                report.overwritten += 1;
                return false;
            }
            let zone = self.state.zone_mut(key.zone);
            if let Some(reported) = zone.capture(key.field) {
                mark.confirmed = reported;
            }
            if let Some(local) = previous.zone(key.zone).capture(key.field) {
                zone.restore(key.field, local);
            }
            report.stale_fields.push(*key);
            true
        });
        report.stale_fields.sort();

        self.hydrated = true;
        debug!(
            target: "aeri.mirror",
            stamp,
            overwritten = report.overwritten,
            stale = report.stale_fields.len(),
            "replaced state"
        );
        self.render();
        report
    }

    fn render(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer(&self.state);
        }
    }
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}
