//! Synchronous core of the sync engine.
//!
//! [`SyncCore`] owns the local mirror, the coalescing dispatcher, the sync
//! group and the connectivity monitor. It never performs I/O: every input
//! carries an explicit [`Instant`] and every network action comes back as an
//! [`Effect`] for the driver to execute. Results are fed back through the
//! `on_*` methods.

pub mod connectivity;
pub mod dispatcher;
pub mod group;
pub mod mirror;
pub mod reconcile;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::model::zone::validate;
use crate::model::{Delivery, DeviceSnapshot, Field, FieldKey, FieldValue, ZoneId};
use crate::transport::TransportError;

pub use connectivity::{Connectivity, FetchTicket, Monitor, ReconnectPolicy};
pub use dispatcher::{Dispatch, Dispatcher};
pub use group::SyncGroup;
pub use mirror::{Mirror, ReplaceReport, Renderer, SnapshotHandle};
pub use reconcile::{Outcome, Verdict};

pub const TOPIC_STATE: &str = "aeri.state";
pub const TOPIC_CONNECTIVITY: &str = "aeri.connectivity";
pub const TOPIC_NOTICE: &str = "aeri.notice";

/// Work the driver must carry out on behalf of the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(Dispatch),
    Fetch(FetchTicket),
    OpenChannel { session: u64 },
}

/// User-visible failure of a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub key: FieldKey,
    pub attempted: FieldValue,
    /// Value shown after the rollback, if the zone still has the field.
    pub restored: Option<FieldValue>,
    pub reason: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not set {} {} to {}: {}",
            self.key.zone, self.key.field, self.attempted, self.reason
        )?;
        if let Some(restored) = self.restored {
            write!(f, " (reverted to {restored})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    StateChanged(Arc<DeviceSnapshot>),
    ConnectivityChanged(Connectivity),
    Notice(Notice),
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub live_channel: bool,
    pub sync_group: Vec<ZoneId>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            poll_interval: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
            live_channel: false,
            sync_group: SyncGroup::DEFAULT_MEMBERS.to_vec(),
        }
    }
}

pub struct SyncCore {
    mirror: Mirror,
    dispatcher: Dispatcher,
    group: SyncGroup,
    monitor: Monitor,
    events: Vec<SyncEvent>,
}

impl SyncCore {
    pub fn new(config: CoreConfig, renderer: Option<Renderer>) -> Self {
        let mirror = match renderer {
            Some(renderer) => Mirror::new().with_renderer(renderer),
            None => Mirror::new(),
        };
        Self {
            mirror,
            dispatcher: Dispatcher::new(config.debounce),
            group: SyncGroup::new(config.sync_group),
            monitor: Monitor::new(config.reconnect, config.poll_interval, config.live_channel),
            events: Vec::new(),
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn connectivity(&self) -> Connectivity {
        self.monitor.state()
    }

    pub fn epoch(&self) -> u64 {
        self.monitor.epoch()
    }

    pub fn sync_mode(&self) -> bool {
        self.group.is_enabled()
    }

    pub fn set_sync_mode(&mut self, enabled: bool) {
        if self.group.is_enabled() != enabled {
            info!(target: "aeri.engine", enabled, "sync mode changed");
        }
        self.group.set_enabled(enabled);
    }

    /// Initial fetch plus the live channel, if enabled.
    pub fn start(&mut self, _now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.monitor.start(&mut effects);
        effects
    }

    /// Applies a user mutation to the mirror for every target zone and queues
    /// the matching commands. Invalid input is rejected before anything
    /// changes.
    pub fn dispatch_user_intent(
        &mut self,
        zone: ZoneId,
        field: Field,
        value: FieldValue,
        delivery: Delivery,
        now: Instant,
    ) -> Result<Vec<Effect>, SyncError> {
        let targets = self.group.expand_targets(zone);
        for target in &targets {
            validate(*target, field, &value)?;
        }

        let epoch = self.monitor.epoch();
        let connected = self.monitor.state().is_connected();
        for target in targets {
            let key = FieldKey::new(target, field);
            let handle = self.mirror.apply_optimistic(key, value, epoch, connected)?;
            self.dispatcher.schedule(key, value, handle, delivery, now);
        }
        Ok(self.pump(now))
    }

    /// Asks for an authoritative refresh; coalesces with one in flight.
    pub fn request_refresh(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.monitor.request_fetch(&mut effects);
        effects.extend(self.pump(now));
        effects
    }

    pub fn on_send_outcome(&mut self, dispatch: Dispatch, outcome: Outcome, now: Instant) -> Vec<Effect> {
        let Dispatch { key, value, handle, ticket } = dispatch;
        if !self.dispatcher.resolve(key, ticket, now) {
            warn!(target: "aeri.reconcile", %key, ticket, "outcome for unknown command");
            return self.pump(now);
        }

        let verdict = reconcile::decide(&outcome, &handle, self.monitor.epoch());
        debug!(target: "aeri.reconcile", %key, %value, %outcome, ?verdict, epoch = handle.epoch);
        match verdict {
            Verdict::Confirm => self.mirror.confirm(&handle),
            Verdict::Rollback => {
                if self.mirror.rollback(&handle) {
                    let notice = Notice {
                        key,
                        attempted: value,
                        restored: self.mirror.zone(key.zone).get(key.field),
                        reason: outcome.to_string(),
                    };
                    warn!(target: "aeri.reconcile", %notice, "command failed");
                    self.events.push(SyncEvent::Notice(notice));
                }
            }
            Verdict::Keep | Verdict::Discard => {}
        }

        if matches!(outcome, Outcome::TransportError(_)) {
            let changed = self.monitor.send_unreachable(now);
            self.note_connectivity(changed);
        }
        self.pump(now)
    }

    pub fn on_fetch_result(
        &mut self,
        ticket: FetchTicket,
        result: Result<DeviceSnapshot, TransportError>,
        now: Instant,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        match result {
            Ok(snapshot) => {
                if let Some(done) = self.monitor.fetch_succeeded(ticket.id, now, &mut effects) {
                    self.note_connectivity(done.changed);
                    self.mirror.replace_all(snapshot, done.stamp);
                }
            }
            Err(TransportError::Decode(err)) => {
                warn!(target: "aeri.reconcile", error = %err, "ignoring undecodable state");
                if let Some(done) = self.monitor.fetch_succeeded(ticket.id, now, &mut effects) {
                    self.note_connectivity(done.changed);
                }
            }
            Err(err) => {
                debug!(target: "aeri.connectivity", error = %err, "fetch failed");
                let changed = self.monitor.fetch_failed(ticket.id, now);
                self.note_connectivity(changed);
            }
        }
        effects.extend(self.pump(now));
        effects
    }

    pub fn on_channel_opened(&mut self, session: u64, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        let changed = self.monitor.channel_opened(session, now, &mut effects);
        self.note_connectivity(changed);
        effects.extend(self.pump(now));
        effects
    }

    pub fn on_channel_failed(&mut self, session: u64, now: Instant) -> Vec<Effect> {
        let changed = self.monitor.channel_failed(session, now);
        self.note_connectivity(changed);
        self.pump(now)
    }

    pub fn on_channel_closed(&mut self, session: u64, now: Instant) -> Vec<Effect> {
        let changed = self.monitor.channel_closed(session, now);
        self.note_connectivity(changed);
        self.pump(now)
    }

    /// Full-state push from the live channel. Pushes from a session that is
    /// no longer current are dropped.
    pub fn on_push(&mut self, session: u64, snapshot: DeviceSnapshot) -> Option<ReplaceReport> {
        let Some(stamp) = self.monitor.push_stamp(session) else {
            debug!(target: "aeri.reconcile", session, "push from closed session ignored");
            return None;
        };
        Some(self.mirror.replace_all(snapshot, stamp))
    }

    /// Fires due timers.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Effect> {
        self.pump(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.dispatcher.next_deadline(), self.monitor.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    fn note_connectivity(&mut self, changed: Option<Connectivity>) {
        if let Some(state) = changed {
            self.events.push(SyncEvent::ConnectivityChanged(state));
        }
    }

    /// Releases due commands and fires the monitor's timer. Commands released
    /// while disconnected resolve at once as `Offline`.
    fn pump(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.monitor.tick(now, &mut effects);
        loop {
            let ready = self.dispatcher.poll_ready(now);
            if ready.is_empty() {
                break;
            }
            let offline = self.monitor.state() == Connectivity::Disconnected;
            for dispatch in ready {
                if offline {
                    self.dispatcher.resolve(dispatch.key, dispatch.ticket, now);
                    debug!(target: "aeri.dispatch", key = %dispatch.key, value = %dispatch.value, "offline; keeping local value");
                } else {
                    debug!(target: "aeri.dispatch", key = %dispatch.key, value = %dispatch.value, ticket = dispatch.ticket, "send");
                    effects.push(Effect::Send(dispatch));
                }
            }
            if !offline {
                break;
            }
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Target;

    fn core() -> SyncCore {
        SyncCore::new(CoreConfig::default(), None)
    }

    fn at(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    fn sends(effects: &[Effect]) -> Vec<Dispatch> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Send(dispatch) => Some(dispatch.clone()),
                _ => None,
            })
            .collect()
    }

    fn fetch(effects: &[Effect]) -> FetchTicket {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Fetch(ticket) => Some(*ticket),
                _ => None,
            })
            .expect("fetch effect")
    }

    fn with_brightness(level: u8) -> DeviceSnapshot {
        let mut snapshot = DeviceSnapshot::default();
        snapshot
            .zone_mut(ZoneId::Alis)
            .write(Field::Brightness, FieldValue::Brightness(level));
        snapshot
    }

    fn connected(start: Instant, snapshot: DeviceSnapshot) -> SyncCore {
        let mut core = core();
        let effects = core.start(start);
        core.on_fetch_result(fetch(&effects), Ok(snapshot), start);
        assert_eq!(core.connectivity(), Connectivity::Connected);
        core.drain_events();
        core
    }

    fn session(effects: &[Effect]) -> u64 {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::OpenChannel { session } => Some(*session),
                _ => None,
            })
            .expect("open channel effect")
    }

    /// Connected core with the live channel open on the returned session.
    fn live(start: Instant, snapshot: DeviceSnapshot) -> (SyncCore, u64) {
        let mut core = SyncCore::new(
            CoreConfig {
                live_channel: true,
                ..CoreConfig::default()
            },
            None,
        );
        let effects = core.start(start);
        let session = session(&effects);
        core.on_channel_opened(session, start);
        core.on_fetch_result(fetch(&effects), Ok(snapshot), start);
        assert_eq!(core.connectivity(), Connectivity::Connected);
        core.drain_events();
        (core, session)
    }

    fn brightness(core: &SyncCore) -> FieldValue {
        core.mirror().zone(ZoneId::Alis).get(Field::Brightness).unwrap()
    }

    #[test]
    fn slider_burst_sends_final_value_and_rolls_back_on_timeout() {
        let start = Instant::now();
        let mut core = connected(start, with_brightness(80));

        for (millis, level) in [(0, 82), (40, 85), (90, 90), (150, 95)] {
            let effects = core
                .dispatch_user_intent(
                    ZoneId::Alis,
                    Field::Brightness,
                    FieldValue::Brightness(level),
                    Delivery::Debounced,
                    at(start, millis),
                )
                .unwrap();
            assert!(sends(&effects).is_empty());
            assert_eq!(brightness(&core), FieldValue::Brightness(level));
        }
        assert_eq!(core.next_deadline(), Some(at(start, 400)));

        let sent = sends(&core.on_tick(at(start, 400)));
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].value, FieldValue::Brightness(95));

        core.on_send_outcome(sent[0].clone(), Outcome::Timeout, at(start, 4_400));
        assert_eq!(brightness(&core), FieldValue::Brightness(80));
        let events = core.drain_events();
        assert!(matches!(
            events.as_slice(),
            [SyncEvent::Notice(Notice { restored: Some(FieldValue::Brightness(80)), .. })]
        ));
        assert_eq!(core.connectivity(), Connectivity::Connected);
    }

    #[test]
    fn ack_keeps_the_optimistic_value() {
        let start = Instant::now();
        let mut core = connected(start, with_brightness(80));
        core.dispatch_user_intent(
            ZoneId::Alis,
            Field::Brightness,
            FieldValue::Brightness(95),
            Delivery::Debounced,
            start,
        )
        .unwrap();
        let sent = sends(&core.on_tick(at(start, 250)));
        core.on_send_outcome(sent[0].clone(), Outcome::Ack, at(start, 300));
        assert_eq!(brightness(&core), FieldValue::Brightness(95));
        assert_eq!(core.mirror().pending_fields(), 0);
        assert!(core.drain_events().is_empty());
    }

    #[test]
    fn sync_mode_fans_out_immediately_with_identical_payload() {
        let start = Instant::now();
        let mut core = connected(start, DeviceSnapshot::default());
        core.set_sync_mode(true);

        let effects = core
            .dispatch_user_intent(ZoneId::Alis, Field::Mode, FieldValue::Mode(3), Delivery::Immediate, start)
            .unwrap();
        let sent = sends(&effects);
        let zones: Vec<ZoneId> = sent.iter().map(|dispatch| dispatch.key.zone).collect();
        assert_eq!(zones, vec![ZoneId::Alis, ZoneId::Shroud, ZoneId::Demon]);
        assert!(sent.iter().all(|dispatch| dispatch.value == FieldValue::Mode(3)));
        for zone in [ZoneId::Alis, ZoneId::Shroud, ZoneId::Demon] {
            assert_eq!(core.mirror().zone(zone).mode(), 3);
        }

        core.set_sync_mode(false);
        let effects = core
            .dispatch_user_intent(ZoneId::Shroud, Field::Mode, FieldValue::Mode(4), Delivery::Immediate, start)
            .unwrap();
        assert!(sends(&effects).is_empty(), "shroud.mode is still in flight");
    }

    #[test]
    fn partial_fan_out_failure_rolls_back_only_the_failed_member() {
        let start = Instant::now();
        let mut core = connected(start, DeviceSnapshot::default());
        core.set_sync_mode(true);
        let sent = sends(
            &core
                .dispatch_user_intent(ZoneId::Demon, Field::Speed, FieldValue::Speed(10), Delivery::Immediate, start)
                .unwrap(),
        );
        for dispatch in sent {
            let outcome = if dispatch.key.zone == ZoneId::Shroud {
                Outcome::Rejected("HTTP 500".into())
            } else {
                Outcome::Ack
            };
            core.on_send_outcome(dispatch, outcome, at(start, 20));
        }
        let speed = |zone: ZoneId| core.mirror().zone(zone).get(Field::Speed).unwrap();
        assert_eq!(speed(ZoneId::Alis), FieldValue::Speed(10));
        assert_eq!(speed(ZoneId::Shroud), FieldValue::Speed(60));
        assert_eq!(speed(ZoneId::Demon), FieldValue::Speed(10));
    }

    #[test]
    fn offline_commands_resolve_without_rollback() {
        let start = Instant::now();
        let mut core = core();
        let effects = core.start(start);
        core.on_fetch_result(
            fetch(&effects),
            Err(TransportError::Unreachable("connection refused".into())),
            start,
        );
        assert_eq!(core.connectivity(), Connectivity::Disconnected);

        let effects = core
            .dispatch_user_intent(
                ZoneId::Sein,
                Field::Color(crate::model::ColorSlot::FIRST),
                FieldValue::Color(crate::model::Rgb::new(1, 2, 3)),
                Delivery::Immediate,
                at(start, 10),
            )
            .unwrap();
        assert!(sends(&effects).is_empty());
        assert!(core.dispatcher().is_idle());
        assert_eq!(
            core.mirror().zone(ZoneId::Sein).active_colors(),
            &[crate::model::Rgb::new(1, 2, 3)]
        );
        let events = core.drain_events();
        assert!(!events.iter().any(|event| matches!(event, SyncEvent::Notice(_))));
    }

    #[test]
    fn reconnect_refreshes_once_and_overrides_offline_edits() {
        let start = Instant::now();
        let mut core = connected(start, with_brightness(80));

        let sent = sends(
            &core
                .dispatch_user_intent(ZoneId::Alis, Field::Target, FieldValue::Target(Target::Left), Delivery::Immediate, start)
                .unwrap(),
        );
        core.on_send_outcome(sent[0].clone(), Outcome::TransportError("no route".into()), at(start, 5));
        assert_eq!(core.connectivity(), Connectivity::Disconnected);
        assert!(core.drain_events().iter().any(|event| matches!(event, SyncEvent::Notice(_))));

        for level in [10, 20, 30] {
            core.dispatch_user_intent(
                ZoneId::Alis,
                Field::Brightness,
                FieldValue::Brightness(level),
                Delivery::Debounced,
                at(start, 10),
            )
            .unwrap();
        }
        assert!(sends(&core.on_tick(at(start, 300))).is_empty());

        let effects = core.on_tick(at(start, 2_005));
        let refresh = fetch(&effects);
        assert_eq!(effects.iter().filter(|e| matches!(e, Effect::Fetch(_))).count(), 1);
        core.on_fetch_result(refresh, Ok(with_brightness(80)), at(start, 2_050));

        assert_eq!(core.epoch(), 1);
        assert_eq!(brightness(&core), FieldValue::Brightness(80));
        assert_eq!(core.mirror().pending_fields(), 0);
        let events = core.drain_events();
        let reconnects = events
            .iter()
            .filter(|event| matches!(event, SyncEvent::ConnectivityChanged(Connectivity::Connected)))
            .count();
        assert_eq!(reconnects, 1);
    }

    #[test]
    fn programmer_errors_fail_before_any_change() {
        let start = Instant::now();
        let mut core = connected(start, DeviceSnapshot::default());
        let before = core.mirror().state().clone();
        assert_eq!(
            core.dispatch_user_intent(ZoneId::Sein, Field::Target, FieldValue::Target(Target::Left), Delivery::Immediate, start),
            Err(SyncError::UnsupportedField { zone: ZoneId::Sein, field: Field::Target })
        );
        assert!(core
            .dispatch_user_intent(ZoneId::Alis, Field::Brightness, FieldValue::Brightness(180), Delivery::Debounced, start)
            .is_err());
        assert_eq!(core.mirror().state(), &before);
    }

    #[test]
    fn stale_outcome_after_reconnect_is_discarded() {
        let start = Instant::now();
        let mut core = connected(start, with_brightness(80));
        let sent = sends(
            &core
                .dispatch_user_intent(ZoneId::Alis, Field::Brightness, FieldValue::Brightness(99), Delivery::Immediate, start)
                .unwrap(),
        );

        // Heartbeat fails, then the retry reconnects under a new epoch.
        let effects = core.on_tick(at(start, 15_000));
        core.on_fetch_result(fetch(&effects), Err(TransportError::Timeout), at(start, 15_001));
        let effects = core.on_tick(at(start, 17_001));
        core.on_fetch_result(fetch(&effects), Ok(with_brightness(55)), at(start, 17_002));
        assert_eq!(core.epoch(), 1);

        core.on_send_outcome(sent[0].clone(), Outcome::Timeout, at(start, 17_010));
        assert_eq!(brightness(&core), FieldValue::Brightness(55));
        assert!(!core.drain_events().iter().any(|event| matches!(event, SyncEvent::Notice(_))));
    }

    #[test]
    fn pushes_on_a_surviving_session_follow_a_send_triggered_reconnect() {
        let start = Instant::now();
        let (mut core, session) = live(start, with_brightness(80));

        let failed = sends(
            &core
                .dispatch_user_intent(ZoneId::Alis, Field::Brightness, FieldValue::Brightness(60), Delivery::Immediate, start)
                .unwrap(),
        );
        core.on_send_outcome(failed[0].clone(), Outcome::TransportError("no route".into()), at(start, 5));
        assert_eq!(core.connectivity(), Connectivity::Disconnected);

        let effects = core.on_tick(at(start, 2_005));
        assert!(!effects.iter().any(|effect| matches!(effect, Effect::OpenChannel { .. })));
        core.on_fetch_result(fetch(&effects), Ok(with_brightness(80)), at(start, 2_010));
        assert_eq!(core.epoch(), 1);

        let pending = sends(
            &core
                .dispatch_user_intent(ZoneId::Alis, Field::Brightness, FieldValue::Brightness(50), Delivery::Immediate, at(start, 2_020))
                .unwrap(),
        );
        let report = core.on_push(session, with_brightness(70)).unwrap();
        assert!(report.stale_fields.is_empty());
        assert_eq!(report.overwritten, 1);
        assert_eq!(brightness(&core), FieldValue::Brightness(70));

        core.on_send_outcome(pending[0].clone(), Outcome::Ack, at(start, 2_030));
        assert_eq!(brightness(&core), FieldValue::Brightness(70));
    }

    #[test]
    fn pushes_from_a_replaced_session_are_ignored() {
        let start = Instant::now();
        let (mut core, old) = live(start, with_brightness(80));

        core.on_channel_closed(old, at(start, 10));
        assert_eq!(core.connectivity(), Connectivity::Disconnected);
        let effects = core.on_tick(at(start, 2_010));
        let reopened = session(&effects);
        core.on_channel_opened(reopened, at(start, 2_020));
        core.on_fetch_result(fetch(&effects), Ok(with_brightness(80)), at(start, 2_030));
        assert_eq!(core.epoch(), 1);

        core.dispatch_user_intent(ZoneId::Alis, Field::Brightness, FieldValue::Brightness(40), Delivery::Immediate, at(start, 2_040))
            .unwrap();
        assert_eq!(core.on_push(old, with_brightness(10)), None);
        assert_eq!(brightness(&core), FieldValue::Brightness(40));
        assert!(core.mirror().is_pending(FieldKey::new(ZoneId::Alis, Field::Brightness)));

        let report = core.on_push(reopened, with_brightness(70)).unwrap();
        assert!(report.stale_fields.is_empty());
        assert_eq!(brightness(&core), FieldValue::Brightness(70));
        assert_eq!(core.mirror().pending_fields(), 0);
    }
}
