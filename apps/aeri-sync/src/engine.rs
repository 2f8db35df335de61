//! Async driver for [`SyncCore`].
//!
//! One Tokio task owns the core and is the only writer of the mirror. Callers
//! talk to it through a cloneable [`SyncHandle`]; network effects run as
//! spawned tasks that post their results back to the driver loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sync_bus::{spawn_listener, Bus, LocalBus, Subscription};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AdminError, SyncError};
use crate::model::zone::validate;
use crate::model::{Delivery, DeviceSnapshot, Field, FieldValue, ZoneId};
use crate::sync::{
    Connectivity, Dispatch, Effect, FetchTicket, Notice, Outcome, Renderer, SyncCore, SyncEvent,
    TOPIC_CONNECTIVITY, TOPIC_NOTICE, TOPIC_STATE,
};
use crate::transport::{DeviceTransport, LiveChannel, PresetDetails, TransportError};

const PIN_LEN: usize = 6;

enum Command {
    Intent {
        zone: ZoneId,
        field: Field,
        value: FieldValue,
        delivery: Delivery,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    SetSyncMode(bool),
    Refresh,
    Shutdown,
}

enum Completion {
    Sent { dispatch: Dispatch, outcome: Outcome },
    Fetched { ticket: FetchTicket, result: Result<DeviceSnapshot, TransportError> },
    ChannelOpened { session: u64 },
    ChannelFailed { session: u64 },
    Pushed { session: u64, snapshot: DeviceSnapshot },
    ChannelClosed { session: u64 },
}

/// What callers can read without a round trip through the driver.
struct View {
    snapshot: Arc<DeviceSnapshot>,
    connectivity: Connectivity,
    hydrated: bool,
    sync_mode: bool,
    idle: bool,
}

struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    transport: Arc<dyn DeviceTransport>,
    bus: Arc<LocalBus<SyncEvent>>,
    view: Arc<RwLock<View>>,
}

pub struct SyncEngine;

impl SyncEngine {
    /// Starts the driver on the current runtime. The engine performs its
    /// initial fetch (and opens the live channel, if any) right away.
    pub fn spawn(transport: Arc<dyn DeviceTransport>, config: &Config) -> SyncHandle {
        let bus = Arc::new(LocalBus::new());
        let view = Arc::new(RwLock::new(View {
            snapshot: Arc::new(DeviceSnapshot::default()),
            connectivity: Connectivity::Unknown,
            hydrated: false,
            sync_mode: false,
            idle: true,
        }));

        let mut core_config = config.core_config();
        core_config.live_channel = config.live_url().is_some() && transport.has_live_channel();
        let core = SyncCore::new(core_config, Some(renderer(view.clone(), bus.clone())));

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            core,
            transport: transport.clone(),
            bus: bus.clone(),
            view: view.clone(),
            command_timeout: config.command_timeout,
            completion_tx,
            live_task: None,
        };
        tokio::spawn(driver.run(command_rx, completion_rx));

        SyncHandle {
            shared: Arc::new(Shared {
                commands,
                transport,
                bus,
                view,
            }),
        }
    }
}

fn renderer(view: Arc<RwLock<View>>, bus: Arc<LocalBus<SyncEvent>>) -> Renderer {
    Box::new(move |state: &DeviceSnapshot| {
        let snapshot = Arc::new(state.clone());
        view.write().snapshot = snapshot.clone();
        bus.publish(TOPIC_STATE, SyncEvent::StateChanged(snapshot));
    })
}

struct Driver {
    core: SyncCore,
    transport: Arc<dyn DeviceTransport>,
    bus: Arc<LocalBus<SyncEvent>>,
    view: Arc<RwLock<View>>,
    command_timeout: Duration,
    completion_tx: mpsc::UnboundedSender<Completion>,
    live_task: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!(target: "aeri.engine", "sync engine started");
        let effects = self.core.start(Instant::now());
        self.execute(effects);
        self.publish_events();

        loop {
            let deadline = self.core.next_deadline();
            let effects = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(done) = completions.recv() => self.handle_completion(done),
                _ = wait_for(deadline) => self.core.on_tick(Instant::now()),
            };
            self.execute(effects);
            self.publish_events();
        }

        if let Some(task) = self.live_task.take() {
            task.abort();
        }
        info!(target: "aeri.engine", "sync engine stopped");
    }

    fn handle_command(&mut self, command: Command) -> Vec<Effect> {
        let now = Instant::now();
        match command {
            Command::Intent {
                zone,
                field,
                value,
                delivery,
                reply,
            } => match self.core.dispatch_user_intent(zone, field, value, delivery, now) {
                Ok(effects) => {
                    self.sync_view();
                    let _ = reply.send(Ok(()));
                    effects
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                    Vec::new()
                }
            },
            Command::SetSyncMode(enabled) => {
                self.core.set_sync_mode(enabled);
                Vec::new()
            }
            Command::Refresh => self.core.request_refresh(now),
            Command::Shutdown => Vec::new(),
        }
    }

    fn handle_completion(&mut self, done: Completion) -> Vec<Effect> {
        let now = Instant::now();
        match done {
            Completion::Sent { dispatch, outcome } => self.core.on_send_outcome(dispatch, outcome, now),
            Completion::Fetched { ticket, result } => self.core.on_fetch_result(ticket, result, now),
            Completion::ChannelOpened { session } => self.core.on_channel_opened(session, now),
            Completion::ChannelFailed { session } => self.core.on_channel_failed(session, now),
            Completion::ChannelClosed { session } => self.core.on_channel_closed(session, now),
            Completion::Pushed { session, snapshot } => {
                if let Some(report) = self.core.on_push(session, snapshot) {
                    if !report.stale_fields.is_empty() {
                        debug!(
                            target: "aeri.reconcile",
                            session,
                            stale = report.stale_fields.len(),
                            "push predates pending edits; kept local values"
                        );
                    }
                }
                self.core.on_tick(now)
            }
        }
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(dispatch) => self.spawn_send(dispatch),
                Effect::Fetch(ticket) => self.spawn_fetch(ticket),
                Effect::OpenChannel { session } => self.spawn_live(session),
            }
        }
    }

    fn spawn_send(&self, dispatch: Dispatch) {
        let transport = self.transport.clone();
        let tx = self.completion_tx.clone();
        let limit = self.command_timeout;
        tokio::spawn(async move {
            let key = dispatch.key;
            let send = transport.send_field_update(key.zone, key.field, dispatch.value);
            let outcome = match timeout(limit, send).await {
                Ok(Ok(())) => Outcome::Ack,
                Ok(Err(err)) => err.into_outcome(),
                Err(_) => Outcome::Timeout,
            };
            let _ = tx.send(Completion::Sent { dispatch, outcome });
        });
    }

    fn spawn_fetch(&self, ticket: FetchTicket) {
        let transport = self.transport.clone();
        let tx = self.completion_tx.clone();
        let limit = self.command_timeout;
        tokio::spawn(async move {
            let result = match timeout(limit, transport.fetch_full_state()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            let _ = tx.send(Completion::Fetched { ticket, result });
        });
    }

    /// Replaces any previous live channel task; pushes from an older
    /// session would be ignored by the core anyway.
    fn spawn_live(&mut self, session: u64) {
        if let Some(task) = self.live_task.take() {
            task.abort();
        }
        let transport = self.transport.clone();
        let tx = self.completion_tx.clone();
        let limit = self.command_timeout;
        self.live_task = Some(tokio::spawn(async move {
            let opened = match timeout(limit, transport.open_live_channel()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            let channel = match opened {
                Ok(channel) => channel,
                Err(err) => {
                    debug!(target: "aeri.connectivity", session, error = %err, "live channel failed to open");
                    let _ = tx.send(Completion::ChannelFailed { session });
                    return;
                }
            };
            if tx.send(Completion::ChannelOpened { session }).is_err() {
                return;
            }
            forward_pushes(session, channel, tx).await;
        }));
    }

    fn sync_view(&self) {
        let mut view = self.view.write();
        view.hydrated = self.core.mirror().is_hydrated();
        view.sync_mode = self.core.sync_mode();
        view.connectivity = self.core.connectivity();
        view.idle = self.core.dispatcher().is_idle();
    }

    /// Events go out before the view refreshes, so a caller that sees the
    /// engine idle has already been sent the notices that led there.
    fn publish_events(&mut self) {
        for event in self.core.drain_events() {
            let topic = match &event {
                SyncEvent::StateChanged(_) => TOPIC_STATE,
                SyncEvent::ConnectivityChanged(state) => {
                    info!(target: "aeri.connectivity", %state, "connectivity changed");
                    TOPIC_CONNECTIVITY
                }
                SyncEvent::Notice(_) => TOPIC_NOTICE,
            };
            self.bus.publish(topic, event);
        }
        self.sync_view();
    }
}

async fn forward_pushes(session: u64, mut channel: LiveChannel, tx: mpsc::UnboundedSender<Completion>) {
    while let Some(snapshot) = channel.next().await {
        if tx.send(Completion::Pushed { session, snapshot }).is_err() {
            return;
        }
    }
    let _ = tx.send(Completion::ChannelClosed { session });
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running [`SyncEngine`].
#[derive(Clone)]
pub struct SyncHandle {
    shared: Arc<Shared>,
}

impl SyncHandle {
    /// Optimistically applies `value` and schedules delivery. Programmer
    /// errors come back here; transport failures surface as notices.
    pub async fn dispatch_user_intent(
        &self,
        zone: ZoneId,
        field: Field,
        value: FieldValue,
        delivery: Delivery,
    ) -> Result<(), SyncError> {
        validate(zone, field, &value)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Intent {
            zone,
            field,
            value,
            delivery,
            reply,
        })?;
        rx.await.map_err(|_| SyncError::EngineClosed)?
    }

    /// String-keyed entry point, using the field's usual delivery class
    /// unless `debounced` forces coalescing.
    pub async fn set(&self, zone: &str, field: &str, value: &str, debounced: bool) -> Result<(), SyncError> {
        let zone: ZoneId = zone.parse()?;
        let field: Field = field.parse()?;
        let value = FieldValue::parse_for(field, value)?;
        let delivery = if debounced {
            Delivery::Debounced
        } else {
            field.default_delivery()
        };
        self.dispatch_user_intent(zone, field, value, delivery).await
    }

    pub fn set_sync_mode(&self, enabled: bool) -> Result<(), SyncError> {
        self.send(Command::SetSyncMode(enabled))
    }

    pub fn sync_mode(&self) -> bool {
        self.shared.view.read().sync_mode
    }

    pub fn connectivity(&self) -> Connectivity {
        self.shared.view.read().connectivity
    }

    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.shared.view.read().snapshot.clone()
    }

    /// No command is queued or awaiting its outcome.
    pub fn is_idle(&self) -> bool {
        self.shared.view.read().idle
    }

    /// True once any authoritative state has been merged.
    pub fn is_hydrated(&self) -> bool {
        self.shared.view.read().hydrated
    }

    pub fn subscribe_state(&self) -> Subscription<SyncEvent> {
        self.shared.bus.subscribe(TOPIC_STATE)
    }

    pub fn subscribe_connectivity(&self) -> Subscription<SyncEvent> {
        self.shared.bus.subscribe(TOPIC_CONNECTIVITY)
    }

    pub fn subscribe_notices(&self) -> Subscription<SyncEvent> {
        self.shared.bus.subscribe(TOPIC_NOTICE)
    }

    pub fn on_state_changed<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&DeviceSnapshot) + Send + Sync + 'static,
    {
        spawn_listener(self.subscribe_state(), move |event: &SyncEvent| {
            if let SyncEvent::StateChanged(snapshot) = event {
                callback(snapshot);
            }
        })
    }

    pub fn on_connectivity_changed<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(Connectivity) + Send + Sync + 'static,
    {
        spawn_listener(self.subscribe_connectivity(), move |event: &SyncEvent| {
            if let SyncEvent::ConnectivityChanged(state) = event {
                callback(*state);
            }
        })
    }

    pub fn on_notice<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        spawn_listener(self.subscribe_notices(), move |event: &SyncEvent| {
            if let SyncEvent::Notice(notice) = event {
                callback(notice);
            }
        })
    }

    /// Requests a full-state fetch; joins one already in flight.
    pub fn refresh(&self) -> Result<(), SyncError> {
        self.send(Command::Refresh)
    }

    pub async fn preset_details(&self, slot: u8) -> Result<PresetDetails, AdminError> {
        Ok(self.shared.transport.preset_details(slot).await?)
    }

    pub async fn change_pin(&self, current: &str, new: &str) -> Result<(), AdminError> {
        if new.len() != PIN_LEN || !new.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SyncError::InvalidPin(format!("PIN must be exactly {PIN_LEN} digits")).into());
        }
        self.shared.transport.update_pin(current, new).await?;
        info!(target: "aeri.engine", "device PIN updated");
        Ok(())
    }

    /// Restores factory settings on the device, then refreshes the mirror.
    pub async fn reset_to_default(&self) -> Result<(), AdminError> {
        self.shared.transport.reset_to_default().await?;
        warn!(target: "aeri.engine", "device reset to factory defaults");
        self.refresh()?;
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shared.commands.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| SyncError::EngineClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockReply, MockTransport};

    fn config() -> Config {
        Config {
            live: false,
            ..Config::default()
        }
    }

    // Paused time only advances once every task is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn hydrates_from_the_initial_fetch() {
        let mock = MockTransport::new();
        let handle = SyncEngine::spawn(Arc::new(mock.clone()), &config());
        settle().await;
        assert!(handle.is_hydrated());
        assert_eq!(handle.connectivity(), Connectivity::Connected);
        assert_eq!(mock.fetch_count(), 1);
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn programmer_errors_are_returned_to_the_caller() {
        let handle = SyncEngine::spawn(Arc::new(MockTransport::new()), &config());
        assert_eq!(
            handle.set("kitchen", "mode", "1", false).await,
            Err(SyncError::UnknownZone("kitchen".into()))
        );
        assert_eq!(
            handle
                .dispatch_user_intent(ZoneId::Sein, Field::Brightness, FieldValue::Brightness(5), Delivery::Debounced)
                .await,
            Err(SyncError::UnsupportedField {
                zone: ZoneId::Sein,
                field: Field::Brightness
            })
        );
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn change_pin_requires_six_digits() {
        let handle = SyncEngine::spawn(Arc::new(MockTransport::new()), &config());
        assert!(matches!(
            handle.change_pin("123456", "12ab56").await,
            Err(AdminError::Sync(SyncError::InvalidPin(_)))
        ));
        assert_eq!(handle.change_pin("123456", "654321").await, Ok(()));
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_the_handle() {
        let mock = MockTransport::new();
        mock.queue_reply(MockReply::Ack);
        let handle = SyncEngine::spawn(Arc::new(mock), &config());
        handle.shutdown();
        settle().await;
        assert_eq!(handle.refresh(), Err(SyncError::EngineClosed));
    }
}
