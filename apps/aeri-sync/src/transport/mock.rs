use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{DeviceTransport, LiveChannel, PresetDetails, TransportError};
use crate::model::{DeviceSnapshot, Field, FieldValue, ZoneId};

/// Scripted answer for the next command send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Ack,
    /// Ack after the given delay.
    Delay(Duration),
    Reject(String),
    Unreachable,
    /// Never answer; the engine's command timeout decides.
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub zone: ZoneId,
    pub field: Field,
    pub value: FieldValue,
}

struct MockState {
    device: DeviceSnapshot,
    reachable: bool,
    replies: VecDeque<MockReply>,
    sent: Vec<SentCommand>,
    fetches: usize,
    live_enabled: bool,
    live: Option<mpsc::Sender<DeviceSnapshot>>,
    opens: usize,
}

/// In-memory device. Acked commands are applied to its state so later
/// fetches reflect them. Clones share the same device.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_state(DeviceSnapshot::default())
    }

    pub fn with_state(device: DeviceSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                device,
                reachable: true,
                replies: VecDeque::new(),
                sent: Vec::new(),
                fetches: 0,
                live_enabled: false,
                live: None,
                opens: 0,
            })),
        }
    }

    pub fn with_live_channel(self) -> Self {
        self.inner.lock().live_enabled = true;
        self
    }

    pub fn device_state(&self) -> DeviceSnapshot {
        self.inner.lock().device.clone()
    }

    pub fn set_device_state(&self, device: DeviceSnapshot) {
        self.inner.lock().device = device;
    }

    /// Going unreachable also drops any open live channel.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.inner.lock();
        state.reachable = reachable;
        if !reachable {
            state.live = None;
        }
    }

    pub fn queue_reply(&self, reply: MockReply) {
        self.inner.lock().replies.push_back(reply);
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.inner.lock().sent.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.lock().fetches
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().opens
    }

    pub fn is_live(&self) -> bool {
        self.inner.lock().live.is_some()
    }

    /// Pushes a full state on the open live channel. Returns false when no
    /// channel is open.
    pub fn push(&self, snapshot: DeviceSnapshot) -> bool {
        let state = self.inner.lock();
        match state.live.as_ref() {
            Some(tx) => tx.try_send(snapshot).is_ok(),
            None => false,
        }
    }

    pub fn close_live(&self) {
        self.inner.lock().live = None;
    }

    fn apply(&self, command: &SentCommand) {
        self.inner
            .lock()
            .device
            .zone_mut(command.zone)
            .write(command.field, command.value);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn fetch_full_state(&self) -> Result<DeviceSnapshot, TransportError> {
        let mut state = self.inner.lock();
        state.fetches += 1;
        if !state.reachable {
            return Err(TransportError::Unreachable("mock device offline".into()));
        }
        Ok(state.device.clone())
    }

    async fn send_field_update(
        &self,
        zone: ZoneId,
        field: Field,
        value: FieldValue,
    ) -> Result<(), TransportError> {
        let command = SentCommand { zone, field, value };
        let reply = {
            let mut state = self.inner.lock();
            state.sent.push(command.clone());
            if !state.reachable {
                return Err(TransportError::Unreachable("mock device offline".into()));
            }
            state.replies.pop_front().unwrap_or(MockReply::Ack)
        };
        match reply {
            MockReply::Ack => {}
            MockReply::Delay(delay) => tokio::time::sleep(delay).await,
            MockReply::Reject(reason) => return Err(TransportError::Rejected(reason)),
            MockReply::Unreachable => {
                return Err(TransportError::Unreachable("connection reset".into()));
            }
            MockReply::Hang => std::future::pending::<()>().await,
        }
        self.apply(&command);
        Ok(())
    }

    fn has_live_channel(&self) -> bool {
        self.inner.lock().live_enabled
    }

    async fn open_live_channel(&self) -> Result<LiveChannel, TransportError> {
        let mut state = self.inner.lock();
        state.opens += 1;
        if !state.live_enabled {
            return Err(TransportError::Unsupported("live channel"));
        }
        if !state.reachable {
            return Err(TransportError::Unreachable("mock device offline".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        state.live = Some(tx);
        Ok(LiveChannel::new(rx, None))
    }

    async fn preset_details(&self, slot: u8) -> Result<PresetDetails, TransportError> {
        let state = self.inner.lock();
        state
            .device
            .global
            .presets
            .iter()
            .find(|preset| preset.slot == slot)
            .map(|preset| PresetDetails {
                name: Some(preset.name.clone()),
                summary: None,
            })
            .ok_or_else(|| TransportError::Rejected(format!("preset {slot} is empty")))
    }

    async fn update_pin(&self, _current: &str, _new: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn reset_to_default(&self) -> Result<(), TransportError> {
        self.inner.lock().device = DeviceSnapshot::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acked_commands_land_on_the_device() {
        let mock = MockTransport::new();
        mock.send_field_update(ZoneId::Demon, Field::Brightness, FieldValue::Brightness(12))
            .await
            .unwrap();
        assert_eq!(
            mock.fetch_full_state().await.unwrap().zone(ZoneId::Demon).get(Field::Brightness),
            Some(FieldValue::Brightness(12))
        );
        assert_eq!(mock.sent().len(), 1);
    }

    #[tokio::test]
    async fn rejected_commands_leave_the_device_alone() {
        let mock = MockTransport::new();
        mock.queue_reply(MockReply::Reject("HTTP 500".into()));
        let result = mock
            .send_field_update(ZoneId::Alis, Field::Speed, FieldValue::Speed(1))
            .await;
        assert_eq!(result, Err(TransportError::Rejected("HTTP 500".into())));
        assert_eq!(mock.device_state(), DeviceSnapshot::default());
    }

    #[tokio::test]
    async fn live_channel_closes_when_device_drops() {
        let mock = MockTransport::new().with_live_channel();
        let mut channel = mock.open_live_channel().await.unwrap();
        assert!(mock.push(DeviceSnapshot::default()));
        assert_eq!(channel.next().await, Some(DeviceSnapshot::default()));
        mock.set_reachable(false);
        assert_eq!(channel.next().await, None);
        assert!(mock.open_live_channel().await.is_err());
    }
}
