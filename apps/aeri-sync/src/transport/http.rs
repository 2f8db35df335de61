use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, trace};
use url::Url;

use super::wire::{self, AUTH_HEADER};
use super::{websocket, DeviceTransport, LiveChannel, PresetDetails, TransportError};
use crate::config::Config;
use crate::model::{DeviceSnapshot, Field, FieldValue, ZoneId};
use crate::telemetry;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP transport for the controller firmware, with the WebSocket live
/// channel layered on top when configured.
pub struct HttpTransport {
    client: Client,
    base: Url,
    live_url: Option<Url>,
    pin: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.command_timeout)
            .no_proxy()
            .build()
            .map_err(|err| TransportError::Unreachable(format!("http client setup failed: {err}")))?;
        let mut base = config.device_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            live_url: config.live_url(),
            pin: RwLock::new(config.auth_pin.clone()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn set_pin(&self, pin: Option<String>) {
        *self.pin.write() = pin;
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|err| TransportError::InvalidUrl(format!("{path}: {err}")))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.pin.read().as_deref() {
            Some(pin) => builder.header(AUTH_HEADER, pin),
            None => builder,
        }
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<(), TransportError> {
        let url = self.endpoint(path)?;
        let response = self.authorized(self.client.post(url)).form(form).send().await?;
        check(response).await?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::Rejected("wrong or missing PIN".into()));
    }
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    Err(TransportError::Rejected(if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    }))
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    async fn fetch_full_state(&self) -> Result<DeviceSnapshot, TransportError> {
        let _perf = telemetry::PerfGuard::new("http_fetch_state");
        let url = self.endpoint(wire::STATE_PATH)?;
        let response = check(self.client.get(url).send().await?).await?;
        let body = response.text().await?;
        trace!(target: "aeri.transport", bytes = body.len(), "fetched state");
        Ok(wire::decode_snapshot(&body)?)
    }

    async fn send_field_update(
        &self,
        zone: ZoneId,
        field: Field,
        value: FieldValue,
    ) -> Result<(), TransportError> {
        let _perf = telemetry::PerfGuard::new("http_send_field");
        let form = wire::form_fields(field, value);
        debug!(target: "aeri.transport", %zone, %field, %value, "post set-mode");
        self.post_form(&wire::set_mode_path(zone), &form).await
    }

    fn has_live_channel(&self) -> bool {
        self.live_url.is_some()
    }

    async fn open_live_channel(&self) -> Result<LiveChannel, TransportError> {
        let url = self
            .live_url
            .as_ref()
            .ok_or(TransportError::Unsupported("live channel"))?;
        websocket::connect(url).await
    }

    async fn preset_details(&self, slot: u8) -> Result<PresetDetails, TransportError> {
        let mut url = self.endpoint(wire::PRESET_DETAILS_PATH)?;
        url.query_pairs_mut().append_pair("slot", &slot.to_string());
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Rejected(format!(
                "preset {slot} is empty or failed to load"
            )));
        }
        Ok(response.json::<PresetDetails>().await?)
    }

    async fn update_pin(&self, current: &str, new: &str) -> Result<(), TransportError> {
        let form = [
            ("currentPin".to_string(), current.to_string()),
            ("newPin".to_string(), new.to_string()),
        ];
        self.post_form(wire::UPDATE_AUTH_PATH, &form).await?;
        self.set_pin(Some(new.to_string()));
        Ok(())
    }

    async fn reset_to_default(&self) -> Result<(), TransportError> {
        self.post_form(wire::RESET_PATH, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_resolve_under_the_device_path() {
        let mut config = Config::default();
        config.device_url = Url::parse("http://10.0.0.7/aeri").unwrap();
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(
            transport.endpoint(&wire::set_mode_path(ZoneId::Alis)).unwrap().as_str(),
            "http://10.0.0.7/aeri/set-mode-alis"
        );
        assert_eq!(
            transport.endpoint(wire::STATE_PATH).unwrap().as_str(),
            "http://10.0.0.7/aeri/get-state"
        );
    }
}
