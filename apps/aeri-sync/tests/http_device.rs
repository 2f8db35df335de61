//! Drives the real HTTP and WebSocket transport against a fake firmware.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aeri_sync::model::{ColorSlot, Rgb};
use aeri_sync::transport::mock::MockTransport;
use aeri_sync::transport::{wire, DeviceTransport, HttpTransport, TransportError};
use aeri_sync::{Config, Connectivity, DeviceSnapshot, Field, FieldValue, SyncEngine, ZoneId};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use test_timeout::tokio_timeout_test;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use url::Url;

const PIN: &str = "123456";

#[derive(Clone)]
struct Firmware {
    /// Holds the device state; acked writes land here.
    device: MockTransport,
    pushes: broadcast::Sender<String>,
}

impl Firmware {
    fn push(&self, snapshot: &DeviceSnapshot) {
        self.push_raw(wire::encode_snapshot(snapshot).unwrap());
    }

    fn push_raw(&self, text: String) {
        let _ = self.pushes.send(text);
    }
}

async fn get_state(State(firmware): State<Firmware>) -> Response {
    match wire::encode_snapshot(&firmware.device.device_state()) {
        Ok(body) => ([("content-type", "application/json")], body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn set_mode(
    zone: ZoneId,
    firmware: Firmware,
    headers: HeaderMap,
    pairs: Vec<(String, String)>,
) -> Response {
    let authorized = headers
        .get("X-Auth-PIN")
        .and_then(|value| value.to_str().ok())
        == Some(PIN);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    let Some((field, value)) = wire::parse_form_fields(&pairs) else {
        return (StatusCode::BAD_REQUEST, "Parameter tidak valid").into_response();
    };
    match firmware.device.send_field_update(zone, field, value).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn live(ws: WebSocketUpgrade, State(firmware): State<Firmware>) -> Response {
    ws.on_upgrade(move |socket| forward_pushes(socket, firmware.pushes.subscribe()))
}

async fn forward_pushes(mut socket: WebSocket, mut pushes: broadcast::Receiver<String>) {
    while let Ok(text) = pushes.recv().await {
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

async fn serve() -> (SocketAddr, Firmware) {
    let firmware = Firmware {
        device: MockTransport::new(),
        pushes: broadcast::channel(8).0,
    };
    let mut app = Router::new()
        .route("/get-state", get(get_state))
        .route("/ws", get(live));
    for zone in ZoneId::ALL {
        app = app.route(
            &format!("/{}", wire::set_mode_path(zone)),
            post(
                move |State(firmware): State<Firmware>,
                      headers: HeaderMap,
                      Form(pairs): Form<Vec<(String, String)>>| {
                    set_mode(zone, firmware, headers, pairs)
                },
            ),
        );
    }
    let app = app.with_state(firmware.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, firmware)
}

fn config_for(addr: SocketAddr, pin: Option<&str>, live: bool) -> Config {
    Config {
        device_url: Url::parse(&format!("http://{addr}")).unwrap(),
        auth_pin: pin.map(str::to_string),
        live,
        command_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio_timeout_test(10)]
async fn http_transport_round_trips_with_the_firmware() {
    let (addr, firmware) = serve().await;
    let transport = HttpTransport::new(&config_for(addr, Some(PIN), false)).unwrap();

    assert_eq!(transport.fetch_full_state().await.unwrap(), DeviceSnapshot::default());

    transport
        .send_field_update(ZoneId::Shroud, Field::Brightness, FieldValue::Brightness(33))
        .await
        .unwrap();
    assert_eq!(
        firmware.device.device_state().zone(ZoneId::Shroud).get(Field::Brightness),
        Some(FieldValue::Brightness(33))
    );
    assert_eq!(
        transport.fetch_full_state().await.unwrap().zone(ZoneId::Shroud).get(Field::Brightness),
        Some(FieldValue::Brightness(33))
    );
}

#[tokio_timeout_test(10)]
async fn wrong_pin_is_rejected() {
    let (addr, firmware) = serve().await;
    let transport = HttpTransport::new(&config_for(addr, Some("000000"), false)).unwrap();

    let result = transport
        .send_field_update(ZoneId::Alis, Field::Speed, FieldValue::Speed(1))
        .await;
    assert_eq!(result, Err(TransportError::Rejected("wrong or missing PIN".into())));
    assert_eq!(firmware.device.device_state(), DeviceSnapshot::default());
}

#[tokio_timeout_test(10)]
async fn unreachable_device_reports_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new(&config_for(addr, None, false)).unwrap();
    assert!(matches!(
        transport.fetch_full_state().await,
        Err(TransportError::Unreachable(_))
    ));
}

#[tokio_timeout_test(10)]
async fn engine_syncs_over_http_and_websocket() {
    let (addr, firmware) = serve().await;
    let handle = SyncEngine::spawn(
        Arc::new(HttpTransport::new(&config_for(addr, Some(PIN), true)).unwrap()),
        &config_for(addr, Some(PIN), true),
    );
    eventually("first connection", || {
        handle.connectivity() == Connectivity::Connected && handle.is_hydrated()
    })
    .await;

    handle.set("sein", "color", "#00ff00", false).await.unwrap();
    let green = Some(FieldValue::Color(Rgb::new(0, 255, 0)));
    let color = Field::Color(ColorSlot::FIRST);
    assert_eq!(handle.snapshot().zone(ZoneId::Sein).get(color), green);
    eventually("the device to apply the color", || {
        firmware.device.device_state().zone(ZoneId::Sein).get(color) == green && handle.is_idle()
    })
    .await;
    assert_eq!(handle.snapshot().zone(ZoneId::Sein).get(color), green);

    // A change made on the device itself arrives through the push channel.
    let scratch = MockTransport::with_state(firmware.device.device_state());
    scratch
        .send_field_update(ZoneId::Demon, Field::Mode, FieldValue::Mode(9))
        .await
        .unwrap();
    let pushed = scratch.device_state();
    eventually("the pushed state", || {
        firmware.push(&pushed);
        handle.snapshot().zone(ZoneId::Demon).mode() == 9
    })
    .await;
    assert_eq!(*handle.snapshot(), pushed);
    handle.shutdown();
}

#[tokio_timeout_test(10)]
async fn malformed_pushes_leave_the_mirror_alone() {
    let (addr, firmware) = serve().await;
    let config = config_for(addr, Some(PIN), true);
    let handle = SyncEngine::spawn(Arc::new(HttpTransport::new(&config).unwrap()), &config);
    eventually("first connection", || {
        handle.connectivity() == Connectivity::Connected && handle.is_hydrated()
    })
    .await;

    // Once a push lands the socket is known to be subscribed.
    let scratch = MockTransport::new();
    scratch
        .send_field_update(ZoneId::Demon, Field::Mode, FieldValue::Mode(9))
        .await
        .unwrap();
    let marked = scratch.device_state();
    eventually("the first push", || {
        firmware.push(&marked);
        handle.snapshot().zone(ZoneId::Demon).mode() == 9
    })
    .await;

    let mut out_of_range: serde_json::Value =
        serde_json::from_str(&wire::encode_snapshot(&marked).unwrap()).unwrap();
    out_of_range["alis"]["brightness"] = 200.into();
    firmware.push_raw("{\"alis\": ".to_string());
    firmware.push_raw(out_of_range.to_string());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*handle.snapshot(), marked);
    assert_eq!(handle.connectivity(), Connectivity::Connected);

    scratch
        .send_field_update(ZoneId::Alis, Field::Brightness, FieldValue::Brightness(40))
        .await
        .unwrap();
    let next = scratch.device_state();
    eventually("the next valid push", || {
        firmware.push(&next);
        handle.snapshot().zone(ZoneId::Alis).get(Field::Brightness) == Some(FieldValue::Brightness(40))
    })
    .await;
    assert_eq!(*handle.snapshot(), next);
    handle.shutdown();
}
