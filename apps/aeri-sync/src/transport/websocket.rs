use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{wire, LiveChannel, TransportError};
use crate::model::DeviceSnapshot;

const PUSH_BUFFER: usize = 16;

/// Opens the device's push channel. Every text frame is expected to be a full
/// state document.
pub async fn connect(url: &Url) -> Result<LiveChannel, TransportError> {
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|err| TransportError::Unreachable(format!("websocket {url}: {err}")))?;
    info!(target: "aeri.transport", %url, "live channel open");

    let (tx, rx) = mpsc::channel(PUSH_BUFFER);
    let task = tokio::spawn(handle_websocket(ws_stream, tx));
    Ok(LiveChannel::new(rx, Some(task)))
}

async fn handle_websocket(
    mut ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    tx: mpsc::Sender<DeviceSnapshot>,
) {
    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    warn!(target: "aeri.transport", error = %err, "ignoring non-utf8 frame");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(target: "aeri.transport", ?frame, "device closed live channel");
                break;
            }
            Err(err) => {
                warn!(target: "aeri.transport", error = %err, "live channel failed");
                break;
            }
            Ok(_) => continue,
        };
        match wire::decode_snapshot(&text) {
            Ok(snapshot) => {
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(target: "aeri.transport", error = %err, "ignoring malformed push");
            }
        }
    }
}
