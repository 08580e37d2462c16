use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_async;
use tungstenite::Message;

use crate::error::DriveError;
use crate::input::{InputEvent, Key};
use crate::state::ClientRegistry;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// DOM key transition, `key` is `KeyboardEvent.key`.
    Key { key: String, down: bool },
    Ping,
    /// Window lost focus; every held key is released.
    Blur,
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Input transition carried by this message, if any.
    pub fn input_event(&self) -> Option<InputEvent> {
        match self {
            ClientMessage::Key { key, down } => {
                let key = Key::from_dom(key)?;
                Some(if *down {
                    InputEvent::KeyDown(key)
                } else {
                    InputEvent::KeyUp(key)
                })
            }
            ClientMessage::Blur => Some(InputEvent::ReleaseAll),
            ClientMessage::Ping => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerMessage {
    Welcome { client_id: String, timestep: f32 },
    Pong,
}

impl ServerMessage {
    fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

pub async fn bind_listener(addr: &str) -> Result<TcpListener, DriveError> {
    let listener = TcpListener::bind(addr).await.map_err(|source| DriveError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    info!("🌐 WebSocket listening on ws://{addr}");
    Ok(listener)
}

/// Accept loop. Each connection gets its own task; inbound key messages are
/// forwarded to `input_tx` and never touch the simulation directly.
pub async fn start_websocket_server(
    listener: TcpListener,
    registry: Arc<Mutex<ClientRegistry>>,
    input_tx: mpsc::UnboundedSender<InputEvent>,
    timestep: f32,
) {
    loop {
        let (raw, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        debug!("tcp connection from {peer}");

        let registry = Arc::clone(&registry);
        let input_tx = input_tx.clone();
        tokio::spawn(async move {
            handle_connection(raw, registry, input_tx, timestep).await;
        });
    }
}

async fn handle_connection(
    raw: TcpStream,
    registry: Arc<Mutex<ClientRegistry>>,
    input_tx: mpsc::UnboundedSender<InputEvent>,
    timestep: f32,
) {
    let ws = match accept_async(raw).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("websocket handshake failed: {e}");
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    // -------------------------------
    // 1) Outgoing channel + registration
    // -------------------------------
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = registry.lock().await.register(tx.clone());

    // -------------------------------
    // 2) Send loop
    // -------------------------------
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    info!("🟢 Client connected: {client_id}");

    let welcome = ServerMessage::Welcome {
        client_id: client_id.to_string(),
        timestep,
    };
    if let Some(json) = welcome.to_json() {
        let _ = tx.send(json);
    }

    // -------------------------------
    // 3) Receive loop
    // -------------------------------
    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else { continue };

        let Some(parsed) = ClientMessage::from_json(text) else {
            debug!("dropping malformed message from {client_id}: {text}");
            continue;
        };

        if parsed == ClientMessage::Ping {
            if let Some(json) = ServerMessage::Pong.to_json() {
                let _ = tx.send(json);
            }
            continue;
        }

        if let Some(event) = parsed.input_event() {
            if input_tx.send(event).is_err() {
                warn!("simulation loop gone, closing {client_id}");
                break;
            }
        }
    }

    info!("🔴 Client disconnected: {client_id}");
    let _ = input_tx.send(InputEvent::ReleaseAll);
    registry.lock().await.unregister(&client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::connect_async;

    #[test]
    fn parses_key_messages() {
        let msg = ClientMessage::from_json(r#"{"type":"key","key":"ArrowUp","down":true}"#).unwrap();
        assert_eq!(msg.input_event(), Some(InputEvent::KeyDown(Key::ArrowUp)));

        let msg = ClientMessage::from_json(r#"{"type":"key","key":"e","down":false}"#).unwrap();
        assert_eq!(msg.input_event(), Some(InputEvent::KeyUp(Key::E)));

        let msg = ClientMessage::from_json(r#"{"type":"key","key":"q","down":true}"#).unwrap();
        assert_eq!(msg.input_event(), None);

        assert_eq!(ClientMessage::from_json(r#"{"type":"ping"}"#), Some(ClientMessage::Ping));
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"blur"}"#).unwrap().input_event(),
            Some(InputEvent::ReleaseAll)
        );
        assert_eq!(ClientMessage::from_json(r#"{"type":"input","throttle":1}"#), None);
        assert_eq!(ClientMessage::from_json("not json"), None);
    }

    #[test]
    fn server_messages_are_tagged() {
        let json = ServerMessage::Pong.to_json().unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[tokio::test]
    async fn key_messages_are_forwarded_to_the_input_queue() {
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(Mutex::new(ClientRegistry::new()));
        let (input_tx, mut input_rx) = mpsc::unbounded_channel();
        tokio::spawn(start_websocket_server(listener, Arc::clone(&registry), input_tx, 1.0 / 60.0));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        let welcome = ws.next().await.unwrap().unwrap();
        let welcome: serde_json::Value = serde_json::from_str(welcome.to_text().unwrap()).unwrap();
        assert_eq!(welcome["type"], "welcome");

        ws.send(Message::Text(r#"{"type":"key","key":"w","down":true}"#.into()))
            .await
            .unwrap();
        assert_eq!(input_rx.recv().await, Some(InputEvent::KeyDown(Key::W)));

        ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        let pong = ws.next().await.unwrap().unwrap();
        assert_eq!(pong.to_text().unwrap(), r#"{"type":"pong"}"#);

        ws.close(None).await.unwrap();
        assert_eq!(input_rx.recv().await, Some(InputEvent::ReleaseAll));
    }
}
