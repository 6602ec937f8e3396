//! Live channel client: one long-lived, authenticated WebSocket per active
//! session, used for push delivery of messages and notifications.
//!
//! The connection is established when the dashboard or messaging screen
//! mounts and torn down when it unmounts. Delivery is best-effort: outbound
//! events published while the transport is down are dropped, there is no
//! client-side outbound queue.
use crate::credential::CredentialStore;
use crate::error::Result;
use crate::types::Message;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 32;

/// Events crossing the live channel, tagged by name on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ChannelEvent {
    /// Outbound: relay one message to its receiver.
    #[serde(rename = "sendMessage", rename_all = "camelCase")]
    SendMessage {
        sender_id: String,
        receiver_id: String,
        content: String,
    },
    /// Inbound: a full message pushed for one of our conversations.
    #[serde(rename = "receiveMessage")]
    ReceiveMessage { message: Message },
    /// Inbound: something happened somewhere. No payload, just the fact.
    #[serde(rename = "new_message")]
    NewMessage,
}

fn auth_envelope(credentials: &CredentialStore) -> String {
    let token = credentials
        .get()
        .map(|c| c.token().to_string())
        .unwrap_or_default();
    serde_json::json!({ "auth": { "token": token } }).to_string()
}

pub struct LiveChannel {
    events: broadcast::Sender<ChannelEvent>,
    outbound: mpsc::Sender<String>,
    connected: watch::Receiver<bool>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveChannel {
    /// Start the channel. The connection (and any reconnection) is driven by
    /// a background task; the handle is usable immediately.
    pub fn connect(
        ws_url: &str,
        reconnect_delay: Duration,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (connected_tx, connected_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_connection(
            ws_url.to_string(),
            reconnect_delay,
            credentials,
            events.clone(),
            outbound_rx,
            connected_tx,
            shutdown_rx,
        ));

        Self {
            events,
            outbound: outbound_tx,
            connected: connected_rx,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Subscribe to inbound events. Subscriptions are additive and survive
    /// reconnects.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Fire-and-forget: when the transport is down the
    /// event is dropped with a warning.
    pub fn publish(&self, event: &ChannelEvent) -> Result<()> {
        if !*self.connected.borrow() {
            warn!("Live channel disconnected; dropping outbound event");
            return Ok(());
        }
        let text = serde_json::to_string(event)?;
        if self.outbound.try_send(text).is_err() {
            warn!("Live channel outbound buffer full; dropping event");
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the handshake has completed at least once.
    pub async fn wait_connected(&self) {
        let mut rx = self.connected.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Tear the connection down (screen unmount).
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Ok(mut guard) = self.task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

async fn run_connection(
    ws_url: String,
    reconnect_delay: Duration,
    credentials: Arc<CredentialStore>,
    events: broadcast::Sender<ChannelEvent>,
    mut outbound: mpsc::Receiver<String>,
    connected: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match connect_async(&ws_url).await {
            Ok((mut stream, _)) => {
                // The handshake carries the current credential; the backend
                // rejects unauthorized connections.
                if let Err(e) = stream
                    .send(WsMessage::Text(auth_envelope(&credentials)))
                    .await
                {
                    warn!("Live channel auth send failed: {}", e);
                } else {
                    info!("Live channel connected to {}", ws_url);
                    connected.send_replace(true);

                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    let _ = stream.close(None).await;
                                    connected.send_replace(false);
                                    return;
                                }
                            }
                            frame = outbound.recv() => {
                                match frame {
                                    Some(text) => {
                                        if let Err(e) = stream.send(WsMessage::Text(text)).await {
                                            warn!("Live channel send failed: {}", e);
                                            break;
                                        }
                                    }
                                    // All handles dropped
                                    None => {
                                        connected.send_replace(false);
                                        return;
                                    }
                                }
                            }
                            incoming = stream.next() => {
                                match incoming {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        match serde_json::from_str::<ChannelEvent>(&text) {
                                            Ok(event) => {
                                                // Send fails only with no subscribers
                                                let _ = events.send(event);
                                            }
                                            Err(e) => {
                                                debug!("Ignoring unrecognized channel frame: {}", e);
                                            }
                                        }
                                    }
                                    Some(Ok(WsMessage::Close(_))) | None => {
                                        debug!("Live channel closed by server");
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        warn!("Live channel transport error: {}", e);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    connected.send_replace(false);
                }
            }
            Err(e) => {
                warn!("Live channel connect to {} failed: {}", ws_url, e);
            }
        }

        if *shutdown.borrow() {
            break;
        }
        sleep(reconnect_delay).await;
    }
}

/// Process-wide "something arrived" indicator for the dashboard. Set on any
/// payload-free activity notification, cleared when the user opens the
/// messaging screen. Not scoped per contact.
#[derive(Clone)]
pub struct UnreadFlag {
    state: Arc<watch::Sender<bool>>,
}

impl UnreadFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn set(&self) {
        self.state.send_replace(true);
    }

    pub fn clear(&self) {
        self.state.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Feed the flag from a channel subscription while the dashboard is the
    /// active view. Returns the pump task for teardown.
    pub fn watch_channel(&self, channel: &LiveChannel) -> JoinHandle<()> {
        let flag = self.clone();
        let mut rx = channel.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ChannelEvent::NewMessage) => flag.set(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Unread listener lagged {} events", n);
                        flag.set();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for UnreadFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn outbound_event_wire_shape() {
        let event = ChannelEvent::SendMessage {
            sender_id: "a".to_string(),
            receiver_id: "b".to_string(),
            content: "yo".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["event"], "sendMessage");
        assert_eq!(json["senderId"], "a");
        assert_eq!(json["receiverId"], "b");
        assert_eq!(json["content"], "yo");
    }

    #[test]
    fn inbound_events_parse() {
        let text = r#"{"event":"receiveMessage","message":{
            "senderId":"a","receiverId":"b","content":"hi",
            "timestamp":"2024-05-01T12:00:00Z"}}"#;
        let event: ChannelEvent = serde_json::from_str(text).unwrap();
        match event {
            ChannelEvent::ReceiveMessage { message } => {
                assert_eq!(message.sender_id, "a");
                assert_eq!(
                    message.timestamp,
                    chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
                );
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let event: ChannelEvent = serde_json::from_str(r#"{"event":"new_message"}"#).unwrap();
        assert_eq!(event, ChannelEvent::NewMessage);
    }

    #[test]
    fn unread_flag_set_and_clear() {
        let flag = UnreadFlag::new();
        assert!(!flag.is_set());
        flag.set();
        flag.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!flag.is_set());
    }
}
