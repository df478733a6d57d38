//! Reconnecting device client.
//!
//! `DeviceClient` keeps one WebSocket session to the server alive for the
//! life of the process. On connect it announces itself with `hello`, sends a
//! timestamped heartbeat on a fixed interval, and applies every `cmd` it
//! receives to its actuator model.
//!
//! # Design
//!
//! - Single flight: `run` owns the only connection and the only retry timer,
//!   so a disconnect can never schedule two reconnects
//! - Constant retry delay, unbounded attempts
//! - Shutdown is observed while connecting, while connected, and while
//!   waiting to retry

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, error, info, warn};

use q2d_core::constants::{
    DEFAULT_DEVICE_NAME, DEFAULT_SERVER_URL, DEVICE_HEARTBEAT_INTERVAL, RECONNECT_DELAY,
};
use q2d_core::error::{Error, Result};
use q2d_core::protocol::{Codec, Message};
use q2d_core::session::ReconnectionHandler;

use crate::actuator::{ActuatorState, Applied};

const EVENT_CAPACITY: usize = 64;

/// Device client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server device channel, `ws://` or `wss://`.
    pub url: String,
    /// Interval between application heartbeats.
    pub heartbeat_interval: Duration,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Name announced in `hello`.
    pub device_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            heartbeat_interval: DEVICE_HEARTBEAT_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Lost the session; waiting to retry or retrying.
    Reconnecting,
    /// `run` has returned.
    Terminated,
}

/// Observable client activity.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connected,
    Disconnected { reason: String },
    Status(String),
    /// A command was applied; carries the resulting state.
    Applied { applied: Applied, state: ActuatorState },
    /// A frame that was neither a known message nor a command document.
    Raw(String),
}

enum SessionEnd {
    Shutdown,
    Lost(Error),
}

/// Reconnecting WebSocket client for a single device.
pub struct DeviceClient {
    config: ClientConfig,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<DeviceEvent>,
    actuator: Arc<Mutex<ActuatorState>>,
}

impl DeviceClient {
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            state,
            events,
            actuator: Arc::new(Mutex::new(ActuatorState::new())),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receive client events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the actuator model.
    pub fn actuator(&self) -> ActuatorState {
        self.lock_actuator().clone()
    }

    /// Connect and stay connected until `shutdown` turns true or its sender
    /// is dropped.
    ///
    /// Returns an error only for failures retrying cannot fix, such as a
    /// malformed URL.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let url = self.config.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            self.set_state(ConnectionState::Terminated);
            return Err(Error::Config {
                message: format!("server url must use ws:// or wss://: {url}"),
            });
        }

        let mut reconnect = ReconnectionHandler::new(self.config.reconnect_delay);
        self.set_state(ConnectionState::Connecting);

        let result = loop {
            match self.session(&mut shutdown, &mut reconnect).await {
                SessionEnd::Shutdown => break Ok(()),
                SessionEnd::Lost(e) if e.is_fatal() => {
                    error!(error = %e, "Cannot connect");
                    break Err(e);
                }
                SessionEnd::Lost(e) => {
                    if !reconnect.is_active() {
                        reconnect.start();
                    }
                    let delay = reconnect.next_delay();
                    self.set_state(ConnectionState::Reconnecting);
                    warn!(
                        attempt = reconnect.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connection lost, retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = wait_shutdown(&mut shutdown) => break Ok(()),
                    }
                }
            }
        };

        self.set_state(ConnectionState::Terminated);
        info!("Device client stopped");
        result
    }

    async fn session(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        reconnect: &mut ReconnectionHandler,
    ) -> SessionEnd {
        let url = self.config.url.as_str();
        debug!(url, attempt = reconnect.attempt(), "Connecting");

        let ws = tokio::select! {
            result = connect_async(url) => match result {
                Ok((ws, _response)) => ws,
                Err(e) => return self.lost(connect_error(e)),
            },
            _ = wait_shutdown(shutdown) => return SessionEnd::Shutdown,
        };

        if reconnect.is_active() {
            info!(
                url,
                attempt = reconnect.attempt(),
                elapsed_ms = reconnect.elapsed().as_millis() as u64,
                "Reconnected"
            );
        } else {
            info!(url, "Connected");
        }
        reconnect.reset();
        self.set_state(ConnectionState::Connected);
        self.emit(DeviceEvent::Connected);

        let (mut sink, mut stream) = ws.split();

        if let Err(e) = send(&mut sink, &Message::hello(self.config.device_name.as_str())).await {
            return self.lost(e);
        }

        let interval = self.config.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = wait_shutdown(shutdown) => {
                    debug!("Closing connection for shutdown");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                _ = ticker.tick() => {
                    if let Err(e) = send(&mut sink, &Message::heartbeat(unix_millis())).await {
                        return self.lost(e);
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .unwrap_or_default();
                        debug!(reason = %reason, "Server closed connection");
                        return self.lost(Error::ConnectionClosed);
                    }
                    // Pings are answered by the socket on the next read.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return self.lost(Error::Transport { message: e.to_string() });
                    }
                    None => return self.lost(Error::ConnectionClosed),
                },
            }
        }
    }

    fn lost(&self, error: Error) -> SessionEnd {
        self.emit(DeviceEvent::Disconnected {
            reason: error.to_string(),
        });
        SessionEnd::Lost(error)
    }

    fn handle_text(&self, text: &str) {
        match Codec::decode(text) {
            Ok(Message::Cmd(cmd)) => {
                let (applied, state) = {
                    let mut actuator = self.lock_actuator();
                    (actuator.apply(&cmd), actuator.clone())
                };
                info!(
                    bitstring = %cmd.bitstring,
                    light1 = cmd.light1,
                    light2 = cmd.light2,
                    active = ?state.active_channels(),
                    "Command applied"
                );
                self.emit(DeviceEvent::Applied { applied, state });
            }
            Ok(Message::Status { msg }) => {
                info!(msg = %msg, "Server status");
                self.emit(DeviceEvent::Status(msg));
            }
            Ok(other) => debug!(kind = other.kind(), "Ignoring message"),
            Err(_) => self.handle_loose(text),
        }
    }

    /// Frames that fail strict decoding. A `cmd` with an unusable bitstring
    /// still drives the relays.
    fn handle_loose(&self, text: &str) {
        let outcome = serde_json::from_str::<Value>(text).ok().and_then(|doc| {
            let mut actuator = self.lock_actuator();
            actuator
                .apply_document(&doc)
                .map(|applied| (applied, actuator.clone()))
        });

        match outcome {
            Some((applied, state)) => {
                warn!(
                    raw = %text,
                    ?applied,
                    relay1 = state.relay1(),
                    relay2 = state.relay2(),
                    "Applied malformed command"
                );
                self.emit(DeviceEvent::Applied { applied, state });
            }
            None => {
                info!(raw = %text, "Received");
                self.emit(DeviceEvent::Raw(text.to_string()));
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: DeviceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_actuator(&self) -> MutexGuard<'_, ActuatorState> {
        self.actuator.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn send<S>(sink: &mut S, msg: &Message) -> Result<()>
where
    S: futures::Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let frame = Codec::encode(msg)?;
    sink.send(WsMessage::Text(frame.into()))
        .await
        .map_err(|e| Error::Transport {
            message: e.to_string(),
        })
}

fn connect_error(e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::Url(url) => Error::Config {
            message: format!("invalid server url: {url}"),
        },
        tungstenite::Error::HttpFormat(e) => Error::Config {
            message: format!("invalid server url: {e}"),
        },
        tungstenite::Error::Io(io) => Error::Io(io),
        other => Error::Transport {
            message: other.to_string(),
        },
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn unix_millis() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const WAIT: Duration = Duration::from_secs(3);

    fn config(url: String) -> ClientConfig {
        ClientConfig {
            url,
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(50),
            device_name: "test-rig".into(),
        }
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn next_text<S>(ws: &mut S) -> Message
    where
        S: futures::Stream<Item = std::result::Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        loop {
            match tokio::time::timeout(WAIT, ws.next()).await.unwrap() {
                Some(Ok(WsMessage::Text(t))) => return Codec::decode(t.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    async fn next_event(
        rx: &mut broadcast::Receiver<DeviceEvent>,
        want: impl Fn(&DeviceEvent) -> bool,
    ) -> DeviceEvent {
        loop {
            let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            if want(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn announces_and_applies_commands() {
        let (listener, url) = listener().await;
        let client = Arc::new(DeviceClient::new(config(url)));
        let mut events = client.subscribe();
        let (stop, stop_rx) = watch::channel(false);
        let runner = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run(stop_rx).await })
        };

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        assert_eq!(next_text(&mut ws).await, Message::hello("test-rig"));

        ws.send(WsMessage::Text(
            r#"{"type":"cmd","bitstring":"1000100010","light1":true,"light2":false}"#.into(),
        ))
        .await
        .unwrap();

        match next_event(&mut events, |e| matches!(e, DeviceEvent::Applied { .. })).await {
            DeviceEvent::Applied { applied, state } => {
                assert_eq!(applied, Applied::Full);
                assert_eq!(state.active_channels(), vec![0, 4, 8]);
                assert!(state.relay1());
            }
            _ => unreachable!(),
        }
        assert_eq!(client.state(), ConnectionState::Connected);

        stop.send(true).unwrap();
        tokio::time::timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
        assert_eq!(client.state(), ConnectionState::Terminated);
    }

    #[tokio::test]
    async fn malformed_command_drives_relays_only() {
        let (listener, url) = listener().await;
        let client = Arc::new(DeviceClient::new(config(url)));
        let mut events = client.subscribe();
        let (_stop, stop_rx) = watch::channel(false);
        let client_task = Arc::clone(&client);
        tokio::spawn(async move { client_task.run(stop_rx).await });

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        next_text(&mut ws).await;

        ws.send(WsMessage::Text(r#"{"type":"cmd","bitstring":"11","light2":true}"#.into()))
            .await
            .unwrap();
        ws.send(WsMessage::Text("hello from nowhere".into())).await.unwrap();

        match next_event(&mut events, |e| matches!(e, DeviceEvent::Applied { .. })).await {
            DeviceEvent::Applied { applied, state } => {
                assert_eq!(applied, Applied::RelaysOnly);
                assert!(state.active_channels().is_empty());
                assert!(state.relay2());
            }
            _ => unreachable!(),
        }
        assert_eq!(
            next_event(&mut events, |e| matches!(e, DeviceEvent::Raw(_))).await,
            DeviceEvent::Raw("hello from nowhere".into())
        );
    }

    #[tokio::test]
    async fn heartbeats_carry_timestamps() {
        let (listener, url) = listener().await;
        let mut cfg = config(url);
        cfg.heartbeat_interval = Duration::from_millis(50);
        let client = Arc::new(DeviceClient::new(cfg));
        let (_stop, stop_rx) = watch::channel(false);
        let client_task = Arc::clone(&client);
        tokio::spawn(async move { client_task.run(stop_rx).await });

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        assert_eq!(next_text(&mut ws).await.kind(), "hello");
        for _ in 0..2 {
            match next_text(&mut ws).await {
                Message::Heartbeat { ts } => assert!(ts.unwrap() > 0),
                other => panic!("expected heartbeat, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn reconnects_after_server_drops() {
        let (listener, url) = listener().await;
        let client = Arc::new(DeviceClient::new(config(url)));
        let mut states = client.subscribe_state();
        let (_stop, stop_rx) = watch::channel(false);
        let client_task = Arc::clone(&client);
        tokio::spawn(async move { client_task.run(stop_rx).await });

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        next_text(&mut ws).await;
        drop(ws);

        tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Reconnecting))
            .await
            .unwrap()
            .unwrap();

        // Second session, announced again.
        let (tcp, _) = tokio::time::timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        assert_eq!(next_text(&mut ws).await, Message::hello("test-rig"));
        tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn keeps_retrying_unreachable_server() {
        let (listener, url) = listener().await;
        drop(listener);

        let client = Arc::new(DeviceClient::new(config(url)));
        let mut events = client.subscribe();
        let (stop, stop_rx) = watch::channel(false);
        let client_task = Arc::clone(&client);
        let runner = tokio::spawn(async move { client_task.run(stop_rx).await });

        // Several failed attempts, none fatal.
        for _ in 0..3 {
            next_event(&mut events, |e| matches!(e, DeviceEvent::Disconnected { .. })).await;
        }
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        stop.send(true).unwrap();
        tokio::time::timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_retry_delay() {
        let (listener, url) = listener().await;
        drop(listener);

        let mut cfg = config(url);
        cfg.reconnect_delay = Duration::from_secs(3600);
        let client = Arc::new(DeviceClient::new(cfg));
        let mut states = client.subscribe_state();
        let (stop, stop_rx) = watch::channel(false);
        let client_task = Arc::clone(&client);
        let runner = tokio::spawn(async move { client_task.run(stop_rx).await });

        tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Reconnecting))
            .await
            .unwrap()
            .unwrap();
        drop(stop);
        tokio::time::timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
        assert_eq!(client.state(), ConnectionState::Terminated);
    }

    #[tokio::test]
    async fn malformed_url_is_fatal() {
        let client = DeviceClient::new(config("not a url".into()));
        let (_stop, stop_rx) = watch::channel(false);
        let result = tokio::time::timeout(WAIT, client.run(stop_rx)).await.unwrap();
        assert!(matches!(result, Err(Error::Config { .. })));
        assert_eq!(client.state(), ConnectionState::Terminated);
    }
}
