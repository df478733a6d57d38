//! Device link: the single device slot and per-connection WebSocket tasks.
//!
//! One actor task owns the slot. Connection tasks and the dispatcher talk to
//! it over an unbounded command channel, so every slot transition happens in
//! one place and in arrival order.
//!
//! Slot transitions:
//!
//! | From         | Event                       | To            | Effect                              |
//! |--------------|-----------------------------|---------------|-------------------------------------|
//! | Disconnected | attach(c)                   | Connected(c)  | queue status greeting to c          |
//! | Connected(a) | attach(b)                   | Connected(b)  | evict a, queue status greeting to b |
//! | Connected(a) | detach(a)                   | Disconnected  |                                     |
//! | Connected(b) | detach(a), a != b           | Connected(b)  | ignored (stale connection)          |
//! | Connected(a) | heartbeat expired on a      | Disconnected  | a terminated without close frame    |
//! | any          | shutdown                    | Disconnected  | occupant closed                     |
//!
//! Connection ids are monotonic, so a detach from an evicted connection can
//! never clear its successor.
//!
//! Every write to the socket is bounded by the heartbeat interval. A device
//! that stops reading while frames back up is treated like one that missed a
//! heartbeat.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use q2d_core::connection::{HeartbeatTracker, TickOutcome};
use q2d_core::constants::{CONNECTED_STATUS, LINK_HEARTBEAT_INTERVAL, OUTBOUND_QUEUE_DEPTH};
use q2d_core::protocol::{Codec, Message};

use crate::dispatch::DispatchError;

/// Identifies one accepted device connection.
pub type ConnectionId = u64;

/// Device link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Interval between liveness pings. A connection that has not answered
    /// the previous ping by the next tick is terminated.
    pub heartbeat_interval: Duration,
    /// Outbound frames buffered per connection before dispatch reports
    /// backpressure.
    pub outbound_depth: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: LINK_HEARTBEAT_INTERVAL,
            outbound_depth: OUTBOUND_QUEUE_DEPTH,
        }
    }
}

/// Observable state of the device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected { id: ConnectionId, peer: SocketAddr },
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected { .. })
    }
}

/// Why a connection left (or was removed from) the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// The peer closed the socket.
    Closed,
    /// Transport error on read or write.
    Error,
    /// The peer missed a heartbeat.
    HeartbeatTimeout,
    /// A newer connection took the slot.
    Evicted,
    /// The link is shutting down.
    Shutdown,
}

/// Slot-side view of one connection.
pub struct DeviceHandle {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<String>,
    evict: Option<oneshot::Sender<DetachReason>>,
}

impl DeviceHandle {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        outbound: mpsc::Sender<String>,
        evict: oneshot::Sender<DetachReason>,
    ) -> Self {
        Self {
            id,
            peer,
            outbound,
            evict: Some(evict),
        }
    }

    fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    fn send(&self, frame: String) -> Result<(), DispatchError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DispatchError::NotOpen,
        })
    }

    fn close(mut self, reason: DetachReason) {
        if let Some(tx) = self.evict.take() {
            let _ = tx.send(reason);
        }
    }
}

enum LinkCommand {
    Attach(DeviceHandle),
    Detach {
        id: ConnectionId,
        reason: DetachReason,
    },
    Send {
        frame: String,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    Shutdown,
}

/// Handle to the device slot. Cheap to clone.
#[derive(Clone)]
pub struct DeviceLink {
    commands: mpsc::UnboundedSender<LinkCommand>,
    state: watch::Receiver<LinkState>,
    next_id: Arc<AtomicU64>,
    config: LinkConfig,
}

impl DeviceLink {
    /// Spawn the slot owner. Must be called within a Tokio runtime.
    pub fn new(config: LinkConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(LinkState::Disconnected);
        tokio::spawn(
            SlotOwner {
                slot: None,
                commands: rx,
                state: state_tx,
            }
            .run(),
        );
        Self {
            commands,
            state,
            next_id: Arc::new(AtomicU64::new(1)),
            config,
        }
    }

    /// Allocate the id for a newly accepted connection.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Current slot state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch slot state changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Install `handle` as the current device, evicting any occupant.
    pub fn attach(&self, handle: DeviceHandle) {
        if let Err(mpsc::error::SendError(LinkCommand::Attach(handle))) =
            self.commands.send(LinkCommand::Attach(handle))
        {
            handle.close(DetachReason::Shutdown);
        }
    }

    /// Clear the slot if `id` still occupies it.
    pub fn detach(&self, id: ConnectionId, reason: DetachReason) {
        let _ = self.commands.send(LinkCommand::Detach { id, reason });
    }

    /// Queue a serialized frame to the current device without waiting for
    /// buffer space.
    pub async fn send_frame(&self, frame: String) -> Result<(), DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LinkCommand::Send { frame, reply })
            .map_err(|_| DispatchError::LinkStopped)?;
        rx.await.map_err(|_| DispatchError::LinkStopped)?
    }

    /// Stop the slot owner and close the current device connection.
    pub fn shutdown(&self) {
        let _ = self.commands.send(LinkCommand::Shutdown);
    }

    /// Resolves once the slot owner has stopped.
    pub async fn closed(&self) {
        self.commands.closed().await;
    }

    /// Run one accepted device connection until it closes, fails, misses a
    /// heartbeat or is evicted.
    pub async fn serve(&self, socket: WebSocket, peer: SocketAddr) -> DetachReason {
        let id = self.next_connection_id();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_depth.max(1));
        let (evict_tx, evict_rx) = oneshot::channel();

        info!(id, %peer, "Device connected");
        self.attach(DeviceHandle::new(id, peer, outbound_tx, evict_tx));

        let reason = run_connection(
            socket,
            id,
            outbound_rx,
            evict_rx,
            self.config.heartbeat_interval,
        )
        .await;

        info!(id, %peer, ?reason, "Device disconnected");
        self.detach(id, reason);
        reason
    }
}

struct SlotOwner {
    slot: Option<DeviceHandle>,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    state: watch::Sender<LinkState>,
}

impl SlotOwner {
    async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                LinkCommand::Attach(handle) => self.attach(handle),
                LinkCommand::Detach { id, reason } => self.detach(id, reason),
                LinkCommand::Send { frame, reply } => {
                    let _ = reply.send(self.send(frame));
                }
                LinkCommand::Shutdown => break,
            }
        }

        if let Some(handle) = self.slot.take() {
            debug!(id = handle.id, "Closing device connection on shutdown");
            handle.close(DetachReason::Shutdown);
        }
        self.publish();
        debug!("Device link stopped");
    }

    fn attach(&mut self, handle: DeviceHandle) {
        if let Some(previous) = self.slot.take() {
            warn!(
                previous = previous.id,
                current = handle.id,
                "New device connection replaces existing one"
            );
            previous.close(DetachReason::Evicted);
        }

        match Codec::encode(&Message::status(CONNECTED_STATUS)) {
            Ok(frame) => {
                if let Err(e) = handle.send(frame) {
                    warn!(id = handle.id, error = %e, "Failed to queue status greeting");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode status greeting"),
        }

        self.slot = Some(handle);
        self.publish();
    }

    fn detach(&mut self, id: ConnectionId, reason: DetachReason) {
        match &self.slot {
            Some(current) if current.id == id => {
                debug!(id, ?reason, "Device slot cleared");
                self.slot = None;
                self.publish();
            }
            _ => trace!(id, ?reason, "Ignoring detach from stale connection"),
        }
    }

    fn send(&self, frame: String) -> Result<(), DispatchError> {
        let handle = self.slot.as_ref().ok_or(DispatchError::NoDevice)?;
        if !handle.is_open() {
            return Err(DispatchError::NotOpen);
        }
        handle.send(frame)
    }

    fn publish(&self) {
        let state = match &self.slot {
            Some(h) => LinkState::Connected {
                id: h.id,
                peer: h.peer,
            },
            None => LinkState::Disconnected,
        };
        self.state.send_replace(state);
    }
}

async fn run_connection(
    socket: WebSocket,
    id: ConnectionId,
    mut outbound: mpsc::Receiver<String>,
    mut evict: oneshot::Receiver<DetachReason>,
    heartbeat_interval: Duration,
) -> DetachReason {
    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = HeartbeatTracker::new();
    let mut ticker =
        tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            evicted = &mut evict => {
                break evicted.unwrap_or(DetachReason::Shutdown);
            }
            _ = ticker.tick() => match heartbeat.on_tick() {
                TickOutcome::SendPing => {
                    let ping = WsMessage::Ping(Bytes::new());
                    if let Err(reason) = write(&mut sink, id, ping, heartbeat_interval).await {
                        break reason;
                    }
                    trace!(id, pings = heartbeat.pings_sent(), "Heartbeat ping sent");
                }
                TickOutcome::Expired => {
                    warn!(id, "Device missed heartbeat, terminating connection");
                    break DetachReason::HeartbeatTimeout;
                }
            },
            Some(frame) = outbound.recv() => {
                let text = WsMessage::Text(frame.into());
                if let Err(reason) = write(&mut sink, id, text, heartbeat_interval).await {
                    break reason;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => log_device_message(id, text.as_str()),
                Some(Ok(WsMessage::Pong(_))) => {
                    if let Some(rtt) = heartbeat.on_pong() {
                        trace!(id, rtt_ms = rtt.as_millis() as u64, "Heartbeat pong");
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    debug!(id, len = data.len(), "Ignoring binary frame from device");
                }
                Some(Ok(WsMessage::Ping(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => break DetachReason::Closed,
                Some(Err(e)) => {
                    debug!(id, error = %e, "Device socket error");
                    break DetachReason::Error;
                }
            },
        }
    };

    // A heartbeat timeout or transport error drops the socket without a
    // close handshake.
    if matches!(reason, DetachReason::Evicted | DetachReason::Shutdown) {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: match reason {
                DetachReason::Evicted => Utf8Bytes::from_static("replaced by newer connection"),
                _ => Utf8Bytes::from_static("server shutting down"),
            },
        };
        let _ = write(&mut sink, id, WsMessage::Close(Some(frame)), heartbeat_interval).await;
    }
    reason
}

/// Send one frame, giving up after `limit`.
async fn write(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    id: ConnectionId,
    msg: WsMessage,
    limit: Duration,
) -> Result<(), DetachReason> {
    match tokio::time::timeout(limit, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(id, error = %e, "Device send failed");
            Err(DetachReason::Error)
        }
        Err(_) => {
            warn!(id, "Device stopped reading, terminating connection");
            Err(DetachReason::HeartbeatTimeout)
        }
    }
}

/// Inbound device traffic is informational only.
fn log_device_message(id: ConnectionId, text: &str) {
    match Codec::decode(text) {
        Ok(Message::Heartbeat { ts }) => debug!(id, ?ts, "Device heartbeat"),
        Ok(Message::Hello { device }) => info!(id, device = %device, "Device identified"),
        Ok(other) => info!(id, kind = other.kind(), "Message from device"),
        Err(_) => info!(id, raw = %text, "Message from device"),
    }
}
