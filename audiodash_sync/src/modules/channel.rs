//! Single persistent WebSocket link to the device.
//!
//! The link is driven by one task ([`ChannelManager::run`]) that owns the socket. Callers
//! talk to it through a cloneable [`ChannelHandle`] and observe it through a stream of
//! [`ChannelEvent`]s. Reconnection uses linear backoff (`base_delay * attempt`) and stops
//! for good after `max_attempts` consecutive failures; only an explicit [`ChannelHandle::retry`]
//! starts a new cycle afterwards.

use crate::codec::{decode_frame, encode_command, DecodeError};
use crate::protocol::{InboundMessage, OutboundCommand};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

/// Connection status as seen by senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelStatus {
    Connecting,
    Open,
    #[default]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A connect call is starting. `attempt` is 0 for the first call of a cycle.
    Connecting { attempt: u32 },
    Opened,
    Closed { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    /// The attempt budget is spent; nothing else happens until a manual retry.
    GaveUp { attempts: u32 },
    Message(InboundMessage),
}

#[derive(Debug)]
pub(crate) enum ChannelCommand {
    Send(OutboundCommand),
    Retry,
}

#[derive(Debug, Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<ChannelCommand>,
    status: watch::Receiver<ChannelStatus>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ChannelHandle {
    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    /// Best-effort, at-most-once send. Returns whether the command was handed to the link;
    /// when the link is not open the command is dropped and a warning is logged.
    pub fn send(&self, cmd: OutboundCommand) -> bool {
        if self.status() != ChannelStatus::Open {
            warn!(command = ?cmd, "channel not connected, dropping command");
            return false;
        }
        match self.tx.try_send(ChannelCommand::Send(cmd)) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                warn!(command = ?dropped, "channel send queue full, dropping command");
                false
            }
            Err(TrySendError::Closed(dropped)) => {
                warn!(command = ?dropped, "channel torn down, dropping command");
                false
            }
        }
    }

    /// Starts a fresh connect cycle if the manager has given up. No-op otherwise.
    pub fn retry(&self) {
        if self.tx.try_send(ChannelCommand::Retry).is_err() {
            warn!("channel manager unavailable, retry ignored");
        }
    }

    /// Tears the link down. Kept off the command queue so a full queue cannot swallow it.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }
}

#[derive(Debug)]
struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delay before the next attempt, or `None` once the ceiling is reached.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.base_delay * self.attempts)
    }
}

enum Phase {
    Connect,
    Backoff(Duration),
    Parked,
    Shutdown,
}

enum PumpEnd {
    Closed(String),
    Shutdown,
}

pub struct ChannelManager {
    endpoint: Url,
    backoff: Backoff,
    commands: mpsc::Receiver<ChannelCommand>,
    shutdown: watch::Receiver<bool>,
    events: mpsc::Sender<ChannelEvent>,
    status: watch::Sender<ChannelStatus>,
}

/// Spawns the manager on the current runtime and connects immediately.
pub fn spawn(
    endpoint: Url,
    policy: ReconnectPolicy,
    queue: usize,
) -> (ChannelHandle, mpsc::Receiver<ChannelEvent>) {
    let (manager, handle, events) = ChannelManager::new(endpoint, policy, queue);
    tokio::spawn(manager.run());
    (handle, events)
}

impl ChannelManager {
    pub fn new(
        endpoint: Url,
        policy: ReconnectPolicy,
        queue: usize,
    ) -> (Self, ChannelHandle, mpsc::Receiver<ChannelEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(queue.max(1));
        let (event_tx, event_rx) = mpsc::channel(queue.max(1));
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Closed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = Self {
            endpoint,
            backoff: Backoff::new(policy),
            commands: cmd_rx,
            shutdown: shutdown_rx,
            events: event_tx,
            status: status_tx,
        };
        let handle = ChannelHandle {
            tx: cmd_tx,
            status: status_rx,
            shutdown: Arc::new(shutdown_tx),
        };
        (manager, handle, event_rx)
    }

    pub async fn run(mut self) {
        let mut phase = Phase::Connect;
        loop {
            phase = match phase {
                Phase::Connect => self.connect_once().await,
                Phase::Backoff(delay) => self.wait_backoff(delay).await,
                Phase::Parked => self.park().await,
                Phase::Shutdown => {
                    self.publish(ChannelStatus::Closed);
                    info!(endpoint = %self.endpoint, "channel manager stopped");
                    return;
                }
            };
        }
    }

    async fn connect_once(&mut self) -> Phase {
        let attempt = self.backoff.attempts;
        self.publish(ChannelStatus::Connecting);
        if !self.emit(ChannelEvent::Connecting { attempt }).await {
            return Phase::Shutdown;
        }
        info!(endpoint = %self.endpoint, attempt, "connecting");

        let result = {
            let connect = tokio::time::timeout(
                CONNECT_TIMEOUT,
                tokio_tungstenite::connect_async(self.endpoint.to_string()),
            );
            tokio::pin!(connect);

            loop {
                tokio::select! {
                    res = &mut connect => break res,
                    _ = closed(&mut self.shutdown) => return Phase::Shutdown,
                    cmd = self.commands.recv() => match cmd {
                        None => return Phase::Shutdown,
                        Some(ChannelCommand::Send(cmd)) => drop_unsent(&cmd),
                        Some(ChannelCommand::Retry) => debug!("retry ignored, connect in progress"),
                    },
                }
            }
        };

        let ws = match result {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return self.on_closed(ChannelError::from(e).to_string()).await,
            Err(_) => {
                return self
                    .on_closed(ChannelError::ConnectTimeout(CONNECT_TIMEOUT).to_string())
                    .await
            }
        };

        self.backoff.reset();
        self.publish(ChannelStatus::Open);
        info!(endpoint = %self.endpoint, "channel open");
        if !self.emit(ChannelEvent::Opened).await {
            return Phase::Shutdown;
        }

        match self.pump(ws).await {
            PumpEnd::Shutdown => Phase::Shutdown,
            PumpEnd::Closed(reason) => self.on_closed(reason).await,
        }
    }

    async fn on_closed(&mut self, reason: String) -> Phase {
        self.publish(ChannelStatus::Closed);
        info!(%reason, "channel closed");
        if !self.emit(ChannelEvent::Closed { reason }).await {
            return Phase::Shutdown;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempts;
                warn!(attempt, ?delay, "scheduling reconnect");
                if !self.emit(ChannelEvent::Reconnecting { attempt, delay }).await {
                    return Phase::Shutdown;
                }
                Phase::Backoff(delay)
            }
            None => {
                let attempts = self.backoff.attempts;
                warn!(attempts, "reconnect budget exhausted, giving up");
                if !self.emit(ChannelEvent::GaveUp { attempts }).await {
                    return Phase::Shutdown;
                }
                Phase::Parked
            }
        }
    }

    async fn wait_backoff(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Phase::Connect,
                _ = closed(&mut self.shutdown) => return Phase::Shutdown,
                cmd = self.commands.recv() => match cmd {
                    None => return Phase::Shutdown,
                    Some(ChannelCommand::Send(cmd)) => drop_unsent(&cmd),
                    Some(ChannelCommand::Retry) => debug!("retry ignored, reconnect already scheduled"),
                },
            }
        }
    }

    async fn park(&mut self) -> Phase {
        loop {
            tokio::select! {
                _ = closed(&mut self.shutdown) => return Phase::Shutdown,
                cmd = self.commands.recv() => match cmd {
                    None => return Phase::Shutdown,
                    Some(ChannelCommand::Send(cmd)) => drop_unsent(&cmd),
                    Some(ChannelCommand::Retry) => {
                        info!("manual retry requested");
                        self.backoff.reset();
                        return Phase::Connect;
                    }
                },
            }
        }
    }

    async fn pump(&mut self, ws: WsStream) -> PumpEnd {
        let (mut write, mut read) = ws.split();
        loop {
            tokio::select! {
                _ = closed(&mut self.shutdown) => {
                    let _ = write.close().await;
                    return PumpEnd::Shutdown;
                }
                cmd = self.commands.recv() => match cmd {
                    None => {
                        let _ = write.close().await;
                        return PumpEnd::Shutdown;
                    }
                    Some(ChannelCommand::Send(cmd)) => match encode_command(&cmd) {
                        Ok(payload) => {
                            trace!(%payload, "sending frame");
                            if let Err(e) = write.send(Message::Text(payload.into())).await {
                                return PumpEnd::Closed(format!("send failed: {e}"));
                            }
                        }
                        Err(e) => error!(command = ?cmd, error = %e, "failed to encode command"),
                    },
                    Some(ChannelCommand::Retry) => debug!("retry ignored, channel already open"),
                },
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(msg) = decode_logged(text.as_str()) {
                            if !self.emit(ChannelEvent::Message(msg)).await {
                                return PumpEnd::Shutdown;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => trace!("binary frame ignored"),
                    Some(Ok(Message::Close(frame))) => {
                        return PumpEnd::Closed(format!("closed by device: {frame:?}"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpEnd::Closed(e.to_string()),
                    None => return PumpEnd::Closed("stream ended".to_string()),
                },
            }
        }
    }

    fn publish(&self, status: ChannelStatus) {
        self.status.send_replace(status);
    }

    async fn emit(&self, event: ChannelEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Resolves once `close` was called or every handle is gone.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn drop_unsent(cmd: &OutboundCommand) {
    warn!(command = ?cmd, "channel not connected, cannot send command");
}

fn decode_logged(text: &str) -> Option<InboundMessage> {
    match decode_frame(text) {
        Ok(msg) => {
            debug!(kind = msg.tag(), "frame received");
            Some(msg)
        }
        Err(DecodeError::UnknownTag(tag)) => {
            warn!(%tag, "no handler for message type");
            None
        }
        Err(e) => {
            error!(error = %e, "dropping undecodable frame");
            None
        }
    }
}

#[cfg(test)]
pub(crate) struct Detached {
    pub commands: mpsc::Receiver<ChannelCommand>,
    pub status: watch::Sender<ChannelStatus>,
    pub shutdown: watch::Receiver<bool>,
}

#[cfg(test)]
pub(crate) fn detached_handle(queue: usize) -> (ChannelHandle, Detached) {
    let (tx, commands) = mpsc::channel(queue);
    let (status_tx, status_rx) = watch::channel(ChannelStatus::Closed);
    let (shutdown_tx, shutdown) = watch::channel(false);
    (
        ChannelHandle {
            tx,
            status: status_rx,
            shutdown: Arc::new(shutdown_tx),
        },
        Detached {
            commands,
            status: status_tx,
            shutdown,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear_and_bounded() {
        let mut b = Backoff::new(ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        });
        let delays: Vec<u64> = std::iter::from_fn(|| b.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 3000, 4000, 5000]);
        assert_eq!(b.attempts, 5);
        assert!(b.next_delay().is_none());
        assert_eq!(b.attempts, 5, "counter stops at the ceiling");
    }

    #[test]
    fn backoff_reset_restarts_the_ramp() {
        let mut b = Backoff::new(ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_attempts: 2,
        });
        assert_eq!(b.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(b.next_delay(), Some(Duration::from_millis(20)));
        b.reset();
        assert_eq!(b.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn send_while_not_open_is_dropped_without_side_effects() {
        let (handle, mut link) = detached_handle(4);
        for s in [ChannelStatus::Closed, ChannelStatus::Connecting] {
            link.status.send_replace(s);
            assert!(!handle.send(OutboundCommand::ToggleMute));
            assert_eq!(handle.status(), s);
        }
        assert!(link.commands.try_recv().is_err());
    }

    #[test]
    fn send_while_open_reaches_the_link() {
        let (handle, mut link) = detached_handle(4);
        link.status.send_replace(ChannelStatus::Open);
        assert!(handle.send(OutboundCommand::GetCurrentEq));
        assert!(matches!(
            link.commands.try_recv(),
            Ok(ChannelCommand::Send(OutboundCommand::GetCurrentEq))
        ));
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (handle, link) = detached_handle(1);
        link.status.send_replace(ChannelStatus::Open);
        assert!(handle.send(OutboundCommand::ToggleDucking));
        assert!(!handle.send(OutboundCommand::ToggleFeedback));
    }

    #[test]
    fn close_gets_through_a_full_queue() {
        let (handle, mut link) = detached_handle(1);
        link.status.send_replace(ChannelStatus::Open);
        assert!(handle.send(OutboundCommand::ToggleDucking));
        handle.clone().close();
        assert!(*link.shutdown.borrow_and_update());
        assert!(matches!(link.commands.try_recv(), Ok(ChannelCommand::Send(_))));
    }

    #[tokio::test]
    async fn parked_manager_stops_on_close_with_queue_full() {
        let endpoint = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_attempts: 0,
        };
        let (manager, handle, mut events) = ChannelManager::new(endpoint, policy, 1);
        let task = tokio::spawn(manager.run());

        loop {
            match events.recv().await {
                Some(ChannelEvent::GaveUp { .. }) => break,
                Some(_) => {}
                None => panic!("manager ended before giving up"),
            }
        }
        // Fill the one-slot queue before asking for shutdown.
        let _ = handle.tx.try_send(ChannelCommand::Send(OutboundCommand::ToggleMute));
        let _ = handle.tx.try_send(ChannelCommand::Send(OutboundCommand::ToggleMute));
        handle.close();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("manager ignored close")
            .unwrap();
        assert_eq!(handle.status(), ChannelStatus::Closed);
    }
}
