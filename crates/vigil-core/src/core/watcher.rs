//! WebSocket feed client.
//!
//! `FeedWatcher` owns the socket, the per-agent timers, and the aggregator.
//! Socket frames, fired timers, and shutdown all funnel through one task, so
//! session mutations are serialized without locks. Consumers hold a
//! [`WatcherHandle`] and read whole snapshots from a watch channel.
//!
//! Cancellation follows the usual convention: the handle owns a
//! `CancellationToken`; the run loop `select!`s on it everywhere it waits, and
//! dropping the handle cancels via a drop guard.

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use vigil_types::{ActivitySnapshot, AgentId, ClientMessage, ConnectionState, FeedEvent};

use crate::config::{FeedSettings, ReconnectConfig, TimingConfig};
use crate::core::aggregator::{Aggregator, Effect, Input, TimerFired, TimerKind, Timing};
use crate::core::backoff;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything the watcher needs to run.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub settings: FeedSettings,
    pub timing: TimingConfig,
    pub reconnect: ReconnectConfig,
}

impl WatcherConfig {
    pub fn new(settings: FeedSettings, config: &crate::config::Config) -> Self {
        Self {
            settings,
            timing: config.timing,
            reconnect: config.reconnect,
        }
    }
}

/// Handle to a running feed watcher.
///
/// Dropping the handle cancels the watcher; [`WatcherHandle::shutdown`] does
/// the same but waits until every timer is cancelled and the socket is
/// closed.
pub struct WatcherHandle {
    snapshots: watch::Receiver<ActivitySnapshot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

impl WatcherHandle {
    /// A fresh receiver for the snapshot stream.
    pub fn snapshots(&self) -> watch::Receiver<ActivitySnapshot> {
        self.snapshots.clone()
    }

    /// Stops the watcher and waits for its teardown to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Spawns the feed watcher task and returns its handle.
pub fn spawn(config: WatcherConfig) -> WatcherHandle {
    let cancel = CancellationToken::new();
    let (snapshot_tx, snapshot_rx) = watch::channel(ActivitySnapshot::default());
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let timing = Timing::from(&config.timing);
    let watcher = FeedWatcher {
        config,
        cancel: cancel.clone(),
        snapshot_tx,
        timer_tx,
        timer_rx,
        timers: HashMap::new(),
        aggregator: Aggregator::new(timing),
        state: ConnectionState::Disconnected,
        tenant: None,
    };
    let task = tokio::spawn(watcher.run());

    WatcherHandle {
        snapshots: snapshot_rx,
        cancel: cancel.clone(),
        task,
        _guard: cancel.drop_guard(),
    }
}

enum Outcome {
    /// Teardown requested; do not reconnect.
    Shutdown,
    /// Connection is gone (transport or protocol); reconnect with backoff.
    Retry,
}

enum FrameOutcome {
    Continue,
    /// Server-sent protocol error; drop the connection.
    Fatal,
}

struct FeedWatcher {
    config: WatcherConfig,
    cancel: CancellationToken,
    snapshot_tx: watch::Sender<ActivitySnapshot>,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    timers: HashMap<(AgentId, TimerKind), JoinHandle<()>>,
    aggregator: Aggregator,
    state: ConnectionState,
    tenant: Option<String>,
}

impl FeedWatcher {
    async fn run(mut self) {
        let mut attempts: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);
            let outcome = self.connect_and_drive(&mut attempts).await;
            // The model is never carried across connections.
            self.drop_activity();
            if matches!(outcome, Outcome::Shutdown) {
                break;
            }

            attempts += 1;
            if attempts > self.config.reconnect.max_attempts {
                warn!(attempts, "feed unreachable, giving up after max reconnect attempts");
                break;
            }
            let delay = backoff::delay_for_attempt(
                attempts,
                self.config.reconnect.base(),
                self.config.reconnect.cap(),
            );
            debug!(attempt = attempts, ?delay, "reconnecting after backoff");
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = time::sleep(delay) => {}
            }
        }

        self.drop_activity();
        self.set_state(ConnectionState::Disconnected);
        debug!("feed watcher stopped");
    }

    /// Runs one connection to completion: connect, authenticate, then pump
    /// frames, timers, and heartbeats until the connection dies or teardown.
    async fn connect_and_drive(&mut self, attempts: &mut u32) -> Outcome {
        let url = self.config.settings.url.clone();
        let mut ws: WsStream = tokio::select! {
            () = self.cancel.cancelled() => return Outcome::Shutdown,
            connected = connect_async(url.as_str()) => match connected {
                Ok((ws, _)) => ws,
                Err(err) => {
                    warn!(error = %err, "feed connect failed");
                    self.set_state(ConnectionState::Disconnected);
                    return Outcome::Retry;
                }
            },
        };

        self.set_state(ConnectionState::Authenticating);
        let auth = ClientMessage::Auth {
            token: self.config.settings.token.clone(),
        }
        .to_json();
        if let Err(err) = ws.send(WsMessage::Text(auth)).await {
            warn!(error = %err, "failed to send auth message");
            self.set_state(ConnectionState::Disconnected);
            return Outcome::Retry;
        }

        // interval() panics on zero, which a hand-edited config could produce.
        let ping_every = self.config.timing.ping_interval().max(Duration::from_millis(10));
        let mut heartbeat = time::interval(ping_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    // The one clean close; no reconnect follows.
                    let _ = ws.close(None).await;
                    return Outcome::Shutdown;
                }
                frame = ws.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if matches!(self.handle_frame(&text, attempts), FrameOutcome::Fatal) {
                            let _ = ws.close(None).await;
                            return Outcome::Retry;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("feed connection closed by server");
                        self.set_state(ConnectionState::Disconnected);
                        return Outcome::Retry;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "feed socket error");
                        self.set_state(ConnectionState::Disconnected);
                        return Outcome::Retry;
                    }
                },
                Some(fired) = self.timer_rx.recv() => {
                    self.timers.remove(&(fired.agent_id, fired.kind));
                    let effects = self.aggregator.apply(Input::Timer(fired));
                    self.run_effects(effects);
                    self.publish();
                }
                _ = heartbeat.tick(), if self.state.is_connected() => {
                    if let Err(err) = ws.send(WsMessage::Text(ClientMessage::Ping.to_json())).await {
                        warn!(error = %err, "heartbeat send failed");
                        self.set_state(ConnectionState::Disconnected);
                        return Outcome::Retry;
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, text: &str, attempts: &mut u32) -> FrameOutcome {
        let event: FeedEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping malformed feed frame");
                return FrameOutcome::Continue;
            }
        };

        match event {
            FeedEvent::Authenticated { tenant_id } => {
                info!(tenant = %tenant_id, "feed authenticated");
                self.tenant = Some(tenant_id);
                *attempts = 0;
                self.set_state(ConnectionState::Connected);
                FrameOutcome::Continue
            }
            FeedEvent::Error { message } => {
                warn!(%message, "feed protocol error");
                self.set_state(ConnectionState::Error);
                FrameOutcome::Fatal
            }
            FeedEvent::Pong => {
                debug!("heartbeat pong");
                FrameOutcome::Continue
            }
            FeedEvent::Unknown => {
                debug!("ignoring feed frame with unknown type");
                FrameOutcome::Continue
            }
            event @ (FeedEvent::AgentProcessing { .. }
            | FeedEvent::SkillUsed { .. }
            | FeedEvent::KbUsed { .. }) => {
                let effects = self.aggregator.apply(Input::Feed(event));
                self.run_effects(effects);
                self.publish();
                FrameOutcome::Continue
            }
        }
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Arm {
                    agent_id,
                    kind,
                    epoch,
                    after,
                } => {
                    let tx = self.timer_tx.clone();
                    let task = tokio::spawn(async move {
                        time::sleep(after).await;
                        let _ = tx.send(TimerFired {
                            agent_id,
                            kind,
                            epoch,
                        });
                    });
                    if let Some(previous) = self.timers.insert((agent_id, kind), task) {
                        previous.abort();
                    }
                }
                Effect::Disarm { agent_id, kind } => {
                    if let Some(task) = self.timers.remove(&(agent_id, kind)) {
                        task.abort();
                    }
                }
            }
        }
    }

    /// Cancels every pending timer and rebuilds the model from zero.
    fn drop_activity(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
        // A timer may have fired between arming and aborting; drain the queue
        // so nothing stale crosses into the next connection. Epoch checks in
        // the aggregator make any survivor harmless regardless.
        while self.timer_rx.try_recv().is_ok() {}
        self.aggregator.reset();
        self.tenant = None;
        self.publish();
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "connection state");
            self.state = state;
            self.publish();
        }
    }

    fn publish(&self) {
        self.snapshot_tx
            .send_replace(self.aggregator.snapshot(self.state, self.tenant.as_deref()));
    }
}
