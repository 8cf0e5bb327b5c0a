//! Connection supervisor for the push channel.
//!
//! One background task owns the connection. It performs the handshake (open
//! the transport, send a join for the topic), pumps inbound frames onto the
//! notification bus, and on any failure waits out a jittered backoff before
//! trying again. Joins never carry over between connections.
//!
//! Status is published on a `watch` channel. Failed handshakes keep the
//! state at `Connecting` while `retry_count` grows; `session` increases on
//! every successful connect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tallysync_common::{Backoff, BackoffPolicy, EventBus, Subscription};
use tallysync_domain::{
    ConnectionState, ConnectionStatus, NotificationEvent, RealtimeConfig, Result, TallySyncError,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::ports::{RealtimeConnection, RealtimeTransport};
use super::protocol::{self, Inbound};

/// Sessions shorter than this keep growing the reconnect delay.
const STABLE_SESSION: Duration = Duration::from_secs(10);

/// Configuration for the realtime channel.
#[derive(Debug, Clone)]
pub struct RealtimeChannelConfig {
    /// Logical topic joined after every handshake
    pub topic: String,
    /// Upper bound on connect plus join
    pub handshake_timeout: Duration,
    /// Consecutive malformed frames that force a reconnect
    pub malformed_threshold: u32,
    /// Delay schedule between reconnect attempts
    pub backoff: BackoffPolicy,
    /// Join timeout when stopping
    pub join_timeout: Duration,
    /// A session must stay up this long before the reconnect backoff resets
    pub stable_after: Duration,
}

impl RealtimeChannelConfig {
    /// Build from the `realtime` configuration section.
    pub fn from_config(config: &RealtimeConfig) -> Result<Self> {
        let backoff = BackoffPolicy::custom(
            config.backoff.base_delay(),
            config.backoff.multiplier,
            config.backoff.max_delay(),
            config.backoff.jitter,
        )
        .map_err(|e| TallySyncError::Config(format!("realtime.backoff: {e}")))?;

        Ok(Self {
            topic: config.topic.clone(),
            handshake_timeout: config.handshake_timeout(),
            malformed_threshold: config.malformed_threshold.max(1),
            backoff,
            join_timeout: Duration::from_secs(5),
            stable_after: STABLE_SESSION,
        })
    }
}

enum PumpExit {
    Cancelled,
    Lost(String),
}

struct ChannelShared {
    transport: Arc<dyn RealtimeTransport>,
    config: RealtimeChannelConfig,
    status: watch::Sender<ConnectionStatus>,
    notifications: EventBus<NotificationEvent>,
    join_ref: AtomicU64,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Reconnecting push channel.
pub struct RealtimeChannel {
    shared: Arc<ChannelShared>,
    worker: Mutex<Option<Worker>>,
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn RealtimeTransport>, config: RealtimeChannelConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            shared: Arc::new(ChannelShared {
                transport,
                config,
                status,
                notifications: EventBus::new("notifications"),
                join_ref: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Current connection snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Register a notification handler; dropping the handle unsubscribes.
    pub fn subscribe(&self) -> Subscription<NotificationEvent> {
        self.shared.notifications.subscribe()
    }

    pub fn notifications(&self) -> EventBus<NotificationEvent> {
        self.shared.notifications.clone()
    }

    pub fn topic(&self) -> &str {
        &self.shared.config.topic
    }

    /// Start connecting in the background; reconnects until
    /// [`disconnect`](Self::disconnect).
    #[instrument(skip(self), fields(topic = %self.shared.config.topic))]
    pub fn connect(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(TallySyncError::InvalidInput("realtime channel already running".into()));
        }

        let runtime = Handle::try_current().map_err(|_| {
            TallySyncError::Internal("realtime channel requires a Tokio runtime".into())
        })?;

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(Arc::clone(&self.shared).run(cancel.clone()));
        *worker = Some(Worker { cancel, handle });

        info!("Realtime channel started");
        Ok(())
    }

    /// Close the connection and stop reconnecting.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            debug!("Realtime channel not running");
            return Ok(());
        };

        worker.cancel.cancel();
        match tokio::time::timeout(self.shared.config.join_timeout, worker.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Realtime task panicked");
                return Err(TallySyncError::Internal("realtime task panicked".into()));
            }
            Err(_) => {
                warn!("Realtime task did not complete within timeout");
                return Err(TallySyncError::Timeout("realtime channel shutdown".into()));
            }
        }

        info!("Realtime channel stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl ChannelShared {
    /// Apply `update` while moving to `next`, refusing edges outside the
    /// `Disconnected -> Connecting -> Connected -> Disconnected` cycle.
    fn transition(&self, next: ConnectionState, update: impl FnOnce(&mut ConnectionStatus)) -> bool {
        self.status.send_if_modified(|status| {
            if !status.state.can_transition_to(next) {
                warn!(from = %status.state, to = %next, "Refusing illegal connection transition");
                return false;
            }
            status.state = next;
            update(status);
            true
        })
    }

    fn record_failed_handshake(&self, error: String) {
        self.status.send_modify(|status| {
            status.retry_count = status.retry_count.saturating_add(1);
            status.last_error = Some(error);
        });
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            if self.status.borrow().state == ConnectionState::Disconnected {
                self.transition(ConnectionState::Connecting, |_| {});
            }

            let attempt = tokio::select! {
                () = cancel.cancelled() => break,
                attempt = tokio::time::timeout(self.config.handshake_timeout, self.handshake()) => attempt,
            };

            match attempt {
                Ok(Ok(mut connection)) => {
                    let connected_at = Instant::now();
                    self.transition(ConnectionState::Connected, |status| {
                        status.retry_count = 0;
                        status.last_error = None;
                        status.session += 1;
                    });
                    info!(session = self.status.borrow().session, "Realtime channel connected");

                    let exit = self.pump(connection.as_mut(), &cancel).await;
                    if let Err(e) = connection.close().await {
                        debug!(error = %e, "Error closing realtime connection");
                    }

                    let stopped = matches!(exit, PumpExit::Cancelled);
                    let reason = match exit {
                        PumpExit::Cancelled => "channel stopped".to_owned(),
                        PumpExit::Lost(reason) => reason,
                    };
                    warn!(reason = %reason, "Realtime channel disconnected");
                    self.transition(ConnectionState::Disconnected, |status| {
                        status.last_error = Some(reason);
                    });

                    if stopped {
                        break;
                    }
                    // a server that accepts and drops at once must not get base-delay reconnects
                    if connected_at.elapsed() >= self.config.stable_after {
                        backoff.reset();
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Realtime handshake failed");
                    self.record_failed_handshake(e.to_string());
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.handshake_timeout.as_millis(),
                        "Realtime handshake timed out"
                    );
                    self.record_failed_handshake("handshake timed out".into());
                }
            }

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis(), attempt = backoff.attempt(), "Reconnecting after delay");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn handshake(&self) -> Result<Box<dyn RealtimeConnection>> {
        let mut connection = self.transport.connect().await?;
        let reference = self.join_ref.fetch_add(1, Ordering::Relaxed) + 1;
        connection.send(protocol::encode_join(&self.config.topic, reference)).await?;
        debug!(topic = %self.config.topic, reference, "Joined realtime topic");
        Ok(connection)
    }

    async fn pump(&self, connection: &mut dyn RealtimeConnection, cancel: &CancellationToken) -> PumpExit {
        let mut malformed = 0u32;

        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => return PumpExit::Cancelled,
                frame = connection.recv() => frame,
            };

            let text = match frame {
                None => return PumpExit::Lost("connection closed by server".into()),
                Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                Some(Ok(text)) => text,
            };

            match protocol::decode(&text, &self.config.topic) {
                Ok(Inbound::Notification(event)) => {
                    malformed = 0;
                    debug!(kind = %event.kind, "Notification received");
                    self.notifications.publish(event);
                }
                Ok(Inbound::Control) => {
                    malformed = 0;
                    trace!("Control frame consumed");
                }
                Ok(Inbound::UnknownEvent(kind)) => {
                    malformed = 0;
                    warn!(kind = %kind, "Ignoring unrecognized event kind");
                }
                Ok(Inbound::ForeignTopic(topic)) => {
                    malformed = 0;
                    debug!(topic = %topic, "Ignoring event for another topic");
                }
                Err(e) => {
                    malformed += 1;
                    warn!(error = %e, consecutive = malformed, "Dropping malformed frame");
                    if malformed >= self.config.malformed_threshold {
                        return PumpExit::Lost(format!("{malformed} consecutive malformed frames"));
                    }
                }
            }
        }
    }
}
