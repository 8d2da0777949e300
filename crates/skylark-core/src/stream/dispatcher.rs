//! StreamDispatcher -- the single task owning the streaming connection.
//!
//! Connects, joins every channel in the desired [`SubscriptionSet`], then
//! selects over three sources: inbound frames, subscription changes and
//! cancellation. Subscription changes are applied incrementally over the live
//! socket. On disconnect it reconnects with capped exponential backoff and
//! rejoins the current set; only an authentication failure ends the loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use skylark_types::error::TransportError;
use skylark_types::event::StreamEvent;
use skylark_types::subscription::{Channel, SubscriptionSet};

use super::backoff::Backoff;
use super::dedup::DedupCache;
use super::frame;
use super::workers::WorkerPool;
use crate::subscription::SubscriptionManager;
use crate::transport::stream::{StreamConnection, StreamConnector};

/// Connection state shared with the command interpreter.
#[derive(Debug, Default)]
pub struct StreamStatus {
    connected: AtomicBool,
    reconnects: AtomicU64,
    joined: Mutex<Vec<Channel>>,
}

impl StreamStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Channels joined on the live connection.
    pub fn joined(&self) -> Vec<Channel> {
        self.joined.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_joined(&self, channels: Vec<Channel>) {
        *self.joined.lock().unwrap_or_else(|e| e.into_inner()) = channels;
    }
}

/// Channels joined on the current connection, by channel and by wire id.
#[derive(Default)]
struct Joined {
    ids: BTreeMap<Channel, String>,
    channels: HashMap<String, Channel>,
}

impl Joined {
    fn insert(&mut self, channel: Channel, id: String) {
        self.channels.insert(id.clone(), channel.clone());
        self.ids.insert(channel, id);
    }

    fn remove(&mut self, channel: &Channel) -> Option<String> {
        let id = self.ids.remove(channel)?;
        self.channels.remove(&id);
        Some(id)
    }
}

enum SessionEnd {
    Cancelled,
    Closed,
}

pub struct StreamDispatcher<C: StreamConnector> {
    connector: C,
    subscriptions: Arc<SubscriptionManager>,
    dedup: Arc<DedupCache>,
    workers: Arc<WorkerPool>,
    status: Arc<StreamStatus>,
    cancel: CancellationToken,
    backoff: Backoff,
    /// The bot's own account id; its events are ignored.
    self_id: Option<String>,
    dump_events: bool,
}

impl<C: StreamConnector> StreamDispatcher<C> {
    pub fn new(
        connector: C,
        subscriptions: Arc<SubscriptionManager>,
        dedup: Arc<DedupCache>,
        workers: Arc<WorkerPool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            subscriptions,
            dedup,
            workers,
            status: Arc::new(StreamStatus::default()),
            cancel,
            backoff: Backoff::default(),
            self_id: None,
            dump_events: false,
        }
    }

    pub fn with_self_id(mut self, id: impl Into<String>) -> Self {
        self.self_id = Some(id.into());
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_event_dump(mut self, enabled: bool) -> Self {
        self.dump_events = enabled;
        self
    }

    /// Report into an existing status handle instead of a private one.
    pub fn with_status(mut self, status: Arc<StreamStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> Arc<StreamStatus> {
        self.status.clone()
    }

    /// Run until cancelled. Returns an error only for failures that retrying
    /// cannot fix (authentication).
    pub async fn run(mut self) -> Result<(), TransportError> {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(conn) => {
                    self.backoff.reset();
                    info!("stream connected");
                    match self.session(conn).await {
                        Ok(SessionEnd::Cancelled) => break,
                        Ok(SessionEnd::Closed) => warn!("stream closed by remote"),
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "stream authentication failed, giving up");
                            return Err(e);
                        }
                        Err(e) => warn!(error = %e, "stream session failed"),
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "stream authentication failed, giving up");
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "stream connect failed"),
            }

            self.status.connected.store(false, Ordering::Relaxed);
            self.status.set_joined(Vec::new());
            let delay = self.backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.status.reconnects.fetch_add(1, Ordering::Relaxed);
        }

        self.status.connected.store(false, Ordering::Relaxed);
        info!("stream dispatcher stopped");
        Ok(())
    }

    async fn session(&self, mut conn: C::Connection) -> Result<SessionEnd, TransportError> {
        let mut joined = Joined::default();
        let mut desired_rx = self.subscriptions.watch();
        let mut watching = true;

        let desired = desired_rx.borrow_and_update().clone();
        self.resync(&mut conn, &mut joined, &desired).await?;
        self.status.connected.store(true, Ordering::Relaxed);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    conn.close().await;
                    return Ok(SessionEnd::Cancelled);
                }
                changed = desired_rx.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let desired = desired_rx.borrow_and_update().clone();
                    self.resync(&mut conn, &mut joined, &desired).await?;
                }
                frame = conn.recv_text() => match frame {
                    None => return Ok(SessionEnd::Closed),
                    Some(Err(e)) => return Err(e),
                    Some(Ok(text)) => self.on_frame(&text, &joined).await,
                },
            }
        }
    }

    /// Leave channels no longer desired and join new ones. Unaffected
    /// channels stay joined.
    async fn resync(
        &self,
        conn: &mut C::Connection,
        joined: &mut Joined,
        desired: &SubscriptionSet,
    ) -> Result<(), TransportError> {
        let wanted = desired.channels();
        let stale: Vec<Channel> = joined
            .ids
            .keys()
            .filter(|c| !wanted.contains(c))
            .cloned()
            .collect();

        for channel in &stale {
            if let Some(id) = joined.remove(channel) {
                conn.send_text(frame::disconnect_frame(&id)).await?;
            }
        }

        let mut added = 0;
        for channel in wanted {
            if joined.ids.contains_key(&channel) {
                continue;
            }
            let id = Uuid::now_v7().to_string();
            conn.send_text(frame::connect_frame(&id, &channel)).await?;
            debug!(channel = %channel, id = %id, "joined channel");
            joined.insert(channel, id);
            added += 1;
        }

        if added > 0 || !stale.is_empty() {
            info!(added, removed = stale.len(), "stream channels synchronized");
        }
        self.status.set_joined(joined.ids.keys().cloned().collect());
        Ok(())
    }

    async fn on_frame(&self, text: &str, joined: &Joined) {
        let event = match frame::decode(text, &joined.channels) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        if self.dump_events {
            debug!(?event, "stream event");
        }

        if let StreamEvent::Unknown { channel, kind } = &event {
            debug!(channel = %channel, kind = %kind, "ignoring unhandled stream event");
            return;
        }
        if let (Some(author), Some(self_id)) = (event.author(), self.self_id.as_deref()) {
            if author.id == self_id {
                return;
            }
        }
        if let Some(key) = event.dedup_key() {
            if !self.dedup.observe(&key) {
                debug!(key = %key, "duplicate event suppressed");
                return;
            }
        }
        self.workers.dispatch(event).await;
    }
}
