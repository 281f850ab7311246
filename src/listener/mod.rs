//! Change notification listener.
//!
//! Maintains a long-lived subscription to the store's notification
//! channels and fans committed state changes out to live client rooms:
//!
//! 1. A writer commits a row and publishes an envelope in one transaction
//! 2. The dedicated subscription connection wakes
//! 3. The envelope is decoded and a resolution task is dispatched
//! 4. The task re-fetches full current state and multicasts it
//!
//! Resolution runs concurrently with continued listening so one slow
//! lookup never blocks the drain. Clients always receive full snapshots,
//! never deltas, so cross-event ordering does not matter: the latest
//! observed state wins.
//!
//! # Components
//!
//! - [`ChangeListener`]: connection state machine and dispatch loop
//! - [`envelope`]: channel names and typed notification payloads
//! - [`resolve`]: per-event state resolution and room fan-out

pub mod envelope;
pub mod resolve;

use std::sync::Arc;

use sqlx::postgres::{PgListener, PgNotification};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::context::CoordContext;
use crate::error::{BeaconError, Result};
use crate::gateway::BroadcastGateway;
use crate::listener::envelope::{Envelope, CONSOLE_CHANNEL, JOB_CHANNEL};
use crate::listener::resolve::{resolve_console_event, resolve_job_event, Resolution};

/// Upper bound on concurrently running resolution tasks. Keeps a burst of
/// notifications from exhausting the connection pool while still letting
/// the listen loop drain without waiting on individual lookups.
const RESOLVER_POOL_SIZE: usize = 32;

/// Connection state of the notification subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Subscribing,
    Listening,
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerState::Disconnected => write!(f, "disconnected"),
            ListenerState::Subscribing => write!(f, "subscribing"),
            ListenerState::Listening => write!(f, "listening"),
        }
    }
}

/// Listens on the job and console channels and dispatches resolution
/// tasks. Restarts its subscription from scratch on any failure; the
/// machine only stops when the shutdown token fires.
pub struct ChangeListener<G: BroadcastGateway> {
    ctx: Arc<CoordContext>,
    gateway: Arc<G>,
    state_tx: watch::Sender<ListenerState>,
    resolver_permits: Arc<Semaphore>,
}

impl<G: BroadcastGateway> ChangeListener<G> {
    /// Build a listener plus a watch handle over its connection state for
    /// the status surface.
    pub fn new(
        ctx: Arc<CoordContext>,
        gateway: Arc<G>,
    ) -> (Self, watch::Receiver<ListenerState>) {
        let (state_tx, state_rx) = watch::channel(ListenerState::Disconnected);
        let listener = Self {
            ctx,
            gateway,
            state_tx,
            resolver_permits: Arc::new(Semaphore::new(RESOLVER_POOL_SIZE)),
        };
        (listener, state_rx)
    }

    /// Run until shutdown. Any error tears the subscription down and a
    /// fresh connection is attempted immediately: reconnects are cheap
    /// relative to any real outage, so no backoff is applied on this
    /// transport.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.listen_once(&shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Notification subscription lost, reconnecting");
                    let _ = self.state_tx.send(ListenerState::Disconnected);
                }
            }
        }
        let _ = self.state_tx.send(ListenerState::Disconnected);
    }

    /// One subscription lifetime: connect, subscribe, then drain
    /// notifications until shutdown (Ok) or a failure (Err).
    async fn listen_once(&self, shutdown: &CancellationToken) -> Result<()> {
        let _ = self.state_tx.send(ListenerState::Subscribing);

        // Dedicated connection, never drawn from the shared pool: it
        // blocks indefinitely between notifications and would starve
        // pooled borrowers. Stays in autocommit; nothing is written here.
        let mut listener = PgListener::connect(&self.ctx.config.database_url).await?;
        listener.listen_all([JOB_CHANNEL, CONSOLE_CHANNEL]).await?;

        let _ = self.state_tx.send(ListenerState::Listening);
        tracing::info!(
            channels = ?[JOB_CHANNEL, CONSOLE_CHANNEL],
            "Subscribed to notification channels"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                notification = listener.try_recv() => {
                    match notification? {
                        Some(n) => self.dispatch(n).await?,
                        // try_recv yields None when the underlying socket
                        // died; surface it so the outer loop rebuilds the
                        // subscription instead of silently resuming.
                        None => return Err(BeaconError::ListenerDisconnected),
                    }
                }
            }
        }
    }

    /// Decode one envelope and spawn its resolution task. Decode failures
    /// propagate and restart the subscription; resolution failures are
    /// absorbed inside the task.
    async fn dispatch(&self, notification: PgNotification) -> Result<()> {
        let envelope =
            match Envelope::decode(notification.channel(), notification.payload())? {
                Some(envelope) => envelope,
                None => {
                    tracing::warn!(
                        channel = notification.channel(),
                        "Notification on unhandled channel, ignoring"
                    );
                    return Ok(());
                }
            };

        let permit = self
            .resolver_permits
            .clone()
            .acquire_owned()
            .await
            .expect("resolver semaphore closed");
        let pool = self.ctx.pool().clone();
        let gateway = self.gateway.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let outcome = match &envelope {
                Envelope::Job(env) => resolve_job_event(&pool, gateway.as_ref(), env).await,
                Envelope::Console(env) => {
                    resolve_console_event(&pool, gateway.as_ref(), env).await
                }
            };
            match outcome {
                Ok(Resolution::Delivered) => {
                    tracing::debug!(entity_id = %envelope.entity_id(), "Event delivered");
                }
                Ok(Resolution::NoSubscribers) => {}
                Ok(Resolution::Missing) => {
                    // The referenced row was superseded or deleted between
                    // notify and resolve. Expected, not an error.
                    tracing::debug!(
                        entity_id = %envelope.entity_id(),
                        "Stale notification dropped"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        entity_id = %envelope.entity_id(),
                        error = %e,
                        "Event resolution failed"
                    );
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(ListenerState::Disconnected.to_string(), "disconnected");
        assert_eq!(ListenerState::Subscribing.to_string(), "subscribing");
        assert_eq!(ListenerState::Listening.to_string(), "listening");
    }

    #[test]
    fn initial_state_is_disconnected() {
        let (tx, rx) = watch::channel(ListenerState::Disconnected);
        assert_eq!(*rx.borrow(), ListenerState::Disconnected);
        drop(tx);
    }
}
