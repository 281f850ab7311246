use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};

use crate::config::Config;
use crate::error::Result;

/// Shared coordination context: the connection pool plus configuration,
/// constructed once at startup and passed to every component. There is no
/// process-wide state; everything that needs store access receives a
/// `&CoordContext` (or a clone of the `Arc` wrapping it).
///
/// The pool serves every short-lived query: leadership claims, event
/// resolution, policy snapshots. The notification listener does NOT draw
/// from it; that connection must block indefinitely and is owned by the
/// listener loop alone.
pub struct CoordContext {
    pub config: Config,
    pool: PgPool,
}

impl CoordContext {
    /// Connect to the coordination store and build the context.
    ///
    /// Pool sizing and the acquire timeout come from the config; a replica
    /// that cannot get a pooled connection quickly should fail the current
    /// cycle rather than hang. Connections are rolled back as they return
    /// to the pool so a resolution task that errored mid-transaction can
    /// never leak transaction state to the next borrower.
    pub async fn connect(config: Config) -> Result<Arc<Self>> {
        let options = PgConnectOptions::from_str(&config.database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .after_release(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("ROLLBACK").await?;
                    Ok(true)
                })
            })
            .connect_with(options)
            .await?;

        Ok(Arc::new(Self { config, pool }))
    }

    /// Build a context around an existing pool. Used by tests.
    pub fn from_pool(config: Config, pool: PgPool) -> Arc<Self> {
        Arc::new(Self { config, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
