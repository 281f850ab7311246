use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::CoordContext;
use crate::election::jitter::jittered_claim_interval;
use crate::election::lease::{CLAIM_SQL, CLUSTER_ACTIVE_SQL};
use crate::error::Result;

/// Claims and renews singleton duties against the leadership table.
///
/// All replicas run one of these; the store's atomic upsert decides which
/// replica holds each duty. A failed claim is a normal negative result,
/// not an error. Store unavailability IS an error and callers must treat
/// it as "not leader".
pub struct LeaderElector {
    ctx: Arc<CoordContext>,
}

impl LeaderElector {
    pub fn new(ctx: Arc<CoordContext>) -> Self {
        Self { ctx }
    }

    /// Attempt to become or remain leader for `service_name`.
    ///
    /// Returns true iff, after the upsert, the lease row carries this
    /// replica's identity. With election disabled every caller is leader
    /// and the store is never touched.
    pub async fn try_claim(&self, service_name: &str) -> Result<bool> {
        if self.ctx.config.election_disabled {
            return Ok(true);
        }

        let identity = &self.ctx.config.cluster_name;
        let timeout_secs = self.ctx.config.lease_timeout.as_secs_f64();

        let holder: String = sqlx::query_scalar(CLAIM_SQL)
            .bind(service_name)
            .bind(identity)
            .bind(timeout_secs)
            .fetch_one(self.ctx.pool())
            .await?;

        Ok(holder == *identity)
    }

    /// Per-cycle leadership check for duties that run on a schedule.
    ///
    /// Call once at the top of each work cycle and abort the cycle on
    /// false. A store failure propagates so the caller can fail fast and
    /// let the orchestrator restart it.
    pub async fn assert_leadership(&self, service_name: &str) -> Result<bool> {
        let leader = self.try_claim(service_name).await?;
        if !leader {
            tracing::debug!(service_name, "Not the leader, skipping cycle");
        }
        Ok(leader)
    }

    /// Claim in a loop until leadership is acquired, for processes whose
    /// entire purpose is the singleton duty. Store failures are logged and
    /// retried; the loop only gives up when `shutdown` fires, returning
    /// false.
    pub async fn block_until_leader(
        &self,
        service_name: &str,
        shutdown: &CancellationToken,
    ) -> bool {
        loop {
            match self.try_claim(service_name).await {
                Ok(true) => {
                    tracing::info!(
                        service_name,
                        identity = %self.ctx.config.cluster_name,
                        "Acquired leadership"
                    );
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(service_name, error = %e, "Leadership claim failed");
                }
            }

            let delay = jittered_claim_interval(self.ctx.config.claim_interval);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return false,
            }
        }
    }

    /// Whether the named cluster is both active and enabled. A missing
    /// cluster row counts as inactive. With election disabled the replica
    /// always considers itself part of an active cluster.
    pub async fn is_cluster_active(&self, cluster_name: &str) -> Result<bool> {
        if self.ctx.config.election_disabled {
            return Ok(true);
        }

        let active: Option<bool> = sqlx::query_scalar(CLUSTER_ACTIVE_SQL)
            .bind(cluster_name)
            .fetch_optional(self.ctx.pool())
            .await?;

        Ok(active.unwrap_or(false))
    }
}
