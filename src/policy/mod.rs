//! Policy state synchronization.
//!
//! Every replica periodically recomputes the authorization dataset and
//! PUTs it to the policy engine. There is deliberately no leader gating:
//! pushes are idempotent full overwrites, so the only cost of N replicas
//! syncing is N-1 redundant network calls, which is cheaper than the
//! coordination needed to avoid them.

pub mod snapshot;

pub use snapshot::PolicySnapshot;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::context::CoordContext;
use crate::error::Result;

/// Outcome of one synchronization cycle, surfaced on the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub at: DateTime<Utc>,
    pub collaborators_pushed: bool,
    pub projects_pushed: bool,
    pub collaborator_count: usize,
    pub project_count: usize,
}

impl SyncReport {
    pub fn fully_pushed(&self) -> bool {
        self.collaborators_pushed && self.projects_pushed
    }
}

/// Periodically pushes the full policy snapshot to the engine. Nothing in
/// a cycle is ever fatal to the owning process: store errors skip the
/// cycle, push errors are recorded per endpoint, and the loop always
/// reaches the next tick.
pub struct PolicySynchronizer {
    ctx: Arc<CoordContext>,
    http: reqwest::Client,
    report_tx: watch::Sender<Option<SyncReport>>,
}

impl PolicySynchronizer {
    /// Build a synchronizer plus a watch handle over the last cycle's
    /// report for the status surface.
    pub fn new(ctx: Arc<CoordContext>) -> (Self, watch::Receiver<Option<SyncReport>>) {
        let (report_tx, report_rx) = watch::channel(None);
        let synchronizer = Self {
            ctx,
            http: reqwest::Client::new(),
            report_tx,
        };
        (synchronizer, report_rx)
    }

    /// Run sync cycles on the configured interval until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.ctx.config.policy_sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.sync_cycle().await {
                        Ok(report) => {
                            if !report.fully_pushed() {
                                tracing::warn!(
                                    collaborators_pushed = report.collaborators_pushed,
                                    projects_pushed = report.projects_pushed,
                                    "Policy sync cycle partially failed"
                                );
                            }
                            let _ = self.report_tx.send(Some(report));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Policy sync cycle skipped");
                        }
                    }
                }
            }
        }
    }

    /// One full cycle: recompute the snapshot, then push both documents.
    pub async fn sync_cycle(&self) -> Result<SyncReport> {
        let snapshot = PolicySnapshot::compute(self.ctx.pool()).await?;
        Ok(self.push(&snapshot).await)
    }

    /// Push both documents to their endpoints. The two PUTs are
    /// independent: a collaborators failure must not prevent the projects
    /// attempt, so each failure is absorbed into the report.
    pub async fn push(&self, snapshot: &PolicySnapshot) -> SyncReport {
        let collaborators_pushed = self
            .put_document(
                &self.ctx.config.collaborators_endpoint(),
                &snapshot.collaborators_document(),
            )
            .await;
        let projects_pushed = self
            .put_document(
                &self.ctx.config.projects_endpoint(),
                &snapshot.projects_document(),
            )
            .await;

        SyncReport {
            at: Utc::now(),
            collaborators_pushed,
            projects_pushed,
            collaborator_count: snapshot.collaborators.len(),
            project_count: snapshot.projects.len(),
        }
    }

    async fn put_document(&self, url: &str, document: &Value) -> bool {
        match self.http.put(url).json(document).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(url, status = %response.status(), "Policy engine rejected push");
                false
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "Policy engine unreachable");
                false
            }
        }
    }
}
