use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::context::CoordContext;
use crate::election::jitter::jittered_claim_interval;
use crate::election::LeaderElector;
use crate::gateway::BroadcastHub;
use crate::listener::ChangeListener;
use crate::policy::PolicySynchronizer;
use crate::status::{run_status_server, StatusState};

/// One coordination replica: wires the elector, listener, and policy
/// synchronizer together around a shared context and runs them until
/// shutdown.
pub struct CoordNode {
    ctx: Arc<CoordContext>,
    hub: Arc<BroadcastHub>,
    status_addr: Option<SocketAddr>,
}

impl CoordNode {
    pub fn new(ctx: Arc<CoordContext>, status_addr: Option<SocketAddr>) -> Self {
        Self {
            ctx,
            hub: Arc::new(BroadcastHub::new()),
            status_addr,
        }
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        self.hub.clone()
    }

    /// Run the replica:
    ///
    /// 1. One leadership renewal loop per configured singleton duty
    /// 2. The change notification listener
    /// 3. The policy synchronizer
    /// 4. Optionally the status server
    ///
    /// Every loop observes the shutdown token; there is no drain step
    /// because each delivery is independently idempotent.
    pub async fn run(self, shutdown: CancellationToken) {
        let elector = Arc::new(LeaderElector::new(self.ctx.clone()));
        let leadership: Arc<RwLock<HashMap<String, bool>>> = Arc::new(RwLock::new(
            self.ctx
                .config
                .singleton_duties
                .iter()
                .map(|duty| (duty.clone(), false))
                .collect(),
        ));

        for duty in &self.ctx.config.singleton_duties {
            let elector = elector.clone();
            let leadership = leadership.clone();
            let ctx = self.ctx.clone();
            let duty = duty.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                renewal_loop(ctx, elector, duty, leadership, shutdown).await;
            });
        }

        let (listener, listener_state) = ChangeListener::new(self.ctx.clone(), self.hub.clone());
        let listener_shutdown = shutdown.clone();
        tokio::spawn(async move {
            listener.run(listener_shutdown).await;
        });

        let (synchronizer, policy_report) = PolicySynchronizer::new(self.ctx.clone());
        let policy_shutdown = shutdown.clone();
        tokio::spawn(async move {
            synchronizer.run(policy_shutdown).await;
        });

        if let Some(addr) = self.status_addr {
            let state = StatusState {
                cluster_name: self.ctx.config.cluster_name.clone(),
                leadership: leadership.clone(),
                listener_state,
                policy_report,
                hub: self.hub.clone(),
            };
            let status_shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_status_server(addr, state, status_shutdown).await;
            });
        }

        shutdown.cancelled().await;
        tracing::info!("Coordination node stopped");
    }
}

/// Contend for one duty on the claim interval, keeping the shared
/// leadership board current. A replica in an inactive cluster stands down
/// without touching the leadership table.
async fn renewal_loop(
    ctx: Arc<CoordContext>,
    elector: Arc<LeaderElector>,
    duty: String,
    leadership: Arc<RwLock<HashMap<String, bool>>>,
    shutdown: CancellationToken,
) {
    let mut held = false;

    loop {
        let now_held = claim_once(&ctx, &elector, &duty).await;

        if now_held != held {
            if now_held {
                tracing::info!(duty = %duty, "Acquired leadership");
            } else {
                tracing::info!(duty = %duty, "Lost leadership");
            }
        }
        held = now_held;
        leadership.write().await.insert(duty.clone(), held);

        let delay = jittered_claim_interval(ctx.config.claim_interval);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}

async fn claim_once(ctx: &CoordContext, elector: &LeaderElector, duty: &str) -> bool {
    match elector.is_cluster_active(&ctx.config.cluster_name).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(duty, cluster = %ctx.config.cluster_name, "Cluster inactive, standing down");
            return false;
        }
        Err(e) => {
            tracing::warn!(duty, error = %e, "Cluster activity check failed");
            return false;
        }
    }

    match elector.try_claim(duty).await {
        Ok(held) => held,
        Err(e) => {
            // Store unavailability means "not leader" until a later claim
            // succeeds.
            tracing::warn!(duty, error = %e, "Leadership claim failed");
            false
        }
    }
}
