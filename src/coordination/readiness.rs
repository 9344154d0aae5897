//! Readiness polling: wait until every node reports its enode address

use crate::chain::{ChainDescriptor, IdentityShape};
use crate::error::{MeshError, MeshResult};
use crate::process::shutdown_requested;

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How polling ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every chain has an enode address
    AllKnown,
    /// Shutdown was requested first
    Cancelled,
}

/// Polls chains on a fixed interval until all of them are ready
pub struct ReadinessPoller {
    chains: Vec<Arc<ChainDescriptor>>,
    interval: Duration,
    deadline: Option<Duration>,
}

impl ReadinessPoller {
    pub fn new(chains: Vec<Arc<ChainDescriptor>>, interval: Duration) -> Self {
        Self {
            chains,
            interval,
            deadline: None,
        }
    }

    /// Give up after `deadline`. Without one, polling continues for as long
    /// as the run lasts.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Number of chains still without an enode address
    pub fn pending_count(&self) -> usize {
        self.chains.iter().filter(|c| !c.is_ready()).count()
    }

    /// Query every chain that is not ready yet, once. Returns how many are
    /// still pending afterwards. Query failures are logged and left for the
    /// next tick.
    pub async fn poll_once(&self) -> usize {
        let pending = self.chains.iter().filter(|c| !c.is_ready());

        // Results are recorded per chain as each query returns
        join_all(pending.map(|chain| poll_chain(chain))).await;

        let remaining = self.pending_count();
        crate::metrics::record_nodes_ready(self.chains.len() - remaining);
        remaining
    }

    /// Block until every chain is ready, shutdown is requested, or the
    /// deadline (if any) passes.
    pub async fn wait_all_known(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> MeshResult<Readiness> {
        let poll = async {
            let started = Instant::now();
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let remaining = self.poll_once().await;
                if remaining == 0 {
                    info!("All {} chains are ready", self.chains.len());
                    return Ok(Readiness::AllKnown);
                }
                debug!("{} of {} chains still pending", remaining, self.chains.len());

                if let Some(deadline) = self.deadline {
                    if started.elapsed() >= deadline {
                        return Err(MeshError::Timeout {
                            operation: format!("{} chains to report their enode", remaining),
                        });
                    }
                }
            }
        };

        tokio::select! {
            result = poll => result,
            _ = shutdown_requested(&mut shutdown) => {
                info!("Readiness polling cancelled");
                Ok(Readiness::Cancelled)
            }
        }
    }
}

/// Query one chain and record its enode if it answered
async fn poll_chain(chain: &ChainDescriptor) {
    match fetch_enode(chain).await {
        Ok(enode) => {
            if chain.set_enode(enode) {
                info!(
                    "Chain {} is ready: {}",
                    chain.identity(),
                    chain.enode().unwrap_or_default()
                );
                crate::metrics::record_readiness_poll(chain.identity(), true);
            }
        }
        Err(e) => {
            if e.is_retryable() {
                warn!("Chain {} not ready yet: {}", chain.identity(), e);
            } else {
                error!("Chain {} enode query failed: {}", chain.identity(), e);
            }
            crate::metrics::record_readiness_poll(chain.identity(), false);
        }
    }
}

/// Ask a node for its enode address using its vendor's method
pub async fn fetch_enode(chain: &ChainDescriptor) -> MeshResult<String> {
    let methods = chain.vendor().methods();
    let client = chain.client();

    let enode = match methods.identity_shape {
        IdentityShape::EnodeField => {
            let info = client.call_map(methods.identity, vec![]).await?;
            match info.get("enode") {
                Some(Value::String(enode)) => enode.clone(),
                Some(other) => {
                    return Err(MeshError::RpcTypeMismatch {
                        method: methods.identity.to_string(),
                        expected: "string enode field",
                        found: other.to_string(),
                    })
                }
                None => String::new(),
            }
        }
        IdentityShape::Direct => client.call_string(methods.identity, vec![]).await?,
    };

    if enode.is_empty() {
        return Err(MeshError::RpcEmptyResult {
            endpoint: client.endpoint(),
            method: methods.identity.to_string(),
        });
    }

    Ok(enode)
}
