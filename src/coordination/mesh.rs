//! Peer mesh builder: connects every pair of ready nodes

use crate::chain::ChainDescriptor;
use crate::error::{MeshError, MeshResult};

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which side issued the peering call that produced a pair's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerDirection {
    /// The lower-indexed chain added the higher-indexed one
    Forward,
    /// The fallback: the higher-indexed chain added the lower-indexed one
    Reverse,
}

impl fmt::Display for PeerDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerDirection::Forward => write!(f, "forward"),
            PeerDirection::Reverse => write!(f, "reverse"),
        }
    }
}

/// Result of peering one unordered pair of chains
#[derive(Debug)]
pub struct PairOutcome {
    /// Indices of the pair, lower first
    pub pair: (usize, usize),
    /// Chain that issued the final call
    pub from: String,
    /// Chain that was added as a peer
    pub to: String,
    pub direction: PeerDirection,
    /// The boolean the node reported, or the error of the last attempt
    pub result: MeshResult<bool>,
}

impl PairOutcome {
    pub fn is_peered(&self) -> bool {
        matches!(self.result, Ok(true))
    }
}

/// Connects every unordered pair of chains exactly once
pub struct PeerMeshBuilder {
    chains: Vec<Arc<ChainDescriptor>>,
}

impl PeerMeshBuilder {
    pub fn new(chains: Vec<Arc<ChainDescriptor>>) -> Self {
        Self { chains }
    }

    /// Peer pairs in order (0,1), (0,2), ..., (1,2), ...
    ///
    /// Every chain must already know its enode. Individual pair failures are
    /// logged and reported in the outcomes, never returned as errors.
    pub async fn connect_all(&self) -> MeshResult<Vec<PairOutcome>> {
        if let Some(chain) = self.chains.iter().find(|c| !c.is_ready()) {
            return Err(MeshError::Internal(format!(
                "chain {} has no enode; peering requires every chain to be ready",
                chain.identity()
            )));
        }

        let mut outcomes = Vec::new();
        for i in 0..self.chains.len() {
            for j in (i + 1)..self.chains.len() {
                outcomes.push(self.connect_pair(i, j).await);
            }
        }

        let peered = outcomes.iter().filter(|o| o.is_peered()).count();
        info!(
            "Peer mesh complete: {}/{} pairs connected",
            peered,
            outcomes.len()
        );

        Ok(outcomes)
    }

    async fn connect_pair(&self, i: usize, j: usize) -> PairOutcome {
        let (a, b) = (&self.chains[i], &self.chains[j]);

        let (direction, from, to, result) = match add_peer(a, b).await {
            Ok(added) => (PeerDirection::Forward, a, b, Ok(added)),
            Err(e) => {
                warn!(
                    "Chain {} failed to add {}: {}; trying reverse direction",
                    a.identity(),
                    b.identity(),
                    e
                );
                (PeerDirection::Reverse, b, a, add_peer(b, a).await)
            }
        };

        match &result {
            Ok(true) => info!("Peered {} -> {} ({})", from.identity(), to.identity(), direction),
            Ok(false) => warn!(
                "Chain {} reported false adding {} ({})",
                from.identity(),
                to.identity(),
                direction
            ),
            Err(e) => warn!(
                "Failed to peer {} and {}: {}",
                a.identity(),
                b.identity(),
                e
            ),
        }
        crate::metrics::record_peering(direction, &result);

        PairOutcome {
            pair: (i, j),
            from: from.identity().to_string(),
            to: to.identity().to_string(),
            direction,
            result,
        }
    }
}

/// Ask `from` to add `to` as a peer using `from`'s vendor convention
pub async fn add_peer(from: &ChainDescriptor, to: &ChainDescriptor) -> MeshResult<bool> {
    let enode = to
        .enode()
        .ok_or_else(|| MeshError::Internal(format!("chain {} has no enode", to.identity())))?;

    let vendor = from.vendor();
    let address = vendor.peer_address(enode);
    let method = vendor.methods().add_peer;

    debug!("{} {}({})", from.identity(), method, address);

    from.client()
        .call_bool(method, vec![Value::String(address.to_string())])
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::descriptor;
    use crate::chain::NodeVendor;
    use crate::rpc::MockRpcTransport;
    use serde_json::json;
    use std::sync::Mutex;

    type CallLog = Arc<Mutex<Vec<String>>>;

    /// A ready chain whose add-peer calls are recorded in `log`. Calls whose
    /// target starts with any of `failing` return a transport error.
    fn peer_chain(
        name: &'static str,
        vendor: NodeVendor,
        enode: &str,
        log: &CallLog,
        failing: &[&'static str],
    ) -> Arc<ChainDescriptor> {
        let log = log.clone();
        let failing = failing.to_vec();

        let mut transport = MockRpcTransport::new();
        transport.expect_request().returning(move |method, params| {
            let target = params[0].as_str().unwrap_or_default().to_string();
            log.lock()
                .unwrap()
                .push(format!("{}:{}:{}", name, method, target));

            if failing.iter().any(|f| target.starts_with(f)) {
                Err(MeshError::RpcTransport {
                    endpoint: name.to_string(),
                    method: method.to_string(),
                    message: "connection reset".to_string(),
                })
            } else {
                Ok(json!(true))
            }
        });

        let chain = descriptor(name, vendor, transport);
        assert!(chain.set_enode(enode.to_string()));
        Arc::new(chain)
    }

    #[tokio::test]
    async fn test_peers_every_pair_in_order() {
        let log = CallLog::default();
        let chains = vec![
            peer_chain("a", NodeVendor::Geth, "enode://a@h:1", &log, &[]),
            peer_chain("b", NodeVendor::Geth, "enode://b@h:2", &log, &[]),
            peer_chain("c", NodeVendor::Geth, "enode://c@h:3", &log, &[]),
        ];

        let outcomes = PeerMeshBuilder::new(chains).connect_all().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:admin_addPeer:enode://b@h:2",
                "a:admin_addPeer:enode://c@h:3",
                "b:admin_addPeer:enode://c@h:3",
            ]
        );
        let pairs: Vec<_> = outcomes.iter().map(|o| o.pair).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2)]);
        assert!(outcomes.iter().all(|o| o.is_peered()));
        assert!(outcomes.iter().all(|o| o.direction == PeerDirection::Forward));
    }

    #[tokio::test]
    async fn test_failed_pair_falls_back_once_in_reverse() {
        let log = CallLog::default();
        let chains = vec![
            peer_chain("a", NodeVendor::Geth, "enode://a@h:1", &log, &["enode://b"]),
            peer_chain("b", NodeVendor::Geth, "enode://b@h:2", &log, &[]),
            peer_chain("c", NodeVendor::Geth, "enode://c@h:3", &log, &[]),
        ];

        let outcomes = PeerMeshBuilder::new(chains).connect_all().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:admin_addPeer:enode://b@h:2",
                "b:admin_addPeer:enode://a@h:1",
                "a:admin_addPeer:enode://c@h:3",
                "b:admin_addPeer:enode://c@h:3",
            ]
        );
        assert_eq!(outcomes[0].direction, PeerDirection::Reverse);
        assert_eq!(outcomes[0].from, "b");
        assert_eq!(outcomes[0].to, "a");
        assert!(outcomes[0].is_peered());
    }

    #[tokio::test]
    async fn test_double_failure_moves_on_to_next_pair() {
        let log = CallLog::default();
        let chains = vec![
            peer_chain("a", NodeVendor::Geth, "enode://a@h:1", &log, &["enode://b"]),
            peer_chain("b", NodeVendor::Geth, "enode://b@h:2", &log, &["enode://a"]),
            peer_chain("c", NodeVendor::Geth, "enode://c@h:3", &log, &[]),
        ];

        let outcomes = PeerMeshBuilder::new(chains).connect_all().await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 4);
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[0].direction, PeerDirection::Reverse);
        assert!(outcomes[1].is_peered());
        assert!(outcomes[2].is_peered());
    }

    #[tokio::test]
    async fn test_parity_strips_query_from_target() {
        let log = CallLog::default();
        let chains = vec![
            peer_chain("p", NodeVendor::Parity, "enode://p@h:1?discport=0", &log, &[]),
            peer_chain("g", NodeVendor::Geth, "enode://g@h:2?discport=0", &log, &[]),
        ];

        PeerMeshBuilder::new(chains).connect_all().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["p:parity_addReservedPeer:enode://g@h:2"]
        );
    }

    #[tokio::test]
    async fn test_reverse_uses_callers_vendor() {
        let log = CallLog::default();
        let chains = vec![
            peer_chain("g", NodeVendor::Geth, "enode://g@h:1?discport=0", &log, &["enode://p"]),
            peer_chain("p", NodeVendor::Parity, "enode://p@h:2?discport=0", &log, &[]),
        ];

        PeerMeshBuilder::new(chains).connect_all().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "g:admin_addPeer:enode://p@h:2?discport=0",
                "p:parity_addReservedPeer:enode://g@h:1",
            ]
        );
    }

    #[tokio::test]
    async fn test_requires_all_chains_ready() {
        let log = CallLog::default();
        let ready = peer_chain("a", NodeVendor::Geth, "enode://a@h:1", &log, &[]);
        let pending = Arc::new(descriptor("b", NodeVendor::Geth, MockRpcTransport::new()));

        let err = PeerMeshBuilder::new(vec![ready, pending])
            .connect_all()
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Internal(_)));
        assert!(log.lock().unwrap().is_empty());
    }
}
