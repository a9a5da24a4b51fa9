//! Cluster membership
//!
//! The node sees the cluster through [`Membership`]: who is a member, the
//! log of node sets per epoch, and how main-stage work reaches the other
//! nodes. [`StaticMembership`] is a fixed, in-process view.

use crate::request::Request;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use vdisk_common::{Epoch, Node, OpResult, ResultCode};

/// Node set of one epoch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochLog {
    pub epoch: Epoch,
    pub nodes: Vec<Node>,
    /// When the epoch was logged, seconds since the epoch
    pub timestamp: i64,
}

/// Membership provider
pub trait Membership: Send + Sync {
    /// This node
    fn local_node(&self) -> Node;

    /// Current members
    fn nodes(&self) -> Vec<Node>;

    /// Logged node set of `epoch`
    ///
    /// Fails with [`ResultCode::NoObject`] for an epoch never logged.
    fn epoch_log(&self, epoch: Epoch) -> OpResult<EpochLog>;

    /// Record `nodes` as the node set of `epoch`
    fn log_epoch(&self, epoch: Epoch, nodes: &[Node]) -> OpResult;

    /// Forget the log of `epoch`
    fn remove_epoch(&self, epoch: Epoch) -> OpResult;

    /// Highest logged epoch, 0 when none
    fn latest_epoch(&self) -> Epoch;

    /// Hand a completed cluster operation to every other node
    ///
    /// Receivers run it through their dispatcher's remote main entry.
    fn broadcast_main(&self, _req: &Request) {}
}

/// Fixed membership with an in-memory epoch log
#[derive(Debug)]
pub struct StaticMembership {
    local: Node,
    nodes: RwLock<Vec<Node>>,
    log: RwLock<BTreeMap<Epoch, EpochLog>>,
}

impl StaticMembership {
    /// Single-node cluster made of `local`
    #[must_use]
    pub fn new(local: Node) -> Self {
        Self {
            nodes: RwLock::new(vec![local.clone()]),
            local,
            log: RwLock::new(BTreeMap::new()),
        }
    }

    /// Replace the member list
    pub fn set_nodes(&self, nodes: Vec<Node>) {
        *self.nodes.write() = nodes;
    }
}

impl Membership for StaticMembership {
    fn local_node(&self) -> Node {
        self.local.clone()
    }

    fn nodes(&self) -> Vec<Node> {
        self.nodes.read().clone()
    }

    fn epoch_log(&self, epoch: Epoch) -> OpResult<EpochLog> {
        self.log
            .read()
            .get(&epoch)
            .cloned()
            .ok_or(ResultCode::NoObject)
    }

    fn log_epoch(&self, epoch: Epoch, nodes: &[Node]) -> OpResult {
        debug!("logging epoch {} with {} nodes", epoch, nodes.len());
        self.log.write().insert(
            epoch,
            EpochLog {
                epoch,
                nodes: nodes.to_vec(),
                timestamp: chrono::Utc::now().timestamp(),
            },
        );
        Ok(())
    }

    fn remove_epoch(&self, epoch: Epoch) -> OpResult {
        debug!("removing epoch {}", epoch);
        self.log.write().remove(&epoch);
        Ok(())
    }

    fn latest_epoch(&self) -> Epoch {
        self.log.read().keys().next_back().copied().unwrap_or(0)
    }
}
