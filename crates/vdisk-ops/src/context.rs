//! Node state shared by every handler

use crate::cache::ObjectCache;
use crate::logging::LogLevelControl;
use crate::membership::Membership;
use crate::sink::StoreSink;
use crate::stats::RequestStats;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use vdisk_block::{VdiIo, VdiTable};
use vdisk_common::{
    ClusterStatus, DEFAULT_COPIES, DEFAULT_OBJECT_SIZE, Epoch, Node, OpResult, ResultCode,
};
use vdisk_store::{ActiveStore, StoreDrivers};

/// Cluster-wide settings and state as known by this node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub status: ClusterStatus,
    pub epoch: Epoch,
    /// Format time; 0 until the cluster is formatted
    pub ctime: u64,
    pub nr_copies: u8,
    pub copy_policy: u8,
    pub flags: u16,
    /// Store driver selected at format time
    pub store: String,
    pub block_size_shift: u8,
}

impl ClusterInfo {
    /// Whether the cluster was ever formatted
    #[must_use]
    pub const fn is_formatted(&self) -> bool {
        self.ctime != 0
    }

    /// Result code non-forced operations get in the current status
    pub const fn serving(&self) -> OpResult {
        match self.status {
            ClusterStatus::Ok => Ok(()),
            ClusterStatus::Wait if self.is_formatted() => Err(ResultCode::WaitForJoin),
            ClusterStatus::Wait => Err(ResultCode::WaitForFormat),
            ClusterStatus::Shutdown => Err(ResultCode::Shutdown),
            ClusterStatus::Killed => Err(ResultCode::Killed),
        }
    }
}

/// Static settings of a node
#[derive(Clone, Debug)]
pub struct NodeOptions {
    /// Serve I/O without storing objects
    pub gateway_only: bool,
    pub object_size: u64,
    /// Copies used until the cluster is formatted
    pub default_copies: u8,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            gateway_only: false,
            object_size: DEFAULT_OBJECT_SIZE,
            default_copies: DEFAULT_COPIES,
        }
    }
}

impl From<&vdisk_common::Config> for NodeOptions {
    fn from(config: &vdisk_common::Config) -> Self {
        Self {
            gateway_only: config.node.gateway_only,
            object_size: config.cluster.object_size,
            default_copies: config.cluster.copies,
        }
    }
}

/// Nodes reported recovered, for the latest recovery epoch
#[derive(Debug, Default)]
pub(crate) struct RecoveryTracker {
    pub(crate) epoch: Epoch,
    pub(crate) recovered: Vec<Node>,
}

impl RecoveryTracker {
    /// Whether exactly `members` reported in
    pub(crate) fn covers(&self, members: &[Node]) -> bool {
        members.len() == self.recovered.len()
            && members
                .iter()
                .all(|m| self.recovered.iter().any(|n| n.id == m.id))
    }
}

/// Recovery progress of the cluster as seen by this node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryState {
    /// Latest epoch a node reported recovery for
    pub epoch: Epoch,
    pub recovered: Vec<Node>,
    /// Every member of the current epoch is recovered
    pub complete: bool,
}

/// Everything a handler may touch
pub struct NodeContext {
    cluster: RwLock<ClusterInfo>,
    options: NodeOptions,
    pub vdis: VdiTable,
    io: VdiIo,
    /// Driver selected at format time
    pub store: ActiveStore,
    /// Drivers available for format
    pub drivers: StoreDrivers,
    pub membership: Arc<dyn Membership>,
    pub cache: Option<Arc<dyn ObjectCache>>,
    pub stats: RequestStats,
    pub(crate) recovery: Mutex<RecoveryTracker>,
    log: RwLock<Option<Arc<dyn LogLevelControl>>>,
}

impl NodeContext {
    /// Node in WAIT status with no store selected
    pub fn new(
        options: NodeOptions,
        drivers: StoreDrivers,
        membership: Arc<dyn Membership>,
        cache: Option<Arc<dyn ObjectCache>>,
    ) -> Arc<Self> {
        let cluster = ClusterInfo {
            status: ClusterStatus::Wait,
            epoch: 0,
            ctime: 0,
            nr_copies: options.default_copies,
            copy_policy: 0,
            flags: 0,
            store: String::new(),
            block_size_shift: options.object_size.trailing_zeros() as u8,
        };

        Arc::new_cyclic(|ctx| Self {
            cluster: RwLock::new(cluster),
            options,
            vdis: VdiTable::new(),
            io: VdiIo::new(Arc::new(StoreSink::new(ctx.clone()))),
            store: ActiveStore::new(),
            drivers,
            membership,
            cache,
            stats: RequestStats::new(),
            recovery: Mutex::new(RecoveryTracker::default()),
            log: RwLock::new(None),
        })
    }

    /// Copy of the cluster state
    #[must_use]
    pub fn cluster(&self) -> ClusterInfo {
        self.cluster.read().clone()
    }

    /// Change the cluster state
    pub fn update_cluster<R>(&self, f: impl FnOnce(&mut ClusterInfo) -> R) -> R {
        f(&mut *self.cluster.write())
    }

    #[must_use]
    pub fn status(&self) -> ClusterStatus {
        self.cluster.read().status
    }

    pub fn set_status(&self, status: ClusterStatus) {
        let mut cluster = self.cluster.write();
        if cluster.status != status {
            info!("cluster status {:?} -> {:?}", cluster.status, status);
            cluster.status = status;
        }
    }

    /// Current epoch
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.cluster.read().epoch
    }

    /// Advance the epoch and log the current members under it
    pub fn inc_and_log_epoch(&self) -> OpResult<Epoch> {
        let mut cluster = self.cluster.write();
        let epoch = cluster.epoch + 1;
        self.membership
            .log_epoch(epoch, &self.membership.nodes())?;
        cluster.epoch = epoch;
        info!("epoch is now {}", epoch);
        Ok(epoch)
    }

    #[must_use]
    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Splitter for VDI I/O
    #[must_use]
    pub fn io(&self) -> &VdiIo {
        &self.io
    }

    #[must_use]
    pub fn local_node(&self) -> Node {
        self.membership.local_node()
    }

    #[must_use]
    pub fn recovery_state(&self) -> RecoveryState {
        let tracker = self.recovery.lock();
        RecoveryState {
            epoch: tracker.epoch,
            recovered: tracker.recovered.clone(),
            complete: tracker.epoch == self.epoch()
                && tracker.covers(&self.membership.nodes()),
        }
    }

    /// Let GET_LOGLEVEL and SET_LOGLEVEL drive the node's log filter
    pub fn set_log_control(&self, control: Arc<dyn LogLevelControl>) {
        *self.log.write() = Some(control);
    }

    #[must_use]
    pub fn log_control(&self) -> Option<Arc<dyn LogLevelControl>> {
        self.log.read().clone()
    }
}
