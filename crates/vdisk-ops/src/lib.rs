//! vdisk ops - Operation registry and request dispatcher
//!
//! Every request a node serves is described by an [`OperationTemplate`]:
//! its execution class, whether it may run before the cluster is serving,
//! and its work and main stage handlers.
//!
//! - [`Registry`]: the immutable opcode to template table
//! - [`Dispatcher`]: classifies requests and runs their stages
//! - [`NodeContext`]: node state shared by every handler
//! - [`Membership`] and [`ObjectCache`]: collaborators a node is built with
//! - [`LogLevelControl`]: runtime log filter behind GET/SET_LOGLEVEL

pub mod cache;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod membership;
pub mod opcode;
pub mod registry;
pub mod request;
mod sink;
pub mod stats;

pub use cache::{CacheInfo, ObjectCache, VdiCacheInfo};
pub use context::{ClusterInfo, NodeContext, NodeOptions, RecoveryState};
pub use dispatcher::{ClusterLock, Dispatcher, DispatcherBuilder, FatalHook};
pub use error::{MainError, MainResult, OpsError};
pub use handlers::default_registry;
pub use handlers::local::ClusterStat;
pub use logging::LogLevelControl;
pub use membership::{EpochLog, Membership, StaticMembership};
pub use opcode::Opcode;
pub use registry::{MainFn, OpClass, OperationTemplate, Registry, WorkFn, gateway_to_peer};
pub use request::{
    ClusterDefault, ClusterParams, FLAG_CMD_COW, FLAG_CMD_CREAT, FLAG_CMD_DEL, FLAG_CMD_EXCL,
    FLAG_CMD_WRITE, NodeSpace, ObjParams, Request, RequestHeader, ResponseHeader, VdiParams,
    VdiResponse,
};
pub use stats::{ClassStat, RequestStats, StatSnapshot};
