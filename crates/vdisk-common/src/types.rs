//! Core type definitions for vdisk
//!
//! This module defines the identifiers shared by every layer of the node:
//! VDI ids, object ids and their bit layout, epochs, cluster nodes and
//! the cluster status.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Default object size: 4 MiB (`1 << DEFAULT_BLOCK_SIZE_SHIFT`)
pub const DEFAULT_OBJECT_SIZE: u64 = 1 << DEFAULT_BLOCK_SIZE_SHIFT;

/// Block size shift advertised to clients
pub const DEFAULT_BLOCK_SIZE_SHIFT: u8 = 22;

/// Default number of copies for new VDIs
pub const DEFAULT_COPIES: u8 = 3;

/// Maximum length of a VDI name in bytes
pub const MAX_VDI_LEN: usize = 256;

/// Maximum number of data objects a single VDI can address
pub const MAX_DATA_OBJS: u64 = 1 << 20;

/// Maximum number of children recorded in an inode
pub const MAX_CHILDREN: usize = 1024;

/// Bytes of inode metadata preceding the data owner array
pub const INODE_HEADER_SIZE: u64 = 4664;

/// Full size of an inode object: header plus one 32-bit owner per slot
pub const INODE_SIZE: u64 = INODE_HEADER_SIZE + 4 * MAX_DATA_OBJS;

/// Maximum length of a VDI attribute key
pub const MAX_ATTR_KEY_LEN: usize = 256;

/// Maximum length of a VDI attribute value
pub const MAX_ATTR_VALUE_LEN: usize = 65536;

/// Bytes of an attribute object preceding its value
pub const ATTR_HEADER_SIZE: u64 = 784;

/// Full size of an attribute object
pub const ATTR_OBJECT_SIZE: u64 = ATTR_HEADER_SIZE + MAX_ATTR_VALUE_LEN as u64;

/// Number of bits in a VDI id
pub const VDI_ID_BITS: u32 = 24;

/// Upper bound (exclusive) of the VDI id space
pub const MAX_VDI_ID: u32 = 1 << VDI_ID_BITS;

const VDI_SPACE_SHIFT: u32 = 32;
const VDI_BIT: u64 = 1 << 63;
const ATTR_BIT: u64 = 1 << 62;

/// Cluster membership generation counter
pub type Epoch = u32;

/// Identifier of a virtual disk image
///
/// `VdiId::NONE` (zero) is never assigned to a VDI; inside an inode it
/// marks an object slot that no VDI owns yet.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct VdiId(u32);

impl VdiId {
    /// The "unallocated" owner
    pub const NONE: Self = Self(0);

    /// Create from a raw id
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// True for the unallocated owner
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for VdiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VdiId({:#x})", self.0)
    }
}

impl fmt::Display for VdiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Identifier of a stored object
///
/// ```text
///  63  62   61..56   55..32          31..0
/// ┌───┬───┬────────┬──────────────┬──────────────────┐
/// │ I │ A │ unused │  VDI id (24) │ index / attr id  │
/// └───┴───┴────────┴──────────────┴──────────────────┘
/// ```
///
/// `I` is set for the inode object of a VDI and `A` for its attribute
/// objects. Both are clear for data objects.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From,
    Into,
)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Create from a raw id
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Data object `idx` of VDI `vid`
    #[must_use]
    pub const fn data(vid: VdiId, idx: u64) -> Self {
        Self(((vid.0 as u64) << VDI_SPACE_SHIFT) | (idx & 0xffff_ffff))
    }

    /// Inode object of VDI `vid`
    #[must_use]
    pub const fn inode(vid: VdiId) -> Self {
        Self(VDI_BIT | ((vid.0 as u64) << VDI_SPACE_SHIFT))
    }

    /// Attribute object `attr_id` of VDI `vid`
    #[must_use]
    pub const fn attr(vid: VdiId, attr_id: u32) -> Self {
        Self(ATTR_BIT | ((vid.0 as u64) << VDI_SPACE_SHIFT) | attr_id as u64)
    }

    /// VDI this object belongs to
    #[must_use]
    pub const fn vid(self) -> VdiId {
        VdiId(((self.0 & !(VDI_BIT | ATTR_BIT)) >> VDI_SPACE_SHIFT) as u32 & (MAX_VDI_ID - 1))
    }

    /// Index of a data object within its VDI
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0 & 0xffff_ffff
    }

    /// True for inode objects
    #[must_use]
    pub const fn is_inode(self) -> bool {
        self.0 & VDI_BIT != 0
    }

    /// True for VDI attribute objects
    #[must_use]
    pub const fn is_attr(self) -> bool {
        self.0 & ATTR_BIT != 0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:016x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Network identity of a node
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct NodeId(SocketAddr);

impl NodeId {
    /// Create from a socket address
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Address the node listens on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A cluster member
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node identity
    pub id: NodeId,
    /// Failure zone
    pub zone: u32,
    /// Advertised storage space in bytes (0 for gateway-only nodes)
    pub space: u64,
    /// Number of virtual nodes on the hash ring
    pub nr_vnodes: u16,
}

impl Node {
    /// Create a node with default zone and vnode count
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: NodeId::new(addr),
            zone: 0,
            space: 0,
            nr_vnodes: 128,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (zone {})", self.id, self.zone)
    }
}

/// Serving state of the cluster as seen by this node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterStatus {
    /// Formatted and serving requests
    Ok,
    /// Waiting for format or for enough nodes to join
    #[default]
    Wait,
    /// Shut down cluster-wide
    Shutdown,
    /// This node was killed by an administrator
    Killed,
}
