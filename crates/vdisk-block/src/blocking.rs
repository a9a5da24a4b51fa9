//! Per-object create serialization
//!
//! While an object is being created, later writes to it wait here instead
//! of racing to create it again. A key in the map means a create for that
//! object is in flight; its queue holds the parked writes.
//!
//! Lock order is map shard, then VDI inode lock. The create path updates
//! the inode before it takes the shard to drain, so a writer that checks
//! the inode under the shard lock either sees the new owner or finds the
//! key still present.

use crate::aiocb::{SubOp, SubRequest};
use crate::vdi::Vdi;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use tracing::debug;
use vdisk_common::ObjectId;

/// Outcome of asking to create an object
#[derive(Debug)]
pub enum Admission {
    /// No create was in flight; the request now creates the object
    Create(SubRequest),
    /// The object was created meanwhile; write to it directly
    Write(SubRequest),
    /// Another create is in flight; the request is parked
    Parked,
}

/// Objects with a create in flight and the writes waiting on them
#[derive(Debug, Default)]
pub struct BlockingList {
    inflight: DashMap<ObjectId, VecDeque<SubRequest>>,
}

impl BlockingList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-and-insert for a write that needs `req.oid` created
    pub fn admit(&self, mut req: SubRequest, vdi: &Vdi) -> Admission {
        let created = |req: &SubRequest| vdi.owner(req.idx) == vdi.id();

        match self.inflight.entry(req.oid) {
            Entry::Occupied(mut entry) => {
                if created(&req) {
                    drop(entry);
                    req.cow_oid = None;
                    return Admission::Write(req);
                }
                debug!("parking write to {} behind in-flight create", req.oid);
                entry.get_mut().push_back(req);
                Admission::Parked
            }
            Entry::Vacant(entry) => {
                if created(&req) {
                    drop(entry);
                    req.cow_oid = None;
                    return Admission::Write(req);
                }
                entry.insert(VecDeque::new());
                req.op = SubOp::Create;
                Admission::Create(req)
            }
        }
    }

    /// End the create of `oid` and hand back the writes parked on it
    pub fn finish_create(&self, oid: ObjectId) -> Vec<SubRequest> {
        self.inflight
            .remove(&oid)
            .map(|(_, parked)| {
                parked
                    .into_iter()
                    .map(|mut req| {
                        req.cow_oid = None;
                        req
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Give up the create of `oid`
    ///
    /// The first parked write, if any, becomes the new creator and is
    /// returned for submission; the rest stay parked behind it.
    pub fn abort_create(&self, oid: ObjectId) -> Option<SubRequest> {
        match self.inflight.entry(oid) {
            Entry::Occupied(mut entry) => {
                if let Some(mut next) = entry.get_mut().pop_front() {
                    next.op = SubOp::Create;
                    Some(next)
                } else {
                    entry.remove();
                    None
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Whether a create of `oid` is in flight
    #[must_use]
    pub fn is_creating(&self, oid: ObjectId) -> bool {
        self.inflight.contains_key(&oid)
    }

    /// Number of writes parked on `oid`
    #[must_use]
    pub fn parked(&self, oid: ObjectId) -> usize {
        self.inflight.get(&oid).map_or(0, |q| q.len())
    }
}
