//! Cluster operations
//!
//! Work stages run once, on the node that received the request. Main
//! stages run on every node, in the same order everywhere, and must only
//! touch node state.

use super::parse_name;
use crate::context::NodeContext;
use crate::error::{MainError, MainResult};
use crate::request::{FLAG_CMD_CREAT, FLAG_CMD_DEL, FLAG_CMD_EXCL, Request, VdiResponse};
use tracing::{debug, error, info, warn};
use vdisk_block::{Inode, SlotMapper, TAG_LEN, VdiAttr, VdiSpec};
use vdisk_common::checksum::name_hash;
use vdisk_common::{
    ATTR_OBJECT_SIZE, ClusterStatus, DEFAULT_COPIES, MAX_VDI_ID, MAX_VDI_LEN, Node, ObjectId,
    OpResult, ResultCode, VdiId,
};

/// Lookups carry a name, optionally followed by a snapshot tag
fn check_lookup_len(data_length: u32) -> OpResult {
    match data_length as usize {
        MAX_VDI_LEN => Ok(()),
        len if len == MAX_VDI_LEN + TAG_LEN => Ok(()),
        _ => Err(ResultCode::InvalidParameters),
    }
}

/// Treat an object that is already gone as removed
fn removed(result: OpResult) -> OpResult {
    match result {
        Err(ResultCode::NoObject) => Ok(()),
        other => other,
    }
}

pub(crate) fn new_vdi(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let hdr = req.header;
    if hdr.data_length as usize != MAX_VDI_LEN {
        return Err(ResultCode::InvalidParameters);
    }
    let name = parse_name(&req.data)?;
    let cluster = ctx.cluster();

    let (nr_copies, copy_policy) = match hdr.vdi.copies {
        0 => (cluster.nr_copies, cluster.copy_policy),
        copies => (copies, hdr.vdi.copy_policy),
    };
    // object slots are sized by the store, so every VDI shares the cluster shift
    let block_size_shift = match hdr.vdi.block_size_shift {
        0 => cluster.block_size_shift,
        shift if shift == cluster.block_size_shift => shift,
        shift => {
            warn!(
                "block size shift {} differs from the cluster's {}",
                shift, cluster.block_size_shift
            );
            return Err(ResultCode::InvalidParameters);
        }
    };
    let snapshot = hdr.vdi.snap_id != 0;
    if !snapshot && hdr.vdi.vdi_size > SlotMapper::new(1 << block_size_shift).max_vdi_size() {
        return Err(ResultCode::InvalidParameters);
    }

    let new = ctx.vdis.prepare(&VdiSpec {
        name,
        vdi_size: hdr.vdi.vdi_size,
        block_size_shift,
        nr_copies,
        copy_policy,
        snapshot,
    })?;
    if let Some(base) = &new.base {
        if !hdr.vdi.base_vdi_id.is_none() && hdr.vdi.base_vdi_id != base.vdi_id {
            return Err(ResultCode::NoVdi);
        }
    }

    let store = ctx.store.get()?;
    let epoch = ctx.epoch();
    if let Some(base) = &new.base {
        store.write(ObjectId::inode(base.vdi_id), epoch, 0, &base.encode_header())?;
    }
    let inode = new.inode.encode();
    store.create_and_write(ObjectId::inode(new.inode.vdi_id), epoch, 0, &inode)?;

    req.response.vdi = VdiResponse {
        vdi_id: new.inode.vdi_id,
        copies: new.inode.nr_copies,
        attr_id: 0,
    };
    req.set_response_data(&inode);
    Ok(())
}

pub(crate) fn post_new_vdi(ctx: &NodeContext, req: &mut Request) -> MainResult {
    let inode = Inode::decode(&req.data).map_err(|e| e.code())?;
    info!(
        "name: {}, base_vdi_id: {}, new vdi_id: {}, sender: {}",
        inode.name, req.header.vdi.base_vdi_id, inode.vdi_id, req.sender
    );

    let parent = inode.parent_vdi_id;
    ctx.vdis.register(inode);
    if !parent.is_none() {
        match ctx.vdis.mark_snapshot(parent) {
            Ok(()) | Err(ResultCode::NoVdi) => {}
            Err(code) => return Err(code.into()),
        }
    }
    Ok(())
}

pub(crate) fn del_vdi(ctx: &NodeContext, req: &mut Request) -> OpResult {
    check_lookup_len(req.header.data_length)?;
    let name = parse_name(&req.data)?;
    let vid = ctx.vdis.lookup(&name, req.header.vdi.snap_id)?;
    req.response.vdi.vdi_id = vid;

    let vdi = ctx.vdis.get(vid)?;
    let store = ctx.store.get()?;
    let (owned, shared) = {
        let inode = vdi.inode();
        let owned: Vec<u64> = inode
            .owned_slots()
            .filter(|&(_, owner)| owner == vid)
            .map(|(idx, _)| idx)
            .collect();
        let shared = inode
            .child_vdi_id
            .iter()
            .any(|&child| ctx.vdis.get(child).is_ok());
        (owned, shared)
    };

    if shared {
        debug!("{} still has children, keeping its data objects", vid);
    } else {
        for idx in owned {
            removed(store.remove(ObjectId::data(vid, idx)))?;
        }
    }
    removed(store.remove(ObjectId::inode(vid)))
}

pub(crate) fn post_del_vdi(ctx: &NodeContext, req: &mut Request) -> MainResult {
    let vid = req.response.vdi.vdi_id;
    info!("deleted vdi_id: {}, sender: {}", vid, req.sender);

    ctx.vdis.remove(vid);
    if let Some(cache) = &ctx.cache {
        cache.delete_vdi(vid);
    }
    Ok(())
}

/// Resolve a name to its id and copies; also serves LOCK_VDI
pub(crate) fn get_vdi_info(ctx: &NodeContext, req: &mut Request) -> OpResult {
    check_lookup_len(req.header.data_length)?;
    let name = parse_name(&req.data)?;
    let vid = ctx.vdis.lookup(&name, req.header.vdi.snap_id)?;
    let copies = ctx
        .vdis
        .get(vid)
        .map_or_else(|_| ctx.cluster().nr_copies, |vdi| vdi.inode().nr_copies);

    req.response.vdi = VdiResponse {
        vdi_id: vid,
        copies,
        attr_id: 0,
    };
    Ok(())
}

pub(crate) fn release_vdi(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let Some(cache) = &ctx.cache else {
        return Ok(());
    };
    let vid = req.header.vdi.base_vdi_id;
    if vid.is_none() {
        info!("release without a VDI from {}", req.sender);
        return Ok(());
    }
    cache.flush_and_delete(vid)
}

/// VDI id attributes are stored under
///
/// Snapshots change the working VDI's id, so attributes hang off the
/// hash of the name instead.
fn attr_vid(name: &str) -> VdiId {
    VdiId::new((name_hash(name) % u64::from(MAX_VDI_ID)) as u32)
}

/// Look up, create or delete a VDI attribute
///
/// Attribute ids are scanned linearly from the hash of the key until the
/// matching record or a free id turns up.
pub(crate) fn get_vdi_attr(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let hdr = req.header;
    let payload = req
        .data
        .get(..hdr.data_length as usize)
        .ok_or(ResultCode::InvalidParameters)?;
    let mut attr = VdiAttr::decode(payload).map_err(|e| e.code())?;
    if attr.name.is_empty() || attr.key.is_empty() {
        return Err(ResultCode::InvalidParameters);
    }

    let vid = ctx.vdis.lookup(&attr.name, hdr.vdi.snap_id)?;
    let (ctime, copies) = {
        let vdi = ctx.vdis.get(vid)?;
        let inode = vdi.inode();
        (inode.create_time, inode.nr_copies)
    };
    attr.ctime = ctime;

    let create = req.has_flag(FLAG_CMD_CREAT);
    let excl = req.has_flag(FLAG_CMD_EXCL);
    let delete = req.has_flag(FLAG_CMD_DEL);
    let owner = attr_vid(&attr.name);
    let store = ctx.store.get()?;
    let epoch = ctx.epoch();

    let start = attr.start_id();
    let mut buf = vec![0u8; ATTR_OBJECT_SIZE as usize];
    for attr_id in (0..=u32::MAX).map(|n| start.wrapping_add(n)) {
        let oid = ObjectId::attr(owner, attr_id);
        match store.read(oid, epoch, 0, &mut buf) {
            Ok(()) => {}
            Err(ResultCode::NoObject) if create => {
                store.create_and_write(oid, epoch, 0, &attr.encode())?;
                debug!("attribute {} of {} is {:#x}", attr.key, attr.name, attr_id);
                req.response.vdi = VdiResponse {
                    vdi_id: owner,
                    copies,
                    attr_id,
                };
                return Ok(());
            }
            Err(code) => return Err(code),
        }

        let stored = VdiAttr::decode(&buf).map_err(|e| e.code())?;
        if !stored.same_key(&attr) {
            continue;
        }
        if create && excl {
            return Err(ResultCode::VdiExists);
        }
        if delete {
            store.write(oid, epoch, 0, &[0])?;
        } else if create {
            store.write(oid, epoch, 0, &attr.encode())?;
        } else {
            req.set_response_data(&stored.encode());
        }
        req.response.vdi = VdiResponse {
            vdi_id: owner,
            copies,
            attr_id,
        };
        return Ok(());
    }
    Err(ResultCode::FullVdi)
}

/// Store name in a MAKE_FS payload
fn store_name(data: &[u8]) -> OpResult<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    std::str::from_utf8(&data[..end])
        .map(|name| name.trim().to_string())
        .map_err(|_| ResultCode::InvalidParameters)
}

pub(crate) fn make_fs(ctx: &NodeContext, req: &mut Request) -> MainResult {
    let name = store_name(&req.data)?;
    let driver = ctx.drivers.find(&name).ok_or(ResultCode::NoStore)?;
    driver.format()?;
    driver.init()?;

    let params = req.header.cluster;
    let latest = ctx.membership.latest_epoch();
    ctx.update_cluster(|cluster| {
        cluster.store = name.clone();
        cluster.nr_copies = match params.copies {
            0 => DEFAULT_COPIES,
            copies => copies,
        };
        cluster.copy_policy = params.copy_policy;
        cluster.flags = params.flags;
        cluster.ctime = match params.ctime {
            0 => chrono::Utc::now().timestamp().unsigned_abs(),
            ctime => ctime,
        };
        cluster.epoch = 0;
    });

    for epoch in 1..=latest {
        removed(ctx.membership.remove_epoch(epoch))?;
    }
    ctx.vdis.clear();
    if let Some(cache) = &ctx.cache {
        cache.format();
    }
    ctx.store.set(driver);

    ctx.inc_and_log_epoch().map_err(|_| ResultCode::Eio)?;
    info!("formatted with store {}", name);
    ctx.set_status(ClusterStatus::Ok);
    Ok(())
}

pub(crate) fn shutdown(ctx: &NodeContext, _req: &mut Request) -> MainResult {
    ctx.set_status(ClusterStatus::Shutdown);
    Ok(())
}

/// Hand out the members of the current epoch for a forced recovery
pub(crate) fn force_recover(ctx: &NodeContext, req: &mut Request) -> OpResult {
    if ctx.status() != ClusterStatus::Wait {
        return Err(ResultCode::ForceRecoverNeeded);
    }

    let epoch = ctx.epoch();
    let log = ctx.membership.epoch_log(epoch).map_err(|_| {
        error!("cannot get the members of epoch {}", epoch);
        ResultCode::ForceRecoverNeeded
    })?;
    let data = serde_json::to_vec(&log.nodes).map_err(|_| ResultCode::SystemError)?;

    req.response.epoch = epoch;
    req.set_response_data(&data);
    Ok(())
}

pub(crate) fn post_force_recover(ctx: &NodeContext, req: &mut Request) -> MainResult {
    let epoch = ctx.epoch();
    if req.response.epoch != epoch {
        return Err(MainError::fatal(format!(
            "epoch moved from {} to {} during force recover",
            req.response.epoch, epoch
        )));
    }

    let nodes: Vec<Node> = serde_json::from_slice(&req.data).map_err(|e| {
        warn!("bad node list in force recover from {}: {}", req.sender, e);
        ResultCode::InvalidParameters
    })?;
    ctx.inc_and_log_epoch()
        .map_err(|code| MainError::fatal(format!("cannot update epoch log: {code}")))?;
    info!("forced recovery from {} nodes of epoch {}", nodes.len(), epoch);
    ctx.set_status(ClusterStatus::Ok);
    Ok(())
}

pub(crate) fn notify_vdi_add(ctx: &NodeContext, req: &mut Request) -> MainResult {
    let vid = req.header.vdi.vdi_id;
    if !vid.is_none() {
        ctx.vdis.set_in_use(vid);
    }
    Ok(())
}

pub(crate) fn delete_cache(ctx: &NodeContext, req: &mut Request) -> MainResult {
    if let Some(cache) = &ctx.cache {
        cache.delete_vdi(req.header.obj.oid.vid());
    }
    Ok(())
}

/// Track nodes reporting recovery; clean up once every member is done
pub(crate) fn complete_recovery(ctx: &NodeContext, req: &mut Request) -> MainResult {
    let node: Node =
        serde_json::from_slice(&req.data).map_err(|_| ResultCode::InvalidParameters)?;
    let epoch = req.header.obj.tgt_epoch;

    let mut tracker = ctx.recovery.lock();
    if tracker.epoch > epoch {
        return Ok(());
    }
    if tracker.epoch < epoch {
        debug!("new recovery epoch {}", epoch);
        tracker.epoch = epoch;
        tracker.recovered.clear();
    }
    debug!("{} is recovered at epoch {}", node, epoch);
    if !tracker.recovered.iter().any(|n| n.id == node.id) {
        tracker.recovered.push(node);
        tracker.recovered.sort_by_key(|n| n.id);
    }

    if ctx.epoch() != tracker.epoch {
        return Ok(());
    }
    if tracker.covers(&ctx.membership.nodes()) {
        info!("all nodes are recovered, epoch {}", epoch);
        // gateway-only nodes have no store to clean
        if let Ok(store) = ctx.store.get() {
            if let Err(code) = store.cleanup() {
                warn!("store cleanup failed: {}", code);
            }
        }
    }
    Ok(())
}

pub(crate) fn alter_cluster_copy(ctx: &NodeContext, req: &mut Request) -> MainResult {
    let params = req.header.cluster;
    if params.copy_policy != 0 {
        return Err(ResultCode::InvalidParameters.into());
    }
    ctx.update_cluster(|cluster| cluster.nr_copies = params.copies);
    info!("default copies set to {}", params.copies);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_util::*;
    use crate::handlers::name_field;
    use crate::opcode::Opcode;
    use std::sync::Arc;
    use vdisk_common::VdiId;

    fn new_vdi_req(name: &str, size: u64, snap_id: u32) -> Request {
        let mut req = Request::new(Opcode::NewVdi, local()).with_data(&name_field(name));
        req.header.vdi.vdi_size = size;
        req.header.vdi.snap_id = snap_id;
        req
    }

    fn lookup_req(op: Opcode, name: &str) -> Request {
        Request::new(op, local()).with_data(&name_field(name))
    }

    /// Run NEW_VDI through both stages
    fn create(ctx: &NodeContext, name: &str, snap_id: u32) -> VdiId {
        let mut req = new_vdi_req(name, 1 << 20, snap_id);
        new_vdi(ctx, &mut req).unwrap();
        post_new_vdi(ctx, &mut req).unwrap();
        req.response.vdi.vdi_id
    }

    #[test]
    fn test_new_vdi() {
        let ctx = formatted();
        let mut req = new_vdi_req("disk0", 1 << 20, 0);
        new_vdi(&ctx, &mut req).unwrap();

        let vid = req.response.vdi.vdi_id;
        assert!(!vid.is_none());
        assert_eq!(req.response.vdi.copies, 3);
        assert!(ctx.store.get().unwrap().exists(ObjectId::inode(vid)));
        // nothing is registered before the main stage
        assert_eq!(ctx.vdis.lookup("disk0", 0), Err(ResultCode::NoVdi));

        post_new_vdi(&ctx, &mut req).unwrap();
        assert_eq!(ctx.vdis.lookup("disk0", 0), Ok(vid));
        assert!(ctx.vdis.is_in_use(vid));

        let mut again = new_vdi_req("disk0", 1 << 20, 0);
        assert_eq!(new_vdi(&ctx, &mut again), Err(ResultCode::VdiExists));
    }

    #[test]
    fn test_new_vdi_rejects_bad_requests() {
        let ctx = formatted();

        let mut req = Request::new(Opcode::NewVdi, local()).with_data(b"disk0");
        assert_eq!(new_vdi(&ctx, &mut req), Err(ResultCode::InvalidParameters));

        let mut req = new_vdi_req("huge", 1 << 50, 0);
        assert_eq!(new_vdi(&ctx, &mut req), Err(ResultCode::InvalidParameters));

        let mut req = new_vdi_req("nobase", 0, 1);
        assert_eq!(new_vdi(&ctx, &mut req), Err(ResultCode::NoVdi));
    }

    #[test]
    fn test_new_vdi_block_size_shift() {
        let ctx = formatted();

        let mut req = new_vdi_req("big", 1 << 20, 0);
        req.header.vdi.block_size_shift = 13;
        assert_eq!(new_vdi(&ctx, &mut req), Err(ResultCode::InvalidParameters));
        assert!(!ctx.store.get().unwrap().list().unwrap().iter().any(|o| o.is_inode()));

        let mut req = new_vdi_req("same", 1 << 20, 0);
        req.header.vdi.block_size_shift = 12;
        new_vdi(&ctx, &mut req).unwrap();
        post_new_vdi(&ctx, &mut req).unwrap();
        let vid = req.response.vdi.vdi_id;
        assert_eq!(ctx.vdis.get(vid).unwrap().inode().block_size_shift, 12);
    }

    #[test]
    fn test_snapshot() {
        let ctx = formatted();
        let base = create(&ctx, "disk0", 0);
        let working = create(&ctx, "disk0", 1);

        assert_ne!(base, working);
        assert!(ctx.vdis.get(base).unwrap().is_snapshot());
        assert!(!ctx.vdis.get(working).unwrap().is_snapshot());
        assert_eq!(ctx.vdis.lookup("disk0", 0), Ok(working));
        assert_eq!(ctx.vdis.lookup("disk0", 1), Ok(base));
        assert_eq!(ctx.vdis.get(working).unwrap().inode().parent_vdi_id, base);
    }

    #[test]
    fn test_del_vdi() {
        let (ctx, cache) = cached();
        let vid = create(&ctx, "disk0", 0);
        let store = ctx.store.get().unwrap();
        let data = ObjectId::data(vid, 0);
        store.create_and_write(data, 1, 0, b"x").unwrap();
        ctx.vdis.get(vid).unwrap().set_owner(0, vid).unwrap();

        let mut req = lookup_req(Opcode::DelVdi, "disk0");
        del_vdi(&ctx, &mut req).unwrap();
        assert_eq!(req.response.vdi.vdi_id, vid);
        assert!(!store.exists(data));
        assert!(!store.exists(ObjectId::inode(vid)));

        post_del_vdi(&ctx, &mut req).unwrap();
        assert!(ctx.vdis.is_empty());
        assert!(!ctx.vdis.is_in_use(vid));
        assert_eq!(*cache.calls.lock(), vec![format!("delete {vid}")]);

        let mut req = lookup_req(Opcode::DelVdi, "disk0");
        assert_eq!(del_vdi(&ctx, &mut req), Err(ResultCode::NoVdi));
    }

    #[test]
    fn test_get_vdi_info() {
        let ctx = formatted();
        let vid = create(&ctx, "disk0", 0);

        let mut req = lookup_req(Opcode::GetVdiInfo, "disk0");
        get_vdi_info(&ctx, &mut req).unwrap();
        assert_eq!(
            req.response.vdi,
            VdiResponse {
                vdi_id: vid,
                copies: 3,
                attr_id: 0
            }
        );

        // a trailing snapshot tag is accepted
        let mut data = name_field("disk0");
        data.extend_from_slice(&[0u8; TAG_LEN]);
        let mut req = Request::new(Opcode::LockVdi, local()).with_data(&data);
        get_vdi_info(&ctx, &mut req).unwrap();
        assert_eq!(req.response.vdi.vdi_id, vid);

        let mut req = lookup_req(Opcode::GetVdiInfo, "other");
        assert_eq!(get_vdi_info(&ctx, &mut req), Err(ResultCode::NoVdi));

        let mut req = Request::new(Opcode::GetVdiInfo, local()).with_data(&[b'a'; 300]);
        assert_eq!(
            get_vdi_info(&ctx, &mut req),
            Err(ResultCode::InvalidParameters)
        );
    }

    fn attr_req(name: &str, key: &str, value: &[u8], flags: u16) -> Request {
        let data = VdiAttr::new(name, key, value.to_vec()).encode();
        let mut req = Request::new(Opcode::GetVdiAttr, local()).with_data(&data);
        req.header.flags = flags;
        req
    }

    fn attr_value(ctx: &NodeContext, name: &str, key: &str) -> OpResult<Vec<u8>> {
        let mut req = attr_req(name, key, b"", 0);
        get_vdi_attr(ctx, &mut req)?;
        Ok(VdiAttr::decode(&req.response_data()).unwrap().value)
    }

    #[test]
    fn test_vdi_attr_lifecycle() {
        let ctx = formatted();
        create(&ctx, "disk0", 0);
        let start = VdiAttr::new("disk0", "owner", Vec::new()).start_id();

        let mut req = attr_req("disk0", "owner", b"alice", FLAG_CMD_CREAT | FLAG_CMD_EXCL);
        get_vdi_attr(&ctx, &mut req).unwrap();
        assert_eq!(req.response.vdi.attr_id, start);
        assert_eq!(req.response.vdi.vdi_id, attr_vid("disk0"));
        assert_eq!(req.response.vdi.copies, 3);
        assert_eq!(attr_value(&ctx, "disk0", "owner"), Ok(b"alice".to_vec()));

        let mut req = attr_req("disk0", "owner", b"bob", FLAG_CMD_CREAT | FLAG_CMD_EXCL);
        assert_eq!(get_vdi_attr(&ctx, &mut req), Err(ResultCode::VdiExists));

        let mut req = attr_req("disk0", "owner", b"bob", FLAG_CMD_CREAT);
        get_vdi_attr(&ctx, &mut req).unwrap();
        assert_eq!(req.response.vdi.attr_id, start);
        assert_eq!(attr_value(&ctx, "disk0", "owner"), Ok(b"bob".to_vec()));

        let mut req = attr_req("disk0", "owner", b"", FLAG_CMD_DEL);
        get_vdi_attr(&ctx, &mut req).unwrap();
        assert_eq!(
            attr_value(&ctx, "disk0", "owner"),
            Err(ResultCode::NoObject)
        );
        // the deleted record keeps its id occupied
        let store = ctx.store.get().unwrap();
        assert!(store.exists(ObjectId::attr(attr_vid("disk0"), start)));
    }

    #[test]
    fn test_vdi_attr_skips_other_keys() {
        let ctx = formatted();
        create(&ctx, "disk0", 0);
        let start = VdiAttr::new("disk0", "owner", Vec::new()).start_id();
        let store = ctx.store.get().unwrap();
        let taken = VdiAttr::new("disk0", "colliding", b"x".to_vec()).encode();
        store
            .create_and_write(ObjectId::attr(attr_vid("disk0"), start), 1, 0, &taken)
            .unwrap();

        let mut req = attr_req("disk0", "owner", b"alice", FLAG_CMD_CREAT);
        get_vdi_attr(&ctx, &mut req).unwrap();
        assert_eq!(req.response.vdi.attr_id, start.wrapping_add(1));
        assert_eq!(attr_value(&ctx, "disk0", "owner"), Ok(b"alice".to_vec()));
    }

    #[test]
    fn test_vdi_attr_rejects_bad_requests() {
        let ctx = formatted();
        let mut req = attr_req("disk0", "owner", b"", 0);
        assert_eq!(get_vdi_attr(&ctx, &mut req), Err(ResultCode::NoVdi));

        create(&ctx, "disk0", 0);
        let mut req = attr_req("disk0", "owner", b"", 0);
        assert_eq!(get_vdi_attr(&ctx, &mut req), Err(ResultCode::NoObject));

        let mut req = attr_req("disk0", "", b"", FLAG_CMD_CREAT);
        assert_eq!(
            get_vdi_attr(&ctx, &mut req),
            Err(ResultCode::InvalidParameters)
        );

        let mut req = Request::new(Opcode::GetVdiAttr, local()).with_data(b"disk0");
        assert_eq!(
            get_vdi_attr(&ctx, &mut req),
            Err(ResultCode::InvalidParameters)
        );
    }

    #[test]
    fn test_release_vdi() {
        let ctx = formatted();
        let mut req = Request::new(Opcode::ReleaseVdi, local());
        req.header.vdi.base_vdi_id = VdiId::new(7);
        assert_eq!(release_vdi(&ctx, &mut req), Ok(()));

        let (ctx, cache) = cached();
        let mut req = Request::new(Opcode::ReleaseVdi, local());
        assert_eq!(release_vdi(&ctx, &mut req), Ok(()));
        assert!(cache.calls.lock().is_empty());

        req.header.vdi.base_vdi_id = VdiId::new(7);
        release_vdi(&ctx, &mut req).unwrap();
        assert_eq!(*cache.calls.lock(), vec!["flush 7", "delete 7"]);
    }

    #[test]
    fn test_make_fs() {
        let ctx = context();
        let mut req = Request::new(Opcode::MakeFs, local()).with_data(b"memory\0");
        make_fs(&ctx, &mut req).unwrap();

        let cluster = ctx.cluster();
        assert_eq!(cluster.status, ClusterStatus::Ok);
        assert_eq!(cluster.epoch, 1);
        assert_eq!(cluster.nr_copies, DEFAULT_COPIES);
        assert_eq!(cluster.store, "memory");
        assert!(cluster.is_formatted());
        assert!(ctx.store.is_set());
    }

    #[test]
    fn test_make_fs_resets_state() {
        let (ctx, cache) = cached();
        create(&ctx, "disk0", 0);
        ctx.inc_and_log_epoch().unwrap();
        assert_eq!(ctx.membership.latest_epoch(), 2);

        let mut req = Request::new(Opcode::MakeFs, local()).with_data(b"memory");
        req.header.cluster.copies = 2;
        req.header.cluster.ctime = 1234;
        make_fs(&ctx, &mut req).unwrap();

        assert!(ctx.vdis.is_empty());
        assert_eq!(ctx.epoch(), 1);
        assert_eq!(ctx.membership.latest_epoch(), 1);
        assert_eq!(ctx.cluster().nr_copies, 2);
        assert_eq!(ctx.cluster().ctime, 1234);
        assert_eq!(*cache.calls.lock(), vec!["format"]);
        assert!(ctx.store.get().unwrap().list().unwrap().is_empty());
    }

    #[test]
    fn test_make_fs_unknown_store() {
        let ctx = context();
        let mut req = Request::new(Opcode::MakeFs, local()).with_data(b"tape");
        assert_eq!(
            make_fs(&ctx, &mut req),
            Err(MainError::Code(ResultCode::NoStore))
        );
        assert_eq!(ctx.status(), ClusterStatus::Wait);
    }

    #[test]
    fn test_force_recover() {
        let ctx = formatted();
        let mut req = Request::new(Opcode::ForceRecover, local());
        assert_eq!(
            force_recover(&ctx, &mut req),
            Err(ResultCode::ForceRecoverNeeded)
        );

        ctx.set_status(ClusterStatus::Wait);
        force_recover(&ctx, &mut req).unwrap();
        assert_eq!(req.response.epoch, 1);
        let nodes: Vec<Node> = serde_json::from_slice(&req.response_data()).unwrap();
        assert_eq!(nodes, vec![local()]);

        post_force_recover(&ctx, &mut req).unwrap();
        assert_eq!(ctx.epoch(), 2);
        assert_eq!(ctx.status(), ClusterStatus::Ok);
    }

    #[test]
    fn test_force_recover_epoch_moved() {
        let ctx = formatted();
        ctx.set_status(ClusterStatus::Wait);
        let mut req = Request::new(Opcode::ForceRecover, local());
        force_recover(&ctx, &mut req).unwrap();
        ctx.inc_and_log_epoch().unwrap();

        assert!(matches!(
            post_force_recover(&ctx, &mut req),
            Err(MainError::Fatal(_))
        ));
    }

    #[test]
    fn test_force_recover_bad_node_list() {
        let ctx = formatted();
        ctx.set_status(ClusterStatus::Wait);
        let mut req = Request::new(Opcode::ForceRecover, local());
        force_recover(&ctx, &mut req).unwrap();
        req.set_response_data(b"[{");

        assert_eq!(
            post_force_recover(&ctx, &mut req),
            Err(MainError::Code(ResultCode::InvalidParameters))
        );
        assert_eq!(ctx.epoch(), 1);
        assert_eq!(ctx.status(), ClusterStatus::Wait);
    }

    #[test]
    fn test_force_recover_without_epoch_log() {
        let ctx = context();
        let mut req = Request::new(Opcode::ForceRecover, local());
        assert_eq!(
            force_recover(&ctx, &mut req),
            Err(ResultCode::ForceRecoverNeeded)
        );
    }

    #[test]
    fn test_notify_vdi_add_and_delete_cache() {
        let (ctx, cache) = cached();
        let mut req = Request::new(Opcode::NotifyVdiAdd, local());
        req.header.vdi.vdi_id = VdiId::new(0x42);
        notify_vdi_add(&ctx, &mut req).unwrap();
        assert!(ctx.vdis.is_in_use(VdiId::new(0x42)));

        let mut req = Request::new(Opcode::DeleteCache, local());
        req.header.obj.oid = ObjectId::data(VdiId::new(0x42), 9);
        delete_cache(&ctx, &mut req).unwrap();
        assert_eq!(*cache.calls.lock(), vec!["delete 42"]);
    }

    fn recovered(ctx: &NodeContext, node: &Node, epoch: u32) {
        let data = serde_json::to_vec(node).unwrap();
        let mut req = Request::new(Opcode::CompleteRecovery, local()).with_data(&data);
        req.header.obj.tgt_epoch = epoch;
        complete_recovery(ctx, &mut req).unwrap();
    }

    #[test]
    fn test_complete_recovery_tracking() {
        use crate::context::NodeOptions;
        use crate::membership::StaticMembership;
        use vdisk_store::{MemoryStore, StoreDrivers};

        let peer = Node::new("127.0.0.1:7001".parse().unwrap());
        let membership = Arc::new(StaticMembership::new(local()));
        membership.set_nodes(vec![local(), peer.clone()]);
        let mut drivers = StoreDrivers::new();
        drivers.register(Arc::new(MemoryStore::new(OBJECT_SIZE)));
        let ctx = NodeContext::new(NodeOptions::default(), drivers, membership, None);
        ctx.inc_and_log_epoch().unwrap();
        ctx.inc_and_log_epoch().unwrap();

        recovered(&ctx, &peer, 2);
        recovered(&ctx, &peer, 2);
        assert_eq!(ctx.recovery.lock().recovered, vec![peer.clone()]);

        // stale reports are ignored
        recovered(&ctx, &local(), 1);
        assert_eq!(ctx.recovery.lock().recovered.len(), 1);

        recovered(&ctx, &local(), 2);
        {
            let tracker = ctx.recovery.lock();
            assert_eq!(tracker.epoch, 2);
            assert_eq!(tracker.recovered, vec![local(), peer.clone()]);
        }

        // a newer epoch starts over
        recovered(&ctx, &peer, 3);
        assert_eq!(ctx.recovery.lock().recovered, vec![peer]);
    }

    #[test]
    fn test_complete_recovery_bad_payload() {
        let ctx = formatted();
        let mut req = Request::new(Opcode::CompleteRecovery, local()).with_data(b"{");
        assert_eq!(
            complete_recovery(&ctx, &mut req),
            Err(MainError::Code(ResultCode::InvalidParameters))
        );
    }

    #[test]
    fn test_alter_cluster_copy() {
        let ctx = formatted();
        let mut req = Request::new(Opcode::AlterClusterCopy, local());
        req.header.cluster.copies = 2;
        req.header.cluster.copy_policy = 1;
        assert_eq!(
            alter_cluster_copy(&ctx, &mut req),
            Err(MainError::Code(ResultCode::InvalidParameters))
        );
        assert_eq!(ctx.cluster().nr_copies, 3);

        req.header.cluster.copy_policy = 0;
        alter_cluster_copy(&ctx, &mut req).unwrap();
        assert_eq!(ctx.cluster().nr_copies, 2);
    }

    #[test]
    fn test_shutdown() {
        let ctx = formatted();
        shutdown(&ctx, &mut Request::new(Opcode::Shutdown, local())).unwrap();
        assert_eq!(ctx.status(), ClusterStatus::Shutdown);
    }
}
