//! Local operations
//!
//! Queries and maintenance that concern this node only.

use super::encode_le;
use crate::context::NodeContext;
use crate::cache::CacheInfo;
use crate::error::MainResult;
use crate::logging::{level_code, level_from_code};
use crate::membership::EpochLog;
use crate::request::{ClusterDefault, FLAG_CMD_WRITE, NodeSpace, Request};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};
use vdisk_block::owner_offset;
use vdisk_common::{ClusterStatus, ObjectId, OpResult, ResultCode, VdiId};

/// Cluster summary returned by STAT_CLUSTER
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStat {
    pub ctime: u64,
    pub nr_copies: u8,
    pub copy_policy: u8,
    pub flags: u16,
    pub store: String,
    /// Epoch history, newest first
    pub logs: Vec<EpochLog>,
}

fn json<T: Serialize>(req: &mut Request, value: &T) -> OpResult {
    let data = serde_json::to_vec(value).map_err(|_| ResultCode::SystemError)?;
    req.set_response_data(&data);
    Ok(())
}

pub(crate) fn get_nid(ctx: &NodeContext, req: &mut Request) -> OpResult {
    json(req, &ctx.local_node().id)
}

pub(crate) fn get_store_list(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let names = ctx.drivers.names().collect::<Vec<_>>().join(" ");
    req.set_response_data(names.as_bytes());
    Ok(())
}

pub(crate) fn read_vdis(ctx: &NodeContext, req: &mut Request) -> MainResult {
    let data = encode_le(ctx.vdis.in_use(), |vid| vid.get().to_le_bytes());
    req.set_response_data(&data);
    Ok(())
}

pub(crate) fn get_node_list(ctx: &NodeContext, req: &mut Request) -> MainResult {
    Ok(json(req, &ctx.membership.nodes())?)
}

pub(crate) fn stat_sheep(ctx: &NodeContext, req: &mut Request) -> OpResult {
    req.response.node = if ctx.options().gateway_only {
        NodeSpace::default()
    } else {
        let capacity = ctx.store.get()?.capacity();
        NodeSpace {
            store_size: capacity.size,
            store_free: capacity.free,
        }
    };
    Ok(())
}

/// Cluster summary; the result code reflects the cluster status
pub(crate) fn stat_cluster(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let cluster = ctx.cluster();
    let logs = (1..=ctx.membership.latest_epoch())
        .rev()
        .filter_map(|epoch| ctx.membership.epoch_log(epoch).ok())
        .collect();

    json(
        req,
        &ClusterStat {
            ctime: cluster.ctime,
            nr_copies: cluster.nr_copies,
            copy_policy: cluster.copy_policy,
            flags: cluster.flags,
            store: cluster.store.clone(),
            logs,
        },
    )?;

    match cluster.status {
        ClusterStatus::Killed => Err(ResultCode::SystemError),
        _ => cluster.serving(),
    }
}

pub(crate) fn get_obj_list(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let oids = ctx.store.get()?.list()?;
    let data = encode_le(oids, |oid| oid.raw().to_le_bytes());
    req.set_response_data(&data);
    Ok(())
}

pub(crate) fn get_epoch(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let log = ctx.membership.epoch_log(req.header.obj.tgt_epoch)?;
    json(req, &log)
}

pub(crate) fn flush_vdi(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let cache = ctx.cache.as_ref().ok_or(ResultCode::InvalidParameters)?;
    cache.flush_vdi(req.header.obj.oid.vid())
}

/// Unmap one data object from its VDI and remove it
pub(crate) fn discard_obj(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let oid = req.header.obj.oid;
    let (vid, idx) = (oid.vid(), oid.index());
    let store = ctx.store.get()?;
    let epoch = ctx.epoch();
    debug!("discard {}", oid);

    let mut owner = [0u8; 4];
    store.read(ObjectId::inode(vid), epoch, owner_offset(idx), &mut owner)?;
    if u32::from_le_bytes(owner) == 0 {
        return Ok(());
    }

    store.write(ObjectId::inode(vid), epoch, owner_offset(idx), &[0u8; 4])?;
    if let Ok(vdi) = ctx.vdis.get(vid) {
        vdi.set_owner(idx, VdiId::NONE)?;
    }
    // the inode no longer points at the object
    if let Err(code) = store.remove(oid) {
        error!("failed to remove {}: {}", oid, code);
    }
    Ok(())
}

pub(crate) fn flush_del_cache(ctx: &NodeContext, req: &mut Request) -> OpResult {
    match &ctx.cache {
        Some(cache) => cache.flush_and_delete(req.header.obj.oid.vid()),
        None => Ok(()),
    }
}

/// Drop one VDI's cache, or the whole cache
pub(crate) fn cache_purge(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let Some(cache) = &ctx.cache else {
        return Ok(());
    };
    if req.has_flag(FLAG_CMD_WRITE) {
        cache.delete_vdi(req.header.obj.oid.vid());
    } else {
        cache.format();
    }
    Ok(())
}

pub(crate) fn kill_node(ctx: &NodeContext, _req: &mut Request) -> MainResult {
    ctx.set_status(ClusterStatus::Killed);
    Ok(())
}

pub(crate) fn stat(ctx: &NodeContext, req: &mut Request) -> MainResult {
    Ok(json(req, &ctx.stats.snapshot())?)
}

pub(crate) fn get_hash(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let obj = req.header.obj;
    let digest = ctx.store.get()?.get_hash(obj.oid, obj.tgt_epoch)?;
    req.response.hash = Some(digest);
    Ok(())
}

pub(crate) fn exist(ctx: &NodeContext, req: &mut Request) -> OpResult {
    if ctx.options().gateway_only {
        return Err(ResultCode::NoObject);
    }
    let store = ctx.store.get().map_err(|_| ResultCode::NoObject)?;
    if store.exists(req.header.obj.oid) {
        Ok(())
    } else {
        Err(ResultCode::NoObject)
    }
}

/// Reply with the ids from the payload this node does not store
pub(crate) fn oids_exist(ctx: &NodeContext, req: &mut Request) -> MainResult {
    if req.data.len() % 8 != 0 {
        return Err(ResultCode::InvalidParameters.into());
    }
    let store = if ctx.options().gateway_only {
        None
    } else {
        ctx.store.get().ok()
    };

    let missing: Vec<u64> = req
        .data
        .chunks_exact(8)
        .filter_map(|chunk| <[u8; 8]>::try_from(chunk).ok())
        .map(u64::from_le_bytes)
        .filter(|&raw| {
            store
                .as_ref()
                .is_none_or(|store| !store.exists(ObjectId::from_raw(raw)))
        })
        .collect();

    req.set_response_data(&encode_le(missing.iter().copied(), u64::to_le_bytes));
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ResultCode::NoObject.into())
    }
}

pub(crate) fn cluster_info(ctx: &NodeContext, req: &mut Request) -> MainResult {
    Ok(json(req, &ctx.cluster())?)
}

pub(crate) fn get_cluster_default(ctx: &NodeContext, req: &mut Request) -> MainResult {
    let cluster = ctx.cluster();
    req.response.cluster_default = ClusterDefault {
        nr_copies: cluster.nr_copies,
        copy_policy: cluster.copy_policy,
        block_size_shift: cluster.block_size_shift,
    };
    Ok(())
}

pub(crate) fn stat_recovery(ctx: &NodeContext, req: &mut Request) -> MainResult {
    Ok(json(req, &ctx.recovery_state())?)
}

/// Cache usage; an empty report when the node runs without a cache
pub(crate) fn get_cache_info(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let info = ctx
        .cache
        .as_ref()
        .map_or_else(CacheInfo::default, |cache| cache.info());
    json(req, &info)
}

pub(crate) fn get_loglevel(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let level = ctx
        .log_control()
        .map_or_else(LevelFilter::current, |control| control.level());
    req.set_response_data(&level_code(level).to_le_bytes());
    Ok(())
}

pub(crate) fn set_loglevel(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let code = req
        .data
        .get(..4)
        .filter(|_| req.header.data_length == 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_le_bytes)
        .ok_or(ResultCode::InvalidParameters)?;
    let level = level_from_code(code).inspect_err(|_| error!("invalid log level {}", code))?;
    let control = ctx.log_control().ok_or(ResultCode::NoSupport)?;
    control.set_level(level)?;
    info!("log level set to {}", level);
    Ok(())
}
