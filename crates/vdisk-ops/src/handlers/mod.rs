//! Operation handlers and the default operation table

pub(crate) mod cluster;
pub(crate) mod gateway;
pub(crate) mod local;
pub(crate) mod peer;

use crate::error::OpsError;
use crate::opcode::Opcode;
use crate::registry::{OpClass, OperationTemplate, Registry};
use vdisk_common::{MAX_VDI_LEN, OpResult, ResultCode};

/// Every operation this node serves
pub fn default_registry() -> Result<Registry, OpsError> {
    use OpClass::{Cluster, Gateway, Local, None, Peer};
    use Opcode as Op;

    let templates = [
        OperationTemplate::new(Op::GetNid, None)
            .force()
            .work(local::get_nid),
        // cluster
        OperationTemplate::new(Op::NewVdi, Cluster)
            .admin()
            .work(cluster::new_vdi)
            .main(cluster::post_new_vdi),
        OperationTemplate::new(Op::DelVdi, Cluster)
            .admin()
            .work(cluster::del_vdi)
            .main(cluster::post_del_vdi),
        OperationTemplate::new(Op::GetVdiInfo, Cluster).work(cluster::get_vdi_info),
        OperationTemplate::new(Op::LockVdi, Cluster).work(cluster::get_vdi_info),
        OperationTemplate::new(Op::ReleaseVdi, Cluster).work(cluster::release_vdi),
        OperationTemplate::new(Op::MakeFs, Cluster)
            .force()
            .admin()
            .main(cluster::make_fs),
        OperationTemplate::new(Op::Shutdown, Cluster)
            .force()
            .admin()
            .main(cluster::shutdown),
        OperationTemplate::new(Op::ForceRecover, Cluster)
            .force()
            .admin()
            .work(cluster::force_recover)
            .main(cluster::post_force_recover),
        OperationTemplate::new(Op::NotifyVdiAdd, Cluster)
            .force()
            .main(cluster::notify_vdi_add),
        OperationTemplate::new(Op::DeleteCache, Cluster).main(cluster::delete_cache),
        OperationTemplate::new(Op::CompleteRecovery, Cluster)
            .force()
            .main(cluster::complete_recovery),
        OperationTemplate::new(Op::GetVdiAttr, Cluster).work(cluster::get_vdi_attr),
        OperationTemplate::new(Op::AlterClusterCopy, Cluster)
            .admin()
            .main(cluster::alter_cluster_copy),
        // local
        OperationTemplate::new(Op::GetStoreList, Local)
            .force()
            .work(local::get_store_list),
        OperationTemplate::new(Op::ReadVdis, Local)
            .force()
            .main(local::read_vdis),
        OperationTemplate::new(Op::GetNodeList, Local)
            .force()
            .main(local::get_node_list),
        OperationTemplate::new(Op::StatSheep, Local).work(local::stat_sheep),
        OperationTemplate::new(Op::StatCluster, Local)
            .force()
            .work(local::stat_cluster),
        OperationTemplate::new(Op::GetObjList, Local).work(local::get_obj_list),
        OperationTemplate::new(Op::GetEpoch, Local).work(local::get_epoch),
        OperationTemplate::new(Op::FlushVdi, Local).work(local::flush_vdi),
        OperationTemplate::new(Op::DiscardObj, Local).work(local::discard_obj),
        OperationTemplate::new(Op::FlushDelCache, Local).work(local::flush_del_cache),
        OperationTemplate::new(Op::CachePurge, Local).work(local::cache_purge),
        OperationTemplate::new(Op::KillNode, Local)
            .force()
            .admin()
            .main(local::kill_node),
        OperationTemplate::new(Op::Stat, Local).main(local::stat),
        OperationTemplate::new(Op::GetHash, Local).work(local::get_hash),
        OperationTemplate::new(Op::Exist, Local)
            .force()
            .work(local::exist),
        OperationTemplate::new(Op::OidsExist, Local)
            .force()
            .main(local::oids_exist),
        OperationTemplate::new(Op::ClusterInfo, Local)
            .force()
            .main(local::cluster_info),
        OperationTemplate::new(Op::GetClusterDefault, Local)
            .force()
            .main(local::get_cluster_default),
        OperationTemplate::new(Op::StatRecovery, Local).main(local::stat_recovery),
        OperationTemplate::new(Op::GetCacheInfo, Local).work(local::get_cache_info),
        OperationTemplate::new(Op::GetLoglevel, Local)
            .force()
            .work(local::get_loglevel),
        OperationTemplate::new(Op::SetLoglevel, Local)
            .force()
            .work(local::set_loglevel),
        // gateway
        OperationTemplate::new(Op::CreateAndWriteObj, Gateway).work(gateway::forward_obj),
        OperationTemplate::new(Op::ReadObj, Gateway).work(gateway::forward_obj),
        OperationTemplate::new(Op::WriteObj, Gateway).work(gateway::forward_obj),
        OperationTemplate::new(Op::RemoveObj, Gateway).work(gateway::forward_obj),
        OperationTemplate::new(Op::VdiRead, Gateway).work(gateway::vdi_read),
        OperationTemplate::new(Op::VdiWrite, Gateway).work(gateway::vdi_write),
        // peer
        OperationTemplate::new(Op::CreateAndWritePeer, Peer).work(peer::create_and_write_obj),
        OperationTemplate::new(Op::ReadPeer, Peer).work(peer::read_obj),
        OperationTemplate::new(Op::WritePeer, Peer).work(peer::write_obj),
        OperationTemplate::new(Op::RemovePeer, Peer).work(peer::remove_obj),
    ];

    templates
        .into_iter()
        .try_fold(Registry::builder(), |builder, t| builder.register(t))
        .map(|builder| builder.build())
}

/// NUL-padded VDI name at the start of `data`
///
/// The name field is [`MAX_VDI_LEN`] bytes; a payload must hold at least
/// that much and the name must be valid UTF-8 and not empty.
pub(crate) fn parse_name(data: &[u8]) -> OpResult<String> {
    let field = data.get(..MAX_VDI_LEN).ok_or(ResultCode::InvalidParameters)?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    match std::str::from_utf8(&field[..end]) {
        Ok(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(ResultCode::InvalidParameters),
    }
}

/// NUL-padded name field for `name`
pub(crate) fn name_field(name: &str) -> Vec<u8> {
    let mut buf = vec![0u8; MAX_VDI_LEN];
    let len = name.len().min(MAX_VDI_LEN - 1);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

/// Encode `items` as consecutive little-endian values
pub(crate) fn encode_le<T, const N: usize>(
    items: impl IntoIterator<Item = T>,
    f: impl Fn(T) -> [u8; N],
) -> Vec<u8> {
    items.into_iter().flat_map(f).collect()
}
