//! Peer operations
//!
//! Each one is a single call into the local store driver.

use crate::context::NodeContext;
use crate::opcode::Opcode;
use crate::request::{FLAG_CMD_COW, Request};
use tracing::debug;
use vdisk_common::{OpResult, ResultCode};
use vdisk_store::object_len;

/// Run the peer operation `op` on `req`
pub(crate) fn execute(ctx: &NodeContext, op: Opcode, req: &mut Request) -> OpResult {
    match op {
        Opcode::CreateAndWritePeer => create_and_write_obj(ctx, req),
        Opcode::ReadPeer => read_obj(ctx, req),
        Opcode::WritePeer => write_obj(ctx, req),
        Opcode::RemovePeer => remove_obj(ctx, req),
        _ => Err(ResultCode::InvalidParameters),
    }
}

pub(crate) fn read_obj(ctx: &NodeContext, req: &mut Request) -> OpResult {
    if ctx.options().gateway_only {
        return Err(ResultCode::NoObject);
    }

    let store = ctx.store.get()?;
    let hdr = req.header;
    let len = object_len(hdr.obj.oid, ctx.options().object_size);
    match hdr.obj.offset.checked_add(u64::from(hdr.data_length)) {
        Some(end) if end <= len => {}
        _ => return Err(ResultCode::InvalidParameters),
    }
    let mut buf = vec![0u8; hdr.data_length as usize];
    store.read(hdr.obj.oid, hdr.epoch, hdr.obj.offset, &mut buf)?;
    req.set_response_data(&buf);
    Ok(())
}

pub(crate) fn write_obj(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let store = ctx.store.get()?;
    let hdr = req.header;
    store.write(hdr.obj.oid, hdr.epoch, hdr.obj.offset, &req.data)
}

/// Create an object, seeded from `obj.cow_oid` when the COW flag is set
pub(crate) fn create_and_write_obj(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let store = ctx.store.get()?;
    let hdr = req.header;

    if !req.has_flag(FLAG_CMD_COW) {
        return store.create_and_write(hdr.obj.oid, hdr.epoch, hdr.obj.offset, &req.data);
    }

    let len = object_len(hdr.obj.oid, ctx.options().object_size);
    let start = hdr.obj.offset as usize;
    let end = start
        .checked_add(req.data.len())
        .filter(|&end| end as u64 <= len)
        .ok_or(ResultCode::InvalidParameters)?;

    debug!("copying {} into {}", hdr.obj.cow_oid, hdr.obj.oid);
    let mut buf = vec![0u8; len as usize];
    store.read(hdr.obj.cow_oid, hdr.epoch, 0, &mut buf)?;
    buf[start..end].copy_from_slice(&req.data);
    store.create_and_write(hdr.obj.oid, hdr.epoch, 0, &buf)
}

pub(crate) fn remove_obj(ctx: &NodeContext, req: &mut Request) -> OpResult {
    ctx.store.get()?.remove(req.header.obj.oid)
}
