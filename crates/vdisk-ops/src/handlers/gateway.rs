//! Gateway operations
//!
//! Object requests are forwarded to the peer handler of the matching
//! peer opcode. VDI requests go through the splitter and block until the
//! logical I/O completes; they run on worker threads only.

use crate::context::NodeContext;
use crate::handlers::peer;
use crate::registry::gateway_to_peer;
use crate::request::Request;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;
use vdisk_block::{Aiocb, Completion, IoKind};
use vdisk_common::{OpResult, ResultCode};

/// Run an object request as its peer counterpart at the current epoch
pub(crate) fn forward_obj(ctx: &NodeContext, req: &mut Request) -> OpResult {
    let peer_op = req
        .opcode()
        .ok()
        .and_then(gateway_to_peer)
        .ok_or(ResultCode::InvalidParameters)?;

    let (opcode, epoch) = (req.header.opcode, req.header.epoch);
    req.header.opcode = peer_op.code();
    req.header.epoch = ctx.epoch();
    let result = peer::execute(ctx, peer_op, req);
    req.header.opcode = opcode;
    req.header.epoch = epoch;
    result
}

pub(crate) fn vdi_read(ctx: &NodeContext, req: &mut Request) -> OpResult {
    vdi_io(ctx, req, IoKind::Read)
}

pub(crate) fn vdi_write(ctx: &NodeContext, req: &mut Request) -> OpResult {
    vdi_io(ctx, req, IoKind::Write)
}

fn vdi_io(ctx: &NodeContext, req: &mut Request, kind: IoKind) -> OpResult {
    let hdr = req.header;
    let vdi = ctx.vdis.get(hdr.vdi.vdi_id)?;
    let offset = hdr.obj.offset;
    let len = u64::from(hdr.data_length);
    let size = vdi.inode().vdi_size;

    if len == 0 || offset.checked_add(len).is_none_or(|end| end > size) {
        return Err(ResultCode::InvalidParameters);
    }

    let (tx, rx) = oneshot::channel();
    let completion: Completion = Box::new(move |result| {
        // the requester only goes away if its task was cancelled
        let _ = tx.send(result);
    });
    let epoch = ctx.epoch();

    let aiocb = match kind {
        IoKind::Read => Aiocb::read(vdi, offset, len, epoch, completion),
        IoKind::Write => {
            if vdi.is_snapshot() {
                return Err(ResultCode::ReadOnly);
            }
            let data = req
                .data
                .get(..len as usize)
                .ok_or(ResultCode::InvalidParameters)?;
            Aiocb::write(vdi, offset, Bytes::copy_from_slice(data), epoch, completion)
        }
    };

    debug!("{:?} {} bytes at {} of {}", kind, len, offset, hdr.vdi.vdi_id);
    ctx.io().split_and_submit(&aiocb);

    let data = rx.blocking_recv().map_err(|_| ResultCode::SystemError)??;
    if kind == IoKind::Read {
        req.set_response_data(&data);
    }
    Ok(())
}
