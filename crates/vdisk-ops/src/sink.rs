//! Routes VDI sub-requests to the peer handlers of this node

use crate::context::NodeContext;
use crate::handlers::peer;
use crate::opcode::Opcode;
use crate::request::{FLAG_CMD_COW, Request};
use bytes::Bytes;
use std::sync::Weak;
use vdisk_block::{SubOp, SubRequest, SubmitSink, VdiIo};
use vdisk_common::ResultCode;

/// [`SubmitSink`] executing sub-requests as peer operations
pub(crate) struct StoreSink {
    ctx: Weak<NodeContext>,
}

impl StoreSink {
    pub(crate) const fn new(ctx: Weak<NodeContext>) -> Self {
        Self { ctx }
    }
}

/// Peer request carrying `sub`
fn peer_request(ctx: &NodeContext, sub: &SubRequest) -> (Opcode, Request) {
    let op = match sub.op {
        SubOp::Read => Opcode::ReadPeer,
        SubOp::Write => Opcode::WritePeer,
        SubOp::Create => Opcode::CreateAndWritePeer,
    };

    let mut req = Request::new(op, ctx.local_node());
    if sub.op != SubOp::Read {
        req = req.with_data(&sub.data);
    }
    req.header.epoch = sub.epoch();
    req.header.data_length = sub.length as u32;
    req.header.obj.oid = sub.oid;
    req.header.obj.offset = sub.offset;
    if let (SubOp::Create, Some(cow_oid)) = (sub.op, sub.cow_oid) {
        req.header.flags |= FLAG_CMD_COW;
        req.header.obj.cow_oid = cow_oid;
    }
    (op, req)
}

impl SubmitSink for StoreSink {
    fn submit(&self, io: &VdiIo, sub: SubRequest) {
        let Some(ctx) = self.ctx.upgrade() else {
            io.respond(sub, Err(ResultCode::Shutdown));
            return;
        };

        let (op, mut req) = peer_request(&ctx, &sub);
        let result = peer::execute(&ctx, op, &mut req).map(|()| match sub.op {
            SubOp::Read => req.response_data(),
            SubOp::Write | SubOp::Create => Bytes::new(),
        });
        io.respond(sub, result);
    }
}
