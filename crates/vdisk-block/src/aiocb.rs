//! Logical I/O control blocks
//!
//! An [`Aiocb`] tracks one client read or write against a VDI while its
//! object sub-requests are in flight. Every [`SubRequest`] holds one
//! reference on the pending counter; the completion fires once, from
//! whichever thread drops the last reference.

use crate::slot::SlotRange;
use crate::vdi::Vdi;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use vdisk_common::{Epoch, ObjectId, OpResult, ResultCode};

/// Direction of a logical I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
}

/// Callback invoked once when a logical I/O finishes
///
/// Reads receive the assembled data; writes receive empty bytes.
pub type Completion = Box<dyn FnOnce(OpResult<Bytes>) + Send>;

/// Control block of one logical VDI I/O
pub struct Aiocb {
    vdi: Arc<Vdi>,
    kind: IoKind,
    offset: u64,
    length: u64,
    epoch: Epoch,
    /// Write payload
    data: Bytes,
    /// Read result, zero-filled up front
    read_buf: Mutex<BytesMut>,
    pending: AtomicUsize,
    done: AtomicBool,
    error: Mutex<Option<ResultCode>>,
    completion: Mutex<Option<Completion>>,
}

impl Aiocb {
    /// Control block for reading `length` bytes at `offset`
    pub fn read(
        vdi: Arc<Vdi>,
        offset: u64,
        length: u64,
        epoch: Epoch,
        completion: Completion,
    ) -> Arc<Self> {
        let mut buf = BytesMut::new();
        buf.resize(length as usize, 0);
        Arc::new(Self::new(
            vdi,
            IoKind::Read,
            offset,
            length,
            epoch,
            Bytes::new(),
            buf,
            completion,
        ))
    }

    /// Control block for writing `data` at `offset`
    pub fn write(
        vdi: Arc<Vdi>,
        offset: u64,
        data: Bytes,
        epoch: Epoch,
        completion: Completion,
    ) -> Arc<Self> {
        let length = data.len() as u64;
        Arc::new(Self::new(
            vdi,
            IoKind::Write,
            offset,
            length,
            epoch,
            data,
            BytesMut::new(),
            completion,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        vdi: Arc<Vdi>,
        kind: IoKind,
        offset: u64,
        length: u64,
        epoch: Epoch,
        data: Bytes,
        read_buf: BytesMut,
        completion: Completion,
    ) -> Self {
        Self {
            vdi,
            kind,
            offset,
            length,
            epoch,
            data,
            read_buf: Mutex::new(read_buf),
            pending: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
            completion: Mutex::new(Some(completion)),
        }
    }

    /// Target VDI
    #[must_use]
    pub fn vdi(&self) -> &Arc<Vdi> {
        &self.vdi
    }

    #[must_use]
    pub const fn kind(&self) -> IoKind {
        self.kind
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Outstanding references
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the completion already fired
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Take a reference
    pub(crate) fn get(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop a reference, completing the I/O when it was the last one
    pub(crate) fn put(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
    }

    /// Record a failure; the first one wins
    pub(crate) fn record_error(&self, code: ResultCode) {
        let mut error = self.error.lock();
        if error.is_none() {
            *error = Some(code);
        }
    }

    /// Copy read data into the result buffer
    pub(crate) fn fill(&self, buf_offset: u64, data: &[u8]) {
        let mut buf = self.read_buf.lock();
        let start = buf_offset as usize;
        let end = (start + data.len()).min(buf.len());
        if start < end {
            buf[start..end].copy_from_slice(&data[..end - start]);
        }
    }

    /// Payload bytes for a sub-request covering `range`
    pub(crate) fn payload(&self, range: &SlotRange) -> Bytes {
        match self.kind {
            IoKind::Read => Bytes::new(),
            IoKind::Write => {
                let start = range.buf_offset as usize;
                self.data.slice(start..start + range.length as usize)
            }
        }
    }

    fn finish(&self) {
        if self
            .done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let result = match *self.error.lock() {
            Some(code) => Err(code),
            None => match self.kind {
                IoKind::Read => Ok(std::mem::take(&mut *self.read_buf.lock()).freeze()),
                IoKind::Write => Ok(Bytes::new()),
            },
        };

        let completion = self.completion.lock().take();
        if let Some(completion) = completion {
            completion(result);
        }
    }
}

impl fmt::Debug for Aiocb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aiocb")
            .field("vdi", &self.vdi.id())
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Operation performed by a sub-request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubOp {
    Read,
    Write,
    /// Allocate the object, then write
    Create,
}

/// One object-level piece of a logical I/O
#[derive(Debug)]
pub struct SubRequest {
    pub(crate) aiocb: Arc<Aiocb>,
    /// Object read or written
    pub oid: ObjectId,
    /// Ancestor object whose bytes seed a copy-on-write create
    pub cow_oid: Option<ObjectId>,
    /// Slot index within the VDI
    pub idx: u64,
    /// Offset within the object
    pub offset: u64,
    pub length: u64,
    /// Offset within the logical I/O buffer
    pub buf_offset: u64,
    /// Inode update order; zero for data requests
    pub seq_num: u64,
    pub op: SubOp,
    pub data: Bytes,
}

impl SubRequest {
    /// Sub-request for `range` of `aiocb`, taking a reference on it
    pub(crate) fn new(
        aiocb: &Arc<Aiocb>,
        oid: ObjectId,
        cow_oid: Option<ObjectId>,
        range: &SlotRange,
    ) -> Self {
        aiocb.get();
        let op = match aiocb.kind() {
            IoKind::Read => SubOp::Read,
            IoKind::Write => SubOp::Write,
        };
        Self {
            aiocb: Arc::clone(aiocb),
            oid,
            cow_oid,
            idx: range.idx,
            offset: range.offset,
            length: range.length,
            buf_offset: range.buf_offset,
            seq_num: 0,
            op,
            data: aiocb.payload(range),
        }
    }

    /// Sub-request writing `data` at `offset` of `oid`, taking a reference on `aiocb`
    pub(crate) fn write_to(
        aiocb: &Arc<Aiocb>,
        oid: ObjectId,
        offset: u64,
        data: Bytes,
        seq_num: u64,
    ) -> Self {
        aiocb.get();
        Self {
            aiocb: Arc::clone(aiocb),
            oid,
            cow_oid: None,
            idx: 0,
            offset,
            length: data.len() as u64,
            buf_offset: 0,
            seq_num,
            op: SubOp::Write,
            data,
        }
    }

    /// Logical I/O this request belongs to
    #[must_use]
    pub fn aiocb(&self) -> &Arc<Aiocb> {
        &self.aiocb
    }

    /// Epoch of the logical I/O
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.aiocb.epoch()
    }
}
