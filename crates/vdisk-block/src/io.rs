//! VDI I/O splitting and create-then-write
//!
//! [`VdiIo::split_and_submit`] turns one logical read or write into
//! object sub-requests and hands them to a [`SubmitSink`]. The sink
//! reports each outcome back through [`VdiIo::respond`]; a successful
//! create records the new owner in the inode before any parked write to
//! the same object is released.

use crate::aiocb::{Aiocb, IoKind, SubOp, SubRequest};
use crate::blocking::{Admission, BlockingList};
use crate::inode::owner_offset;
use crate::slot::SlotMapper;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use vdisk_common::{ObjectId, OpResult};

/// Executes object sub-requests
///
/// Implementations call [`VdiIo::respond`] exactly once per request, from
/// any thread, possibly before `submit` returns.
pub trait SubmitSink: Send + Sync {
    fn submit(&self, io: &VdiIo, req: SubRequest);
}

struct Inner {
    blocking: BlockingList,
    seq_num: AtomicU64,
    sink: Arc<dyn SubmitSink>,
}

/// Splitter and create protocol for VDI I/O
#[derive(Clone)]
pub struct VdiIo {
    inner: Arc<Inner>,
}

impl VdiIo {
    /// Create a splitter submitting to `sink`
    pub fn new(sink: Arc<dyn SubmitSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                blocking: BlockingList::new(),
                seq_num: AtomicU64::new(0),
                sink,
            }),
        }
    }

    /// Objects with a create in flight
    #[must_use]
    pub fn blocking(&self) -> &BlockingList {
        &self.inner.blocking
    }

    /// Last inode update sequence number handed out
    #[must_use]
    pub fn seq_num(&self) -> u64 {
        self.inner.seq_num.load(Ordering::Acquire)
    }

    fn submit(&self, req: SubRequest) {
        debug!(
            "submit {:?} {} offset {} len {}",
            req.op, req.oid, req.offset, req.length
        );
        self.inner.sink.submit(self, req);
    }

    /// Split a logical I/O into sub-requests and submit them
    ///
    /// `aiocb.length()` must be non-zero and the range must lie within
    /// the VDI.
    pub fn split_and_submit(&self, aiocb: &Arc<Aiocb>) {
        let vdi = Arc::clone(aiocb.vdi());
        let vid = vdi.id();
        let mapper = SlotMapper::new(vdi.inode().object_size());

        // held until every sub-request has been generated
        aiocb.get();

        for range in mapper.ranges(aiocb.offset(), aiocb.length()) {
            let owner = vdi.owner(range.idx);
            let mut oid = ObjectId::data(vid, range.idx);
            let mut cow_oid = None;

            if !owner.is_none() && owner != vid {
                match aiocb.kind() {
                    IoKind::Write => cow_oid = Some(ObjectId::data(owner, range.idx)),
                    IoKind::Read => oid = ObjectId::data(owner, range.idx),
                }
            }

            let req = SubRequest::new(aiocb, oid, cow_oid, &range);
            if !owner.is_none() && cow_oid.is_none() {
                self.submit(req);
                continue;
            }

            match aiocb.kind() {
                // nothing stored yet; the slot reads as zeroes
                IoKind::Read => self.end(req),
                IoKind::Write => match self.inner.blocking.admit(req, &vdi) {
                    Admission::Create(req) | Admission::Write(req) => self.submit(req),
                    Admission::Parked => {}
                },
            }
        }

        aiocb.put();
    }

    /// Report the outcome of a submitted sub-request
    ///
    /// Reads pass the bytes read; other requests pass empty bytes.
    pub fn respond(&self, req: SubRequest, result: OpResult<Bytes>) {
        match (req.op, result) {
            (SubOp::Create, Ok(_)) => self.complete_create(req),
            (SubOp::Create, Err(code)) => self.fail_create(req, code),
            (SubOp::Read, Ok(data)) => {
                req.aiocb.fill(req.buf_offset, &data);
                self.end(req);
            }
            (SubOp::Write, Ok(_)) => self.end(req),
            (_, Err(code)) => {
                warn!("{:?} of {} failed: {}", req.op, req.oid, code);
                req.aiocb.record_error(code);
                self.end(req);
            }
        }
    }

    /// Record a created object in the inode and release writes parked on it
    fn complete_create(&self, req: SubRequest) {
        let aiocb = Arc::clone(&req.aiocb);
        let vdi = aiocb.vdi();
        let vid = vdi.id();

        let seq_num = self.inner.seq_num.fetch_add(1, Ordering::AcqRel) + 1;
        let update = SubRequest::write_to(
            &aiocb,
            ObjectId::inode(vid),
            owner_offset(req.idx),
            Bytes::copy_from_slice(&vid.get().to_le_bytes()),
            seq_num,
        );

        if let Err(code) = vdi.set_owner(req.idx, vid) {
            aiocb.record_error(code);
        }
        debug!("created {}, inode update #{}", req.oid, seq_num);

        self.submit(update);
        for parked in self.inner.blocking.finish_create(req.oid) {
            self.submit(parked);
        }
        self.end(req);
    }

    fn fail_create(&self, req: SubRequest, code: vdisk_common::ResultCode) {
        warn!("create of {} failed: {}", req.oid, code);
        req.aiocb.record_error(code);
        if let Some(next) = self.inner.blocking.abort_create(req.oid) {
            self.submit(next);
        }
        self.end(req);
    }

    fn end(&self, req: SubRequest) {
        req.aiocb.put();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::Inode;
    use crate::vdi::Vdi;
    use bytes::BytesMut;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use vdisk_common::{INODE_SIZE, ResultCode, VdiId};

    const OBJ: u64 = 4096;

    /// Records every sub-request; executes them against a map of objects
    /// unless told to hold creates.
    #[derive(Default)]
    struct TestSink {
        objects: Mutex<HashMap<ObjectId, Vec<u8>>>,
        log: Mutex<Vec<(SubOp, ObjectId, Option<ObjectId>, u64, u64)>>,
        hold_creates: bool,
        held: Mutex<Vec<SubRequest>>,
        fail_creates: AtomicUsize,
    }

    impl TestSink {
        fn holding() -> Self {
            Self {
                hold_creates: true,
                ..Self::default()
            }
        }

        fn execute(&self, req: &SubRequest) -> OpResult<Bytes> {
            let mut objects = self.objects.lock();
            let off = req.offset as usize;
            if req.oid.is_inode() {
                objects
                    .entry(req.oid)
                    .or_insert_with(|| vec![0u8; INODE_SIZE as usize]);
            }
            match req.op {
                SubOp::Read => {
                    let obj = objects.get(&req.oid).ok_or(ResultCode::NoObject)?;
                    Ok(Bytes::copy_from_slice(&obj[off..off + req.length as usize]))
                }
                SubOp::Write => {
                    let obj = objects.get_mut(&req.oid).ok_or(ResultCode::NoObject)?;
                    obj[off..off + req.data.len()].copy_from_slice(&req.data);
                    Ok(Bytes::new())
                }
                SubOp::Create => {
                    let mut obj = match req.cow_oid {
                        Some(cow) => objects.get(&cow).cloned().ok_or(ResultCode::NoObject)?,
                        None => vec![0u8; OBJ as usize],
                    };
                    obj[off..off + req.data.len()].copy_from_slice(&req.data);
                    objects.insert(req.oid, obj);
                    Ok(Bytes::new())
                }
            }
        }

        fn creates(&self) -> usize {
            self.log
                .lock()
                .iter()
                .filter(|(op, ..)| *op == SubOp::Create)
                .count()
        }
    }

    impl SubmitSink for TestSink {
        fn submit(&self, io: &VdiIo, req: SubRequest) {
            self.log
                .lock()
                .push((req.op, req.oid, req.cow_oid, req.offset, req.length));
            if req.op == SubOp::Create {
                if self.hold_creates {
                    self.held.lock().push(req);
                    return;
                }
                if self
                    .fail_creates
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    io.respond(req, Err(ResultCode::Eio));
                    return;
                }
            }
            let result = self.execute(&req);
            io.respond(req, result);
        }
    }

    type Outcome = Arc<Mutex<Vec<OpResult<Bytes>>>>;

    fn recorder() -> (Outcome, crate::aiocb::Completion) {
        let outcome: Outcome = Arc::default();
        let out = Arc::clone(&outcome);
        (outcome, Box::new(move |res| out.lock().push(res)))
    }

    fn vdi(vid: u32) -> Arc<Vdi> {
        Arc::new(Vdi::new(Inode::new("disk", VdiId::new(vid), 64 * OBJ, 12, 1)))
    }

    fn pattern(len: usize) -> Bytes {
        let mut buf = BytesMut::with_capacity(len);
        for i in 0..len {
            buf.extend_from_slice(&[(i % 251) as u8]);
        }
        buf.freeze()
    }

    fn write(io: &VdiIo, vdi: &Arc<Vdi>, offset: u64, data: Bytes) -> Outcome {
        let (outcome, completion) = recorder();
        let aiocb = Aiocb::write(Arc::clone(vdi), offset, data, 1, completion);
        io.split_and_submit(&aiocb);
        outcome
    }

    fn read(io: &VdiIo, vdi: &Arc<Vdi>, offset: u64, len: u64) -> Outcome {
        let (outcome, completion) = recorder();
        let aiocb = Aiocb::read(Arc::clone(vdi), offset, len, 1, completion);
        io.split_and_submit(&aiocb);
        outcome
    }

    #[test]
    fn test_write_splits_across_two_objects() {
        let sink = Arc::new(TestSink::default());
        let io = VdiIo::new(sink.clone());
        let vdi = vdi(1);

        let outcome = write(&io, &vdi, 3000, pattern(6000));
        assert_eq!(outcome.lock().as_slice(), &[Ok(Bytes::new())]);

        let log = sink.log.lock();
        let data: Vec<_> = log.iter().filter(|(_, oid, ..)| !oid.is_inode()).collect();
        assert_eq!(data.len(), 2);
        assert_eq!(
            (data[0].0, data[0].1, data[0].3, data[0].4),
            (SubOp::Create, ObjectId::data(VdiId::new(1), 0), 3000, 1096)
        );
        assert_eq!(
            (data[1].0, data[1].1, data[1].3, data[1].4),
            (SubOp::Create, ObjectId::data(VdiId::new(1), 1), 0, 4904)
        );

        // one inode update per created object
        let updates: Vec<_> = log.iter().filter(|(_, oid, ..)| oid.is_inode()).collect();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].3, owner_offset(0));
        assert_eq!(updates[1].3, owner_offset(1));
        assert_eq!(io.seq_num(), 2);

        assert_eq!(vdi.owner(0), vdi.id());
        assert_eq!(vdi.owner(1), vdi.id());
    }

    #[test]
    fn test_write_then_read_back() {
        let sink = Arc::new(TestSink::default());
        let io = VdiIo::new(sink.clone());
        let vdi = vdi(1);
        let data = pattern(3 * OBJ as usize + 17);

        write(&io, &vdi, 100, data.clone());
        // second write goes in place
        let outcome = write(&io, &vdi, 200, Bytes::from_static(b"overwrite"));
        assert_eq!(outcome.lock().len(), 1);
        assert_eq!(sink.creates(), 4);

        let outcome = read(&io, &vdi, 100, data.len() as u64);
        let got = outcome.lock().pop().unwrap().unwrap();
        assert_eq!(&got[..100], &data[..100]);
        assert_eq!(&got[100..109], b"overwrite");
        assert_eq!(&got[109..], &data[109..]);
    }

    #[test]
    fn test_read_of_unallocated_slot_submits_nothing() {
        let sink = Arc::new(TestSink::default());
        let io = VdiIo::new(sink.clone());
        let vdi = vdi(1);

        let outcome = read(&io, &vdi, 5 * OBJ + 10, 2 * OBJ);
        let got = outcome.lock().pop().unwrap().unwrap();
        assert_eq!(got.len(), 2 * OBJ as usize);
        assert!(got.iter().all(|&b| b == 0));
        assert!(sink.log.lock().is_empty());
    }

    #[test]
    fn test_read_of_partially_allocated_range() {
        let sink = Arc::new(TestSink::default());
        let io = VdiIo::new(sink.clone());
        let vdi = vdi(1);
        write(&io, &vdi, OBJ, pattern(OBJ as usize));

        let outcome = read(&io, &vdi, 0, 3 * OBJ);
        let got = outcome.lock().pop().unwrap().unwrap();
        assert!(got[..OBJ as usize].iter().all(|&b| b == 0));
        assert_eq!(&got[OBJ as usize..2 * OBJ as usize], &pattern(OBJ as usize)[..]);
        assert!(got[2 * OBJ as usize..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_of_ancestor_slot_targets_ancestor() {
        let sink = Arc::new(TestSink::default());
        let io = VdiIo::new(sink.clone());
        let base = vdi(0xa);
        write(&io, &base, 2 * OBJ, pattern(OBJ as usize));

        let child = Arc::new(Vdi::new(base.inode().derive(VdiId::new(0xb), 2)));
        sink.log.lock().clear();

        let outcome = read(&io, &child, 2 * OBJ, OBJ);
        let got = outcome.lock().pop().unwrap().unwrap();
        assert_eq!(got, pattern(OBJ as usize));

        let log = sink.log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, SubOp::Read);
        assert_eq!(log[0].1, ObjectId::data(VdiId::new(0xa), 2));
    }

    #[test]
    fn test_write_to_ancestor_slot_copies_on_write() {
        let sink = Arc::new(TestSink::default());
        let io = VdiIo::new(sink.clone());
        let base = vdi(0xa);
        write(&io, &base, 2 * OBJ, pattern(OBJ as usize));

        let child = Arc::new(Vdi::new(base.inode().derive(VdiId::new(0xb), 2)));
        sink.log.lock().clear();

        write(&io, &child, 2 * OBJ + 10, Bytes::from_static(b"new"));
        {
            let log = sink.log.lock();
            assert_eq!(log[0].0, SubOp::Create);
            assert_eq!(log[0].1, ObjectId::data(VdiId::new(0xb), 2));
            assert_eq!(log[0].2, Some(ObjectId::data(VdiId::new(0xa), 2)));
        }
        assert_eq!(child.owner(2), child.id());
        assert_eq!(base.owner(2), base.id());

        let got = read(&io, &child, 2 * OBJ, OBJ).lock().pop().unwrap().unwrap();
        let mut expected = pattern(OBJ as usize).to_vec();
        expected[10..13].copy_from_slice(b"new");
        assert_eq!(&got[..], &expected[..]);

        // the ancestor is untouched
        let got = read(&io, &base, 2 * OBJ, OBJ).lock().pop().unwrap().unwrap();
        assert_eq!(got, pattern(OBJ as usize));
    }

    #[test]
    fn test_concurrent_creates_of_same_object() {
        let sink = Arc::new(TestSink::holding());
        let io = VdiIo::new(sink.clone());
        let vdi = vdi(1);
        let oid = ObjectId::data(vdi.id(), 0);

        let first = write(&io, &vdi, 0, Bytes::from_static(b"aaaa"));
        let second = write(&io, &vdi, 8, Bytes::from_static(b"bbbb"));

        // one create submitted, the other write parked
        assert_eq!(sink.creates(), 1);
        assert_eq!(io.blocking().parked(oid), 1);
        assert!(first.lock().is_empty());
        assert!(second.lock().is_empty());

        let create = sink.held.lock().pop().unwrap();
        let result = sink.execute(&create);
        io.respond(create, result);

        assert_eq!(sink.creates(), 1);
        assert!(!io.blocking().is_creating(oid));
        assert_eq!(first.lock().as_slice(), &[Ok(Bytes::new())]);
        assert_eq!(second.lock().as_slice(), &[Ok(Bytes::new())]);

        // the inode update was submitted before the parked write
        {
            let log = sink.log.lock();
            let ops: Vec<_> = log.iter().map(|(op, oid, ..)| (*op, oid.is_inode())).collect();
            assert_eq!(
                ops,
                vec![
                    (SubOp::Create, false),
                    (SubOp::Write, true),
                    (SubOp::Write, false),
                ]
            );
        }

        let got = read(&io, &vdi, 0, 12).lock().pop().unwrap().unwrap();
        assert_eq!(&got[..], b"aaaa\0\0\0\0bbbb");
    }

    #[test]
    fn test_failed_create_promotes_parked_write() {
        let sink = Arc::new(TestSink::holding());
        let io = VdiIo::new(sink.clone());
        let vdi = vdi(1);
        let oid = ObjectId::data(vdi.id(), 0);

        let first = write(&io, &vdi, 0, Bytes::from_static(b"aaaa"));
        let second = write(&io, &vdi, 8, Bytes::from_static(b"bbbb"));

        let create = sink.held.lock().pop().unwrap();
        io.respond(create, Err(ResultCode::Eio));

        assert_eq!(first.lock().as_slice(), &[Err(ResultCode::Eio)]);
        assert!(vdi.owner(0).is_none());
        assert!(second.lock().is_empty());
        assert_eq!(sink.creates(), 2);

        let create = sink.held.lock().pop().unwrap();
        assert_eq!(create.offset, 8);
        let result = sink.execute(&create);
        io.respond(create, result);

        assert_eq!(second.lock().as_slice(), &[Ok(Bytes::new())]);
        assert_eq!(vdi.owner(0), vdi.id());
        assert!(!io.blocking().is_creating(oid));
    }

    #[test]
    fn test_completion_fires_once_for_any_fan_out() {
        for slots in [1u64, 2, 5] {
            let sink = Arc::new(TestSink::default());
            let io = VdiIo::new(sink.clone());
            let vdi = vdi(1);

            let calls = Arc::new(AtomicUsize::new(0));
            let c = Arc::clone(&calls);
            let aiocb = Aiocb::write(
                Arc::clone(&vdi),
                OBJ / 2,
                pattern((slots * OBJ - OBJ / 2) as usize),
                1,
                Box::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            );
            io.split_and_submit(&aiocb);

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(aiocb.pending(), 0);
            assert!(aiocb.is_done());
        }
    }

    #[test]
    fn test_concurrent_writers_across_threads() {
        let sink = Arc::new(TestSink::default());
        let io = VdiIo::new(sink.clone());
        let vdi = vdi(1);
        let done = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for t in 0..8u8 {
                let (io, vdi, done) = (io.clone(), Arc::clone(&vdi), Arc::clone(&done));
                s.spawn(move || {
                    let aiocb = Aiocb::write(
                        vdi,
                        u64::from(t) * 8,
                        Bytes::from(vec![t + 1; 8]),
                        1,
                        Box::new(move |res| {
                            assert!(res.is_ok());
                            done.fetch_add(1, Ordering::SeqCst);
                        }),
                    );
                    io.split_and_submit(&aiocb);
                });
            }
        });

        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert_eq!(sink.creates(), 1);

        let got = read(&io, &vdi, 0, 64).lock().pop().unwrap().unwrap();
        for t in 0..8u8 {
            let start = usize::from(t) * 8;
            assert!(got[start..start + 8].iter().all(|&b| b == t + 1));
        }
    }
}
