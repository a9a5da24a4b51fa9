//! Request dispatcher
//!
//! ```text
//!   submit ──► lookup ──► status gate ──► class
//!                                          │
//!        NONE ─────── work inline ─────────┤
//!        PEER ─ epoch check ─┐             │
//!        GATEWAY ────────────┼─► worker ───┤
//!        LOCAL ──────────────┘    pool     ├─► main on coordinator
//!        CLUSTER ─ lock ─► worker pool ────┘     └─► broadcast (CLUSTER)
//! ```
//!
//! Work stages run on blocking threads, at most `workers` at a time.
//! Main stages run one at a time on a single coordinator task, in the
//! order they were queued. A CLUSTER operation holds the cluster lock
//! from before its work stage until its main stage has returned.

use crate::context::NodeContext;
use crate::error::MainError;
use crate::registry::{MainFn, OpClass, OperationTemplate, Registry};
use crate::request::{Request, RequestHeader, ResponseHeader};
use bytes::BytesMut;
use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, Semaphore, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use vdisk_common::{Epoch, Node, OpResult, ResultCode};

/// Default size of the work-stage pool
pub const DEFAULT_WORKERS: usize = 8;

/// Default capacity of the main-stage queue
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Called when a main stage reports that node state is no longer sound
pub type FatalHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Log and abort the process
fn abort_on_fatal() -> FatalHook {
    Arc::new(|msg: &str| {
        error!("fatal: {}", msg);
        std::process::abort();
    })
}

/// Exclusion between CLUSTER operations
#[derive(Debug, Default)]
pub struct ClusterLock(Mutex<()>);

/// Held while a CLUSTER operation runs
#[derive(Debug)]
pub struct ClusterLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl ClusterLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other CLUSTER operation runs
    pub async fn acquire(&self) -> ClusterLockGuard<'_> {
        ClusterLockGuard {
            _guard: self.0.lock().await,
        }
    }

    /// Whether a CLUSTER operation holds the lock
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.0.try_lock().is_err()
    }
}

/// Main stage queued for the coordinator
struct MainJob {
    name: &'static str,
    main: MainFn,
    req: Request,
    done: oneshot::Sender<Request>,
}

/// Settings for [`Dispatcher`]
pub struct DispatcherBuilder {
    workers: usize,
    queue_depth: usize,
    fatal_hook: FatalHook,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            fatal_hook: abort_on_fatal(),
        }
    }
}

impl DispatcherBuilder {
    /// Number of work stages allowed to run at once
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Capacity of the main-stage queue
    #[must_use]
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Replace the default log-and-abort reaction to fatal main stages
    #[must_use]
    pub fn fatal_hook(mut self, hook: FatalHook) -> Self {
        self.fatal_hook = hook;
        self
    }

    /// Spawn the coordinator and return the dispatcher
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self, ctx: Arc<NodeContext>, registry: Registry) -> Dispatcher {
        let (main_tx, main_rx) = mpsc::channel(self.queue_depth);
        tokio::spawn(coordinator(
            Arc::clone(&ctx),
            main_rx,
            Arc::clone(&self.fatal_hook),
        ));
        info!(
            "dispatcher started: {} operations, {} workers",
            registry.len(),
            self.workers
        );

        Dispatcher {
            inner: Arc::new(Inner {
                ctx,
                registry,
                workers: Semaphore::new(self.workers),
                cluster_lock: ClusterLock::new(),
                main_tx,
            }),
        }
    }
}

struct Inner {
    ctx: Arc<NodeContext>,
    registry: Registry,
    workers: Semaphore,
    cluster_lock: ClusterLock,
    main_tx: mpsc::Sender<MainJob>,
}

/// Routes requests to their handlers
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    #[must_use]
    pub fn context(&self) -> &Arc<NodeContext> {
        &self.inner.ctx
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    #[must_use]
    pub fn cluster_lock(&self) -> &ClusterLock {
        &self.inner.cluster_lock
    }

    /// Execute a request and return it with its response filled in
    pub async fn submit(&self, mut req: Request) -> Request {
        let template = match self.inner.registry.lookup(req.header.opcode) {
            Ok(template) => *template,
            Err(e) => {
                warn!("rejecting request from {}: {}", req.sender, e);
                req.response.result = ResultCode::InvalidParameters;
                return req;
            }
        };

        let ctx = &self.inner.ctx;
        ctx.stats.record_received(template.class);
        if template.admin {
            info!("{} from {}: {:?}", template.name(), req.sender, req.header);
        } else {
            debug!("{} from {}", template.name(), req.sender);
        }

        let req = self.execute(template, req).await;
        ctx.stats.record_result(template.class, req.result());
        if !req.result().is_success() {
            debug!("{} failed: {}", template.name(), req.result());
        }
        req
    }

    /// Run the main stage of a CLUSTER operation broadcast by another node
    pub async fn deliver_remote_main(&self, mut req: Request) -> Request {
        let main = self
            .inner
            .registry
            .lookup(req.header.opcode)
            .ok()
            .filter(|t| t.class == OpClass::Cluster)
            .and_then(|t| t.main.map(|main| (t.name(), main)));

        match main {
            Some((name, main)) => self.run_main(name, main, req).await,
            None => {
                warn!(
                    "no cluster main stage for opcode {:#04x} from {}",
                    req.header.opcode, req.sender
                );
                req.response.result = ResultCode::InvalidParameters;
                req
            }
        }
    }

    async fn execute(&self, template: OperationTemplate, mut req: Request) -> Request {
        let ctx = &self.inner.ctx;
        if !template.force {
            if let Err(code) = ctx.cluster().serving() {
                req.response.result = code;
                return req;
            }
        }

        match template.class {
            OpClass::None => run_inline(ctx, template, req),
            OpClass::Peer => {
                if let Err(code) = check_epoch(ctx.epoch(), &req) {
                    req.response.result = code;
                    return req;
                }
                self.run_work(template, req).await
            }
            OpClass::Gateway => self.run_work(template, req).await,
            OpClass::Local => {
                let req = self.run_work(template, req).await;
                self.then_main(template, req).await
            }
            OpClass::Cluster => {
                let _guard = self.inner.cluster_lock.acquire().await;
                let req = self.run_work(template, req).await;
                let req = self.then_main(template, req).await;
                if req.result().is_success() && template.has_main() {
                    ctx.membership.broadcast_main(&req);
                }
                req
            }
        }
    }

    /// Main stage after a successful work stage
    async fn then_main(&self, template: OperationTemplate, req: Request) -> Request {
        match template.main {
            Some(main) if req.result().is_success() => {
                self.run_main(template.name(), main, req).await
            }
            _ => req,
        }
    }

    async fn run_work(&self, template: OperationTemplate, mut req: Request) -> Request {
        let Some(work) = template.work else {
            return req;
        };
        let Ok(_permit) = self.inner.workers.acquire().await else {
            req.response.result = ResultCode::Shutdown;
            return req;
        };

        let ctx = Arc::clone(&self.inner.ctx);
        let (header, sender) = (req.header, req.sender.clone());
        let task = tokio::task::spawn_blocking(move || {
            let result = work(&ctx, &mut req);
            req.response.result = ResultCode::from_result(&result);
            req
        });

        match task.await {
            Ok(req) => req,
            Err(e) => {
                error!("{} work stage failed: {}", template.name(), e);
                lost(header, sender, ResultCode::SystemError)
            }
        }
    }

    async fn run_main(&self, name: &'static str, main: MainFn, req: Request) -> Request {
        let (header, sender) = (req.header, req.sender.clone());
        let (done, rx) = oneshot::channel();
        let job = MainJob {
            name,
            main,
            req,
            done,
        };

        if let Err(mpsc::error::SendError(job)) = self.inner.main_tx.send(job).await {
            let mut req = job.req;
            req.response.result = ResultCode::Shutdown;
            return req;
        }
        rx.await
            .unwrap_or_else(|_| lost(header, sender, ResultCode::Shutdown))
    }
}

/// Response for a request whose task never handed it back
fn lost(header: RequestHeader, sender: Node, result: ResultCode) -> Request {
    Request {
        header,
        response: ResponseHeader {
            result,
            ..ResponseHeader::default()
        },
        data: BytesMut::new(),
        sender,
    }
}

/// Run a NONE-class work stage on the calling task
fn run_inline(ctx: &NodeContext, template: OperationTemplate, mut req: Request) -> Request {
    let Some(work) = template.work else {
        return req;
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| work(ctx, &mut req)))
        .unwrap_or_else(|_| {
            error!("{} panicked", template.name());
            Err(ResultCode::SystemError)
        });
    req.response.result = ResultCode::from_result(&result);
    req
}

/// Reject peer requests from another epoch
fn check_epoch(epoch: Epoch, req: &Request) -> OpResult {
    match req.header.epoch.cmp(&epoch) {
        Ordering::Less => Err(ResultCode::OldNodeVersion),
        Ordering::Greater => Err(ResultCode::NewNodeVersion),
        Ordering::Equal => Ok(()),
    }
}

/// Run queued main stages one at a time
async fn coordinator(ctx: Arc<NodeContext>, mut rx: mpsc::Receiver<MainJob>, fatal: FatalHook) {
    while let Some(job) = rx.recv().await {
        let MainJob {
            name,
            main,
            mut req,
            done,
        } = job;
        let (header, sender) = (req.header, req.sender.clone());
        let ctx = Arc::clone(&ctx);

        let task = tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| main(&ctx, &mut req)))
                .unwrap_or_else(|_| {
                    error!("{} main stage panicked", name);
                    Err(MainError::Code(ResultCode::SystemError))
                });
            (req, result)
        });

        let req = match task.await {
            Ok((mut req, result)) => {
                match result {
                    Ok(()) => {}
                    Err(MainError::Fatal(msg)) => {
                        error!("{} main stage: {}", name, msg);
                        fatal(&msg);
                        req.response.result = ResultCode::SystemError;
                    }
                    Err(MainError::Code(code)) => req.response.result = code,
                }
                req
            }
            Err(e) => {
                error!("{} main stage failed: {}", name, e);
                lost(header, sender, ResultCode::SystemError)
            }
        };

        // the requester may have given up waiting
        let _ = done.send(req);
    }
    debug!("coordinator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeOptions;
    use crate::context::test_util::*;
    use crate::error::MainResult;
    use crate::handlers::{default_registry, name_field};
    use crate::membership::{EpochLog, Membership, StaticMembership};
    use crate::opcode::Opcode;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;
    use vdisk_common::{ClusterStatus, VdiId};
    use vdisk_store::{PlainStore, StoreDrivers};

    fn start(ctx: Arc<NodeContext>) -> Dispatcher {
        Dispatcher::builder()
            .workers(4)
            .start(ctx, default_registry().unwrap())
    }

    fn start_with(ctx: Arc<NodeContext>, registry: Registry) -> Dispatcher {
        Dispatcher::builder().workers(4).start(ctx, registry)
    }

    fn req(op: Opcode) -> Request {
        Request::new(op, local())
    }

    #[tokio::test]
    async fn test_unknown_opcode() {
        let dispatcher = start(formatted());
        let mut r = req(Opcode::Stat);
        r.header.opcode = 0xfe;
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::InvalidParameters);
    }

    #[tokio::test]
    async fn test_status_gate() {
        let dispatcher = start(context());
        let r = req(Opcode::NewVdi).with_data(&name_field("disk0"));
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::WaitForFormat);
        assert!(dispatcher.context().vdis.is_empty());

        // forced operations still run
        let r = dispatcher.submit(req(Opcode::GetStoreList)).await;
        assert_eq!(r.result(), ResultCode::Success);
        assert_eq!(&r.response_data()[..], b"memory");

        dispatcher.context().update_cluster(|c| c.ctime = 1);
        let r = dispatcher.submit(req(Opcode::StatSheep)).await;
        assert_eq!(r.result(), ResultCode::WaitForJoin);
    }

    #[tokio::test]
    async fn test_peer_epoch_check() {
        let dispatcher = start(formatted());
        let mut r = req(Opcode::ReadPeer);
        r.header.data_length = 1;

        r.header.epoch = 0;
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::OldNodeVersion);

        let mut r = r;
        r.header.epoch = 2;
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::NewNodeVersion);

        let mut r = r;
        r.header.epoch = 1;
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::NoObject);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_format_create_and_io() {
        let dispatcher = start(context());

        let r = dispatcher
            .submit(req(Opcode::MakeFs).with_data(b"memory"))
            .await;
        assert_eq!(r.result(), ResultCode::Success);
        assert_eq!(dispatcher.context().status(), ClusterStatus::Ok);

        let mut r = req(Opcode::NewVdi).with_data(&name_field("disk0"));
        r.header.vdi.vdi_size = 16 * OBJECT_SIZE;
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::Success);
        let vid = r.response.vdi.vdi_id;

        let mut r = req(Opcode::GetVdiInfo).with_data(&name_field("disk0"));
        r = dispatcher.submit(r).await;
        assert_eq!(r.response.vdi.vdi_id, vid);

        let payload: Vec<u8> = (0..2 * OBJECT_SIZE).map(|i| (i % 199) as u8).collect();
        let mut w = req(Opcode::VdiWrite).with_data(&payload);
        w.header.vdi.vdi_id = vid;
        w.header.obj.offset = OBJECT_SIZE / 2;
        assert_eq!(dispatcher.submit(w).await.result(), ResultCode::Success);

        let mut r = req(Opcode::VdiRead);
        r.header.vdi.vdi_id = vid;
        r.header.obj.offset = OBJECT_SIZE / 2;
        r.header.data_length = payload.len() as u32;
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::Success);
        assert_eq!(&r.response_data()[..], &payload[..]);

        let stats = dispatcher.context().stats.snapshot();
        assert_eq!(stats.cluster.received, 3);
        assert_eq!(stats.gateway.succeeded, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_vdi_uses_cluster_object_size() {
        let dispatcher = start(context());
        let r = dispatcher
            .submit(req(Opcode::MakeFs).with_data(b"memory"))
            .await;
        assert_eq!(r.result(), ResultCode::Success);

        let mut r = req(Opcode::NewVdi).with_data(&name_field("disk0"));
        r.header.vdi.vdi_size = 16 * OBJECT_SIZE;
        r.header.vdi.block_size_shift = 13;
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::InvalidParameters);
        assert!(dispatcher.context().vdis.is_empty());

        let mut r = req(Opcode::NewVdi).with_data(&name_field("disk0"));
        r.header.vdi.vdi_size = 16 * OBJECT_SIZE;
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::Success);
        let vid = r.response.vdi.vdi_id;

        let mut w = req(Opcode::VdiWrite).with_data(b"0123456789");
        w.header.vdi.vdi_id = vid;
        w.header.obj.offset = 5000;
        assert_eq!(dispatcher.submit(w).await.result(), ResultCode::Success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_plain_store_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut drivers = StoreDrivers::new();
        drivers.register(Arc::new(PlainStore::new(dir.path().join("obj"), OBJECT_SIZE)));
        let options = NodeOptions {
            object_size: OBJECT_SIZE,
            ..NodeOptions::default()
        };
        let ctx = NodeContext::new(
            options,
            drivers,
            Arc::new(StaticMembership::new(local())),
            None,
        );
        let dispatcher = start(ctx);

        let r = dispatcher.submit(req(Opcode::MakeFs).with_data(b"plain")).await;
        assert_eq!(r.result(), ResultCode::Success);

        let oid = vdisk_common::ObjectId::data(VdiId::new(1), 0);
        let mut w = req(Opcode::CreateAndWriteObj).with_data(b"hello");
        w.header.obj.oid = oid;
        assert_eq!(dispatcher.submit(w).await.result(), ResultCode::Success);

        let mut e = req(Opcode::Exist);
        e.header.obj.oid = oid;
        assert_eq!(dispatcher.submit(e).await.result(), ResultCode::Success);
    }

    static ACTIVE: AtomicUsize = AtomicUsize::new(0);
    static MAX_ACTIVE: AtomicUsize = AtomicUsize::new(0);

    fn exclusive_work(_: &NodeContext, _: &mut Request) -> OpResult {
        let now = ACTIVE.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        MAX_ACTIVE.fetch_max(now, AtomicOrdering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        Ok(())
    }

    fn exclusive_main(_: &NodeContext, _: &mut Request) -> MainResult {
        std::thread::sleep(Duration::from_millis(5));
        ACTIVE.fetch_sub(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cluster_operations_are_exclusive() {
        let registry = Registry::builder()
            .register(
                OperationTemplate::new(Opcode::NewVdi, OpClass::Cluster)
                    .work(exclusive_work)
                    .main(exclusive_main),
            )
            .unwrap()
            .build();
        let dispatcher = start_with(formatted(), registry);

        let tasks = (0..8).map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit(req(Opcode::NewVdi)).await })
        });
        for resp in futures::future::join_all(tasks).await {
            assert_eq!(resp.unwrap().result(), ResultCode::Success);
        }

        assert_eq!(MAX_ACTIVE.load(AtomicOrdering::SeqCst), 1);
        assert!(!dispatcher.cluster_lock().is_locked());
    }

    static MAIN_RAN: AtomicBool = AtomicBool::new(false);

    fn failing_work(_: &NodeContext, _: &mut Request) -> OpResult {
        Err(ResultCode::Eio)
    }

    fn flag_main(_: &NodeContext, _: &mut Request) -> MainResult {
        MAIN_RAN.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    #[tokio::test]
    async fn test_main_skipped_after_failed_work() {
        let registry = Registry::builder()
            .register(
                OperationTemplate::new(Opcode::DelVdi, OpClass::Cluster)
                    .work(failing_work)
                    .main(flag_main),
            )
            .unwrap()
            .build();
        let dispatcher = start_with(formatted(), registry);

        let r = dispatcher.submit(req(Opcode::DelVdi)).await;
        assert_eq!(r.result(), ResultCode::Eio);
        assert!(!MAIN_RAN.load(AtomicOrdering::SeqCst));
        assert_eq!(dispatcher.context().stats.snapshot().cluster.failed, 1);
    }

    fn fatal_main(_: &NodeContext, _: &mut Request) -> MainResult {
        Err(MainError::fatal("state lost"))
    }

    fn panicking_work(_: &NodeContext, _: &mut Request) -> OpResult {
        panic!("work blew up");
    }

    fn panicking_main(_: &NodeContext, _: &mut Request) -> MainResult {
        panic!("main blew up");
    }

    #[tokio::test]
    async fn test_fatal_hook_and_panics() {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        let registry = Registry::builder()
            .register(OperationTemplate::new(Opcode::Shutdown, OpClass::Cluster).main(fatal_main))
            .unwrap()
            .register(OperationTemplate::new(Opcode::GetNid, OpClass::None).work(panicking_work))
            .unwrap()
            .register(OperationTemplate::new(Opcode::ReadPeer, OpClass::Peer).work(panicking_work))
            .unwrap()
            .register(OperationTemplate::new(Opcode::Stat, OpClass::Local).main(panicking_main))
            .unwrap()
            .build();
        let dispatcher = Dispatcher::builder()
            .fatal_hook(Arc::new(move |msg: &str| hook_seen.lock().push(msg.to_string())))
            .start(formatted(), registry);

        let r = dispatcher.submit(req(Opcode::Shutdown)).await;
        assert_eq!(r.result(), ResultCode::SystemError);
        assert_eq!(*seen.lock(), vec!["state lost"]);

        let r = dispatcher.submit(req(Opcode::GetNid)).await;
        assert_eq!(r.result(), ResultCode::SystemError);

        let mut r = req(Opcode::ReadPeer);
        r.header.epoch = 1;
        let r = dispatcher.submit(r).await;
        assert_eq!(r.result(), ResultCode::SystemError);
        assert_eq!(r.opcode(), Ok(Opcode::ReadPeer));

        // a panicking main stage is an error, not a fatal condition
        let r = dispatcher.submit(req(Opcode::Stat)).await;
        assert_eq!(r.result(), ResultCode::SystemError);
        assert_eq!(*seen.lock(), vec!["state lost"]);

        // and the coordinator keeps serving
        let r = dispatcher.submit(req(Opcode::Stat)).await;
        assert_eq!(r.result(), ResultCode::SystemError);
        assert_eq!(dispatcher.context().stats.snapshot().local.failed, 2);
    }

    /// Membership recording broadcast main stages
    struct Recording {
        inner: StaticMembership,
        broadcasts: SyncMutex<Vec<u8>>,
    }

    impl Membership for Recording {
        fn local_node(&self) -> vdisk_common::Node {
            self.inner.local_node()
        }

        fn nodes(&self) -> Vec<vdisk_common::Node> {
            self.inner.nodes()
        }

        fn epoch_log(&self, epoch: Epoch) -> OpResult<EpochLog> {
            self.inner.epoch_log(epoch)
        }

        fn log_epoch(&self, epoch: Epoch, nodes: &[vdisk_common::Node]) -> OpResult {
            self.inner.log_epoch(epoch, nodes)
        }

        fn remove_epoch(&self, epoch: Epoch) -> OpResult {
            self.inner.remove_epoch(epoch)
        }

        fn latest_epoch(&self) -> Epoch {
            self.inner.latest_epoch()
        }

        fn broadcast_main(&self, req: &Request) {
            self.broadcasts.lock().push(req.header.opcode);
        }
    }

    #[tokio::test]
    async fn test_broadcast_and_remote_main() {
        let membership = Arc::new(Recording {
            inner: StaticMembership::new(local()),
            broadcasts: SyncMutex::new(Vec::new()),
        });
        let mut drivers = StoreDrivers::new();
        drivers.register(Arc::new(vdisk_store::MemoryStore::new(OBJECT_SIZE)));
        let options = NodeOptions {
            object_size: OBJECT_SIZE,
            ..NodeOptions::default()
        };
        let ctx = NodeContext::new(
            options,
            drivers,
            Arc::clone(&membership) as Arc<dyn Membership>,
            None,
        );
        let dispatcher = start(ctx);

        dispatcher
            .submit(req(Opcode::MakeFs).with_data(b"memory"))
            .await;
        // work-only cluster operations have nothing to broadcast
        dispatcher
            .submit(req(Opcode::GetVdiInfo).with_data(&name_field("none")))
            .await;
        assert_eq!(*membership.broadcasts.lock(), vec![Opcode::MakeFs.code()]);

        let mut r = req(Opcode::NotifyVdiAdd);
        r.header.vdi.vdi_id = VdiId::new(0x77);
        let r = dispatcher.deliver_remote_main(r).await;
        assert_eq!(r.result(), ResultCode::Success);
        assert!(dispatcher.context().vdis.is_in_use(VdiId::new(0x77)));
        assert_eq!(membership.broadcasts.lock().len(), 1);

        let r = dispatcher.deliver_remote_main(req(Opcode::StatSheep)).await;
        assert_eq!(r.result(), ResultCode::InvalidParameters);
    }

    #[test]
    fn test_check_epoch() {
        let mut r = req(Opcode::WritePeer);
        r.header.epoch = 3;
        assert_eq!(check_epoch(3, &r), Ok(()));
        assert_eq!(check_epoch(4, &r), Err(ResultCode::OldNodeVersion));
        assert_eq!(check_epoch(2, &r), Err(ResultCode::NewNodeVersion));
    }
}
