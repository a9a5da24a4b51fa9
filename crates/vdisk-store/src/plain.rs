//! Plain file store driver
//!
//! One regular file per object under `<root>/obj`, named by the object id
//! in hex. New objects are written to a temporary file and renamed into
//! place so a crash never leaves a half-created object visible.

use crate::driver::{StoreCapacity, StoreDriver, StoreStats, check_range, object_len};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vdisk_common::{DigestCalculator, Epoch, ObjectDigest, ObjectId, OpResult, ResultCode};

const OBJ_DIR: &str = "obj";
const TMP_SUFFIX: &str = ".tmp";
const HASH_CHUNK: usize = 1 << 20;

/// Store driver keeping each object in its own file
pub struct PlainStore {
    root: PathBuf,
    object_size: u64,
    stats: StoreStats,
}

impl PlainStore {
    /// Create a driver rooted at `root`; nothing touches disk until [`StoreDriver::init`]
    pub fn new(root: impl Into<PathBuf>, object_size: u64) -> Self {
        Self {
            root: root.into(),
            object_size,
            stats: StoreStats::default(),
        }
    }

    /// Root directory of the store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn obj_dir(&self) -> PathBuf {
        self.root.join(OBJ_DIR)
    }

    fn obj_path(&self, oid: ObjectId) -> PathBuf {
        self.obj_dir().join(oid.to_string())
    }

    fn tmp_path(&self, oid: ObjectId) -> PathBuf {
        self.obj_dir().join(format!("{oid}{TMP_SUFFIX}"))
    }

    fn open(&self, oid: ObjectId, write: bool) -> OpResult<File> {
        OpenOptions::new()
            .read(true)
            .write(write)
            .open(self.obj_path(oid))
            .map_err(|e| io_result(&e, oid, "open"))
    }
}

/// Map a local I/O failure onto a result code
fn io_result(err: &io::Error, oid: ObjectId, what: &str) -> ResultCode {
    match err.kind() {
        ErrorKind::NotFound => ResultCode::NoObject,
        ErrorKind::StorageFull => ResultCode::NoSpace,
        _ => {
            warn!("failed to {} object {}: {}", what, oid, err);
            ResultCode::Eio
        }
    }
}

impl StoreDriver for PlainStore {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn init(&self) -> OpResult {
        fs::create_dir_all(self.obj_dir()).map_err(|e| {
            warn!("failed to create {}: {}", self.obj_dir().display(), e);
            ResultCode::Eio
        })?;
        self.cleanup()
    }

    fn format(&self) -> OpResult {
        let dir = self.obj_dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!("failed to remove {}: {}", dir.display(), e);
                return Err(ResultCode::Eio);
            }
        }
        self.init()
    }

    fn exists(&self, oid: ObjectId) -> bool {
        self.obj_path(oid).is_file()
    }

    fn read(&self, oid: ObjectId, _epoch: Epoch, offset: u64, buf: &mut [u8]) -> OpResult {
        let file = self.open(oid, false)?;
        check_range(offset, buf.len(), object_len(oid, self.object_size))?;

        file.read_exact_at(buf, offset)
            .map_err(|e| io_result(&e, oid, "read"))?;
        self.stats.record_read(buf.len());
        Ok(())
    }

    fn write(&self, oid: ObjectId, _epoch: Epoch, offset: u64, data: &[u8]) -> OpResult {
        let file = self.open(oid, true)?;
        check_range(offset, data.len(), object_len(oid, self.object_size))?;

        file.write_all_at(data, offset)
            .map_err(|e| io_result(&e, oid, "write"))?;
        self.stats.record_write(data.len());
        Ok(())
    }

    fn create_and_write(
        &self,
        oid: ObjectId,
        epoch: Epoch,
        offset: u64,
        data: &[u8],
    ) -> OpResult {
        let len = object_len(oid, self.object_size);
        check_range(offset, data.len(), len)?;

        let tmp = self.tmp_path(oid);
        let result = (|| {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.set_len(len)?;
            file.write_all_at(data, offset)?;
            file.sync_data()?;
            fs::rename(&tmp, self.obj_path(oid))
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(io_result(&e, oid, "create"));
        }

        debug!("created object {} at epoch {}", oid, epoch);
        self.stats.record_create(data.len());
        Ok(())
    }

    fn remove(&self, oid: ObjectId) -> OpResult {
        fs::remove_file(self.obj_path(oid)).map_err(|e| io_result(&e, oid, "remove"))?;
        self.stats.record_remove();
        Ok(())
    }

    fn list(&self) -> OpResult<Vec<ObjectId>> {
        let entries = fs::read_dir(self.obj_dir()).map_err(|e| {
            warn!("failed to list {}: {}", self.obj_dir().display(), e);
            ResultCode::Eio
        })?;

        let mut oids = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(raw) = u64::from_str_radix(name, 16) {
                oids.push(ObjectId::from_raw(raw));
            }
        }
        oids.sort_unstable();
        Ok(oids)
    }

    fn capacity(&self) -> StoreCapacity {
        match nix::sys::statvfs::statvfs(&self.root) {
            Ok(vfs) => {
                let fragment = vfs.fragment_size() as u64;
                StoreCapacity {
                    size: vfs.blocks() as u64 * fragment,
                    free: vfs.blocks_available() as u64 * fragment,
                }
            }
            Err(e) => {
                warn!("statvfs on {} failed: {}", self.root.display(), e);
                StoreCapacity::default()
            }
        }
    }

    fn stats(&self) -> &StoreStats {
        &self.stats
    }

    fn get_hash(&self, oid: ObjectId, _epoch: Epoch) -> OpResult<ObjectDigest> {
        let file = self.open(oid, false)?;
        let len = object_len(oid, self.object_size);

        let mut calc = DigestCalculator::new();
        let mut buf = vec![0u8; HASH_CHUNK];
        let mut offset = 0u64;
        while offset < len {
            let n = usize::try_from(len - offset).map_or(HASH_CHUNK, |rem| rem.min(HASH_CHUNK));
            file.read_exact_at(&mut buf[..n], offset)
                .map_err(|e| io_result(&e, oid, "hash"))?;
            calc.update(&buf[..n]);
            offset += n as u64;
        }
        Ok(calc.finalize())
    }

    fn cleanup(&self) -> OpResult {
        let Ok(entries) = fs::read_dir(self.obj_dir()) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.to_string_lossy().ends_with(TMP_SUFFIX) {
                debug!("removing stale {}", path.display());
                let _ = fs::remove_file(&path);
            }
        }
        Ok(())
    }
}
