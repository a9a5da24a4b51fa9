//! Request counters

use crate::registry::OpClass;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use vdisk_common::ResultCode;

#[derive(Debug, Default)]
struct ClassCounters {
    received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Requests seen by the dispatcher, per operation class
#[derive(Debug, Default)]
pub struct RequestStats {
    classes: [ClassCounters; 5],
}

impl RequestStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, class: OpClass) {
        self.classes[class.index()]
            .received
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result(&self, class: OpClass, result: ResultCode) {
        let counters = &self.classes[class.index()];
        if result.is_success() {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of the counters
    #[must_use]
    pub fn snapshot(&self) -> StatSnapshot {
        let mut snapshot = StatSnapshot::default();
        for class in OpClass::ALL {
            let c = &self.classes[class.index()];
            let counts = ClassStat {
                received: c.received.load(Ordering::Relaxed),
                succeeded: c.succeeded.load(Ordering::Relaxed),
                failed: c.failed.load(Ordering::Relaxed),
            };
            match class {
                OpClass::None => snapshot.inline = counts,
                OpClass::Cluster => snapshot.cluster = counts,
                OpClass::Local => snapshot.local = counts,
                OpClass::Peer => snapshot.peer = counts,
                OpClass::Gateway => snapshot.gateway = counts,
            }
        }
        snapshot
    }
}

/// Counters of one class
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStat {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Counters of every class
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSnapshot {
    pub inline: ClassStat,
    pub cluster: ClassStat,
    pub local: ClassStat,
    pub peer: ClassStat,
    pub gateway: ClassStat,
}
