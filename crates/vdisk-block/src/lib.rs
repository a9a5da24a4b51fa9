//! vdisk block - Virtual disk images over objects
//!
//! This crate maps VDI reads and writes onto the objects backing them:
//! - [`Inode`]: VDI metadata and the owner of every object slot
//! - [`VdiTable`]: VDIs known to the node
//! - [`VdiAttr`]: key/value attributes attached to a VDI name
//! - [`SlotMapper`]: byte ranges to object slots
//! - [`VdiIo`]: splits logical I/O into sub-requests and runs the
//!   create-then-write protocol for unallocated slots
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Gateway I/O    │  (read / write on a VDI)
//! └────────┬────────┘
//!          │ Aiocb
//! ┌────────▼────────┐
//! │  VdiIo          │
//! │  - SlotMapper   │
//! │  - BlockingList │
//! └────────┬────────┘
//!          │ SubRequest
//! ┌────────▼────────┐
//! │  SubmitSink     │  (peer object operations)
//! └─────────────────┘
//! ```

pub mod aiocb;
pub mod attr;
pub mod blocking;
pub mod inode;
pub mod io;
pub mod slot;
pub mod vdi;

pub use aiocb::{Aiocb, Completion, IoKind, SubOp, SubRequest};
pub use attr::VdiAttr;
pub use blocking::{Admission, BlockingList};
pub use inode::{Inode, TAG_LEN, owner_offset};
pub use io::{SubmitSink, VdiIo};
pub use slot::{SlotMapper, SlotRange, SlotRanges};
pub use vdi::{NewVdi, Vdi, VdiSpec, VdiTable};
