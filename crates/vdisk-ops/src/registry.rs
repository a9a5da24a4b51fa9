//! Operation registry
//!
//! Maps every opcode to an immutable [`OperationTemplate`] describing how
//! the dispatcher runs it. The registry is validated when built and never
//! changes afterwards, so lookups need no locking.

use crate::context::NodeContext;
use crate::error::{MainResult, OpsError};
use crate::opcode::Opcode;
use crate::request::Request;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use vdisk_common::OpResult;

/// Execution class of an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpClass {
    /// Run inline, never queued
    None,
    /// Work on the receiving node, main on every node, cluster-wide exclusive
    Cluster,
    /// Both stages on this node only
    Local,
    /// Work stage against the local store driver
    Peer,
    /// Work stage that turns client I/O into peer operations
    Gateway,
}

impl OpClass {
    /// Every class, in stats order
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Cluster,
        Self::Local,
        Self::Peer,
        Self::Gateway,
    ];

    /// Position in [`OpClass::ALL`]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Work-stage handler, run on a worker thread
pub type WorkFn = fn(&NodeContext, &mut Request) -> OpResult;

/// Main-stage handler, run on the coordinator
pub type MainFn = fn(&NodeContext, &mut Request) -> MainResult;

/// How one operation is executed
#[derive(Clone, Copy)]
pub struct OperationTemplate {
    pub opcode: Opcode,
    pub class: OpClass,
    /// May run while the cluster is not serving
    pub force: bool,
    /// Logged with sender and parameters at info level
    pub admin: bool,
    pub work: Option<WorkFn>,
    pub main: Option<MainFn>,
}

impl OperationTemplate {
    /// Template without handlers or flags
    #[must_use]
    pub const fn new(opcode: Opcode, class: OpClass) -> Self {
        Self {
            opcode,
            class,
            force: false,
            admin: false,
            work: None,
            main: None,
        }
    }

    #[must_use]
    pub const fn force(mut self) -> Self {
        self.force = true;
        self
    }

    #[must_use]
    pub const fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    #[must_use]
    pub const fn work(mut self, handler: WorkFn) -> Self {
        self.work = Some(handler);
        self
    }

    #[must_use]
    pub const fn main(mut self, handler: MainFn) -> Self {
        self.main = Some(handler);
        self
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.opcode.name()
    }

    #[must_use]
    pub const fn has_work(&self) -> bool {
        self.work.is_some()
    }

    #[must_use]
    pub const fn has_main(&self) -> bool {
        self.main.is_some()
    }

    fn validate(&self) -> Result<(), OpsError> {
        let reason = match self.class {
            _ if self.work.is_none() && self.main.is_none() => Some("no handler"),
            OpClass::None if self.work.is_none() => Some("inline operation needs a work handler"),
            OpClass::None | OpClass::Peer | OpClass::Gateway if self.main.is_some() => {
                Some("main handler not allowed for this class")
            }
            OpClass::Peer | OpClass::Gateway if self.work.is_none() => {
                Some("work handler required for this class")
            }
            _ => None,
        };
        match reason {
            Some(reason) => Err(OpsError::MissingHandler {
                name: self.name(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for OperationTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTemplate")
            .field("name", &self.name())
            .field("class", &self.class)
            .field("force", &self.force)
            .field("admin", &self.admin)
            .field("work", &self.has_work())
            .field("main", &self.has_main())
            .finish()
    }
}

/// Immutable opcode to template table
#[derive(Debug)]
pub struct Registry {
    ops: BTreeMap<Opcode, OperationTemplate>,
}

impl Registry {
    /// Start building a registry
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Template for a raw opcode
    pub fn lookup(&self, raw: u8) -> Result<&OperationTemplate, OpsError> {
        Opcode::try_from(raw)
            .ok()
            .and_then(|op| self.ops.get(&op))
            .ok_or(OpsError::UnknownOperation(raw))
    }

    /// Template for a known opcode
    pub fn get(&self, op: Opcode) -> Result<&OperationTemplate, OpsError> {
        self.lookup(op.code())
    }

    pub fn classification(&self, op: Opcode) -> Result<OpClass, OpsError> {
        self.get(op).map(|t| t.class)
    }

    pub fn is_force_op(&self, op: Opcode) -> Result<bool, OpsError> {
        self.get(op).map(|t| t.force)
    }

    pub fn is_admin_op(&self, op: Opcode) -> Result<bool, OpsError> {
        self.get(op).map(|t| t.admin)
    }

    pub fn has_work_handler(&self, op: Opcode) -> Result<bool, OpsError> {
        self.get(op).map(OperationTemplate::has_work)
    }

    pub fn has_main_handler(&self, op: Opcode) -> Result<bool, OpsError> {
        self.get(op).map(OperationTemplate::has_main)
    }

    /// Number of registered operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Templates in opcode order
    pub fn iter(&self) -> impl Iterator<Item = &OperationTemplate> {
        self.ops.values()
    }
}

/// Validating builder for [`Registry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    ops: BTreeMap<Opcode, OperationTemplate>,
}

impl RegistryBuilder {
    /// Add a template
    ///
    /// Fails if the opcode is already registered or the template's
    /// handlers do not fit its class.
    pub fn register(mut self, template: OperationTemplate) -> Result<Self, OpsError> {
        template.validate()?;
        if self.ops.contains_key(&template.opcode) {
            return Err(OpsError::DuplicateOperation(template.name()));
        }
        self.ops.insert(template.opcode, template);
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> Registry {
        Registry { ops: self.ops }
    }
}

/// Peer opcode a gateway object operation is forwarded as
#[must_use]
pub const fn gateway_to_peer(op: Opcode) -> Option<Opcode> {
    match op {
        Opcode::CreateAndWriteObj => Some(Opcode::CreateAndWritePeer),
        Opcode::ReadObj => Some(Opcode::ReadPeer),
        Opcode::WriteObj => Some(Opcode::WritePeer),
        Opcode::RemoveObj => Some(Opcode::RemovePeer),
        _ => None,
    }
}
