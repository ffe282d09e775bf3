//! Node model: the tagged variants that make up the reactive graph, and the intrusive-ish edge
//! bookkeeping (`dependencies` / `dependents`) every node carries.
//!
//! Every vertex in the graph — state, sensor, memo, task or effect — is stored as one
//! [`ReactiveNode`] inside the arena owned by [`Root`](crate::root::Root). A [`Scope`] is *not* a
//! vertex (it has no edges) but is allocated in the same arena so that owner/child bookkeeping is
//! uniform; see [`NodeKind::Scope`].

use std::any::Any;
use std::fmt;

use slotmap::new_key_type;

use crate::error::CoreError;
use crate::task::TaskSlot;

new_key_type! {
    /// Opaque handle to a vertex (or scope) inside a [`Root`](crate::root::Root)'s arena.
    pub struct NodeId;
}

/// One of {CLEAN, CHECK, DIRTY, CHECK|DIRTY}, plus the orthogonal RUNNING bit.
///
/// Represented as a small bitset rather than an enum with four named variants because
/// `mark_check` on an already-DIRTY node must be a no-op, and `mark_dirty` on a CHECK node must
/// upgrade in place — both are easiest to express as bit operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Flags(u8);

impl Flags {
    const CHECK: u8 = 0b001;
    const DIRTY: u8 = 0b010;
    const RUNNING: u8 = 0b100;

    pub const CLEAN: Flags = Flags(0);

    pub fn dirty() -> Self {
        Flags(Self::DIRTY)
    }

    pub fn check() -> Self {
        Flags(Self::CHECK)
    }

    pub fn is_clean(self) -> bool {
        self.0 & (Self::CHECK | Self::DIRTY) == 0
    }

    pub fn is_check(self) -> bool {
        self.0 & Self::CHECK != 0
    }

    pub fn is_dirty(self) -> bool {
        self.0 & Self::DIRTY != 0
    }

    pub fn is_running(self) -> bool {
        self.0 & Self::RUNNING != 0
    }

    pub fn set_running(&mut self, running: bool) {
        if running {
            self.0 |= Self::RUNNING;
        } else {
            self.0 &= !Self::RUNNING;
        }
    }

    pub fn mark_check(&mut self) {
        self.0 |= Self::CHECK;
    }

    pub fn mark_dirty(&mut self) {
        self.0 |= Self::DIRTY;
    }

    pub fn clear_to_clean(&mut self) {
        self.0 &= Self::RUNNING;
    }
}

/// Which kind of vertex a node is. Kept as an explicit discriminator (rather than relying on
/// "has a `controller` field" structural checks) so that the propagate/refresh dispatch in
/// [`crate::root`] stays a single readable `match`.
pub(crate) enum NodeKind {
    State(StateData),
    Sensor(SensorData),
    Memo(MemoData),
    Task(TaskData),
    Effect(EffectData),
    Scope,
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::State(_) => "state",
            NodeKind::Sensor(_) => "sensor",
            NodeKind::Memo(_) => "memo",
            NodeKind::Task(_) => "task",
            NodeKind::Effect(_) => "effect",
            NodeKind::Scope => "scope",
        }
    }

    pub fn is_sink(&self) -> bool {
        matches!(
            self,
            NodeKind::Memo(_) | NodeKind::Task(_) | NodeKind::Effect(_)
        )
    }
}

pub(crate) type EqualsFn = Box<dyn Fn(&dyn Any, &dyn Any) -> bool>;
pub(crate) type GuardFn = Box<dyn Fn(&dyn Any) -> bool>;
pub(crate) type StopFn = Box<dyn FnOnce()>;

pub(crate) struct StateData {
    pub value: Box<dyn Any>,
    pub equals: Option<EqualsFn>,
    pub guard: Option<GuardFn>,
    /// `watched(set)`; invoked lazily on the 0->1 sink transition, mirroring a sensor's `start`
    /// but for a state whose value is normally driven by `set`/`update` rather than exclusively
    /// by an external source.
    pub watched: Option<Box<dyn FnMut(NodeId) -> StopFn>>,
    pub stop: Option<StopFn>,
}

pub(crate) struct SensorData {
    pub value: Option<Box<dyn Any>>,
    pub equals: Option<EqualsFn>,
    pub guard: Option<GuardFn>,
    /// `start(set)`; invoked lazily on the 0->1 sink transition.
    pub start: Option<Box<dyn FnMut(NodeId) -> StopFn>>,
    pub stop: Option<StopFn>,
}

pub(crate) struct MemoData {
    pub f: Box<dyn FnMut(Option<&dyn Any>) -> Box<dyn Any>>,
    pub value: Option<Box<dyn Any>>,
    pub equals: Option<EqualsFn>,
    pub guard: Option<GuardFn>,
    pub error: Option<CoreError>,
    pub flags: Flags,
}

pub(crate) struct TaskData {
    pub f: Box<dyn FnMut(Option<&dyn Any>, crate::task::AbortSignal) -> crate::task::TaskFuture>,
    pub value: Option<Box<dyn Any>>,
    pub equals: Option<EqualsFn>,
    pub guard: Option<GuardFn>,
    pub error: Option<CoreError>,
    pub flags: Flags,
    pub slot: TaskSlot,
}

pub(crate) struct EffectData {
    pub f: Option<Box<dyn FnMut() -> Option<Box<dyn FnOnce()>>>>,
    pub flags: Flags,
}

/// A single vertex (or scope) in the graph.
///
/// `dependencies` / `dependents` stand in for the source's sink list and the sink's source list
/// of a pointer-based graph; see `DESIGN.md` for why an arena of index handles is used here
/// instead of intrusive pointers.
pub(crate) struct ReactiveNode {
    pub kind: NodeKind,
    /// Owning scope/effect/memo/task that created this node; used for cascaded dispose.
    pub parent: NodeId,
    /// Nodes whose lifetime is owned by this node (child scopes, signals created inside an
    /// effect's last run, etc.).
    pub children: Vec<NodeId>,
    /// Sources this node (if a sink) currently reads from, in the order captured during the
    /// most recent recompute.
    pub dependencies: Vec<NodeId>,
    /// Sinks that currently read from this node (if a source).
    pub dependents: Vec<NodeId>,
    /// Cleanups registered via `on_cleanup`, run LIFO.
    pub cleanups: Vec<Box<dyn FnOnce()>>,
}

impl ReactiveNode {
    pub fn new(kind: NodeKind, parent: NodeId) -> Self {
        Self {
            kind,
            parent,
            children: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            cleanups: Vec::new(),
        }
    }

    pub fn flags(&self) -> Flags {
        match &self.kind {
            NodeKind::Memo(m) => m.flags,
            NodeKind::Task(t) => t.flags,
            NodeKind::Effect(e) => e.flags,
            _ => Flags::CLEAN,
        }
    }

    pub fn flags_mut(&mut self) -> Option<&mut Flags> {
        match &mut self.kind {
            NodeKind::Memo(m) => Some(&mut m.flags),
            NodeKind::Task(t) => Some(&mut t.flags),
            NodeKind::Effect(e) => Some(&mut e.flags),
            _ => None,
        }
    }
}

impl fmt::Debug for ReactiveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveNode")
            .field("kind", &self.kind.kind_name())
            .field("dependencies", &self.dependencies.len())
            .field("dependents", &self.dependents.len())
            .finish()
    }
}

/// A handle to a node used purely for disposal (effects, scopes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(pub(crate) NodeId);
