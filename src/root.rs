//! [`Root`]: the thread-local engine that owns the node arena, the tracking context, the effect
//! queue and the batch depth counter, plus the propagate/refresh algorithm described by the
//! module docs on [`crate::node`].
//!
//! Unlike an eager topological-sort propagator, this engine is lazy-pull: a source write walks
//! outgoing edges just far enough to flag sinks CHECK or DIRTY (and to enqueue dirty effects);
//! actual recompute only happens when something reads a flagged node, via [`Root::refresh`].

use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::fmt;

use slotmap::{Key, SlotMap};
use smallvec::SmallVec;

use crate::error::{ComputeError, CoreError, CoreResult};
use crate::node::{NodeHandle, NodeId, NodeKind, ReactiveNode};

/// One of CHECK or DIRTY, used while walking edges out of a changed source.
///
/// `Dirty` is used on the direct edges out of the node that actually changed; `Check` is used
/// when recursing further, since a deeper descendant's staleness is conditional on whether the
/// intermediate memo/task actually changes value once refreshed.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Level {
    Check,
    Dirty,
}

/// The struct managing the state of the reactive system. Exactly one exists per running
/// application; see [`create_root`].
///
/// Typically leaked to obtain a `&'static Root` so that closures captured by nodes (which may
/// outlive any particular stack frame) can reference it without a lifetime parameter.
pub(crate) struct Root {
    /// All nodes and scopes created under this root.
    pub nodes: RefCell<SlotMap<NodeId, ReactiveNode>>,
    /// The owner (scope/effect/memo/task) that adopts newly created nodes and cleanups.
    /// `NodeId::null()` at the top level.
    pub current_owner: Cell<NodeId>,
    /// The memo/task/effect currently recomputing, if any. Reads route through this to install
    /// edges.
    pub active_sink: Cell<Option<NodeId>>,
    /// Present (`Some(_)`) only while a recompute is in progress; accumulates the ordered,
    /// consecutive-deduplicated sequence of sources read this run.
    pub tracker: RefCell<Option<DependencyTracker>>,
    /// FIFO of effects flagged DIRTY, awaiting `flush`.
    pub effect_queue: RefCell<Vec<NodeId>>,
    /// Reentrancy guard for `flush`.
    pub flushing: Cell<bool>,
    /// Batch nesting depth; `flush` is deferred while this is nonzero.
    pub batch_depth: Cell<u32>,
    /// The top-level scope node, disposed wholesale by [`RootHandle::dispose`].
    pub root_scope: Cell<NodeId>,
}

thread_local! {
    /// The current reactive root.
    static GLOBAL_ROOT: Cell<Option<&'static Root>> = const { Cell::new(None) };
}

impl Root {
    /// Gets the current reactive root. Panics if no root is found.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn global() -> &'static Root {
        GLOBAL_ROOT.with(|root| root.get()).expect("no root found; call this from inside `create_root`")
    }

    /// Sets the current reactive root, returning the previous one.
    pub fn set_global(root: Option<&'static Root>) -> Option<&'static Root> {
        GLOBAL_ROOT.with(|r| r.replace(root))
    }

    fn new_static() -> &'static Self {
        let this = Self {
            nodes: RefCell::new(SlotMap::default()),
            current_owner: Cell::new(NodeId::null()),
            active_sink: Cell::new(None),
            tracker: RefCell::new(None),
            effect_queue: RefCell::new(Vec::new()),
            flushing: Cell::new(false),
            batch_depth: Cell::new(0),
            root_scope: Cell::new(NodeId::null()),
        };
        let this: &'static Root = Box::leak(Box::new(this));
        let scope = this
            .nodes
            .borrow_mut()
            .insert(ReactiveNode::new(NodeKind::Scope, NodeId::null()));
        this.root_scope.set(scope);
        this.current_owner.set(scope);
        this
    }

    fn dispose(&'static self) {
        self.dispose_node(self.root_scope.get());
        self.effect_queue.borrow_mut().clear();
        self.batch_depth.set(0);
    }

    // --- owner / cleanup plumbing -----------------------------------------------------------

    /// Registers `id` as a child of the current owner, for cascaded disposal.
    pub(crate) fn adopt(&self, id: NodeId) {
        let owner = self.current_owner.get();
        if !owner.is_null() {
            if let Some(node) = self.nodes.borrow_mut().get_mut(owner) {
                node.children.push(id);
            }
        }
    }

    /// Runs `f` with `owner` installed as the current owner, restoring the previous owner
    /// afterwards even if `f` panics is not attempted here deliberately — panics during node
    /// construction are not a case this engine attempts to recover from.
    pub(crate) fn with_owner<T>(&self, owner: NodeId, f: impl FnOnce() -> T) -> T {
        let prev = self.current_owner.replace(owner);
        let ret = f();
        self.current_owner.set(prev);
        ret
    }

    pub(crate) fn push_cleanup(&self, owner: NodeId, f: Box<dyn FnOnce()>) {
        if owner.is_null() {
            return;
        }
        if let Some(node) = self.nodes.borrow_mut().get_mut(owner) {
            node.cleanups.push(f);
        }
    }

    fn run_cleanups(&self, id: NodeId) {
        let cleanups = match self.nodes.borrow_mut().get_mut(id) {
            Some(n) => std::mem::take(&mut n.cleanups),
            None => return,
        };
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
    }

    /// Disposes `id`'s children (LIFO) without removing `id` itself. Run before each effect
    /// re-run to tear down anything the previous run created.
    fn dispose_children(&'static self, id: NodeId) {
        let children = match self.nodes.borrow_mut().get_mut(id) {
            Some(n) => std::mem::take(&mut n.children),
            None => return,
        };
        for child in children.into_iter().rev() {
            self.dispose_node(child);
        }
    }

    /// Fully disposes `id`: children first (LIFO), then this node's own cleanups, then unlinks it
    /// from every remaining dependency's sink list, then removes it from the arena.
    pub(crate) fn dispose_node(&'static self, id: NodeId) {
        if id.is_null() {
            return;
        }
        self.dispose_children(id);
        self.run_cleanups(id);
        let deps = match self.nodes.borrow_mut().get_mut(id) {
            Some(n) => std::mem::take(&mut n.dependencies),
            None => return,
        };
        for dep in deps {
            self.detach_dependent(dep, id);
        }
        self.effect_queue.borrow_mut().retain(|&e| e != id);
        self.nodes.borrow_mut().remove(id);
    }

    // --- edge bookkeeping ---------------------------------------------------------------------

    /// Called whenever a signal is read: if a sink is actively recomputing, records `source` as
    /// one of its dependencies for this run (consecutive repeat reads coalesce to one entry), and
    /// — the first time `source` is read this pass — attaches the edge synchronously, right here,
    /// before this call returns.
    ///
    /// Attaching synchronously (rather than batching every edge until `commit_dependencies` runs
    /// at the end of the recompute) matters because `attach_dependent` is what fires a sensor's
    /// `start`/a state's `watched` hook on the 0->1 dependents transition: a sensor's first
    /// reader must observe `start` having already populated a value by the time its own `get`
    /// call returns, per the "when K is running" wording in the edge-adding algorithm.
    pub(crate) fn link_to_active_sink(&'static self, source: NodeId) {
        let Some(sink) = self.active_sink.get() else {
            return;
        };
        let first_read_this_pass = self
            .tracker
            .borrow_mut()
            .as_mut()
            .map(|tracker| tracker.track(source))
            .unwrap_or(false);
        if first_read_this_pass {
            self.attach_dependent(source, sink);
        }
    }

    /// Adds `sink` to `source`'s dependent list, lazily starting a sensor's `start` or a state's
    /// `watched` hook on the 0->1 transition.
    fn attach_dependent(&'static self, source: NodeId, sink: NodeId) {
        let mut pending_start: Option<Box<dyn FnMut(NodeId) -> crate::node::StopFn>> = None;
        {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(source) else {
                return;
            };
            if !node.dependents.contains(&sink) {
                node.dependents.push(sink);
            }
            if node.dependents.len() == 1 {
                match &mut node.kind {
                    NodeKind::Sensor(s) if s.stop.is_none() => pending_start = s.start.take(),
                    NodeKind::State(s) if s.stop.is_none() => pending_start = s.watched.take(),
                    _ => {}
                }
            }
        }
        if let Some(mut start) = pending_start {
            let stop = start(source);
            if let Some(node) = self.nodes.borrow_mut().get_mut(source) {
                match &mut node.kind {
                    NodeKind::Sensor(s) => {
                        s.start = Some(start);
                        s.stop = Some(stop);
                    }
                    NodeKind::State(s) => {
                        s.watched = Some(start);
                        s.stop = Some(stop);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Removes `sink` from `source`'s dependent list, stopping a dormant sensor/watched state on
    /// the 1->0 transition.
    fn detach_dependent(&self, source: NodeId, sink: NodeId) {
        let stop = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(source) else {
                return;
            };
            node.dependents.retain(|&d| d != sink);
            if node.dependents.is_empty() {
                match &mut node.kind {
                    NodeKind::Sensor(s) => s.stop.take(),
                    NodeKind::State(s) => s.stop.take(),
                    _ => None,
                }
            } else {
                None
            }
        };
        if let Some(stop) = stop {
            stop();
        }
    }

    /// Diffs the dependencies captured by `tracker` against `id`'s previous dependency list and
    /// detaches edges that were not re-read this pass. Each edge is kept to exactly one occurrence
    /// by deduplicating the captured sequence before diffing.
    ///
    /// New edges are *not* attached here: `link_to_active_sink` already attached each one
    /// synchronously, at read time, the first time this pass saw it (see its doc comment for why
    /// that timing matters for sensors/`watched` states). This function only commits `id`'s
    /// dependency list for the next diff and unlinks whatever fell out of it.
    pub(crate) fn commit_dependencies(&'static self, id: NodeId, tracker: DependencyTracker) {
        let mut deps: Vec<NodeId> = Vec::with_capacity(tracker.dependencies.len());
        for d in tracker.dependencies {
            if !deps.contains(&d) {
                deps.push(d);
            }
        }
        let old_deps = match self.nodes.borrow_mut().get_mut(id) {
            Some(node) => std::mem::replace(&mut node.dependencies, deps.clone()),
            None => return,
        };
        for dep in &old_deps {
            if !deps.contains(dep) {
                self.detach_dependent(*dep, id);
            }
        }
    }

    // --- propagation ----------------------------------------------------------------------

    /// Entry point for a source write: walks `source`'s dependents with level DIRTY, aborting any
    /// live task controllers along the way and enqueuing dirty effects.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub(crate) fn propagate_from(&'static self, source: NodeId) {
        let dependents = match self.nodes.borrow().get(source) {
            Some(n) => n.dependents.clone(),
            None => return,
        };
        for dep in dependents {
            self.propagate(dep, Level::Dirty);
        }
    }

    fn propagate(&'static self, id: NodeId, level: Level) {
        enum Outcome {
            AlreadySatisfied,
            BecameEffect,
            Recurse(Vec<NodeId>, bool),
        }
        let outcome = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(id) else {
                return;
            };
            match &mut node.kind {
                NodeKind::Effect(e) => {
                    if e.flags.is_dirty() {
                        Outcome::AlreadySatisfied
                    } else {
                        e.flags.mark_dirty();
                        Outcome::BecameEffect
                    }
                }
                NodeKind::Memo(_) | NodeKind::Task(_) => {
                    let is_task = matches!(node.kind, NodeKind::Task(_));
                    let flags = node.flags_mut().unwrap();
                    let satisfied = match level {
                        Level::Dirty => flags.is_dirty(),
                        Level::Check => flags.is_check() || flags.is_dirty(),
                    };
                    if satisfied {
                        Outcome::AlreadySatisfied
                    } else {
                        match level {
                            Level::Dirty => flags.mark_dirty(),
                            Level::Check => flags.mark_check(),
                        }
                        Outcome::Recurse(node.dependents.clone(), is_task)
                    }
                }
                _ => Outcome::AlreadySatisfied,
            }
        };
        match outcome {
            Outcome::AlreadySatisfied => {}
            Outcome::BecameEffect => self.enqueue_effect(id),
            Outcome::Recurse(dependents, is_task) => {
                if is_task {
                    self.abort_task_controller(id);
                }
                for dep in dependents {
                    self.propagate(dep, Level::Check);
                }
            }
        }
    }

    /// Upgrades still-CHECK-only direct dependents of `id` to DIRTY. Called after a memo's
    /// recompute confirms its value actually changed; narrower than [`Root::propagate_from`]
    /// because the wider subtree was already walked to CHECK at the original source write.
    fn upgrade_check_sinks(&'static self, id: NodeId) {
        let dependents = match self.nodes.borrow().get(id) {
            Some(n) => n.dependents.clone(),
            None => return,
        };
        for dep in dependents {
            let (is_effect, upgraded) = {
                let mut nodes = self.nodes.borrow_mut();
                let Some(node) = nodes.get_mut(dep) else {
                    continue;
                };
                let is_effect = matches!(node.kind, NodeKind::Effect(_));
                match node.flags_mut() {
                    Some(flags) => {
                        let was_check_only = flags.is_check() && !flags.is_dirty();
                        if was_check_only {
                            flags.mark_dirty();
                        }
                        (is_effect, was_check_only)
                    }
                    None => (is_effect, false),
                }
            };
            if upgraded && is_effect {
                self.enqueue_effect(dep);
            }
        }
    }

    fn abort_task_controller(&self, id: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(node) = nodes.get_mut(id) {
            if let NodeKind::Task(t) = &mut node.kind {
                if let Some(c) = t.slot.controller.take() {
                    c.abort();
                }
            }
        }
    }

    fn enqueue_effect(&self, id: NodeId) {
        self.effect_queue.borrow_mut().push(id);
    }

    fn is_memo_or_task(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.borrow().get(id).map(|n| &n.kind),
            Some(NodeKind::Memo(_)) | Some(NodeKind::Task(_))
        )
    }

    // --- refresh (pull) -------------------------------------------------------------------

    /// Lazily brings `id` up to date: walks CHECK ancestors first, detects cycles via the
    /// RUNNING bit, then dispatches to the kind-specific recompute if DIRTY.
    pub(crate) fn refresh(&'static self, id: NodeId) -> CoreResult<()> {
        let flags = match self.nodes.borrow().get(id) {
            Some(n) => n.flags(),
            None => return Ok(()),
        };
        if flags.is_clean() {
            return Ok(());
        }
        if flags.is_check() {
            let deps = match self.nodes.borrow().get(id) {
                Some(n) => n.dependencies.clone(),
                None => return Ok(()),
            };
            for dep in deps {
                if self.is_memo_or_task(dep) {
                    self.refresh(dep)?;
                }
                let still_only_check = self
                    .nodes
                    .borrow()
                    .get(id)
                    .map(|n| n.flags().is_check() && !n.flags().is_dirty())
                    .unwrap_or(false);
                if !still_only_check {
                    break;
                }
            }
        }
        let flags = match self.nodes.borrow().get(id) {
            Some(n) => n.flags(),
            None => return Ok(()),
        };
        if flags.is_running() {
            let kind = self.nodes.borrow()[id].kind.kind_name();
            return Err(CoreError::CircularDependency { kind });
        }
        if flags.is_dirty() {
            let is_memo = matches!(self.nodes.borrow()[id].kind, NodeKind::Memo(_));
            let is_task = matches!(self.nodes.borrow()[id].kind, NodeKind::Task(_));
            if is_memo {
                self.recompute_memo(id);
            } else if is_task {
                self.recompute_task(id);
            } else {
                self.run_effect(id);
            }
        } else {
            // CHECK resolved without becoming DIRTY: nothing to recompute, just clear CHECK.
            if let Some(flags) = self
                .nodes
                .borrow_mut()
                .get_mut(id)
                .and_then(|n| n.flags_mut())
            {
                flags.clear_to_clean();
            }
        }
        Ok(())
    }

    fn begin_recompute(&self, id: NodeId) -> (Option<NodeId>, Option<DependencyTracker>) {
        if let Some(flags) = self.nodes.borrow_mut().get_mut(id).and_then(|n| n.flags_mut()) {
            flags.set_running(true);
        }
        let prev_sink = self.active_sink.replace(Some(id));
        let prev_tracker = self.tracker.replace(Some(DependencyTracker::default()));
        (prev_sink, prev_tracker)
    }

    fn end_recompute(
        &'static self,
        id: NodeId,
        prev_sink: Option<NodeId>,
        prev_tracker: Option<DependencyTracker>,
    ) {
        if let Some(flags) = self.nodes.borrow_mut().get_mut(id).and_then(|n| n.flags_mut()) {
            flags.set_running(false);
        }
        self.active_sink.set(prev_sink);
        let tracker = self.tracker.replace(prev_tracker).unwrap_or_default();
        self.commit_dependencies(id, tracker);
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn recompute_memo(&'static self, id: NodeId) {
        let (prev_sink, prev_tracker) = self.begin_recompute(id);

        let (mut f, prior, had_error) = {
            let mut nodes = self.nodes.borrow_mut();
            let NodeKind::Memo(m) = &mut nodes[id].kind else {
                unreachable!("recompute_memo called on non-memo node")
            };
            let f = std::mem::replace(&mut m.f, Box::new(|_| unreachable!("memo fn reentered")));
            let prior = m.value.take();
            (f, prior, m.error.is_some())
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            f(prior.as_deref())
        }));

        self.end_recompute(id, prev_sink, prev_tracker);

        let mut changed = false;
        {
            let mut nodes = self.nodes.borrow_mut();
            let NodeKind::Memo(m) = &mut nodes[id].kind else {
                unreachable!()
            };
            m.f = f;
            match outcome {
                Ok(next) => {
                    let equal = !had_error
                        && prior
                            .as_deref()
                            .zip(m.equals.as_ref())
                            .map(|(old, eq)| eq(old, next.as_ref()))
                            .unwrap_or(false);
                    if equal {
                        m.value = prior;
                    } else if let Some(guard) = &m.guard {
                        if guard(next.as_ref()) {
                            m.value = Some(next);
                            m.error = None;
                            changed = true;
                        } else {
                            m.value = prior;
                            m.error = Some(CoreError::InvalidSignalValue);
                            changed = true;
                        }
                    } else {
                        m.value = Some(next);
                        m.error = None;
                        changed = true;
                    }
                }
                Err(panic) => {
                    // Unlike a task's resolution (on_task_settled, task.rs), a memo throwing is
                    // unconditionally a change: §4.D has no de-dup clause here, only §4.H/§7.4
                    // scope "repeated identical error does not re-propagate" to tasks.
                    let message = panic_message(&panic);
                    m.value = prior;
                    m.error = Some(CoreError::Compute(ComputeError::new(RecomputePanic(message))));
                    changed = true;
                }
            }
            m.flags.clear_to_clean();
        }

        if changed {
            self.upgrade_check_sinks(id);
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn run_effect(&'static self, id: NodeId) {
        self.run_cleanups(id);
        self.dispose_children(id);

        let (prev_sink, prev_tracker) = self.begin_recompute(id);
        let prev_owner = self.current_owner.replace(id);

        let mut f = {
            let mut nodes = self.nodes.borrow_mut();
            let NodeKind::Effect(e) = &mut nodes[id].kind else {
                unreachable!("run_effect called on non-effect node")
            };
            e.f.take().expect("effect body missing (already disposed?)")
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f()));

        self.current_owner.set(prev_owner);
        self.end_recompute(id, prev_sink, prev_tracker);

        {
            let mut nodes = self.nodes.borrow_mut();
            if let NodeKind::Effect(e) = &mut nodes[id].kind {
                e.f = Some(f);
                e.flags.clear_to_clean();
            }
        }

        match outcome {
            Ok(cleanup) => {
                if let Some(cleanup) = cleanup {
                    if let Some(node) = self.nodes.borrow_mut().get_mut(id) {
                        node.cleanups.push(cleanup);
                    }
                }
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    // task recompute lives in crate::task, as an impl block on Root, since it needs the
    // executor-boundary and abort-controller types defined there.

    // --- effect queue / batching ------------------------------------------------------------

    /// Drains the effect queue. Reentrant calls (from inside an effect's own writes) return
    /// immediately; the outermost call keeps iterating as long as new effects are enqueued.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub(crate) fn flush(&'static self) {
        if self.flushing.get() {
            return;
        }
        self.flushing.set(true);
        let _guard = FlushGuard {
            flushing: &self.flushing,
            queue: &self.effect_queue,
        };
        let mut i = 0;
        loop {
            let len = self.effect_queue.borrow().len();
            if i >= len {
                break;
            }
            let id = self.effect_queue.borrow()[i];
            i += 1;
            let dirty = self
                .nodes
                .borrow()
                .get(id)
                .map(|n| n.flags().is_dirty())
                .unwrap_or(false);
            if dirty {
                self.run_effect(id);
            }
        }
    }

    pub(crate) fn flush_if_not_batching(&'static self) {
        if self.batch_depth.get() == 0 {
            self.flush();
        }
    }

    fn begin_batch(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    fn end_batch(&'static self) {
        let depth = self.batch_depth.get().saturating_sub(1);
        self.batch_depth.set(depth);
        if depth == 0 {
            self.flush();
        }
    }
}

struct FlushGuard<'a> {
    flushing: &'a Cell<bool>,
    queue: &'a RefCell<Vec<NodeId>>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.queue.borrow_mut().clear();
        self.flushing.set(false);
    }
}

/// An error captured from a panic inside a memo's compute function, turning an unwind into an
/// ordinary stored [`CoreError`] instead of tearing down the whole graph.
#[derive(Debug)]
struct RecomputePanic(String);

impl fmt::Display for RecomputePanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for RecomputePanic {}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "memo panicked with a non-string payload".to_string()
    }
}

/// Tracks nodes read during one recompute, in order, coalescing consecutive repeats so that
/// re-reading the same source in the same slot never allocates a second edge. Non-consecutive
/// repeats are deduplicated later by [`Root::commit_dependencies`] so every edge still appears
/// exactly once.
#[derive(Default)]
pub(crate) struct DependencyTracker {
    pub dependencies: SmallVec<[NodeId; 4]>,
}

impl DependencyTracker {
    /// Records a read of `id`, coalescing a consecutive repeat into the same slot. Returns `true`
    /// the first time `id` is seen anywhere in this pass (not just consecutively) — this is what
    /// [`Root::link_to_active_sink`] uses to decide whether to attach the edge synchronously right
    /// now, versus a source that's already attached from an earlier read this same pass.
    fn track(&mut self, id: NodeId) -> bool {
        let first_seen = !self.dependencies.contains(&id);
        if self.dependencies.last() != Some(&id) {
            self.dependencies.push(id);
        }
        first_seen
    }
}

impl NodeHandle {
    /// Disposes the node (or scope) this handle refers to: runs its cleanups (and its
    /// descendants', LIFO), then unlinks and removes it.
    pub fn dispose(self) {
        Root::global().dispose_node(self.0);
    }
}

/// A handle to a root, used to dispose of everything created inside it.
///
/// Obtained from [`create_root`]. Typically leaked for the lifetime of the process; dropped only
/// in tests, where each test gets its own root.
#[derive(Clone, Copy)]
pub struct RootHandle {
    root: &'static Root,
}

impl RootHandle {
    /// Disposes of every node created under this root.
    pub fn dispose(&self) {
        self.root.dispose();
    }

    /// Runs `f` with this root installed as the current one.
    pub fn run_in<T>(&self, f: impl FnOnce() -> T) -> T {
        let prev = Root::set_global(Some(self.root));
        let ret = f();
        Root::set_global(prev);
        ret
    }
}

/// Creates a new reactive root and runs `f` inside it.
///
/// # Example
/// ```
/// # use reactive_core::*;
/// let handle = create_root(|| {
///     let count = create_state(0, StateOptions::default());
///     let _ = count.get();
/// });
/// handle.dispose();
/// ```
#[must_use = "a root's resources are only freed when this handle is disposed"]
pub fn create_root(f: impl FnOnce()) -> RootHandle {
    let root = Root::new_static();
    let prev = Root::set_global(Some(root));
    f();
    Root::set_global(prev);
    RootHandle { root }
}

/// Registers `f` to run when the current owner (scope/effect/memo/task) is disposed or re-run.
///
/// # Example
/// ```
/// # use reactive_core::*;
/// # create_root(|| {
/// let (_, dispose) = create_scope(|_| {
///     on_cleanup(|| println!("scope torn down"));
/// });
/// dispose();
/// # });
/// ```
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let root = Root::global();
    root.push_cleanup(root.current_owner.get(), Box::new(f));
}

/// Defers effect execution until `f` returns; mutations inside `f` still propagate (dirty flags
/// and task abortions happen immediately) but no effect runs until the outermost `batch` call
/// closes.
///
/// # Example
/// ```
/// # use reactive_core::*;
/// # create_root(|| {
/// let a = create_state(1, StateOptions::default());
/// let b = create_state(2, StateOptions::default());
/// let sum = create_memo(move |_: Option<&i32>| a.get().unwrap() + b.get().unwrap(), MemoOptions::with_default_eq());
/// batch(|| {
///     a.set(10).unwrap();
///     b.set(20).unwrap();
/// });
/// assert_eq!(*sum.get().unwrap(), 30);
/// # });
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    let root = Root::global();
    root.begin_batch();
    let ret = f();
    root.end_batch();
    ret
}

/// Returns a handle to the currently active owner (scope, effect, memo or task).
pub fn use_current_owner() -> NodeHandle {
    NodeHandle(Root::global().current_owner.get())
}
