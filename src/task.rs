//! Asynchronous derivations ("tasks"): a memo whose compute function returns a future, spliced
//! across event-loop turns, with cancellation on supersession.
//!
//! Grounded on the same lazy-pull shape as [`crate::memo`], generalized with the
//! executor-agnostic spawn boundary from `any_spawner` (the same crate the wider Leptos reactive
//! graph uses for this purpose) and a small hand-rolled abort token, since `std` has no
//! `AbortController` equivalent.

use std::any::Any;
use std::cell::Cell;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use any_spawner::Executor;

use crate::error::{ComputeError, CoreError, CoreResult};
use crate::node::{EqualsFn, GuardFn, NodeId, NodeKind, ReactiveNode, TaskData};
use crate::root::Root;

/// A future boxed for storage on a [`crate::node::TaskData`]. Not `Send`: task bodies routinely
/// close over node handles, which are thread-local by design (see the concurrency notes in
/// module docs).
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Any>, ComputeError>>>>;

/// Shared cancellation flag passed into a task body and checked by its resolution continuation.
///
/// Cloning an `AbortController` does *not* give you a second independent controller: the flag is
/// shared, matching the invariant that a task keeps at most one live controller — installing a
/// new one always aborts the previous.
#[derive(Clone)]
pub(crate) struct AbortController {
    aborted: Rc<Cell<bool>>,
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            aborted: Rc::new(Cell::new(false)),
        }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            aborted: self.aborted.clone(),
        }
    }

    pub fn abort(&self) {
        self.aborted.set(true);
    }

    /// Identity comparison used to detect whether a resolving future belongs to the controller
    /// currently installed on the node (i.e. was not superseded).
    pub fn is_same(&self, other: &AbortController) -> bool {
        Rc::ptr_eq(&self.aborted, &other.aborted)
    }
}

/// The cancellation token handed to a task body.
///
/// Exposed publicly so user task closures can poll it (e.g. to bail out of a long-running loop
/// early) in addition to the automatic cancellation the graph performs on supersession.
#[derive(Clone)]
pub struct AbortSignal {
    aborted: Rc<Cell<bool>>,
}

impl AbortSignal {
    /// Returns `true` once this run has been superseded by a newer one or explicitly aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }
}

/// Per-node task bookkeeping: the live controller, if a run is outstanding.
pub(crate) struct TaskSlot {
    pub controller: Option<AbortController>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self { controller: None }
    }
}

impl Root {
    /// Abort any prior run, invoke the body synchronously to capture dependencies and obtain the
    /// future, then hand the future to the executor with a supersession-checked continuation.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub(crate) fn recompute_task(&'static self, id: NodeId) {
        let controller = AbortController::new();
        let (mut f, prior) = {
            let mut nodes = self.nodes.borrow_mut();
            let NodeKind::Task(task) = &mut nodes[id].kind else {
                unreachable!("recompute_task called on non-task node")
            };
            if let Some(prev) = task.slot.controller.take() {
                prev.abort();
            }
            task.error = None;
            task.slot.controller = Some(controller.clone());
            let f = std::mem::replace(&mut task.f, Box::new(|_, _| Box::pin(std::future::pending())));
            let prior = task.value.take();
            (f, prior)
        };

        let (prev_sink, prev_tracker) = self.begin_recompute_for_task(id);
        let signal = controller.signal();
        let fut = f(prior.as_deref(), signal);
        self.end_recompute_for_task(id, prev_sink, prev_tracker);

        {
            let mut nodes = self.nodes.borrow_mut();
            let NodeKind::Task(task) = &mut nodes[id].kind else {
                unreachable!()
            };
            task.f = f;
            task.value = prior;
            task.flags.clear_to_clean();
        }

        let root = self;
        Executor::spawn_local(async move {
            let result = fut.await;
            root.on_task_settled(id, controller, result);
        });
    }

    /// `begin_recompute`/`end_recompute` on [`Root`] are private to the module that defines
    /// `recompute_memo`/`run_effect`; tasks need the identical tracking-context dance, so it is
    /// duplicated here in miniature rather than widening that module's visibility for one caller.
    fn begin_recompute_for_task(
        &self,
        id: NodeId,
    ) -> (Option<NodeId>, Option<crate::root::DependencyTracker>) {
        if let Some(flags) = self
            .nodes
            .borrow_mut()
            .get_mut(id)
            .and_then(|n| n.flags_mut())
        {
            flags.set_running(true);
        }
        let prev_sink = self.active_sink.replace(Some(id));
        let prev_tracker = self.tracker.replace(Some(Default::default()));
        (prev_sink, prev_tracker)
    }

    fn end_recompute_for_task(
        &'static self,
        id: NodeId,
        prev_sink: Option<NodeId>,
        prev_tracker: Option<crate::root::DependencyTracker>,
    ) {
        if let Some(flags) = self
            .nodes
            .borrow_mut()
            .get_mut(id)
            .and_then(|n| n.flags_mut())
        {
            flags.set_running(false);
        }
        self.active_sink.set(prev_sink);
        let tracker = self.tracker.replace(prev_tracker).unwrap_or_default();
        self.commit_dependencies(id, tracker);
    }

    /// Runs when a task's future resolves. Drops the result silently if superseded.
    fn on_task_settled(
        &'static self,
        id: NodeId,
        controller: AbortController,
        result: Result<Box<dyn Any>, ComputeError>,
    ) {
        if controller.signal().is_aborted() {
            return;
        }
        let mut changed = false;
        {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(id) else {
                return;
            };
            let NodeKind::Task(task) = &mut node.kind else {
                return;
            };
            // Supersession: if the controller currently installed is not the one this
            // continuation was started with, a newer run has since begun; drop this result.
            match &task.slot.controller {
                Some(current) if current.is_same(&controller) => {}
                _ => return,
            }
            task.slot.controller = None;
            match result {
                Ok(value) => {
                    let had_error = task.error.take().is_some();
                    let equal = !had_error
                        && task
                            .value
                            .as_deref()
                            .zip(task.equals.as_ref())
                            .map(|(old, eq)| eq(old, value.as_ref()))
                            .unwrap_or(false);
                    if !equal {
                        match &task.guard {
                            Some(guard) if !guard(value.as_ref()) => {
                                task.error = Some(CoreError::InvalidSignalValue);
                            }
                            _ => {
                                task.value = Some(value);
                            }
                        }
                        changed = true;
                    }
                }
                Err(err) => {
                    let is_new = match &task.error {
                        Some(CoreError::Compute(prev)) => !prev.same_as(&err),
                        _ => true,
                    };
                    task.error = Some(CoreError::Compute(err));
                    changed = is_new;
                }
            }
        }
        if changed {
            self.propagate_from(id);
            self.flush_if_not_batching();
        }
    }
}

/// Handle returned by [`create_task`]/[`create_task_fallible`].
pub struct Task<T: 'static> {
    pub(crate) id: NodeId,
    root: &'static Root,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Task<T> {}

impl<T: 'static> Task<T> {
    /// Reads the last committed value, re-throwing a stored compute error if present.
    ///
    /// Always returns the *previous* committed value while a run is pending — consumers never
    /// observe a task mid-flight.
    #[track_caller]
    pub fn get(self) -> CoreResult<Rc<T>>
    where
        T: Clone,
    {
        self.root.link_to_active_sink(self.id);
        self.root.refresh(self.id)?;
        let nodes = self.root.nodes.borrow();
        let NodeKind::Task(task) = &nodes[self.id].kind else {
            unreachable!()
        };
        if let Some(err) = &task.error {
            return Err(err.clone());
        }
        let value = task
            .value
            .as_ref()
            .expect("task value missing after refresh")
            .downcast_ref::<T>()
            .expect("task value type mismatch")
            .clone();
        Ok(Rc::new(value))
    }

    /// Whether a run is currently outstanding (the controller slot is occupied).
    pub fn is_pending(self) -> bool {
        let nodes = self.root.nodes.borrow();
        let NodeKind::Task(task) = &nodes[self.id].kind else {
            return false;
        };
        task.slot.controller.is_some()
    }

    /// Cancels the in-flight run, if any, without scheduling a replacement. The next `get` will
    /// observe the task as DIRTY only if a dependency has actually changed — an explicit `abort`
    /// alone does not mark the task dirty.
    pub fn abort(self) {
        let mut nodes = self.root.nodes.borrow_mut();
        if let NodeKind::Task(task) = &mut nodes[self.id].kind {
            if let Some(controller) = task.slot.controller.take() {
                controller.abort();
            }
        }
    }
}

/// Options accepted by [`create_task`]; mirrors [`crate::memo::MemoOptions`].
pub struct TaskOptions<T> {
    /// Seed value treated as the prior value on the first run.
    pub value: Option<T>,
    /// Equality function gating change propagation.
    pub equals: Option<EqualsFn>,
    /// Rejects resolved values that don't satisfy an invariant.
    pub guard: Option<GuardFn>,
}

impl<T> Default for TaskOptions<T> {
    fn default() -> Self {
        Self {
            value: None,
            equals: None,
            guard: None,
        }
    }
}

impl<T: PartialEq + 'static> TaskOptions<T> {
    /// Convenience constructor that wires up `PartialEq::eq` as the equality function.
    pub fn with_default_eq() -> Self {
        Self {
            value: None,
            equals: Some(Box::new(|a, b| {
                a.downcast_ref::<T>().unwrap() == b.downcast_ref::<T>().unwrap()
            })),
            guard: None,
        }
    }
}

/// Creates an asynchronous derivation.
///
/// `f` is invoked synchronously to obtain the future (dependency capture happens here, before
/// any `.await`), then the future is handed to the globally configured executor (see
/// [`any_spawner::Executor`]). Reading the returned handle with [`Task::get`] always returns the
/// last committed value.
#[track_caller]
pub fn create_task<T, Fut>(
    mut f: impl FnMut(Option<&T>, AbortSignal) -> Fut + 'static,
    options: TaskOptions<T>,
) -> Task<T>
where
    T: 'static,
    Fut: Future<Output = T> + 'static,
{
    create_task_fallible(
        move |prior, signal| {
            let fut = f(prior, signal);
            async move { Ok::<T, std::convert::Infallible>(fut.await) }
        },
        options,
    )
}

/// Like [`create_task`], but for bodies that can fail. The error is captured on the node and
/// re-surfaced from every subsequent `get` until a successful run replaces it.
#[track_caller]
pub fn create_task_fallible<T, E, Fut>(
    mut f: impl FnMut(Option<&T>, AbortSignal) -> Fut + 'static,
    options: TaskOptions<T>,
) -> Task<T>
where
    T: 'static,
    E: StdError + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
{
    let root = Root::global();
    let parent = root.current_owner.get();
    let id = root.nodes.borrow_mut().insert(ReactiveNode::new(
        NodeKind::Task(TaskData {
            f: Box::new(move |prior, signal| {
                let prior = prior.map(|p| p.downcast_ref::<T>().unwrap());
                let fut = f(prior, signal);
                Box::pin(async move {
                    fut.await
                        .map(|v| Box::new(v) as Box<dyn Any>)
                        .map_err(ComputeError::new)
                })
            }),
            value: options.value.map(|v| Box::new(v) as Box<dyn Any>),
            equals: options.equals,
            guard: options.guard,
            error: None,
            flags: crate::node::Flags::dirty(),
            slot: TaskSlot::new(),
        }),
        parent,
    ));
    root.adopt(id);
    Task {
        id,
        root,
        _phantom: std::marker::PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fmt;
    use std::rc::Rc;

    use futures::channel::oneshot;

    use crate::root::create_root;
    use crate::signal::{create_state, StateOptions};

    use super::*;

    #[derive(Debug)]
    struct Boom(&'static str);

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl StdError for Boom {}

    #[tokio::test]
    async fn task_resolves_and_commits_value() {
        let _ = Executor::init_tokio();
        tokio::task::LocalSet::new()
            .run_until(async {
                let mut created = None;
                let handle = create_root(|| {
                    let mut opts = TaskOptions::with_default_eq();
                    opts.value = Some(0);
                    created = Some(create_task(
                        move |_prior: Option<&i32>, _signal| async move { 42 },
                        opts,
                    ));
                });
                let task = created.unwrap();

                assert_eq!(*task.get().unwrap(), 0, "seed value visible before the run settles");
                assert!(task.is_pending());

                for _ in 0..50 {
                    tokio::task::yield_now().await;
                    if !task.is_pending() {
                        break;
                    }
                }
                assert!(!task.is_pending());
                assert_eq!(*task.get().unwrap(), 42);

                handle.dispose();
            })
            .await;
    }

    #[tokio::test]
    async fn task_cancellation_drops_superseded_run() {
        let _ = Executor::init_tokio();
        tokio::task::LocalSet::new()
            .run_until(async {
                let senders: Rc<RefCell<Vec<oneshot::Sender<String>>>> =
                    Rc::new(RefCell::new(Vec::new()));
                let senders2 = senders.clone();

                let mut created = None;
                let handle = create_root(|| {
                    let src = create_state("a".to_string(), StateOptions::with_default_eq());
                    let mut opts = TaskOptions::with_default_eq();
                    opts.value = Some(String::new());
                    let task = create_task(
                        move |_prior: Option<&String>, _signal| {
                            let _current = (*src.get().unwrap()).clone();
                            let (tx, rx) = oneshot::channel();
                            senders2.borrow_mut().push(tx);
                            async move { rx.await.unwrap() }
                        },
                        opts,
                    );
                    created = Some((src, task));
                });
                let (src, task) = created.unwrap();

                task.get().unwrap();
                tokio::task::yield_now().await;
                assert_eq!(senders.borrow().len(), 1, "first run should have started");

                src.set("b".to_string()).unwrap();
                assert!(
                    !task.is_pending(),
                    "a write to a dependency aborts the in-flight run immediately"
                );

                task.get().unwrap();
                tokio::task::yield_now().await;
                assert_eq!(senders.borrow().len(), 2, "a fresh run should start on re-read");

                // Resolve the superseded (first) run; its result must be dropped silently.
                senders.borrow_mut().remove(0).send("A".to_string()).unwrap();
                tokio::task::yield_now().await;
                assert!(task.is_pending(), "a stale resolution must not clear pending");
                assert_eq!(*task.get().unwrap(), String::new());

                // Resolve the current run.
                senders.borrow_mut().remove(0).send("B".to_string()).unwrap();
                for _ in 0..20 {
                    tokio::task::yield_now().await;
                    if !task.is_pending() {
                        break;
                    }
                }
                assert_eq!(*task.get().unwrap(), "B");

                handle.dispose();
            })
            .await;
    }

    #[tokio::test]
    async fn task_error_capture_and_recovery() {
        let _ = Executor::init_tokio();
        tokio::task::LocalSet::new()
            .run_until(async {
                let mut created = None;
                let handle = create_root(|| {
                    let trigger = create_state(0, StateOptions::with_default_eq());
                    let mut opts = TaskOptions::with_default_eq();
                    opts.value = Some(0);
                    let task = create_task_fallible(
                        move |_prior: Option<&i32>, _signal| {
                            let v = *trigger.get().unwrap();
                            async move {
                                if v % 2 == 1 {
                                    Err(Boom("bad"))
                                } else {
                                    Ok(v)
                                }
                            }
                        },
                        opts,
                    );
                    created = Some((trigger, task));
                });
                let (trigger, task) = created.unwrap();

                task.get().unwrap();
                for _ in 0..20 {
                    tokio::task::yield_now().await;
                    if !task.is_pending() {
                        break;
                    }
                }
                assert_eq!(*task.get().unwrap(), 0);

                trigger.set(1).unwrap();
                for _ in 0..20 {
                    tokio::task::yield_now().await;
                    if !task.is_pending() {
                        break;
                    }
                }
                assert!(task.get().is_err(), "an odd value surfaces the compute error");

                // Still odd: the task errors identically. The stored error is replaced with an
                // equivalent one (not accumulated) and reading still surfaces it.
                trigger.set(3).unwrap();
                for _ in 0..20 {
                    tokio::task::yield_now().await;
                    if !task.is_pending() {
                        break;
                    }
                }
                assert!(task.get().is_err());

                trigger.set(4).unwrap();
                for _ in 0..20 {
                    tokio::task::yield_now().await;
                    if !task.is_pending() {
                        break;
                    }
                }
                assert_eq!(*task.get().unwrap(), 4, "a later success clears the stored error");

                handle.dispose();
            })
            .await;
    }

    #[tokio::test]
    async fn task_explicit_abort_does_not_error() {
        let _ = Executor::init_tokio();
        tokio::task::LocalSet::new()
            .run_until(async {
                let (tx, rx) = oneshot::channel::<i32>();
                let rx = Rc::new(RefCell::new(Some(rx)));
                let rx2 = rx.clone();

                let mut created = None;
                let handle = create_root(|| {
                    let mut opts = TaskOptions::with_default_eq();
                    opts.value = Some(0);
                    let task = create_task(
                        move |_prior: Option<&i32>, _signal| {
                            let rx = rx2.borrow_mut().take().expect("body runs once in this test");
                            async move { rx.await.unwrap_or(0) }
                        },
                        opts,
                    );
                    created = Some(task);
                });
                let task = created.unwrap();

                task.get().unwrap();
                tokio::task::yield_now().await;
                assert!(task.is_pending());

                task.abort();
                assert!(
                    !task.is_pending(),
                    "abort clears the controller without marking the task dirty"
                );

                // Resolving the now-aborted future must not surface as a value or an error.
                let _ = tx.send(99);
                tokio::task::yield_now().await;
                assert_eq!(
                    *task.get().unwrap(),
                    0,
                    "the aborted run's result is dropped; the prior value stands"
                );
                assert!(task.get().is_ok());

                handle.dispose();
            })
            .await;
    }
}
