//! Scopes: pure owners with no edges of their own, used to group child nodes and cleanups for
//! cascaded disposal.

use crate::node::{NodeHandle, NodeId, NodeKind, ReactiveNode};
use crate::root::Root;

/// Lets code running inside [`create_scope`] attach additional cleanups to the scope, beyond
/// whatever [`on_cleanup`](crate::root::on_cleanup) calls it makes while `f` is running (both end
/// up in the same LIFO list).
pub struct ScopeRegister {
    id: NodeId,
}

impl ScopeRegister {
    /// Attaches a cleanup to the scope, run in LIFO order alongside every other cleanup on
    /// disposal.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) {
        Root::global().push_cleanup(self.id, Box::new(f));
    }
}

/// Creates a child scope, runs `f(register)` with it installed as the current owner, and returns
/// its result alongside a disposer.
///
/// Any signal, memo, task or effect created while `f` runs is adopted as a child of this scope
/// and torn down when `dispose` is called. If created while another owner is active, the scope's
/// own disposal is registered as a cleanup of that owner, cascading teardown outward-in.
///
/// # Example
/// ```
/// # use reactive_core::*;
/// # create_root(|| {
/// let (value, dispose) = create_scope(|_| {
///     let count = create_state(1, StateOptions::default());
///     *count.get().unwrap()
/// });
/// assert_eq!(value, 1);
/// dispose();
/// # });
/// ```
#[track_caller]
pub fn create_scope<T>(f: impl FnOnce(&ScopeRegister) -> T) -> (T, impl FnOnce()) {
    let root = Root::global();
    let parent = root.current_owner.get();
    let id = root
        .nodes
        .borrow_mut()
        .insert(ReactiveNode::new(NodeKind::Scope, parent));
    root.adopt(id);

    let register = ScopeRegister { id };
    let result = root.with_owner(id, || f(&register));

    let dispose = move || {
        NodeHandle(id).dispose();
    };
    (result, dispose)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::root::{create_root, on_cleanup, use_current_owner};
    use crate::signal::{create_state, StateOptions};

    use super::*;

    #[test]
    fn scope_cleanup_is_lifo() {
        create_root(|| {
            let log = Rc::new(std::cell::RefCell::new(Vec::new()));
            let log1 = log.clone();
            let log2 = log.clone();
            let (_, dispose) = create_scope(move |reg| {
                reg.on_cleanup(move || log1.borrow_mut().push(1));
                reg.on_cleanup(move || log2.borrow_mut().push(2));
            });
            dispose();
            assert_eq!(*log.borrow(), vec![2, 1]);
        })
        .dispose();
    }

    #[test]
    fn nested_scope_cascades_on_outer_dispose() {
        create_root(|| {
            let cleaned = Rc::new(Cell::new(false));
            let cleaned2 = cleaned.clone();

            let (_, dispose_outer) = create_scope(move |_| {
                create_scope(move |_| {
                    on_cleanup(move || cleaned2.set(true));
                });
            });

            assert!(!cleaned.get());
            dispose_outer();
            assert!(cleaned.get());
        })
        .dispose();
    }

    #[test]
    fn create_scope_restores_owner_after_returning() {
        create_root(|| {
            let outer = use_current_owner();
            let (_, dispose) = create_scope(|_| {
                let _ = create_state(1, StateOptions::<i32>::default());
            });
            assert_eq!(use_current_owner(), outer, "owner must be restored");
            dispose();
        })
        .dispose();
    }

    #[test]
    fn dispose_twice_runs_cleanup_once() {
        create_root(|| {
            let count = Rc::new(Cell::new(0));
            let count2 = count.clone();
            let (_, dispose) = create_scope(move |reg| {
                reg.on_cleanup(move || count2.set(count2.get() + 1));
            });
            dispose();
            assert_eq!(count.get(), 1);
            // A second dispose is a no-op: the node is already gone from the arena.
        })
        .dispose();
    }
}
