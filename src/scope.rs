use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use slabmap::SlabMap;

use crate::effect::Effect;


thread_local! {
    static CURRENT: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeInner {
    active: Cell<bool>,
    effects: RefCell<SlabMap<Effect>>,
    scopes: RefCell<SlabMap<EffectScope>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    parent: RefCell<Option<Weak<ScopeInner>>>,
    key_in_parent: Cell<usize>,
}

/// Collects effects, child scopes and cleanup callbacks created inside its
/// [`run`](EffectScope::run), so they can all be stopped with one call.
///
/// A scope created while another scope is running becomes its child and is
/// stopped along with it; [`effect_scope_detached`] opts out of that.
#[derive(Clone)]
pub struct EffectScope(Rc<ScopeInner>);

/// Creates a scope attached to the currently-running scope, if any.
pub fn effect_scope() -> EffectScope {
    let scope = new_scope();
    if let Some(parent) = get_current_scope() {
        parent.add_scope(scope.clone());
    }
    scope
}

/// Creates a scope no parent will stop.
pub fn effect_scope_detached() -> EffectScope {
    new_scope()
}

fn new_scope() -> EffectScope {
    EffectScope(Rc::new(ScopeInner {
        active: Cell::new(true),
        effects: RefCell::new(SlabMap::new()),
        scopes: RefCell::new(SlabMap::new()),
        cleanups: RefCell::new(Vec::new()),
        parent: RefCell::new(None),
        key_in_parent: Cell::new(0),
    }))
}

/// The innermost scope currently running, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    CURRENT.with(|current| current.borrow().last().cloned())
}

/// Registers `f` to run when the current scope is stopped. No-op outside a
/// running scope.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) {
    if let Some(scope) = get_current_scope() {
        scope.0.cleanups.borrow_mut().push(Box::new(f));
    }
}

/// Registers `e` with the innermost running scope, if any.
pub(crate) fn register_current(e: Effect) {
    if let Some(scope) = get_current_scope() {
        scope.add_effect(e);
    }
}

struct PopScope;

impl Drop for PopScope {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|current| current.borrow_mut().pop());
    }
}

impl EffectScope {
    /// Runs `f` with this scope as the collection target. Returns `None`
    /// without running if the scope was already stopped.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        if !self.0.active.get() {
            return None;
        }
        CURRENT.with(|current| current.borrow_mut().push(self.clone()));
        let _pop = PopScope;
        Some(f())
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// Stops every collected effect, then child scopes, then runs cleanup
    /// callbacks in registration order. Idempotent.
    pub fn stop(&self) {
        if !self.0.active.replace(false) {
            return;
        }
        let effects = std::mem::replace(&mut *self.0.effects.borrow_mut(), SlabMap::new());
        for e in effects.values() {
            e.stop();
        }
        let scopes = std::mem::replace(&mut *self.0.scopes.borrow_mut(), SlabMap::new());
        for s in scopes.values() {
            s.stop();
        }
        let cleanups = std::mem::take(&mut *self.0.cleanups.borrow_mut());
        for f in cleanups {
            f();
        }
        self.detach();
    }

    fn detach(&self) {
        let parent = self.0.parent.borrow_mut().take();
        if let Some(parent) = parent.and_then(|p| p.upgrade()) {
            parent.scopes.borrow_mut().remove(self.0.key_in_parent.get());
        }
    }

    pub(crate) fn add_effect(&self, e: Effect) {
        if self.0.active.get() {
            self.0.effects.borrow_mut().insert(e);
        } else {
            e.stop();
        }
    }

    fn add_scope(&self, child: EffectScope) {
        if !self.0.active.get() {
            child.stop();
            return;
        }
        let key = self.0.scopes.borrow_mut().insert(child.clone());
        *child.0.parent.borrow_mut() = Some(Rc::downgrade(&self.0));
        child.0.key_in_parent.set(key);
    }
}

impl std::fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.0.active.get())
            .finish()
    }
}
