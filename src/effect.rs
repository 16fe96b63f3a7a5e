use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{
    core::{
        self,
        dirty::Dirty,
        pause_scheduling, pause_tracking, restore_active, swap_active, DepKey, Job,
    },
    dep::Dep,
    scope::{register_current, EffectScope},
};


pub(crate) enum SchedulerKind {
    /// Re-run the effect through the queue.
    Run,
    /// Notify a user-supplied callback through the queue instead of
    /// re-running; the owner decides when to call [`Effect::run`].
    Custom(Rc<dyn Fn()>),
    /// Never scheduled; only ever run explicitly. Used by computed values.
    None,
}

/// A reactive side effect: a closure plus the bookkeeping that re-subscribes
/// it to everything it reads and re-dispatches it when any of that changes.
pub(crate) struct EffectInner {
    id: u64,
    f: RefCell<Box<dyn FnMut()>>,
    scheduler: SchedulerKind,
    /// Called on the clean-to-dirty transition, before scheduling. Computed
    /// values use this to propagate invalidation to their own subscribers.
    trigger_hook: RefCell<Option<Box<dyn Fn()>>>,
    active: Cell<bool>,
    allow_recurse: bool,
    dirty: Cell<Dirty>,
    /// Raised but not yet dispatched. Cleared when the scheduler is
    /// enqueued, so one raise produces at most one dispatch.
    pending: Cell<bool>,
    /// Bumped at the start of every run; a dep subscription carrying an
    /// older generation is stale.
    generation: Cell<u64>,
    runnings: Cell<u32>,
    deps: RefCell<Vec<Dep>>,
    /// Live prefix of `deps`; slots past it are leftovers from the previous
    /// run, reused or released as the current run tracks.
    deps_len: Cell<usize>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    #[cfg(debug_assertions)]
    on_track: RefCell<Option<Box<dyn Fn(DebugEvent)>>>,
    #[cfg(debug_assertions)]
    on_trigger: RefCell<Option<Box<dyn Fn(DebugEvent)>>>,
    weak_self: Weak<EffectInner>,
}

impl EffectInner {
    fn new(f: Box<dyn FnMut()>, options: &mut EffectOptions) -> Rc<Self> {
        let scheduler = match options.scheduler.take() {
            Some(s) => SchedulerKind::Custom(s),
            None => SchedulerKind::Run,
        };
        Self::new_raw(f, scheduler, options.allow_recurse, options)
    }
    pub(crate) fn new_raw(
        f: Box<dyn FnMut()>,
        scheduler: SchedulerKind,
        allow_recurse: bool,
        #[allow(unused_variables)] options: &mut EffectOptions,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| EffectInner {
            id: core::next_effect_id(),
            f: RefCell::new(f),
            scheduler,
            trigger_hook: RefCell::new(None),
            active: Cell::new(true),
            allow_recurse,
            dirty: Cell::new(Dirty::Dirty),
            pending: Cell::new(false),
            generation: Cell::new(1),
            runnings: Cell::new(0),
            deps: RefCell::new(Vec::new()),
            deps_len: Cell::new(0),
            on_stop: RefCell::new(None),
            #[cfg(debug_assertions)]
            on_track: RefCell::new(options.on_track.take()),
            #[cfg(debug_assertions)]
            on_trigger: RefCell::new(options.on_trigger.take()),
            weak_self: weak_self.clone(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }
    pub(crate) fn dirty_level(&self) -> Dirty {
        self.dirty.get()
    }
    pub(crate) fn set_dirty(&self, level: Dirty) {
        self.dirty.set(level);
    }
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }
    pub(crate) fn running(&self) -> bool {
        self.runnings.get() > 0
    }
    pub(crate) fn set_trigger_hook(&self, f: impl Fn() + 'static) {
        *self.trigger_hook.borrow_mut() = Some(Box::new(f));
    }
    pub(crate) fn set_on_stop(&self, f: impl FnOnce() + 'static) {
        *self.on_stop.borrow_mut() = Some(Box::new(f));
    }

    /// Stores `dep` in the next subscription slot. Returns the dep it
    /// displaced, if the slot held a different one from the previous run.
    pub(crate) fn record_dep(&self, dep: &Dep) -> Option<Dep> {
        let idx = self.deps_len.get();
        self.deps_len.set(idx + 1);
        let mut deps = self.deps.borrow_mut();
        if idx < deps.len() {
            if deps[idx].ptr_eq(dep) {
                None
            } else {
                Some(std::mem::replace(&mut deps[idx], dep.clone()))
            }
        } else {
            deps.push(dep.clone());
            None
        }
    }

    /// Raises dirtiness to at least `level`. On the clean-to-dirty
    /// transition this marks the effect pending and fires the trigger hook.
    pub(crate) fn raise(&self, level: Dirty, label: Option<&DepKey>) {
        if !self.active.get() {
            return;
        }
        let was = self.dirty.get();
        if was >= level {
            return;
        }
        self.dirty.set(level);
        if was == Dirty::Clean {
            self.pending.set(true);
            self.emit_trigger(label, level);
            let hook = self.trigger_hook.borrow();
            if let Some(hook) = &*hook {
                hook();
            }
        }
    }

    /// Enqueues the scheduler if this effect is pending and may be
    /// dispatched right now.
    ///
    /// An effect raised only to `MaybeDirtyComputed` stays pending without
    /// being enqueued: the level means "a computed I read performed a side
    /// effect", which matters only if some later raise escalates it. A
    /// currently-running effect is not re-enqueued unless it opted into
    /// recursion.
    pub(crate) fn try_schedule(&self) {
        if !self.pending.get() {
            return;
        }
        if self.runnings.get() > 0 && !self.allow_recurse {
            return;
        }
        if self.dirty.get() == Dirty::MaybeDirtyComputed {
            return;
        }
        self.pending.set(false);
        match &self.scheduler {
            SchedulerKind::Run => core::enqueue(Job::RunEffect(self.weak_self.clone())),
            SchedulerKind::Custom(f) => core::enqueue(Job::Call(f.clone())),
            SchedulerKind::None => {}
        }
    }

    /// Resolves `MaybeDirty` to a definite answer by refreshing, in
    /// subscription order, every computed this effect depends on; the first
    /// one whose value actually changed escalates to `Dirty` and ends the
    /// scan. Returns whether the effect needs to re-run.
    pub(crate) fn resolve_dirty(self: &Rc<Self>) -> bool {
        if self.dirty.get().is_maybe_dirty() {
            self.dirty.set(Dirty::Querying);
            let _untracked = pause_tracking();
            let len = self.deps_len.get();
            for i in 0..len {
                let dep = {
                    let deps = self.deps.borrow();
                    match deps.get(i) {
                        Some(dep) => dep.clone(),
                        None => break,
                    }
                };
                if let Some(computed) = dep.computed() {
                    computed.refresh();
                    if self.dirty.get().is_dirty() {
                        break;
                    }
                }
            }
            // a dependency cycle comes back around as Querying: treat the
            // cached value as current rather than recurse forever
            if self.dirty.get() == Dirty::Querying {
                self.dirty.set(Dirty::Clean);
            }
        }
        self.dirty.get().is_dirty()
    }

    /// Runs the closure with this effect installed as the tracking context.
    ///
    /// The whole run holds a scheduling pause, so raises performed by the
    /// closure (including self-raises under `allow_recurse`) dispatch
    /// through the queue after the closure's borrow ends.
    pub(crate) fn run(self: &Rc<Self>) {
        self.dirty.set(Dirty::Clean);
        if !self.active.get() {
            (self.f.borrow_mut())();
            return;
        }
        let _batch = pause_scheduling();
        let prev = swap_active(Some(self.clone()));
        let _restore = RestoreActive(Some(prev));
        self.runnings.set(self.runnings.get() + 1);
        self.generation.set(self.generation.get().wrapping_add(1));
        self.deps_len.set(0);
        (self.f.borrow_mut())();
        self.runnings.set(self.runnings.get() - 1);
        self.drop_stale_tail();
    }

    /// Releases subscriptions in slots the latest run did not reuse.
    fn drop_stale_tail(&self) {
        let len = self.deps_len.get();
        let generation = self.generation.get();
        loop {
            let dep = {
                let mut deps = self.deps.borrow_mut();
                if deps.len() <= len {
                    break;
                }
                deps.pop()
            };
            if let Some(dep) = dep {
                dep.release_stale(self.id, generation);
            }
        }
    }

    /// Unsubscribes from every dep and deactivates. Idempotent.
    pub(crate) fn stop(&self) {
        if !self.active.replace(false) {
            return;
        }
        self.generation.set(self.generation.get().wrapping_add(1));
        self.deps_len.set(0);
        let generation = self.generation.get();
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for dep in deps {
            dep.release_stale(self.id, generation);
        }
        self.pending.set(false);
        self.dirty.set(Dirty::Clean);
        if let Some(f) = self.on_stop.borrow_mut().take() {
            f();
        }
    }

    #[cfg(debug_assertions)]
    pub(crate) fn emit_track(&self, label: Option<&DepKey>) {
        let hook = self.on_track.borrow();
        if let Some(hook) = &*hook {
            hook(DebugEvent {
                key: label.cloned(),
                dirty: self.dirty.get(),
            });
        }
    }
    #[cfg(not(debug_assertions))]
    pub(crate) fn emit_track(&self, _label: Option<&DepKey>) {}

    #[cfg(debug_assertions)]
    fn emit_trigger(&self, label: Option<&DepKey>, level: Dirty) {
        let hook = self.on_trigger.borrow();
        if let Some(hook) = &*hook {
            hook(DebugEvent {
                key: label.cloned(),
                dirty: level,
            });
        }
    }
    #[cfg(not(debug_assertions))]
    fn emit_trigger(&self, _label: Option<&DepKey>, _level: Dirty) {}
}

/// Diagnostic payload passed to `on_track` / `on_trigger` hooks.
#[cfg(debug_assertions)]
#[derive(Debug, Clone)]
pub struct DebugEvent {
    /// Key of the dependency involved, when it has one.
    pub key: Option<DepKey>,
    /// Dirtiness level at the time of the event.
    pub dirty: Dirty,
}

struct RestoreActive(Option<(Option<Rc<EffectInner>>, bool)>);

impl Drop for RestoreActive {
    fn drop(&mut self) {
        if let Some(prev) = self.0.take() {
            restore_active(prev);
        }
    }
}

/// Handle to a reactive effect created by [`effect`] or [`effect_with`].
#[derive(Clone)]
pub struct Effect(pub(crate) Rc<EffectInner>);

impl Effect {
    /// Runs the effect immediately, re-collecting its dependencies.
    pub fn run(&self) {
        self.0.run();
    }

    /// Unsubscribes the effect from everything it reads and prevents any
    /// further dispatch.
    pub fn stop(&self) {
        self.0.stop();
    }

    pub fn is_active(&self) -> bool {
        self.0.is_active()
    }

    pub fn is_dirty(&self) -> bool {
        self.0.dirty_level().is_dirty()
    }

    /// Registers a teardown callback, run once when the effect stops.
    /// Replaces any previously registered one.
    pub fn on_stop(&self, f: impl FnOnce() + 'static) {
        self.0.set_on_stop(f);
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("active", &self.0.is_active())
            .field("dirty", &self.0.dirty_level())
            .finish()
    }
}

/// Stops `e`. Equivalent to [`Effect::stop`]; mirrors creation as a free
/// function.
pub fn stop(e: &Effect) {
    e.stop();
}

/// Options for [`effect_with`].
#[derive(Default)]
pub struct EffectOptions {
    /// Skip the initial run; the caller dispatches the first run itself.
    pub lazy: bool,
    /// Called through the queue instead of re-running the effect.
    pub scheduler: Option<Rc<dyn Fn()>>,
    /// Scope to register with instead of the current one.
    pub scope: Option<EffectScope>,
    /// Permit the effect to schedule itself from its own run.
    pub allow_recurse: bool,
    /// Called whenever the effect subscribes to a dependency.
    #[cfg(debug_assertions)]
    pub on_track: Option<Box<dyn Fn(DebugEvent)>>,
    /// Called on each clean-to-dirty transition.
    #[cfg(debug_assertions)]
    pub on_trigger: Option<Box<dyn Fn(DebugEvent)>>,
}

/// Creates an effect that runs `f` now and re-runs it whenever a reactive
/// value it read changes.
pub fn effect(f: impl FnMut() + 'static) -> Effect {
    effect_with(f, EffectOptions::default())
}

/// Creates an effect with explicit [`EffectOptions`].
pub fn effect_with(f: impl FnMut() + 'static, mut options: EffectOptions) -> Effect {
    let scope = options.scope.take();
    let inner = EffectInner::new(Box::new(f), &mut options);
    let e = Effect(inner);
    match scope {
        Some(scope) => scope.add_effect(e.clone()),
        None => register_current(e.clone()),
    }
    if !options.lazy {
        e.run();
    }
    e
}
