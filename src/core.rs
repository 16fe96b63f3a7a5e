use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    mem::replace,
    rc::Rc,
    thread::AccessError,
};

use indexmap::IndexMap;
use parse_display::Display;

use crate::{
    dep::{trigger_effects, Dep},
    effect::EffectInner,
    value::{RawTarget, WeakTarget},
};

pub mod dirty;

use dirty::{Dirty, TriggerKind};

thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
    static REGISTRY: RefCell<HashMap<usize, TargetEntry>> = RefCell::new(HashMap::new());
}

/// Per-thread tracking context: which effect is active, whether reads are
/// tracked, and the paused scheduler queue. One reactive graph per thread.
struct Globals {
    active: Option<Rc<EffectInner>>,
    should_track: bool,
    track_stack: Vec<bool>,
    scheduling_pause: usize,
    queue: VecDeque<Job>,
    flushing: bool,
    next_effect_id: u64,
}

impl Globals {
    fn new() -> Self {
        Self {
            active: None,
            should_track: false,
            track_stack: Vec::new(),
            scheduling_pause: 0,
            queue: VecDeque::new(),
            flushing: false,
            next_effect_id: 1,
        }
    }
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut()))
    }
}

pub(crate) enum Job {
    /// Default re-run dispatch of an effect: dirty-check, then run.
    RunEffect(std::rc::Weak<EffectInner>),
    /// Custom scheduler callback.
    Call(Rc<dyn Fn()>),
}

impl Job {
    fn invoke(self) {
        match self {
            Job::RunEffect(weak) => {
                if let Some(effect) = weak.upgrade() {
                    if effect.resolve_dirty() {
                        effect.run();
                    }
                }
            }
            Job::Call(f) => f(),
        }
    }
}

pub(crate) fn next_effect_id() -> u64 {
    Globals::with(|g| {
        let id = g.next_effect_id;
        g.next_effect_id += 1;
        id
    })
}

pub(crate) fn active_tracking_effect() -> Option<Rc<EffectInner>> {
    Globals::with(|g| if g.should_track { g.active.clone() } else { None })
}

pub(crate) fn swap_active(new: Option<Rc<EffectInner>>) -> (Option<Rc<EffectInner>>, bool) {
    Globals::with(|g| {
        let prev_track = replace(&mut g.should_track, new.is_some());
        (replace(&mut g.active, new), prev_track)
    })
}

pub(crate) fn restore_active(prev: (Option<Rc<EffectInner>>, bool)) {
    let _ = Globals::try_with(|g| {
        g.active = prev.0;
        g.should_track = prev.1;
    });
}

/// Disables dependency tracking until the returned guard is dropped.
///
/// Pauses nest: each guard restores the state that was current when it was
/// created.
#[must_use]
pub fn pause_tracking() -> TrackingGuard {
    TrackingGuard::new(false)
}

/// Force-enables dependency tracking until the returned guard is dropped.
#[must_use]
pub fn enable_tracking() -> TrackingGuard {
    TrackingGuard::new(true)
}

/// Runs `f` with dependency tracking disabled.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let _guard = pause_tracking();
    f()
}

pub struct TrackingGuard(());

impl TrackingGuard {
    fn new(enabled: bool) -> Self {
        Globals::with(|g| {
            let prev = replace(&mut g.should_track, enabled);
            g.track_stack.push(prev);
        });
        TrackingGuard(())
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        let _ = Globals::try_with(|g| {
            if let Some(prev) = g.track_stack.pop() {
                g.should_track = prev;
            }
        });
    }
}

/// Pauses scheduler dispatch until the returned guard is dropped.
///
/// Re-run requests issued while any pause is held accumulate in a FIFO
/// queue; the queue drains when the outermost guard is released, so all
/// mutations within one paused region collapse into a single flush.
#[must_use]
pub fn pause_scheduling() -> SchedulingGuard {
    Globals::with(|g| g.scheduling_pause += 1);
    SchedulingGuard(())
}

/// Runs `f` as a single batch: schedulers fire at most once after `f`
/// returns.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    let _guard = pause_scheduling();
    f()
}

pub struct SchedulingGuard(());

impl Drop for SchedulingGuard {
    fn drop(&mut self) {
        let flush_now = Globals::try_with(|g| {
            g.scheduling_pause -= 1;
            g.scheduling_pause == 0
        });
        if matches!(flush_now, Ok(true)) {
            flush();
        }
    }
}

pub(crate) fn enqueue(job: Job) {
    let flush_now = Globals::with(|g| {
        g.queue.push_back(job);
        g.scheduling_pause == 0
    });
    if flush_now {
        flush();
    }
}

/// Drains the scheduler queue strictly FIFO. Jobs enqueued by a draining
/// job are appended and picked up by the same loop; a drain already in
/// progress is never entered twice.
fn flush() {
    let entered = Globals::with(|g| {
        if g.flushing {
            false
        } else {
            g.flushing = true;
            true
        }
    });
    if !entered {
        return;
    }
    let _done = FlushGuard;
    loop {
        let job = Globals::with(|g| {
            if g.scheduling_pause == 0 {
                g.queue.pop_front()
            } else {
                None
            }
        });
        match job {
            Some(job) => job.invoke(),
            None => break,
        }
    }
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let _ = Globals::try_with(|g| g.flushing = false);
    }
}

/// Key of one observable unit within a raw target.
#[derive(Debug, Display, Clone, Eq, PartialEq, Hash)]
pub enum DepKey {
    /// A named property of a map.
    #[display("{0}")]
    Prop(Rc<str>),
    /// An element of a list.
    #[display("[{0}]")]
    Index(usize),
    /// Length of a list; also its iteration dependency, since adding or
    /// removing elements changes length.
    #[display("length")]
    Length,
    /// Iteration over a map's keys.
    #[display("iterate")]
    Iterate,
}

struct TargetEntry {
    alive: WeakTarget,
    deps: IndexMap<DepKey, Dep>,
}

/// Registers a read of `(target, key)` for the active effect.
///
/// Looks up (creating on demand) the dep in the registry and subscribes the
/// active effect. No-op when no effect is active or tracking is paused.
pub(crate) fn track_target(target: &RawTarget, key: DepKey) {
    let Some(effect) = active_tracking_effect() else {
        return;
    };
    let dep = registry_dep(target, key);
    dep.track(&effect);
}

fn registry_dep(target: &RawTarget, key: DepKey) -> Dep {
    let ptr = target.ptr_id();
    REGISTRY.with(|r| {
        let mut r = r.borrow_mut();
        let entry = r.entry(ptr).or_insert_with(|| TargetEntry {
            alive: target.downgrade(),
            deps: IndexMap::new(),
        });
        if !entry.alive.matches(ptr) {
            // the address was reused by a new allocation; never resurrect
            // deps of the dead target
            *entry = TargetEntry {
                alive: target.downgrade(),
                deps: IndexMap::new(),
            };
        }
        entry
            .deps
            .entry(key.clone())
            .or_insert_with(|| {
                let dep = Dep::new(Some(key.clone()));
                dep.set_on_empty(move || {
                    REGISTRY.with(|r| {
                        let mut r = r.borrow_mut();
                        if let Some(entry) = r.get_mut(&ptr) {
                            entry.deps.shift_remove(&key);
                            if entry.deps.is_empty() {
                                r.remove(&ptr);
                            }
                        }
                    });
                });
                dep
            })
            .clone()
    })
}

/// Reports a mutation of `(target, key)` and invalidates subscribers.
///
/// Kinds that change the container's shape also invalidate the synthetic
/// iteration dependency (`Length` for lists, `Iterate` for maps).
pub(crate) fn trigger_target(target: &RawTarget, key: Option<DepKey>, kind: TriggerKind) {
    let ptr = target.ptr_id();
    let deps: Vec<Dep> = REGISTRY.with(|r| {
        let r = r.borrow();
        let Some(entry) = r.get(&ptr) else {
            return Vec::new();
        };
        if kind == TriggerKind::Clear {
            return entry.deps.values().cloned().collect();
        }
        let mut deps = Vec::new();
        if let Some(key) = &key {
            if let Some(dep) = entry.deps.get(key) {
                deps.push(dep.clone());
            }
        }
        if kind.affects_iteration() {
            let iterate = if target.is_list() {
                DepKey::Length
            } else {
                DepKey::Iterate
            };
            if key.as_ref() != Some(&iterate) {
                if let Some(dep) = entry.deps.get(&iterate) {
                    deps.push(dep.clone());
                }
            }
        }
        deps
    });
    if deps.is_empty() {
        return;
    }
    let _batch = pause_scheduling();
    for dep in &deps {
        trigger_effects(dep, Dirty::Dirty);
    }
}
