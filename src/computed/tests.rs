use std::cell::RefCell;
use std::rc::Rc;

use assert_call::{call, CallRecorder};

use crate::{batch, computed, effect, Computed, RefBox};

#[test]
fn lazy_until_first_read() {
    let mut cr = CallRecorder::new();
    let a = RefBox::new(1);
    let c = computed(move || {
        call!("compute");
        a.get().as_int().unwrap() * 2
    });
    cr.verify(());

    assert_eq!(c.get(), 2);
    cr.verify("compute");

    // cached: a second read does not recompute
    assert_eq!(c.get(), 2);
    cr.verify(());
}

#[test]
fn recomputes_after_source_change() {
    let mut cr = CallRecorder::new();
    let a = RefBox::new(1);
    let a0 = a.clone();
    let c = computed(move || {
        call!("compute");
        a0.get().as_int().unwrap() * 2
    });
    assert_eq!(c.get(), 2);
    cr.verify("compute");

    a.set(5);
    // invalidation alone does not recompute
    cr.verify(());
    assert!(c.is_dirty());

    assert_eq!(c.get(), 10);
    cr.verify("compute");
}

#[test]
fn effect_over_computed() {
    let mut cr = CallRecorder::new();
    let a = RefBox::new(1);
    let a0 = a.clone();
    let c = computed(move || a0.get().as_int().unwrap() * 2);
    let _e = effect(move || {
        call!("{}", c.get());
    });
    cr.verify("2");

    a.set(3);
    cr.verify("6");
}

#[test]
fn equal_result_cuts_off_downstream() {
    let mut cr = CallRecorder::new();
    let a = RefBox::new(1);
    let a0 = a.clone();
    let positive = computed(move || a0.get().as_int().unwrap() > 0);
    let _e = effect(move || {
        call!("{}", positive.get());
    });
    cr.verify("true");

    // the source changed but the derived value did not
    a.set(2);
    cr.verify(());

    a.set(-1);
    cr.verify("false");
}

#[test]
fn chain_propagates() {
    let mut cr = CallRecorder::new();
    let a = RefBox::new(1);
    let a0 = a.clone();
    let c1 = computed(move || a0.get().as_int().unwrap() + 1);
    let c2 = computed(move || c1.get() + 1);
    let _e = effect(move || {
        call!("{}", c2.get());
    });
    cr.verify("3");

    a.set(10);
    cr.verify("12");
}

#[test]
fn diamond_runs_once() {
    let mut cr = CallRecorder::new();
    let a = RefBox::new(1);
    let (a1, a2) = (a.clone(), a.clone());
    let left = computed(move || a1.get().as_int().unwrap() + 1);
    let right = computed(move || a2.get().as_int().unwrap() * 10);
    let _e = effect(move || {
        call!("{}-{}", left.get(), right.get());
    });
    cr.verify("2-10");

    a.set(2);
    cr.verify("3-20");
}

#[test]
fn batched_sources_recompute_once() {
    let mut cr = CallRecorder::new();
    let a = RefBox::new(1);
    let b = RefBox::new(2);
    let (a0, b0) = (a.clone(), b.clone());
    let sum = computed(move || {
        call!("compute");
        a0.get().as_int().unwrap() + b0.get().as_int().unwrap()
    });
    let _e = effect(move || {
        call!("{}", sum.get());
    });
    cr.verify(["compute", "3"]);

    batch(|| {
        a.set(10);
        b.set(20);
    });
    cr.verify(["compute", "30"]);
}

#[test]
fn peek_does_not_recompute() {
    let a = RefBox::new(1);
    let c = computed(move || a.get().as_int().unwrap());
    assert_eq!(c.peek(), None);
    assert_eq!(c.get(), 1);
    assert_eq!(c.peek(), Some(1));
}

#[test]
fn stop_freezes_the_cache() {
    let mut cr = CallRecorder::new();
    let a = RefBox::new(1);
    let a0 = a.clone();
    let c = computed(move || a0.get().as_int().unwrap());
    assert_eq!(c.get(), 1);
    let c0 = c.clone();
    let _e = effect(move || {
        call!("{}", c0.get());
    });
    cr.verify("1");

    c.stop();
    a.set(2);
    cr.verify(());
    assert_eq!(c.get(), 1);
}

#[test]
#[should_panic(expected = "detect cyclic dependency")]
fn self_reference_panics_on_first_read() {
    let holder: Rc<RefCell<Option<Computed<i64>>>> = Rc::new(RefCell::new(None));
    let h = holder.clone();
    let c = computed(move || {
        let this = h.borrow().clone();
        this.map(|c| c.get()).unwrap_or(0) + 1
    });
    *holder.borrow_mut() = Some(c.clone());
    c.get();
}

#[test]
fn cycle_resolves_clean() {
    // `a` starts acyclic; the edge back to `b` only appears after the
    // flag flips, so both caches are already primed when the cycle forms
    let flag = RefBox::new(false);
    let holder: Rc<RefCell<Option<Computed<i64>>>> = Rc::new(RefCell::new(None));
    let flag0 = flag.clone();
    let h = holder.clone();
    let a = computed(move || {
        if flag0.get().as_bool() == Some(true) {
            let b = h.borrow().clone();
            if let Some(b) = b {
                b.get();
            }
            1
        } else {
            0
        }
    });
    let a0 = a.clone();
    let b = computed(move || a0.get() * 10);
    *holder.borrow_mut() = Some(b.clone());

    assert_eq!(a.get(), 0);
    assert_eq!(b.get(), 0);

    flag.set(true);
    assert_eq!(b.get(), 10);
    assert_eq!(a.get(), 1);

    // stable on repeated reads
    assert_eq!(b.get(), 10);
}
