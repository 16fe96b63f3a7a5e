use std::rc::Rc;

use assert_call::{call, CallRecorder};
use remut::{
    batch, computed, effect, effect_scope, effect_with, reactive, EffectOptions, RawMap, RefBox,
    Value, View,
};

fn view(v: Value) -> View {
    match v {
        Value::View(v) => v,
        other => panic!("expected view, found {other:?}"),
    }
}

#[test]
fn state_flows_through_computed_into_effect() {
    let mut cr = CallRecorder::new();
    let m: RawMap = [("first", "Ada"), ("last", "Lovelace")].into_iter().collect();
    let person = view(reactive(m));
    let p = person.clone();
    let full = computed(move || {
        format!(
            "{} {}",
            p.get("first").as_str().unwrap_or(""),
            p.get("last").as_str().unwrap_or("")
        )
    });
    let _e = effect(move || {
        call!("{}", full.get());
    });
    cr.verify("Ada Lovelace");

    person.set("first", "Alan");
    cr.verify("Alan Lovelace");

    // both halves change, one recomputation, one re-run
    batch(|| {
        person.set("first", "Grace");
        person.set("last", "Hopper");
    });
    cr.verify("Grace Hopper");
}

#[test]
fn queue_preserves_trigger_order_across_sources() {
    let mut cr = CallRecorder::new();
    let a = RefBox::new(0);
    let b = RefBox::new(0);
    let a0 = a.clone();
    let _e1 = effect(move || {
        call!("a:{:?}", a0.get());
    });
    let b0 = b.clone();
    let _e2 = effect(move || {
        call!("b:{:?}", b0.get());
    });
    cr.verify(["a:0", "b:0"]);

    // queued while paused, drained in the order the mutations happened
    batch(|| {
        b.set(1);
        a.set(1);
    });
    cr.verify(["b:1", "a:1"]);
}

#[test]
fn nested_batches_flush_once_at_the_outermost() {
    let mut cr = CallRecorder::new();
    let v = RefBox::new(0);
    let v0 = v.clone();
    let _e = effect(move || {
        call!("{:?}", v0.get());
    });
    cr.verify("0");

    batch(|| {
        v.set(1);
        batch(|| {
            v.set(2);
        });
        // the inner batch ended but the outer pause still holds
        cr.verify(());
        v.set(3);
    });
    cr.verify("3");
}

#[test]
fn effect_triggered_while_running_reruns_after() {
    let mut cr = CallRecorder::new();
    let trigger = RefBox::new(0);
    let other = RefBox::new(0);
    let (t0, o0) = (trigger.clone(), other.clone());
    let _e1 = effect(move || {
        call!("writer:{:?}", t0.get());
        o0.set(t0.peek());
    });
    let o1 = other.clone();
    let _e2 = effect(move || {
        call!("reader:{:?}", o1.get());
    });
    cr.verify(["writer:0", "reader:0"]);

    // writer runs, its write to `other` queues the reader behind it
    trigger.set(1);
    cr.verify(["writer:1", "reader:1"]);
}

#[test]
fn computed_side_effect_defers_subscribers() {
    let mut cr = CallRecorder::new();
    let counter = RefBox::new(0);
    let plain = RefBox::new(0);
    let c0 = counter.clone();
    // a getter that bumps its own dependency: the result is tentative,
    // so subscribers must not spin on it
    let c = computed(move || {
        let n = c0.get().as_int().unwrap();
        c0.set(n + 1);
        "fixed"
    });
    let p0 = plain.clone();
    let _e = effect(move || {
        call!("run");
        c.get();
        p0.get();
    });
    cr.verify("run");

    // an unrelated change still reaches the effect
    plain.set(1);
    cr.verify("run");
    cr.verify(());
}

#[test]
fn scope_tears_down_a_whole_feature() {
    let mut cr = CallRecorder::new();
    let m: RawMap = [("count", 0)].into_iter().collect();
    let state = view(reactive(m));
    let scope = effect_scope();
    let s = state.clone();
    scope.run(move || {
        let s0 = s.clone();
        let doubled = computed(move || s0.get("count").as_int().unwrap() * 2);
        effect(move || {
            call!("doubled:{}", doubled.get());
        });
        let s1 = s.clone();
        effect(move || {
            call!("count:{:?}", s1.get("count"));
        });
    });
    cr.verify(["doubled:0", "count:0"]);

    state.set("count", 1);
    cr.verify(["doubled:2", "count:1"]);

    scope.stop();
    state.set("count", 2);
    cr.verify(());
}

#[test]
fn custom_scheduler_batches_manual_flushes() {
    let mut cr = CallRecorder::new();
    let v = RefBox::new(0);
    let pending: Rc<std::cell::RefCell<Vec<remut::Effect>>> = Default::default();
    let v0 = v.clone();
    let e = effect_with(
        move || {
            call!("{:?}", v0.get());
        },
        EffectOptions {
            scheduler: Some(Rc::new(|| call!("queued"))),
            ..Default::default()
        },
    );
    pending.borrow_mut().push(e.clone());
    cr.verify("0");

    v.set(1);
    cr.verify("queued");
    v.set(2);
    cr.verify(());

    // a manual flush pass, the way a UI frame would do it
    for e in pending.borrow().iter() {
        if e.is_dirty() {
            e.run();
        }
    }
    cr.verify("2");
}
