use rstest::rstest;

use super::*;

#[test]
fn levels_are_ordered() {
    assert!(Dirty::Clean < Dirty::Querying);
    assert!(Dirty::Querying < Dirty::MaybeDirtyComputed);
    assert!(Dirty::MaybeDirtyComputed < Dirty::MaybeDirty);
    assert!(Dirty::MaybeDirty < Dirty::Dirty);
}

#[rstest]
fn bitor_is_max(
    #[values(
        Dirty::Clean,
        Dirty::Querying,
        Dirty::MaybeDirtyComputed,
        Dirty::MaybeDirty,
        Dirty::Dirty
    )]
    a: Dirty,
    #[values(
        Dirty::Clean,
        Dirty::Querying,
        Dirty::MaybeDirtyComputed,
        Dirty::MaybeDirty,
        Dirty::Dirty
    )]
    b: Dirty,
) {
    assert_eq!(a | b, a.max(b));
    let mut d = a;
    d |= b;
    assert_eq!(d, a.max(b));
}

#[test]
fn maybe_dirty_predicates() {
    assert!(Dirty::MaybeDirty.is_maybe_dirty());
    assert!(Dirty::MaybeDirtyComputed.is_maybe_dirty());
    assert!(!Dirty::Dirty.is_maybe_dirty());
    assert!(Dirty::Dirty.is_dirty());
    assert!(!Dirty::Querying.is_dirty());
}

#[test]
fn set_kind_does_not_affect_iteration() {
    assert!(!TriggerKind::Set.affects_iteration());
    assert!(TriggerKind::Add.affects_iteration());
    assert!(TriggerKind::Delete.affects_iteration());
    assert!(TriggerKind::Clear.affects_iteration());
}
