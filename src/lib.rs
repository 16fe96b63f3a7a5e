mod computed;
mod core;
mod dep;
mod effect;
mod reactive;
mod scope;
mod value;

pub use crate::core::dirty::{Dirty, TriggerKind};
pub use crate::core::{
    batch, enable_tracking, pause_scheduling, pause_tracking, untrack, DepKey, SchedulingGuard,
    TrackingGuard,
};
pub use computed::*;
pub use effect::*;
pub use reactive::*;
pub use scope::*;
pub use value::*;
