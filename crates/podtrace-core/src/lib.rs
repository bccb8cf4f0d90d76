//! Core data model for podtrace: the `key=value` selector language shared
//! by the cluster and host resolution layers, the resolved trace target
//! both layers hand around, and the tracer kinds a job can execute.

pub mod selector;
pub mod target;
pub mod tracer;

pub use selector::{PID_LAST, ProcessSelector, Selector, SelectorError, TargetSelector};
pub use target::{TraceTarget, strip_runtime_prefix};
pub use tracer::{Tracer, UnknownTracer};
