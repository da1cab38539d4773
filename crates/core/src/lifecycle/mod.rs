//! Lifecycle execution (§4.G, §4.I)
//!
//! `merger` interleaves feature-contributed hooks with user hooks into a
//! single `Merged` command per phase; `executor` dispatches any
//! `LifecycleCommand` shape against a running container, consulting the
//! state store before running and recording success after.

pub mod executor;
pub mod merger;

pub use executor::{ExecError, LifecycleExecutor};
pub use merger::merge_phase;
