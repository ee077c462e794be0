mod basic;
mod optimized;

pub use basic::BasicAggregate;
pub use optimized::OptimizedAggregate;

use crate::{Activity, SnapshotChanged, Untrack};

/// Combines the snapshot and activity of several nodes into one unit,
/// used for a single run of a derivation or an effect.
pub trait AggregateTransient {
	fn take_snapshot(&self) -> SnapshotChanged;

	fn track_activity(&self, on_activity: Activity) -> Untrack;
}
