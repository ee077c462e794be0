use std::rc::Rc;

use smallvec::SmallVec;

use crate::aggregate::AggregateTransient;
use crate::{Activity, SnapshotChanged, Transient, Untrack};

/// Checks and tracks every member, every time.
pub struct BasicAggregate {
	list: Vec<Rc<dyn Transient>>,
}

impl BasicAggregate {
	pub fn new(list: Vec<Rc<dyn Transient>>) -> Self {
		BasicAggregate { list }
	}
}

impl AggregateTransient for BasicAggregate {
	fn take_snapshot(&self) -> SnapshotChanged {
		let snapshots: Vec<SnapshotChanged> = self
			.list
			.iter()
			.map(|transient| transient.take_snapshot())
			.collect();

		Rc::new(move || snapshots.iter().any(|changed| changed()))
	}

	fn track_activity(&self, on_activity: Activity) -> Untrack {
		let untracks: SmallVec<[Untrack; 2]> = self
			.list
			.iter()
			.map(|transient| transient.track_activity(on_activity.clone()))
			.collect();

		Untrack::new(move || drop(untracks))
	}
}
