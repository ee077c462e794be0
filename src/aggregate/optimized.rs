use std::cell::RefCell;
use std::rc::Rc;

use crate::aggregate::AggregateTransient;
use crate::{Activity, SnapshotChanged, Transient, Untrack};

/// An aggregate that only re-checks the members which reported activity.
///
/// Every member is tracked until [`OptimizedAggregate::release`]. When a
/// member reports activity it is untracked and queued as "may have changed".
/// The snapshot probe then drains that queue, re-tracking each member before
/// checking it, and stops at the first real change. The common case of a
/// single pinged dependency costs one check instead of one per member.
///
/// Protocol: one snapshot per instance, the snapshot comes before any
/// listener, one listener armed at a time, and once tracked the probe may run
/// only once per activity notification. Breaking it panics.
#[derive(Clone)]
pub struct OptimizedAggregate {
	inner: Rc<RefCell<Inner>>,
}

struct Inner {
	list: Vec<Rc<dyn Transient>>,
	snapshots: Vec<SnapshotChanged>,
	untracks: Vec<Option<Untrack>>,
	may_have_changed: Vec<usize>,
	listener_id: u64,
	listener: Option<Activity>,
	snapshot_taken: bool,
	activity_tracked: bool,
	changed_allowed: bool,
}

impl OptimizedAggregate {
	pub fn new(list: Vec<Rc<dyn Transient>>) -> Self {
		let untracks = list.iter().map(|_| None).collect();
		OptimizedAggregate {
			inner: Rc::new(RefCell::new(Inner {
				list,
				snapshots: Vec::new(),
				untracks,
				may_have_changed: Vec::new(),
				listener_id: 0,
				listener: None,
				snapshot_taken: false,
				activity_tracked: false,
				changed_allowed: false,
			})),
		}
	}

	pub fn len(&self) -> usize {
		self.inner.borrow().list.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Stops tracking every member. Safe to call any number of times.
	pub fn release(&self) {
		let untracks: Vec<Option<Untrack>> = {
			let mut inner = self.inner.borrow_mut();
			if !inner.activity_tracked {
				return;
			}
			inner.activity_tracked = false;
			inner.changed_allowed = false;
			inner.listener = None;
			inner.may_have_changed.clear();
			inner.untracks.iter_mut().map(Option::take).collect()
		};
		drop(untracks);
	}

	fn track_once(inner: &Rc<RefCell<Inner>>, index: usize) {
		let transient = inner.borrow().list[index].clone();
		let weak = Rc::downgrade(inner);
		let untrack = transient.track_activity(Rc::new(move || {
			if let Some(inner) = weak.upgrade() {
				Self::on_activity(&inner, index);
			}
		}));
		let previous = inner.borrow_mut().untracks[index].replace(untrack);
		drop(previous);
	}

	fn untrack(inner: &Rc<RefCell<Inner>>, index: usize) {
		let untrack = inner.borrow_mut().untracks[index].take();
		drop(untrack);
	}

	fn track_all(inner: &Rc<RefCell<Inner>>) {
		let len = {
			let mut inner = inner.borrow_mut();
			if inner.activity_tracked {
				return;
			}
			inner.activity_tracked = true;
			inner.list.len()
		};
		for index in 0..len {
			Self::track_once(inner, index);
		}
	}

	fn on_activity(inner: &Rc<RefCell<Inner>>, index: usize) {
		inner.borrow_mut().may_have_changed.push(index);
		Self::untrack(inner, index);

		let listener = {
			let mut inner = inner.borrow_mut();
			let listener = inner.listener.take();
			if listener.is_some() {
				inner.changed_allowed = true;
			}
			listener
		};

		if let Some(listener) = listener {
			listener()
		}
	}

	fn changed(inner: &Rc<RefCell<Inner>>) -> bool {
		let tracked = inner.borrow().activity_tracked;

		if !tracked {
			let snapshots = inner.borrow().snapshots.clone();
			return snapshots.iter().any(|changed| changed());
		}

		{
			let mut inner = inner.borrow_mut();
			if !inner.changed_allowed {
				panic!("`changed` already called, or called before any activity was detected");
			}
			inner.changed_allowed = false;
		}

		loop {
			let next = inner.borrow_mut().may_have_changed.pop();
			let Some(index) = next else {
				return false;
			};
			Self::track_once(inner, index);
			let changed = inner.borrow().snapshots[index].clone();
			if changed() {
				return true;
			}
		}
	}
}

impl AggregateTransient for OptimizedAggregate {
	fn take_snapshot(&self) -> SnapshotChanged {
		let list = {
			let mut inner = self.inner.borrow_mut();
			if inner.snapshot_taken {
				panic!("only one snapshot may be taken");
			}
			inner.snapshot_taken = true;
			inner.list.clone()
		};

		let snapshots = list
			.iter()
			.map(|transient| transient.take_snapshot())
			.collect();
		self.inner.borrow_mut().snapshots = snapshots;

		let inner = self.inner.clone();
		Rc::new(move || Self::changed(&inner))
	}

	fn track_activity(&self, on_activity: Activity) -> Untrack {
		{
			let inner = self.inner.borrow();
			if !inner.snapshot_taken {
				panic!("a snapshot must be taken before tracking activity");
			}
			if inner.listener.is_some() {
				panic!("an activity listener is already set");
			}
		}

		Self::track_all(&self.inner);

		let id = {
			let mut inner = self.inner.borrow_mut();
			inner.listener_id += 1;
			inner.listener = Some(on_activity);
			inner.listener_id
		};

		let weak = Rc::downgrade(&self.inner);
		Untrack::new(move || {
			if let Some(inner) = weak.upgrade() {
				let listener = {
					let mut inner = inner.borrow_mut();
					if inner.listener_id == id {
						inner.listener.take()
					} else {
						None
					}
				};
				drop(listener);
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use super::*;
	use crate::WritableSignal;

	struct Counted {
		signal: WritableSignal<i32>,
		checks: Rc<Cell<usize>>,
	}

	/// A member that counts how often its probe is called.
	impl Transient for Counted {
		fn take_snapshot(&self) -> SnapshotChanged {
			let changed = self.signal.take_snapshot();
			let checks = self.checks.clone();
			Rc::new(move || {
				checks.set(checks.get() + 1);
				changed()
			})
		}

		fn track_activity(&self, on_activity: Activity) -> Untrack {
			self.signal.track_activity(on_activity)
		}

		fn capture(&self) {}
	}

	fn members(count: usize) -> (Vec<WritableSignal<i32>>, Vec<Rc<Cell<usize>>>, OptimizedAggregate) {
		let signals: Vec<_> = (0..count).map(|i| WritableSignal::new(i as i32)).collect();
		let checks: Vec<_> = (0..count).map(|_| Rc::new(Cell::new(0))).collect();
		let list = signals
			.iter()
			.zip(&checks)
			.map(|(signal, checks)| {
				Rc::new(Counted {
					signal: signal.clone(),
					checks: checks.clone(),
				}) as Rc<dyn Transient>
			})
			.collect();
		(signals, checks, OptimizedAggregate::new(list))
	}

	fn counter() -> (Rc<Cell<usize>>, Activity) {
		let count = Rc::new(Cell::new(0));
		let activity: Activity = {
			let count = count.clone();
			Rc::new(move || count.set(count.get() + 1))
		};
		(count, activity)
	}

	#[test]
	fn probe_only_checks_members_with_activity() {
		let (signals, checks, aggregate) = members(4);
		let changed = aggregate.take_snapshot();
		let (notified, activity) = counter();
		let _untrack = aggregate.track_activity(activity);

		signals[2].set(20).unwrap();
		assert_eq!(notified.get(), 1);

		assert!(changed());
		assert_eq!(checks[2].get(), 1);
		assert_eq!(checks[0].get() + checks[1].get() + checks[3].get(), 0);
	}

	#[test]
	fn listener_is_called_once_until_rearmed() {
		let (signals, _, aggregate) = members(2);
		let changed = aggregate.take_snapshot();
		let (notified, activity) = counter();
		let _untrack = aggregate.track_activity(activity.clone());

		signals[0].set(10).unwrap();
		signals[1].set(11).unwrap();
		signals[0].set(12).unwrap();
		assert_eq!(notified.get(), 1);

		assert!(changed());

		let _untrack = aggregate.track_activity(activity);
		signals[1].set(13).unwrap();
		assert_eq!(notified.get(), 2);
	}

	#[test]
	fn value_returning_to_origin_is_not_a_change() {
		let (signals, _, aggregate) = members(2);
		let changed = aggregate.take_snapshot();
		let (_, activity) = counter();
		let _untrack = aggregate.track_activity(activity);

		signals[1].set(5).unwrap();
		signals[1].set(1).unwrap();

		assert!(!changed());
	}

	#[test]
	fn untracked_aggregate_checks_every_member() {
		let (signals, checks, aggregate) = members(3);
		let changed = aggregate.take_snapshot();

		assert!(!changed());
		assert!(!changed());
		assert!(checks.iter().all(|checks| checks.get() == 2));

		signals[0].set(7).unwrap();
		assert!(changed());
	}

	#[test]
	fn release_stops_tracking_and_falls_back() {
		let (signals, _, aggregate) = members(2);
		let changed = aggregate.take_snapshot();
		let (notified, activity) = counter();
		let _untrack = aggregate.track_activity(activity);

		aggregate.release();
		aggregate.release();
		signals[0].set(9).unwrap();

		assert_eq!(notified.get(), 0);
		assert!(changed());
	}

	#[test]
	fn untrack_disarms_the_listener() {
		let (signals, _, aggregate) = members(1);
		let _changed = aggregate.take_snapshot();
		let (notified, activity) = counter();

		aggregate.track_activity(activity.clone()).untrack();
		signals[0].set(3).unwrap();
		assert_eq!(notified.get(), 0);

		// arming again is allowed once disarmed
		let _untrack = aggregate.track_activity(activity);
	}

	#[test]
	#[should_panic(expected = "only one snapshot")]
	fn second_snapshot_panics() {
		let (_, _, aggregate) = members(1);
		let _changed = aggregate.take_snapshot();
		let _changed = aggregate.take_snapshot();
	}

	#[test]
	#[should_panic(expected = "snapshot must be taken")]
	fn tracking_before_snapshot_panics() {
		let (_, _, aggregate) = members(1);
		let (_, activity) = counter();
		let _untrack = aggregate.track_activity(activity);
	}

	#[test]
	#[should_panic(expected = "already set")]
	fn double_arming_panics() {
		let (_, _, aggregate) = members(1);
		let _changed = aggregate.take_snapshot();
		let (_, activity) = counter();
		let _first = aggregate.track_activity(activity.clone());
		let _second = aggregate.track_activity(activity);
	}

	#[test]
	#[should_panic(expected = "before any activity")]
	fn probing_before_activity_panics() {
		let (_, _, aggregate) = members(1);
		let changed = aggregate.take_snapshot();
		let (_, activity) = counter();
		let _untrack = aggregate.track_activity(activity);
		changed();
	}

	#[test]
	#[should_panic(expected = "already called")]
	fn probing_twice_panics() {
		let (signals, _, aggregate) = members(1);
		let changed = aggregate.take_snapshot();
		let (_, activity) = counter();
		let _untrack = aggregate.track_activity(activity);
		signals[0].set(4).unwrap();
		changed();
		changed();
	}
}
