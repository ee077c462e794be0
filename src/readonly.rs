use std::rc::Rc;

use crate::{Activity, Signal, SnapshotChanged, Transient, Untrack, ValueOrError};

/// A read-only, type-erased view over any signal.
pub struct ReadonlySignal<T> {
	signal: Rc<dyn Signal<T>>,
}

impl<T> Clone for ReadonlySignal<T> {
	fn clone(&self) -> Self {
		ReadonlySignal {
			signal: self.signal.clone(),
		}
	}
}

impl<T: 'static> ReadonlySignal<T> {
	pub fn new(signal: Rc<dyn Signal<T>>) -> Self {
		ReadonlySignal { signal }
	}

	#[inline]
	pub fn get(&self) -> ValueOrError<T> {
		self.signal.get()
	}

	/// Returns `true` if both views read the same node.
	pub fn ptr_eq(a: &Self, b: &Self) -> bool {
		Rc::as_ptr(&a.signal) as *const () == Rc::as_ptr(&b.signal) as *const ()
	}
}

/// Views compare by the node they read, so a signal of signals
/// only changes when it is redirected to another node.
impl<T: 'static> PartialEq for ReadonlySignal<T> {
	fn eq(&self, other: &Self) -> bool {
		ReadonlySignal::ptr_eq(self, other)
	}
}

impl<T: 'static> Transient for ReadonlySignal<T> {
	fn take_snapshot(&self) -> SnapshotChanged {
		self.signal.take_snapshot()
	}

	fn track_activity(&self, on_activity: Activity) -> Untrack {
		self.signal.track_activity(on_activity)
	}

	fn capture(&self) {
		self.signal.capture()
	}
}

impl<T: 'static> Signal<T> for ReadonlySignal<T> {
	fn get(&self) -> ValueOrError<T> {
		self.signal.get()
	}
}

impl<T> std::fmt::Debug for ReadonlySignal<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReadonlySignal").finish_non_exhaustive()
	}
}
