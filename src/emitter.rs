use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::Activity;

/// An activity subscription. Dropping it (or calling [`Untrack::untrack`])
/// removes the listener.
#[must_use = "dropping an `Untrack` cancels the subscription"]
pub struct Untrack {
	undo: Option<Box<dyn FnOnce()>>,
}

impl Untrack {
	pub fn new(undo: impl FnOnce() + 'static) -> Self {
		Untrack {
			undo: Some(Box::new(undo)),
		}
	}

	/// A subscription with nothing to undo.
	pub fn noop() -> Self {
		Untrack { undo: None }
	}

	pub fn untrack(self) {
		drop(self)
	}
}

impl Drop for Untrack {
	fn drop(&mut self) {
		if let Some(undo) = self.undo.take() {
			undo()
		}
	}
}

impl fmt::Debug for Untrack {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Untrack")
			.field("active", &self.undo.is_some())
			.finish()
	}
}

/// Dispatches activity to listeners in subscription order.
#[derive(Default)]
pub(crate) struct Emitter {
	next_id: Cell<u64>,
	listeners: RefCell<BTreeMap<u64, Activity>>,
}

impl Emitter {
	pub fn new() -> Rc<Self> {
		Rc::new(Emitter::default())
	}

	pub fn listen(self: &Rc<Self>, listener: Activity) -> Untrack {
		let id = self.next_id.get();
		self.next_id.set(id + 1);
		self.listeners.borrow_mut().insert(id, listener);

		let this: Weak<Emitter> = Rc::downgrade(self);
		Untrack::new(move || {
			if let Some(this) = this.upgrade() {
				let removed = this.listeners.borrow_mut().remove(&id);
				drop(removed);
			}
		})
	}

	pub fn dispatch(&self) {
		let listeners: SmallVec<[(u64, Activity); 4]> = self
			.listeners
			.borrow()
			.iter()
			.map(|(id, listener)| (*id, listener.clone()))
			.collect();

		for (id, listener) in listeners {
			// a previous listener may have unsubscribed this one
			if self.listeners.borrow().contains_key(&id) {
				listener()
			}
		}
	}

	pub fn len(&self) -> usize {
		self.listeners.borrow().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn listeners_are_called_until_untracked() {
		let emitter = Emitter::new();
		let count = Rc::new(Cell::new(0));

		let untrack = emitter.listen({
			let count = count.clone();
			Rc::new(move || count.set(count.get() + 1))
		});

		emitter.dispatch();
		assert_eq!(count.get(), 1);
		assert_eq!(emitter.len(), 1);

		untrack.untrack();
		emitter.dispatch();
		assert_eq!(count.get(), 1);
		assert_eq!(emitter.len(), 0);
	}

	#[test]
	fn listener_removed_during_dispatch_is_skipped() {
		let emitter = Emitter::new();
		let second: Rc<RefCell<Option<Untrack>>> = Rc::new(RefCell::new(None));
		let called = Rc::new(Cell::new(false));

		let _first = emitter.listen({
			let second = second.clone();
			Rc::new(move || drop(second.borrow_mut().take()))
		});
		*second.borrow_mut() = Some(emitter.listen({
			let called = called.clone();
			Rc::new(move || called.set(true))
		}));

		emitter.dispatch();
		assert!(!called.get());
	}
}
