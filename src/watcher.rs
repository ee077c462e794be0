use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::aggregate::{AggregateTransient, BasicAggregate};
use crate::context;
use crate::effect::{Cleanup, EffectOutput};
use crate::emitter::Untrack;
use crate::scheduler;
use crate::{ReadonlySignal, SignalError, SnapshotChanged, Transient, ValueOrError};

/// Calls back with the value (or error) of one signal, now and whenever it
/// changes.
///
/// Unlike an [`Effect`](crate::Effect), only the watched signal is observed:
/// reads made by the callback are not tracked. Writing to a signal from the
/// callback is refused, as it is from a formula.
#[must_use = "dropping a `SignalWatcher` stops it"]
pub struct SignalWatcher<T> {
	body: Rc<WatcherBody<T>>,
}

struct WatcherBody<T> {
	signal: ReadonlySignal<T>,
	aggregate: BasicAggregate,
	func: RefCell<Box<dyn FnMut(ValueOrError<T>) -> Option<Cleanup>>>,
	cleanup: RefCell<Option<Cleanup>>,
	snapshot_changed: RefCell<Option<SnapshotChanged>>,
	untrack_activity: RefCell<Option<Untrack>>,
	activity_scheduled: Cell<bool>,
	disposed: Cell<bool>,
	this: Weak<WatcherBody<T>>,
}

impl<T> SignalWatcher<T>
where
	T: Clone + 'static,
{
	pub fn new<S, F, R>(signal: S, mut func: F) -> Result<Self, SignalError>
	where
		S: Into<ReadonlySignal<T>>,
		F: FnMut(ValueOrError<T>) -> R + 'static,
		R: EffectOutput,
	{
		if context::is_in_context() {
			return Err(SignalError::ScopeInContext("a signal watcher"));
		}

		let signal = signal.into();
		let aggregate = BasicAggregate::new(vec![Rc::new(signal.clone()) as Rc<dyn Transient>]);

		let watcher = SignalWatcher {
			body: Rc::new_cyclic(|this| WatcherBody {
				signal,
				aggregate,
				func: RefCell::new(Box::new(move |value| func(value).into_cleanup())),
				cleanup: RefCell::new(None),
				snapshot_changed: RefCell::new(None),
				untrack_activity: RefCell::new(None),
				activity_scheduled: Cell::new(false),
				disposed: Cell::new(false),
				this: this.clone(),
			}),
		};
		watcher.body.track_activity();
		watcher.body.update();
		Ok(watcher)
	}

	/// Splits the callback into a value branch and an error branch.
	pub fn watch<S, V, E, R, Q>(signal: S, mut on_value: V, mut on_error: E) -> Result<Self, SignalError>
	where
		S: Into<ReadonlySignal<T>>,
		V: FnMut(T) -> R + 'static,
		E: FnMut(SignalError) -> Q + 'static,
		R: EffectOutput,
		Q: EffectOutput,
	{
		Self::new(signal, move |value| match value {
			Ok(value) => on_value(value).into_cleanup(),
			Err(error) => on_error(error).into_cleanup(),
		})
	}

	/// Watches values only; errors are logged.
	pub fn watch_value<S, V, R>(signal: S, on_value: V) -> Result<Self, SignalError>
	where
		S: Into<ReadonlySignal<T>>,
		V: FnMut(T) -> R + 'static,
		R: EffectOutput,
	{
		Self::watch(signal, on_value, |error| {
			tracing::error!(%error, "watched signal failed");
		})
	}

	pub fn signal(&self) -> &ReadonlySignal<T> {
		&self.body.signal
	}

	/// Stops watching and runs the last cleanup. Idempotent.
	pub fn stop(&self) {
		self.body.stop()
	}

	pub fn is_stopped(&self) -> bool {
		self.body.disposed.get()
	}
}

impl<T> WatcherBody<T> {
	fn do_cleanup(&self) {
		let cleanup = self.cleanup.borrow_mut().take();
		if let Some(cleanup) = cleanup {
			cleanup.run()
		}
	}

	fn stop(&self) {
		if self.disposed.replace(true) {
			return;
		}
		let untrack = self.untrack_activity.borrow_mut().take();
		drop(untrack);
		self.do_cleanup();
	}
}

impl<T: Clone + 'static> WatcherBody<T> {
	fn track_activity(&self) {
		let this = self.this.clone();
		let untrack = self.aggregate.track_activity(Rc::new(move || {
			if let Some(this) = this.upgrade() {
				this.on_activity();
			}
		}));
		let previous = self.untrack_activity.borrow_mut().replace(untrack);
		drop(previous);
	}

	fn on_activity(&self) {
		if self.activity_scheduled.replace(true) {
			return;
		}

		let this = self.this.clone();
		scheduler::queue_microtask(move || {
			if let Some(this) = this.upgrade() {
				this.check();
			}
		});
	}

	fn check(&self) {
		self.activity_scheduled.set(false);
		if self.disposed.get() {
			return;
		}

		let snapshot_changed = self.snapshot_changed.borrow().clone();
		if snapshot_changed.map_or(true, |changed| changed()) {
			tracing::trace!("signal watcher notified");
			self.update();
		}
	}

	fn update(&self) {
		self.do_cleanup();

		let value = context::run_outside_context(|| self.signal.get());
		let snapshot_changed = self.aggregate.take_snapshot();
		*self.snapshot_changed.borrow_mut() = Some(snapshot_changed);

		let cleanup = context::run_in_discarding_context(|| {
			let mut func = self.func.borrow_mut();
			(*func)(value)
		});
		*self.cleanup.borrow_mut() = cleanup;
	}
}

impl<T> Drop for SignalWatcher<T> {
	fn drop(&mut self) {
		self.body.stop()
	}
}

impl<T> fmt::Debug for SignalWatcher<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SignalWatcher")
			.field("signal", &self.body.signal)
			.field("stopped", &self.body.disposed.get())
			.finish()
	}
}
