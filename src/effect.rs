use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::aggregate::{AggregateTransient, OptimizedAggregate};
use crate::context;
use crate::emitter::Untrack;
use crate::evaluation::Evaluation;
use crate::scheduler;
use crate::{SignalError, SnapshotChanged};

/// Undoes what the previous run of an effect or watcher did.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
	pub fn new(func: impl FnOnce() + 'static) -> Self {
		Cleanup(Box::new(func))
	}

	pub(crate) fn run(self) {
		context::run_outside_context(self.0)
	}
}

impl fmt::Debug for Cleanup {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Cleanup")
	}
}

/// What an effect or watcher callback may return.
pub trait EffectOutput {
	fn into_cleanup(self) -> Option<Cleanup>;
}

impl EffectOutput for () {
	fn into_cleanup(self) -> Option<Cleanup> {
		None
	}
}

impl EffectOutput for Cleanup {
	fn into_cleanup(self) -> Option<Cleanup> {
		Some(self)
	}
}

impl EffectOutput for Option<Cleanup> {
	fn into_cleanup(self) -> Option<Cleanup> {
		self
	}
}

/// A failed run has nothing to clean up; the error is logged.
impl<O: EffectOutput> EffectOutput for Result<O, SignalError> {
	fn into_cleanup(self) -> Option<Cleanup> {
		match self {
			Ok(output) => output.into_cleanup(),
			Err(error) => {
				tracing::error!(%error, "effect failed");
				None
			}
		}
	}
}

/// Runs a side effect now, and again after every change of what it read.
///
/// Re-runs are deferred to the next [`scheduler::flush`], so several writes
/// in a row cause at most one re-run, and writes that cancel out cause none.
/// Dropping the handle stops the effect.
#[must_use = "dropping an `Effect` stops it"]
pub struct Effect {
	body: Rc<EffectBody>,
}

struct EffectBody {
	func: RefCell<Box<dyn FnMut() -> Option<Cleanup>>>,
	cleanup: RefCell<Option<Cleanup>>,
	aggregate: RefCell<Option<OptimizedAggregate>>,
	snapshot_changed: RefCell<Option<SnapshotChanged>>,
	untrack_activity: RefCell<Option<Untrack>>,
	this: Weak<EffectBody>,
}

impl Effect {
	/// Creates the effect and runs it once.
	///
	/// Fails with [`SignalError::ScopeInContext`] when called from inside
	/// a formula or another effect.
	pub fn new<F, R>(mut func: F) -> Result<Self, SignalError>
	where
		F: FnMut() -> R + 'static,
		R: EffectOutput,
	{
		if context::is_in_context() {
			return Err(SignalError::ScopeInContext("an effect"));
		}

		let effect = Effect {
			body: Rc::new_cyclic(|this| EffectBody {
				func: RefCell::new(Box::new(move || func().into_cleanup())),
				cleanup: RefCell::new(None),
				aggregate: RefCell::new(None),
				snapshot_changed: RefCell::new(None),
				untrack_activity: RefCell::new(None),
				this: this.clone(),
			}),
		};
		effect.body.update();
		Ok(effect)
	}

	/// Stops reacting and runs the last cleanup. Idempotent.
	pub fn stop(&self) {
		self.body.stop()
	}

	pub fn is_stopped(&self) -> bool {
		self.body.aggregate.borrow().is_none()
	}
}

impl EffectBody {
	fn do_cleanup(&self) {
		let cleanup = self.cleanup.borrow_mut().take();
		if let Some(cleanup) = cleanup {
			cleanup.run()
		}
	}

	fn do_untrack_activity(&self) {
		let untrack = self.untrack_activity.borrow_mut().take();
		drop(untrack);
	}

	fn release_aggregate(&self) {
		let aggregate = self.aggregate.borrow_mut().take();
		if let Some(aggregate) = aggregate {
			aggregate.release();
		}
	}

	fn update(&self) {
		self.do_cleanup();
		self.release_aggregate();

		let evaluation = Evaluation::new();
		let cleanup = evaluation.run(|| {
			let mut func = self.func.borrow_mut();
			(*func)()
		});
		*self.cleanup.borrow_mut() = cleanup;

		let aggregate = OptimizedAggregate::new(evaluation.take());
		let snapshot_changed = aggregate.take_snapshot();
		*self.aggregate.borrow_mut() = Some(aggregate);
		*self.snapshot_changed.borrow_mut() = Some(snapshot_changed);

		self.until_changed();
	}

	fn until_changed(&self) {
		let aggregate = self.aggregate.borrow().clone();
		let Some(aggregate) = aggregate else {
			return;
		};

		let this = self.this.clone();
		let untrack = aggregate.track_activity(Rc::new(move || {
			if let Some(this) = this.upgrade() {
				this.on_activity();
			}
		}));

		let previous = self.untrack_activity.borrow_mut().replace(untrack);
		drop(previous);
	}

	fn on_activity(&self) {
		self.do_untrack_activity();

		let this = self.this.clone();
		scheduler::queue_microtask(move || {
			if let Some(this) = this.upgrade() {
				this.check();
			}
		});
	}

	fn check(&self) {
		if self.aggregate.borrow().is_none() {
			return;
		}

		let snapshot_changed = self.snapshot_changed.borrow().clone();
		let changed = snapshot_changed.map_or(true, |changed| changed());
		if changed {
			tracing::trace!("re-running an effect");
			self.update();
		} else {
			self.until_changed();
		}
	}

	fn stop(&self) {
		if self.aggregate.borrow().is_none() {
			return;
		}
		self.release_aggregate();
		self.do_untrack_activity();
		let snapshot_changed = self.snapshot_changed.borrow_mut().take();
		drop(snapshot_changed);
		self.do_cleanup();
	}
}

impl Drop for Effect {
	fn drop(&mut self) {
		self.body.stop()
	}
}

impl fmt::Debug for Effect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let dependencies = self.body.aggregate.borrow().as_ref().map(OptimizedAggregate::len);
		f.debug_struct("Effect")
			.field("dependencies", &dependencies)
			.finish()
	}
}
