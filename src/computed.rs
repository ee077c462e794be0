use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::{Future, FutureExt};

use crate::aggregate::{AggregateTransient, OptimizedAggregate};
use crate::context;
use crate::emitter::{Emitter, Untrack};
use crate::evaluation::Evaluation;
use crate::scheduler::{self, TimerHandle};
use crate::value::SignalValue;
use crate::{
	AbortController, AbortSignal, Activity, ReadonlySignal, Signal, SignalError, SignalOptions,
	SnapshotChanged, Transient, ValueOrError,
};

thread_local! {
	static DEFAULT_RELEASE_DELAY: Cell<Duration> = const { Cell::new(Duration::from_millis(2000)) };
	// nodes currently recomputing or probing their dependencies, innermost last
	static UPDATING: RefCell<Vec<*const ()>> = const { RefCell::new(Vec::new()) };
	static CYCLES: Cell<u64> = const { Cell::new(0) };
}

fn cycles_seen() -> u64 {
	CYCLES.with(Cell::get)
}

fn note_cycle() {
	tracing::debug!("cycle detected while updating a computed signal");
	CYCLES.with(|cycles| cycles.set(cycles.get() + 1));
}

/// What a formula produced: a value right away, or a future settling later.
pub enum Computation<T> {
	Ready(ValueOrError<T>),
	Pending(LocalBoxFuture<'static, ValueOrError<T>>),
}

impl<T> Computation<T> {
	pub fn pending(future: impl Future<Output = ValueOrError<T>> + 'static) -> Self {
		Computation::Pending(future.boxed_local())
	}
}

impl<T> From<ValueOrError<T>> for Computation<T> {
	fn from(value: ValueOrError<T>) -> Self {
		Computation::Ready(value)
	}
}

pub struct ComputedSignalOptions<T> {
	pub signal: SignalOptions<T>,
	/// How long the node keeps its subscriptions once nobody observes it.
	/// Falls back to [`ComputedSignal::default_release_delay`].
	pub release_delay: Option<Duration>,
}

impl<T: PartialEq + 'static> Default for ComputedSignalOptions<T> {
	fn default() -> Self {
		ComputedSignalOptions {
			signal: SignalOptions::default(),
			release_delay: None,
		}
	}
}

impl<T> ComputedSignalOptions<T> {
	pub fn with_equal(equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
		ComputedSignalOptions {
			signal: SignalOptions::with_equal(equal),
			release_delay: None,
		}
	}

	pub fn release_delay(mut self, delay: Duration) -> Self {
		self.release_delay = Some(delay);
		self
	}
}

/// A lazily evaluated, memoized derivation.
///
/// The formula runs on the first read and afterwards only when one of the
/// nodes it read actually changed. Activity from dependencies only marks the
/// node outdated; the next read asks the dependencies whether they changed
/// before deciding to run the formula again.
pub struct ComputedSignal<T> {
	body: Rc<ComputedBody<T>>,
}

impl<T> Clone for ComputedSignal<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

pub(crate) struct ComputedBody<T> {
	value: SignalValue<T>,
	tracker: Rc<Emitter>,
	computation: Box<dyn Fn(&AbortSignal) -> Computation<T>>,

	aggregate: RefCell<Option<OptimizedAggregate>>,
	snapshot_changed: RefCell<Option<SnapshotChanged>>,
	// `None` once activity was seen since the last check
	untrack_activity: RefCell<Option<Untrack>>,
	updating: Cell<bool>,

	is_async: Cell<bool>,
	controller: RefCell<Option<AbortController>>,

	watchers: Cell<usize>,
	release_delay: Duration,
	release_timer: Cell<Option<TimerHandle>>,

	this: Weak<ComputedBody<T>>,
}

struct Updating<'a>(&'a Cell<bool>);

impl<'a> Updating<'a> {
	fn enter(flag: &'a Cell<bool>, node: *const ()) -> Self {
		flag.set(true);
		UPDATING.with(|updating| updating.borrow_mut().push(node));
		Updating(flag)
	}

	fn contains(node: *const ()) -> bool {
		UPDATING.with(|updating| updating.borrow().contains(&node))
	}
}

impl Drop for Updating<'_> {
	fn drop(&mut self) {
		self.0.set(false);
		let _ = UPDATING.try_with(|updating| updating.borrow_mut().pop());
	}
}

impl<T> ComputedSignal<T>
where
	T: Clone + 'static,
{
	pub fn new(func: impl Fn() -> ValueOrError<T> + 'static) -> Self
	where
		T: PartialEq,
	{
		Self::with_options(move |_| Computation::Ready(func()), ComputedSignalOptions::default())
	}

	/// A derivation settling asynchronously. Reads performed before the
	/// future is returned are the dependencies; reads inside the future
	/// are not tracked. While pending, the node holds [`SignalError::Loading`].
	pub fn new_async<F, Fut>(func: F) -> Self
	where
		F: Fn(&AbortSignal) -> Fut + 'static,
		Fut: Future<Output = ValueOrError<T>> + 'static,
		T: PartialEq,
	{
		Self::with_options(
			move |signal| Computation::pending(func(signal)),
			ComputedSignalOptions::default(),
		)
	}

	pub fn with_options(
		computation: impl Fn(&AbortSignal) -> Computation<T> + 'static,
		options: ComputedSignalOptions<T>,
	) -> Self {
		let release_delay = options
			.release_delay
			.unwrap_or_else(Self::default_release_delay);

		ComputedSignal {
			body: Rc::new_cyclic(|this| ComputedBody {
				value: SignalValue::new(Err(SignalError::Unset), options.signal),
				tracker: Emitter::new(),
				computation: Box::new(computation),
				aggregate: RefCell::new(None),
				snapshot_changed: RefCell::new(None),
				untrack_activity: RefCell::new(None),
				updating: Cell::new(false),
				is_async: Cell::new(false),
				controller: RefCell::new(None),
				watchers: Cell::new(0),
				release_delay,
				release_timer: Cell::new(None),
				this: this.clone(),
			}),
		}
	}

	/// Follows a signal of signals: reads the outer one, then the node it
	/// currently points to.
	pub fn unroll(signal: ReadonlySignal<ReadonlySignal<T>>, options: ComputedSignalOptions<T>) -> Self {
		Self::with_options(
			move |_| Computation::Ready(signal.get().and_then(|inner| inner.get())),
			options,
		)
	}

	pub fn default_release_delay() -> Duration {
		DEFAULT_RELEASE_DELAY.with(Cell::get)
	}

	/// Changes the release delay of computed signals created afterwards
	/// on this thread.
	pub fn set_default_release_delay(delay: Duration) {
		DEFAULT_RELEASE_DELAY.with(|default| default.set(delay))
	}

	#[inline]
	pub fn get(&self) -> ValueOrError<T> {
		self.body.get()
	}

	/// Number of live activity subscriptions on this node.
	pub fn watchers(&self) -> usize {
		self.body.watchers.get()
	}

	pub fn as_readonly(&self) -> ReadonlySignal<T> {
		ReadonlySignal::from(self.clone())
	}
}

impl<T: Clone + 'static> ComputedBody<T> {
	fn is_outdated(&self) -> bool {
		self.untrack_activity.borrow().is_none()
	}

	fn mark_as_outdated(&self) {
		let untrack = self.untrack_activity.borrow_mut().take();
		drop(untrack);
		self.tracker.dispatch();
	}

	fn track_activity_once(&self) {
		let aggregate = self.aggregate.borrow().clone();
		let Some(aggregate) = aggregate else {
			return;
		};

		let this = self.this.clone();
		let untrack = aggregate.track_activity(Rc::new(move || {
			if let Some(this) = this.upgrade() {
				this.mark_as_outdated();
			}
		}));

		let previous = self.untrack_activity.borrow_mut().replace(untrack);
		drop(previous);
	}

	fn abort_scheduled_release(&self) {
		if let Some(timer) = self.release_timer.take() {
			scheduler::clear_timeout(timer);
		}
	}

	fn schedule_release(&self) {
		self.abort_scheduled_release();
		if self.watchers.get() == 0 {
			let this = self.this.clone();
			let timer = scheduler::set_timeout(self.release_delay, move || {
				if let Some(this) = this.upgrade() {
					this.release();
				}
			});
			self.release_timer.set(Some(timer));
		}
	}

	fn release_aggregate(&self) {
		let aggregate = self.aggregate.borrow().clone();
		if let Some(aggregate) = aggregate {
			aggregate.release();
		}
	}

	fn release(&self) {
		self.abort_scheduled_release();
		self.release_aggregate();
		self.mark_as_outdated();
		tracing::trace!("released an idle computed signal");
	}

	fn update(&self) {
		if self.updating.get() {
			note_cycle();
			return;
		}

		self.schedule_release();

		let snapshot_changed = self.snapshot_changed.borrow().clone();
		if let Some(snapshot_changed) = snapshot_changed {
			if !self.is_outdated() {
				return;
			}

			let changed = {
				let _updating = Updating::enter(&self.updating, self.this.as_ptr() as *const ());
				let cycles = cycles_seen();
				snapshot_changed() || cycles_seen() != cycles
			};
			if !changed {
				self.track_activity_once();
				return;
			}
		}

		self.recompute();
	}

	fn renew_controller(&self) -> AbortSignal {
		let mut controller = self.controller.borrow_mut();
		let renew = match &*controller {
			Some(previous) if self.is_async.get() => {
				previous.abort();
				true
			}
			Some(previous) => previous.is_bound(),
			None => true,
		};
		if renew {
			*controller = None;
		}
		controller.get_or_insert_with(AbortController::new).signal()
	}

	fn recompute(&self) {
		let computation = {
			let _updating = Updating::enter(&self.updating, self.this.as_ptr() as *const ());
			let signal = self.renew_controller();

			let untrack = self.untrack_activity.borrow_mut().take();
			drop(untrack);
			self.release_aggregate();

			let evaluation = Evaluation::new();
			let cycles = cycles_seen();
			let computation = evaluation.run(|| (self.computation)(&signal));
			let cyclic = cycles_seen() != cycles;

			// A node still updating up the stack must not become a dependency,
			// or the two bodies would own each other. A run that met a cycle
			// is not memoized.
			let list: Vec<Rc<dyn Transient>> = evaluation
				.take()
				.into_iter()
				.filter(|transient| !Updating::contains(Rc::as_ptr(transient) as *const ()))
				.collect();

			let aggregate = OptimizedAggregate::new(list);
			let snapshot_changed = aggregate.take_snapshot();
			*self.aggregate.borrow_mut() = Some(aggregate);
			*self.snapshot_changed.borrow_mut() = (!cyclic).then_some(snapshot_changed);
			self.track_activity_once();

			computation
		};

		tracing::trace!("recomputed a computed signal");

		match computation {
			Computation::Ready(value) => {
				self.is_async.set(false);
				self.set_value(value);
			}
			Computation::Pending(future) => {
				self.is_async.set(true);
				self.start_async(future);
			}
		}
	}

	fn start_async(&self, future: LocalBoxFuture<'static, ValueOrError<T>>) {
		let bound = {
			let mut controller = self.controller.borrow_mut();
			controller
				.as_mut()
				.and_then(|controller| Some((controller.signal(), controller.bind(future)?)))
		};

		if let Some((signal, future)) = bound {
			let this = self.this.clone();
			scheduler::spawn_local(async move {
				match future.await {
					Ok(value) if !signal.is_aborted() => {
						if let Some(this) = this.upgrade() {
							this.is_async.set(false);
							this.set_value(value);
						}
					}
					_ => tracing::trace!("discarding a superseded async computation"),
				}
			});
		}

		self.set_value(Err(SignalError::Loading));
	}

	fn set_value(&self, value: ValueOrError<T>) {
		if self.value.set(value) {
			self.tracker.dispatch();
		}
	}
}

impl<T> Drop for ComputedBody<T> {
	fn drop(&mut self) {
		if let Some(timer) = self.release_timer.take() {
			scheduler::clear_timeout(timer);
		}
		if let Some(controller) = self.controller.get_mut().take() {
			controller.abort();
		}
	}
}

impl<T: Clone + 'static> Transient for ComputedBody<T> {
	fn take_snapshot(&self) -> SnapshotChanged {
		self.update();
		let value = self.value.get();
		let this = self.this.clone();
		Rc::new(move || match this.upgrade() {
			Some(this) => {
				this.update();
				this.value.is_different(&value)
			}
			None => false,
		})
	}

	fn track_activity(&self, on_activity: Activity) -> Untrack {
		self.watchers.set(self.watchers.get() + 1);
		self.abort_scheduled_release();

		let untrack = self.tracker.listen(on_activity);
		let this = self.this.clone();
		Untrack::new(move || {
			drop(untrack);
			if let Some(this) = this.upgrade() {
				this.watchers.set(this.watchers.get() - 1);
				this.schedule_release();
			}
		})
	}

	fn capture(&self) {
		if let Some(this) = self.this.upgrade() {
			context::capture(this)
		}
	}
}

impl<T: Clone + 'static> Signal<T> for ComputedBody<T> {
	fn get(&self) -> ValueOrError<T> {
		self.capture();
		if self.updating.get() {
			note_cycle();
			return Err(SignalError::Cycle);
		}
		self.update();
		self.value.get()
	}
}

impl<T: Clone + 'static> Transient for ComputedSignal<T> {
	fn take_snapshot(&self) -> SnapshotChanged {
		self.body.take_snapshot()
	}

	fn track_activity(&self, on_activity: Activity) -> Untrack {
		self.body.track_activity(on_activity)
	}

	fn capture(&self) {
		self.body.capture()
	}
}

impl<T: Clone + 'static> Signal<T> for ComputedSignal<T> {
	fn get(&self) -> ValueOrError<T> {
		self.body.get()
	}
}

impl<T: Clone + 'static> From<ComputedSignal<T>> for ReadonlySignal<T> {
	fn from(signal: ComputedSignal<T>) -> Self {
		ReadonlySignal::new(signal.body)
	}
}

impl<T: fmt::Debug> fmt::Debug for ComputedSignal<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ComputedSignal")
			.field("value", &self.body.value)
			.field("watchers", &self.body.watchers.get())
			.finish()
	}
}
