use std::fmt::Debug;
use std::rc::{Rc, Weak};

use crate::context;
use crate::emitter::{Emitter, Untrack};
use crate::value::SignalValue;
use crate::{
	Activity, ComputedSignal, ReadonlySignal, Signal, SignalError, SignalOptions, SnapshotChanged,
	Transient, ValueOrError,
};

/// A mutable leaf of the graph.
pub struct WritableSignal<T> {
	body: Rc<WritableBody<T>>,
}

pub(crate) struct WritableBody<T> {
	value: SignalValue<T>,
	tracker: Rc<Emitter>,
	this: Weak<WritableBody<T>>,
}

impl<T> Clone for WritableSignal<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Default for WritableSignal<T>
where
	T: Default + PartialEq + Clone + 'static,
{
	fn default() -> Self {
		WritableSignal::new(Default::default())
	}
}

pub trait Toggle {
	fn toggle(&mut self);
}

impl Toggle for bool {
	fn toggle(&mut self) {
		*self = !*self
	}
}

impl<T> WritableSignal<T>
where
	T: Clone + 'static,
{
	pub fn new(value: T) -> Self
	where
		T: PartialEq,
	{
		Self::with_options(Ok(value), SignalOptions::default())
	}

	/// A signal whose first read fails with [`SignalError::Unset`].
	pub fn unset() -> Self
	where
		T: PartialEq,
	{
		Self::with_options(Err(SignalError::Unset), SignalOptions::default())
	}

	/// A signal starting in an error state.
	pub fn thrown(error: SignalError) -> Self
	where
		T: PartialEq,
	{
		Self::with_options(Err(error), SignalOptions::default())
	}

	pub fn with_options(value: ValueOrError<T>, options: SignalOptions<T>) -> Self {
		WritableSignal {
			body: Rc::new_cyclic(|this| WritableBody {
				value: SignalValue::new(value, options),
				tracker: Emitter::new(),
				this: this.clone(),
			}),
		}
	}

	#[inline]
	pub fn get(&self) -> ValueOrError<T> {
		self.body.get()
	}

	#[inline]
	pub fn set(&self, value: T) -> Result<(), SignalError> {
		self.body.write(Ok(value))
	}

	#[inline]
	pub fn throw(&self, error: SignalError) -> Result<(), SignalError> {
		self.body.write(Err(error))
	}

	/// Replaces the current value-or-error.
	#[inline]
	pub fn write(&self, value: ValueOrError<T>) -> Result<(), SignalError> {
		self.body.write(value)
	}

	/// Applies `func` to the current value.
	///
	/// Fails without calling `func` if the signal currently holds an error.
	pub fn update(&self, func: impl FnOnce(&T) -> T) -> Result<(), SignalError> {
		self.try_update(|value| Ok(func(value)))
	}

	/// Like [`WritableSignal::update`], but an `Err` returned by `func`
	/// becomes the new state of the signal.
	pub fn try_update(&self, func: impl FnOnce(&T) -> ValueOrError<T>) -> Result<(), SignalError> {
		if context::is_in_context() {
			return Err(SignalError::WriteInContext);
		}
		let current = self.body.get()?;
		self.body.write(func(&current))
	}

	#[inline]
	pub fn toggle(&self) -> Result<(), SignalError>
	where
		T: Toggle,
	{
		self.update(|value| {
			let mut value = value.clone();
			value.toggle();
			value
		})
	}

	pub fn map<F, R>(&self, func: F) -> ComputedSignal<R>
	where
		F: Fn(&T) -> R + 'static,
		R: PartialEq + Clone + 'static,
	{
		let this = self.clone();
		ComputedSignal::new(move || this.get().map(|value| func(&value)))
	}

	pub fn as_readonly(&self) -> ReadonlySignal<T> {
		ReadonlySignal::from(self.clone())
	}
}

impl<T: Clone + 'static> WritableBody<T> {
	fn write(&self, value: ValueOrError<T>) -> Result<(), SignalError> {
		if context::is_in_context() {
			return Err(SignalError::WriteInContext);
		}
		if self.value.set(value) {
			self.tracker.dispatch();
		}
		Ok(())
	}
}

impl<T: Clone + 'static> Transient for WritableBody<T> {
	fn take_snapshot(&self) -> SnapshotChanged {
		let value = self.value.get();
		let this = self.this.clone();
		Rc::new(move || {
			this.upgrade()
				.map_or(false, |this| this.value.is_different(&value))
		})
	}

	fn track_activity(&self, on_activity: Activity) -> Untrack {
		self.tracker.listen(on_activity)
	}

	fn capture(&self) {
		if let Some(this) = self.this.upgrade() {
			context::capture(this)
		}
	}
}

impl<T: Clone + 'static> Signal<T> for WritableBody<T> {
	fn get(&self) -> ValueOrError<T> {
		self.capture();
		self.value.get()
	}
}

impl<T: Clone + 'static> Transient for WritableSignal<T> {
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

impl<T: Clone + 'static> Signal<T> for WritableSignal<T> {
	fn get(&self) -> ValueOrError<T> {
		self.body.get()
	}
}

impl<T: Clone + 'static> From<WritableSignal<T>> for ReadonlySignal<T> {
	fn from(signal: WritableSignal<T>) -> Self {
		ReadonlySignal::new(signal.body)
	}
}

impl<T> Debug for WritableSignal<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("WritableSignal").field(&self.body.value).finish()
	}
}
