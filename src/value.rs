use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::SignalError;

/// The state every signal holds: a value, or an error flowing through the graph.
pub type ValueOrError<T> = Result<T, SignalError>;

pub type EqualFunction<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Two states are equal only if both are values and `equal` says so.
/// An error never equals anything, not even the same error.
pub fn are_value_or_error_equal<T>(
	a: &ValueOrError<T>,
	b: &ValueOrError<T>,
	equal: &dyn Fn(&T, &T) -> bool,
) -> bool {
	match (a, b) {
		(Ok(a), Ok(b)) => equal(a, b),
		_ => false,
	}
}

pub struct SignalOptions<T> {
	pub(crate) equal: EqualFunction<T>,
}

impl<T> Clone for SignalOptions<T> {
	fn clone(&self) -> Self {
		SignalOptions {
			equal: self.equal.clone(),
		}
	}
}

impl<T: PartialEq + 'static> Default for SignalOptions<T> {
	fn default() -> Self {
		SignalOptions {
			equal: Rc::new(|a: &T, b: &T| a == b),
		}
	}
}

impl<T> SignalOptions<T> {
	pub fn with_equal(equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
		SignalOptions {
			equal: Rc::new(equal),
		}
	}
}

/// The value cell shared by all signal kinds.
pub(crate) struct SignalValue<T> {
	value: RefCell<ValueOrError<T>>,
	equal: EqualFunction<T>,
}

impl<T: Clone> SignalValue<T> {
	pub fn new(value: ValueOrError<T>, options: SignalOptions<T>) -> Self {
		SignalValue {
			value: RefCell::new(value),
			equal: options.equal,
		}
	}

	pub fn get(&self) -> ValueOrError<T> {
		self.value.borrow().clone()
	}

	/// Stores `value`, returning `true` if it differs from the previous one.
	pub fn set(&self, value: ValueOrError<T>) -> bool {
		let changed = self.is_different(&value);
		let previous = self.value.replace(value);
		drop(previous);
		changed
	}

	pub fn is_different(&self, other: &ValueOrError<T>) -> bool {
		!are_value_or_error_equal(other, &self.value.borrow(), &*self.equal)
	}
}

impl<T: fmt::Debug> fmt::Debug for SignalValue<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.value.borrow().fmt(f)
	}
}
