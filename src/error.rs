use std::error::Error;
use std::rc::Rc;

/// The error half of every value-or-error.
///
/// Cloning is cheap: user errors are shared behind an `Rc`.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SignalError {
	#[error("signal is unset")]
	Unset,

	#[error("signal is loading")]
	Loading,

	#[error("cycle in computation")]
	Cycle,

	#[error("the signal cannot be written in this context")]
	WriteInContext,

	#[error("cannot create {0} in this context")]
	ScopeInContext(&'static str),

	#[error("{0}")]
	Thrown(Rc<dyn Error + 'static>),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl SignalError {
	/// Wraps an arbitrary error.
	pub fn new(error: impl Error + 'static) -> Self {
		SignalError::Thrown(Rc::new(error))
	}

	pub fn msg(message: impl Into<String>) -> Self {
		SignalError::new(Message(message.into()))
	}

	pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
		match self {
			SignalError::Thrown(error) => error.downcast_ref::<E>(),
			_ => None,
		}
	}

	pub fn is_unset(&self) -> bool {
		matches!(self, SignalError::Unset)
	}

	pub fn is_loading(&self) -> bool {
		matches!(self, SignalError::Loading)
	}

	/// Returns `true` if both errors carry the same user error instance.
	pub fn same_as(&self, other: &SignalError) -> bool {
		match (self, other) {
			(SignalError::Thrown(a), SignalError::Thrown(b)) => {
				Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
			}
			_ => false,
		}
	}
}
