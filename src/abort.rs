use futures::future::{AbortHandle, AbortRegistration, Abortable};
use futures::Future;

/// Cancels the asynchronous run of a computed signal.
pub struct AbortController {
	handle: AbortHandle,
	registration: Option<AbortRegistration>,
}

/// The read side of an [`AbortController`], handed to formulas.
#[derive(Clone, Debug)]
pub struct AbortSignal {
	handle: AbortHandle,
}

impl AbortController {
	pub fn new() -> Self {
		let (handle, registration) = AbortHandle::new_pair();
		AbortController {
			handle,
			registration: Some(registration),
		}
	}

	pub fn signal(&self) -> AbortSignal {
		AbortSignal {
			handle: self.handle.clone(),
		}
	}

	pub fn abort(&self) {
		self.handle.abort()
	}

	pub(crate) fn is_bound(&self) -> bool {
		self.registration.is_none()
	}

	/// Binds `future` to this controller: once aborted, it is dropped
	/// without completing. Returns `None` if a future was already bound.
	pub(crate) fn bind<F: Future>(&mut self, future: F) -> Option<Abortable<F>> {
		self.registration
			.take()
			.map(|registration| Abortable::new(future, registration))
	}
}

impl Default for AbortController {
	fn default() -> Self {
		Self::new()
	}
}

impl AbortSignal {
	pub fn is_aborted(&self) -> bool {
		self.handle.is_aborted()
	}
}
