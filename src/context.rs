use std::cell::RefCell;
use std::rc::Rc;

use crate::Transient;

/// Receives every node read while a context is active.
pub type CaptureTransient = Rc<dyn Fn(Rc<dyn Transient>)>;

thread_local! {
	static CURRENT_CONTEXT: RefCell<Option<CaptureTransient>> = const { RefCell::new(None) };
}

/// Restores the previous context when dropped, including on unwind.
struct ContextGuard {
	previous: Option<CaptureTransient>,
}

impl ContextGuard {
	fn enter(context: Option<CaptureTransient>) -> Self {
		let previous = CURRENT_CONTEXT.with(|current| current.replace(context));
		ContextGuard { previous }
	}
}

impl Drop for ContextGuard {
	fn drop(&mut self) {
		let previous = self.previous.take();
		let _ = CURRENT_CONTEXT.try_with(|current| current.replace(previous));
	}
}

/// Runs `body` with `capture` installed as the active context.
///
/// Passing `None` suspends any enclosing context for the duration of `body`.
pub fn run_in_context<R>(capture: Option<CaptureTransient>, body: impl FnOnce() -> R) -> R {
	let _guard = ContextGuard::enter(capture);
	body()
}

/// Runs `body` without any active context: reads are not tracked.
pub fn run_outside_context<R>(body: impl FnOnce() -> R) -> R {
	run_in_context(None, body)
}

/// Runs `body` in a context that discards every read. Writes and new
/// scopes are still refused, as in any other context.
pub(crate) fn run_in_discarding_context<R>(body: impl FnOnce() -> R) -> R {
	run_in_context(Some(Rc::new(|_: Rc<dyn Transient>| {})), body)
}

pub fn is_in_context() -> bool {
	CURRENT_CONTEXT.with(|current| current.borrow().is_some())
}

/// Hands `transient` to the active context, if there is one.
pub fn capture(transient: Rc<dyn Transient>) {
	let current = CURRENT_CONTEXT.with(|current| current.borrow().clone());
	if let Some(capture) = current {
		capture(transient)
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use super::*;
	use crate::WritableSignal;

	fn counting() -> (Rc<Cell<usize>>, CaptureTransient) {
		let count = Rc::new(Cell::new(0));
		let capture: CaptureTransient = {
			let count = count.clone();
			Rc::new(move |_| count.set(count.get() + 1))
		};
		(count, capture)
	}

	#[test]
	fn context_is_restored() {
		let (_, capture) = counting();

		assert!(!is_in_context());
		run_in_context(Some(capture), || {
			assert!(is_in_context());
			run_outside_context(|| assert!(!is_in_context()));
			assert!(is_in_context());
		});
		assert!(!is_in_context());
	}

	#[test]
	fn context_is_restored_on_panic() {
		let (_, capture) = counting();

		let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
			run_in_context(Some(capture), || panic!("boom"));
		}));

		assert!(result.is_err());
		assert!(!is_in_context());
	}

	#[test]
	fn reads_are_captured_by_innermost_context() {
		let a = WritableSignal::new(1);
		let (outer, outer_capture) = counting();
		let (inner, inner_capture) = counting();

		run_in_context(Some(outer_capture), || {
			a.get().unwrap();
			run_in_context(Some(inner_capture), || {
				a.get().unwrap();
				a.get().unwrap();
			});
		});

		assert_eq!(outer.get(), 1);
		assert_eq!(inner.get(), 2);
	}

	#[test]
	fn capture_without_context_is_noop() {
		let a = WritableSignal::new(1);
		assert_eq!(a.get().unwrap(), 1);
		assert!(!is_in_context());
	}
}
