use std::cell::RefCell;
use std::rc::Rc;

use fxhash::FxHashSet;

use crate::context::{self, CaptureTransient};
use crate::Transient;

/// Records the nodes read during one run of a formula or an effect.
///
/// A node read several times is recorded once, in the order of its first read.
pub struct Evaluation {
	inner: Rc<RefCell<EvaluationInner>>,
}

#[derive(Default)]
struct EvaluationInner {
	dependencies: Vec<Rc<dyn Transient>>,
	seen: FxHashSet<*const ()>,
}

impl EvaluationInner {
	fn based_on(&mut self, transient: Rc<dyn Transient>) {
		if self.seen.insert(Rc::as_ptr(&transient) as *const ()) {
			self.dependencies.push(transient);
		}
	}
}

impl Default for Evaluation {
	fn default() -> Self {
		Self::new()
	}
}

impl Evaluation {
	pub fn new() -> Self {
		Evaluation {
			inner: Rc::new(RefCell::new(EvaluationInner::default())),
		}
	}

	/// Runs `body` in a fresh capture context feeding this evaluation.
	pub fn run<R>(&self, body: impl FnOnce() -> R) -> R {
		let inner = self.inner.clone();
		let capture: CaptureTransient = Rc::new(move |transient| inner.borrow_mut().based_on(transient));
		context::run_in_context(Some(capture), body)
	}

	pub fn take(self) -> Vec<Rc<dyn Transient>> {
		std::mem::take(&mut self.inner.borrow_mut().dependencies)
	}
}
