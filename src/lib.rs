//! Fine-grained reactive signals.
//!
//! A graph of mutable leaves ([`WritableSignal`]), lazily memoized derivations
//! ([`ComputedSignal`]) and eager sinks ([`Effect`], [`SignalWatcher`]).
//! Dependencies are discovered by reading: any [`Signal::get`] performed while
//! a capture context is active registers the node with that context.
//!
//! ```
//! use transient::{ComputedSignal, WritableSignal};
//!
//! let a = WritableSignal::new(1);
//! let b = WritableSignal::new(2);
//! let c = ComputedSignal::new({
//! 	let (a, b) = (a.clone(), b.clone());
//! 	move || Ok(a.get()? + b.get()?)
//! });
//!
//! assert_eq!(c.get().unwrap(), 3);
//! a.set(3).unwrap();
//! assert_eq!(c.get().unwrap(), 5);
//! ```

pub mod macros;

mod abort;
mod aggregate;
mod computed;
mod context;
mod effect;
mod emitter;
mod error;
mod evaluation;
mod readonly;
pub mod scheduler;
mod value;
mod watcher;
mod writable;

#[cfg(target_arch = "wasm32")]
mod microtask;

use std::rc::Rc;

pub use abort::{AbortController, AbortSignal};
pub use aggregate::{AggregateTransient, BasicAggregate, OptimizedAggregate};
pub use computed::{Computation, ComputedSignal, ComputedSignalOptions};
pub use context::{capture, is_in_context, run_in_context, run_outside_context, CaptureTransient};
pub use effect::{Cleanup, Effect, EffectOutput};
pub use emitter::Untrack;
pub use error::SignalError;
pub use evaluation::Evaluation;
pub use readonly::ReadonlySignal;
pub use scheduler::{batch, in_batch};
pub use value::{are_value_or_error_equal, EqualFunction, SignalOptions, ValueOrError};
pub use watcher::SignalWatcher;
pub use writable::{Toggle, WritableSignal};

/// Returns `true` if the node changed since the snapshot was taken.
pub type SnapshotChanged = Rc<dyn Fn() -> bool>;

/// Called when a node *may* have changed.
pub type Activity = Rc<dyn Fn()>;

/// The capability set shared by every participant of the graph.
pub trait Transient: 'static {
	/// Freezes the current state of this node and returns a probe
	/// telling whether it differs from the frozen state.
	fn take_snapshot(&self) -> SnapshotChanged;

	/// Subscribes to the activity of this node. The subscription
	/// lives as long as the returned [`Untrack`].
	fn track_activity(&self, on_activity: Activity) -> Untrack;

	/// Registers this node into the active capture context, if any.
	fn capture(&self);
}

/// A node holding a value or an error.
pub trait Signal<T>: Transient {
	/// Captures this signal and returns its current value.
	fn get(&self) -> ValueOrError<T>;
}
