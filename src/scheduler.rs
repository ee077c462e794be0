//! The single-threaded run loop behind effects, watchers, async formulas and
//! idle release.
//!
//! Nothing here runs on its own (except on `wasm32`, where queued microtasks
//! drain through the host). Call [`flush`] to run deferred work, and
//! [`advance`] to move the virtual clock that drives timers.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use futures::Future;

use crate::context;

type Task = Box<dyn FnOnce()>;

thread_local! {
	static SCHEDULER: Scheduler = Scheduler::new();
}

struct Scheduler {
	microtasks: RefCell<VecDeque<Task>>,
	timers: RefCell<BTreeMap<(Duration, u64), Task>>,
	next_timer: Cell<u64>,
	now: Cell<Duration>,
	pool: RefCell<LocalPool>,
	spawner: LocalSpawner,
	flushing: Cell<bool>,
	batching: Cell<bool>,
}

/// Identifies a pending timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle {
	deadline: Duration,
	id: u64,
}

struct Reset<'a>(&'a Cell<bool>);

impl Drop for Reset<'_> {
	fn drop(&mut self) {
		self.0.set(false)
	}
}

impl Scheduler {
	fn new() -> Self {
		let pool = LocalPool::new();
		let spawner = pool.spawner();
		Scheduler {
			microtasks: RefCell::new(VecDeque::new()),
			timers: RefCell::new(BTreeMap::new()),
			next_timer: Cell::new(0),
			now: Cell::new(Duration::ZERO),
			pool: RefCell::new(pool),
			spawner,
			flushing: Cell::new(false),
			batching: Cell::new(false),
		}
	}

	fn next_microtask(&self) -> Option<Task> {
		self.microtasks.borrow_mut().pop_front()
	}

	fn next_due_timer(&self, until: Duration) -> Option<Task> {
		let mut timers = self.timers.borrow_mut();
		let key = *timers.keys().next()?;
		if key.0 > until {
			return None;
		}
		self.now.set(key.0);
		timers.remove(&key)
	}
}

/// Defers `task` until the next [`flush`]. Never runs it synchronously.
pub fn queue_microtask(task: impl FnOnce() + 'static) {
	let first = SCHEDULER.with(|s| {
		let mut microtasks = s.microtasks.borrow_mut();
		microtasks.push_back(Box::new(task));
		microtasks.len() == 1 && !s.flushing.get()
	});

	#[cfg(target_arch = "wasm32")]
	if first {
		crate::microtask::queue(flush);
	}
	#[cfg(not(target_arch = "wasm32"))]
	let _ = first;
}

/// Runs `future` on the local executor during subsequent flushes.
pub fn spawn_local(future: impl Future<Output = ()> + 'static) {
	SCHEDULER.with(|s| {
		if let Err(error) = s.spawner.spawn_local(future) {
			tracing::error!(%error, "failed to spawn a local future");
		}
	});
	queue_microtask(|| {});
}

/// Drains deferred work: microtasks, then ready futures, until both are idle.
pub fn flush() {
	SCHEDULER.with(|s| {
		if s.flushing.replace(true) {
			return;
		}
		let _reset = Reset(&s.flushing);

		loop {
			while let Some(task) = s.next_microtask() {
				context::run_outside_context(task);
			}

			context::run_outside_context(|| s.pool.borrow_mut().run_until_stalled());

			if s.microtasks.borrow().is_empty() {
				break;
			}
		}
	})
}

/// Runs `task` once the virtual clock has moved `delay` past [`now`].
pub fn set_timeout(delay: Duration, task: impl FnOnce() + 'static) -> TimerHandle {
	SCHEDULER.with(|s| {
		let id = s.next_timer.get();
		s.next_timer.set(id + 1);
		let deadline = s.now.get().saturating_add(delay);
		s.timers.borrow_mut().insert((deadline, id), Box::new(task));
		TimerHandle { deadline, id }
	})
}

pub fn clear_timeout(handle: TimerHandle) {
	let _ = SCHEDULER.try_with(|s| {
		let task = s.timers.borrow_mut().remove(&(handle.deadline, handle.id));
		drop(task);
	});
}

/// Moves the virtual clock forward, firing due timers in deadline order
/// and flushing after each of them.
pub fn advance(by: Duration) {
	flush();
	let until = now().saturating_add(by);

	while let Some(task) = SCHEDULER.with(|s| s.next_due_timer(until)) {
		context::run_outside_context(task);
		flush();
	}

	SCHEDULER.with(|s| s.now.set(until));
	flush();
}

pub fn now() -> Duration {
	SCHEDULER.with(|s| s.now.get())
}

pub fn pending_timers() -> usize {
	SCHEDULER.with(|s| s.timers.borrow().len())
}

pub fn in_batch() -> bool {
	SCHEDULER.with(|s| s.batching.get())
}

/// Runs `func`, then flushes once the outermost batch returns.
pub fn batch<R>(func: impl FnOnce() -> R) -> R {
	let is_root = SCHEDULER.with(|s| !s.batching.replace(true));
	if !is_root {
		return func();
	}

	let result = SCHEDULER.with(|s| {
		let _reset = Reset(&s.batching);
		func()
	});
	flush();
	result
}

#[cfg(test)]
mod tests {
	use std::rc::Rc;

	use super::*;

	fn log() -> Rc<RefCell<Vec<&'static str>>> {
		Rc::new(RefCell::new(Vec::new()))
	}

	#[test]
	fn microtasks_are_deferred() {
		let log = log();

		queue_microtask({
			let log = log.clone();
			move || {
				log.borrow_mut().push("first");
				let log = log.clone();
				queue_microtask(move || log.borrow_mut().push("nested"));
			}
		});
		assert!(log.borrow().is_empty());

		flush();
		assert_eq!(*log.borrow(), ["first", "nested"]);
	}

	#[test]
	fn timers_fire_in_deadline_order() {
		let log = log();

		let push = |name| {
			let log = log.clone();
			move || log.borrow_mut().push(name)
		};
		set_timeout(Duration::from_millis(20), push("late"));
		set_timeout(Duration::from_millis(10), push("early"));
		let cancelled = set_timeout(Duration::from_millis(15), push("cancelled"));
		clear_timeout(cancelled);

		advance(Duration::from_millis(5));
		assert!(log.borrow().is_empty());

		advance(Duration::from_millis(20));
		assert_eq!(*log.borrow(), ["early", "late"]);
		assert_eq!(now(), Duration::from_millis(25));
		assert_eq!(pending_timers(), 0);
	}

	#[test]
	fn far_deadlines_saturate() {
		let log = log();

		advance(Duration::from_millis(1));
		let log_never = log.clone();
		set_timeout(Duration::MAX, move || log_never.borrow_mut().push("never"));
		advance(Duration::from_secs(60));
		assert!(log.borrow().is_empty());
		assert_eq!(pending_timers(), 1);

		advance(Duration::MAX);
		assert_eq!(*log.borrow(), ["never"]);
		assert_eq!(now(), Duration::MAX);
	}

	#[test]
	fn futures_run_on_flush() {
		let log = log();
		let (sender, receiver) = futures::channel::oneshot::channel::<&'static str>();

		spawn_local({
			let log = log.clone();
			async move {
				if let Ok(name) = receiver.await {
					log.borrow_mut().push(name);
				}
			}
		});

		flush();
		assert!(log.borrow().is_empty());

		sender.send("resolved").unwrap();
		flush();
		assert_eq!(*log.borrow(), ["resolved"]);
	}

	#[test]
	fn batch_flushes_at_the_outermost_level() {
		let log = log();

		batch(|| {
			batch(|| {
				let log = log.clone();
				queue_microtask(move || log.borrow_mut().push("task"));
			});
			assert!(in_batch());
			assert!(log.borrow().is_empty());
		});

		assert!(!in_batch());
		assert_eq!(*log.borrow(), ["task"]);
	}
}
