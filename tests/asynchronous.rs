use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use futures::channel::oneshot;
use transient::scheduler::flush;
use transient::{AbortSignal, ComputedSignal, SignalError, SignalWatcher, WritableSignal};

type Pending = Rc<RefCell<VecDeque<oneshot::Sender<i32>>>>;

/// `source * factor`, where each run waits for its factor on a channel.
fn multiplied(source: &WritableSignal<i32>, pending: &Pending) -> ComputedSignal<i32> {
	let (source, pending) = (source.clone(), pending.clone());
	ComputedSignal::new_async(move |_: &AbortSignal| {
		let input = source.get();
		let (sender, receiver) = oneshot::channel();
		pending.borrow_mut().push_back(sender);
		async move {
			let factor = receiver.await.map_err(SignalError::new)?;
			Ok::<i32, SignalError>(input? * factor)
		}
	})
}

fn resolve(pending: &Pending, factor: i32) {
	let sender = pending.borrow_mut().pop_front();
	if let Some(sender) = sender {
		let _ = sender.send(factor);
	}
	flush();
}

#[test]
fn pending_value_is_loading_until_resolved() {
	let source = WritableSignal::new(2);
	let pending = Pending::default();
	let product = multiplied(&source, &pending);

	assert!(product.get().unwrap_err().is_loading());
	flush();
	assert!(product.get().unwrap_err().is_loading());

	resolve(&pending, 10);
	assert_eq!(product.get().unwrap(), 20);
	assert!(pending.borrow().is_empty());
}

#[test]
fn superseded_run_is_never_committed() {
	let source = WritableSignal::new(1);
	let pending = Pending::default();
	let product = multiplied(&source, &pending);

	assert!(product.get().unwrap_err().is_loading());
	source.set(2).unwrap();
	assert!(product.get().unwrap_err().is_loading());
	assert_eq!(pending.borrow().len(), 2);

	// the first run was aborted by the second one
	resolve(&pending, 100);
	assert!(product.get().unwrap_err().is_loading());

	resolve(&pending, 10);
	assert_eq!(product.get().unwrap(), 20);
}

#[test]
fn abort_signal_reports_superseded_runs() {
	let source = WritableSignal::new(1);
	let signals = Rc::new(RefCell::new(Vec::new()));

	let computed = ComputedSignal::new_async({
		let (source, signals) = (source.clone(), signals.clone());
		move |signal: &AbortSignal| {
			signals.borrow_mut().push(signal.clone());
			let input = source.get();
			async move { input }
		}
	});

	computed.get().unwrap_err();
	source.set(2).unwrap();
	computed.get().unwrap_err();

	let aborted: Vec<bool> = signals.borrow().iter().map(AbortSignal::is_aborted).collect();
	assert_eq!(aborted, [true, false]);

	flush();
	assert_eq!(computed.get().unwrap(), 2);
}

#[test]
fn failed_future_becomes_the_error() {
	let source = WritableSignal::new(1);
	let pending = Pending::default();
	let product = multiplied(&source, &pending);

	product.get().unwrap_err();
	// dropping the sender cancels the receiver
	pending.borrow_mut().clear();
	flush();

	let error = product.get().unwrap_err();
	assert!(error.downcast_ref::<oneshot::Canceled>().is_some());
}

#[test]
fn watchers_observe_loading_then_value() {
	let source = WritableSignal::new(3);
	let pending = Pending::default();
	let product = multiplied(&source, &pending);
	let seen = Rc::new(RefCell::new(Vec::new()));

	let _watcher = SignalWatcher::new(product.clone(), {
		let seen = seen.clone();
		move |value: Result<i32, SignalError>| {
			seen.borrow_mut().push(value.map_err(|error| error.is_loading()));
		}
	})
	.unwrap();

	resolve(&pending, 2);
	assert_eq!(seen.borrow().first(), Some(&Err(true)));
	assert_eq!(seen.borrow().last(), Some(&Ok(6)));
	assert_eq!(seen.borrow().iter().filter(|value| value.is_ok()).count(), 1);

	source.set(4).unwrap();
	flush();
	assert_eq!(seen.borrow().last(), Some(&Err(true)));

	resolve(&pending, 2);
	assert_eq!(seen.borrow().last(), Some(&Ok(8)));
}
