//! The cooperative, single-threaded deferred-task queue everything else in
//! this crate is built on top of.
//!
//! The spec is explicit that this system has exactly one thread of control:
//! there is no preemption and no shared-memory concurrency, only a queue of
//! tasks that runs "after the current call stack unwinds." A multi-threaded
//! executor would make the ordering guarantees in the spec (deferred
//! `readable`/`end`, single-flight reads) expensive to uphold for no benefit,
//! so this is a small bespoke microtask queue rather than a pull from
//! `tokio`, matching how the teacher abstracts task spawning behind its own
//! `web_async::spawn_named` wrapper instead of calling `tokio::spawn` at each
//! call site.

use std::cell::RefCell;
use std::collections::VecDeque;

type Task = Box<dyn FnOnce()>;

thread_local! {
	static QUEUE: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
}

/// Schedule `task` to run after the current call stack unwinds, but before
/// control returns to whatever eventually calls [`drain`].
pub fn schedule<F>(task: F)
where
	F: FnOnce() + 'static,
{
	QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(task)));
}

/// Run every queued task, including any tasks that scheduling itself
/// schedules, until the queue is empty.
///
/// This is the crate's stand-in for "let the event loop tick": production
/// code calls it whenever it needs the effects of a `read`/`close`/`destroy`
/// call to have fully settled (e.g. before asserting on emitted items in a
/// test), and the flow-mode drain loop relies on it to deliver `data` events
/// eagerly.
pub fn drain() {
	loop {
		let next = QUEUE.with(|queue| queue.borrow_mut().pop_front());
		match next {
			Some(task) => task(),
			None => break,
		}
	}
}

/// True if there is no pending deferred work.
pub fn is_idle() -> bool {
	QUEUE.with(|queue| queue.borrow().is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;
	use std::rc::Rc;

	#[test]
	fn tasks_run_in_fifo_order() {
		let order = Rc::new(RefCell::new(Vec::new()));
		for i in 0..3 {
			let order = order.clone();
			schedule(move || order.borrow_mut().push(i));
		}
		drain();
		assert_eq!(*order.borrow(), vec![0, 1, 2]);
	}

	#[test]
	fn tasks_scheduled_during_drain_still_run() {
		let count = Rc::new(Cell::new(0));
		let inner = count.clone();
		schedule(move || {
			inner.set(inner.get() + 1);
			let inner2 = inner.clone();
			schedule(move || inner2.set(inner2.get() + 1));
		});
		drain();
		assert_eq!(count.get(), 2);
		assert!(is_idle());
	}
}
