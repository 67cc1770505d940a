//! The buffered generator core (spec §4.Buf): a bounded buffer fed through
//! an async `begin`/`read`/`flush`/`destroy` protocol by a pluggable
//! [`Strategy`], with a single-flight reading lock.
//!
//! This is the engine `transform`/`simple_transform`/`multi_transform` are
//! built on. The trivial producers in [`crate::producers`] skip it entirely
//! — they have nothing to wait on, so they push straight into a handle and
//! close.
//!
//! The strategy's mutable state (`Rc<RefCell<S>>`) and the engine's control
//! state (`Rc<RefCell<Control<T>>>`, the lock/counters/handle) are separate
//! cells. A strategy call may invoke its `Done` synchronously, before
//! returning control to the engine; if the two were one `RefCell`, that
//! reentrant call would find it still borrowed and panic. Keeping them
//! apart means a `Done` firing mid-call only ever needs the control cell,
//! which nothing else is holding at that moment.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Error;
use crate::handle::IterHandle;
use crate::scheduler;
use crate::state::State;

const READ_BATCH_CAP: usize = 128;

/// A one-shot completion callback passed to every [`Strategy`] method.
///
/// Cloning `Done` shares the same slot rather than duplicating the
/// callback — a strategy that stashes a clone to invoke later (e.g. from a
/// subscribed event) and the original both refer to the same one-shot.
/// Calling it a second time, from any clone, panics: the spec treats a
/// double `done()` as a programming error, not a recoverable condition.
#[derive(Clone)]
pub struct Done(Rc<RefCell<Option<Box<dyn FnOnce()>>>>);

impl Done {
	fn new(cb: impl FnOnce() + 'static) -> Self {
		Done(Rc::new(RefCell::new(Some(Box::new(cb)))))
	}

	pub fn call(&self) {
		let cb = self.0.borrow_mut().take();
		match cb {
			Some(cb) => cb(),
			None => panic!("done callback invoked more than once"),
		}
	}
}

/// How a buffered iterator obtains the items it pushes into its buffer.
///
/// Every method gets a `&IterHandle<T>` alongside its `Done` — strategies
/// that track an upstream source (`transform`, `simple_transform`, ...)
/// need it to call `close()` on themselves once that source ends, which is
/// ordinary application logic, not something the engine can infer on their
/// behalf.
pub trait Strategy<T>: 'static {
	/// Runs once, before the engine transitions out of `Init`. The default
	/// is a no-op that completes immediately.
	fn begin(&mut self, _handle: &IterHandle<T>, done: Done) {
		done.call();
	}

	/// Produce at most `count` items, delivering each through `push`, then
	/// call `done` exactly once. May push fewer than `count` (or zero) and
	/// still call `done` — that just means nothing was available this tick.
	fn read(&mut self, handle: &IterHandle<T>, count: usize, push: &mut dyn FnMut(T), done: Done);

	/// Runs once, when the engine starts a graceful close, to emit any
	/// trailing items (an `append` sequence, for instance) before `end`.
	/// The default is a no-op that completes immediately.
	fn flush(&mut self, _handle: &IterHandle<T>, _push: &mut dyn FnMut(T), done: Done) {
		done.call();
	}

	/// Runs once, when the engine is force-destroyed. No further calls
	/// follow, and there is no `done` to invoke.
	fn destroy(&mut self, _cause: Option<Error>) {}
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Lock {
	Idle,
	Reading,
	Closing,
}

struct Control<T> {
	handle: IterHandle<T>,
	lock: Lock,
	pushed_count: usize,
	max_buffer_size: Option<usize>,
	auto_start: bool,
}

/// The buffered engine itself. Construct one, then hand out [`handle`] to
/// whoever consumes the resulting iterator; the engine keeps itself alive
/// via the scheduler closures it queues, so there is nothing else to hold
/// onto.
///
/// [`handle`]: BufIter::handle
pub struct BufIter<T, S> {
	control: Rc<RefCell<Control<T>>>,
	strategy: Rc<RefCell<S>>,
}

impl<T, S> BufIter<T, S> {
	pub(crate) fn share(&self) -> Self {
		BufIter {
			control: Rc::clone(&self.control),
			strategy: Rc::clone(&self.strategy),
		}
	}

	/// A weak-referencing handle that can ask this engine to retry
	/// production without holding it alive. Strategies that create their
	/// own sub-iterators at runtime (`multi_transform`'s per-item
	/// transformers) and need those sub-iterators to wake the engine back
	/// up use this instead of a strong [`share`](Self::share): a strong
	/// clone stored inside the engine's own strategy would be a
	/// self-reference nothing ever breaks, since there is no external
	/// source/destination termination to release it.
	pub(crate) fn kicker(&self) -> Kicker<T, S> {
		Kicker {
			control: Rc::downgrade(&self.control),
			strategy: Rc::downgrade(&self.strategy),
		}
	}

	/// Direct access to the strategy cell, for builders that need to hand
	/// the strategy its own [`Kicker`] right after construction.
	pub(crate) fn strategy_rc(&self) -> Rc<RefCell<S>> {
		Rc::clone(&self.strategy)
	}
}

pub(crate) struct Kicker<T, S> {
	control: std::rc::Weak<RefCell<Control<T>>>,
	strategy: std::rc::Weak<RefCell<S>>,
}

impl<T, S> Clone for Kicker<T, S> {
	fn clone(&self) -> Self {
		Kicker {
			control: self.control.clone(),
			strategy: self.strategy.clone(),
		}
	}
}

impl<T: 'static, S: Strategy<T>> Kicker<T, S> {
	/// Ask the engine to retry filling its buffer, deferred to the next
	/// scheduler drain. A no-op once the engine has been dropped.
	pub(crate) fn kick(&self) {
		let (Some(control), Some(strategy)) = (self.control.upgrade(), self.strategy.upgrade()) else {
			return;
		};
		let buf = BufIter { control, strategy };
		scheduler::schedule(move || buf.fill_buffer());
	}
}

impl<T: 'static, S: Strategy<T>> BufIter<T, S> {
	/// Build a new buffered iterator over `strategy`. `max_buffer_size` of
	/// `None` means unbounded (a single `read` is still capped at 128
	/// items per tick). The reading lock starts held (`Reading`) across
	/// construction, matching the spec's "starts in `Init` with the lock
	/// held" rule; `init` runs on the next scheduler drain.
	pub fn new(strategy: S, max_buffer_size: Option<usize>, auto_start: bool) -> Self {
		let control = Rc::new(RefCell::new(Control {
			handle: IterHandle::new(),
			lock: Lock::Reading,
			pushed_count: 0,
			max_buffer_size,
			auto_start,
		}));
		let buf = BufIter {
			control,
			strategy: Rc::new(RefCell::new(strategy)),
		};
		let handle = buf.control.borrow().handle.share();
		let read_hook = buf.share();
		handle.set_read_hook(move || read_hook.after_read());
		let close_hook = buf.share();
		handle.set_close_hook(move || close_hook.close_impl());
		let strategy_for_destroy = Rc::clone(&buf.strategy);
		handle.set_destroy_hook(move |cause| strategy_for_destroy.borrow_mut().destroy(cause));
		let init = buf.share();
		scheduler::schedule(move || init.init());
		buf
	}

	/// The handle consumers read from and subscribe to — `read()`/`close()`
	/// on it drive this engine via the hooks installed above.
	pub fn handle(&self) -> IterHandle<T> {
		self.control.borrow().handle.share()
	}

	fn init(&self) {
		let handle = self.control.borrow().handle.share();
		let this = self.share();
		let done = Done::new(move || this.on_begin_done());
		self.strategy.borrow_mut().begin(&handle, done);
	}

	fn on_begin_done(&self) {
		let (handle, auto_start) = {
			let mut control = self.control.borrow_mut();
			control.lock = Lock::Idle;
			(control.handle.share(), control.auto_start)
		};
		handle.advance_state(State::Open);
		if auto_start {
			let this = self.share();
			scheduler::schedule(move || this.fill_buffer());
		} else {
			handle.set_readable(true);
		}
	}

	/// Runs after every `read()` on this engine's handle settles (see the
	/// spec's `read()` step 3): re-arm production if there's room and
	/// nothing is in flight. The "drained and closed -> `end`" half of that
	/// step needs no handling here: `IterHandle::read()` already performs
	/// the `Closed` -> `Ended` transition (and the `end` emission) itself,
	/// synchronously, the moment a read empties a closed buffer.
	fn after_read(&self) {
		let handle = self.control.borrow().handle.share();
		let should_fill = {
			let control = self.control.borrow();
			let under_capacity = control
				.max_buffer_size
				.map(|cap| handle.buffer_len() < cap)
				.unwrap_or(true);
			let idle = control.lock == Lock::Idle;
			let closed = handle.state() >= State::Closing;
			idle && under_capacity && !closed
		};
		if should_fill {
			let this = self.share();
			scheduler::schedule(move || this.fill_buffer());
		}
	}

	fn fill_buffer(&self) {
		let handle = self.control.borrow().handle.share();
		if self.control.borrow().lock != Lock::Idle {
			return;
		}
		if handle.state() >= State::Closing {
			self.complete_close();
			return;
		}
		let needed = {
			let control = self.control.borrow();
			let room = control
				.max_buffer_size
				.map(|cap| cap.saturating_sub(handle.buffer_len()))
				.unwrap_or(READ_BATCH_CAP);
			room.min(READ_BATCH_CAP)
		};
		if needed == 0 {
			return;
		}
		{
			let mut control = self.control.borrow_mut();
			control.pushed_count = 0;
			control.lock = Lock::Reading;
		}
		let this = self.share();
		let push_handle = handle.share();
		let mut push = move |item: T| {
			push_handle.push(item);
			this.control.borrow_mut().pushed_count += 1;
		};
		let this = self.share();
		let done = Done::new(move || this.on_read_done());
		self.strategy.borrow_mut().read(&handle, needed, &mut push, done);
	}

	fn on_read_done(&self) {
		let handle = self.control.borrow().handle.share();
		let (closed, pushed, half_empty) = {
			let mut control = self.control.borrow_mut();
			control.lock = Lock::Idle;
			let closed = handle.state() >= State::Closing;
			let pushed = control.pushed_count > 0;
			let half_empty = control
				.max_buffer_size
				.map(|cap| handle.buffer_len() < cap / 2)
				.unwrap_or(false);
			(closed, pushed, half_empty)
		};
		if closed {
			self.complete_close();
			return;
		}
		if pushed {
			handle.set_readable(true);
			if half_empty {
				let this = self.share();
				scheduler::schedule(move || this.fill_buffer());
			}
		}
	}

	/// Graceful close: synchronous if idle, otherwise deferred to the
	/// in-flight `read` callback. Installed as this engine's handle's close
	/// hook, so ordinary `handle.close()` calls land here.
	fn close_impl(&self) {
		let handle = self.control.borrow().handle.share();
		handle.begin_closing();
		let idle = self.control.borrow().lock == Lock::Idle;
		if idle {
			self.complete_close();
		}
	}

	fn complete_close(&self) {
		let handle = self.control.borrow().handle.share();
		if !handle.advance_state(State::Closed) {
			return;
		}
		{
			let mut control = self.control.borrow_mut();
			control.lock = Lock::Closing;
		}
		let flush_handle = handle.share();
		let mut push = move |item: T| flush_handle.push(item);
		let this = self.share();
		let done = Done::new(move || this.on_flush_done());
		self.strategy.borrow_mut().flush(&handle, &mut push, done);
	}

	fn on_flush_done(&self) {
		let handle = self.control.borrow().handle.share();
		self.control.borrow_mut().lock = Lock::Idle;
		if handle.buffer_len() == 0 {
			let handle = handle.share();
			scheduler::schedule(move || {
				// A concurrent `read()` may have already drained an
				// already-empty buffer and ended the handle itself; only
				// the transition that actually lands gets to emit `end`.
				if handle.advance_state(State::Ended) {
					handle.emit_end();
				}
			});
		}
	}

	pub fn destroy(&self, cause: Option<Error>) {
		let handle = self.control.borrow().handle.share();
		self.strategy.borrow_mut().destroy(cause.clone());
		handle.destroy(cause);
	}

	/// Ask the engine to retry filling its buffer on the next scheduler
	/// drain. Used by [`crate::transform::bind_source`] to wire a source's
	/// `readable` event back to its destination's engine.
	pub(crate) fn kick(&self) {
		let this = self.share();
		scheduler::schedule(move || this.fill_buffer());
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;
	use std::collections::VecDeque;

	struct FromVec(VecDeque<i32>);

	impl Strategy<i32> for FromVec {
		fn read(&mut self, _handle: &IterHandle<i32>, count: usize, push: &mut dyn FnMut(i32), done: Done) {
			for _ in 0..count {
				match self.0.pop_front() {
					Some(item) => push(item),
					None => break,
				}
			}
			done.call();
		}
	}

	#[test]
	fn drains_strategy_then_closes_and_ends() {
		let buf = BufIter::new(FromVec(VecDeque::from([1, 2, 3])), Some(4), true);
		let handle = buf.handle();
		scheduler::drain();
		assert_eq!(handle.read(), Some(1));
		assert_eq!(handle.read(), Some(2));
		assert_eq!(handle.read(), Some(3));
		handle.close();
		scheduler::drain();
		assert_eq!(handle.read(), None);
		assert_eq!(handle.state(), State::Ended);
	}

	#[test]
	fn destroy_discards_buffered_items_and_emits_no_end() {
		let buf = BufIter::new(FromVec(VecDeque::from([1, 2, 3])), Some(4), true);
		let handle = buf.handle();
		scheduler::drain();
		let ended = Rc::new(Cell::new(false));
		let ended2 = ended.clone();
		handle.on_end(move || ended2.set(true));
		buf.destroy(None);
		scheduler::drain();
		assert_eq!(handle.state(), State::Destroyed);
		assert!(!ended.get());
		assert_eq!(handle.read(), None);
	}

	#[test]
	fn single_flight_lock_prevents_overlapping_reads() {
		struct CountConcurrent {
			source: VecDeque<i32>,
			in_flight: Rc<Cell<usize>>,
			max_seen: Rc<Cell<usize>>,
		}
		impl Strategy<i32> for CountConcurrent {
			fn read(&mut self, _handle: &IterHandle<i32>, count: usize, push: &mut dyn FnMut(i32), done: Done) {
				self.in_flight.set(self.in_flight.get() + 1);
				self.max_seen.set(self.max_seen.get().max(self.in_flight.get()));
				for _ in 0..count {
					match self.source.pop_front() {
						Some(item) => push(item),
						None => break,
					}
				}
				self.in_flight.set(self.in_flight.get() - 1);
				done.call();
			}
		}
		let in_flight = Rc::new(Cell::new(0));
		let max_seen = Rc::new(Cell::new(0));
		let buf = BufIter::new(
			CountConcurrent {
				source: VecDeque::from((0..10).collect::<Vec<_>>()),
				in_flight: in_flight.clone(),
				max_seen: max_seen.clone(),
			},
			Some(2),
			true,
		);
		let handle = buf.handle();
		scheduler::drain();
		for _ in 0..10 {
			handle.read();
			scheduler::drain();
		}
		assert_eq!(max_seen.get(), 1);
	}
}
