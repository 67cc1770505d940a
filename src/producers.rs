//! Trivial producers (spec §4.P): `Empty`, `Singleton`, `Array`,
//! `IntegerRange`, and `wrap` over an externally supplied pull function.
//!
//! None of these need the buffered engine in `produce` — they have nothing
//! to wait on. Each one just pushes whatever it has straight into a fresh
//! [`IterHandle`] and closes, leaning on the base contract (§4.B) for
//! `read`/events/state for free.

use crate::handle::IterHandle;
use crate::state::State;

/// An already-exhausted iterator. Ends on the next scheduler drain so a
/// listener attached synchronously after construction still observes it.
pub fn empty<T: 'static>() -> IterHandle<T> {
	let handle = IterHandle::new();
	handle.advance_state(State::Ended);
	let deferred = handle.share();
	crate::scheduler::schedule(move || deferred.emit_end());
	handle
}

/// An iterator over zero or one item. `None` behaves exactly like
/// [`empty`]; `Some(item)` yields `item` then ends.
pub fn single<T: 'static>(item: Option<T>) -> IterHandle<T> {
	let handle = IterHandle::new();
	if let Some(item) = item {
		handle.push(item);
	}
	handle.close();
	handle
}

/// An iterator over an owned sequence of items, in order.
pub fn from_array<T: 'static>(items: impl IntoIterator<Item = T>) -> IterHandle<T> {
	let handle = IterHandle::new();
	for item in items {
		handle.push(item);
	}
	handle.close();
	handle
}

/// Options for [`integer_range`]. `end` of `None` means unbounded in the
/// direction `step` moves.
#[derive(Debug, Clone, Copy)]
pub struct IntegerRangeOptions {
	pub start: i64,
	pub end: Option<i64>,
	pub step: i64,
}

impl Default for IntegerRangeOptions {
	fn default() -> Self {
		IntegerRangeOptions { start: 0, end: None, step: 1 }
	}
}

/// A lazily-advancing integer sequence. Bounded ranges are expanded eagerly
/// at construction (there is no async production here to spread the work
/// across ticks); `step == 0` is a programming error, matching the spec's
/// treatment of other malformed construction arguments as fatal rather than
/// a silently-empty iterator.
pub fn integer_range(opts: IntegerRangeOptions) -> IterHandle<i64> {
	assert!(opts.step != 0, "integer_range: step must not be 0");
	let handle = IterHandle::new();
	let mut current = opts.start;
	match opts.end {
		Some(end) => {
			if opts.step > 0 {
				while current <= end {
					handle.push(current);
					current += opts.step;
				}
			} else {
				while current >= end {
					handle.push(current);
					current += opts.step;
				}
			}
		}
		None => {
			// Unbounded ranges can't be expanded eagerly; fall back to wrap's
			// pull-on-demand model so `read()` keeps advancing indefinitely.
			handle.close();
			return wrap_unbounded_integer_range(opts.start, opts.step);
		}
	}
	handle.close();
	handle
}

fn wrap_unbounded_integer_range(start: i64, step: i64) -> IterHandle<i64> {
	let mut current = start;
	wrap(move || {
		let item = current;
		current += step;
		Some(item)
	})
}

/// Adapt an externally supplied pull function into the base contract.
/// `pull` returning `None` for the first time closes the iterator.
/// Each call eagerly drains everything `pull` has ready right now, since
/// there is no async boundary to defer across; a `pull` that legitimately
/// blocks belongs behind the buffered engine (`produce::Strategy`)
/// instead.
pub fn wrap<T: 'static>(mut pull: impl FnMut() -> Option<T> + 'static) -> IterHandle<T> {
	let handle = IterHandle::new();
	while let Some(item) = pull() {
		handle.push(item);
	}
	handle.close();
	handle
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduler;

	#[test]
	fn empty_ends_on_next_drain() {
		let h: IterHandle<i32> = empty();
		assert_eq!(h.state(), State::Ended);
		let ended = std::rc::Rc::new(std::cell::Cell::new(false));
		let ended2 = ended.clone();
		h.on_end(move || ended2.set(true));
		scheduler::drain();
		assert!(ended.get());
	}

	#[test]
	fn singleton_of_none_behaves_like_empty() {
		let h: IterHandle<i32> = single(None);
		scheduler::drain();
		assert_eq!(h.read(), None);
		assert_eq!(h.state(), State::Ended);
	}

	#[test]
	fn singleton_yields_then_ends() {
		let h = single(Some(7));
		assert_eq!(h.read(), Some(7));
		scheduler::drain();
		assert_eq!(h.read(), None);
		assert_eq!(h.state(), State::Ended);
	}

	#[test]
	fn from_array_yields_in_order() {
		let h = from_array(vec![1, 2, 3]);
		assert_eq!(h.read(), Some(1));
		assert_eq!(h.read(), Some(2));
		assert_eq!(h.read(), Some(3));
		scheduler::drain();
		assert_eq!(h.read(), None);
	}

	#[test]
	fn from_array_of_empty_closes_immediately() {
		let h: IterHandle<i32> = from_array(Vec::new());
		scheduler::drain();
		assert_eq!(h.state(), State::Ended);
	}

	#[test]
	fn integer_range_descending_is_inclusive_of_end() {
		let h = integer_range(IntegerRangeOptions { start: 5, end: Some(3), step: -1 });
		let mut items = Vec::new();
		while let Some(item) = h.read() {
			items.push(item);
		}
		assert_eq!(items, vec![5, 4, 3]);
	}

	#[test]
	fn integer_range_empty_when_direction_disagrees_with_bounds() {
		let h = integer_range(IntegerRangeOptions { start: 5, end: Some(3), step: 1 });
		scheduler::drain();
		assert_eq!(h.read(), None);
		assert_eq!(h.state(), State::Ended);
	}

	#[test]
	fn integer_range_unbounded_advances_on_each_read() {
		let h = integer_range(IntegerRangeOptions { start: 0, end: None, step: 1 });
		assert_eq!(h.read(), Some(0));
		assert_eq!(h.read(), Some(1));
		assert_eq!(h.read(), Some(2));
	}

	#[test]
	fn wrap_drains_pull_fn_until_none() {
		let mut values = vec![3, 2, 1].into_iter();
		let h = wrap(move || values.next());
		assert_eq!(h.read(), Some(3));
		assert_eq!(h.read(), Some(2));
		assert_eq!(h.read(), Some(1));
		scheduler::drain();
		assert_eq!(h.read(), None);
		assert_eq!(h.state(), State::Ended);
	}
}
