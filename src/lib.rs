//! `millrace`: a pull-based asynchronous iterator library with buffering,
//! backpressure and fan-out.
//!
//! The system is a tower of layers, each built entirely on the public
//! contract of the one beneath it (see each module's docs for its layer):
//!
//! - [`event`] — the per-event listener bus every [`Iter`] is wired through.
//! - [`state`] — the forward-only lifecycle state machine.
//! - [`handle`] — the base iterator contract: state, buffer, properties,
//!   events. Everything above this is built by driving its `push`/`close`/
//!   `destroy` primitives.
//! - [`producers`] — `empty`/`single`/`from_array`/`integer_range`/`wrap`.
//! - [`produce`] — the buffered generator engine (`BufIter`/`Strategy`)
//!   every non-trivial operator is built on.
//! - [`transform`] — shared source-binding plumbing for the operators below.
//! - [`map`], [`simple_transform`], [`multi_transform`], [`fork`] — the
//!   operator implementations themselves.
//!
//! [`Iter<T>`] is the single public entry point: a thin, cheaply-shared
//! handle with every operator attached as a method. Nothing outside this
//! crate ever sees [`handle::IterHandle`] directly.

mod error;
mod event;
mod fork;
mod handle;
mod map;
mod multi_transform;
mod produce;
mod producers;
mod properties;
mod scheduler;
mod simple_transform;
mod state;
mod transform;

pub use error::{Error, Result};
pub use event::ListenerId;
pub use producers::IntegerRangeOptions;
pub use properties::PropertyValue;
pub use simple_transform::{Pusher, TransformOptions};
pub use state::State;

use handle::IterHandle;

/// A pull-based asynchronous iterator.
///
/// Cloning the underlying handle is deliberately not offered — see
/// [`handle::IterHandle`]'s docs — so a caller who wants multiple independent
/// readers of the same sequence reaches for [`Iter::fork`] instead, which
/// does the replay bookkeeping `Clone` alone never could.
pub struct Iter<T>(IterHandle<T>);

impl<T: 'static> Iter<T> {
	fn from_handle(handle: IterHandle<T>) -> Self {
		Iter(handle)
	}

	/// Pull the next item, if one is available right now. Returns `None`
	/// both when nothing is currently ready and once the iterator has
	/// permanently ended — check [`Iter::done`] to tell those apart.
	pub fn read(&self) -> Option<T> {
		self.0.read()
	}

	/// The `readable` hint: `true` means a `read()` right now *might* yield
	/// an item.
	pub fn readable(&self) -> bool {
		self.0.readable()
	}

	pub fn state(&self) -> State {
		self.0.state()
	}

	pub fn closed(&self) -> bool {
		self.0.state().is_closed()
	}

	pub fn ended(&self) -> bool {
		self.0.state().is_ended()
	}

	pub fn destroyed(&self) -> bool {
		self.0.state().is_destroyed()
	}

	pub fn done(&self) -> bool {
		self.0.state().is_done()
	}

	/// The cause passed to [`Iter::destroy`], if this iterator was destroyed
	/// with one.
	pub fn destroy_cause(&self) -> Option<Error> {
		self.0.destroy_cause()
	}

	/// Request termination. Already-buffered items still drain through
	/// subsequent `read()` calls; `end` fires once they do.
	pub fn close(&self) {
		self.0.close();
	}

	/// Force termination immediately, discarding anything still buffered.
	pub fn destroy(&self, cause: Option<Error>) {
		self.0.destroy(cause);
	}

	pub fn on_readable(&self, f: impl FnMut() + 'static) -> ListenerId {
		self.0.on_readable(f)
	}

	pub fn off_readable(&self, id: ListenerId) {
		self.0.off_readable(id);
	}

	/// Subscribe to flow mode: `f` fires for every item as soon as it's
	/// produced, instead of waiting on explicit `read()` calls.
	pub fn on_data(&self, f: impl FnMut(&T) + 'static) -> ListenerId {
		self.0.on_data(f)
	}

	pub fn off_data(&self, id: ListenerId) {
		self.0.off_data(id);
	}

	pub fn on_end(&self, f: impl FnMut() + 'static) -> ListenerId {
		self.0.on_end(f)
	}

	pub fn off_end(&self, id: ListenerId) {
		self.0.off_end(id);
	}

	pub fn on_error(&self, f: impl FnMut(&Error) + 'static) -> ListenerId {
		self.0.on_error(f)
	}

	pub fn off_error(&self, id: ListenerId) {
		self.0.off_error(id);
	}

	/// Attach `on_data`/`on_end` together; `on_end` runs at most once.
	pub fn for_each(&self, on_data: impl FnMut(&T) + 'static, on_end: impl FnOnce() + 'static) {
		self.0.for_each(on_data, on_end);
	}

	/// Deferred-get a named property: `cb` fires, on a later scheduler tick,
	/// with the value once one is set (immediately if it already is).
	pub fn get_property(&self, name: &str, cb: impl FnOnce(PropertyValue) + 'static) {
		self.0.get_property(name, cb);
	}

	pub fn set_property(&self, name: impl Into<String>, value: PropertyValue) {
		self.0.set_property(name, value);
	}

	pub fn set_properties(&self, values: impl IntoIterator<Item = (String, PropertyValue)>) {
		self.0.set_properties(values);
	}

	pub fn properties_snapshot(&self) -> std::collections::HashMap<String, PropertyValue> {
		self.0.properties_snapshot()
	}

	/// Mirror `names` from `source` onto `self`: each name is looked up via
	/// [`Iter::get_property`] on `source` and, once resolved, set on `self`
	/// with [`Iter::set_property`]. Names `source` never sets simply never
	/// fire — there is no timeout or default.
	pub fn copy_properties<U: 'static>(&self, names: &'static [&'static str], source: &Iter<U>) {
		handle::copy_properties(names, &source.0, &self.0);
	}

	/// Apply `f` to every item, changing the item type from `T` to `D`.
	/// The type-changing counterpart to [`Iter::transform`]'s same-type
	/// `map` knob — see `map`'s module docs for why the two are split.
	pub fn map<D: 'static>(self, f: impl Fn(T) -> D + 'static) -> Iter<D> {
		Iter::from_handle(map::map(self.0, f, None, true, true))
	}

	/// Keep only the items for which `predicate` returns `true`.
	pub fn filter(self, predicate: impl Fn(&T) -> bool + 'static) -> Iter<T> {
		self.transform(TransformOptions { filter: std::rc::Rc::new(predicate), ..Default::default() })
	}

	/// The general same-type transform: filter/map/offset/limit/prepend/
	/// append/async-transform/optional, all in one pass. See
	/// [`TransformOptions`].
	pub fn transform(self, opts: TransformOptions<T>) -> Iter<T> {
		Iter::from_handle(simple_transform::simple_transform(self.0, opts))
	}

	/// Splice `items` ahead of this iterator's own production.
	pub fn prepend(self, items: Iter<T>) -> Iter<T> {
		self.transform(TransformOptions { prepend: Some(items.0), ..Default::default() })
	}

	/// Splice `items` after this iterator's own production has ended.
	pub fn append(self, items: Iter<T>) -> Iter<T> {
		self.transform(TransformOptions { append: Some(items.0), ..Default::default() })
	}

	/// Splice `before` ahead and `after` behind this iterator's own items —
	/// `prepend` and `append` combined in one transform.
	pub fn surround(self, before: Iter<T>, after: Iter<T>) -> Iter<T> {
		self.transform(TransformOptions { prepend: Some(before.0), append: Some(after.0), ..Default::default() })
	}

	/// Drop the first `n` items.
	pub fn skip(self, n: usize) -> Iter<T> {
		self.transform(TransformOptions { offset: n, ..Default::default() })
	}

	/// Keep only the first `n` items.
	pub fn take(self, n: usize) -> Iter<T> {
		self.transform(TransformOptions { limit: Some(n), ..Default::default() })
	}

	/// Keep items at positions `start..=end`, inclusive of both ends —
	/// `skip(start).take(end - start + 1)` in one transform. Matches the
	/// spec's testable property `skip(m).take(n) == range(m, m + n - 1)`.
	pub fn range(self, start: usize, end: usize) -> Iter<T> {
		let limit = end.saturating_sub(start).saturating_add(1);
		self.transform(TransformOptions { offset: start, limit: Some(limit), ..Default::default() })
	}

	/// Expand every item into its own sub-iterator via `make`, concatenating
	/// the sub-iterators in source order. Never starts sub-iterator *i+1*
	/// before sub-iterator *i* has fully drained.
	pub fn flat_map<D: 'static>(self, make: impl Fn(T) -> Iter<D> + 'static) -> Iter<D> {
		Iter::from_handle(multi_transform::flat_map(self.0, move |item| make(item).0, None, true, true))
	}

	/// Register a new, independent reader of this iterator's sequence. Every
	/// fork sees every item this source ever produces, replayed from a
	/// shared history, regardless of how far the source (or its other
	/// forks) have already advanced. Named `fork`, not `clone` — see
	/// [`handle::IterHandle`]'s docs.
	pub fn fork(&self) -> Iter<T>
	where
		T: Clone,
	{
		Iter::from_handle(fork::fork(&self.0))
	}
}

/// An already-exhausted iterator.
pub fn empty<T: 'static>() -> Iter<T> {
	Iter::from_handle(producers::empty())
}

/// An iterator over zero or one item.
pub fn single<T: 'static>(item: Option<T>) -> Iter<T> {
	Iter::from_handle(producers::single(item))
}

/// An iterator over an owned sequence of items, in order.
pub fn from_array<T: 'static>(items: impl IntoIterator<Item = T>) -> Iter<T> {
	Iter::from_handle(producers::from_array(items))
}

/// A (possibly unbounded) arithmetic sequence of integers.
pub fn integer_range(opts: IntegerRangeOptions) -> Iter<i64> {
	Iter::from_handle(producers::integer_range(opts))
}

/// Adapt an externally supplied pull function into an [`Iter`].
pub fn wrap<T: 'static>(pull: impl FnMut() -> Option<T> + 'static) -> Iter<T> {
	Iter::from_handle(producers::wrap(pull))
}

/// Run every deferred task until none remain. Production code built on
/// [`Iter`] never needs this directly — the scheduler drains itself between
/// external events — but tests (and anything driving the crate from a
/// synchronous `main`) use it to observe a `read`/`close`/`destroy` call's
/// effects settle.
pub fn drain() {
	scheduler::drain();
}

#[cfg(test)]
mod tests {
	use super::*;

	fn collect<T: 'static>(it: &Iter<T>) -> Vec<T> {
		drain();
		let mut out = Vec::new();
		while let Some(item) = it.read() {
			out.push(item);
			drain();
		}
		out
	}

	#[test]
	fn map_then_filter_then_take() {
		let out = from_array(1..=10)
			.map(|x| x * 2)
			.filter(|x| x % 3 == 0)
			.take(2);
		assert_eq!(collect(&out), vec![6, 12]);
	}

	#[test]
	fn skip_take_equals_inclusive_range() {
		let a = from_array(0..10).skip(2).take(3);
		let b = from_array(0..10).range(2, 4);
		assert_eq!(collect(&a), collect(&b));
	}

	#[test]
	fn flat_map_expands_each_item() {
		let out = from_array(vec![1, 2, 3]).flat_map(|x| from_array(vec![x, x]));
		assert_eq!(collect(&out), vec![1, 1, 2, 2, 3, 3]);
	}

	#[test]
	fn fork_gives_two_independent_readers_of_the_same_sequence() {
		let src = from_array(vec![1, 2, 3]);
		let a = src.fork();
		let b = src.fork();
		assert_eq!(collect(&a), vec![1, 2, 3]);
		assert_eq!(collect(&b), vec![1, 2, 3]);
	}

	#[test]
	fn surround_splices_before_and_after() {
		let out = from_array(vec![2]).surround(from_array(vec![1]), from_array(vec![3]));
		assert_eq!(collect(&out), vec![1, 2, 3]);
	}

	#[test]
	fn integer_range_producer_is_reachable_through_the_public_facade() {
		let out = integer_range(IntegerRangeOptions { start: 0, end: Some(4), step: 2 });
		assert_eq!(collect(&out), vec![0, 2, 4]);
	}

	#[test]
	fn copy_properties_mirrors_named_values_from_source() {
		use std::rc::Rc;

		let source = from_array(vec![1, 2, 3]);
		source.set_property("units", Rc::new("meters".to_string()) as PropertyValue);

		let derived: Iter<i32> = from_array(vec![4, 5]);
		derived.copy_properties(&["units", "missing"], &source);
		drain();

		let snapshot = derived.properties_snapshot();
		assert_eq!(
			snapshot.get("units").and_then(|v| v.downcast_ref::<String>()),
			Some(&"meters".to_string())
		);
		assert!(!snapshot.contains_key("missing"));
	}
}
