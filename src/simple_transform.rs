//! Simple transform (spec §4.ST): the `map`/`filter`/`offset`/`limit`/
//! `prepend`/`append`/async-`transform`/`optional` bundle, all operating on
//! a single input/output type `S`.
//!
//! Rust's type system is the reason this is `TransformOptions<S>` and not
//! `TransformOptions<S, D>`: the spec's `optional` knob substitutes the
//! *original* source item when `map` yields nothing, which only
//! typechecks when the output type equals the input type. A type-changing
//! `map` is its own operator ([`crate::Iter::map`]) built directly on
//! [`crate::produce::BufIter`] without any of this machinery; see
//! `DESIGN.md` for the full rationale.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::Error;
use crate::handle::IterHandle;
use crate::produce::{BufIter, Done, Strategy};
use crate::transform;

type MapFn<S> = Rc<dyn Fn(&S) -> Option<S>>;
type TransformFn<S> = Rc<dyn Fn(S, &Pusher<S>, Rc<dyn Fn()>)>;

/// Options for [`crate::Iter::transform`].
pub struct TransformOptions<S> {
	pub max_buffer_size: Option<usize>,
	pub auto_start: bool,
	pub offset: usize,
	pub limit: Option<usize>,
	pub filter: Rc<dyn Fn(&S) -> bool>,
	pub map: Option<MapFn<S>>,
	pub transform: Option<TransformFn<S>>,
	pub optional: bool,
	pub prepend: Option<IterHandle<S>>,
	pub append: Option<IterHandle<S>>,
	pub destroy_source: bool,
}

impl<S: 'static> Default for TransformOptions<S> {
	fn default() -> Self {
		TransformOptions {
			max_buffer_size: Some(4),
			auto_start: true,
			offset: 0,
			limit: None,
			filter: Rc::new(|_| true),
			map: None,
			transform: None,
			optional: false,
			prepend: None,
			append: None,
			destroy_source: true,
		}
	}
}

struct Config<S> {
	source: IterHandle<S>,
	filter: Rc<dyn Fn(&S) -> bool>,
	map: Option<MapFn<S>>,
	transform: Option<TransformFn<S>>,
	optional: bool,
	offset: Cell<usize>,
	limit: Cell<Option<usize>>,
	prepend: RefCell<Option<IterHandle<S>>>,
	append: RefCell<Option<IterHandle<S>>>,
	destroy_source: bool,
}

/// Something a [`Config`]'s `map`/`transform` closures push through,
/// instead of the engine's own per-call `push` callback — both closures
/// may run across an arbitrary number of scheduler ticks (an async
/// `transform` especially), well past the lifetime of any one
/// `Strategy::read` invocation, so they need a push handle that outlives
/// that call and still shares the one `limit` counter every `Pusher`
/// handed out over this transform's lifetime decrements.
pub struct Pusher<S> {
	handle: IterHandle<S>,
	config: Rc<Config<S>>,
	remaining: Rc<Cell<usize>>,
}

impl<S: 'static> Pusher<S> {
	/// Emit `item`. Decrements the transform's remaining `limit` (closing
	/// the destination once it hits zero) and the current `read` call's
	/// demand counter. A `transform` closure that pushes more than one item
	/// per source item (spec scenario 5) may run the buffer transiently
	/// over `max_buffer_size` — the spec explicitly tolerates that for a
	/// producer that doesn't respect the requested count.
	pub fn push(&self, item: S) {
		self.handle.push(item);
		self.remaining.set(self.remaining.get().saturating_sub(1));
		if let Some(n) = self.config.limit.get() {
			let n = n.saturating_sub(1);
			self.config.limit.set(Some(n));
			if n == 0 {
				self.handle.close();
			}
		}
	}
}

pub(crate) struct SimpleTransform<S> {
	config: Rc<Config<S>>,
}

impl<S: 'static> Strategy<S> for SimpleTransform<S> {
	fn begin(&mut self, handle: &IterHandle<S>, done: Done) {
		match self.config.prepend.borrow_mut().take() {
			Some(prepend) => transform::drain_into(prepend, handle.share(), done),
			None => done.call(),
		}
	}

	fn read(&mut self, handle: &IterHandle<S>, count: usize, _push: &mut dyn FnMut(S), done: Done) {
		step(self.config.clone(), handle.share(), Rc::new(Cell::new(count)), done);
	}

	fn flush(&mut self, handle: &IterHandle<S>, _push: &mut dyn FnMut(S), done: Done) {
		match self.config.append.borrow_mut().take() {
			Some(append) => transform::drain_into(append, handle.share(), done),
			None => done.call(),
		}
	}

	fn destroy(&mut self, cause: Option<Error>) {
		if self.config.destroy_source {
			self.config.source.destroy(cause);
		}
	}
}

/// The `_read`/`_read_and_transform` loop (spec §4.T/§4.ST), driven as a
/// trampoline of `step` calls rather than a plain loop once an async
/// `transform` is involved: the closure it's handed as `next` may run on
/// this stack (a `transform` that calls `done` synchronously) or on a
/// later scheduler tick, and either way it just calls `step` again.
fn step<S: 'static>(config: Rc<Config<S>>, handle: IterHandle<S>, remaining: Rc<Cell<usize>>, done: Done) {
	loop {
		if config.limit.get() == Some(0) {
			handle.close();
			done.call();
			return;
		}
		if remaining.get() == 0 || handle.state().is_closed() {
			done.call();
			return;
		}
		let item = match config.source.read() {
			Some(item) => item,
			None => {
				done.call();
				return;
			}
		};
		if !(config.filter)(&item) {
			continue;
		}
		if config.offset.get() > 0 {
			config.offset.set(config.offset.get() - 1);
			continue;
		}

		if let Some(transform_fn) = config.transform.clone() {
			let pusher = Pusher {
				handle: handle.share(),
				config: config.clone(),
				remaining: remaining.clone(),
			};
			let config2 = config.clone();
			let handle2 = handle.share();
			let remaining2 = remaining.clone();
			let done2 = done.clone();
			let next: Rc<dyn Fn()> = Rc::new(move || {
				step(config2.clone(), handle2.share(), remaining2.clone(), done2.clone());
			});
			transform_fn(item, &pusher, next);
			return;
		}

		let pusher = Pusher {
			handle: handle.share(),
			config: config.clone(),
			remaining: remaining.clone(),
		};
		match &config.map {
			None => pusher.push(item),
			Some(map_fn) => match map_fn(&item) {
				Some(mapped) => pusher.push(mapped),
				None if config.optional => pusher.push(item),
				None => {}
			},
		}
	}
}

pub(crate) fn simple_transform<S: 'static>(source: IterHandle<S>, opts: TransformOptions<S>) -> IterHandle<S> {
	let destroy_source = opts.destroy_source;
	let config = Rc::new(Config {
		source: source.share(),
		filter: opts.filter,
		map: opts.map,
		transform: opts.transform,
		optional: opts.optional,
		offset: Cell::new(opts.offset),
		limit: Cell::new(opts.limit),
		prepend: RefCell::new(opts.prepend),
		append: RefCell::new(opts.append),
		destroy_source,
	});

	let engine = BufIter::new(SimpleTransform { config }, opts.max_buffer_size, opts.auto_start);
	let destination = engine.handle();

	if source.state().is_done() {
		destination.close();
	} else {
		transform::bind_source(&source, &engine, destroy_source);
	}

	destination
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::producers::from_array;
	use crate::scheduler;

	fn collect<S: 'static>(h: &IterHandle<S>) -> Vec<S> {
		scheduler::drain();
		let mut out = Vec::new();
		while let Some(item) = h.read() {
			out.push(item);
			scheduler::drain();
		}
		out
	}

	#[test]
	fn map_only_transform_shifts_every_item() {
		let src = from_array(vec![1, 2, 3]);
		let out = simple_transform(
			src,
			TransformOptions {
				map: Some(Rc::new(|x: &i32| Some(x + 1))),
				..Default::default()
			},
		);
		assert_eq!(collect(&out), vec![2, 3, 4]);
	}

	#[test]
	fn offset_and_limit_with_prepend_and_append() {
		let src = from_array(vec![1, 2, 3]);
		let out = simple_transform(
			src,
			TransformOptions {
				offset: 1,
				limit: Some(1),
				prepend: Some(from_array(vec![9])),
				append: Some(from_array(vec![8])),
				..Default::default()
			},
		);
		assert_eq!(collect(&out), vec![9, 2, 8]);
	}

	#[test]
	fn filter_then_square() {
		let src = from_array(vec![1, 2, 3]);
		let out = simple_transform(
			src,
			TransformOptions {
				filter: Rc::new(|x: &i32| x % 2 == 1),
				map: Some(Rc::new(|x: &i32| Some(x * x))),
				..Default::default()
			},
		);
		assert_eq!(collect(&out), vec![1, 9]);
	}

	#[test]
	fn async_transform_pushes_multiple_items_per_source_item() {
		let src = from_array(vec![1, 2]);
		let out = simple_transform(
			src,
			TransformOptions {
				transform: Some(Rc::new(|x: i32, pusher: &Pusher<i32>, next: Rc<dyn Fn()>| {
					pusher.push(x);
					pusher.push(x * 10);
					next();
				})),
				..Default::default()
			},
		);
		assert_eq!(collect(&out), vec![1, 10, 2, 20]);
	}

	#[test]
	fn limit_zero_yields_nothing() {
		let src = from_array(vec![1, 2, 3]);
		let out = simple_transform(src, TransformOptions { limit: Some(0), ..Default::default() });
		assert_eq!(collect(&out), Vec::<i32>::new());
	}

	#[test]
	fn optional_map_falls_back_to_original_item() {
		let src = from_array(vec![1, 2, 3, 4]);
		let out = simple_transform(
			src,
			TransformOptions {
				map: Some(Rc::new(|x: &i32| if x % 2 == 0 { Some(x * 100) } else { None })),
				optional: true,
				..Default::default()
			},
		);
		assert_eq!(collect(&out), vec![1, 200, 3, 400]);
	}

	#[test]
	fn offset_past_source_length_yields_empty() {
		let src = from_array(vec![1, 2, 3]);
		let out = simple_transform(src, TransformOptions { offset: 10, ..Default::default() });
		assert_eq!(collect(&out), Vec::<i32>::new());
	}

	#[test]
	fn empty_source_through_transform_yields_empty() {
		let src: IterHandle<i32> = from_array(Vec::new());
		let out = simple_transform(
			src,
			TransformOptions {
				map: Some(Rc::new(|x: &i32| Some(x + 1))),
				..Default::default()
			},
		);
		assert_eq!(collect(&out), Vec::<i32>::new());
	}
}
