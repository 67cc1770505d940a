//! Multi-transform (spec §4.MT): `flat_map`. Each source item expands into
//! its own sub-iterator via a factory closure; the engine concatenates
//! those sub-iterators in source order, never starting transformer *i+1*
//! before transformer *i* has fully drained.
//!
//! The spec's `optional` knob for this layer ("if a transformer never
//! produced anything, push the original source item instead") isn't part
//! of this port's public `flat_map`: it requires the sub-iterator's item
//! type to equal the source's, same restriction as `simple_transform`'s
//! `optional`/`map` pairing, and `flat_map` is specifically the operator
//! for the type-changing case. See `DESIGN.md`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::Error;
use crate::handle::IterHandle;
use crate::produce::{BufIter, Done, Kicker, Strategy};
use crate::transform;

type MakeFn<S, D> = Rc<dyn Fn(S) -> IterHandle<D>>;

struct MultiTransform<S, D> {
	source: IterHandle<S>,
	make: MakeFn<S, D>,
	queue: VecDeque<IterHandle<D>>,
	queue_cap: usize,
	destroy_source: bool,
	/// Set once, right after construction (see [`flat_map`]) — `begin`/`read`
	/// run on the scheduler, strictly after the engine exists, so this is
	/// always populated by the time it's needed.
	kicker: Option<Kicker<D, MultiTransform<S, D>>>,
}

impl<S: 'static, D: 'static> MultiTransform<S, D> {
	fn refill(&mut self) {
		while self.queue.len() < self.queue_cap {
			let item = match self.source.read() {
				Some(item) => item,
				None => break,
			};
			let sub = (self.make)(item);
			if let Some(kicker) = self.kicker.clone() {
				sub.on_readable(move || kicker.kick());
			}
			self.queue.push_back(sub);
		}
	}
}

impl<S: 'static, D: 'static> Strategy<D> for MultiTransform<S, D> {
	fn read(&mut self, handle: &IterHandle<D>, count: usize, push: &mut dyn FnMut(D), done: Done) {
		let mut produced = 0;
		loop {
			self.refill();

			let front = match self.queue.front().map(IterHandle::share) {
				Some(front) => front,
				None => {
					if self.source.state().is_done() {
						handle.close();
					}
					done.call();
					return;
				}
			};

			let mut drained = false;
			while produced < count {
				match front.read() {
					Some(item) => {
						push(item);
						produced += 1;
					}
					None => {
						drained = true;
						break;
					}
				}
			}

			if produced >= count {
				done.call();
				return;
			}

			debug_assert!(drained);
			if front.state().is_done() {
				self.queue.pop_front();
				continue;
			}

			// Head transformer is still alive but has nothing ready right
			// now; the ordering guarantee forbids reading ahead into the
			// next queued transformer, so stop and wait for its `readable`
			// kick (or the next consumer-driven read).
			done.call();
			return;
		}
	}

	fn destroy(&mut self, cause: Option<Error>) {
		self.queue.clear();
		if self.destroy_source {
			self.source.destroy(cause);
		}
	}
}

pub(crate) fn flat_map<S: 'static, D: 'static>(
	source: IterHandle<S>,
	make: impl Fn(S) -> IterHandle<D> + 'static,
	max_buffer_size: Option<usize>,
	auto_start: bool,
	destroy_source: bool,
) -> IterHandle<D> {
	let queue_cap = max_buffer_size.unwrap_or(4).max(1);
	let strategy = MultiTransform {
		source: source.share(),
		make: Rc::new(make),
		queue: VecDeque::new(),
		queue_cap,
		destroy_source,
		kicker: None,
	};

	let engine = BufIter::new(strategy, max_buffer_size, auto_start);
	engine.strategy_rc().borrow_mut().kicker = Some(engine.kicker());

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
	use crate::producers::{from_array, single};
	use crate::scheduler;

	fn collect<D: 'static>(h: &IterHandle<D>) -> Vec<D> {
		scheduler::drain();
		let mut out = Vec::new();
		while let Some(item) = h.read() {
			out.push(item);
			scheduler::drain();
		}
		out
	}

	#[test]
	fn flat_map_concatenates_sub_iterators_in_source_order() {
		let src = from_array(vec![1, 2, 3]);
		let out = flat_map(src, |x| from_array(vec![x, x * 10]), None, true, true);
		assert_eq!(collect(&out), vec![1, 10, 2, 20, 3, 30]);
	}

	#[test]
	fn flat_map_default_transformer_is_a_singleton() {
		let src = from_array(vec![1, 2, 3]);
		let out = flat_map(src, |x| single(Some(x)), None, true, true);
		assert_eq!(collect(&out), vec![1, 2, 3]);
	}

	#[test]
	fn flat_map_skips_empty_sub_iterators() {
		let src = from_array(vec![1, 2, 3]);
		let out = flat_map(
			src,
			|x| if x == 2 { from_array(Vec::new()) } else { from_array(vec![x]) },
			None,
			true,
			true,
		);
		assert_eq!(collect(&out), vec![1, 3]);
	}

	#[test]
	fn flat_map_of_empty_source_yields_empty() {
		let src: IterHandle<i32> = from_array(Vec::new());
		let out = flat_map(src, |x| from_array(vec![x]), None, true, true);
		assert_eq!(collect(&out), Vec::<i32>::new());
	}
}
