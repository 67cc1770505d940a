//! Type-changing `map` (spec §4.T's default `transform`, generalized past
//! the same-type case).
//!
//! Rust's type system is why this isn't folded into `simple_transform`'s
//! `TransformOptions<S>`: that layer's `optional` knob substitutes the
//! *original* source item when `map` yields nothing, which only typechecks
//! when the output type equals the input type. `map` is the operator for
//! the case where the output type `D` can differ from `S` — it has no
//! `filter`/`offset`/`limit`/`prepend`/`append`/`optional` knobs of its own;
//! chain `.filter()` or `.transform()` around it for those. See
//! `DESIGN.md`.

use std::rc::Rc;

use crate::error::Error;
use crate::handle::IterHandle;
use crate::produce::{BufIter, Done, Strategy};
use crate::transform;

struct Map<S, D> {
	source: IterHandle<S>,
	f: Rc<dyn Fn(S) -> D>,
	destroy_source: bool,
}

impl<S: 'static, D: 'static> Strategy<D> for Map<S, D> {
	fn read(&mut self, _handle: &IterHandle<D>, count: usize, push: &mut dyn FnMut(D), done: Done) {
		for _ in 0..count {
			match self.source.read() {
				Some(item) => push((self.f)(item)),
				None => break,
			}
		}
		done.call();
	}

	fn destroy(&mut self, cause: Option<Error>) {
		if self.destroy_source {
			self.source.destroy(cause);
		}
	}
}

pub(crate) fn map<S: 'static, D: 'static>(
	source: IterHandle<S>,
	f: impl Fn(S) -> D + 'static,
	max_buffer_size: Option<usize>,
	auto_start: bool,
	destroy_source: bool,
) -> IterHandle<D> {
	let strategy = Map { source: source.share(), f: Rc::new(f), destroy_source };
	let engine = BufIter::new(strategy, max_buffer_size, auto_start);
	let destination = engine.handle();
	if source.state().is_done() {
		destination.close();
	} else {
		transform::bind_source(&source, &engine, destroy_source);
	}
	destination
}
