//! Shared source-binding plumbing for the transform layer (spec §4.T):
//! wiring a destination's buffered engine to the single source it reads
//! from, and splicing a finite or async sequence into a destination handle
//! (used by `simple_transform`'s `prepend`/`append`).
//!
//! Both `simple_transform` and `multi_transform` build their own
//! [`crate::produce::Strategy`] for the actual per-item work and call
//! [`bind_source`] once, right after constructing their engine, to get the
//! lifecycle wiring the spec's "T" layer describes for free.

use std::rc::Rc;

use crate::handle::IterHandle;
use crate::produce::{BufIter, Done, Strategy};

/// Subscribe a transform's destination engine to its single source, per
/// spec §4.T:
///
/// - source `readable` kicks the engine to retry production;
/// - source `end` closes the destination gracefully (`_close_when_done`);
/// - source `error` re-emits on the destination;
/// - once the destination itself ends, the source's destination slot is
///   released and, unless `destroy_source` is false, the source is torn
///   down — whether it was already finished (a no-op) or abandoned early
///   (e.g. a `take` that stopped reading before the source ran dry).
///
/// Does nothing if `source` has already ended — the caller is expected to
/// close the destination immediately in that case instead (spec: "if
/// source is already ended, close self").
pub(crate) fn bind_source<S: 'static, D: 'static, Strat: Strategy<D>>(
	source: &IterHandle<S>,
	engine: &BufIter<D, Strat>,
	destroy_source: bool,
) {
	source.attach_single_destination();

	let kick = engine.share();
	source.on_readable(move || kick.kick());

	let destination_for_end = engine.handle();
	source.on_end(move || destination_for_end.close());

	let destination_for_error = engine.handle();
	source.on_error(move |err| destination_for_error.emit_error(err));

	let source_for_detach = source.share();
	engine.handle().on_end(move || {
		source_for_detach.detach_single_destination();
		if destroy_source {
			source_for_detach.destroy(None);
		}
	});
}

/// Drain every item `src` ever produces into `dst`, calling `done` exactly
/// once `src` ends. Used for `prepend` (during a simple transform's
/// `begin`) and `append` (during its `flush`): both splice a secondary
/// iterator's items into the main output stream ahead of the transform's
/// own production.
///
/// `src` is read directly rather than subscribed via `data`, so no `Clone`
/// bound on the item type is needed.
pub(crate) fn drain_into<D: 'static>(src: IterHandle<D>, dst: IterHandle<D>, done: Done) {
	let pump: Rc<dyn Fn()> = {
		let src = src.share();
		let dst = dst.share();
		Rc::new(move || {
			while let Some(item) = src.read() {
				dst.push(item);
			}
		})
	};
	pump();
	if src.state().is_done() {
		done.call();
		return;
	}
	let pump_on_readable = pump.clone();
	src.on_readable(move || pump_on_readable());
	let pump_on_end = pump.clone();
	let done = std::cell::RefCell::new(Some(done));
	src.on_end(move || {
		pump_on_end();
		if let Some(done) = done.borrow_mut().take() {
			done.call();
		}
	});
}
