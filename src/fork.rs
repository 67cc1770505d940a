//! Clone + history (spec §4.C): `fork()` lets many independent consumers
//! replay the same upstream sequence without each re-reading the source.
//!
//! The first `fork()` call on a source installs a [`History`] in the
//! source's destination slot (the same slot an ordinary transform would
//! claim); every later `fork()` call on that source just registers another
//! clone against the existing one. A clone has no buffer of its own — its
//! `read()` goes straight through [`History::read_at`] via
//! [`IterHandle::set_read_override`](crate::handle::IterHandle) — so it
//! never runs through [`crate::produce::BufIter`] at all.
//!
//! Named `fork` rather than the spec's `clone` because `IterHandle`
//! deliberately doesn't implement `std::Clone` (see that module's docs);
//! a method literally named `clone(&self) -> Self` would read as exactly
//! that trait despite doing something very different.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::Error;
use crate::handle::{IterHandle, WeakHandle};
use crate::state::State;

struct CloneSlot<T> {
	handle: WeakHandle<T>,
	position: Rc<Cell<usize>>,
}

pub(crate) struct History<T> {
	source: IterHandle<T>,
	items: RefCell<Vec<T>>,
	/// `None` once the source has ended — spec: "drop clone registry" so no
	/// new clones may register past that point.
	clones: RefCell<Option<Vec<CloneSlot<T>>>>,
}

impl<T: Clone + 'static> History<T> {
	fn new(source: IterHandle<T>) -> Rc<Self> {
		let history = Rc::new(History {
			source: source.share(),
			items: RefCell::new(Vec::new()),
			clones: RefCell::new(Some(Vec::new())),
		});

		let weak = Rc::downgrade(&history);
		let w = weak.clone();
		source.on_readable(move || {
			if let Some(history) = w.upgrade() {
				history.mark_all_readable();
			}
		});
		let w = weak.clone();
		source.on_end(move || {
			if let Some(history) = w.upgrade() {
				history.on_source_end();
			}
		});
		let w = weak;
		source.on_error(move |err| {
			if let Some(history) = w.upgrade() {
				history.broadcast_error(err);
			}
		});

		history
	}

	/// spec §4.C: a cache hit returns the recorded item; otherwise, if the
	/// source isn't done yet, pull one more from it and record it.
	fn read_at(&self, pos: usize) -> Option<T> {
		if let Some(item) = self.items.borrow().get(pos) {
			return Some(item.clone());
		}
		if self.source.state().is_done() {
			return None;
		}
		let item = self.source.read()?;
		self.items.borrow_mut().push(item.clone());
		Some(item)
	}

	/// True once the source is done and `pos` has caught up with everything
	/// recorded so far. The base contract guarantees a handle never reaches
	/// `done` with anything still in its buffer (`end`/`destroy` both gate
	/// on that), so `state().is_done()` alone is enough here.
	fn ends_at(&self, pos: usize) -> bool {
		self.source.state().is_done() && self.items.borrow().len() == pos
	}

	fn register(&self, slot: CloneSlot<T>) {
		if let Some(clones) = self.clones.borrow_mut().as_mut() {
			clones.push(slot);
		}
	}

	fn unregister(&self, position: &Rc<Cell<usize>>) {
		if let Some(clones) = self.clones.borrow_mut().as_mut() {
			clones.retain(|slot| !Rc::ptr_eq(&slot.position, position));
		}
	}

	fn mark_all_readable(&self) {
		if let Some(clones) = self.clones.borrow().as_ref() {
			for slot in clones {
				if let Some(handle) = slot.handle.upgrade() {
					handle.set_readable(true);
				}
			}
		}
	}

	fn on_source_end(&self) {
		let Some(clones) = self.clones.borrow_mut().take() else { return };
		for slot in clones {
			if let Some(handle) = slot.handle.upgrade() {
				if self.ends_at(slot.position.get()) {
					handle.close();
				}
			}
		}
	}

	fn broadcast_error(&self, err: &Error) {
		if let Some(clones) = self.clones.borrow().as_ref() {
			for slot in clones {
				if let Some(handle) = slot.handle.upgrade() {
					handle.emit_error(err);
				}
			}
		}
	}
}

/// Register a brand-new clone against `history`, wiring its `read()`
/// straight through `History::read_at` (spec: "a clone's `read()`: attempt
/// `history.read_at(position)`; on success, advance position; on null, set
/// `readable = false`; if `ends_at(position)`, close").
fn register_clone<T: Clone + 'static>(history: Rc<History<T>>) -> IterHandle<T> {
	let clone = IterHandle::new();
	clone.advance_state(State::Open);

	let position = Rc::new(Cell::new(0usize));

	{
		let history = history.clone();
		let position = position.clone();
		let clone_for_override = clone.share();
		clone.set_read_override(move || match history.read_at(position.get()) {
			Some(item) => {
				position.set(position.get() + 1);
				Some(item)
			}
			None => {
				clone_for_override.set_readable(false);
				if history.ends_at(position.get()) {
					// "a clone's close() bypasses the buffered-iterator
					// close... it directly invokes the base close" — true
					// here for free, since a fork handle never gets a
					// close hook installed in the first place.
					clone_for_override.close();
				}
				None
			}
		});
	}

	{
		let history = history.clone();
		let position = position.clone();
		// "a clone's `_end` unregisters from the history but does *not*
		// destroy the source (other clones may still use it)."
		clone.on_end(move || history.unregister(&position));
	}
	{
		let history = history.clone();
		let position = position.clone();
		clone.set_destroy_hook(move |_cause| history.unregister(&position));
	}

	clone.set_property_fallback(history.source.share());
	let initially_readable = !history.items.borrow().is_empty() || history.source.readable();
	clone.set_readable(initially_readable);

	history.register(CloneSlot { handle: clone.downgrade(), position });

	clone
}

/// `source.fork()`: install (or reuse) `source`'s history and hand back a
/// fresh clone reading from position 0. "Clones that register after the
/// source has advanced begin at position 0 (they see the full history)."
pub(crate) fn fork<T: Clone + 'static>(source: &IterHandle<T>) -> IterHandle<T> {
	source.attach_history();
	let history = source.history_slot(|| History::new(source.share()));
	register_clone(history)
}
