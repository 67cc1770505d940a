//! The base iterator contract (spec §4.B): state, buffer, properties and the
//! four named events (`readable`, `data`, `end`, `error`) plus the synthetic
//! `new_listener` hook, all hung off one `Rc<RefCell<Inner<T>>>`.
//!
//! Everything above this module — the buffered generator in `produce`, the
//! transform operators, fork/history — is built by driving this handle's
//! `push`/`close`/`destroy` primitives; none of it reaches into `Inner`
//! directly. This mirrors how the teacher layers `Producer<T>`/`Consumer<T>`
//! (a generic watch-based base) underneath `TrackProducer`/`GroupProducer`
//! rather than giving every higher-level type its own ad hoc state.
//!
//! `IterHandle<T>` deliberately does not implement `std::Clone`: cloning the
//! handle would hand out a second reference to the *same* iterator, which
//! would read as the spec's `fork()` operator (a genuinely new logical
//! iterator fed by a shared history) without doing any of fork's bookkeeping.
//! Internal code that needs another reference to the same handle uses the
//! crate-private [`IterHandle::share`].

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::error::Error;
use crate::event::{self, Listeners};
pub use crate::event::ListenerId;
use crate::properties::{Properties, PropertyValue};
use crate::scheduler;
use crate::state::State;

/// Which named event [`IterHandle::on_readable`] & co. just registered a
/// listener for, reported to any `new_listener` hook before the listener
/// itself is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
	Readable,
	Data,
	End,
	Error,
}

struct EventBus<T> {
	readable: Rc<RefCell<Listeners<()>>>,
	data: Rc<RefCell<Listeners<T>>>,
	end: Rc<RefCell<Listeners<()>>>,
	error: Rc<RefCell<Listeners<Error>>>,
	new_listener: Rc<RefCell<Listeners<EventKind>>>,
}

impl<T> Default for EventBus<T> {
	fn default() -> Self {
		Self {
			readable: Rc::default(),
			data: Rc::default(),
			end: Rc::default(),
			error: Rc::default(),
			new_listener: Rc::default(),
		}
	}
}

struct Inner<T> {
	state: State,
	buffer: VecDeque<T>,
	/// The spec's `readable` hint: `true` means a `read()` right now *might*
	/// yield an item. Buffer-backed handles keep this in lockstep with
	/// "buffer non-empty", but it is a distinct field (not derived) because
	/// a handle with a [`read_override`](Self::read_override) — forks, chiefly
	/// — has no buffer of its own to derive it from.
	readable: bool,
	properties: Properties,
	events: EventBus<T>,
	data_listeners: usize,
	flowing_scheduled: bool,
	destroy_cause: Option<Error>,
	/// Overrides the base `close()` behavior. Installed by the buffered
	/// engine (`produce::BufIter`), which needs its own two-phase
	/// `Closing`-then-drain-then-`Closed` sequence instead of the base
	/// contract's direct `Closed` jump. `None` for handles nothing owns
	/// beyond the base contract (trivial producers, forks).
	on_close: Option<Rc<dyn Fn()>>,
	/// Runs after every `read()` that popped from (or found empty) this
	/// buffer. The buffered engine uses this to re-arm production; nothing
	/// else needs it.
	on_read: Option<Rc<dyn Fn()>>,
	/// Runs once, before the base `destroy()` clears the buffer and flips
	/// the state, so the buffered engine can forward the cause to its
	/// production strategy.
	on_destroy: Option<Rc<dyn Fn(Option<Error>)>>,
	/// Bypasses the buffer entirely: when set, `read()` calls this instead
	/// of popping `buffer`. Used by fork handles, which pull straight
	/// through a shared history rather than owning any buffered items.
	read_override: Option<Rc<dyn Fn() -> Option<T>>>,
	/// `true` once an ordinary (non-fork) transform has claimed this
	/// handle as its source.
	has_single_destination: bool,
	/// `true` once a [`History`](crate::fork::History) has claimed this
	/// handle's destination slot for fork multiplexing. Mutually exclusive
	/// with `has_single_destination`.
	has_history: bool,
	/// A source to defer unset property lookups to. Forks use this so that
	/// a property never explicitly set on the fork itself still resolves
	/// through whichever source they were forked from.
	property_fallback: Option<IterHandle<T>>,
	/// This handle's destination slot, once claimed by a
	/// [`History`](crate::fork::History): `fork()` stashes the `Rc<History<T>>`
	/// here the first time it's called on this handle, and every later
	/// `fork()` call fetches it back out. Type-erased so this module never
	/// has to name `fork`'s types; the downcast always succeeds because
	/// `fork` is the only caller and always asks for the same concrete `H`
	/// on a given handle.
	history_slot: Option<Rc<dyn Any>>,
}

impl<T> Default for Inner<T> {
	fn default() -> Self {
		Self {
			state: State::default(),
			buffer: VecDeque::new(),
			readable: false,
			properties: Properties::default(),
			events: EventBus::default(),
			data_listeners: 0,
			flowing_scheduled: false,
			destroy_cause: None,
			on_close: None,
			on_read: None,
			on_destroy: None,
			read_override: None,
			has_single_destination: false,
			has_history: false,
			property_fallback: None,
			history_slot: None,
		}
	}
}

pub struct IterHandle<T>(Rc<RefCell<Inner<T>>>);

impl<T> Default for IterHandle<T> {
	fn default() -> Self {
		IterHandle(Rc::new(RefCell::new(Inner::default())))
	}
}

/// A non-owning reference to a handle. [`crate::fork::History`] keeps its
/// clone registry weak: the clone holds the history strong (via its
/// `read_override` closure), so a strong back-reference here would be a
/// cycle nothing ever breaks, even after the caller drops the clone.
pub(crate) struct WeakHandle<T>(std::rc::Weak<RefCell<Inner<T>>>);

impl<T> Clone for WeakHandle<T> {
	fn clone(&self) -> Self {
		WeakHandle(self.0.clone())
	}
}

impl<T: 'static> WeakHandle<T> {
	pub(crate) fn upgrade(&self) -> Option<IterHandle<T>> {
		self.0.upgrade().map(IterHandle)
	}
}

impl<T: 'static> IterHandle<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Another reference to this same handle, for code that needs to move a
	/// copy into a closure. Not `Clone`: see the module docs.
	pub(crate) fn share(&self) -> Self {
		IterHandle(Rc::clone(&self.0))
	}

	pub(crate) fn downgrade(&self) -> WeakHandle<T> {
		WeakHandle(Rc::downgrade(&self.0))
	}

	pub fn state(&self) -> State {
		self.0.borrow().state
	}

	/// The `readable` hint: `true` means a `read()` right now *might* yield
	/// an item.
	pub fn readable(&self) -> bool {
		self.0.borrow().readable
	}

	/// Coerce and store the `readable` hint (spec §4.B: `new = new &&
	/// !done`), scheduling a deferred `readable` emission on a false->true
	/// transition only.
	pub(crate) fn set_readable(&self, value: bool) {
		let mut inner = self.0.borrow_mut();
		let new = value && !inner.state.is_done();
		if new == inner.readable {
			return;
		}
		let was_set = new && !inner.readable;
		inner.readable = new;
		drop(inner);
		if was_set {
			let handle = self.share();
			scheduler::schedule(move || handle.emit_readable());
		}
	}

	/// Install a function that `read()` delegates to entirely, bypassing
	/// the buffer. See [`Inner::read_override`].
	pub(crate) fn set_read_override(&self, f: impl Fn() -> Option<T> + 'static) {
		self.0.borrow_mut().read_override = Some(Rc::new(f));
	}

	/// Claim this handle's destination slot for an ordinary (non-fork)
	/// transform. Panics if a transform or a fork history already claimed
	/// it — the spec treats attaching to an already-claimed source as a
	/// programming error (§7.1).
	pub(crate) fn attach_single_destination(&self) {
		let mut inner = self.0.borrow_mut();
		assert!(
			!inner.has_single_destination && !inner.has_history,
			"source already has a destination"
		);
		inner.has_single_destination = true;
	}

	pub(crate) fn detach_single_destination(&self) {
		self.0.borrow_mut().has_single_destination = false;
	}

	/// Claim this handle's destination slot for fork multiplexing. Returns
	/// `true` the first time (the caller should install a fresh
	/// [`History`](crate::fork::History)); subsequent calls just register
	/// another fork against the existing one. Panics if an ordinary
	/// transform already claimed the slot.
	pub(crate) fn attach_history(&self) -> bool {
		let mut inner = self.0.borrow_mut();
		assert!(!inner.has_single_destination, "source already has a destination");
		let first = !inner.has_history;
		inner.has_history = true;
		first
	}

	/// Defer unset property lookups on this handle to `source`. Used by
	/// forks so `get_property`/`get_properties` fall back to whatever they
	/// were forked from.
	pub(crate) fn set_property_fallback(&self, source: IterHandle<T>) {
		self.0.borrow_mut().property_fallback = Some(source);
	}

	/// Fetch the value stashed in this handle's destination slot by an
	/// earlier `fork()` call, or build and stash one via `init` the first
	/// time. See [`Inner::history_slot`].
	pub(crate) fn history_slot<H: 'static>(&self, init: impl FnOnce() -> Rc<H>) -> Rc<H> {
		let existing = self.0.borrow().history_slot.clone();
		if let Some(existing) = existing {
			return existing
				.downcast::<H>()
				.unwrap_or_else(|_| panic!("history slot type mismatch"));
		}
		let created = init();
		self.0.borrow_mut().history_slot = Some(created.clone() as Rc<dyn Any>);
		created
	}

	pub fn destroy_cause(&self) -> Option<Error> {
		self.0.borrow().destroy_cause.clone()
	}

	pub(crate) fn buffer_len(&self) -> usize {
		self.0.borrow().buffer.len()
	}

	/// Install a handler that replaces the base `close()` behavior for this
	/// handle. At most one engine ever owns a given handle, so this is set
	/// once, at construction, never contested.
	pub(crate) fn set_close_hook(&self, f: impl Fn() + 'static) {
		self.0.borrow_mut().on_close = Some(Rc::new(f));
	}

	/// Install a handler that runs after every `read()` settles.
	pub(crate) fn set_read_hook(&self, f: impl Fn() + 'static) {
		self.0.borrow_mut().on_read = Some(Rc::new(f));
	}

	/// Install a handler that runs once, before `destroy()`'s own effects,
	/// with the same cause `destroy()` was given.
	pub(crate) fn set_destroy_hook(&self, f: impl Fn(Option<Error>) + 'static) {
		self.0.borrow_mut().on_destroy = Some(Rc::new(f));
	}

	/// Pull the next item. A handle with a [`read_override`](Inner::read_override)
	/// (forks) delegates entirely to it; everything else pops its own
	/// buffer, setting `readable = false` when that leaves it empty and
	/// transitioning `Closed` -> `Ended` (firing `end`) once a closed
	/// source's buffer drains.
	pub fn read(&self) -> Option<T> {
		let override_fn = self.0.borrow().read_override.clone();
		if let Some(f) = override_fn {
			return f();
		}
		let mut inner = self.0.borrow_mut();
		let item = inner.buffer.pop_front();
		let emptied = item.is_none();
		let ending = emptied && inner.state == State::Closed;
		if ending {
			inner.state = State::Ended;
		}
		let read_hook = inner.on_read.clone();
		drop(inner);
		if emptied {
			self.set_readable(false);
		}
		if ending {
			self.emit_end();
			self.release_listeners();
		}
		if let Some(hook) = read_hook {
			hook();
		}
		item
	}

	/// Append a produced item to the buffer. Called by whatever is feeding
	/// this handle (the `Buf` engine, a fork's history replay, ...), never
	/// by consumers.
	pub(crate) fn push(&self, item: T) {
		self.0.borrow_mut().buffer.push_back(item);
		self.set_readable(true);
		self.maybe_pump_flowing();
	}

	/// Request termination.
	///
	/// A handle with a close hook installed (the buffered engine's handles)
	/// delegates entirely to it, for the two-phase `Closing` -> drain ->
	/// `Closed` sequence §4.Buf describes. Everything else — trivial
	/// producers, forks — gets the base default: `Open` -> `Closed`
	/// directly, with `end` deferred to the next scheduler drain and, if
	/// the buffer still holds items at that point, deferred further still
	/// until `read()` itself empties it (see [`end_if_still_closed`](Self::end_if_still_closed)).
	/// Idempotent either way; a no-op once closed or done.
	pub fn close(&self) {
		let hook = self.0.borrow().on_close.clone();
		if let Some(hook) = hook {
			hook();
			return;
		}
		let mut inner = self.0.borrow_mut();
		if !inner.state.can_change_to(State::Closed) {
			return;
		}
		inner.state = State::Closed;
		drop(inner);
		let handle = self.share();
		scheduler::schedule(move || handle.end_if_still_closed());
	}

	/// Advance `Closed -> Ended` if the buffer has already drained, the same
	/// gate [`complete_close`](Self::complete_close) applies. A bare
	/// producer (`producers.rs`) pushes every item it has and calls `close()`
	/// at construction, before any consumer has attached — were this
	/// unconditional, `end` would fire (and listeners would be released)
	/// while the buffer still held every item nobody has read yet, which
	/// breaks flow mode (the `data` pump would find its listeners already
	/// cleared) and violates "`end` is emitted after the last `data`". When
	/// the buffer is non-empty, leave the state at `Closed` and let `read()`
	/// (lines 304-316 above) carry the `Closed -> Ended` transition once it
	/// empties the buffer itself.
	fn end_if_still_closed(&self) {
		let mut inner = self.0.borrow_mut();
		if inner.state != State::Closed || !inner.buffer.is_empty() {
			return;
		}
		inner.state = State::Ended;
		drop(inner);
		self.emit_end();
		self.release_listeners();
	}

	/// Drop every `readable`/`data`/`end` listener once the iterator reaches
	/// a terminal state (spec §3: "upon entering ENDED or DESTROYED, all
	/// listeners... are released"). This is also what keeps a transform
	/// chain from leaking: a source holds its destination's handle inside a
	/// `readable`/`end` listener closure, and the destination's strategy
	/// holds the source handle right back, so the cycle only breaks once one
	/// side lets go of the other's listeners.
	fn release_listeners(&self) {
		let inner = self.0.borrow();
		inner.events.readable.borrow_mut().clear();
		inner.events.data.borrow_mut().clear();
		inner.events.end.borrow_mut().clear();
		inner.events.new_listener.borrow_mut().clear();
	}

	/// Move to `Closing` without scheduling `end` directly. Used by the
	/// buffered engine, which needs to observe `Closing` from within its
	/// in-flight `read`/`begin` callback before it drives the transition the
	/// rest of the way to `Closed` itself via
	/// [`complete_close`](Self::complete_close).
	pub(crate) fn begin_closing(&self) {
		let mut inner = self.0.borrow_mut();
		if !inner.state.can_change_to(State::Closing) {
			return;
		}
		inner.state = State::Closing;
		tracing::trace!(to = ?State::Closing, "iterator closing");
	}

	/// Advance `Closing` -> `Closed`, ending immediately if the buffer is
	/// already empty.
	pub(crate) fn complete_close(&self) {
		let mut inner = self.0.borrow_mut();
		if !inner.state.can_change_to(State::Closed) {
			return;
		}
		inner.state = State::Closed;
		let ending = inner.buffer.is_empty();
		if ending {
			inner.state = State::Ended;
		}
		drop(inner);
		if ending {
			self.emit_end();
			self.release_listeners();
		}
	}

	/// Force the iterator to `Destroyed` immediately, discarding whatever is
	/// still buffered. A no-op once the iterator has already reached `Ended`
	/// or `Destroyed` — matches `State::can_change_to`'s forward-only rule.
	///
	/// Runs the destroy hook (if one is installed — the buffered engine
	/// forwards the cause to its [`Strategy::destroy`](crate::produce::Strategy::destroy))
	/// before flipping state, so a caller holding only this handle (not the
	/// engine that built it) still tears the whole thing down correctly.
	pub fn destroy(&self, cause: Option<Error>) {
		let mut inner = self.0.borrow_mut();
		if inner.state.is_done() {
			return;
		}
		let destroy_hook = inner.on_destroy.clone();
		inner.state = State::Destroyed;
		inner.destroy_cause = cause.clone();
		inner.buffer.clear();
		drop(inner);
		if let Some(hook) = destroy_hook {
			hook(cause.clone());
		}
		tracing::debug!(cause = cause.is_some(), "iterator destroyed");
		if let Some(err) = cause {
			self.emit_error(&err);
		}
		self.release_listeners();
	}

	/// Deferred-get a property, falling back to `property_fallback` (a
	/// fork's source) for any name not set directly on this handle.
	pub fn get_property(&self, name: &str, cb: impl FnOnce(PropertyValue) + 'static) {
		let local = self.0.borrow().properties.get(name);
		if local.is_some() {
			self.0.borrow_mut().properties.get_deferred(name, cb);
			return;
		}
		let fallback = self.0.borrow().property_fallback.as_ref().map(IterHandle::share);
		match fallback {
			Some(source) => source.get_property(name, cb),
			None => self.0.borrow_mut().properties.get_deferred(name, cb),
		}
	}

	pub fn set_property(&self, name: impl Into<String>, value: PropertyValue) {
		self.0.borrow_mut().properties.set(name, value);
	}

	pub fn set_properties(&self, values: impl IntoIterator<Item = (String, PropertyValue)>) {
		self.0.borrow_mut().properties.set_all(values);
	}

	/// A merged snapshot: the fallback source's properties, overridden by
	/// whatever this handle has set directly.
	pub fn properties_snapshot(&self) -> HashMap<String, PropertyValue> {
		let fallback = self.0.borrow().property_fallback.as_ref().map(IterHandle::share);
		let mut merged = match fallback {
			Some(source) => source.properties_snapshot(),
			None => HashMap::new(),
		};
		merged.extend(self.0.borrow().properties.snapshot());
		merged
	}

	pub fn on_readable(&self, mut f: impl FnMut() + 'static) -> ListenerId {
		self.emit_new_listener(EventKind::Readable);
		let cell = self.0.borrow().events.readable.clone();
		cell.borrow_mut().add(move |_: &()| f())
	}

	pub fn off_readable(&self, id: ListenerId) {
		self.0.borrow().events.readable.borrow_mut().remove(id);
	}

	pub fn on_data(&self, mut f: impl FnMut(&T) + 'static) -> ListenerId {
		self.emit_new_listener(EventKind::Data);
		let cell = self.0.borrow().events.data.clone();
		let id = cell.borrow_mut().add(move |item: &T| f(item));
		self.0.borrow_mut().data_listeners += 1;
		self.maybe_pump_flowing();
		id
	}

	pub fn off_data(&self, id: ListenerId) {
		self.0.borrow().events.data.borrow_mut().remove(id);
		let mut inner = self.0.borrow_mut();
		inner.data_listeners = inner.data_listeners.saturating_sub(1);
	}

	pub fn on_end(&self, mut f: impl FnMut() + 'static) -> ListenerId {
		self.emit_new_listener(EventKind::End);
		let cell = self.0.borrow().events.end.clone();
		cell.borrow_mut().add(move |_: &()| f())
	}

	pub fn off_end(&self, id: ListenerId) {
		self.0.borrow().events.end.borrow_mut().remove(id);
	}

	pub fn on_error(&self, mut f: impl FnMut(&Error) + 'static) -> ListenerId {
		self.emit_new_listener(EventKind::Error);
		let cell = self.0.borrow().events.error.clone();
		cell.borrow_mut().add(move |err: &Error| f(err))
	}

	pub fn off_error(&self, id: ListenerId) {
		self.0.borrow().events.error.borrow_mut().remove(id);
	}

	/// Attach `on_data`/`on_end` in one call; `on_end` runs at most once.
	pub fn for_each(&self, on_data: impl FnMut(&T) + 'static, on_end: impl FnOnce() + 'static) {
		self.on_data(on_data);
		let on_end = RefCell::new(Some(on_end));
		self.on_end(move || {
			if let Some(f) = on_end.borrow_mut().take() {
				f();
			}
		});
	}

	/// Directly move to `new`, with no event side effects of its own. Used
	/// by producers and the buffered engine for transitions the base
	/// contract doesn't already model with a dedicated method (e.g. `Init`
	/// -> `Open`, or a trivial producer's construction-time jump straight to
	/// `Ended`).
	pub(crate) fn advance_state(&self, new: State) -> bool {
		let mut inner = self.0.borrow_mut();
		if !inner.state.can_change_to(new) {
			return false;
		}
		inner.state = new;
		true
	}

	fn emit_new_listener(&self, kind: EventKind) {
		let cell = self.0.borrow().events.new_listener.clone();
		event::emit(&cell, &kind);
	}

	pub(crate) fn emit_readable(&self) {
		let cell = self.0.borrow().events.readable.clone();
		event::emit(&cell, &());
	}

	fn emit_data(&self, item: &T) {
		let cell = self.0.borrow().events.data.clone();
		event::emit(&cell, item);
	}

	pub(crate) fn emit_end(&self) {
		let cell = self.0.borrow().events.end.clone();
		event::emit(&cell, &());
	}

	pub(crate) fn emit_error(&self, err: &Error) {
		let cell = self.0.borrow().events.error.clone();
		event::emit(&cell, err);
	}

	/// Engage flowing mode: once at least one `data` listener is attached,
	/// schedule a deferred pump that reads the buffer dry, emitting each
	/// item as a `data` event, instead of leaving items parked for a manual
	/// `read()`. `flowing_scheduled` collapses repeated `push`/`on_data`
	/// calls within one tick into a single pump task.
	fn maybe_pump_flowing(&self) {
		let mut inner = self.0.borrow_mut();
		if inner.data_listeners == 0 || inner.flowing_scheduled {
			return;
		}
		inner.flowing_scheduled = true;
		drop(inner);
		let handle = self.share();
		scheduler::schedule(move || handle.pump_flowing());
	}

	fn pump_flowing(&self) {
		self.0.borrow_mut().flowing_scheduled = false;
		while let Some(item) = self.read() {
			self.emit_data(&item);
			if self.0.borrow().data_listeners == 0 {
				break;
			}
		}
	}
}

/// Subscribe to `name` on `from` and mirror every value it ever takes onto
/// `to`, for transforms that inherit upstream metadata at construction time.
pub(crate) fn copy_properties<T: 'static, U: 'static>(
	names: &'static [&'static str],
	from: &IterHandle<T>,
	to: &IterHandle<U>,
) {
	for &name in names {
		let to = to.share();
		from.get_property(name, move |value| to.set_property(name, value));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;

	#[test]
	fn read_returns_items_in_push_order() {
		let h: IterHandle<i32> = IterHandle::new();
		h.push(1);
		h.push(2);
		assert_eq!(h.read(), Some(1));
		assert_eq!(h.read(), Some(2));
		assert_eq!(h.read(), None);
	}

	#[test]
	fn close_defers_end_to_the_next_drain() {
		let h: IterHandle<i32> = IterHandle::new();
		let ends = Rc::new(Cell::new(0));
		let ends2 = ends.clone();
		h.on_end(move || ends2.set(ends2.get() + 1));

		h.close();
		assert_eq!(h.state(), State::Closed);
		assert_eq!(ends.get(), 0, "end must not fire synchronously");

		scheduler::drain();
		assert_eq!(h.state(), State::Ended);
		assert_eq!(ends.get(), 1);
	}

	#[test]
	fn close_is_idempotent() {
		let h: IterHandle<i32> = IterHandle::new();
		h.close();
		scheduler::drain();
		assert_eq!(h.state(), State::Ended);
		h.close();
		assert_eq!(h.state(), State::Ended, "closing an ended iterator is a no-op");
	}

	#[test]
	fn begin_closing_then_complete_close_ends_once_buffer_drains() {
		let h: IterHandle<i32> = IterHandle::new();
		let ends = Rc::new(Cell::new(0));
		let ends2 = ends.clone();
		h.on_end(move || ends2.set(ends2.get() + 1));

		h.push(1);
		h.begin_closing();
		h.complete_close();
		assert_eq!(h.state(), State::Closing);
		// buffer still has an item, so complete_close must not have ended yet
		assert_eq!(ends.get(), 0);

		assert_eq!(h.read(), Some(1));
		assert_eq!(h.read(), None);
		assert_eq!(h.state(), State::Ended);
		assert_eq!(ends.get(), 1);
	}

	#[test]
	fn complete_close_ends_immediately_when_buffer_already_empty() {
		let h: IterHandle<i32> = IterHandle::new();
		let ended = Rc::new(Cell::new(false));
		let ended2 = ended.clone();
		h.on_end(move || ended2.set(true));
		h.begin_closing();
		h.complete_close();
		assert!(ended.get());
		assert_eq!(h.state(), State::Ended);
	}

	#[test]
	fn attaching_a_data_listener_drains_the_buffer_as_data_events() {
		let h: IterHandle<i32> = IterHandle::new();
		h.push(1);
		h.push(2);
		let seen = Rc::new(RefCell::new(Vec::new()));
		let seen2 = seen.clone();
		h.on_data(move |item| seen2.borrow_mut().push(*item));
		scheduler::drain();
		assert_eq!(*seen.borrow(), vec![1, 2]);
		assert_eq!(h.read(), None, "flowing mode should have emptied the buffer");
	}

	#[test]
	fn closing_a_non_empty_buffer_defers_end_until_it_drains() {
		let h: IterHandle<i32> = IterHandle::new();
		h.push(1);
		h.push(2);
		h.close();
		scheduler::drain();
		assert_eq!(h.state(), State::Closed, "end must wait for the buffer to drain");
	}

	#[test]
	fn flow_mode_delivers_every_item_before_end_even_when_closed_up_front() {
		// Mirrors a bare producer: push everything, then close immediately,
		// before any consumer has attached — exactly what `producers.rs`
		// does at construction.
		let h: IterHandle<i32> = IterHandle::new();
		h.push(1);
		h.push(2);
		h.push(3);
		h.close();

		let seen = Rc::new(RefCell::new(Vec::new()));
		let ended = Rc::new(Cell::new(false));
		let seen2 = seen.clone();
		let ended2 = ended.clone();
		h.on_data(move |item| seen2.borrow_mut().push(*item));
		h.on_end(move || ended2.set(true));

		scheduler::drain();
		assert_eq!(*seen.borrow(), vec![1, 2, 3], "every item must reach the data listener");
		assert!(ended.get(), "end must still fire once the buffer has drained");
		assert_eq!(h.state(), State::Ended);
	}

	#[test]
	fn readable_matches_done_once_a_non_empty_closed_buffer_fully_drains() {
		let h: IterHandle<i32> = IterHandle::new();
		h.push(1);
		h.close();
		scheduler::drain();
		assert_eq!(h.read(), Some(1));
		assert_eq!(h.read(), None);
		assert!(h.state().is_done());
		assert!(!h.readable(), "readable must be false once done");
	}

	#[test]
	fn destroy_clears_buffer_and_emits_error_for_a_cause() {
		let h: IterHandle<i32> = IterHandle::new();
		h.push(1);
		let seen = Rc::new(RefCell::new(None));
		let seen2 = seen.clone();
		h.on_error(move |err| *seen2.borrow_mut() = Some(err.to_string()));
		h.destroy(Some(Error::Destroyed));
		assert_eq!(h.state(), State::Destroyed);
		assert_eq!(h.read(), None);
		assert_eq!(*seen.borrow(), Some("iterator destroyed".to_string()));
	}

	#[test]
	fn destroy_after_ended_is_a_no_op() {
		let h: IterHandle<i32> = IterHandle::new();
		h.close();
		scheduler::drain();
		assert_eq!(h.state(), State::Ended);
		h.destroy(Some(Error::Destroyed));
		assert_eq!(h.state(), State::Ended);
	}

	#[test]
	fn new_listener_fires_before_the_listener_it_announces() {
		let h: IterHandle<i32> = IterHandle::new();
		let log = Rc::new(RefCell::new(Vec::new()));
		let log2 = log.clone();
		{
			let cell = h.0.borrow().events.new_listener.clone();
			let log3 = log.clone();
			cell.borrow_mut().add(move |kind: &EventKind| log3.borrow_mut().push(format!("new_listener:{kind:?}")));
		}
		h.on_data(move |_| log2.borrow_mut().push("data".to_string()));
		h.push(1);
		scheduler::drain();
		assert_eq!(log.borrow()[0], "new_listener:Data");
	}
}
