//! The property store backing `get_property`/`set_property` (spec §4.B).
//!
//! Values are stored type-erased (`Rc<dyn Any>`) since the spec treats them
//! as "a mapping from string names to arbitrary values" with no shared
//! static type; callers downcast on the way out. Gets on a name that hasn't
//! been set yet park a one-shot callback instead of returning immediately,
//! and every callback — whether parked or fired against an already-set value
//! — runs through the scheduler so the caller never observes it inline.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::scheduler;

pub type PropertyValue = Rc<dyn Any>;
type PropertyCallback = Box<dyn FnOnce(PropertyValue)>;

#[derive(Default)]
pub struct Properties {
	values: HashMap<String, PropertyValue>,
	pending: HashMap<String, Vec<PropertyCallback>>,
}

impl Properties {
	/// Current value for `name`, if any has been set.
	pub fn get(&self, name: &str) -> Option<PropertyValue> {
		self.values.get(name).cloned()
	}

	/// A snapshot copy of every property currently set.
	pub fn snapshot(&self) -> HashMap<String, PropertyValue> {
		self.values.clone()
	}

	/// Deferred-get: if `name` is already set, `cb` runs on the next
	/// scheduler drain with the current value. Otherwise `cb` is parked and
	/// fires (also deferred) the moment `set` gives `name` a value.
	pub fn get_deferred(&mut self, name: &str, cb: impl FnOnce(PropertyValue) + 'static) {
		if let Some(value) = self.values.get(name).cloned() {
			scheduler::schedule(move || cb(value));
		} else {
			self.pending.entry(name.to_string()).or_default().push(Box::new(cb));
		}
	}

	/// Set `name` to `value`, firing every callback parked on it (in
	/// registration order) in a single deferred task.
	pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
		let name = name.into();
		self.values.insert(name.clone(), value.clone());
		if let Some(callbacks) = self.pending.remove(&name) {
			scheduler::schedule(move || {
				for cb in callbacks {
					cb(value.clone());
				}
			});
		}
	}

	pub fn set_all(&mut self, values: impl IntoIterator<Item = (String, PropertyValue)>) {
		for (name, value) in values {
			self.set(name, value);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::RefCell;

	#[test]
	fn get_on_unset_property_parks_until_set() {
		let mut props = Properties::default();
		let seen = Rc::new(RefCell::new(None));
		let seen2 = seen.clone();
		props.get_deferred("name", move |v| {
			*seen2.borrow_mut() = v.downcast_ref::<i32>().copied();
		});
		scheduler::drain();
		assert_eq!(*seen.borrow(), None);

		props.set("name", Rc::new(7i32));
		scheduler::drain();
		assert_eq!(*seen.borrow(), Some(7));
	}

	#[test]
	fn multiple_pending_callbacks_all_fire_once_in_order() {
		let mut props = Properties::default();
		let order = Rc::new(RefCell::new(Vec::new()));
		for tag in [1, 2, 3] {
			let order = order.clone();
			props.get_deferred("x", move |v| {
				order.borrow_mut().push((tag, *v.downcast_ref::<i32>().unwrap()));
			});
		}
		props.set("x", Rc::new(99i32));
		scheduler::drain();
		assert_eq!(*order.borrow(), vec![(1, 99), (2, 99), (3, 99)]);
	}

	#[test]
	fn get_on_already_set_property_is_still_deferred() {
		let mut props = Properties::default();
		props.set("x", Rc::new(1i32));
		let fired = Rc::new(RefCell::new(false));
		let fired2 = fired.clone();
		props.get_deferred("x", move |_| *fired2.borrow_mut() = true);
		assert!(!*fired.borrow(), "callback must not fire synchronously");
		scheduler::drain();
		assert!(*fired.borrow());
	}
}
