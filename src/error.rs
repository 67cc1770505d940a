use std::fmt;
use std::sync::Arc;

/// Errors that can travel through an iterator's `error` event or be returned
/// from a fallible constructor.
///
/// Programming errors (setting a source twice, a `done` callback firing more
/// than once, ...) are not represented here: they are invariant violations,
/// not recoverable conditions, and are reported as panics at the call site
/// that violated them.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
	/// The iterator was destroyed with no specific cause.
	#[error("iterator destroyed")]
	Destroyed,

	/// An application-supplied cause, carried opaquely so it can be cloned
	/// and fanned out to every fork of a source.
	#[error("{0}")]
	Cause(Cause),
}

impl Error {
	/// Wrap an arbitrary application error as a destroy cause.
	pub fn cause<E>(err: E) -> Self
	where
		E: std::error::Error + Send + Sync + 'static,
	{
		Error::Cause(Cause(Arc::new(err)))
	}
}

/// A type-erased, cloneable application error.
#[derive(Clone)]
pub struct Cause(Arc<dyn std::error::Error + Send + Sync>);

impl fmt::Display for Cause {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl fmt::Debug for Cause {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&self.0, f)
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(thiserror::Error, Debug)]
	#[error("boom")]
	struct Boom;

	#[test]
	fn cause_is_cloneable_and_displays() {
		let err = Error::cause(Boom);
		let err2 = err.clone();
		assert_eq!(err.to_string(), "boom");
		assert_eq!(err2.to_string(), "boom");
	}
}
