//! Promises/A+ style deferred values for single-threaded code.
//!
//! A [`Promise`] settles exactly once, into a value or a reason, and runs the
//! reactions registered with [`Promise::then`] on a later turn of a
//! [`Schedule`]r, never inside the caller's frame. Values resolved into a
//! promise may be other promises or foreign [`Thenable`]s; those are adopted.
//!
//! ```
//! use promise_aplus::{scheduler, Error, Promise, State};
//!
//! let p: Promise<String> = Promise::new(|resolver| {
//!     resolver.resolve("ok".to_string());
//!     Ok(())
//! });
//! let failed: Promise<String> = p.and_then(|_| Err::<String, _>(Error::msg("x")));
//! let message: Promise<String> = failed.catch(|e| Ok(e.to_string()));
//!
//! scheduler::run_until_idle();
//! assert_eq!(message.state(), State::Fulfilled("x".to_string()));
//! ```

mod promise;
mod resolution;
pub mod scheduler;
mod then;

pub use promise::{Promise, Resolver, State};
pub use resolution::{FnThenable, Resolution, Then, ThenFn, Thenable};
pub use scheduler::{Schedule, Task, TaskQueue, TaskQueueBuilder};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A promise was resolved with itself.
    #[error("chaining cycle detected for promise")]
    ChainingCycle,
    #[error("{0}")]
    Rejected(String),
}

impl Error {
    /// A rejection reason carrying just a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Rejected(message.into())
    }
}
