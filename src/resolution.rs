//! Thenable assimilation.
//!
//! A candidate settlement value is either a plain value, one of our own
//! promises, or a foreign [`Thenable`]. [`resolve_promise`] unwraps promises
//! and thenables, recursively, until a plain value or a failure remains.

use crate::promise::{Promise, Resolver};
use crate::Error;
use log::{debug, warn};
use std::fmt;

/// The `then` implementation of a foreign thenable. It receives a fresh
/// [`Resolver`] whose `resolve`/`reject` play the part of the two callbacks;
/// returning `Err` is the same as `then` throwing.
pub type ThenFn<T, E> = Box<dyn FnOnce(Resolver<T, E>) -> Result<(), E>>;

/// What reading a thenable's `then` member produced.
pub enum Then<T, E> {
    /// `then` is callable.
    Callable(ThenFn<T, E>),
    /// `then` exists but is not callable; the thenable is an ordinary value.
    Plain(T),
}

/// A value from some other promise implementation.
///
/// Implementors only need to say what their `then` member is. The lookup may
/// fail, in which case the promise being resolved is rejected with the error.
pub trait Thenable<T, E> {
    fn then_member(self: Box<Self>) -> Result<Then<T, E>, E>;
}

/// Adapts a closure into a [`Thenable`] whose `then` is the closure.
///
/// ```
/// use promise_aplus::{scheduler, FnThenable, Promise, Resolution, State};
///
/// let (p, resolver) = Promise::<i32>::deferred();
/// resolver.resolve(Resolution::thenable(FnThenable::new(|r: promise_aplus::Resolver<i32>| {
///     r.resolve(3);
///     Ok(())
/// })));
/// scheduler::run_until_idle();
/// assert_eq!(p.state(), State::Fulfilled(3));
/// ```
pub struct FnThenable<F>(F);

impl<F> FnThenable<F> {
    pub fn new(then: F) -> Self {
        FnThenable(then)
    }
}

impl<T, E, F> Thenable<T, E> for FnThenable<F>
where
    F: FnOnce(Resolver<T, E>) -> Result<(), E> + 'static,
{
    fn then_member(self: Box<Self>) -> Result<Then<T, E>, E> {
        Ok(Then::Callable(Box::new(self.0)))
    }
}

/// A candidate settlement value.
pub enum Resolution<T, E = Error> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E> + 'static) -> Self {
        Resolution::Thenable(Box::new(thenable))
    }
}

impl<T, E> From<T> for Resolution<T, E> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// Settles `promise` according to `x`.
///
/// Self-resolution rejects with [`Error::ChainingCycle`]. Promises and
/// thenables are adopted; the callbacks handed to a foreign `then` share one
/// guard, so only the first call among them counts.
pub(crate) fn resolve_promise<T, E>(promise: &Promise<T, E>, x: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match x {
        Resolution::Value(value) => promise.fulfill(value),
        Resolution::Promise(other) if other.ptr_eq(promise) => {
            warn!("promise resolved with itself");
            promise.reject(Error::ChainingCycle.into());
        }
        Resolution::Promise(other) => {
            let on_fulfilled = Resolver::new(promise.clone());
            let on_rejected = on_fulfilled.clone();
            other.register_reactions(
                move |value| on_fulfilled.resolve(Resolution::Value(value)),
                move |reason| on_rejected.reject(reason),
            );
        }
        Resolution::Thenable(thenable) => match thenable.then_member() {
            Err(reason) => {
                debug!("reading then failed");
                promise.reject(reason);
            }
            Ok(Then::Plain(value)) => promise.fulfill(value),
            Ok(Then::Callable(then)) => {
                let resolver = Resolver::new(promise.clone());
                if let Err(reason) = then(resolver.clone()) {
                    debug!("then failed, resolver already used: {}", resolver.is_called());
                    resolver.reject(reason);
                }
            }
        },
    }
}
