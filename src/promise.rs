use crate::resolution::{self, Resolution};
use crate::scheduler::{self, Schedule, Task};
use crate::Error;
use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// The settlement state of a [`Promise`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, State::Rejected(_))
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }
}

impl<T, E> fmt::Display for State<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending => f.write_str("pending"),
            State::Fulfilled(_) => f.write_str("fulfilled"),
            State::Rejected(_) => f.write_str("rejected"),
        }
    }
}

type Reaction<V> = Box<dyn FnOnce(V)>;

struct Inner<T, E> {
    state: State<T, E>,
    fulfill_reactions: Vec<Reaction<T>>,
    reject_reactions: Vec<Reaction<E>>,
    wakers: Vec<Waker>,
    scheduler: Rc<dyn Schedule>,
}

/// A value that settles once, into `Ok(T)` or `Err(E)`, and notifies its
/// reactions on a later scheduler turn.
///
/// `Promise` is a cheap handle: clones observe the same settlement.
///
/// # Examples
///
/// ```
/// use promise_aplus::{scheduler, Promise, State};
///
/// let p: Promise<String> = Promise::new(|resolver| {
///     resolver.resolve("ok".to_string());
///     Ok(())
/// });
/// let shouted: Promise<String> = p.and_then(|v| Ok(v + "!"));
/// assert!(shouted.is_pending());
///
/// scheduler::run_until_idle();
/// assert_eq!(shouted.state(), State::Fulfilled("ok!".to_string()));
/// ```
pub struct Promise<T, E = Error> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Creates a promise and runs `executor` synchronously with its resolver.
    ///
    /// Returning `Err(reason)` from the executor rejects the promise, unless
    /// the resolver was already used.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        Self::new_in(Rc::new(scheduler::current()), executor)
    }

    /// Like [`Promise::new`], with reactions scheduled on `scheduler`.
    pub fn new_in<F>(scheduler: Rc<dyn Schedule>, executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (promise, resolver) = Self::deferred_in(scheduler);
        if let Err(reason) = executor(resolver.clone()) {
            debug!("executor failed");
            resolver.reject(reason);
        }
        promise
    }

    /// A pending promise together with the resolver that settles it.
    ///
    /// ```
    /// use promise_aplus::{scheduler, Promise, State};
    ///
    /// let (promise, resolver) = Promise::<u32>::deferred();
    /// resolver.resolve(7);
    /// resolver.resolve(8);
    /// assert_eq!(promise.state(), State::Fulfilled(7));
    /// ```
    pub fn deferred() -> (Self, Resolver<T, E>) {
        Self::deferred_in(Rc::new(scheduler::current()))
    }

    pub fn deferred_in(scheduler: Rc<dyn Schedule>) -> (Self, Resolver<T, E>) {
        let promise = Self::pending_in(scheduler);
        let resolver = Resolver::new(promise.clone());
        (promise, resolver)
    }

    /// An already fulfilled promise.
    pub fn resolved(value: T) -> Self {
        let promise = Self::pending_in(Rc::new(scheduler::current()));
        promise.fulfill(value);
        promise
    }

    /// An already rejected promise.
    pub fn rejected(reason: E) -> Self {
        let promise = Self::pending_in(Rc::new(scheduler::current()));
        promise.reject(reason);
        promise
    }

    pub(crate) fn pending_in(scheduler: Rc<dyn Schedule>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                fulfill_reactions: Vec::new(),
                reject_reactions: Vec::new(),
                wakers: Vec::new(),
                scheduler,
            })),
        }
    }

    pub(crate) fn fulfill(&self, value: T) {
        self.settle(Ok(value))
    }

    pub(crate) fn reject(&self, reason: E) {
        self.settle(Err(reason))
    }

    fn settle(&self, outcome: Result<T, E>) {
        let (fulfill_reactions, reject_reactions, wakers, scheduler) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_settled() {
                trace!("promise already {}, ignoring settlement", inner.state);
                return;
            }
            inner.state = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            (
                std::mem::take(&mut inner.fulfill_reactions),
                std::mem::take(&mut inner.reject_reactions),
                std::mem::take(&mut inner.wakers),
                inner.scheduler.clone(),
            )
        };
        match outcome {
            Ok(value) => {
                trace!("promise fulfilled, {} reactions", fulfill_reactions.len());
                for reaction in fulfill_reactions {
                    let value = value.clone();
                    scheduler.schedule(Box::new(move || reaction(value)));
                }
            }
            Err(reason) => {
                trace!("promise rejected, {} reactions", reject_reactions.len());
                for reaction in reject_reactions {
                    let reason = reason.clone();
                    scheduler.schedule(Box::new(move || reaction(reason)));
                }
            }
        }
        for waker in wakers {
            waker.wake()
        }
    }

    /// Runs one of the two reactions on a later scheduler turn, once this
    /// promise settles. Already settled promises schedule right away.
    pub(crate) fn register_reactions<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(E) + 'static,
    {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let task: Task = match &inner.state {
            State::Pending => {
                inner.fulfill_reactions.push(Box::new(on_fulfilled));
                inner.reject_reactions.push(Box::new(on_rejected));
                return;
            }
            State::Fulfilled(value) => {
                let value = value.clone();
                Box::new(move || on_fulfilled(value))
            }
            State::Rejected(reason) => {
                let reason = reason.clone();
                Box::new(move || on_rejected(reason))
            }
        };
        let scheduler = inner.scheduler.clone();
        drop(guard);
        scheduler.schedule(task);
    }
}

impl<T: Clone, E: Clone> Promise<T, E> {
    /// A snapshot of the current state.
    pub fn state(&self) -> State<T, E> {
        self.inner.borrow().state.clone()
    }
}

impl<T, E> Promise<T, E> {
    pub fn is_pending(&self) -> bool {
        self.inner.borrow().state.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.inner.borrow().state.is_fulfilled()
    }

    pub fn is_rejected(&self) -> bool {
        self.inner.borrow().state.is_rejected()
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Promise<T, E>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn scheduler(&self) -> Rc<dyn Schedule> {
        self.inner.borrow().scheduler.clone()
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Promise")
            .field("state", &inner.state)
            .field("fulfill_reactions", &inner.fulfill_reactions.len())
            .field("reject_reactions", &inner.reject_reactions.len())
            .finish()
    }
}

/// Awaiting a promise yields its settlement. Something must still drive the
/// promise's scheduler for pending promises to make progress.
impl<T: Clone, E: Clone> Future for Promise<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        match &inner.state {
            State::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            State::Rejected(reason) => Poll::Ready(Err(reason.clone())),
            State::Pending => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// The resolve/reject capability of one promise.
///
/// All clones share one guard: the first `resolve` or `reject` through any of
/// them wins, everything after is ignored.
pub struct Resolver<T, E = Error> {
    promise: Promise<T, E>,
    called: Rc<Cell<bool>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            called: self.called.clone(),
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub(crate) fn new(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            called: Rc::new(Cell::new(false)),
        }
    }

    /// Resolves with a plain value, another promise, or a thenable. Promises
    /// and thenables are adopted: this promise settles the way they do.
    pub fn resolve(&self, value: impl Into<Resolution<T, E>>) {
        if self.called.replace(true) {
            trace!("resolver already used, ignoring resolve");
            return;
        }
        resolution::resolve_promise(&self.promise, value.into());
    }

    pub fn reject(&self, reason: E) {
        if self.called.replace(true) {
            trace!("resolver already used, ignoring reject");
            return;
        }
        self.promise.reject(reason);
    }

    /// Whether `resolve` or `reject` has been called on this resolver.
    pub fn is_called(&self) -> bool {
        self.called.get()
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .field("called", &self.called.get())
            .finish()
    }
}
