use crate::promise::Promise;
use crate::resolution::{self, Resolution};
use crate::Error;
use log::debug;
use std::cell::Cell;
use std::rc::Rc;

type Handler<V, U, E> = Box<dyn FnOnce(V) -> Result<Resolution<U, E>, E>>;

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Derives a promise from this one's settlement.
    ///
    /// Exactly one handler runs, on a later scheduler turn, even when this
    /// promise is already settled. `Ok(x)` resolves the derived promise with
    /// `x` (adopting it if it is a promise or thenable); `Err(r)` rejects it.
    ///
    /// When a handler returns a promise, annotate the derived type so `U` is
    /// the promise's value type rather than the promise itself.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{scheduler, Error, Promise, State};
    ///
    /// let failed: Promise<i32> = Promise::rejected(Error::msg("nope"));
    /// let recovered: Promise<String> = failed.then(
    ///     |v| Ok(v.to_string()),
    ///     |e| Ok(format!("recovered from {}", e)),
    /// );
    /// scheduler::run_until_idle();
    /// assert_eq!(recovered.state(), State::Fulfilled("recovered from nope".to_string()));
    /// ```
    pub fn then<U, F, G, X, Y>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<X, E> + 'static,
        G: FnOnce(E) -> Result<Y, E> + 'static,
        X: Into<Resolution<U, E>>,
        Y: Into<Resolution<U, E>>,
    {
        self.then_reactions(
            Box::new(move |value| on_fulfilled(value).map(Into::into)),
            Box::new(move |reason| on_rejected(reason).map(Into::into)),
        )
    }

    /// `then` without a rejection handler: rejections pass through unchanged.
    pub fn and_then<U, F, X>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<X, E> + 'static,
        X: Into<Resolution<U, E>>,
    {
        self.then_reactions(
            Box::new(move |value| on_fulfilled(value).map(Into::into)),
            Box::new(|reason| Err(reason)),
        )
    }

    /// `then` without a fulfillment handler: values pass through unchanged.
    pub fn catch<G, Y>(&self, on_rejected: G) -> Promise<T, E>
    where
        G: FnOnce(E) -> Result<Y, E> + 'static,
        Y: Into<Resolution<T, E>>,
    {
        self.then_reactions(
            Box::new(|value| Ok(Resolution::Value(value))),
            Box::new(move |reason| on_rejected(reason).map(Into::into)),
        )
    }

    /// `then` with neither handler: a new promise settling like this one.
    pub fn forward(&self) -> Promise<T, E> {
        self.then_reactions(
            Box::new(|value| Ok(Resolution::Value(value))),
            Box::new(|reason| Err(reason)),
        )
    }

    /// Runs `f` once this promise settles, either way, and passes the
    /// settlement through.
    pub fn finally<F>(&self, f: F) -> Promise<T, E>
    where
        F: FnOnce() + 'static,
    {
        let on_fulfilled = Rc::new(Cell::new(Some(f)));
        let on_rejected = on_fulfilled.clone();
        self.then_reactions(
            Box::new(move |value| {
                if let Some(f) = on_fulfilled.take() {
                    f();
                }
                Ok(Resolution::Value(value))
            }),
            Box::new(move |reason| {
                if let Some(f) = on_rejected.take() {
                    f();
                }
                Err(reason)
            }),
        )
    }

    fn then_reactions<U>(
        &self,
        on_fulfilled: Handler<T, U, E>,
        on_rejected: Handler<E, U, E>,
    ) -> Promise<U, E>
    where
        U: Clone + 'static,
    {
        let derived = Promise::pending_in(self.scheduler());
        let fulfilled_target = derived.clone();
        let rejected_target = derived.clone();
        self.register_reactions(
            move |value| react(&fulfilled_target, on_fulfilled(value)),
            move |reason| react(&rejected_target, on_rejected(reason)),
        );
        derived
    }
}

fn react<U, E>(derived: &Promise<U, E>, outcome: Result<Resolution<U, E>, E>)
where
    U: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match outcome {
        Ok(x) => resolution::resolve_promise(derived, x),
        Err(reason) => {
            debug!("handler failed, rejecting derived promise");
            derived.reject(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::scheduler::Schedule;
    use crate::{Error, Promise, State, TaskQueue};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn deferred(queue: &TaskQueue) -> (Promise<i32>, crate::Resolver<i32>) {
        let scheduler: Rc<dyn Schedule> = Rc::new(queue.clone());
        Promise::deferred_in(scheduler)
    }

    #[test]
    fn test_then_returns_new_promise_before_handlers_run() {
        let queue = TaskQueue::new();
        let (p, resolver) = deferred(&queue);
        resolver.resolve(1);
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let q: Promise<i32> = p.and_then(move |v| {
            flag.set(true);
            Ok(v)
        });
        assert!(!q.ptr_eq(&p));
        assert!(!ran.get());
        assert!(q.is_pending());
        queue.run_until_idle();
        assert!(ran.get());
        assert_eq!(q.state(), State::Fulfilled(1));
    }

    #[test]
    fn test_derived_inherits_scheduler() {
        let queue = TaskQueue::new();
        let (p, resolver) = deferred(&queue);
        let q = p.forward();
        resolver.resolve(3);
        assert_eq!(queue.len(), 1);
        queue.run_until_idle();
        assert_eq!(q.state(), State::Fulfilled(3));
    }

    #[test]
    fn test_handler_error_rejects_derived() {
        let queue = TaskQueue::new();
        let (p, resolver) = deferred(&queue);
        let q: Promise<i32> = p.and_then(|_| Err::<i32, _>(Error::msg("x")));
        resolver.resolve(0);
        queue.run_until_idle();
        assert_eq!(q.state(), State::Rejected(Error::msg("x")));
    }

    #[test]
    fn test_catch_recovers_and_passes_values() {
        let queue = TaskQueue::new();
        let (p, resolver) = deferred(&queue);
        let recovered = p.catch(|_| Ok(-1));
        resolver.reject(Error::msg("bad"));
        let (ok, ok_resolver) = deferred(&queue);
        let untouched = ok.catch(|_| Ok(-1));
        ok_resolver.resolve(5);
        queue.run_until_idle();
        assert_eq!(recovered.state(), State::Fulfilled(-1));
        assert_eq!(untouched.state(), State::Fulfilled(5));
    }

    #[test]
    fn test_finally_runs_once_and_passes_through() {
        let queue = TaskQueue::new();
        let (p, resolver) = deferred(&queue);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let q = p.finally(move || counter.set(counter.get() + 1));
        resolver.reject(Error::msg("kept"));
        queue.run_until_idle();
        assert_eq!(calls.get(), 1);
        assert_eq!(q.state(), State::Rejected(Error::msg("kept")));
    }

    #[test]
    fn test_returning_own_derived_promise_is_a_cycle() {
        let queue = TaskQueue::new();
        let (p, resolver) = deferred(&queue);
        let slot: Rc<RefCell<Option<Promise<i32>>>> = Rc::new(RefCell::new(None));
        let lookup = slot.clone();
        let q: Promise<i32> = p.and_then(move |_| {
            let derived = lookup.borrow().clone();
            derived.ok_or_else(|| Error::msg("derived promise missing"))
        });
        *slot.borrow_mut() = Some(q.clone());
        resolver.resolve(1);
        queue.run_until_idle();
        assert_eq!(q.state(), State::Rejected(Error::ChainingCycle));
    }
}
