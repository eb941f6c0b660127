use futures::executor::block_on;
use futures::task::{waker, ArcWake};
use promise_aplus::{
    scheduler, Error, FnThenable, Promise, Resolution, Resolver, Schedule, State, Then, Thenable,
};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A thenable that settles on a later turn, like a foreign promise would.
fn later(value: i32) -> Resolution<i32> {
    Resolution::thenable(FnThenable::new(move |r: Resolver<i32>| {
        scheduler::current().schedule(Box::new(move || r.resolve(value)));
        Ok(())
    }))
}

/// A thenable whose `then` fulfills with another thenable.
fn nested(value: i32) -> Resolution<i32> {
    Resolution::thenable(FnThenable::new(move |r: Resolver<i32>| {
        r.resolve(later(value));
        Ok(())
    }))
}

#[test]
fn test_foreign_thenable_is_adopted() {
    init_logger();
    let (p, resolver) = Promise::<i32>::deferred();
    resolver.resolve(later(7));
    assert!(p.is_pending());
    scheduler::run_until_idle();
    assert_eq!(p.state(), State::Fulfilled(7));
}

#[test]
fn test_nested_thenables_unwrap_fully() {
    init_logger();
    let p: Promise<i32> = Promise::resolved(0);
    let q: Promise<i32> = p.and_then(|_| Ok(nested(99)));
    scheduler::run_until_idle();
    assert_eq!(q.state(), State::Fulfilled(99));
}

#[test]
fn test_derived_settles_only_after_unwrapping() {
    init_logger();
    let (p, resolver) = Promise::<i32>::deferred();
    resolver.resolve(nested(5));
    let observed = Rc::new(RefCell::new(Vec::new()));
    let sink = observed.clone();
    let _: Promise<()> = p.and_then(move |v| {
        sink.borrow_mut().push(v);
        Ok(())
    });
    assert!(p.is_pending());
    assert!(scheduler::current().run_once());
    assert!(p.is_fulfilled());
    assert!(observed.borrow().is_empty());
    scheduler::run_until_idle();
    assert_eq!(*observed.borrow(), vec![5]);
}

#[test]
fn test_thenable_calling_both_callbacks_honors_first() {
    init_logger();
    let (p, resolver) = Promise::<i32>::deferred();
    resolver.resolve(Resolution::thenable(FnThenable::new(|r: Resolver<i32>| {
        r.resolve(1);
        r.reject(Error::msg("ignored"));
        r.resolve(2);
        Ok(())
    })));
    assert_eq!(p.state(), State::Fulfilled(1));

    let (q, resolver) = Promise::<i32>::deferred();
    resolver.resolve(Resolution::thenable(FnThenable::new(|r: Resolver<i32>| {
        r.reject(Error::msg("first"));
        r.resolve(3);
        Ok(())
    })));
    assert_eq!(q.state(), State::Rejected(Error::msg("first")));
}

#[test]
fn test_thenable_rejection_is_not_unwrapped() {
    init_logger();
    let p: Promise<i32> = Promise::resolved(0);
    let q: Promise<i32> = p.and_then(|_| {
        Ok(Resolution::thenable(FnThenable::new(|r: Resolver<i32>| {
            r.reject(Error::msg("foreign failure"));
            Ok(())
        })))
    });
    scheduler::run_until_idle();
    assert_eq!(q.state(), State::Rejected(Error::msg("foreign failure")));
}

#[test]
fn test_thenable_resolving_back_to_its_promise_is_a_cycle() {
    init_logger();
    let (p, resolver) = Promise::<i32>::deferred();
    let target = p.clone();
    resolver.resolve(Resolution::thenable(FnThenable::new(move |r: Resolver<i32>| {
        r.resolve(target);
        Ok(())
    })));
    assert_eq!(p.state(), State::Rejected(Error::ChainingCycle));
}

struct Throwing;

impl Thenable<i32, Error> for Throwing {
    fn then_member(self: Box<Self>) -> Result<Then<i32, Error>, Error> {
        Err(Error::msg("then getter threw"))
    }
}

struct Record {
    id: i32,
}

impl Thenable<i32, Error> for Record {
    fn then_member(self: Box<Self>) -> Result<Then<i32, Error>, Error> {
        Ok(Then::Plain(self.id))
    }
}

#[test]
fn test_then_member_lookup_outcomes() {
    init_logger();
    let p: Promise<i32> = Promise::resolved(0);
    let thrown: Promise<i32> = p.and_then(|_| Ok(Resolution::thenable(Throwing)));
    let plain: Promise<i32> = p.and_then(|_| Ok(Resolution::thenable(Record { id: 12 })));
    scheduler::run_until_idle();
    assert_eq!(thrown.state(), State::Rejected(Error::msg("then getter threw")));
    assert_eq!(plain.state(), State::Fulfilled(12));
}

#[derive(Default)]
struct CountingWaker {
    wakes: AtomicUsize,
}

impl ArcWake for CountingWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.wakes.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_awaiting_a_settled_promise() {
    init_logger();
    let p: Promise<i32> = Promise::resolved(4);
    assert_eq!(block_on(p.clone()), Ok(4));
    let q: Promise<i32> = Promise::rejected(Error::msg("gone"));
    assert_eq!(block_on(q), Err(Error::msg("gone")));
}

#[test]
fn test_pending_promise_wakes_pollers() {
    init_logger();
    let (mut p, resolver) = Promise::<i32>::deferred();
    let counter = Arc::new(CountingWaker::default());
    let waker = waker(counter.clone());
    let mut cx = Context::from_waker(&waker);

    assert!(Pin::new(&mut p).poll(&mut cx).is_pending());
    assert_eq!(counter.wakes.load(Ordering::SeqCst), 0);

    resolver.resolve(later(6));
    scheduler::run_until_idle();
    assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);
    assert_eq!(Pin::new(&mut p).poll(&mut cx), Poll::Ready(Ok(6)));
}

#[test]
fn test_resolver_locked_while_adopting_pending_thenable() {
    init_logger();
    let p: Promise<i32> = Promise::new(|resolver| {
        resolver.resolve(later(8));
        resolver.reject(Error::msg("late reject"));
        resolver.resolve(9);
        Err(Error::msg("late throw"))
    });
    assert!(p.is_pending());
    scheduler::run_until_idle();
    assert_eq!(p.state(), State::Fulfilled(8));
}
