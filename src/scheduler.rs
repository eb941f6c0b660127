//! Deferred execution of promise reactions.
//!
//! Every reaction a [`Promise`](crate::Promise) produces is handed to a
//! [`Schedule`] implementation instead of being called inline. The default is a
//! thread-local [`TaskQueue`], drained by [`run_until_idle`]:
//!
//! ```
//! use promise_aplus::{scheduler, Promise};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! let p: Promise<i32> = Promise::resolved(1);
//! let _next: Promise<i32> = p.and_then(move |v| {
//!     sink.borrow_mut().push(v);
//!     Ok(v)
//! });
//! assert!(seen.borrow().is_empty());
//! scheduler::run_until_idle();
//! assert_eq!(*seen.borrow(), vec![1]);
//! ```

use log::{trace, warn};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Something that can run a task later, after the caller's frame returns.
///
/// Implementations must run tasks first-in-first-out and never from inside the
/// `schedule` call itself.
pub trait Schedule {
    fn schedule(&self, task: Task);
}

/// A single-threaded FIFO queue of tasks.
///
/// Cloning gives another handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Rc<Inner>,
}

struct Inner {
    name: Option<String>,
    tasks: RefCell<VecDeque<Task>>,
    running: Cell<bool>,
    scheduled: Cell<u64>,
}

/// Clears the running flag when a turn ends, even if the task panicked.
struct Turn<'a>(&'a Cell<bool>);

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueueBuilder::new().build()
    }

    pub fn builder() -> TaskQueueBuilder {
        TaskQueueBuilder::new()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.borrow().is_empty()
    }

    /// Number of tasks ever handed to this queue.
    pub fn total_scheduled(&self) -> u64 {
        self.inner.scheduled.get()
    }

    pub fn ptr_eq(&self, other: &TaskQueue) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs the oldest queued task.
    ///
    /// Returns `false` if the queue was empty, or if called from inside a task
    /// this queue is already running.
    pub fn run_once(&self) -> bool {
        if self.inner.running.get() {
            warn!("{:?}: run requested from inside one of its own tasks, ignoring", self);
            return false;
        }
        let task = self.inner.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                self.inner.running.set(true);
                let _turn = Turn(&self.inner.running);
                trace!("{:?}: running task", self);
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including ones queued while running, until the queue is
    /// empty. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut turns = 0;
        while self.run_once() {
            turns += 1;
        }
        trace!("{:?}: idle after {} turns", self, turns);
        turns
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule for TaskQueue {
    fn schedule(&self, task: Task) {
        self.inner.tasks.borrow_mut().push_back(task);
        self.inner.scheduled.set(self.inner.scheduled.get() + 1);
        trace!("{:?}: task scheduled", self);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish()
    }
}

/// Fluent configuration for a [`TaskQueue`].
///
/// ```
/// use promise_aplus::TaskQueue;
///
/// let queue = TaskQueue::builder().name("reactions").build();
/// assert_eq!(queue.name(), Some("reactions"));
/// assert!(queue.is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct TaskQueueBuilder {
    name: Option<String>,
}

impl TaskQueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels the queue in log output.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn build(self) -> TaskQueue {
        TaskQueue {
            inner: Rc::new(Inner {
                name: self.name,
                tasks: RefCell::new(VecDeque::new()),
                running: Cell::new(false),
                scheduled: Cell::new(0),
            }),
        }
    }
}

thread_local! {
    /// The queue [`Promise::new`](crate::Promise::new) schedules on.
    static CURRENT_QUEUE: RefCell<TaskQueue> = RefCell::new(TaskQueue::builder().name("current").build());
}

/// Returns a handle to this thread's current queue.
pub fn current() -> TaskQueue {
    CURRENT_QUEUE.with(|current| current.borrow().clone())
}

/// Makes `queue` the current queue while `function` runs, then restores the
/// previous one.
pub fn enter<F, R>(queue: TaskQueue, function: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = CURRENT_QUEUE.with(|current| current.replace(queue));
    let _restore = Restore(Some(previous));
    function()
}

struct Restore(Option<TaskQueue>);

impl Drop for Restore {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            CURRENT_QUEUE.with(|current| {
                current.replace(previous);
            });
        }
    }
}

/// Drains this thread's current queue. See [`TaskQueue::run_until_idle`].
pub fn run_until_idle() -> usize {
    current().run_until_idle()
}
