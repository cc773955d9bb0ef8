//! Main-thread affinity contract.
//!
//! Network work never runs on the host's UI thread, and results for UI
//! callers are handed back to it. [`ThreadAffinity`] lets the host describe
//! its UI thread; [`Headless`] is for hosts that have none.

use std::collections::VecDeque;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

/// Work to run on the main thread.
pub type MainTask = Box<dyn FnOnce() + Send + 'static>;

pub trait ThreadAffinity: Send + Sync {
    /// Whether the calling thread is the host's UI thread.
    fn is_main_thread(&self) -> bool;

    /// Schedule `task` to run on the UI thread.
    fn post_to_main(&self, task: MainTask);
}

/// No UI thread: nothing is main, tasks run inline on the posting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Headless;

impl ThreadAffinity for Headless {
    fn is_main_thread(&self) -> bool {
        false
    }

    fn post_to_main(&self, task: MainTask) {
        task();
    }
}

/// Treats the constructing thread as main; posted tasks wait in a queue until
/// that thread calls [`MainThreadQueue::drain`].
pub struct MainThreadQueue {
    main: ThreadId,
    queue: Mutex<VecDeque<MainTask>>,
}

impl MainThreadQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            main: thread::current().id(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Run every queued task. Only the main thread may drain; from any other
    /// thread this is a no-op returning `0`.
    pub fn drain(&self) -> usize {
        if !self.is_main_thread() {
            return 0;
        }
        let mut ran = 0;
        // The lock is released before each task runs so tasks may post more.
        loop {
            let next = self.queue.lock().pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for MainThreadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadAffinity for MainThreadQueue {
    fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main
    }

    fn post_to_main(&self, task: MainTask) {
        self.queue.lock().push_back(task);
    }
}
