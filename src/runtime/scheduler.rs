//! Worker pool and injector queue.
//!
//! Every worker pulls from one shared lock-free queue. Idle workers park on
//! a condition variable; pushers take the idle lock before notifying so a
//! worker that just observed an empty queue cannot miss the wakeup.
//!
//! The live-task registry owns every unfinished task. Shutdown drains it
//! and drops the remaining futures so parked tasks do not outlive the
//! runtime (and the waker cycles they hold are broken).

use super::task::{BoxFuture, Task, TaskId};
use crate::tracing_compat::{debug, trace};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use slab::Slab;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct Shared {
    queue: SegQueue<Arc<Task>>,
    idle: Mutex<()>,
    signal: Condvar,
    shutdown: AtomicBool,
    tasks: Mutex<Slab<Arc<Task>>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            idle: Mutex::new(()),
            signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
            tasks: Mutex::new(Slab::new()),
        }
    }

    pub(crate) fn push(&self, task: Arc<Task>) {
        self.queue.push(task);
        drop(self.idle.lock());
        self.signal.notify_one();
    }

    /// Registers and schedules a new task. Returns `None` after shutdown.
    pub(crate) fn spawn(self: &Arc<Self>, future: BoxFuture) -> Option<TaskId> {
        let id = TaskId::next();
        let task = {
            let mut tasks = self.tasks.lock();
            // Checked under the registry lock so `drain` cannot miss a task.
            if self.is_shutdown() {
                return None;
            }
            let entry = tasks.vacant_entry();
            let task = Arc::new(Task::new(id, entry.key(), future, Arc::downgrade(self)));
            entry.insert(Arc::clone(&task));
            task
        };
        trace!(task = %id, "task spawned");
        self.push(task);
        Some(id)
    }

    pub(crate) fn live_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn next_task(&self) -> Option<Arc<Task>> {
        loop {
            if self.is_shutdown() {
                return None;
            }
            if let Some(task) = self.queue.pop() {
                return Some(task);
            }
            let mut idle = self.idle.lock();
            if self.is_shutdown() {
                return None;
            }
            if self.queue.is_empty() {
                self.signal.wait(&mut idle);
            }
        }
    }

    pub(crate) fn run_worker(&self, index: usize) {
        debug!(worker = index, "worker started");
        while let Some(task) = self.next_task() {
            if task.run() {
                self.tasks.lock().try_remove(task.key);
            }
        }
        debug!(worker = index, "worker stopped");
    }

    /// Stops the workers and drops every unfinished task.
    pub(crate) fn begin_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.idle.lock());
        self.signal.notify_all();
    }

    pub(crate) fn drain(&self) {
        while self.queue.pop().is_some() {}
        let tasks: Vec<Arc<Task>> = self.tasks.lock().drain().collect();
        let aborted = tasks.len();
        // Futures are dropped outside the registry lock: their destructors
        // may touch channels and tokens.
        for task in tasks {
            drop(task.abort());
        }
        if aborted > 0 {
            debug!(aborted, "dropped unfinished tasks at shutdown");
        }
    }
}
