use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::script::ScriptId;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueuedTask {
    id: ScriptId,
    run: Task,
}

/// Single-worker FIFO with set-queue semantics: the queue is also a set
/// keyed by [`ScriptId`], so re-submitting a script whose task is still
/// queued is a no-op. A script whose task is currently *running* may be
/// enqueued once more; the freshness re-check at task start makes the
/// follow-up free when the live file already matches the cache.
///
/// A panicking task does not poison the worker: it is logged, counted as
/// completed, and the worker moves on.
pub struct BackgroundExecutor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Wakes the worker on enqueue and shutdown.
    work: Condvar,
    /// Wakes drainers on task completion and shutdown.
    done: Condvar,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedTask>,
    queued_keys: HashSet<ScriptId>,
    running: Option<ScriptId>,
    /// Monotonic counters backing the snapshot semantics of [`drain`]:
    /// a drain waits for the tasks enqueued before the call, not for tasks
    /// enqueued while it waits.
    ///
    /// [`drain`]: BackgroundExecutor::drain
    enqueued: u64,
    completed: u64,
    shutdown: bool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BackgroundExecutor {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work: Condvar::new(),
            done: Condvar::new(),
        });
        let worker = std::thread::Builder::new()
            .name("scl-config-loader".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || worker_loop(&shared)
            })
            .expect("failed to spawn configuration loader worker");
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue `task` unless a task for this script is already queued.
    /// Returns whether the task was enqueued. Never blocks beyond the
    /// queue-insertion critical section.
    pub fn ensure_scheduled(&self, id: &ScriptId, task: impl FnOnce() + Send + 'static) -> bool {
        let mut state = self.shared.state();
        if state.shutdown || state.queued_keys.contains(id) {
            return false;
        }
        state.queued_keys.insert(id.clone());
        state.queue.push_back(QueuedTask {
            id: id.clone(),
            run: Box::new(task),
        });
        state.enqueued += 1;
        self.shared.work.notify_one();
        true
    }

    /// Whether a task for this script is queued or running.
    pub fn is_scheduled(&self, id: &ScriptId) -> bool {
        let state = self.shared.state();
        state.queued_keys.contains(id) || state.running.as_ref() == Some(id)
    }

    /// Block until every task enqueued before this call has completed.
    /// Tasks enqueued while draining are left for a later drain.
    /// Test/harness facility; the editor never drains.
    pub fn drain(&self) {
        let mut state = self.shared.state();
        let target = state.enqueued;
        while state.completed < target && !state.shutdown {
            state = self
                .shared
                .done
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Drop queued tasks, stop and join the worker. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state();
            state.shutdown = true;
            state.queue.clear();
            state.queued_keys.clear();
        }
        self.shared.work.notify_all();
        self.shared.done.notify_all();

        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Default for BackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let QueuedTask { id, run } = {
            let mut state = shared.state();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    state.queued_keys.remove(&task.id);
                    state.running = Some(task.id.clone());
                    break task;
                }
                state = shared.work.wait(state).unwrap_or_else(|e| e.into_inner());
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(run)).is_err() {
            log::error!("configuration load task panicked for {id}");
        }

        let mut state = shared.state();
        state.running = None;
        state.completed += 1;
        shared.done.notify_all();
    }
}
