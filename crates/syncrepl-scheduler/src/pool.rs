//! Cooperative worker pool driving the runqueue (spec §4.7, §5).
//!
//! Plain OS threads, no async runtime: a fixed-size pool of workers pulls
//! ready tasks from the shared [`RunQueue`] and runs them to completion,
//! one at a time per task, with the pool itself carrying no other shared
//! state than the runqueue and the task table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use syncrepl_types::Rid;

use crate::runqueue::RunQueue;

/// One scheduler-managed unit of work. Implementors own everything a
/// replica's session needs (session machine, backend handle, cookie
/// state) -- the scheduler itself only knows how to time and serialize
/// invocations, matching spec §4.7's description of the runqueue as
/// generic over "timed tasks".
pub trait ReplicaTask: Send {
    fn rid(&self) -> Rid;

    /// Runs one scheduler invocation (spec §4.6's dispatch loop, driven
    /// until it reaches a terminal per-tick state) and reports how the
    /// scheduler should reschedule it.
    fn tick(&mut self, shutdown: &AtomicBool) -> TickOutcome;
}

/// What a [`ReplicaTask::tick`] invocation decided (spec §4.6 "Retry",
/// §5 "Cancellation").
#[derive(Debug, Clone, Copy)]
pub enum TickOutcome {
    /// Completed a refresh or persist cycle; reschedule after the
    /// replica's configured poll interval.
    Interval(Duration),
    /// Transport or protocol failure; reschedule after the next retry
    /// step.
    RetryWait(Duration),
    /// The retry schedule is exhausted (spec §4.6: "the replica is
    /// removed").
    Exhausted,
    /// Pool pause or refresh-gate contention observed mid-tick;
    /// re-queue at zero delay so the runqueue can drain and resume
    /// (spec §4.6, §5).
    Paused,
    /// Global shutdown flag observed; drop the task without
    /// rescheduling.
    ShuttingDown,
}

pub struct SchedulerConfig {
    pub worker_count: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: thread::available_parallelism().map_or(1, std::num::NonZero::get),
        }
    }
}

type TaskMap = Arc<Mutex<HashMap<Rid, Arc<Mutex<Box<dyn ReplicaTask>>>>>>;

/// Drives the runqueue with a fixed pool of worker threads.
///
/// # Lifecycle
///
/// 1. Create with `Scheduler::new(config)`.
/// 2. `register()` each replica's task with its initial delay.
/// 3. Call `start()` to spawn worker threads.
/// 4. Call `shutdown()` to stop all workers and join threads.
pub struct Scheduler {
    runqueue: Arc<RunQueue>,
    tasks: TaskMap,
    shutdown: Arc<AtomicBool>,
    handles: Vec<Option<thread::JoinHandle<()>>>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            runqueue: Arc::new(RunQueue::new()),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            config,
        }
    }

    /// Registers a replica task to first fire after `initial_delay`.
    pub fn register(&self, task: Box<dyn ReplicaTask>, initial_delay: Duration) {
        let rid = task.rid();
        self.tasks
            .lock()
            .expect("task table poisoned")
            .insert(rid, Arc::new(Mutex::new(task)));
        self.runqueue.register(rid, initial_delay);
    }

    /// Reconfiguration: allow the replica's current invocation (if any)
    /// to finish, then stop scheduling it (spec §4.7).
    pub fn retract(&self, rid: Rid) {
        self.runqueue.retract(rid);
    }

    /// Spawns the worker pool and begins processing the runqueue.
    ///
    /// # Panics
    ///
    /// Panics if called more than once without an intervening
    /// `shutdown()`.
    pub fn start(&mut self) {
        assert!(
            self.handles.is_empty(),
            "scheduler already started; call shutdown() first"
        );

        let mut handles = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count {
            let runqueue = Arc::clone(&self.runqueue);
            let tasks = Arc::clone(&self.tasks);
            let shutdown = Arc::clone(&self.shutdown);

            let handle = thread::Builder::new()
                .name(format!("syncrepl-worker-{worker_id}"))
                .spawn(move || Self::worker_loop(&runqueue, &tasks, &shutdown))
                .expect("failed to spawn scheduler worker thread");
            handles.push(Some(handle));
        }
        self.handles = handles;
    }

    fn worker_loop(runqueue: &RunQueue, tasks: &TaskMap, shutdown: &AtomicBool) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            let Some(rid) = runqueue.pop_ready() else {
                return;
            };

            let task = tasks.lock().expect("task table poisoned").get(&rid).cloned();
            let Some(task) = task else {
                runqueue.complete(rid, None);
                continue;
            };

            let outcome = {
                let mut guard = task.lock().expect("replica task mutex poisoned");
                guard.tick(shutdown)
            };

            match outcome {
                TickOutcome::Interval(delay) | TickOutcome::RetryWait(delay) => {
                    runqueue.complete(rid, Some(delay));
                }
                TickOutcome::Paused => {
                    runqueue.complete(rid, Some(Duration::ZERO));
                }
                TickOutcome::Exhausted | TickOutcome::ShuttingDown => {
                    runqueue.complete(rid, None);
                    tasks.lock().expect("task table poisoned").remove(&rid);
                }
            }
        }
    }

    /// Stops all workers and joins their threads. Safe to call multiple
    /// times.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.runqueue.shutdown();
        for handle in &mut self.handles {
            if let Some(h) = handle.take() {
                let _ = h.join();
            }
        }
        self.handles.clear();
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        rid: Rid,
        remaining_ticks: usize,
        ticks: Arc<AtomicUsize>,
    }

    impl ReplicaTask for CountingTask {
        fn rid(&self) -> Rid {
            self.rid
        }

        fn tick(&mut self, _shutdown: &AtomicBool) -> TickOutcome {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.remaining_ticks == 0 {
                return TickOutcome::Exhausted;
            }
            self.remaining_ticks -= 1;
            TickOutcome::Interval(Duration::from_millis(5))
        }
    }

    #[test]
    fn scheduler_runs_task_to_exhaustion() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(SchedulerConfig { worker_count: 1 });
        scheduler.register(
            Box::new(CountingTask {
                rid: Rid::new(1),
                remaining_ticks: 3,
                ticks: Arc::clone(&ticks),
            }),
            Duration::ZERO,
        );
        scheduler.start();

        // 4 ticks total: 3 reschedules + the exhausting one.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ticks.load(Ordering::SeqCst) < 4 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ticks.load(Ordering::SeqCst), 4);

        scheduler.shutdown();
    }

    #[test]
    fn retract_stops_future_scheduling() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(SchedulerConfig { worker_count: 1 });
        let rid = Rid::new(7);
        scheduler.register(
            Box::new(CountingTask {
                rid,
                remaining_ticks: usize::MAX,
                ticks: Arc::clone(&ticks),
            }),
            Duration::ZERO,
        );
        scheduler.start();

        thread::sleep(Duration::from_millis(20));
        scheduler.retract(rid);
        let count_at_retract = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        // The in-flight invocation may still land, but no more after that.
        assert!(ticks.load(Ordering::SeqCst) <= count_at_retract + 1);

        scheduler.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut scheduler = Scheduler::new(SchedulerConfig { worker_count: 2 });
        scheduler.start();
        scheduler.shutdown();
        scheduler.shutdown();
    }

    #[test]
    fn default_config_has_positive_worker_count() {
        let config = SchedulerConfig::default();
        assert!(config.worker_count >= 1);
    }

    #[test]
    #[should_panic(expected = "scheduler already started")]
    fn double_start_panics() {
        let mut scheduler = Scheduler::new(SchedulerConfig { worker_count: 1 });
        scheduler.start();
        scheduler.start();
    }
}
