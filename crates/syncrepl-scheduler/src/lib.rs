//! # syncrepl-scheduler: replica runqueue and worker pool (component G)
//!
//! A single shared runqueue of timed per-replica tasks, guaranteeing at
//! most one active invocation per task, driven by a fixed pool of plain OS
//! threads (spec §4.7, §5).

mod pool;
mod runqueue;

pub use pool::{ReplicaTask, Scheduler, SchedulerConfig, TickOutcome};
pub use runqueue::RunQueue;
