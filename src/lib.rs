//! Per-CPU run-queue scheduler core with multiprocessor load balancing
//!
//! This crate implements the machine-independent heart of a kernel thread
//! scheduler: per-CPU priority run queues with O(1) enqueue/dequeue, a
//! presence bitmap for fast "highest occupied priority" lookup, a migration
//! planner deciding which CPU a waking thread should run on, a periodic
//! balancer designating a donor CPU, and work stealing for idle CPUs.
//!
//! ## Architecture
//!
//! Each CPU owns:
//! - A run queue: one FIFO per priority level plus a bitmap
//! - Cached running/maximum priorities for O(1) preemption tests
//! - One mutex guarding the queue, and atomics for every field other CPUs
//!   read without the lock
//! - A hand-off slot for threads explicitly migrating to this CPU
//!
//! There is no global scheduler lock. Cross-CPU decisions (placement,
//! donor selection) read stale-tolerant atomics; only a steal or an
//! explicit hand-off takes a second CPU's lock, ordered by CPU index.
//!
//! ## What this crate is not
//!
//! Context switching, interrupt delivery, timers and the thread lifecycle
//! outside the runnable set belong to the surrounding kernel. The dispatch
//! glue drives this crate through `MpScheduler`'s narrow interface and
//! delivers the reschedule requests it accumulates.
//!
//! ## Module Organization
//!
//! - `types`: identifiers, thread states, policies, reschedule flags
//! - `priority`: priority bands and the bitmap search primitive
//! - `thread`: the schedulable unit and its atomic bookkeeping
//! - `runqueue`: the per-CPU priority-FIFO container and its invariants
//! - `cpu`: per-CPU state, cached fields and statistics counters
//! - `sched`: the enqueue/dequeue engine and the external interface
//! - `migrate`: placement planning and work stealing
//! - `balance`: the periodic donor-selection pass
//! - `stats`: read-only inspection
//! - `config`: runtime-tunable policy knobs

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod balance;
pub mod config;
pub mod cpu;
mod migrate;
pub mod priority;
pub mod runqueue;
pub mod sched;
pub mod stats;
pub mod thread;
pub mod types;

pub use config::Tunables;
pub use cpu::{CpuSchedState, CpuStats};
pub use priority::{is_realtime, PRI_COUNT, PRI_RT_FIRST, PRI_TS_COUNT};
pub use runqueue::RunQueue;
pub use sched::MpScheduler;
pub use stats::CpuStatsSnapshot;
pub use thread::Thread;
pub use types::{CpuId, Resched, SchedPolicy, ThreadId, ThreadState, CPU_NONE, MAX_CPUS, PSET_NONE};

// ===========================================================================
// Kernel-style logging macros, forwarded to the `log` facade
// ===========================================================================

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { ::log::error!($($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { ::log::warn!($($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { ::log::info!($($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { ::log::debug!($($arg)*) };
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { ::log::trace!($($arg)*) };
}
