//! Scheduler type definitions
//!
//! This module contains the basic types shared by the scheduler subsystem:
//! thread/CPU identifiers, thread states, scheduling policies and the
//! reschedule-request flags delivered to a target CPU.

use bitflags::bitflags;

/// Thread identifier (assigned by the caller, opaque to the scheduler)
pub type ThreadId = u64;

/// CPU index
pub type CpuId = u32;

/// Sentinel for "no CPU" in atomic CPU-reference fields
pub const CPU_NONE: CpuId = u32::MAX;

/// Sentinel for "no processor set"
pub const PSET_NONE: u32 = 0;

/// Maximum supported CPUs
pub const MAX_CPUS: usize = 256;

/// Thread state as seen by the scheduler
///
/// Only `Runnable` carries run-queue membership obligations; `Running` and
/// the blocked/stopped states are unqueued from the scheduler's point of
/// view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Runnable = 0,
    Running = 1,
    Blocked = 2,
    Stopped = 3,
}

impl ThreadState {
    pub(crate) const fn from_u8(v: u8) -> ThreadState {
        match v {
            0 => ThreadState::Runnable,
            1 => ThreadState::Running,
            2 => ThreadState::Blocked,
            _ => ThreadState::Stopped,
        }
    }
}

/// Scheduling policy for a thread
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Ordinary preemptible time-sharing work
    TimeShare,
    /// Real-time band, always wins against time-sharing priorities
    RealTime,
    /// Background batch work; candidate for forced migration when it
    /// monopolizes a single core
    Batch,
}

bitflags! {
    /// Reschedule request flags posted to a CPU when a higher-priority
    /// thread is enqueued on it
    ///
    /// Delivery to the CPU (IPI or local flag check) is the dispatch glue's
    /// business; the scheduler only accumulates the strongest pending
    /// urgency.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Resched: u8 {
        /// Reschedule at the next convenient point
        const LAZY = 0b001;
        /// Preempt user-mode execution immediately
        const USER = 0b010;
        /// Kernel preemption requested
        const KERNEL = 0b100;
    }
}

impl Resched {
    /// Strongest urgency present in the flag word
    pub fn strongest(self) -> Option<Resched> {
        if self.contains(Resched::KERNEL) {
            Some(Resched::KERNEL)
        } else if self.contains(Resched::USER) {
            Some(Resched::USER)
        } else if self.contains(Resched::LAZY) {
            Some(Resched::LAZY)
        } else {
            None
        }
    }
}
