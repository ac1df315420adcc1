//! Schedulable unit
//!
//! A `Thread` is the scheduler's view of a kernel thread: identity, priority,
//! placement constraints and run/sleep accounting. Everything mutable is an
//! atomic so the fields readable on hot lockless paths (the migration
//! planner, the balancer) never need a queue lock.
//!
//! Ownership rules: a thread is linked into at most one run-queue FIFO at a
//! time, or parked in at most one CPU's hand-off slot. The `queued_on` field
//! tracks FIFO membership so double-enqueue and missing-member dequeue are
//! caught in checked builds.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use alloc::sync::Arc;

use crate::cpu::CpuSchedState;
use crate::priority;
use crate::types::{CpuId, SchedPolicy, ThreadId, ThreadState, CPU_NONE, PSET_NONE};

pub struct Thread {
    id: ThreadId,
    base_pri: u8,
    policy: SchedPolicy,

    /// Priority actually used for scheduling decisions; may be boosted
    /// above `base_pri` by mechanisms outside this core
    eff_pri: AtomicU8,
    state: AtomicU8,

    /// Owning/last CPU; updated by the thief before a stolen thread is
    /// re-enqueued
    cpu: AtomicU32,
    /// Hard single-CPU binding (`CPU_NONE` = floatable)
    bound_cpu: AtomicU32,
    /// Processor-set tag (`PSET_NONE` = any set)
    pset: AtomicU32,
    /// CPU whose FIFO currently links this thread (`CPU_NONE` = unqueued)
    queued_on: AtomicU32,
    /// Explicit migration target set by the per-tick starvation check
    migrate_to: AtomicU32,
    /// Mid-context-switch marker; stealers spin on this before reassigning
    /// the owning CPU
    switching: AtomicBool,

    /// Scheduling-clock tick when the thread last ran (cache affinity)
    last_run: AtomicU64,
    /// Tick at which the thread blocked
    slept_at: AtomicU64,
    run_ticks: AtomicU32,
    sleep_ticks: AtomicU32,
}

impl Thread {
    /// Create a new thread. New threads start `Stopped` and unqueued; the
    /// caller makes them runnable through the scheduler.
    pub fn new(id: ThreadId, pri: u8, policy: SchedPolicy) -> Arc<Thread> {
        Arc::new(Thread {
            id,
            base_pri: priority::normalize(pri),
            policy,
            eff_pri: AtomicU8::new(priority::normalize(pri)),
            state: AtomicU8::new(ThreadState::Stopped as u8),
            cpu: AtomicU32::new(0),
            bound_cpu: AtomicU32::new(CPU_NONE),
            pset: AtomicU32::new(PSET_NONE),
            queued_on: AtomicU32::new(CPU_NONE),
            migrate_to: AtomicU32::new(CPU_NONE),
            switching: AtomicBool::new(false),
            last_run: AtomicU64::new(0),
            slept_at: AtomicU64::new(0),
            run_ticks: AtomicU32::new(0),
            sleep_ticks: AtomicU32::new(0),
        })
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn policy(&self) -> SchedPolicy {
        self.policy
    }

    #[inline]
    pub fn base_priority(&self) -> u8 {
        self.base_pri
    }

    #[inline]
    pub fn effective_priority(&self) -> u8 {
        self.eff_pri.load(Ordering::Relaxed)
    }

    /// Set the effective priority. Must not be called while the thread is
    /// linked into a FIFO; requeue it to change its priority.
    pub fn set_priority(&self, pri: u8) {
        debug_assert_eq!(
            self.queued_on(),
            CPU_NONE,
            "priority change while on a run queue"
        );
        self.eff_pri.store(priority::normalize(pri), Ordering::Relaxed);
    }

    #[inline]
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn cpu(&self) -> CpuId {
        self.cpu.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_cpu(&self, cpu: CpuId) {
        self.cpu.store(cpu, Ordering::Relaxed);
    }

    /// Bind the thread to a single CPU; it will never migrate away
    pub fn bind_to(&self, cpu: CpuId) {
        self.bound_cpu.store(cpu, Ordering::Relaxed);
    }

    pub fn unbind(&self) {
        self.bound_cpu.store(CPU_NONE, Ordering::Relaxed);
    }

    #[inline]
    pub fn bound_cpu(&self) -> Option<CpuId> {
        match self.bound_cpu.load(Ordering::Relaxed) {
            CPU_NONE => None,
            cpu => Some(cpu),
        }
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound_cpu.load(Ordering::Relaxed) != CPU_NONE
    }

    /// Restrict the thread to a processor set (`PSET_NONE` clears it)
    pub fn set_pset(&self, pset: u32) {
        self.pset.store(pset, Ordering::Relaxed);
    }

    #[inline]
    pub fn pset(&self) -> u32 {
        self.pset.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn queued_on(&self) -> CpuId {
        self.queued_on.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_queued_on(&self, cpu: CpuId) {
        self.queued_on.store(cpu, Ordering::Relaxed);
    }

    #[inline]
    pub fn migrate_to(&self) -> Option<CpuId> {
        match self.migrate_to.load(Ordering::Relaxed) {
            CPU_NONE => None,
            cpu => Some(cpu),
        }
    }

    #[inline]
    pub(crate) fn set_migrate_to(&self, cpu: CpuId) {
        self.migrate_to.store(cpu, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn clear_migrate_to(&self) {
        self.migrate_to.store(CPU_NONE, Ordering::Relaxed);
    }

    /// Mark the thread as mid-context-switch. Called by the dispatch glue
    /// around the low-level switch so a stealer never reassigns the owning
    /// CPU while the old CPU is still running on the thread's stack.
    pub fn begin_switch(&self) {
        self.switching.store(true, Ordering::Release);
    }

    pub fn end_switch(&self) {
        self.switching.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::Acquire)
    }

    #[inline]
    pub fn last_run(&self) -> u64 {
        self.last_run.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_last_run(&self, tick: u64) {
        self.last_run.store(tick, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_slept_at(&self, tick: u64) {
        self.slept_at.store(tick, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn slept_at(&self) -> u64 {
        self.slept_at.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn run_ticks(&self) -> u32 {
        self.run_ticks.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sleep_ticks(&self) -> u32 {
        self.sleep_ticks.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn add_run_tick(&self) {
        self.run_ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_sleep_ticks(&self, ticks: u32) {
        self.sleep_ticks.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Reset the run/sleep accounting window
    pub fn reset_stats(&self) {
        self.run_ticks.store(0, Ordering::Relaxed);
        self.sleep_ticks.store(0, Ordering::Relaxed);
    }

    /// Whether the thread ran recently enough that moving it to another CPU
    /// would likely cost more in cache misses than better balance gains
    #[inline]
    pub(crate) fn cache_hot(&self, now: u64, window: u64) -> bool {
        let last = self.last_run.load(Ordering::Relaxed);
        last != 0 && now.saturating_sub(last) < window
    }

    /// Whether this thread may run on `cpu` (binding and processor set)
    pub(crate) fn eligible_on(&self, cpu: &CpuSchedState) -> bool {
        if let Some(bound) = self.bound_cpu() {
            if bound != cpu.id() {
                return false;
            }
        }
        let pset = self.pset();
        pset == PSET_NONE || pset == cpu.pset()
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("pri", &self.effective_priority())
            .field("policy", &self.policy)
            .field("state", &self.state())
            .field("cpu", &self.cpu())
            .finish()
    }
}
