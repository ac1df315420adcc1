//! Scheduler core: enqueue/dequeue engine and dispatch-loop integration
//!
//! `MpScheduler` owns one `CpuSchedState` per CPU, the scheduling clock, the
//! balancer state and the tunables. The rest of the kernel drives it through
//! a narrow call-level interface:
//!
//! - `make_runnable` — a thread left blocked/new state; place and enqueue it
//! - `requeue_yield` — the running thread yielded voluntarily
//! - `remove_from_queue` — forced removal (termination, external dispatch)
//! - `pick_next_thread` — per-CPU dispatch after yield/preemption
//! - `on_tick` — scheduling-clock tick for the running thread
//! - `core_became_idle` — `pick_next_thread` returned none
//!
//! ## Clock
//!
//! All cache-affinity and balance decisions are in scheduling-clock ticks;
//! the platform timer calls `tick_clock()` once per tick. The scheduler
//! never blocks and never performs I/O.

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::balance::Balancer;
use crate::config::Tunables;
use crate::cpu::{CpuQueue, CpuSchedState, CpuStats};
use crate::thread::Thread;
use crate::types::{CpuId, Resched, SchedPolicy, ThreadState, CPU_NONE, MAX_CPUS};

pub struct MpScheduler {
    pub(crate) cpus: Vec<CpuSchedState>,
    pub(crate) tunables: Tunables,
    pub(crate) balancer: Balancer,
    ticks: AtomicU64,
}

impl MpScheduler {
    /// Create scheduler state for `ncpus` CPUs, all initially online
    pub fn new(ncpus: usize) -> Result<Self, &'static str> {
        if ncpus == 0 {
            return Err("scheduler needs at least one CPU");
        }
        if ncpus > MAX_CPUS {
            return Err("CPU count exceeds MAX_CPUS");
        }
        Ok(MpScheduler {
            cpus: (0..ncpus as CpuId).map(CpuSchedState::new).collect(),
            tunables: Tunables::new(),
            balancer: Balancer::new(),
            ticks: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn num_cpus(&self) -> usize {
        self.cpus.len()
    }

    #[inline]
    pub fn cpu(&self, cpu: CpuId) -> &CpuSchedState {
        &self.cpus[cpu as usize]
    }

    #[inline]
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Advance the scheduling clock by one tick (platform timer hook)
    pub fn tick_clock(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Clamp a stored CPU reference to a live CPU index
    pub(crate) fn valid_cpu_or(&self, cpu: CpuId, fallback: CpuId) -> CpuId {
        if cpu != CPU_NONE && (cpu as usize) < self.cpus.len() {
            cpu
        } else {
            fallback
        }
    }

    /// Mark a CPU online/offline. An offline CPU is skipped by the planner
    /// and balancer and never chosen as donor.
    pub fn set_online(&self, cpu: CpuId, online: bool) {
        self.cpu(cpu).set_online(online);
    }

    /// Assign a CPU to a processor set
    pub fn set_pset(&self, cpu: CpuId, pset: u32) {
        self.cpu(cpu).set_pset(pset);
    }

    /// Consume the pending reschedule flags for a CPU
    pub fn take_resched(&self, cpu: CpuId) -> Resched {
        self.cpu(cpu).take_resched()
    }

    // ========================================================================
    // Enqueue / dequeue engine
    // ========================================================================

    /// Insert `thread` into `cpu`'s run queue. Caller holds the CPU's lock.
    ///
    /// A non-voluntary enqueue whose priority exceeds what the CPU is
    /// currently running posts a reschedule request at one of three
    /// urgencies. The request is asynchronous; this never blocks.
    pub(crate) fn enqueue_locked(
        &self,
        cpu: &CpuSchedState,
        q: &mut CpuQueue,
        thread: &Arc<Thread>,
        voluntary: bool,
    ) {
        thread.set_state(ThreadState::Runnable);
        thread.set_queued_on(cpu.id());
        q.rq.enqueue(thread);
        cpu.sync_cached(q);
        CpuStats::count(&cpu.stats.enqueues);
        debug_assert!(q.rq.verify());

        if voluntary {
            return;
        }
        let pri = thread.effective_priority() as i32;
        if pri > cpu.running_priority() {
            let kind = if pri >= self.tunables.kpreempt_pri() as i32 {
                Resched::KERNEL
            } else if pri > self.tunables.upreempt_pri() as i32 {
                Resched::USER
            } else {
                Resched::LAZY
            };
            cpu.post_resched(kind);
        }
    }

    /// Remove `thread` from `cpu`'s run queue. Caller holds the CPU's lock.
    pub(crate) fn dequeue_locked(&self, cpu: &CpuSchedState, q: &mut CpuQueue, thread: &Arc<Thread>) {
        q.rq.dequeue(thread);
        thread.set_queued_on(CPU_NONE);
        cpu.sync_cached(q);
        CpuStats::count(&cpu.stats.dequeues);
        debug_assert!(q.rq.verify());
    }

    // ========================================================================
    // External interface
    // ========================================================================

    /// A thread transitioned from blocked/new to runnable. `from` is the CPU
    /// the caller is executing on; the migration planner may prefer it when
    /// the thread would preempt whatever runs there.
    pub fn make_runnable(&self, thread: &Arc<Thread>, from: CpuId) {
        debug_assert_eq!(
            thread.queued_on(),
            CPU_NONE,
            "make_runnable: thread {} is already queued",
            thread.id()
        );
        if thread.state() == ThreadState::Blocked {
            let slept = self.now().saturating_sub(thread.slept_at());
            if slept > 0 {
                thread.add_sleep_ticks(slept.min(u32::MAX as u64) as u32);
            }
        }

        let from = self.valid_cpu_or(from, 0);
        let target = self.take_cpu(thread, from);
        thread.set_cpu(target);

        let cpu = self.cpu(target);
        let mut q = cpu.lock();
        self.enqueue_locked(cpu, &mut q, thread, false);
    }

    /// The running thread yielded voluntarily: put it back at the tail of
    /// its own CPU's queue without a preemption signal. If a migration
    /// target is pending, hand the thread off to that CPU instead.
    pub fn requeue_yield(&self, thread: &Arc<Thread>) {
        debug_assert_eq!(
            thread.queued_on(),
            CPU_NONE,
            "requeue_yield: thread {} is already queued",
            thread.id()
        );
        if let Some(target) = thread.migrate_to() {
            if self.try_handoff(thread, target) {
                return;
            }
            // Target vanished or became ineligible; stay put.
            thread.clear_migrate_to();
        }
        let cpu = self.cpu(self.valid_cpu_or(thread.cpu(), 0));
        let mut q = cpu.lock();
        self.enqueue_locked(cpu, &mut q, thread, true);
    }

    /// Park `thread` in `target`'s hand-off slot. The thread is off every
    /// FIFO and owned exclusively by the caller, so only the target's lock
    /// is needed.
    fn try_handoff(&self, thread: &Arc<Thread>, target: CpuId) -> bool {
        if (target as usize) >= self.cpus.len() || target == thread.cpu() {
            return false;
        }
        let cpu = self.cpu(target);
        if !cpu.is_online() || !thread.eligible_on(cpu) {
            return false;
        }
        let mut q = cpu.lock();
        if !cpu.is_online() || q.migrating.is_some() {
            return false;
        }
        thread.set_state(ThreadState::Runnable);
        q.migrating = Some(Arc::clone(thread));
        drop(q);
        // Nudge the target so an idling CPU notices the hand-off.
        cpu.post_resched(Resched::LAZY);
        crate::ktrace!(
            "thread {} parked for hand-off to cpu{}",
            thread.id(),
            target
        );
        true
    }

    /// Forced removal: the thread is leaving the runnable set (termination,
    /// external dispatch). Chases steals and in-flight hand-offs until the
    /// thread is verifiably off every FIFO and every hand-off slot.
    pub fn remove_from_queue(&self, thread: &Arc<Thread>) {
        loop {
            let queued = thread.queued_on();
            if queued != CPU_NONE {
                let cpu = self.cpu(self.valid_cpu_or(queued, 0));
                let mut q = cpu.lock();
                if thread.queued_on() == queued {
                    self.dequeue_locked(cpu, &mut q, thread);
                    thread.clear_migrate_to();
                    return;
                }
                // Stolen while we were taking the lock; chase it.
                continue;
            }

            let Some(target) = thread.migrate_to() else {
                // A hand-off may have completed between the two reads;
                // re-check membership before concluding the thread is gone.
                if thread.queued_on() == CPU_NONE {
                    return;
                }
                continue;
            };
            if (target as usize) >= self.cpus.len() {
                thread.clear_migrate_to();
                return;
            }
            let cpu = self.cpu(target);
            let mut q = cpu.lock();
            if let Some(parked) = &q.migrating {
                if Arc::ptr_eq(parked, thread) {
                    q.migrating = None;
                    thread.clear_migrate_to();
                    return;
                }
            }
            // The parked state only changes under the target's lock, and a
            // resolving hand-off enqueues the thread before clearing its
            // migration target: an empty slot with the assignment still
            // standing means the thread is off every queue.
            if thread.queued_on() == CPU_NONE && thread.migrate_to() == Some(target) {
                thread.clear_migrate_to();
                return;
            }
            // A hand-off resolved under us; chase the re-enqueued thread.
        }
    }

    /// Normal dispatch path: pop the highest-priority head, FIFO order among
    /// equals. Returns `None` when the queue is empty, signalling the caller
    /// to enter the idle path.
    pub fn pick_next_thread(&self, cpu_id: CpuId) -> Option<Arc<Thread>> {
        let cpu = self.cpu(cpu_id);
        let mut q = cpu.lock();
        match q.rq.pop_highest() {
            Some(thread) => {
                thread.set_queued_on(CPU_NONE);
                cpu.sync_cached(&q);
                CpuStats::count(&cpu.stats.dequeues);
                debug_assert!(q.rq.verify());
                drop(q);

                if thread.migrate_to() == Some(cpu_id) {
                    thread.clear_migrate_to();
                }
                thread.set_state(ThreadState::Running);
                thread.set_cpu(cpu_id);
                thread.set_last_run(self.now());
                cpu.set_running_priority(thread.effective_priority() as i32);
                Some(thread)
            }
            None => {
                cpu.set_running_priority(-1);
                None
            }
        }
    }

    /// Scheduling-clock tick for the currently running thread: run
    /// accounting plus the starvation check. A batch thread that has been
    /// continuously runnable without ever sleeping gets a migration target
    /// so it stops monopolizing one CPU.
    pub fn on_tick(&self, thread: &Arc<Thread>) {
        let now = self.now();
        thread.set_last_run(now);
        thread.add_run_tick();

        if self.cpus.len() < 2
            || thread.policy() != SchedPolicy::Batch
            || thread.is_bound()
            || thread.sleep_ticks() != 0
            || thread.migrate_to().is_some()
        {
            return;
        }
        let starve_window = self.tunables.balance_period() * 4;
        if (thread.run_ticks() as u64) < starve_window {
            return;
        }
        if let Some(target) = self.least_loaded_other(thread) {
            thread.set_migrate_to(target);
            crate::kdebug!(
                "batch thread {} hogging cpu{}, migration target cpu{}",
                thread.id(),
                thread.cpu(),
                target
            );
        }
    }

    /// A thread blocked while running; remember when, for sleep accounting
    /// on the next wakeup.
    pub fn thread_blocked(&self, thread: &Arc<Thread>) {
        debug_assert_eq!(
            thread.queued_on(),
            CPU_NONE,
            "thread_blocked: thread {} is on a queue",
            thread.id()
        );
        thread.set_state(ThreadState::Blocked);
        thread.set_slept_at(self.now());
    }

    /// Idle path. Two states must be resolved before the CPU may idle:
    /// a pending hand-off, then — if the queue is still empty — a steal
    /// attempt against the current donor CPU. Returns whether runnable work
    /// was acquired.
    pub fn core_became_idle(&self, cpu_id: CpuId) -> bool {
        let cpu = self.cpu(cpu_id);

        // (a) Complete a pending hand-off. A valid hand-off is enqueued here
        // before the migration target is cleared; a superseded one stays in
        // the slot until `cancel_handoff` relocates it, so a concurrent
        // forced removal always finds the thread under this CPU's lock.
        let stale = {
            let mut q = cpu.lock();
            match q.migrating.take() {
                Some(thread) => {
                    if cpu.is_online()
                        && thread.migrate_to() == Some(cpu_id)
                        && thread.eligible_on(cpu)
                    {
                        let origin = self.valid_cpu_or(thread.cpu(), cpu_id);
                        thread.set_cpu(cpu_id);
                        self.enqueue_locked(cpu, &mut q, &thread, true);
                        thread.clear_migrate_to();
                        CpuStats::count(&cpu.stats.handoffs);
                        CpuStats::count(&cpu.stats.migrations_in);
                        if origin != cpu_id {
                            CpuStats::count(&self.cpu(origin).stats.migrations_out);
                        }
                        return true;
                    }
                    q.migrating = Some(Arc::clone(&thread));
                    Some(thread)
                }
                None => {
                    if !q.rq.is_empty() {
                        // Work arrived between the dispatch check and here.
                        return true;
                    }
                    None
                }
            }
        };

        if let Some(thread) = stale {
            self.cancel_handoff(cpu_id, &thread);
            if thread.queued_on() == cpu_id {
                return true;
            }
        }

        // (b) Refresh load figures and try to pull work from the donor.
        let now = self.now();
        if now.saturating_sub(self.balancer.last_balance()) >= self.tunables.balance_period() {
            self.balance_pass();
        } else {
            cpu.update_avg_migratable();
        }

        let Some(donor) = self.donor_cpu() else {
            return false;
        };
        if donor == cpu_id {
            return false;
        }
        self.catch_thread(donor, cpu_id).is_some()
    }

    /// Return a thread whose hand-off to `target` became invalid to its
    /// origin CPU. Both locks are taken in index order, and the thread only
    /// leaves the slot once it reappears on the origin's FIFO, so a forced
    /// removal can always find it under one of the two locks. The re-enqueue
    /// is not a voluntary yield; it posts a preemption signal like any other
    /// wakeup.
    fn cancel_handoff(&self, target: CpuId, thread: &Arc<Thread>) {
        let origin = self.valid_cpu_or(thread.cpu(), target);
        if origin == target {
            let cpu = self.cpu(target);
            let mut q = cpu.lock();
            match &q.migrating {
                Some(parked) if Arc::ptr_eq(parked, thread) => {}
                _ => return,
            }
            q.migrating = None;
            self.enqueue_locked(cpu, &mut q, thread, false);
            thread.clear_migrate_to();
            return;
        }

        let lo = origin.min(target);
        let hi = origin.max(target);
        let mut lo_q = self.cpu(lo).lock();
        let mut hi_q = self.cpu(hi).lock();
        let (tq, oq) = if target == lo {
            (&mut lo_q, &mut hi_q)
        } else {
            (&mut hi_q, &mut lo_q)
        };

        // Someone else may have resolved the slot during the lock gap.
        match &tq.migrating {
            Some(parked) if Arc::ptr_eq(parked, thread) => {}
            _ => return,
        }
        tq.migrating = None;
        self.enqueue_locked(self.cpu(origin), oq, thread, false);
        thread.clear_migrate_to();
        crate::kdebug!(
            "stale hand-off of thread {} discarded, kept on cpu{}",
            thread.id(),
            origin
        );
    }
}
