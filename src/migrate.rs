//! Migration planner and work stealing
//!
//! `take_cpu` decides where a waking thread should run; `catch_thread` lets
//! an idle CPU pull work from the donor CPU. Both read other CPUs' cached
//! fields without their locks; a stale value costs at most a suboptimal
//! placement.
//!
//! ## Cross-CPU locking
//!
//! When both the thief's and the donor's locks are needed, the
//! lower-indexed CPU is locked first. A thief whose index is higher tries
//! `try_lock` on the donor; on failure it releases its own lock, acquires
//! both in index order and re-validates the idle decision, since nothing
//! survives a lock gap.

use alloc::sync::Arc;

use crate::cpu::CpuStats;
use crate::sched::MpScheduler;
use crate::thread::Thread;
use crate::types::CpuId;

/// Bounded spin for a victim mid-context-switch before a steal backs out
const STEAL_SPIN_ROUNDS: u32 = 64;

/// Exponential backoff, capped so a single round never spins unboundedly
#[inline]
fn spin_backoff(round: u32) {
    let spins = 1u32 << round.min(10);
    for _ in 0..spins {
        core::hint::spin_loop();
    }
}

impl MpScheduler {
    /// Decide which CPU should run a thread that just became runnable.
    /// First matching rule wins; never fails (falls back to the thread's
    /// current CPU when affinity leaves nothing better).
    pub fn take_cpu(&self, thread: &Arc<Thread>, from: CpuId) -> CpuId {
        // 1. Hard binding is unconditional.
        if let Some(bound) = thread.bound_cpu() {
            if (bound as usize) < self.cpus.len() {
                return bound;
            }
        }

        let cur_id = self.valid_cpu_or(thread.cpu(), from);
        let cur = self.cpu(cur_id);
        let cur_ok = cur.is_online() && thread.eligible_on(cur);

        // 2. Empty home queue: staying is the cheapest option.
        if cur_ok && cur.queue_len() == 0 {
            return cur_id;
        }

        // 3. Cache-hot and at least as urgent as what runs there: keep the
        //    cache footprint even though the CPU has other work queued.
        if cur_ok
            && thread.cache_hot(self.now(), self.tunables.cacheht_ticks())
            && thread.effective_priority() as i32 >= cur.running_priority()
        {
            return cur_id;
        }

        // 4. The calling CPU, if the thread would preempt it. This also
        //    covers a wakeup on the thread's own busy CPU.
        let caller = self.cpu(from);
        if caller.is_online()
            && thread.eligible_on(caller)
            && thread.effective_priority() as i32 > caller.running_priority()
        {
            return from;
        }

        // 5. Round-robin scan from the thread's CPU for the lightest load:
        //    max(running priority, highest queued priority), ties broken by
        //    fewer queued threads.
        let n = self.cpus.len();
        let mut best: Option<(CpuId, i32, u32)> = None;
        for i in 0..n {
            let id = ((cur_id as usize + i) % n) as CpuId;
            let cand = self.cpu(id);
            if !cand.is_online() || !thread.eligible_on(cand) {
                continue;
            }
            let load = cand.load();
            let qlen = cand.queue_len();
            let better = match best {
                None => true,
                Some((_, bload, bqlen)) => load < bload || (load == bload && qlen < bqlen),
            };
            if better {
                best = Some((id, load, qlen));
            }
        }
        best.map(|(id, _, _)| id).unwrap_or(cur_id)
    }

    /// Lightest eligible CPU other than the thread's own; used by the
    /// per-tick starvation check
    pub(crate) fn least_loaded_other(&self, thread: &Arc<Thread>) -> Option<CpuId> {
        let cur = thread.cpu();
        let mut best: Option<(CpuId, i32, u32)> = None;
        for cand in &self.cpus {
            if cand.id() == cur || !cand.is_online() || !thread.eligible_on(cand) {
                continue;
            }
            let load = cand.load();
            let qlen = cand.queue_len();
            let better = match best {
                None => true,
                Some((_, bload, bqlen)) => load < bload || (load == bload && qlen < bqlen),
            };
            if better {
                best = Some((cand.id(), load, qlen));
            }
        }
        best.map(|(id, _, _)| id)
    }

    /// Steal one thread from `donor` on behalf of the idle CPU `thief`.
    ///
    /// Scans the donor's highest-priority FIFO from its head and takes the
    /// first thread that is not bound, not cache-hot and allowed on the
    /// thief. The stolen thread's owning CPU is updated before it is
    /// enqueued on the thief. Returns the thread, already queued on the
    /// thief, or `None` when there is nothing worth taking.
    pub fn catch_thread(&self, donor: CpuId, thief: CpuId) -> Option<Arc<Thread>> {
        if donor == thief
            || (donor as usize) >= self.cpus.len()
            || (thief as usize) >= self.cpus.len()
        {
            return None;
        }
        let dstate = self.cpu(donor);
        let tstate = self.cpu(thief);

        let mut tq = tstate.lock();
        let mut dq = if thief < donor {
            dstate.lock()
        } else {
            match dstate.try_lock() {
                Some(guard) => guard,
                None => {
                    // Wrong order for a blocking acquire: release our own
                    // lock, take the donor's first, then re-validate that
                    // this CPU still has nothing to do.
                    drop(tq);
                    let guard = dstate.lock();
                    tq = tstate.lock();
                    if !tq.rq.is_empty() || tq.migrating.is_some() {
                        return None;
                    }
                    guard
                }
            }
        };

        if !dstate.is_online() || dq.rq.migratable_len() < self.tunables.min_catch() {
            return None;
        }
        let pri = match dq.rq.max_priority() {
            p if p < 0 => return None,
            p => p as u8,
        };

        let now = self.now();
        let window = self.tunables.cacheht_ticks();
        let pos = dq
            .rq
            .highest_fifo()
            .position(|t| !t.is_bound() && !t.cache_hot(now, window) && t.eligible_on(tstate))?;
        let stolen = dq.rq.remove_at(pri, pos)?;
        dstate.sync_cached(&dq);

        // The victim may be mid-context-switch on the donor; wait for its
        // CPU-pointer to become safe to reassign, backing out if it never
        // does within the spin bound.
        let mut round = 0u32;
        while stolen.is_switching() {
            if round >= STEAL_SPIN_ROUNDS {
                dq.rq.insert_at(pri, pos, stolen);
                dstate.sync_cached(&dq);
                return None;
            }
            spin_backoff(round);
            round += 1;
        }

        // `queued_on` moves donor -> thief directly (the enqueue overwrites
        // it under both locks), so a concurrent forced removal always has a
        // queue to chase.
        CpuStats::count(&dstate.stats.dequeues);
        stolen.set_cpu(thief);
        self.enqueue_locked(tstate, &mut tq, &stolen, true);
        CpuStats::count(&dstate.stats.migrations_out);
        CpuStats::count(&tstate.stats.migrations_in);
        CpuStats::count(&tstate.stats.steals);
        drop(dq);
        drop(tq);

        crate::ktrace!("cpu{} stole thread {} from cpu{}", thief, stolen.id(), donor);
        Some(stolen)
    }
}
