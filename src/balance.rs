//! Periodic load balancer
//!
//! Once per balance period every online CPU's migratable-thread count is
//! folded into a smoothed average, and the CPU with the highest average is
//! published as the donor, the preferred victim for idle CPUs looking for
//! work. The donor is a single atomic read with relaxed ordering; readers
//! may see a stale value.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::sched::MpScheduler;
use crate::types::{CpuId, CPU_NONE};

pub(crate) struct Balancer {
    /// Current donor CPU, `CPU_NONE` when no CPU has surplus work
    donor: AtomicU32,
    /// Tick of the last completed pass
    last_balance: AtomicU64,
    passes: AtomicU64,
    donor_changes: AtomicU64,
}

impl Balancer {
    pub(crate) const fn new() -> Self {
        Balancer {
            donor: AtomicU32::new(CPU_NONE),
            last_balance: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            donor_changes: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn last_balance(&self) -> u64 {
        self.last_balance.load(Ordering::Relaxed)
    }
}

impl MpScheduler {
    /// One balance pass over all CPUs: `avg = (avg + migratable) / 2` per
    /// online CPU, highest average becomes the donor. Lockless; called on a
    /// fixed interval and opportunistically from the idle path.
    pub fn balance_pass(&self) {
        let mut best: Option<(CpuId, u32)> = None;
        for cpu in &self.cpus {
            if !cpu.is_online() {
                continue;
            }
            let avg = cpu.update_avg_migratable();
            if avg == 0 {
                continue;
            }
            match best {
                Some((_, top)) if avg <= top => {}
                _ => best = Some((cpu.id(), avg)),
            }
        }

        let donor = best.map(|(id, _)| id).unwrap_or(CPU_NONE);
        let previous = self.balancer.donor.swap(donor, Ordering::Relaxed);
        if previous != donor {
            self.balancer.donor_changes.fetch_add(1, Ordering::Relaxed);
            crate::ktrace!("balance: donor cpu now {:?}", self.donor_cpu());
        }
        self.balancer.last_balance.store(self.now(), Ordering::Relaxed);
        self.balancer.passes.fetch_add(1, Ordering::Relaxed);
    }

    /// The CPU currently designated as steal victim, if any. May be stale.
    pub fn donor_cpu(&self) -> Option<CpuId> {
        match self.balancer.donor.load(Ordering::Relaxed) {
            CPU_NONE => None,
            id if (id as usize) < self.cpus.len() => Some(id),
            _ => None,
        }
    }

    #[inline]
    pub fn balance_passes(&self) -> u64 {
        self.balancer.passes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn donor_changes(&self) -> u64 {
        self.balancer.donor_changes.load(Ordering::Relaxed)
    }
}
