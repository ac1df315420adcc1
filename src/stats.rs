//! Scheduler statistics and inspection
//!
//! Read-only snapshots of the per-CPU counters plus a log dump for
//! debugging. Everything here observes relaxed atomics; numbers from a live
//! system are approximate by nature.

use core::sync::atomic::Ordering;

use crate::sched::MpScheduler;
use crate::types::CpuId;

/// Point-in-time copy of one CPU's scheduler state and counters
#[derive(Clone, Copy, Debug)]
pub struct CpuStatsSnapshot {
    pub cpu_id: CpuId,
    pub online: bool,
    pub pset: u32,
    pub queue_len: u32,
    pub migratable: u32,
    pub avg_migratable: u32,
    pub running_priority: i32,
    pub max_priority: i32,
    pub enqueues: u64,
    pub dequeues: u64,
    pub preempt_lazy: u64,
    pub preempt_user: u64,
    pub preempt_kernel: u64,
    pub migrations_in: u64,
    pub migrations_out: u64,
    pub steals: u64,
    pub handoffs: u64,
}

impl MpScheduler {
    /// Snapshot one CPU's counters
    pub fn cpu_stats(&self, cpu_id: CpuId) -> CpuStatsSnapshot {
        let cpu = self.cpu(cpu_id);
        let s = &cpu.stats;
        CpuStatsSnapshot {
            cpu_id,
            online: cpu.is_online(),
            pset: cpu.pset(),
            queue_len: cpu.queue_len(),
            migratable: cpu.migratable_len(),
            avg_migratable: cpu.avg_migratable(),
            running_priority: cpu.running_priority(),
            max_priority: cpu.max_priority(),
            enqueues: s.enqueues.load(Ordering::Relaxed),
            dequeues: s.dequeues.load(Ordering::Relaxed),
            preempt_lazy: s.preempt_lazy.load(Ordering::Relaxed),
            preempt_user: s.preempt_user.load(Ordering::Relaxed),
            preempt_kernel: s.preempt_kernel.load(Ordering::Relaxed),
            migrations_in: s.migrations_in.load(Ordering::Relaxed),
            migrations_out: s.migrations_out.load(Ordering::Relaxed),
            steals: s.steals.load(Ordering::Relaxed),
            handoffs: s.handoffs.load(Ordering::Relaxed),
        }
    }

    /// Log a per-CPU statistics table
    pub fn list_cpu_stats(&self) {
        crate::kinfo!("=== Per-CPU Scheduler Statistics ===");
        crate::kinfo!(
            "{:<4} {:<4} {:<6} {:<6} {:<5} {:<5} {:<8} {:<8} {:<8} {:<7} {:<7} {:<6}",
            "CPU",
            "On",
            "RQ",
            "Migr",
            "Run",
            "Max",
            "Enq",
            "Deq",
            "Preempt",
            "MigIn",
            "MigOut",
            "Steal"
        );
        for id in 0..self.num_cpus() as CpuId {
            let s = self.cpu_stats(id);
            crate::kinfo!(
                "{:<4} {:<4} {:<6} {:<6} {:<5} {:<5} {:<8} {:<8} {:<8} {:<7} {:<7} {:<6}",
                s.cpu_id,
                if s.online { "y" } else { "n" },
                s.queue_len,
                s.migratable,
                s.running_priority,
                s.max_priority,
                s.enqueues,
                s.dequeues,
                s.preempt_lazy + s.preempt_user + s.preempt_kernel,
                s.migrations_in,
                s.migrations_out,
                s.steals
            );
        }
        crate::kinfo!(
            "balance passes: {}, donor changes: {}, donor: {:?}",
            self.balance_passes(),
            self.donor_changes(),
            self.donor_cpu()
        );
    }
}
