//! Per-CPU scheduler state
//!
//! Each CPU owns exactly one `CpuSchedState`: a mutex guarding the run queue
//! and the pending hand-off slot, plus atomics mirroring the fields the
//! migration planner and the balancer read without taking the lock.
//!
//! ## Lock discipline
//!
//! When two CPUs' locks must both be held (steal, explicit hand-off), the
//! lower-indexed CPU is locked first; see `migrate.rs` for the try-lock
//! fallback used when a CPU already holds its own lock.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};

use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

use crate::priority::PRI_NONE;
use crate::runqueue::RunQueue;
use crate::thread::Thread;
use crate::types::{CpuId, Resched, PSET_NONE};

/// Lock-protected portion of a CPU's scheduler state
pub(crate) struct CpuQueue {
    pub rq: RunQueue,
    /// Thread currently being handed off to this CPU, not yet on any FIFO
    pub migrating: Option<Arc<Thread>>,
}

/// Per-CPU scheduling counters, in the spirit of context-switch accounting:
/// updated with relaxed atomics, read by the inspection layer only.
#[derive(Default)]
pub struct CpuStats {
    pub enqueues: AtomicU64,
    pub dequeues: AtomicU64,
    pub preempt_lazy: AtomicU64,
    pub preempt_user: AtomicU64,
    pub preempt_kernel: AtomicU64,
    pub migrations_in: AtomicU64,
    pub migrations_out: AtomicU64,
    pub steals: AtomicU64,
    pub handoffs: AtomicU64,
}

impl CpuStats {
    pub(crate) fn count(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct CpuSchedState {
    id: CpuId,
    queue: Mutex<CpuQueue>,

    /// Priority of the thread currently executing on this CPU, -1 when idle
    running_pri: AtomicI32,
    /// Mirror of the run queue's cached maximum priority
    max_pri: AtomicI32,
    /// Mirror of the total thread count
    count: AtomicU32,
    /// Mirror of the migratable thread count
    migratable: AtomicU32,
    /// Smoothed average of the migratable count, updated once per balance
    /// period
    avg_migratable: AtomicU32,

    online: AtomicBool,
    pset: AtomicU32,
    /// Pending reschedule request flags for this CPU
    resched: AtomicU8,

    pub stats: CpuStats,
}

impl CpuSchedState {
    pub(crate) fn new(id: CpuId) -> Self {
        CpuSchedState {
            id,
            queue: Mutex::new(CpuQueue {
                rq: RunQueue::new(),
                migrating: None,
            }),
            running_pri: AtomicI32::new(-1),
            max_pri: AtomicI32::new(PRI_NONE as i32),
            count: AtomicU32::new(0),
            migratable: AtomicU32::new(0),
            avg_migratable: AtomicU32::new(0),
            online: AtomicBool::new(true),
            pset: AtomicU32::new(PSET_NONE),
            resched: AtomicU8::new(0),
            stats: CpuStats::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> CpuId {
        self.id
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, CpuQueue> {
        self.queue.lock()
    }

    #[inline]
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, CpuQueue>> {
        self.queue.try_lock()
    }

    /// Refresh the lockless mirrors from the locked state. Called after
    /// every queue mutation, while still holding the lock.
    pub(crate) fn sync_cached(&self, q: &CpuQueue) {
        self.count.store(q.rq.len(), Ordering::Relaxed);
        self.migratable.store(q.rq.migratable_len(), Ordering::Relaxed);
        self.max_pri.store(q.rq.max_priority() as i32, Ordering::Relaxed);
    }

    #[inline]
    pub fn queue_len(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn migratable_len(&self) -> u32 {
        self.migratable.load(Ordering::Relaxed)
    }

    /// Highest queued priority as last published, `PRI_NONE` when empty
    #[inline]
    pub fn max_priority(&self) -> i32 {
        self.max_pri.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn running_priority(&self) -> i32 {
        self.running_pri.load(Ordering::Relaxed)
    }

    /// Published by the owning CPU's dispatch path
    pub fn set_running_priority(&self, pri: i32) {
        self.running_pri.store(pri, Ordering::Relaxed);
    }

    /// Load figure used by the migration planner: the work this CPU is
    /// already committed to, whichever is higher
    #[inline]
    pub(crate) fn load(&self) -> i32 {
        self.running_priority().max(self.max_priority())
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    #[inline]
    pub fn pset(&self) -> u32 {
        self.pset.load(Ordering::Relaxed)
    }

    pub fn set_pset(&self, pset: u32) {
        self.pset.store(pset, Ordering::Relaxed);
    }

    #[inline]
    pub fn avg_migratable(&self) -> u32 {
        self.avg_migratable.load(Ordering::Relaxed)
    }

    /// One step of the balancer's exponential moving average
    pub(crate) fn update_avg_migratable(&self) -> u32 {
        let avg = (self.avg_migratable.load(Ordering::Relaxed)
            + self.migratable.load(Ordering::Relaxed))
            / 2;
        self.avg_migratable.store(avg, Ordering::Relaxed);
        avg
    }

    /// Post an asynchronous "please reschedule" request to this CPU
    pub(crate) fn post_resched(&self, kind: Resched) {
        self.resched.fetch_or(kind.bits(), Ordering::Release);
        let counter = match kind {
            k if k.contains(Resched::KERNEL) => &self.stats.preempt_kernel,
            k if k.contains(Resched::USER) => &self.stats.preempt_user,
            _ => &self.stats.preempt_lazy,
        };
        CpuStats::count(counter);
    }

    /// Consume the pending reschedule flags (dispatch-loop side)
    pub fn take_resched(&self) -> Resched {
        Resched::from_bits_truncate(self.resched.swap(0, Ordering::AcqRel))
    }

    /// Peek without consuming (for inspection)
    pub fn pending_resched(&self) -> Resched {
        Resched::from_bits_truncate(self.resched.load(Ordering::Acquire))
    }
}
