//! Per-CPU run queue
//!
//! One FIFO per priority level plus a presence bitmap for O(1) "highest
//! occupied priority" lookup. The container maintains three counters: total
//! threads, migratable threads (no hard binding) and the cached maximum
//! priority.
//!
//! ## Invariants
//!
//! - A bitmap bit is set iff the corresponding FIFO is non-empty.
//! - `count` equals the sum of all FIFO lengths; `migratable <= count`.
//! - `maxpri` is the highest set bit, or `PRI_NONE` when the queue is empty.
//!
//! All operations here assume the owning CPU's lock is held; concurrency is
//! the `cpu`/`sched` layer's business.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::priority::{find_highest, pri_slot, BITMAP_WORDS, PRI_COUNT, PRI_NONE};
use crate::thread::Thread;

pub struct RunQueue {
    bitmap: [u32; BITMAP_WORDS],
    fifos: [VecDeque<Arc<Thread>>; PRI_COUNT],
    count: u32,
    migratable: u32,
    maxpri: i16,
}

impl RunQueue {
    pub fn new() -> Self {
        RunQueue {
            bitmap: [0; BITMAP_WORDS],
            fifos: core::array::from_fn(|_| VecDeque::new()),
            count: 0,
            migratable: 0,
            maxpri: PRI_NONE,
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn migratable_len(&self) -> u32 {
        self.migratable
    }

    /// Cached maximum priority, `PRI_NONE` when empty
    #[inline]
    pub fn max_priority(&self) -> i16 {
        self.maxpri
    }

    /// Append `thread` at the tail of its priority FIFO
    ///
    /// FIFO order is the tie-break among equal priorities; there is no
    /// reordering. Cannot fail.
    pub fn enqueue(&mut self, thread: &Arc<Thread>) {
        let pri = thread.effective_priority();
        let (word, mask) = pri_slot(pri);

        if self.fifos[pri as usize].is_empty() {
            self.bitmap[word] |= mask;
        }
        self.fifos[pri as usize].push_back(Arc::clone(thread));
        self.count += 1;
        if !thread.is_bound() {
            self.migratable += 1;
        }
        if pri as i16 > self.maxpri {
            self.maxpri = pri as i16;
        }
    }

    /// Remove `thread` from its priority FIFO
    ///
    /// The thread must be a member of this queue; a violation is a
    /// programming error, fatal in checked builds.
    pub fn dequeue(&mut self, thread: &Arc<Thread>) {
        let pri = thread.effective_priority();
        let fifo = &mut self.fifos[pri as usize];

        let Some(pos) = fifo.iter().position(|t| Arc::ptr_eq(t, thread)) else {
            debug_assert!(false, "dequeue: thread {} not on this queue", thread.id());
            return;
        };
        fifo.remove(pos);
        self.note_removed(pri, thread.is_bound());
    }

    /// Pop the head of the highest-priority non-empty FIFO
    pub fn pop_highest(&mut self) -> Option<Arc<Thread>> {
        if self.maxpri < 0 {
            return None;
        }
        let pri = self.maxpri as u8;
        let thread = self.fifos[pri as usize].pop_front()?;
        self.note_removed(pri, thread.is_bound());
        Some(thread)
    }

    /// Iterate the highest-priority FIFO from its head (steal scan)
    pub(crate) fn highest_fifo(&self) -> impl Iterator<Item = &Arc<Thread>> {
        let pri = if self.maxpri < 0 {
            // Empty queue: iterate an empty FIFO.
            0
        } else {
            self.maxpri as usize
        };
        self.fifos[pri].iter()
    }

    /// Remove the thread at `pos` within the priority-`pri` FIFO
    pub(crate) fn remove_at(&mut self, pri: u8, pos: usize) -> Option<Arc<Thread>> {
        let thread = self.fifos[pri as usize].remove(pos)?;
        self.note_removed(pri, thread.is_bound());
        Some(thread)
    }

    /// Reinsert a thread at `pos` within its priority FIFO, restoring the
    /// exact pre-removal order (used when a steal backs out)
    pub(crate) fn insert_at(&mut self, pri: u8, pos: usize, thread: Arc<Thread>) {
        let (word, mask) = pri_slot(pri);
        if self.fifos[pri as usize].is_empty() {
            self.bitmap[word] |= mask;
        }
        let fifo = &mut self.fifos[pri as usize];
        let pos = pos.min(fifo.len());
        if !thread.is_bound() {
            self.migratable += 1;
        }
        fifo.insert(pos, thread);
        self.count += 1;
        if pri as i16 > self.maxpri {
            self.maxpri = pri as i16;
        }
    }

    /// Counter and bitmap maintenance after any removal at `pri`
    fn note_removed(&mut self, pri: u8, bound: bool) {
        self.count -= 1;
        if !bound {
            debug_assert!(self.migratable > 0);
            self.migratable -= 1;
        }
        if self.fifos[pri as usize].is_empty() {
            let (word, mask) = pri_slot(pri);
            self.bitmap[word] &= !mask;
            if pri as i16 == self.maxpri {
                // Rescan downward from the vacated position.
                self.maxpri = find_highest(&self.bitmap, pri as usize)
                    .map(|p| p as i16)
                    .unwrap_or(PRI_NONE);
            }
        }
    }

    /// Check every structural invariant. Cheap enough for tests and debug
    /// assertions, not meant for the hot path.
    pub fn verify(&self) -> bool {
        let mut total = 0u32;
        let mut migratable = 0u32;
        let mut max = PRI_NONE;

        for pri in 0..PRI_COUNT {
            let (word, mask) = pri_slot(pri as u8);
            let bit_set = self.bitmap[word] & mask != 0;
            if bit_set != !self.fifos[pri].is_empty() {
                return false;
            }
            total += self.fifos[pri].len() as u32;
            migratable += self.fifos[pri].iter().filter(|t| !t.is_bound()).count() as u32;
            if !self.fifos[pri].is_empty() {
                max = pri as i16;
            }
        }

        total == self.count && migratable == self.migratable && max == self.maxpri
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        RunQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SchedPolicy;
    use alloc::vec::Vec;

    fn thread(id: u64, pri: u8) -> Arc<Thread> {
        Thread::new(id, pri, SchedPolicy::TimeShare)
    }

    /// Small deterministic PRNG so failures reproduce from the seed
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }
    }

    #[test]
    fn enqueue_sets_bit_and_counters() {
        let mut rq = RunQueue::new();
        let t = thread(1, 42);
        rq.enqueue(&t);
        assert_eq!(rq.len(), 1);
        assert_eq!(rq.migratable_len(), 1);
        assert_eq!(rq.max_priority(), 42);
        assert!(rq.verify());

        rq.dequeue(&t);
        assert_eq!(rq.len(), 0);
        assert_eq!(rq.max_priority(), PRI_NONE);
        assert!(rq.verify());
    }

    #[test]
    fn bound_threads_not_counted_migratable() {
        let mut rq = RunQueue::new();
        let t = thread(1, 10);
        t.bind_to(0);
        rq.enqueue(&t);
        assert_eq!(rq.len(), 1);
        assert_eq!(rq.migratable_len(), 0);
        assert!(rq.verify());
    }

    #[test]
    fn fifo_fairness_at_equal_priority() {
        let mut rq = RunQueue::new();
        let threads: Vec<_> = (0..16).map(|i| thread(i, 50)).collect();
        for t in &threads {
            rq.enqueue(t);
        }
        for t in &threads {
            let popped = rq.pop_highest().unwrap();
            assert_eq!(popped.id(), t.id());
            assert!(rq.verify());
        }
        assert!(rq.pop_highest().is_none());
    }

    #[test]
    fn higher_priority_wins_regardless_of_order() {
        let mut rq = RunQueue::new();
        let low = thread(1, 10);
        let high = thread(2, 100);
        rq.enqueue(&low);
        rq.enqueue(&high);
        assert_eq!(rq.pop_highest().unwrap().id(), 2);
        assert_eq!(rq.pop_highest().unwrap().id(), 1);
    }

    #[test]
    fn mixed_band_scenario() {
        // Priorities [3, 10, 3, 7]; expect pop order 10, 7, 3(first), 3(second).
        let mut rq = RunQueue::new();
        let a = thread(1, 3);
        let b = thread(2, 10);
        let c = thread(3, 3);
        let d = thread(4, 7);
        for t in [&a, &b, &c, &d] {
            rq.enqueue(t);
            assert!(rq.verify());
        }
        let order: Vec<u64> = core::iter::from_fn(|| rq.pop_highest())
            .map(|t| t.id())
            .collect();
        assert_eq!(order, [2, 4, 1, 3]);
    }

    #[test]
    fn maxpri_rescan_on_dequeue() {
        let mut rq = RunQueue::new();
        let high = thread(1, 200);
        let mid = thread(2, 64);
        let low = thread(3, 1);
        rq.enqueue(&low);
        rq.enqueue(&mid);
        rq.enqueue(&high);
        assert_eq!(rq.max_priority(), 200);

        rq.dequeue(&high);
        assert_eq!(rq.max_priority(), 64);
        rq.dequeue(&mid);
        assert_eq!(rq.max_priority(), 1);
        rq.dequeue(&low);
        assert_eq!(rq.max_priority(), PRI_NONE);
        assert!(rq.verify());
    }

    #[test]
    fn steal_backout_preserves_order() {
        let mut rq = RunQueue::new();
        let threads: Vec<_> = (0..4).map(|i| thread(i, 20)).collect();
        for t in &threads {
            rq.enqueue(t);
        }
        let taken = rq.remove_at(20, 1).unwrap();
        assert_eq!(taken.id(), 1);
        assert!(rq.verify());
        rq.insert_at(20, 1, taken);
        assert!(rq.verify());

        let order: Vec<u64> = core::iter::from_fn(|| rq.pop_highest())
            .map(|t| t.id())
            .collect();
        assert_eq!(order, [0, 1, 2, 3]);
    }

    #[test]
    fn random_ops_hold_invariants() {
        let mut rng = XorShift(0x9e3779b97f4a7c15);
        let mut rq = RunQueue::new();
        let mut queued: Vec<Arc<Thread>> = Vec::new();
        let mut next_id = 0u64;

        for step in 0..10_000 {
            let enqueue = queued.is_empty() || rng.next() % 2 == 0;
            if enqueue {
                let pri = (rng.next() % PRI_COUNT as u64) as u8;
                let t = thread(next_id, pri);
                next_id += 1;
                if rng.next() % 8 == 0 {
                    t.bind_to(0);
                }
                rq.enqueue(&t);
                queued.push(t);
            } else if rng.next() % 2 == 0 {
                let idx = (rng.next() as usize) % queued.len();
                let t = queued.swap_remove(idx);
                rq.dequeue(&t);
            } else {
                let t = rq.pop_highest().unwrap();
                let idx = queued
                    .iter()
                    .position(|q| Arc::ptr_eq(q, &t))
                    .expect("popped thread was tracked");
                queued.swap_remove(idx);
            }
            assert!(rq.verify(), "invariants broken at step {}", step);
            assert_eq!(rq.len() as usize, queued.len());
        }
    }
}
