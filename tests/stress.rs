//! Concurrency stress: real host threads driving one scheduler instance,
//! stealing from each other as aggressively as possible. Completion of
//! these tests is the assertion that the lock discipline is deadlock-free.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use serial_test::serial;

use runq::{MpScheduler, SchedPolicy, Thread, CPU_NONE};

struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        XorShift(seed | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

/// Drain every queue and hand-off slot; returns the distinct thread ids
/// recovered, panicking on a double dispatch.
fn drain(sched: &MpScheduler) -> HashSet<u64> {
    let mut recovered = HashSet::new();
    loop {
        let mut progress = false;
        for cpu in 0..sched.num_cpus() as u32 {
            while let Some(t) = sched.pick_next_thread(cpu) {
                assert!(recovered.insert(t.id()), "thread {} dispatched twice", t.id());
                progress = true;
            }
        }
        for cpu in 0..sched.num_cpus() as u32 {
            if sched.core_became_idle(cpu) {
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }
    recovered
}

#[test]
#[serial]
fn mutual_steal_storm_completes() {
    let _ = env_logger::builder().is_test(true).try_init();

    const CPUS: u32 = 4;
    const THREADS: u64 = 32;
    const ITERS: u32 = 10_000;

    let sched = Arc::new(MpScheduler::new(CPUS as usize).unwrap());
    sched.tunables().set_min_catch(1);

    for i in 0..THREADS {
        let policy = if i % 8 == 0 {
            SchedPolicy::Batch
        } else {
            SchedPolicy::TimeShare
        };
        let t = Thread::new(i, 20 + (i as u8 * 5) % 170, policy);
        if i % 16 == 0 {
            t.bind_to((i % CPUS as u64) as u32);
        }
        sched.make_runnable(&t, (i % CPUS as u64) as u32);
    }

    let workers: Vec<_> = (0..CPUS)
        .map(|cpu| {
            let sched = Arc::clone(&sched);
            thread::spawn(move || {
                let mut rng = XorShift::new(0xdead_beef ^ ((cpu as u64 + 1) * 0x9e37_79b9));
                for _ in 0..ITERS {
                    match sched.pick_next_thread(cpu) {
                        Some(t) => {
                            t.begin_switch();
                            t.end_switch();
                            sched.on_tick(&t);
                            if rng.next() % 4 == 0 {
                                sched.thread_blocked(&t);
                                sched.make_runnable(&t, cpu);
                            } else {
                                sched.requeue_yield(&t);
                            }
                        }
                        None => {
                            sched.core_became_idle(cpu);
                        }
                    }
                    if rng.next() % 8 == 0 {
                        sched.tick_clock();
                    }
                    if rng.next() % 8 == 0 {
                        let donor = (rng.next() % CPUS as u64) as u32;
                        if donor != cpu {
                            sched.catch_thread(donor, cpu);
                        }
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    // Both branches of the worker loop re-enqueue, so every thread must be
    // recoverable: none lost to a steal race or stuck in a hand-off slot.
    assert_eq!(drain(&sched).len(), THREADS as usize);
    sched.list_cpu_stats();
}

#[test]
#[serial]
fn forced_removal_races_handoff_completion() {
    let sched = Arc::new(MpScheduler::new(2).unwrap());
    sched.tunables().set_balance_period(1);

    for trial in 0..2_000u64 {
        let t = Thread::new(trial, 30, SchedPolicy::Batch);
        sched.make_runnable(&t, 0);
        let t = sched.pick_next_thread(0).unwrap();
        for _ in 0..4 {
            sched.on_tick(&t);
        }
        sched.requeue_yield(&t);
        assert_eq!(t.migrate_to(), Some(1));

        // One thread completes the hand-off while another forcibly removes
        // the parked thread.
        let idle = {
            let sched = Arc::clone(&sched);
            thread::spawn(move || {
                sched.core_became_idle(1);
            })
        };
        let removal = {
            let sched = Arc::clone(&sched);
            let t = Arc::clone(&t);
            thread::spawn(move || {
                sched.remove_from_queue(&t);
            })
        };
        idle.join().unwrap();
        removal.join().unwrap();

        // Whatever the interleaving, once the removal has returned the
        // thread must be off every queue and every slot for good.
        assert_eq!(t.queued_on(), CPU_NONE);
        assert_eq!(t.migrate_to(), None);
        assert!(sched.pick_next_thread(0).is_none());
        assert!(sched.pick_next_thread(1).is_none());
    }
}

#[test]
#[serial]
fn opposing_thieves_never_deadlock() {
    const ITERS: u32 = 10_000;

    let sched = Arc::new(MpScheduler::new(2).unwrap());
    sched.tunables().set_min_catch(1);
    for i in 0..16u64 {
        sched.make_runnable(&Thread::new(i, 50, SchedPolicy::TimeShare), (i % 2) as u32);
    }

    // Both CPUs steal from each other while dispatching and requeueing;
    // this hammers the out-of-order try-lock fallback.
    let workers: Vec<_> = (0..2u32)
        .map(|cpu| {
            let sched = Arc::clone(&sched);
            thread::spawn(move || {
                for _ in 0..ITERS {
                    sched.catch_thread(1 - cpu, cpu);
                    if let Some(t) = sched.pick_next_thread(cpu) {
                        sched.requeue_yield(&t);
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(drain(&sched).len(), 16);
}
