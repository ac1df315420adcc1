//! Scheduler tunables
//!
//! Read at initialization and adjustable at runtime through atomic setters.
//! All of these are policy heuristics, not correctness requirements: they
//! shift when preemption is signalled, when a thread counts as cache-hot and
//! when a steal is worth disturbing another CPU's cache.

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Priorities at or above this request kernel preemption
pub const DEFAULT_KPREEMPT_PRI: u8 = 208;

/// Priorities above this request immediate user preemption; the default is
/// one below the real-time band so every real-time enqueue preempts
/// immediately
pub const DEFAULT_UPREEMPT_PRI: u8 = 191;

/// Cache-hotness window in scheduling-clock ticks
pub const DEFAULT_CACHEHT_TICKS: u64 = 4;

/// Balance period in scheduling-clock ticks
pub const DEFAULT_BALANCE_PERIOD: u64 = 16;

/// Minimum migratable threads on the donor before a steal is attempted
pub const DEFAULT_MIN_CATCH: u32 = 3;

pub struct Tunables {
    kpreempt_pri: AtomicU8,
    upreempt_pri: AtomicU8,
    cacheht_ticks: AtomicU64,
    balance_period: AtomicU64,
    min_catch: AtomicU32,
}

impl Tunables {
    pub(crate) const fn new() -> Self {
        Tunables {
            kpreempt_pri: AtomicU8::new(DEFAULT_KPREEMPT_PRI),
            upreempt_pri: AtomicU8::new(DEFAULT_UPREEMPT_PRI),
            cacheht_ticks: AtomicU64::new(DEFAULT_CACHEHT_TICKS),
            balance_period: AtomicU64::new(DEFAULT_BALANCE_PERIOD),
            min_catch: AtomicU32::new(DEFAULT_MIN_CATCH),
        }
    }

    #[inline]
    pub fn kpreempt_pri(&self) -> u8 {
        self.kpreempt_pri.load(Ordering::Relaxed)
    }

    pub fn set_kpreempt_pri(&self, pri: u8) {
        self.kpreempt_pri.store(pri, Ordering::Relaxed);
    }

    #[inline]
    pub fn upreempt_pri(&self) -> u8 {
        self.upreempt_pri.load(Ordering::Relaxed)
    }

    pub fn set_upreempt_pri(&self, pri: u8) {
        self.upreempt_pri.store(pri, Ordering::Relaxed);
    }

    #[inline]
    pub fn cacheht_ticks(&self) -> u64 {
        self.cacheht_ticks.load(Ordering::Relaxed)
    }

    pub fn set_cacheht_ticks(&self, ticks: u64) {
        self.cacheht_ticks.store(ticks, Ordering::Relaxed);
    }

    #[inline]
    pub fn balance_period(&self) -> u64 {
        self.balance_period.load(Ordering::Relaxed)
    }

    pub fn set_balance_period(&self, ticks: u64) {
        self.balance_period.store(ticks.max(1), Ordering::Relaxed);
    }

    #[inline]
    pub fn min_catch(&self) -> u32 {
        self.min_catch.load(Ordering::Relaxed)
    }

    pub fn set_min_catch(&self, count: u32) {
        self.min_catch.store(count.max(1), Ordering::Relaxed);
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables::new()
    }
}
