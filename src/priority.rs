//! Priority map and bitmap primitives
//!
//! The priority space is a single addressable range `[0, PRI_COUNT)`: the
//! low time-sharing band followed by the real-time band. Because the bands
//! are concatenated, a real-time priority always compares above any
//! time-sharing priority with plain integer ordering.
//!
//! Each run queue keeps one bit per priority level, grouped into `u32`
//! words. The map from an effective priority to its FIFO index and (word,
//! bit) position is pure arithmetic; `find_highest` is the one
//! performance-critical inner loop, implemented with word masking and
//! `leading_zeros` so a full scan touches at most `BITMAP_WORDS` words.

/// Total number of priority levels
pub const PRI_COUNT: usize = 224;

/// Size of the time-sharing band; priorities at or above this are real-time
pub const PRI_TS_COUNT: usize = 192;

/// First priority of the real-time band
pub const PRI_RT_FIRST: usize = PRI_TS_COUNT;

/// Cached-maximum value meaning "no runnable thread"
pub const PRI_NONE: i16 = -1;

pub(crate) const BITMAP_BITS: usize = u32::BITS as usize;
pub(crate) const BITMAP_SHIFT: usize = 5;
pub(crate) const BITMAP_WORDS: usize = PRI_COUNT / BITMAP_BITS;

/// Map an effective priority to its bitmap word index and bit mask
#[inline(always)]
pub const fn pri_slot(pri: u8) -> (usize, u32) {
    ((pri as usize) >> BITMAP_SHIFT, 1u32 << (pri as usize & (BITMAP_BITS - 1)))
}

/// Whether a priority falls in the real-time band
#[inline(always)]
pub const fn is_realtime(pri: u8) -> bool {
    (pri as usize) >= PRI_RT_FIRST
}

/// Clamp an arbitrary priority value into the supported range
#[inline(always)]
pub const fn normalize(pri: u8) -> u8 {
    if (pri as usize) >= PRI_COUNT {
        (PRI_COUNT - 1) as u8
    } else {
        pri
    }
}

/// Find the highest set bit at or below `from`
///
/// Returns the priority of the highest non-empty FIFO, or `None` if the
/// bitmap is entirely clear below that point.
pub fn find_highest(bitmap: &[u32; BITMAP_WORDS], from: usize) -> Option<u8> {
    debug_assert!(from < PRI_COUNT);

    let mut word = from >> BITMAP_SHIFT;
    // Keep bits 0..=from within the first word, everything in the rest.
    let mut mask = !0u32 >> (BITMAP_BITS - 1 - (from & (BITMAP_BITS - 1)));

    loop {
        let w = bitmap[word] & mask;
        if w != 0 {
            let bit = BITMAP_BITS - 1 - w.leading_zeros() as usize;
            return Some(((word << BITMAP_SHIFT) + bit) as u8);
        }
        if word == 0 {
            return None;
        }
        word -= 1;
        mask = !0u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_arithmetic() {
        assert_eq!(pri_slot(0), (0, 1));
        assert_eq!(pri_slot(31), (0, 1 << 31));
        assert_eq!(pri_slot(32), (1, 1));
        assert_eq!(pri_slot(223), (6, 1 << 31));
    }

    #[test]
    fn band_split() {
        assert!(!is_realtime(0));
        assert!(!is_realtime((PRI_TS_COUNT - 1) as u8));
        assert!(is_realtime(PRI_RT_FIRST as u8));
        assert!(is_realtime((PRI_COUNT - 1) as u8));
    }

    #[test]
    fn find_highest_empty() {
        let bitmap = [0u32; BITMAP_WORDS];
        assert_eq!(find_highest(&bitmap, PRI_COUNT - 1), None);
        assert_eq!(find_highest(&bitmap, 0), None);
    }

    #[test]
    fn find_highest_single_bits() {
        for pri in [0usize, 1, 31, 32, 63, 100, 191, 192, 223] {
            let mut bitmap = [0u32; BITMAP_WORDS];
            let (w, m) = pri_slot(pri as u8);
            bitmap[w] |= m;
            assert_eq!(find_highest(&bitmap, PRI_COUNT - 1), Some(pri as u8));
            assert_eq!(find_highest(&bitmap, pri), Some(pri as u8));
            if pri > 0 {
                assert_eq!(find_highest(&bitmap, pri - 1), None);
            }
        }
    }

    #[test]
    fn find_highest_picks_topmost() {
        let mut bitmap = [0u32; BITMAP_WORDS];
        for pri in [3u8, 10, 77, 150] {
            let (w, m) = pri_slot(pri);
            bitmap[w] |= m;
        }
        assert_eq!(find_highest(&bitmap, PRI_COUNT - 1), Some(150));
        assert_eq!(find_highest(&bitmap, 149), Some(77));
        assert_eq!(find_highest(&bitmap, 77), Some(77));
        assert_eq!(find_highest(&bitmap, 76), Some(10));
        assert_eq!(find_highest(&bitmap, 9), Some(3));
        assert_eq!(find_highest(&bitmap, 2), None);
    }
}
