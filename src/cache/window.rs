//! Window sizing and eviction ordering.
//!
//! Everything here is pure: the cache feeds in geometry, frame count, memory
//! budget and caps, and applies the result under its lock.

/// Frames that fit into this many bytes are kept resident
pub const RESIDENT_BUDGET_BYTES: u64 = 10 * 1024 * 1024;

/// Frames larger than this are decoded on demand (window of 1)
pub const ON_DEMAND_FRAME_BYTES: u64 = 16 * 1024 * 1024;

/// Smallest heuristic window for frames that are not decoded on demand
pub const DEFAULT_WINDOW: usize = 5;

/// Heuristic working window size.
///
/// Larger frames give a smaller window, more frames a larger one (up to
/// `frame_count`). The result never exceeds what fits into `memory_budget`, and is
/// clamped to `[1, frame_count]` and then to `explicit_cap` when non-zero.
pub fn compute_window_size(frame_byte_size: u64, frame_count: usize, memory_budget: u64, explicit_cap: usize) -> usize {
    let frame_bytes = frame_byte_size.max(1);

    let preferred = if frame_bytes > ON_DEMAND_FRAME_BYTES {
        1
    } else {
        saturating_usize(RESIDENT_BUDGET_BYTES / frame_bytes).max(DEFAULT_WINDOW)
    };

    clamp_window(preferred.min(budget_limit(frame_bytes, memory_budget)), frame_count, explicit_cap)
}

/// How many frames of `frame_byte_size` fit into `memory_budget` (at least 1)
pub fn budget_limit(frame_byte_size: u64, memory_budget: u64) -> usize {
    saturating_usize(memory_budget / frame_byte_size.max(1)).max(1)
}

/// Clamp a window size to `[1, frame_count]`, then to `explicit_cap` when non-zero
pub fn clamp_window(size: usize, frame_count: usize, explicit_cap: usize) -> usize {
    let mut size = size.min(frame_count);
    if explicit_cap > 0 {
        size = size.min(explicit_cap);
    }
    size.max(1)
}

/// Forward distance from `cursor` to `index`, wrapping modulo `frame_count`.
///
/// The window grows forward from the cursor, so the frame just behind the cursor
/// is the farthest one.
pub fn circular_distance(index: usize, cursor: usize, frame_count: usize) -> usize {
    if frame_count == 0 {
        return 0;
    }
    (index % frame_count + frame_count - cursor % frame_count) % frame_count
}

pub fn in_window(index: usize, cursor: usize, window: usize, frame_count: usize) -> bool {
    circular_distance(index, cursor, frame_count) < window
}

/// Window indices in prefetch order: cursor, cursor + 1, ... wrapping
pub fn window_indices(cursor: usize, window: usize, frame_count: usize) -> impl Iterator<Item = usize> {
    let window = window.min(frame_count);
    (0..window).map(move |offset| (cursor + offset) % frame_count)
}

/// Sort eviction candidates `(index, last_touch)` so the first entry goes first:
/// greatest distance from the cursor, then least recently touched.
pub fn sort_for_eviction(candidates: &mut [(usize, u64)], cursor: usize, frame_count: usize) {
    candidates.sort_by(|(a, a_touch), (b, b_touch)| {
        circular_distance(*b, cursor, frame_count)
            .cmp(&circular_distance(*a, cursor, frame_count))
            .then(a_touch.cmp(b_touch))
    });
}

fn saturating_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_small_frames_keep_everything() {
        // 64x64 RGBA = 16 KiB, 640 fit into the resident budget
        assert_eq!(compute_window_size(16 * KIB, 10, u64::MAX, 0), 10);
        assert_eq!(compute_window_size(16 * KIB, 500, u64::MAX, 0), 500);
        assert_eq!(compute_window_size(16 * KIB, 1000, u64::MAX, 0), 640);
    }

    #[test]
    fn test_medium_frames_use_default_window() {
        // 1920x1080 RGBA is about 7.9 MiB, only one fits into the resident budget
        let frame = 1920 * 1080 * 4;
        assert_eq!(compute_window_size(frame, 100, u64::MAX, 0), DEFAULT_WINDOW);
        assert_eq!(compute_window_size(frame, 3, u64::MAX, 0), 3);
    }

    #[test]
    fn test_huge_frames_decode_on_demand() {
        assert_eq!(compute_window_size(ON_DEMAND_FRAME_BYTES + 1, 100, u64::MAX, 0), 1);
        assert_eq!(compute_window_size(ON_DEMAND_FRAME_BYTES, 100, u64::MAX, 0), DEFAULT_WINDOW);
    }

    #[test]
    fn test_memory_budget_limits_window() {
        assert_eq!(compute_window_size(MIB, 100, 3 * MIB, 0), 3);
        assert_eq!(compute_window_size(MIB, 100, 0, 0), 1);
    }

    #[test]
    fn test_explicit_cap() {
        assert_eq!(compute_window_size(KIB, 50, u64::MAX, 1), 1);
        assert_eq!(compute_window_size(KIB, 50, u64::MAX, 7), 7);
        assert_eq!(compute_window_size(KIB, 5, u64::MAX, 7), 5);
    }

    #[test]
    fn test_circular_distance_wraps() {
        assert_eq!(circular_distance(3, 3, 10), 0);
        assert_eq!(circular_distance(5, 3, 10), 2);
        assert_eq!(circular_distance(2, 3, 10), 9);
        assert_eq!(circular_distance(0, 9, 10), 1);
    }

    #[test]
    fn test_window_indices_wrap_around() {
        let indices: Vec<_> = window_indices(8, 4, 10).collect();
        assert_eq!(indices, vec![8, 9, 0, 1]);

        let clamped: Vec<_> = window_indices(1, 9, 3).collect();
        assert_eq!(clamped, vec![1, 2, 0]);
    }

    #[test]
    fn test_eviction_order_by_distance_then_touch() {
        // cursor 4 of 10: index 3 is farthest (9), 0 and 1 follow
        let mut candidates = vec![(1, 5), (3, 9), (0, 7), (9, 2), (8, 1)];
        sort_for_eviction(&mut candidates, 4, 10);
        let order: Vec<_> = candidates.iter().map(|(index, _)| *index).collect();
        assert_eq!(order, vec![3, 1, 0, 9, 8]);

        // same index twice cannot happen, but equal distances with different touch
        // order resolve to the older one first
        let mut ties = vec![(2, 8), (2, 3)];
        sort_for_eviction(&mut ties, 0, 4);
        assert_eq!(ties, vec![(2, 3), (2, 8)]);
    }

    proptest! {
        #[test]
        fn prop_window_within_bounds(
            frame_bytes in 1u64..64 * MIB,
            frame_count in 1usize..2000,
            budget in 0u64..u64::MAX,
            cap in 0usize..100,
        ) {
            let size = compute_window_size(frame_bytes, frame_count, budget, cap);
            prop_assert!(size >= 1);
            prop_assert!(size <= frame_count);
            if cap > 0 {
                prop_assert!(size <= cap);
            }
        }

        #[test]
        fn prop_window_non_increasing_in_frame_size(
            smaller in 1u64..64 * MIB,
            extra in 0u64..64 * MIB,
            frame_count in 1usize..2000,
            budget in 0u64..u64::MAX,
        ) {
            prop_assert!(
                compute_window_size(smaller + extra, frame_count, budget, 0)
                    <= compute_window_size(smaller, frame_count, budget, 0)
            );
        }

        #[test]
        fn prop_window_non_decreasing_in_frame_count(
            frame_bytes in 1u64..64 * MIB,
            fewer in 1usize..2000,
            extra in 0usize..2000,
            budget in 0u64..u64::MAX,
        ) {
            prop_assert!(
                compute_window_size(frame_bytes, fewer + extra, budget, 0)
                    >= compute_window_size(frame_bytes, fewer, budget, 0)
            );
        }

        #[test]
        fn prop_window_indices_are_distinct_and_in_window(
            frame_count in 1usize..200,
            cursor_seed in 0usize..200,
            window in 1usize..250,
        ) {
            let cursor = cursor_seed % frame_count;
            let indices: Vec<_> = window_indices(cursor, window, frame_count).collect();
            prop_assert_eq!(indices.len(), window.min(frame_count));
            let mut sorted = indices.clone();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), indices.len());
            for index in indices {
                prop_assert!(in_window(index, cursor, window, frame_count));
            }
        }
    }
}
