/// Frame indices to decode from a video of `total_frames` frames.
///
/// Short videos yield every frame. Longer ones yield `want` indices spread
/// evenly over `[0, total_frames - 1]`, first and last included; rounding can
/// repeat an index only when the range is barely larger than `want`.
pub fn sample_indices(total_frames: u64, want: usize) -> Vec<u64> {
    if total_frames == 0 || want == 0 {
        return Vec::new();
    }
    if total_frames <= want as u64 {
        return (0..total_frames).collect();
    }
    if want == 1 {
        return vec![0];
    }

    let last = (total_frames - 1) as f64;
    let steps = (want - 1) as f64;
    (0..want)
        .map(|i| (last * i as f64 / steps).round() as u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_video_returns_every_frame() {
        for total in 1..=10u64 {
            let indices = sample_indices(total, 10);
            assert_eq!(indices, (0..total).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_long_video_spans_whole_range() {
        for (total, want) in [(11u64, 10usize), (100, 5), (301, 7), (6, 5), (1_000_000, 3)] {
            let indices = sample_indices(total, want);
            assert_eq!(indices.len(), want);
            assert_eq!(indices[0], 0);
            assert_eq!(*indices.last().unwrap(), total - 1);
            assert!(indices.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_even_spacing() {
        assert_eq!(sample_indices(100, 5), vec![0, 25, 50, 74, 99]);
        assert_eq!(sample_indices(9, 5), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(sample_indices(0, 5).is_empty());
        assert!(sample_indices(10, 0).is_empty());
        assert_eq!(sample_indices(10, 1), vec![0]);
    }
}
