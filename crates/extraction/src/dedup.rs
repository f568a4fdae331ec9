//! Two-tier visual redundancy filter for key-frame candidates
//!
//! Tier one is a structural test: sparse binary descriptors of the
//! candidate are cross-check matched against the most recently
//! accepted frame, rejecting near-static scenes whose local structure
//! is preserved. Tier two is a photometric test: a small normalized
//! thumbnail is compared against a rolling window of recently accepted
//! thumbnails, rejecting slow pans, fades and lighting drifts that
//! keep structure but barely change pixel statistics.

use crate::features::{
    extract_descriptors, good_match_ratio, match_descriptors, Descriptor, FeatureConfig,
};
use image::RgbImage;
use std::collections::VecDeque;
use tracing::trace;

/// Thumbnail edge length in pixels
pub const THUMB_SIZE: u32 = 64;

/// Deduplication thresholds and window sizing
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Hamming distance below which a descriptor match counts as good
    pub distance_threshold: u32,
    /// Reject when the good-match ratio exceeds this
    pub match_ratio_threshold: f64,
    /// Structural rejection needs at least this many cross-checked
    /// matches; a ratio computed from fewer is noise
    pub min_matches: usize,
    /// Reject when the minimum thumbnail delta falls below this
    pub thumb_delta_threshold: f32,
    /// Number of accepted thumbnails kept for the photometric test
    pub window_size: usize,
    /// Feature extraction parameters for the structural test
    pub features: FeatureConfig,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 40,
            match_ratio_threshold: 0.75,
            min_matches: 8,
            thumb_delta_threshold: 0.1,
            window_size: 64,
            features: FeatureConfig::default(),
        }
    }
}

/// Downsampled frame, normalized to [0, 1]
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pixels: Vec<f32>,
}

impl Thumbnail {
    /// Resize to a fixed small square and normalize intensities
    #[must_use]
    pub fn from_image(image: &RgbImage) -> Self {
        let resized = image::imageops::resize(
            image,
            THUMB_SIZE,
            THUMB_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let pixels = resized
            .into_raw()
            .into_iter()
            .map(|v| f32::from(v) / 255.0)
            .collect();
        Self { pixels }
    }

    /// Mean absolute per-channel pixel difference
    #[must_use]
    pub fn mean_abs_diff(&self, other: &Thumbnail) -> f32 {
        debug_assert_eq!(self.pixels.len(), other.pixels.len());
        let sum: f32 = self
            .pixels
            .iter()
            .zip(other.pixels.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        sum / self.pixels.len() as f32
    }
}

/// Bounded ring buffer of recently accepted thumbnails
#[derive(Debug, Default)]
pub struct DedupWindow {
    thumbs: VecDeque<Thumbnail>,
    capacity: usize,
}

impl DedupWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            thumbs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a thumbnail, evicting the oldest at capacity
    pub fn push(&mut self, thumb: Thumbnail) {
        if self.thumbs.len() >= self.capacity {
            self.thumbs.pop_front();
        }
        self.thumbs.push_back(thumb);
    }

    /// Minimum distance from the candidate to any stored thumbnail
    #[must_use]
    pub fn min_distance(&self, candidate: &Thumbnail) -> Option<f32> {
        self.thumbs
            .iter()
            .map(|t| candidate.mean_abs_diff(t))
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.thumbs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.thumbs.is_empty()
    }
}

/// Why a candidate frame was rejected
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Structural good-match ratio exceeded the threshold
    Structural { good_ratio: f64 },
    /// Minimum thumbnail delta fell below the threshold
    Photometric { delta: f32 },
}

/// Accept/reject decision for one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Accepted,
    Rejected(RejectReason),
}

impl Decision {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted)
    }
}

/// Stateful per-video deduplicator
///
/// Owned by exactly one pipeline run; never shared across videos.
pub struct FrameDeduplicator {
    config: DedupConfig,
    window: DedupWindow,
    previous: Option<Vec<Descriptor>>,
}

impl FrameDeduplicator {
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        let window = DedupWindow::new(config.window_size);
        Self {
            config,
            window,
            previous: None,
        }
    }

    /// Judge a candidate frame and update rolling state on acceptance
    ///
    /// The first candidate of a run is always accepted: there is no
    /// prior reference to compare against.
    pub fn judge(&mut self, frame: &RgbImage) -> Decision {
        let gray = image::imageops::grayscale(frame);
        let descriptors = extract_descriptors(&gray, &self.config.features);
        let thumb = Thumbnail::from_image(frame);

        if let Some(previous) = &self.previous {
            let matches = match_descriptors(&descriptors, previous);
            if matches.len() >= self.config.min_matches {
                let good_ratio = good_match_ratio(&matches, self.config.distance_threshold);
                if good_ratio > self.config.match_ratio_threshold {
                    trace!(good_ratio, "rejected by structural test");
                    return Decision::Rejected(RejectReason::Structural { good_ratio });
                }
            }

            if let Some(delta) = self.window.min_distance(&thumb) {
                if delta < self.config.thumb_delta_threshold {
                    trace!(delta, "rejected by photometric test");
                    return Decision::Rejected(RejectReason::Photometric { delta });
                }
            }
        }

        self.window.push(thumb);
        self.previous = Some(descriptors);
        Decision::Accepted
    }

    /// Number of thumbnails currently held by the window
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn mix(seed: u64, bx: u32, by: u32, channel: u32) -> u8 {
        let mut state = seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(u64::from(bx) << 32)
            .wrapping_add(u64::from(by) << 16)
            .wrapping_add(u64::from(channel))
            | 1;
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (state >> 56) as u8
    }

    /// Deterministic 8x8-block noise frame; distinct seeds give
    /// visually unrelated frames, and the blocks survive thumbnail
    /// downsampling so photometric deltas stay large.
    fn noise_frame(seed: u64) -> RgbImage {
        RgbImage::from_fn(160, 120, |x, y| {
            let (bx, by) = (x / 8, y / 8);
            Rgb([
                mix(seed, bx, by, 0),
                mix(seed, bx, by, 1),
                mix(seed, bx, by, 2),
            ])
        })
    }

    /// Low-contrast block frame; structure differs between seeds but
    /// all pixels stay close to black.
    fn dark_frame(seed: u64) -> RgbImage {
        RgbImage::from_fn(160, 120, |x, y| {
            let (bx, by) = (x / 8, y / 8);
            Rgb([
                mix(seed, bx, by, 0) % 16,
                mix(seed, bx, by, 1) % 16,
                mix(seed, bx, by, 2) % 16,
            ])
        })
    }

    #[test]
    fn test_first_candidate_always_accepted() {
        let mut dedup = FrameDeduplicator::new(DedupConfig::default());
        // Even a flat featureless frame is accepted first
        let flat = RgbImage::from_pixel(160, 120, Rgb([128, 128, 128]));
        assert!(dedup.judge(&flat).is_accepted());
    }

    #[test]
    fn test_identical_span_in_long_sequence_keeps_one() {
        // 100 key frames, all distinct except frames 10-15 which are
        // pixel-identical to frame 9: exactly that span is rejected.
        let mut dedup = FrameDeduplicator::new(DedupConfig::default());
        let reference = noise_frame(9);
        let mut accepted = 0;
        let mut rejected_at = Vec::new();

        for i in 0..100u64 {
            let frame = if (10..=15).contains(&i) {
                reference.clone()
            } else {
                noise_frame(i)
            };
            match dedup.judge(&frame) {
                Decision::Accepted => accepted += 1,
                Decision::Rejected(RejectReason::Structural { good_ratio }) => {
                    assert!(good_ratio > 0.75);
                    rejected_at.push(i);
                }
                other => panic!("unexpected decision at frame {i}: {other:?}"),
            }
        }

        assert_eq!(accepted, 94);
        assert_eq!(rejected_at, vec![10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_distinct_frames_accepted() {
        let mut dedup = FrameDeduplicator::new(DedupConfig::default());
        for seed in 0..10 {
            assert!(
                dedup.judge(&noise_frame(seed)).is_accepted(),
                "unrelated noise frame {seed} should be accepted"
            );
        }
    }

    #[test]
    fn test_photometric_rejection_when_structure_differs() {
        let mut dedup = FrameDeduplicator::new(DedupConfig::default());
        assert!(dedup.judge(&dark_frame(1)).is_accepted());

        // Different structure (low good ratio) but thumbnails are both
        // near-black, so the mean delta sits well under 0.1
        let second = dark_frame(2);
        let decision = dedup.judge(&second);
        assert!(
            matches!(decision, Decision::Rejected(RejectReason::Photometric { delta })
                if delta < 0.1),
            "expected photometric rejection, got {decision:?}"
        );
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = DedupWindow::new(64);
        let thumb = Thumbnail::from_image(&noise_frame(0));
        for _ in 0..70 {
            window.push(thumb.clone());
            assert!(window.len() <= 64);
        }
        assert_eq!(window.len(), 64);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = DedupWindow::new(2);
        let a = Thumbnail::from_image(&noise_frame(1));
        let b = Thumbnail::from_image(&noise_frame(2));
        let c = Thumbnail::from_image(&noise_frame(3));
        window.push(a.clone());
        window.push(b);
        window.push(c);
        // `a` was evicted, so its distance to the window is now large
        let dist = window.min_distance(&a).unwrap();
        assert!(dist > 0.1);
    }

    #[test]
    fn test_thumbnail_delta_of_identical_images_is_zero() {
        let frame = noise_frame(42);
        let a = Thumbnail::from_image(&frame);
        let b = Thumbnail::from_image(&frame);
        assert_eq!(a.mean_abs_diff(&b), 0.0);
    }

    #[test]
    fn test_min_distance_empty_window() {
        let window = DedupWindow::new(4);
        let thumb = Thumbnail::from_image(&noise_frame(0));
        assert!(window.min_distance(&thumb).is_none());
        assert!(window.is_empty());
    }

    #[test]
    fn test_accepted_frames_respect_both_bounds() {
        // Property check from the acceptance rules: whenever a frame
        // is accepted after the first, its good ratio was <= 0.75 and
        // its window distance was >= 0.1 at decision time.
        let config = DedupConfig::default();
        let mut dedup = FrameDeduplicator::new(config.clone());
        let mut accepted = 0;
        for seed in 0..20 {
            let frame = noise_frame(seed % 7); // repeats force rejections
            if dedup.judge(&frame).is_accepted() {
                accepted += 1;
            }
            assert!(dedup.window_len() <= config.window_size);
        }
        // Seven distinct frames, thirteen repeats
        assert_eq!(accepted, 7);
    }
}
