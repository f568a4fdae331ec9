//! Sparse binary features for the structural similarity test
//!
//! Keypoints come from FAST corner detection. Each keypoint gets a
//! 256-bit binary descriptor built from a fixed pseudo-random pair
//! pattern, steered by the patch's intensity-centroid orientation so
//! the descriptor is rotation-invariant. Descriptors are compared
//! under Hamming distance with mutual cross-checking.

use image::GrayImage;
use imageproc::corners::corners_fast9;
use std::sync::OnceLock;

/// Number of bit pairs per descriptor (256 bits = 32 bytes)
const DESCRIPTOR_BITS: usize = 256;

/// Radius of the orientation patch around a keypoint
const PATCH_RADIUS: i32 = 15;

/// Keypoints closer than this to an edge cannot fit a rotated patch
const BORDER_MARGIN: u32 = 20;

/// Feature extraction parameters
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// FAST corner intensity threshold
    pub fast_threshold: u8,
    /// Keep at most this many keypoints, strongest first
    pub max_features: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_features: 500,
        }
    }
}

/// 256-bit binary descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BITS / 8]);

impl Descriptor {
    /// Number of differing bits between two descriptors
    #[must_use]
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// A mutual best match between two descriptor sets
#[derive(Debug, Clone, Copy)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

/// Deterministic sampling pattern shared by every descriptor
///
/// Offsets are drawn from a fixed-seed LCG so the pattern is identical
/// across runs and machines.
fn sampling_pattern() -> &'static [(i32, i32, i32, i32); DESCRIPTOR_BITS] {
    static PATTERN: OnceLock<[(i32, i32, i32, i32); DESCRIPTOR_BITS]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            // Map the top bits into [-13, 13]
            ((state >> 33) % 27) as i32 - 13
        };
        let mut pattern = [(0, 0, 0, 0); DESCRIPTOR_BITS];
        for pair in &mut pattern {
            *pair = (next(), next(), next(), next());
        }
        pattern
    })
}

struct PatchStats {
    /// Intensity-centroid orientation in radians
    angle: f32,
    /// Mean intensity over the circular patch
    mean: f32,
}

fn patch_stats(image: &GrayImage, x: u32, y: u32) -> PatchStats {
    let (mut m01, mut m10, mut sum) = (0.0f32, 0.0f32, 0.0f32);
    let mut count = 0u32;
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > PATCH_RADIUS * PATCH_RADIUS {
                continue;
            }
            let px = x as i32 + dx;
            let py = y as i32 + dy;
            let intensity = f32::from(image.get_pixel(px as u32, py as u32).0[0]);
            m10 += dx as f32 * intensity;
            m01 += dy as f32 * intensity;
            sum += intensity;
            count += 1;
        }
    }
    PatchStats {
        angle: m01.atan2(m10),
        mean: sum / count as f32,
    }
}

/// Extract oriented binary descriptors for the strongest corners
#[must_use]
pub fn extract_descriptors(image: &GrayImage, config: &FeatureConfig) -> Vec<Descriptor> {
    let (width, height) = image.dimensions();
    if width <= 2 * BORDER_MARGIN || height <= 2 * BORDER_MARGIN {
        return Vec::new();
    }

    let mut corners = corners_fast9(image, config.fast_threshold);
    corners.retain(|c| {
        c.x >= BORDER_MARGIN
            && c.y >= BORDER_MARGIN
            && c.x < width - BORDER_MARGIN
            && c.y < height - BORDER_MARGIN
    });
    corners.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    corners.truncate(config.max_features);

    let pattern = sampling_pattern();
    let mut descriptors = Vec::with_capacity(corners.len());
    for corner in &corners {
        let stats = patch_stats(image, corner.x, corner.y);
        let (sin, cos) = stats.angle.sin_cos();
        let mut bytes = [0u8; DESCRIPTOR_BITS / 8];
        for (bit, &(x0, y0, x1, y1)) in pattern.iter().enumerate() {
            let a = sample_rotated(image, corner.x, corner.y, x0, y0, sin, cos);
            let b = sample_rotated(image, corner.x, corner.y, x1, y1, sin, cos);
            // A tied pair carries no ordering signal; compare the tied
            // value against the patch mean so flat regions do not
            // collapse every descriptor toward all-zero bits.
            let set = if a == b {
                f32::from(a) > stats.mean
            } else {
                a < b
            };
            if set {
                bytes[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptors.push(Descriptor(bytes));
    }
    descriptors
}

fn sample_rotated(image: &GrayImage, cx: u32, cy: u32, dx: i32, dy: i32, sin: f32, cos: f32) -> u8 {
    let rx = (dx as f32 * cos - dy as f32 * sin).round() as i32;
    let ry = (dx as f32 * sin + dy as f32 * cos).round() as i32;
    let px = (cx as i32 + rx).clamp(0, image.width() as i32 - 1);
    let py = (cy as i32 + ry).clamp(0, image.height() as i32 - 1);
    image.get_pixel(px as u32, py as u32).0[0]
}

/// Brute-force nearest-neighbor matching with mutual cross-check
///
/// A pair is kept only when each descriptor is the other's nearest
/// neighbor. Results are sorted by ascending distance.
#[must_use]
pub fn match_descriptors(query: &[Descriptor], train: &[Descriptor]) -> Vec<DescriptorMatch> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let nearest = |from: &[Descriptor], to: &[Descriptor]| -> Vec<(usize, u32)> {
        from.iter()
            .map(|d| {
                to.iter()
                    .enumerate()
                    .map(|(i, t)| (i, d.hamming(t)))
                    .min_by_key(|&(_, dist)| dist)
                    .expect("non-empty descriptor set")
            })
            .collect()
    };

    let forward = nearest(query, train);
    let backward = nearest(train, query);

    let mut matches: Vec<DescriptorMatch> = forward
        .iter()
        .enumerate()
        .filter(|&(qi, &(ti, _))| backward[ti].0 == qi)
        .map(|(qi, &(ti, dist))| DescriptorMatch {
            query_idx: qi,
            train_idx: ti,
            distance: dist,
        })
        .collect();
    matches.sort_by_key(|m| m.distance);
    matches
}

/// Fraction of matches closer than the distance threshold
///
/// An empty match set yields 0.0, so featureless candidates are never
/// rejected by the structural test alone.
#[must_use]
pub fn good_match_ratio(matches: &[DescriptorMatch], distance_threshold: u32) -> f64 {
    if matches.is_empty() {
        return 0.0;
    }
    let good = matches
        .iter()
        .filter(|m| m.distance < distance_threshold)
        .count();
    good as f64 / matches.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Deterministic noise image so FAST finds plenty of corners
    fn noise_image(seed: u64, width: u32, height: u32) -> GrayImage {
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        GrayImage::from_fn(width, height, |_, _| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            Luma([(state >> 56) as u8])
        })
    }

    /// Block-textured image in the style of low-detail game footage;
    /// intensities are constant within each 8x8 block, so many sample
    /// pairs tie exactly.
    fn block_noise_image(seed: u64, width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let (bx, by) = (x / 8, y / 8);
            let mut state = seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(u64::from(bx) << 32)
                .wrapping_add(u64::from(by) << 16)
                | 1;
            for _ in 0..2 {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
            }
            Luma([(state >> 56) as u8])
        })
    }

    #[test]
    fn test_hamming_distance() {
        let zero = Descriptor([0u8; 32]);
        let ones = Descriptor([0xFF; 32]);
        assert_eq!(zero.hamming(&zero), 0);
        assert_eq!(zero.hamming(&ones), 256);

        let mut one_bit = [0u8; 32];
        one_bit[3] = 0b0000_1000;
        assert_eq!(zero.hamming(&Descriptor(one_bit)), 1);
    }

    #[test]
    fn test_sampling_pattern_is_stable() {
        let first = sampling_pattern()[0];
        let again = sampling_pattern()[0];
        assert_eq!(first, again);
        for &(x0, y0, x1, y1) in sampling_pattern().iter() {
            for v in [x0, y0, x1, y1] {
                assert!((-13..=13).contains(&v));
            }
        }
    }

    #[test]
    fn test_identical_images_match_at_zero_distance() {
        let img = noise_image(7, 160, 120);
        let config = FeatureConfig::default();
        let a = extract_descriptors(&img, &config);
        let b = extract_descriptors(&img, &config);
        assert!(!a.is_empty(), "noise image should produce corners");
        assert_eq!(a.len(), b.len());

        let matches = match_descriptors(&a, &b);
        assert!(!matches.is_empty());
        assert!(matches.iter().all(|m| m.distance == 0));
        assert!((good_match_ratio(&matches, 40) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unrelated_images_have_low_good_ratio() {
        let config = FeatureConfig::default();
        let a = extract_descriptors(&noise_image(1, 160, 120), &config);
        let b = extract_descriptors(&noise_image(2, 160, 120), &config);
        let matches = match_descriptors(&a, &b);
        // Independent noise gives near-random descriptors; distances
        // concentrate around 128 bits, far above the threshold.
        assert!(good_match_ratio(&matches, 40) < 0.25);
    }

    #[test]
    fn test_block_texture_descriptors_are_not_degenerate() {
        let img = block_noise_image(4, 160, 120);
        let descriptors = extract_descriptors(&img, &FeatureConfig::default());
        assert!(!descriptors.is_empty());

        // Flat sample pairs must not drag descriptors toward all-zero
        let mean_bits: f64 = descriptors
            .iter()
            .map(|d| f64::from(d.0.iter().map(|b| b.count_ones()).sum::<u32>()))
            .sum::<f64>()
            / descriptors.len() as f64;
        assert!(
            (64.0..192.0).contains(&mean_bits),
            "descriptor popcount collapsed to {mean_bits}"
        );
    }

    #[test]
    fn test_unrelated_block_textures_have_low_good_ratio() {
        let config = FeatureConfig::default();
        for (a_seed, b_seed) in [(4u64, 5u64), (5, 6), (1, 9)] {
            let a = extract_descriptors(&block_noise_image(a_seed, 160, 120), &config);
            let b = extract_descriptors(&block_noise_image(b_seed, 160, 120), &config);
            let matches = match_descriptors(&a, &b);
            let ratio = good_match_ratio(&matches, 40);
            assert!(
                ratio < 0.75,
                "unrelated textures {a_seed}/{b_seed} gave good ratio {ratio}"
            );
        }
    }

    #[test]
    fn test_empty_match_set_ratio_is_zero() {
        assert_eq!(good_match_ratio(&[], 40), 0.0);
    }

    #[test]
    fn test_matches_sorted_ascending() {
        let config = FeatureConfig::default();
        let a = extract_descriptors(&noise_image(3, 160, 120), &config);
        let b = extract_descriptors(&noise_image(4, 160, 120), &config);
        let matches = match_descriptors(&a, &b);
        assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_tiny_image_yields_no_descriptors() {
        let img = noise_image(5, 16, 16);
        assert!(extract_descriptors(&img, &FeatureConfig::default()).is_empty());
    }
}
