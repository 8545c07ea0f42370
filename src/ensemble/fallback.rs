//! Heuristic fallback classifier.
//!
//! Engages when no classifier model is configured or every model failed
//! for a given image. Classifies from simple image statistics with
//! deliberately low confidences (never above 0.4) so downstream consumers
//! can tell reduced-trust predictions from real ensemble output.

use image::GrayImage;

use crate::emotion::{EmotionDistribution, EmotionLabel};

/// Mean intensity below which the image reads as dark/withdrawn.
const DARK_MEAN: f32 = 80.0;
/// Intensity standard deviation below which the image reads as flat.
const FLAT_STD: f32 = 20.0;
/// Mean intensity above which the image reads as bright.
const BRIGHT_MEAN: f32 = 180.0;
/// Average gradient magnitude above which the image reads as busy.
const BUSY_GRADIENT: f32 = 50.0;

/// Ceiling on any fallback confidence.
pub const MAX_FALLBACK_CONFIDENCE: f32 = 0.4;

pub struct FallbackClassifier;

impl FallbackClassifier {
    /// Classify from image statistics. Rules are checked in a fixed
    /// order; the first match wins.
    pub fn classify(face: &GrayImage) -> (EmotionLabel, f32) {
        let (mean, std) = intensity_stats(face);

        if mean < DARK_MEAN {
            return (EmotionLabel::Sad, 0.30);
        }
        if std < FLAT_STD {
            return (EmotionLabel::Neutral, 0.40);
        }
        if mean > BRIGHT_MEAN {
            return (EmotionLabel::Happy, 0.35);
        }
        if gradient_magnitude_avg(face) > BUSY_GRADIENT {
            return (EmotionLabel::Surprise, 0.40);
        }
        (EmotionLabel::Neutral, 0.30)
    }

    /// Full distribution form: declared confidence on the chosen label,
    /// remaining mass uniform over the others.
    pub fn distribution(face: &GrayImage) -> EmotionDistribution {
        let (label, confidence) = Self::classify(face);
        EmotionDistribution::peaked(label, confidence)
    }
}

fn intensity_stats(img: &GrayImage) -> (f32, f32) {
    let n = (img.width() as u64 * img.height() as u64).max(1);
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for p in img.pixels() {
        let v = p.0[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n as f64;
    let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean as f32, variance.sqrt() as f32)
}

/// Average Sobel gradient magnitude over interior pixels.
fn gradient_magnitude_avg(img: &GrayImage) -> f32 {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let at = |x: u32, y: u32| img.get_pixel(x, y).0[0] as f32;

    let mut total = 0.0f64;
    let mut count = 0u64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            total += ((gx * gx + gy * gy).sqrt() / 4.0) as f64;
            count += 1;
        }
    }
    (total / count as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8) -> GrayImage {
        GrayImage::from_pixel(32, 32, image::Luma([value]))
    }

    #[test]
    fn test_dark_image_is_sad() {
        let (label, conf) = FallbackClassifier::classify(&flat(40));
        assert_eq!(label, EmotionLabel::Sad);
        assert!((conf - 0.30).abs() < 1e-6);
    }

    #[test]
    fn test_flat_midtone_image_is_neutral() {
        let (label, conf) = FallbackClassifier::classify(&flat(120));
        assert_eq!(label, EmotionLabel::Neutral);
        assert!((conf - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_bright_image_is_happy() {
        // Bright but with enough variance not to hit the flat rule.
        let img = GrayImage::from_fn(32, 32, |x, _| image::Luma([200 + (x * 55 / 32) as u8]));
        let (label, conf) = FallbackClassifier::classify(&img);
        assert_eq!(label, EmotionLabel::Happy);
        assert!((conf - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_busy_image_is_surprise() {
        // Midtone checkerboard: high variance, strong edges.
        let img = GrayImage::from_fn(32, 32, |x, y| {
            image::Luma([if (x + y) % 2 == 0 { 90 } else { 170 }])
        });
        let (label, conf) = FallbackClassifier::classify(&img);
        assert_eq!(label, EmotionLabel::Surprise);
        assert!((conf - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_never_exceeds_ceiling() {
        let images = [
            flat(10),
            flat(120),
            flat(250),
            GrayImage::from_fn(32, 32, |x, y| image::Luma([((x * y) % 256) as u8])),
        ];
        for img in &images {
            let (_, conf) = FallbackClassifier::classify(img);
            assert!(conf <= MAX_FALLBACK_CONFIDENCE);
        }
    }

    #[test]
    fn test_fallback_label_set() {
        let allowed = [
            EmotionLabel::Sad,
            EmotionLabel::Neutral,
            EmotionLabel::Happy,
            EmotionLabel::Surprise,
        ];
        for v in (0..=250).step_by(25) {
            let (label, _) = FallbackClassifier::classify(&flat(v));
            assert!(allowed.contains(&label));
        }
    }

    #[test]
    fn test_distribution_sums_to_one() {
        let dist = FallbackClassifier::distribution(&flat(40));
        assert!((dist.sum() - 1.0).abs() < crate::emotion::SUM_TOLERANCE);
        assert_eq!(dist.top().0, EmotionLabel::Sad);
    }
}
