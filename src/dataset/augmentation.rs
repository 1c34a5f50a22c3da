//! Image transforms
//!
//! A [`Transform`] maps a decoded image to a normalized `[3, size, size]` float
//! buffer in CHW order. Two modes exist:
//!
//! - **Training**: resize, random horizontal flip, random rotation, color
//!   jitter, then normalization
//! - **Evaluation**: resize and normalization only, fully deterministic
//!
//! Transforms hold no mutable state; randomness comes from the caller's RNG
//! (or the calling thread's RNG) so concurrent calls never interfere.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Which pipeline a transform runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformMode {
    Training,
    Evaluation,
}

impl std::fmt::Display for TransformMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformMode::Training => write!(f, "training"),
            TransformMode::Evaluation => write!(f, "evaluation"),
        }
    }
}

/// Parameters of the training-mode augmentations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Probability of a horizontal flip
    pub horizontal_flip_prob: f32,
    /// Rotation angle is drawn uniformly from `±rotation_degrees`
    pub rotation_degrees: f32,
    /// Brightness factor range `1 ± brightness`
    pub brightness: f32,
    /// Contrast factor range `1 ± contrast`
    pub contrast: f32,
    /// Saturation factor range `1 ± saturation`
    pub saturation: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            rotation_degrees: 15.0,
            brightness: 0.1,
            contrast: 0.1,
            saturation: 0.1,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

/// Stateless image -> tensor-data transform
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    image_size: u32,
    mode: TransformMode,
    config: AugmentationConfig,
}

impl Transform {
    pub fn new(image_size: u32, mode: TransformMode) -> Self {
        Self::with_config(image_size, mode, AugmentationConfig::default())
    }

    pub fn with_config(image_size: u32, mode: TransformMode, config: AugmentationConfig) -> Self {
        Self {
            image_size,
            mode,
            config,
        }
    }

    pub fn training(image_size: u32) -> Self {
        Self::new(image_size, TransformMode::Training)
    }

    pub fn evaluation(image_size: u32) -> Self {
        Self::new(image_size, TransformMode::Evaluation)
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Number of floats produced per image (`3 * size * size`)
    pub fn output_len(&self) -> usize {
        3 * (self.image_size as usize) * (self.image_size as usize)
    }

    /// Apply the transform, drawing randomness from the current thread's RNG
    pub fn apply(&self, img: &DynamicImage) -> Vec<f32> {
        self.apply_with_rng(img, &mut rand::thread_rng())
    }

    /// Apply the transform with an explicit RNG (ignored in evaluation mode)
    pub fn apply_with_rng<R: Rng + ?Sized>(&self, img: &DynamicImage, rng: &mut R) -> Vec<f32> {
        let mut rgb = imageops::resize(
            &img.to_rgb8(),
            self.image_size,
            self.image_size,
            FilterType::Triangle,
        );

        if self.mode == TransformMode::Training {
            rgb = self.augment(rgb, rng);
        }

        to_normalized_chw(&rgb, &self.config.mean, &self.config.std)
    }

    fn augment<R: Rng + ?Sized>(&self, mut rgb: RgbImage, rng: &mut R) -> RgbImage {
        let cfg = &self.config;

        if rng.gen::<f32>() < cfg.horizontal_flip_prob {
            imageops::flip_horizontal_in_place(&mut rgb);
        }

        if cfg.rotation_degrees > 0.0 {
            let angle = rng.gen_range(-cfg.rotation_degrees..=cfg.rotation_degrees);
            rgb = rotate(&rgb, angle);
        }

        // Jitter factors are drawn up front, then applied in a random order
        let brightness = jitter_factor(rng, cfg.brightness);
        let contrast = jitter_factor(rng, cfg.contrast);
        let saturation = jitter_factor(rng, cfg.saturation);

        let mut order = [0u8, 1, 2];
        order.shuffle(rng);
        for op in order {
            match (op, brightness, contrast, saturation) {
                (0, Some(f), _, _) => adjust_brightness(&mut rgb, f),
                (1, _, Some(f), _) => adjust_contrast(&mut rgb, f),
                (2, _, _, Some(f)) => adjust_saturation(&mut rgb, f),
                _ => {}
            }
        }

        rgb
    }
}

fn jitter_factor<R: Rng + ?Sized>(rng: &mut R, delta: f32) -> Option<f32> {
    (delta > 0.0).then(|| rng.gen_range((1.0 - delta).max(0.0)..=1.0 + delta))
}

/// Convert an RGB image to a CHW buffer, scaled to [0, 1] and normalized per channel
pub fn to_normalized_chw(rgb: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Vec<f32> {
    let (width, height) = rgb.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }

    data
}

/// Rotate about the image center with bilinear sampling; uncovered corners are black
fn rotate(img: &RgbImage, angle_degrees: f32) -> RgbImage {
    if angle_degrees.abs() < 0.1 {
        return img.clone();
    }

    let (width, height) = img.dimensions();
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let src_x = cx + dx * cos_a + dy * sin_a;
        let src_y = cy - dx * sin_a + dy * cos_a;
        bilinear_sample(img, src_x, src_y)
    })
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();

    if x < 0.0 || y < 0.0 || x >= width as f32 - 1.0 || y >= height as f32 - 1.0 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn luminance(pixel: &Rgb<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

/// Blend each channel towards `anchor` by `factor` (`factor = 1` is identity)
fn blend(value: u8, anchor: f32, factor: f32) -> u8 {
    (anchor + factor * (value as f32 - anchor)).round().clamp(0.0, 255.0) as u8
}

fn adjust_brightness(img: &mut RgbImage, factor: f32) {
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            pixel[c] = blend(pixel[c], 0.0, factor);
        }
    }
}

fn adjust_contrast(img: &mut RgbImage, factor: f32) {
    let count = (img.width() * img.height()).max(1) as f32;
    let mean = img.pixels().map(luminance).sum::<f32>() / count;
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            pixel[c] = blend(pixel[c], mean, factor);
        }
    }
}

fn adjust_saturation(img: &mut RgbImage, factor: f32) {
    for pixel in img.pixels_mut() {
        let gray = luminance(pixel);
        for c in 0..3 {
            pixel[c] = blend(pixel[c], gray, factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn test_evaluation_is_bit_identical() {
        let transform = Transform::evaluation(32);
        let img = gradient(50, 40);

        let a = transform.apply(&img);
        let b = transform.apply(&img);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3 * 32 * 32);
    }

    #[test]
    fn test_evaluation_ignores_rng() {
        let transform = Transform::evaluation(16);
        let img = gradient(20, 20);
        let mut r1 = ChaCha8Rng::seed_from_u64(1);
        let mut r2 = ChaCha8Rng::seed_from_u64(2);
        assert_eq!(
            transform.apply_with_rng(&img, &mut r1),
            transform.apply_with_rng(&img, &mut r2)
        );
    }

    #[test]
    fn test_training_output_has_fixed_size() {
        let transform = Transform::training(24);
        for (w, h) in [(10, 10), (64, 30), (24, 24)] {
            let out = transform.apply(&gradient(w, h));
            assert_eq!(out.len(), transform.output_len());
        }
    }

    #[test]
    fn test_training_is_seed_reproducible() {
        let transform = Transform::training(16);
        let img = gradient(30, 30);
        let a = transform.apply_with_rng(&img, &mut ChaCha8Rng::seed_from_u64(7));
        let b = transform.apply_with_rng(&img, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalization_of_uniform_image() {
        let img = RgbImage::from_pixel(4, 4, Rgb([255, 0, 128]));
        let data = to_normalized_chw(&img, &IMAGENET_MEAN, &IMAGENET_STD);

        let expected_r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let expected_g = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((data[0] - expected_r).abs() < 1e-5);
        assert!((data[16] - expected_g).abs() < 1e-5);
    }

    #[test]
    fn test_gray_image_unchanged_by_saturation() {
        let mut img = RgbImage::from_pixel(3, 3, Rgb([100, 100, 100]));
        adjust_saturation(&mut img, 1.1);
        assert!(img.pixels().all(|p| p.0 == [100, 100, 100]));
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let img = gradient(8, 8).to_rgb8();
        assert_eq!(rotate(&img, 0.0), img);
    }

    #[test]
    fn test_jitter_factor_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            let f = jitter_factor(&mut rng, 0.1).unwrap();
            assert!((0.9..=1.1).contains(&f));
        }
        assert_eq!(jitter_factor(&mut rng, 0.0), None);
    }
}
