//! Random affine augmentation for class balancing
//!
//! Each synthetic image is produced by one randomly parameterized transform:
//! rotation, horizontal/vertical shift, shear and per-axis zoom about the
//! image centre, followed by an optional horizontal flip. Pixels that map
//! outside the source are filled with the nearest edge pixel.
//!
//! The transform is applied as an inverse mapping: for every output pixel
//! the source coordinate is computed and sampled bilinearly.

use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SeedlingError};

/// Ranges the random transform parameters are drawn from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation angle in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Maximum horizontal shift as a fraction of the width
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of the height
    pub height_shift: f32,
    /// Maximum shear coefficient (applies ±shear)
    pub shear: f32,
    /// Zoom factors are drawn per axis from [1 - zoom, 1 + zoom]
    pub zoom: f32,
    /// Probability of mirroring the result horizontally
    pub horizontal_flip_prob: f32,
    /// Brightness jitter range (±brightness_delta); 0 disables it
    pub brightness_delta: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 40.0,
            width_shift: 0.2,
            height_shift: 0.2,
            shear: 0.2,
            zoom: 0.2,
            horizontal_flip_prob: 0.5,
            brightness_delta: 0.0,
        }
    }
}

impl AugmentationConfig {
    /// Identity transform; every output equals its input
    pub fn none() -> Self {
        Self {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            shear: 0.0,
            zoom: 0.0,
            horizontal_flip_prob: 0.0,
            brightness_delta: 0.0,
        }
    }

    /// Reject ranges that cannot be sampled
    ///
    /// Every range must be finite and non-negative, `zoom` below 1 so both
    /// zoom factors stay positive, and `horizontal_flip_prob` within [0, 1].
    pub fn validate(&self) -> Result<()> {
        let ranges = [
            ("rotation_degrees", self.rotation_degrees),
            ("width_shift", self.width_shift),
            ("height_shift", self.height_shift),
            ("shear", self.shear),
            ("zoom", self.zoom),
            ("brightness_delta", self.brightness_delta),
        ];
        for (name, value) in ranges {
            if !value.is_finite() || value < 0.0 {
                return Err(SeedlingError::Config(format!(
                    "augmentation {} must be a finite non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.zoom >= 1.0 {
            return Err(SeedlingError::Config(format!(
                "augmentation zoom must be below 1, got {}",
                self.zoom
            )));
        }
        if !(0.0..=1.0).contains(&self.horizontal_flip_prob) {
            return Err(SeedlingError::Config(format!(
                "augmentation horizontal_flip_prob must lie in [0, 1], got {}",
                self.horizontal_flip_prob
            )));
        }
        Ok(())
    }
}

/// One concrete draw of transform parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineParams {
    pub angle_degrees: f32,
    /// Shift in pixels
    pub shift_x: f32,
    pub shift_y: f32,
    pub shear: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
    pub brightness: f32,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            angle_degrees: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            shear: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip: false,
            brightness: 0.0,
        }
    }

    /// Map an output coordinate (relative to the centre) to its source
    /// coordinate (relative to the centre)
    fn source_offset(&self, u: f32, v: f32) -> (f32, f32) {
        // zoom, then shear, then rotate, then shift
        let (u, v) = (u * self.zoom_x, v * self.zoom_y);
        let u = u + self.shear * v;
        let (sin_a, cos_a) = self.angle_degrees.to_radians().sin_cos();
        let (u, v) = (cos_a * u - sin_a * v, sin_a * u + cos_a * v);
        (u + self.shift_x, v + self.shift_y)
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw transform parameters for an image of the given dimensions
    pub fn sample_params(&self, width: u32, height: u32, rng: &mut ChaCha8Rng) -> AffineParams {
        let c = &self.config;
        let angle_degrees = rng.gen_range(-c.rotation_degrees..=c.rotation_degrees);
        let shift_x = rng.gen_range(-c.width_shift..=c.width_shift) * width as f32;
        let shift_y = rng.gen_range(-c.height_shift..=c.height_shift) * height as f32;
        let shear = rng.gen_range(-c.shear..=c.shear);
        let zoom_x = rng.gen_range(1.0 - c.zoom..=1.0 + c.zoom);
        let zoom_y = rng.gen_range(1.0 - c.zoom..=1.0 + c.zoom);
        let flip = rng.gen::<f32>() < c.horizontal_flip_prob;
        let brightness = if c.brightness_delta > 0.0 {
            rng.gen_range(-c.brightness_delta..=c.brightness_delta)
        } else {
            0.0
        };

        AffineParams {
            angle_degrees,
            shift_x,
            shift_y,
            shear,
            zoom_x,
            zoom_y,
            flip,
            brightness,
        }
    }

    /// Produce one randomly transformed copy of `img`
    pub fn augment(&self, img: &DynamicImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let rgb = img.to_rgb8();
        let params = self.sample_params(rgb.width(), rgb.height(), rng);
        Self::apply(&rgb, &params)
    }

    /// Apply a concrete transform; output has the input's dimensions
    pub fn apply(img: &RgbImage, params: &AffineParams) -> RgbImage {
        let (width, height) = img.dimensions();
        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;

        let mut output = RgbImage::from_fn(width, height, |x, y| {
            let (su, sv) = params.source_offset(x as f32 - cx, y as f32 - cy);
            bilinear_sample(img, su + cx, sv + cy)
        });

        if params.flip {
            image::imageops::flip_horizontal_in_place(&mut output);
        }

        if params.brightness != 0.0 {
            adjust_brightness(&mut output, params.brightness);
        }

        output
    }
}

/// Sample a pixel using bilinear interpolation, clamping to the nearest edge
fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

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

    let mut result = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        result[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}

/// Shift every channel by `delta * 255`
fn adjust_brightness(img: &mut RgbImage, delta: f32) {
    let offset = delta * 255.0;
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] as f32 + offset).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
        })
    }

    #[test]
    fn test_identity_transform() {
        let img = gradient_image(20, 12);
        let out = Augmenter::apply(&img, &AffineParams::identity());
        assert_eq!(out, img);
    }

    #[test]
    fn test_flip_only() {
        let img = gradient_image(10, 10);
        let params = AffineParams {
            flip: true,
            ..AffineParams::identity()
        };

        let out = Augmenter::apply(&img, &params);

        assert_eq!(out.get_pixel(0, 3), img.get_pixel(9, 3));
        assert_eq!(out.get_pixel(9, 7), img.get_pixel(0, 7));
    }

    #[test]
    fn test_shift_fills_with_edge() {
        let img = gradient_image(10, 10);
        let params = AffineParams {
            shift_x: 100.0,
            ..AffineParams::identity()
        };

        let out = Augmenter::apply(&img, &params);

        // Every source x clamps to the right edge
        for y in 0..10 {
            assert_eq!(out.get_pixel(0, y), img.get_pixel(9, y));
        }
    }

    #[test]
    fn test_augment_keeps_dimensions() {
        let img = DynamicImage::ImageRgb8(gradient_image(33, 21));
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for _ in 0..5 {
            let out = augmenter.augment(&img, &mut rng);
            assert_eq!(out.dimensions(), (33, 21));
        }
    }

    #[test]
    fn test_sampled_params_within_ranges() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..200 {
            let p = augmenter.sample_params(100, 50, &mut rng);
            assert!(p.angle_degrees.abs() <= 40.0);
            assert!(p.shift_x.abs() <= 20.0 + 1e-3);
            assert!(p.shift_y.abs() <= 10.0 + 1e-3);
            assert!(p.shear.abs() <= 0.2);
            assert!((0.8..=1.2).contains(&p.zoom_x));
            assert!((0.8..=1.2).contains(&p.zoom_y));
            assert_eq!(p.brightness, 0.0);
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(AugmentationConfig::default().validate().is_ok());
        assert!(AugmentationConfig::none().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unsampleable_ranges() {
        let invalid = [
            AugmentationConfig {
                rotation_degrees: -10.0,
                ..AugmentationConfig::default()
            },
            AugmentationConfig {
                shear: f32::NAN,
                ..AugmentationConfig::default()
            },
            AugmentationConfig {
                width_shift: f32::INFINITY,
                ..AugmentationConfig::default()
            },
            AugmentationConfig {
                zoom: 1.5,
                ..AugmentationConfig::default()
            },
            AugmentationConfig {
                horizontal_flip_prob: 1.2,
                ..AugmentationConfig::default()
            },
            AugmentationConfig {
                brightness_delta: -0.1,
                ..AugmentationConfig::default()
            },
        ];
        for config in invalid {
            assert!(
                matches!(config.validate(), Err(SeedlingError::Config(_))),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_none_config_is_identity() {
        let img = gradient_image(16, 16);
        let augmenter = Augmenter::new(AugmentationConfig::none());
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let out = augmenter.augment(&DynamicImage::ImageRgb8(img.clone()), &mut rng);
        assert_eq!(out, img);
    }

    #[test]
    fn test_brightness_adjustment() {
        let mut img = RgbImage::from_pixel(4, 4, Rgb([100, 250, 0]));
        adjust_brightness(&mut img, 0.1);
        assert_eq!(img.get_pixel(0, 0), &Rgb([126, 255, 26]));
    }
}
