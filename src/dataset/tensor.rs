//! Image file to normalized tensor conversion

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};

use crate::utils::error::{Result, SeedlingError};

/// Square RGB image as a row-major HWC buffer with values in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    size: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn from_rgb(img: &RgbImage) -> Self {
        let size = img.width() as usize;
        let data = img
            .as_raw()
            .iter()
            .map(|&v| v as f32 / 255.0)
            .collect();
        Self { size, data }
    }

    /// `[height, width, channels]`
    pub fn shape(&self) -> [usize; 3] {
        [self.size, self.size, 3]
    }

    pub fn get(&self, y: usize, x: usize, c: usize) -> f32 {
        self.data[(y * self.size + x) * 3 + c]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Planar CHW layout expected by the network
    pub fn to_chw(&self) -> Vec<f32> {
        let plane = self.size * self.size;
        let mut chw = vec![0.0f32; 3 * plane];
        for (i, pixel) in self.data.chunks_exact(3).enumerate() {
            chw[i] = pixel[0];
            chw[plane + i] = pixel[1];
            chw[2 * plane + i] = pixel[2];
        }
        chw
    }
}

/// Decodes images and resizes them to a fixed square resolution
#[derive(Debug, Clone, Copy)]
pub struct TensorConverter {
    size: u32,
}

impl TensorConverter {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Open and decode an image file
    pub fn decode(path: &Path) -> Result<DynamicImage> {
        ImageReader::open(path)
            .map_err(|e| SeedlingError::UnreadableImage(path.to_path_buf(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| SeedlingError::UnreadableImage(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| SeedlingError::UnreadableImage(path.to_path_buf(), e.to_string()))
    }

    /// Resize with a bilinear filter and drop any alpha channel
    pub fn resize(&self, img: &DynamicImage) -> RgbImage {
        img.resize_exact(self.size, self.size, FilterType::Triangle)
            .to_rgb8()
    }

    pub fn convert_image(&self, img: &DynamicImage) -> ImageTensor {
        ImageTensor::from_rgb(&self.resize(img))
    }

    /// Decode `path` into a `(size, size, 3)` tensor scaled to [0, 1]
    pub fn convert(&self, path: &Path) -> Result<ImageTensor> {
        let img = Self::decode(path)?;
        Ok(self.convert_image(&img))
    }
}
