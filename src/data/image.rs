// ============================================================
// Layer 4 — Image Preprocessing
// ============================================================
// Turns an image file into the normalised NCHW input DaViT expects:
//
//   file ─► decode ─► resize to S x S ─► RGB ─► (p/255 - mean) / std
//
// Resizing keeps the aspect ratio and center-crops by default;
// `Stretch` resizes to the exact square instead.

use anyhow::{Context, Result};
use burn::{prelude::*, tensor::Distribution};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use std::path::Path;

/// ImageNet normalisation
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD:  [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
    /// Resize to exact size (may distort aspect ratio)
    Stretch,
    /// Cover the square, then crop the overflow evenly from both sides
    #[default]
    CenterCrop,
}

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    size: u32,
    mode: ResizeMode,
}

impl ImagePreprocessor {
    pub fn new(size: usize) -> Self {
        Self { size: size as u32, mode: ResizeMode::default() }
    }

    pub fn with_mode(mut self, mode: ResizeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Decode and preprocess an image file into CHW floats.
    pub fn load(&self, path: &Path) -> Result<Vec<f32>> {
        let img = image::open(path)
            .with_context(|| format!("Cannot open image '{}'", path.display()))?;
        tracing::debug!("Loaded '{}' ({}x{})", path.display(), img.width(), img.height());
        Ok(self.preprocess(&img))
    }

    /// Resize, convert to RGB and normalise. Output layout is
    /// channel-major: all R values, then G, then B.
    pub fn preprocess(&self, img: &DynamicImage) -> Vec<f32> {
        let rgb = self.resize(img).to_rgb8();
        let size = self.size as usize;
        let mut out = vec![0.0f32; 3 * size * size];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let offset = y as usize * size + x as usize;
            for c in 0..3 {
                out[c * size * size + offset] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
            }
        }
        out
    }

    fn resize(&self, img: &DynamicImage) -> DynamicImage {
        let target = self.size;
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return DynamicImage::ImageRgb8(RgbImage::from_pixel(target, target, Rgb([128, 128, 128])));
        }

        match self.mode {
            ResizeMode::Stretch => img.resize_exact(target, target, FilterType::Lanczos3),
            ResizeMode::CenterCrop => {
                let scale = (target as f32 / w as f32).max(target as f32 / h as f32);
                let new_w = ((w as f32 * scale).round() as u32).max(target);
                let new_h = ((h as f32 * scale).round() as u32).max(target);
                let resized = img.resize_exact(new_w, new_h, FilterType::Lanczos3);
                resized.crop_imm((new_w - target) / 2, (new_h - target) / 2, target, target)
            }
        }
    }

    /// Load a single image as a [1, 3, S, S] tensor.
    pub fn load_tensor<B: Backend>(&self, path: &Path, device: &B::Device) -> Result<Tensor<B, 4>> {
        let pixels = self.load(path)?;
        Ok(stack_images(&[pixels], self.size(), device))
    }
}

/// Stack preprocessed CHW images into [N, 3, S, S].
pub fn stack_images<B: Backend>(images: &[Vec<f32>], size: usize, device: &B::Device) -> Tensor<B, 4> {
    let flat: Vec<f32> = images.iter().flatten().copied().collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([images.len(), 3, size, size])
}

/// Uniform [0, 1) noise image, standing in for a real picture in demos.
pub fn random_image<B: Backend>(batch: usize, size: usize, device: &B::Device) -> Tensor<B, 4> {
    Tensor::random([batch, 3, size, size], Distribution::Uniform(0.0, 1.0), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_normalisation_of_flat_colour() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 128])));
        let out = ImagePreprocessor::new(4).preprocess(&img);
        assert_eq!(out.len(), 3 * 16);
        assert!((out[0] - (1.0 - MEAN[0]) / STD[0]).abs() < 1e-5);
        assert!((out[16] - (0.0 - MEAN[1]) / STD[1]).abs() < 1e-5);
        assert!((out[32] - (128.0 / 255.0 - MEAN[2]) / STD[2]).abs() < 1e-5);
    }

    #[test]
    fn test_center_crop_keeps_middle() {
        // 30x10: left third black, middle white, right third black
        let mut img = RgbImage::from_pixel(30, 10, Rgb([0, 0, 0]));
        for x in 10..20 {
            for y in 0..10 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let img = DynamicImage::ImageRgb8(img);

        let cropped = ImagePreprocessor::new(10).preprocess(&img);
        let stretched = ImagePreprocessor::new(10).with_mode(ResizeMode::Stretch).preprocess(&img);

        let white = (1.0 - MEAN[0]) / STD[0];
        // Corner pixel is white after the crop, dark after the stretch
        assert!((cropped[0] - white).abs() < 0.1);
        assert!(stretched[0] < 0.0);
    }

    #[test]
    fn test_load_tensor_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        RgbImage::from_pixel(7, 5, Rgb([255, 0, 0])).save(&path).unwrap();

        let device = Default::default();
        let t = ImagePreprocessor::new(8).load_tensor::<NdArray>(&path, &device).unwrap();
        assert_eq!(t.dims(), [1, 3, 8, 8]);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImagePreprocessor::new(8).load(&dir.path().join("nope.png")).is_err());
    }

    #[test]
    fn test_random_image_range() {
        let device = Default::default();
        let t = random_image::<NdArray>(2, 6, &device);
        assert_eq!(t.dims(), [2, 3, 6, 6]);
        assert!(t.clone().min().into_scalar().elem::<f32>() >= 0.0);
        assert!(t.max().into_scalar().elem::<f32>() < 1.0);
    }
}
