//! Image → landmark embedding.
//!
//! Wraps a [`LandmarkDetector`]. Every failure is soft: callers get `None` (or an
//! empty list) and the cause is logged.

use crate::detector::LandmarkDetector;
use crate::types::{BoundingBox, DetectedFace, Embedding};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Extra pixels added around each detected face box before cropping.
const REGION_PADDING: u32 = 20;

/// Channel layout of a raw [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb8,
    Bgr8,
    Rgba8,
    Gray8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb8 | PixelLayout::Bgr8 => 3,
            PixelLayout::Rgba8 => 4,
            PixelLayout::Gray8 => 1,
        }
    }
}

/// Borrowed, tightly packed raw pixels.
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl<'a> PixelBuffer<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            data,
            width,
            height,
            layout,
        }
    }

    /// Convert to an owned image. `None` if the buffer length does not match
    /// `width * height * bytes_per_pixel`.
    pub fn to_image(&self) -> Option<DynamicImage> {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.layout.bytes_per_pixel())?;
        if self.data.len() != expected {
            tracing::warn!(
                expected,
                actual = self.data.len(),
                layout = ?self.layout,
                "pixel buffer size does not match dimensions"
            );
            return None;
        }

        let data = self.data.to_vec();
        let image = match self.layout {
            PixelLayout::Rgb8 => DynamicImage::ImageRgb8(RgbImage::from_raw(self.width, self.height, data)?),
            PixelLayout::Bgr8 => {
                let mut rgb = RgbImage::from_raw(self.width, self.height, data)?;
                for pixel in rgb.pixels_mut() {
                    pixel.0.swap(0, 2);
                }
                DynamicImage::ImageRgb8(rgb)
            }
            PixelLayout::Rgba8 => DynamicImage::ImageRgba8(RgbaImage::from_raw(self.width, self.height, data)?),
            PixelLayout::Gray8 => DynamicImage::ImageLuma8(GrayImage::from_raw(self.width, self.height, data)?),
        };
        Some(image)
    }
}

/// A padded face rectangle in integer pixel coordinates, clipped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence for this face.
    pub confidence: f32,
}

impl FaceRegion {
    fn from_bbox(bbox: &BoundingBox, image_width: u32, image_height: u32) -> Self {
        let x = (bbox.x.max(0.0) as u32).saturating_sub(REGION_PADDING);
        let y = (bbox.y.max(0.0) as u32).saturating_sub(REGION_PADDING);
        let x = x.min(image_width);
        let y = y.min(image_height);
        let width = (bbox.width.max(0.0) as u32 + 2 * REGION_PADDING).min(image_width - x);
        let height = (bbox.height.max(0.0) as u32 + 2 * REGION_PADDING).min(image_height - y);
        Self {
            x,
            y,
            width,
            height,
            confidence: bbox.confidence,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Turns images into standardized landmark embeddings.
pub struct EmbeddingExtractor<D> {
    detector: D,
}

impl<D: LandmarkDetector> EmbeddingExtractor<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Embedding of the first face the detector reports.
    pub fn extract(&mut self, image: &DynamicImage) -> Option<Embedding> {
        let rgb = image.to_rgb8();
        self.first_face(&rgb).map(|(embedding, _)| embedding)
    }

    /// Like [`extract`](Self::extract), also returning the first face's 2D
    /// landmark points in pixel coordinates of `image`.
    pub fn extract_with_landmarks(&mut self, image: &DynamicImage) -> Option<(Embedding, Vec<(i32, i32)>)> {
        let rgb = image.to_rgb8();
        let (w, h) = (rgb.width() as f32, rgb.height() as f32);
        let (embedding, landmarks) = self.first_face(&rgb)?;
        let points = landmarks
            .iter()
            .map(|p| ((p[0] * w) as i32, (p[1] * h) as i32))
            .collect();
        Some((embedding, points))
    }

    /// Decode an encoded image (JPEG, PNG, ...) and extract from it.
    pub fn extract_from_bytes(&mut self, bytes: &[u8]) -> Option<Embedding> {
        match image::load_from_memory(bytes) {
            Ok(image) => self.extract(&image),
            Err(e) => {
                tracing::error!(error = %e, len = bytes.len(), "failed to decode image bytes");
                None
            }
        }
    }

    pub fn extract_from_pixels(&mut self, pixels: &PixelBuffer<'_>) -> Option<Embedding> {
        let image = pixels.to_image()?;
        self.extract(&image)
    }

    /// All faces the detector sees, as padded regions ready for cropping.
    pub fn detect_faces(&mut self, image: &DynamicImage) -> Vec<FaceRegion> {
        let rgb = image.to_rgb8();
        let faces = match self.detector.detect(&rgb) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                return Vec::new();
            }
        };

        let regions: Vec<FaceRegion> = faces
            .iter()
            .map(|f| FaceRegion::from_bbox(&f.bbox, rgb.width(), rgb.height()))
            .filter(|r| !r.is_empty())
            .collect();
        tracing::debug!(count = regions.len(), "detected faces");
        regions
    }

    fn first_face(&mut self, rgb: &RgbImage) -> Option<(Embedding, Vec<[f32; 3]>)> {
        let faces = match self.detector.detect(rgb) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "landmark detection failed");
                return None;
            }
        };

        // Only the first face is used; multi-face callers crop regions first.
        let Some(DetectedFace {
            landmarks: Some(landmarks),
            ..
        }) = faces.into_iter().next()
        else {
            tracing::warn!("no face landmarks detected in image");
            return None;
        };

        let Some(embedding) = Embedding::from_landmarks(&landmarks) else {
            tracing::warn!(points = landmarks.len(), "unexpected landmark count");
            return None;
        };

        tracing::debug!("face embedding extracted");
        Some((embedding, landmarks))
    }
}
