//! Image preprocessing for the vision model.
//!
//! Normalizes an arbitrary uploaded image into the fixed-size f32 tensor the
//! classifier expects: EXIF orientation fix, aspect-preserving bilinear
//! resize, center crop, RGB conversion and optional BGR channel reversal.
//! No pixel-value scaling happens here; the model handles scale internally.

use std::io::Cursor;

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Unreadable image data: {0}")]
    Decode(#[from] image::ImageError),
}

/// A single geometric transform, applied in sequence to undo an EXIF
/// orientation. `Transpose` mirrors across the main diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    FlipHorizontal,
    FlipVertical,
    Transpose,
}

/// Ordered transform list for each of the 8 standard EXIF orientation codes.
/// Code 1 is upright; anything outside 1..=8 is treated as untagged.
const ORIENTATION_TABLE: [(u32, &[Transform]); 8] = [
    (1, &[]),
    (2, &[Transform::FlipHorizontal]),
    (3, &[Transform::FlipVertical, Transform::FlipHorizontal]),
    (4, &[Transform::FlipVertical]),
    (5, &[Transform::Transpose]),
    (6, &[Transform::Transpose, Transform::FlipHorizontal]),
    (
        7,
        &[
            Transform::Transpose,
            Transform::FlipVertical,
            Transform::FlipHorizontal,
        ],
    ),
    (8, &[Transform::Transpose, Transform::FlipVertical]),
];

/// Looks up the transform sequence that restores upright framing for an EXIF
/// orientation code.
pub fn orientation_transforms(orientation: u32) -> &'static [Transform] {
    ORIENTATION_TABLE
        .iter()
        .find(|(code, _)| *code == orientation)
        .map(|(_, ops)| *ops)
        .unwrap_or(&[])
}

/// Applies an ordered transform list to an image.
pub fn apply_transforms(image: DynamicImage, ops: &[Transform]) -> DynamicImage {
    ops.iter().fold(image, |img, op| match op {
        Transform::FlipHorizontal => img.fliph(),
        Transform::FlipVertical => img.flipv(),
        Transform::Transpose => img.flipv().rotate90(),
    })
}

/// Reads the EXIF orientation tag (0x0112) from the original encoded bytes.
/// Returns `None` for images without EXIF metadata.
fn read_orientation(raw_bytes: &[u8]) -> Option<u32> {
    let mut cursor = Cursor::new(raw_bytes);
    let reader = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

/// Preprocessor producing `(size, size, 3)` f32 tensors in the model's
/// channel order.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    input_size: u32,
    is_bgr: bool,
}

impl ImagePreprocessor {
    pub fn new(input_size: u32, is_bgr: bool) -> Self {
        Self { input_size, is_bgr }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Decodes raw bytes and runs the full pipeline. The encoded bytes are
    /// also the EXIF source; the decoded image alone has lost the tag.
    pub fn preprocess_bytes(&self, raw_bytes: &[u8]) -> Result<Array3<f32>, PreprocessError> {
        let image = image::load_from_memory(raw_bytes)?;
        let image = match read_orientation(raw_bytes) {
            Some(orientation) => apply_transforms(image, orientation_transforms(orientation)),
            None => image,
        };
        Ok(self.preprocess(image))
    }

    /// Runs resize, crop and tensor extraction on an already-upright image.
    pub fn preprocess(&self, image: DynamicImage) -> Array3<f32> {
        let resized = self.resize_keep_aspect_ratio(&image);
        let cropped = self.crop_center(&resized);
        self.to_tensor(&cropped)
    }

    /// Scales so the shorter dimension equals the input size, preserving
    /// aspect ratio; the longer dimension is rounded to the nearest pixel.
    /// Upsampling small images is allowed.
    fn resize_keep_aspect_ratio(&self, image: &DynamicImage) -> DynamicImage {
        let (width, height) = (image.width(), image.height());
        let size = self.input_size;
        let (new_width, new_height) = if width < height {
            let new_height = (size as f64 * height as f64 / width as f64).round() as u32;
            (size, new_height)
        } else {
            let new_width = (size as f64 * width as f64 / height as f64).round() as u32;
            (new_width, size)
        };
        image.resize_exact(new_width, new_height, FilterType::Triangle)
    }

    /// Crops the centered square. Offsets use integer floor division, so an
    /// odd size difference biases the crop one pixel toward the top-left,
    /// matching the reference service behavior.
    fn crop_center(&self, image: &DynamicImage) -> DynamicImage {
        let size = self.input_size;
        let left = (image.width() - size) / 2;
        let top = (image.height() - size) / 2;
        image.crop_imm(left, top, size, size)
    }

    /// Converts to RGB and copies pixels into an HWC f32 array, reversing
    /// the channel axis when the model expects BGR.
    fn to_tensor(&self, image: &DynamicImage) -> Array3<f32> {
        let rgb = image.to_rgb8();
        let size = self.input_size as usize;
        let mut tensor = Array3::<f32>::zeros((size, size, 3));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (c_r, c_b) = if self.is_bgr { (2, 0) } else { (0, 2) };
            tensor[[y as usize, x as usize, c_r]] = r as f32;
            tensor[[y as usize, x as usize, 1]] = g as f32;
            tensor[[y as usize, x as usize, c_b]] = b as f32;
        }
        tensor
    }
}
