//! Image preprocessing services for the recognition cascade.
//!
//! Every transform here is deterministic: the same bytes always produce the
//! same variants, so a cascade run can be replayed exactly.
//!
//! Two consumers with different needs:
//! - **Barcode stage** tries several variants in a fixed order:
//!   original -> downscaled (only if wider than the cap) -> grayscale.
//! - **Local OCR stage** gets exactly one binarized image, produced by the
//!   configured [`BinarizationRecipe`]. Recipes are never mixed in one attempt.
//!
//! Key rules:
//! - DO fix EXIF orientation first (phone photos are often stored sideways)
//! - DO preserve aspect ratio when capping width
//! - DO NOT upscale small images

use std::borrow::Cow;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, Luma};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ExtractionError;
use crate::config::MAX_BARCODE_WIDTH;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Adaptive threshold neighbourhood (pixels per side, odd).
pub const ADAPTIVE_BLOCK_SIZE: u32 = 11;

/// Subtracted from the local mean before comparing.
pub const ADAPTIVE_OFFSET: i32 = 2;

/// Sigma equivalent to a 5x5 Gaussian kernel with automatic sigma.
const TEXT_BLUR_SIGMA: f32 = 1.1;

/// JPEG quality for images leaving the process (remote vision, attachments).
pub const JPEG_QUALITY: u8 = 85;

// ═══════════════════════════════════════════════════════════
// Configuration types
// ═══════════════════════════════════════════════════════════

/// How the image is binarized before local OCR. Pick one and use it for
/// every image of a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BinarizationRecipe {
    /// Gaussian blur, then local-mean adaptive threshold (block 11, C = 2).
    /// Robust to uneven lighting across a phone photo.
    #[default]
    AdaptiveMean,
    /// Global Otsu threshold, then a 2x2 erosion that thickens dark strokes.
    /// For printers that render digits as sparse dot matrices.
    OtsuErode,
}

/// Which barcode-stage variant an image is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Original,
    Downscaled,
    Grayscale,
}

impl VariantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Downscaled => "downscaled",
            Self::Grayscale => "grayscale",
        }
    }
}

/// One candidate input for barcode decoding.
#[derive(Debug)]
pub struct ImageVariant<'a> {
    pub kind: VariantKind,
    pub image: Cow<'a, DynamicImage>,
}

// ═══════════════════════════════════════════════════════════
// Service traits
// ═══════════════════════════════════════════════════════════

/// Fixes image orientation from EXIF metadata.
///
/// Phone photos embed rotation in EXIF tag 0x0112. Without correction a
/// portrait photo reaches the decoders sideways, which defeats both the
/// 1D barcode scan lines and Tesseract's line finder.
pub trait OrientationCorrector: Send + Sync {
    /// Correct image orientation based on EXIF metadata.
    ///
    /// `raw_bytes`: Original file bytes (needed for EXIF reading).
    /// `image`: Decoded image (rotation applied here).
    /// Returns the corrected image. No-op if no EXIF or orientation=1.
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage;
}

// ═══════════════════════════════════════════════════════════
// ImagePreprocessor
// ═══════════════════════════════════════════════════════════

/// Produces the decoded image and its variants for each cascade stage.
pub struct ImagePreprocessor {
    orientation: Box<dyn OrientationCorrector>,
    max_width: u32,
    recipe: BinarizationRecipe,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(MAX_BARCODE_WIDTH, BinarizationRecipe::default())
    }
}

impl ImagePreprocessor {
    pub fn new(max_width: u32, recipe: BinarizationRecipe) -> Self {
        Self {
            orientation: Box::new(ExifOrientationCorrector),
            max_width: max_width.max(1),
            recipe,
        }
    }

    /// Validate, decode and orient raw upload bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, ExtractionError> {
        validate_image_bytes(bytes)?;
        let img = image::load_from_memory(bytes).map_err(|e| {
            ExtractionError::ImageProcessing(format!("Failed to decode image: {e}"))
        })?;
        Ok(self.orientation.correct(bytes, img))
    }

    /// Barcode variants in the order they must be tried:
    /// original, downscaled (only when wider than the cap), grayscale.
    ///
    /// The grayscale variant is derived from the downscaled image when one
    /// exists, so large photos are only converted once at reduced size.
    pub fn barcode_variants<'a>(&self, image: &'a DynamicImage) -> Vec<ImageVariant<'a>> {
        let mut variants = Vec::with_capacity(3);
        variants.push(ImageVariant {
            kind: VariantKind::Original,
            image: Cow::Borrowed(image),
        });

        let downscaled = downscale_to_width(image, self.max_width);
        let gray = match &downscaled {
            Cow::Owned(small) => {
                let gray = small.grayscale();
                variants.push(ImageVariant {
                    kind: VariantKind::Downscaled,
                    image: Cow::Owned(small.clone()),
                });
                gray
            }
            Cow::Borrowed(original) => original.grayscale(),
        };

        variants.push(ImageVariant {
            kind: VariantKind::Grayscale,
            image: Cow::Owned(gray),
        });
        variants
    }

    /// Binarize for OCR with the configured recipe. Dark text ends up 0,
    /// background 255.
    pub fn binarize_for_text(&self, image: &DynamicImage) -> GrayImage {
        let working = downscale_to_width(image, self.max_width);
        let gray = working.to_luma8();
        let binary = match self.recipe {
            BinarizationRecipe::AdaptiveMean => {
                let blurred = imageproc::filter::gaussian_blur_f32(&gray, TEXT_BLUR_SIGMA);
                adaptive_mean_threshold(&blurred, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET)
            }
            BinarizationRecipe::OtsuErode => erode_2x2(&otsu_binarize(&gray)),
        };

        debug!(
            recipe = ?self.recipe,
            size = format!("{}x{}", binary.width(), binary.height()),
            "Image binarized for OCR"
        );
        binary
    }

    /// Width-capped JPEG for the remote vision model.
    pub fn prepare_for_vision(&self, image: &DynamicImage) -> Result<Vec<u8>, ExtractionError> {
        let working = downscale_to_width(image, self.max_width);
        encode_jpeg(&working, JPEG_QUALITY)
    }
}

// ═══════════════════════════════════════════════════════════
// Production implementations
// ═══════════════════════════════════════════════════════════

// ── ExifOrientationCorrector ──────────────────────────────

/// EXIF-based orientation correction for phone photos.
///
/// Reads EXIF tag 0x0112 (Orientation) from raw bytes via `kamadak-exif`.
///
/// EXIF orientation values:
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub struct ExifOrientationCorrector;

impl OrientationCorrector for ExifOrientationCorrector {
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage {
        let orientation = read_exif_orientation(raw_bytes);
        apply_orientation(image, orientation)
    }
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => img,
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

// ═══════════════════════════════════════════════════════════
// Pure helper functions (reusable)
// ═══════════════════════════════════════════════════════════

/// Size guard applied before any decoder sees the bytes.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), ExtractionError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(ExtractionError::InvalidImage(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ExtractionError::InvalidImage(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Height after scaling `width x height` proportionally to `target_width`.
pub fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 {
        return height.max(1);
    }
    let scaled = (f64::from(height) * f64::from(target_width) / f64::from(width)).round();
    (scaled as u32).max(1)
}

/// Cap the width at `max_width`, preserving aspect ratio.
/// Uses `Cow` to avoid cloning when no downscale is needed.
pub fn downscale_to_width(img: &DynamicImage, max_width: u32) -> Cow<'_, DynamicImage> {
    let (w, h) = img.dimensions();
    if w <= max_width {
        return Cow::Borrowed(img);
    }

    let new_h = scaled_height(w, h, max_width);
    debug!(
        from = format!("{w}x{h}"),
        to = format!("{max_width}x{new_h}"),
        "Downscaling wide image"
    );
    // CatmullRom: cubic, no ringing around high-contrast strokes.
    Cow::Owned(img.resize_exact(max_width, new_h, FilterType::CatmullRom))
}

/// Local-mean adaptive threshold.
///
/// A pixel becomes white (255) when it is brighter than the mean of its
/// `block_size x block_size` neighbourhood minus `offset`, black otherwise.
/// At the borders the window is clipped to the image.
pub fn adaptive_mean_threshold(gray: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let radius = block_size / 2;

    // Integral image with a zero row/column in front.
    let stride = (w + 1) as usize;
    let mut integral = vec![0u64; stride * (h + 1) as usize];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += u64::from(gray.get_pixel(x, y).0[0]);
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            integral[idx] = integral[idx - stride] + row_sum;
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let x0 = x.saturating_sub(radius) as usize;
        let y0 = y.saturating_sub(radius) as usize;
        let x1 = (x + radius + 1).min(w) as usize;
        let y1 = (y + radius + 1).min(h) as usize;

        let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
            - integral[y0 * stride + x1]
            - integral[y1 * stride + x0];
        let count = ((x1 - x0) * (y1 - y0)) as u64;
        let mean = ((sum + count / 2) / count) as i32;

        let value = i32::from(gray.get_pixel(x, y).0[0]);
        if value > mean - offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Global Otsu threshold: pixels above the level become white.
pub fn otsu_binarize(gray: &GrayImage) -> GrayImage {
    let level = imageproc::contrast::otsu_level(gray);
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > level { 255 } else { 0 };
    }
    out
}

/// Erode with a 2x2 structuring element anchored at its bottom-right cell.
///
/// Takes the minimum over `(x-1..=x, y-1..=y)`, so dark strokes grow by one
/// pixel right and down. Joins dot-matrix digits into solid strokes.
pub fn erode_2x2(binary: &GrayImage) -> GrayImage {
    let (w, h) = binary.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let mut min = binary.get_pixel(x, y).0[0];
        if x > 0 {
            min = min.min(binary.get_pixel(x - 1, y).0[0]);
        }
        if y > 0 {
            min = min.min(binary.get_pixel(x, y - 1).0[0]);
            if x > 0 {
                min = min.min(binary.get_pixel(x - 1, y - 1).0[0]);
            }
        }
        Luma([min])
    })
}

/// Encode a grayscale image as PNG bytes (OCR engine input).
pub fn encode_png_gray(img: &GrayImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

/// Encode any image as RGB JPEG at the given quality.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ExtractionError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode_image(&img.to_rgb8())
        .map_err(|e| ExtractionError::ImageProcessing(format!("JPEG encoding failed: {e}")))?;
    Ok(buf)
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
