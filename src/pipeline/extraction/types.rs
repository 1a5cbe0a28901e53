use image::DynamicImage;

use super::ExtractionError;
use crate::models::{AccessKey, RecognitionMethod};

/// Result of one cascade stage for one image. Transient, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Success(AccessKey, RecognitionMethod),
    Failure,
}

impl AttemptResult {
    /// Run `next` only when this attempt failed.
    pub fn or_else(self, next: impl FnOnce() -> AttemptResult) -> AttemptResult {
        match self {
            Self::Success(..) => self,
            Self::Failure => next(),
        }
    }

    pub fn into_outcome(self) -> RecognitionOutcome {
        match self {
            Self::Success(key, method) => RecognitionOutcome::Resolved { key, method },
            Self::Failure => RecognitionOutcome::Unresolved,
        }
    }
}

/// Final state of the cascade for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Resolved {
        key: AccessKey,
        method: RecognitionMethod,
    },
    /// No stage produced a candidate that validated. Needs human review.
    Unresolved,
}

impl RecognitionOutcome {
    pub fn key(&self) -> Option<&AccessKey> {
        match self {
            Self::Resolved { key, .. } => Some(key),
            Self::Unresolved => None,
        }
    }

    pub fn method(&self) -> RecognitionMethod {
        match self {
            Self::Resolved { method, .. } => *method,
            Self::Unresolved => RecognitionMethod::Manual,
        }
    }
}

/// Raw OCR result from the engine
#[derive(Debug)]
pub struct OcrPageResult {
    pub text: String,
    pub confidence: f32,
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine: Send + Sync {
    /// Recognize text in an encoded (PNG) image.
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError>;
}

/// Barcode detection abstraction over one raster image.
pub trait BarcodeReader: Send + Sync {
    /// Every payload found in the image, as text. An image without a
    /// readable barcode yields an empty vector, not an error.
    fn read(&self, image: &DynamicImage) -> Result<Vec<String>, ExtractionError>;
}
