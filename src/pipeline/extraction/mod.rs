pub mod types;
pub mod key_validator;
pub mod preprocess;
pub mod barcode;
pub mod ocr;
pub mod vision_client;
pub mod vision_ocr;
pub mod orchestrator;

pub use types::*;
pub use key_validator::*;
pub use preprocess::*;
pub use barcode::*;
pub use ocr::*;
pub use vision_client::*;
pub use vision_ocr::*;
pub use orchestrator::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid image input: {0}")]
    InvalidImage(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Barcode decoding failed: {0}")]
    Barcode(String),

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("Tesseract OCR configuration error: {0}")]
    OcrConfig(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Tessdata not found at: {0}")]
    TessdataNotFound(PathBuf),

    #[error("Remote vision failed: {0}")]
    Vision(#[from] VisionError),
}
