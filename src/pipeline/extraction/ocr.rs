use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

use image::GrayImage;
use regex::Regex;

use super::key_validator::strip_non_digits;
use super::preprocess::encode_png_gray;
use super::types::{OcrEngine, OcrPageResult};
use super::ExtractionError;
use crate::models::access_key::ACCESS_KEY_LEN;

/// Characters the engine may emit.
pub const DIGIT_WHITELIST: &str = "0123456789";

/// Tesseract page segmentation mode 6 (one uniform block of text). The
/// binarized crop is the whole invoice, not a single line, and the key is
/// printed in spaced groups that PSM 7 tends to split.
pub const PAGE_SEG_MODE: &str = "6";

/// Traineddata file the engine loads. Digits are script-neutral.
#[cfg(feature = "ocr")]
const OCR_LANG: &str = "eng";

/// Leftmost run of exactly 44 digits in already-stripped text.
static KEY_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("[0-9]{{{ACCESS_KEY_LEN}}}")).unwrap());

/// Bundled Tesseract OCR engine, configured for digits only.
/// Only available when compiled with the `ocr` feature flag.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: std::path::PathBuf,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    /// Initialize with a tessdata directory containing `eng.traineddata`.
    pub fn new(tessdata_dir: &std::path::Path) -> Result<Self, ExtractionError> {
        if !tessdata_dir.join(format!("{OCR_LANG}.traineddata")).exists() {
            return Err(ExtractionError::TessdataNotFound(tessdata_dir.to_path_buf()));
        }
        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
        })
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| ExtractionError::OcrInit("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata_str), Some(OCR_LANG))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?
            .set_variable("tessedit_char_whitelist", DIGIT_WHITELIST)
            .map_err(|e| ExtractionError::OcrConfig(format!("Failed to set whitelist: {e:?}")))?
            .set_variable("tessedit_pageseg_mode", PAGE_SEG_MODE)
            .map_err(|e| ExtractionError::OcrConfig(format!("Failed to set PSM: {e:?}")))?;

        let mut tess = tess
            .set_image_from_mem(image_bytes)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        let text = tess
            .get_text()
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;
        let confidence = tess.mean_text_conf().max(0) as f32 / 100.0;

        Ok(OcrPageResult { text, confidence })
    }
}

/// Local OCR stage: binarized image in, at most one 44-digit candidate out.
///
/// The output is untrusted. Concatenated unrelated numbers form plausible
/// runs, so callers must validate before use.
pub struct LocalTextRecognizer {
    engine: Box<dyn OcrEngine>,
}

impl LocalTextRecognizer {
    pub fn new(engine: Box<dyn OcrEngine>) -> Self {
        Self { engine }
    }

    /// Recognizer backed by Tesseract, when the crate was built with `ocr`.
    #[cfg(feature = "ocr")]
    pub fn tesseract(tessdata_dir: &std::path::Path) -> Result<Self, ExtractionError> {
        Ok(Self::new(Box::new(BundledTesseract::new(tessdata_dir)?)))
    }

    pub fn recognize(&self, binary: &GrayImage) -> Result<Option<String>, ExtractionError> {
        let _span = tracing::info_span!(
            "local_ocr",
            width = binary.width(),
            height = binary.height()
        )
        .entered();
        let start = std::time::Instant::now();

        let png = encode_png_gray(binary)?;
        let page = self.engine.ocr_image(&png)?;
        let candidate = find_key_candidate(&page.text);

        tracing::debug!(
            confidence = page.confidence,
            chars = page.text.len(),
            found = candidate.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Local OCR pass complete"
        );
        Ok(candidate)
    }
}

/// Strip non-digits, then take the leftmost run of 44 digits.
pub fn find_key_candidate(raw: &str) -> Option<String> {
    let digits = strip_non_digits(raw);
    KEY_RUN.find(&digits).map(|m| m.as_str().to_string())
}

/// Mock OCR engine for unit testing without Tesseract.
pub struct MockOcrEngine {
    pub text: String,
    pub confidence: f32,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for MockOcrEngine {
    fn ocr_image(&self, _image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OcrPageResult {
            text: self.text.clone(),
            confidence: self.confidence,
        })
    }
}

impl<T: OcrEngine + ?Sized> OcrEngine for std::sync::Arc<T> {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        (**self).ocr_image(image_bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const KEY: &str = "35250106998765000150550019876543211000000019";

    // ── find_key_candidate ──

    #[test]
    fn finds_key_through_separators() {
        let raw = "3525 0106 9987 6500 0150 5500 1987 6543 2110 0000 0019";
        assert_eq!(find_key_candidate(raw).as_deref(), Some(KEY));
    }

    #[test]
    fn takes_leftmost_run_of_longer_digit_string() {
        let raw = format!("{KEY}777");
        assert_eq!(find_key_candidate(&raw).as_deref(), Some(KEY));
    }

    #[test]
    fn short_runs_yield_nothing() {
        assert_eq!(find_key_candidate("CNPJ 06.998.765/0001-50"), None);
        assert_eq!(find_key_candidate(""), None);
    }

    // ── LocalTextRecognizer ──

    #[test]
    fn recognizer_returns_candidate_from_engine() {
        let engine = Arc::new(MockOcrEngine::new(&format!("CHAVE: {KEY}"), 0.9));
        let recognizer = LocalTextRecognizer::new(Box::new(Arc::clone(&engine)));
        let out = recognizer.recognize(&GrayImage::new(20, 10)).unwrap();
        assert_eq!(out.as_deref(), Some(KEY));
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn recognizer_without_run_returns_none() {
        let recognizer = LocalTextRecognizer::new(Box::new(MockOcrEngine::new("12 34", 0.5)));
        assert_eq!(recognizer.recognize(&GrayImage::new(20, 10)).unwrap(), None);
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn bundled_tesseract_rejects_missing_tessdata() {
        let result = BundledTesseract::new(std::path::Path::new("/nonexistent/tessdata"));
        assert!(matches!(result, Err(ExtractionError::TessdataNotFound(_))));
    }
}
