//! Recognition cascade: barcode, then local OCR, then remote vision.
//!
//! Per image the state machine is
//! `Start -> Barcode -> LocalOcr -> RemoteVision -> Resolved | Unresolved`.
//! Every candidate goes through [`validate_key`] the moment it is produced and
//! the first valid one ends the run. Stage errors never escape: they are
//! reported to the [`CascadeObserver`] and the cascade moves on.

use std::sync::Arc;

use image::DynamicImage;

use super::barcode::BarcodeDecoder;
use super::key_validator::{validate_key, KeyRejection};
use super::ocr::LocalTextRecognizer;
use super::preprocess::ImagePreprocessor;
use super::types::{AttemptResult, RecognitionOutcome};
use super::vision_client::build_vision_client;
use super::vision_ocr::RemoteVisionRecognizer;
use super::ExtractionError;
use crate::config::RecognitionConfig;
use crate::models::{AccessKey, CascadeStage, ProcessedNote, RecognitionMethod};

/// Mime type of the payload produced by [`ImagePreprocessor::prepare_for_vision`].
const VISION_MIME: &str = "image/jpeg";

// ═══════════════════════════════════════════════════════════
// Observability hook
// ═══════════════════════════════════════════════════════════

/// Receives cascade events. All methods default to no-ops.
pub trait CascadeObserver: Send + Sync {
    fn stage_started(&self, _stage: CascadeStage) {}

    /// The stage is not configured for this cascade.
    fn stage_skipped(&self, _stage: CascadeStage) {}

    fn candidate_rejected(&self, _stage: CascadeStage, _candidate: &str, _why: &KeyRejection) {}

    fn stage_failed(&self, _stage: CascadeStage, _error: &ExtractionError) {}

    fn resolved(&self, _key: &AccessKey, _method: RecognitionMethod) {}

    fn unresolved(&self) {}
}

/// Default observer: structured `tracing` events.
pub struct TracingObserver;

impl CascadeObserver for TracingObserver {
    fn stage_started(&self, stage: CascadeStage) {
        tracing::debug!(stage = stage.as_str(), "Cascade stage started");
    }

    fn stage_skipped(&self, stage: CascadeStage) {
        tracing::debug!(stage = stage.as_str(), "Cascade stage not configured, skipping");
    }

    fn candidate_rejected(&self, stage: CascadeStage, candidate: &str, why: &KeyRejection) {
        match why {
            KeyRejection::ChecksumMismatch { expected, actual } => tracing::info!(
                stage = stage.as_str(),
                expected,
                actual,
                "Candidate failed checksum"
            ),
            _ => tracing::debug!(
                stage = stage.as_str(),
                reason = why.reason(),
                length = candidate.len(),
                "Candidate rejected"
            ),
        }
    }

    fn stage_failed(&self, stage: CascadeStage, error: &ExtractionError) {
        tracing::warn!(stage = stage.as_str(), error = %error, "Cascade stage failed");
    }

    fn resolved(&self, key: &AccessKey, method: RecognitionMethod) {
        tracing::info!(
            method = method.as_str(),
            document_number = key.document_number(),
            "Access key resolved"
        );
    }

    fn unresolved(&self) {
        tracing::warn!("No stage produced a valid access key, flagging for manual review");
    }
}

// ═══════════════════════════════════════════════════════════
// RecognitionCascade
// ═══════════════════════════════════════════════════════════

/// Runs the configured stages for one image at a time.
///
/// Shared across worker threads behind an `Arc`; holds no per-image state.
pub struct RecognitionCascade {
    preprocessor: ImagePreprocessor,
    barcode: Option<BarcodeDecoder>,
    local_ocr: Option<LocalTextRecognizer>,
    remote_vision: Option<RemoteVisionRecognizer>,
    observer: Box<dyn CascadeObserver>,
}

impl RecognitionCascade {
    /// A cascade with no stages. Add them with the `with_*` builders.
    pub fn new(preprocessor: ImagePreprocessor) -> Self {
        Self {
            preprocessor,
            barcode: None,
            local_ocr: None,
            remote_vision: None,
            observer: Box::new(TracingObserver),
        }
    }

    pub fn with_barcode(mut self, decoder: BarcodeDecoder) -> Self {
        self.barcode = Some(decoder);
        self
    }

    pub fn with_local_ocr(mut self, recognizer: LocalTextRecognizer) -> Self {
        self.local_ocr = Some(recognizer);
        self
    }

    pub fn with_remote_vision(mut self, recognizer: RemoteVisionRecognizer) -> Self {
        self.remote_vision = Some(recognizer);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn CascadeObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Production cascade from startup configuration.
    ///
    /// Barcode is always on. Local OCR needs a tessdata directory and the `ocr`
    /// feature; when either is missing the stage is left out with a warning.
    /// Remote vision follows `config.vision`.
    pub fn from_config(config: &RecognitionConfig) -> Result<Self, ExtractionError> {
        let preprocessor = ImagePreprocessor::new(config.max_barcode_width, config.binarization);
        let mut cascade = Self::new(preprocessor).with_barcode(BarcodeDecoder::default());

        if let Some(dir) = &config.tessdata_dir {
            match build_local_ocr(dir) {
                Ok(recognizer) => cascade = cascade.with_local_ocr(recognizer),
                Err(e) => tracing::warn!(error = %e, "Local OCR unavailable"),
            }
        }

        if let Some(vision) = &config.vision {
            if let Some(client) = build_vision_client(vision)? {
                tracing::info!(
                    provider = vision.provider.as_str(),
                    model = %vision.model,
                    "Remote vision enabled"
                );
                cascade = cascade.with_remote_vision(RemoteVisionRecognizer::new(client));
            }
        }

        Ok(cascade)
    }

    /// Which stages this cascade will attempt, in order.
    pub fn stages(&self) -> Vec<CascadeStage> {
        CascadeStage::ORDER
            .into_iter()
            .filter(|stage| self.stage_enabled(*stage))
            .collect()
    }

    /// Run the cascade over one encoded image.
    pub fn recognize(&self, bytes: &[u8]) -> RecognitionOutcome {
        let decoded = match self.preprocessor.decode(bytes) {
            Ok(img) => Some(img),
            Err(e) => {
                // Local stages need pixels; the remote model may still cope.
                for stage in [CascadeStage::Barcode, CascadeStage::LocalOcr] {
                    if self.stage_enabled(stage) {
                        self.observer.stage_failed(stage, &e);
                    }
                }
                None
            }
        };

        let attempt = match &decoded {
            Some(img) => self
                .try_barcode(img)
                .or_else(|| self.try_local_ocr(img)),
            None => AttemptResult::Failure,
        }
        .or_else(|| self.try_remote_vision(decoded.as_ref(), bytes));

        match &attempt {
            AttemptResult::Success(key, method) => self.observer.resolved(key, *method),
            AttemptResult::Failure => self.observer.unresolved(),
        }
        attempt.into_outcome()
    }

    /// Recognize and wrap the result as a note that owns the image.
    pub fn process(&self, image: Arc<[u8]>) -> ProcessedNote {
        match self.recognize(&image) {
            RecognitionOutcome::Resolved { key, method } => {
                ProcessedNote::resolved(image, key, method)
            }
            RecognitionOutcome::Unresolved => ProcessedNote::manual(image),
        }
    }

    fn stage_enabled(&self, stage: CascadeStage) -> bool {
        match stage {
            CascadeStage::Barcode => self.barcode.is_some(),
            CascadeStage::LocalOcr => self.local_ocr.is_some(),
            CascadeStage::RemoteVision => self.remote_vision.is_some(),
        }
    }

    fn accept(&self, stage: CascadeStage, candidate: &str) -> AttemptResult {
        match validate_key(candidate) {
            Ok(key) => AttemptResult::Success(key, stage.method()),
            Err(why) => {
                self.observer.candidate_rejected(stage, candidate, &why);
                AttemptResult::Failure
            }
        }
    }

    /// Variants in order; the first payload that validates wins.
    fn try_barcode(&self, img: &DynamicImage) -> AttemptResult {
        let Some(decoder) = &self.barcode else {
            self.observer.stage_skipped(CascadeStage::Barcode);
            return AttemptResult::Failure;
        };
        self.observer.stage_started(CascadeStage::Barcode);

        for variant in self.preprocessor.barcode_variants(img) {
            for payload in decoder.decode_variant(&variant) {
                let attempt = self.accept(CascadeStage::Barcode, payload.trim());
                if matches!(attempt, AttemptResult::Success(..)) {
                    return attempt;
                }
            }
        }
        AttemptResult::Failure
    }

    fn try_local_ocr(&self, img: &DynamicImage) -> AttemptResult {
        let Some(recognizer) = &self.local_ocr else {
            self.observer.stage_skipped(CascadeStage::LocalOcr);
            return AttemptResult::Failure;
        };
        self.observer.stage_started(CascadeStage::LocalOcr);

        let binary = self.preprocessor.binarize_for_text(img);
        match recognizer.recognize(&binary) {
            Ok(Some(candidate)) => self.accept(CascadeStage::LocalOcr, &candidate),
            Ok(None) => AttemptResult::Failure,
            Err(e) => {
                self.observer.stage_failed(CascadeStage::LocalOcr, &e);
                AttemptResult::Failure
            }
        }
    }

    fn try_remote_vision(&self, img: Option<&DynamicImage>, raw: &[u8]) -> AttemptResult {
        let Some(recognizer) = &self.remote_vision else {
            self.observer.stage_skipped(CascadeStage::RemoteVision);
            return AttemptResult::Failure;
        };
        self.observer.stage_started(CascadeStage::RemoteVision);

        let prepared = img.and_then(|img| match self.preprocessor.prepare_for_vision(img) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                tracing::warn!(error = %e, "Vision re-encode failed, sending original bytes");
                None
            }
        });
        let (payload, mime) = match &prepared {
            Some(jpeg) => (jpeg.as_slice(), VISION_MIME),
            None => (raw, raw_mime_type(raw)),
        };

        match recognizer.recognize(payload, mime) {
            Ok(Some(candidate)) => self.accept(CascadeStage::RemoteVision, &candidate),
            Ok(None) => AttemptResult::Failure,
            Err(e) => {
                self.observer.stage_failed(CascadeStage::RemoteVision, &e);
                AttemptResult::Failure
            }
        }
    }
}

fn build_local_ocr(tessdata_dir: &std::path::Path) -> Result<LocalTextRecognizer, ExtractionError> {
    #[cfg(feature = "ocr")]
    {
        LocalTextRecognizer::tesseract(tessdata_dir)
    }
    #[cfg(not(feature = "ocr"))]
    {
        Err(ExtractionError::OcrInit(format!(
            "built without the `ocr` feature, ignoring tessdata at {}",
            tessdata_dir.display()
        )))
    }
}

fn raw_mime_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::pipeline::extraction::barcode::MockBarcodeReader;
    use crate::pipeline::extraction::ocr::MockOcrEngine;
    use crate::pipeline::extraction::vision_client::MockVisionClient;

    const KEY: &str = "35250106998765000150550019876543211000000019";
    const BAD_CHECKSUM: &str = "35250106998765000150550019876543211000000011";

    /// Noisy PNG so small test images clear the minimum byte size.
    fn make_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503)) >> 13;
            Rgb([v as u8, (v >> 8) as u8, 200])
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl CascadeObserver for Arc<RecordingObserver> {
        fn stage_started(&self, stage: CascadeStage) {
            self.push(format!("start:{stage}"));
        }
        fn stage_skipped(&self, stage: CascadeStage) {
            self.push(format!("skip:{stage}"));
        }
        fn candidate_rejected(&self, stage: CascadeStage, _candidate: &str, why: &KeyRejection) {
            self.push(format!("reject:{stage}:{}", why.reason()));
        }
        fn stage_failed(&self, stage: CascadeStage, _error: &ExtractionError) {
            self.push(format!("fail:{stage}"));
        }
        fn resolved(&self, _key: &AccessKey, method: RecognitionMethod) {
            self.push(format!("resolved:{method}"));
        }
        fn unresolved(&self) {
            self.push("unresolved".into());
        }
    }

    struct Harness {
        barcode: Arc<MockBarcodeReader>,
        ocr: Arc<MockOcrEngine>,
        vision: Arc<MockVisionClient>,
        observer: Arc<RecordingObserver>,
        cascade: RecognitionCascade,
    }

    fn harness(barcode: MockBarcodeReader, ocr: MockOcrEngine, vision: MockVisionClient) -> Harness {
        let barcode = Arc::new(barcode);
        let ocr = Arc::new(ocr);
        let vision = Arc::new(vision);
        let observer = Arc::new(RecordingObserver::default());
        let cascade = RecognitionCascade::new(ImagePreprocessor::default())
            .with_barcode(BarcodeDecoder::new(Box::new(Arc::clone(&barcode))))
            .with_local_ocr(LocalTextRecognizer::new(Box::new(Arc::clone(&ocr))))
            .with_remote_vision(RemoteVisionRecognizer::new(vision.clone()))
            .with_observer(Box::new(Arc::clone(&observer)));
        Harness {
            barcode,
            ocr,
            vision,
            observer,
            cascade,
        }
    }

    fn events(h: &Harness) -> Vec<String> {
        h.observer.events.lock().unwrap().clone()
    }

    // ── stage ordering ──

    #[test]
    fn barcode_hit_skips_later_stages() {
        let h = harness(
            MockBarcodeReader::new(&[KEY]),
            MockOcrEngine::new(KEY, 0.9),
            MockVisionClient::new(KEY),
        );
        let outcome = h.cascade.recognize(&make_png(50, 50));

        assert_eq!(outcome.method(), RecognitionMethod::Barcode);
        assert_eq!(outcome.key().unwrap().as_str(), KEY);
        assert_eq!(h.barcode.calls(), 1, "first variant already validated");
        assert_eq!(h.ocr.calls(), 0);
        assert_eq!(h.vision.calls(), 0);
    }

    #[test]
    fn invalid_barcode_falls_through_to_ocr() {
        let h = harness(
            MockBarcodeReader::new(&[BAD_CHECKSUM, "not a key"]),
            MockOcrEngine::new(&format!("chave {KEY}"), 0.8),
            MockVisionClient::new(KEY),
        );
        let outcome = h.cascade.recognize(&make_png(50, 50));

        assert_eq!(outcome.method(), RecognitionMethod::LocalOcr);
        // Small image: original + grayscale variants.
        assert_eq!(h.barcode.calls(), 2);
        assert_eq!(h.ocr.calls(), 1);
        assert_eq!(h.vision.calls(), 0);
        assert!(events(&h).contains(&"reject:barcode:checksum mismatch".to_string()));
        assert!(events(&h).contains(&"reject:barcode:malformed".to_string()));
    }

    #[test]
    fn vision_resolves_when_local_stages_fail() {
        let h = harness(
            MockBarcodeReader::empty(),
            MockOcrEngine::new("no digits here", 0.1),
            MockVisionClient::new("Key: 3525 0106 9987 6500 0150 5500 1987 6543 2110 0000 0019"),
        );
        let outcome = h.cascade.recognize(&make_png(50, 50));

        assert_eq!(outcome.method(), RecognitionMethod::RemoteVision);
        assert_eq!(h.vision.calls(), 1);
        assert_eq!(
            events(&h),
            vec![
                "start:barcode",
                "start:local_ocr",
                "start:remote_vision",
                "resolved:RemoteVision"
            ]
        );
    }

    #[test]
    fn everything_failing_is_unresolved() {
        let h = harness(
            MockBarcodeReader::failing(),
            MockOcrEngine::new(BAD_CHECKSUM, 0.9),
            MockVisionClient::new(BAD_CHECKSUM),
        );
        let outcome = h.cascade.recognize(&make_png(50, 50));

        assert_eq!(outcome, RecognitionOutcome::Unresolved);
        assert_eq!(outcome.method(), RecognitionMethod::Manual);
        let events = events(&h);
        assert!(events.contains(&"reject:local_ocr:checksum mismatch".to_string()));
        assert!(events.contains(&"reject:remote_vision:checksum mismatch".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("unresolved"));
    }

    #[test]
    fn vision_error_is_recovered() {
        let h = harness(
            MockBarcodeReader::empty(),
            MockOcrEngine::new("", 0.0),
            MockVisionClient::timing_out(),
        );
        let outcome = h.cascade.recognize(&make_png(50, 50));
        assert_eq!(outcome, RecognitionOutcome::Unresolved);
        assert!(events(&h).contains(&"fail:remote_vision".to_string()));
    }

    #[test]
    fn undecodable_bytes_go_straight_to_vision() {
        let h = harness(
            MockBarcodeReader::new(&[KEY]),
            MockOcrEngine::new(KEY, 0.9),
            MockVisionClient::new(KEY),
        );
        let outcome = h.cascade.recognize(&[0u8; 500]);

        assert_eq!(outcome.method(), RecognitionMethod::RemoteVision);
        assert_eq!(h.barcode.calls(), 0);
        assert_eq!(h.ocr.calls(), 0);
        let events = events(&h);
        assert_eq!(&events[..2], ["fail:barcode", "fail:local_ocr"]);
    }

    #[test]
    fn missing_stages_are_skipped() {
        let observer = Arc::new(RecordingObserver::default());
        let barcode = Arc::new(MockBarcodeReader::empty());
        let cascade = RecognitionCascade::new(ImagePreprocessor::default())
            .with_barcode(BarcodeDecoder::new(Box::new(Arc::clone(&barcode))))
            .with_observer(Box::new(Arc::clone(&observer)));

        assert_eq!(cascade.stages(), vec![CascadeStage::Barcode]);
        assert_eq!(cascade.recognize(&make_png(20, 20)), RecognitionOutcome::Unresolved);
        assert_eq!(
            *observer.events.lock().unwrap(),
            vec![
                "start:barcode",
                "skip:local_ocr",
                "skip:remote_vision",
                "unresolved"
            ]
        );
    }

    // ── process ──

    #[test]
    fn process_builds_resolved_note() {
        let h = harness(
            MockBarcodeReader::new(&[KEY]),
            MockOcrEngine::new("", 0.0),
            MockVisionClient::new(""),
        );
        let image: Arc<[u8]> = make_png(30, 30).into();
        let note = h.cascade.process(Arc::clone(&image));
        assert!(note.is_resolved());
        assert_eq!(note.document_number(), "987654321");
        assert_eq!(note.image(), &image[..]);
    }

    #[test]
    fn process_builds_manual_note() {
        let h = harness(
            MockBarcodeReader::empty(),
            MockOcrEngine::new("", 0.0),
            MockVisionClient::new("nothing"),
        );
        let note = h.cascade.process(make_png(30, 30).into());
        assert!(!note.is_resolved());
        assert_eq!(note.document_number(), "MANUAL");
        assert_eq!(note.method(), RecognitionMethod::Manual);
    }

    #[test]
    fn from_config_without_vision_or_tessdata() {
        let cascade = RecognitionCascade::from_config(&RecognitionConfig::default()).unwrap();
        assert_eq!(cascade.stages(), vec![CascadeStage::Barcode]);
    }

    #[test]
    fn raw_mime_falls_back_to_octet_stream() {
        assert_eq!(raw_mime_type(&make_png(2, 2)), "image/png");
        assert_eq!(raw_mime_type(&[1, 2, 3]), "application/octet-stream");
    }
}
