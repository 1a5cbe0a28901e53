use std::sync::atomic::{AtomicUsize, Ordering};

use image::DynamicImage;
use rxing::Exceptions;

use super::preprocess::ImageVariant;
use super::types::BarcodeReader;
use super::ExtractionError;

/// Production reader backed by `rxing` (pure-Rust ZXing port).
///
/// Tries every supported 1D/2D symbology; the printed invoice carries a
/// CODE-128C barcode, but QR codes on newer layouts also hold the key.
pub struct RxingBarcodeReader;

impl BarcodeReader for RxingBarcodeReader {
    fn read(&self, image: &DynamicImage) -> Result<Vec<String>, ExtractionError> {
        let luma = image.to_luma8();
        let (width, height) = luma.dimensions();
        match rxing::helpers::detect_multiple_in_luma(luma.into_raw(), width, height) {
            Ok(results) => Ok(results.iter().map(|r| r.getText().to_string()).collect()),
            Err(Exceptions::NotFoundException(_)) => Ok(Vec::new()),
            Err(e) => Err(ExtractionError::Barcode(format!("{e:?}"))),
        }
    }
}

/// Runs a [`BarcodeReader`] over image variants.
///
/// No validation happens here. A variant the reader fails on contributes
/// nothing, same as a variant without a barcode.
pub struct BarcodeDecoder {
    reader: Box<dyn BarcodeReader>,
}

impl Default for BarcodeDecoder {
    fn default() -> Self {
        Self::new(Box::new(RxingBarcodeReader))
    }
}

impl BarcodeDecoder {
    pub fn new(reader: Box<dyn BarcodeReader>) -> Self {
        Self { reader }
    }

    /// Payloads of one variant. Reader errors are logged and swallowed.
    pub fn decode_variant(&self, variant: &ImageVariant<'_>) -> Vec<String> {
        match self.reader.read(&variant.image) {
            Ok(payloads) => {
                tracing::debug!(
                    variant = variant.kind.as_str(),
                    found = payloads.len(),
                    "Barcode scan"
                );
                payloads
            }
            Err(e) => {
                tracing::warn!(
                    variant = variant.kind.as_str(),
                    error = %e,
                    "Barcode reader failed on variant"
                );
                Vec::new()
            }
        }
    }

    /// All payloads across `variants`, in variant order.
    pub fn decode(&self, variants: &[ImageVariant<'_>]) -> Vec<String> {
        variants
            .iter()
            .flat_map(|v| self.decode_variant(v))
            .collect()
    }
}

/// Mock barcode reader for unit testing.
///
/// Returns the same payloads for every image and counts calls.
pub struct MockBarcodeReader {
    payloads: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockBarcodeReader {
    pub fn new(payloads: &[&str]) -> Self {
        Self {
            payloads: payloads.iter().map(|p| p.to_string()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// A reader that finds nothing.
    pub fn empty() -> Self {
        Self::new(&[])
    }

    /// A reader whose every call errors.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::empty()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BarcodeReader for MockBarcodeReader {
    fn read(&self, _image: &DynamicImage) -> Result<Vec<String>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ExtractionError::Barcode("mock reader failure".into()));
        }
        Ok(self.payloads.clone())
    }
}

impl<T: BarcodeReader + ?Sized> BarcodeReader for std::sync::Arc<T> {
    fn read(&self, image: &DynamicImage) -> Result<Vec<String>, ExtractionError> {
        (**self).read(image)
    }
}
