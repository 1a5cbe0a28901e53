//! Batch recognition: many images, bounded parallelism, upload order kept.
//!
//! Each image runs the full cascade on a blocking thread (decoders, Tesseract
//! and the blocking HTTP client all block). A semaphore caps how many run at
//! once. Results are awaited in submission order, so the returned notes line
//! up with the input whatever finishes first.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::extraction::RecognitionCascade;
use crate::models::ProcessedNote;

/// Recognize every image, at most `workers` at a time.
///
/// Never fails as a whole: an image whose task panics comes back as a manual
/// note so one bad photo cannot sink the batch.
pub async fn process_batch(
    cascade: Arc<RecognitionCascade>,
    images: Vec<Arc<[u8]>>,
    workers: usize,
) -> Vec<ProcessedNote> {
    let total = images.len();
    let start = std::time::Instant::now();

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut pending: Vec<(Arc<[u8]>, JoinHandle<ProcessedNote>)> = Vec::with_capacity(total);

    for (index, image) in images.into_iter().enumerate() {
        // Never closed, so acquiring cannot fail.
        let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
        let cascade = Arc::clone(&cascade);
        let task_image = Arc::clone(&image);
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _span = tracing::info_span!("note", index).entered();
            cascade.process(task_image)
        });
        pending.push((image, handle));
    }

    let mut notes = Vec::with_capacity(total);
    for (index, (image, handle)) in pending.into_iter().enumerate() {
        match handle.await {
            Ok(note) => notes.push(note),
            Err(e) => {
                tracing::error!(index, error = %e, "Recognition task failed, marking for manual review");
                notes.push(ProcessedNote::manual(image));
            }
        }
    }

    let resolved = notes.iter().filter(|n| n.is_resolved()).count();
    tracing::info!(
        total,
        resolved,
        manual = total - resolved,
        elapsed_ms = start.elapsed().as_millis() as u64,
        workers,
        "Batch recognition complete"
    );
    notes
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::models::RecognitionMethod;
    use crate::pipeline::extraction::{
        BarcodeDecoder, BarcodeReader, ExtractionError, ImagePreprocessor,
    };

    const KEY: &str = "35250106998765000150550019876543211000000019";

    /// Noisy PNG so even narrow images clear the minimum byte size.
    fn make_png(width: u32) -> Arc<[u8]> {
        let img = RgbImage::from_fn(width, 32, |x, y| {
            let v = (x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503)) >> 13;
            Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();
        cursor.into_inner().into()
    }

    /// Sleeps longer for narrower images; odd widths carry a barcode.
    struct SlowReader {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl BarcodeReader for SlowReader {
        fn read(&self, image: &DynamicImage) -> Result<Vec<String>, ExtractionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let width = image.width();
            std::thread::sleep(Duration::from_millis(u64::from(60 - width.min(50))));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if width % 2 == 1 {
                Ok(vec![KEY.to_string()])
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn cascade_with(reader: Arc<SlowReader>) -> Arc<RecognitionCascade> {
        Arc::new(
            RecognitionCascade::new(ImagePreprocessor::default())
                .with_barcode(BarcodeDecoder::new(Box::new(reader))),
        )
    }

    #[tokio::test]
    async fn results_keep_upload_order() {
        let reader = Arc::new(SlowReader {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let cascade = cascade_with(Arc::clone(&reader));
        let widths = [10u32, 41, 12, 43, 14, 45];
        let images: Vec<Arc<[u8]>> = widths.iter().map(|w| make_png(*w)).collect();

        let notes = process_batch(cascade, images.clone(), 3).await;

        assert_eq!(notes.len(), widths.len());
        for ((note, width), image) in notes.iter().zip(widths).zip(&images) {
            assert_eq!(note.image(), &image[..], "note for width {width} out of place");
            let expected = if width % 2 == 1 {
                RecognitionMethod::Barcode
            } else {
                RecognitionMethod::Manual
            };
            assert_eq!(note.method(), expected, "width {width}");
        }
        assert!(reader.peak.load(Ordering::SeqCst) <= 3, "worker cap exceeded");
    }

    #[tokio::test]
    async fn single_worker_still_completes() {
        let reader = Arc::new(SlowReader {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let notes = process_batch(cascade_with(Arc::clone(&reader)), vec![make_png(3), make_png(4)], 1).await;
        assert_eq!(notes.len(), 2);
        assert_eq!(reader.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let reader = Arc::new(SlowReader {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        assert!(process_batch(cascade_with(reader), Vec::new(), 4).await.is_empty());
    }

    struct PanickingReader;

    impl BarcodeReader for PanickingReader {
        fn read(&self, _image: &DynamicImage) -> Result<Vec<String>, ExtractionError> {
            panic!("decoder crashed");
        }
    }

    #[tokio::test]
    async fn panicking_task_becomes_manual_note() {
        let cascade = Arc::new(
            RecognitionCascade::new(ImagePreprocessor::default())
                .with_barcode(BarcodeDecoder::new(Box::new(PanickingReader))),
        );
        let image = make_png(5);
        let notes = process_batch(cascade, vec![Arc::clone(&image)], 2).await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].method(), RecognitionMethod::Manual);
        assert_eq!(notes[0].image(), &image[..]);
    }
}
