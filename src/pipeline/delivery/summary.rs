//! Human-readable rendering of a trip batch.

use crate::models::{ProcessedNote, TripBatch, TripInfo};

pub const RESOLVED_ICON: &str = "✅";
pub const MANUAL_ICON: &str = "⚠️";

/// One line per note: `"{icon} [{method}] NF:{document_number} - KEY: {key}"`.
pub fn summary_line(note: &ProcessedNote) -> String {
    let icon = if note.is_resolved() {
        RESOLVED_ICON
    } else {
        MANUAL_ICON
    };
    format!(
        "{icon} [{}] NF:{} - KEY: {}",
        note.method(),
        note.document_number(),
        note.key_display()
    )
}

/// All note lines in batch order, newline-terminated.
pub fn summary_text(notes: &[ProcessedNote]) -> String {
    notes
        .iter()
        .map(|note| format!("{}\n", summary_line(note)))
        .collect()
}

pub fn subject(trip: &TripInfo) -> String {
    format!("PV {} - {}", trip.order_ref.trim(), trip.driver.trim())
}

pub fn body(batch: &TripBatch) -> String {
    let trip = &batch.trip;
    let remarks = trip
        .remarks
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("No notes.");

    format!(
        "NOTE DELIVERY - LOGISTICS\n\
         =========================\n\
         SENT BY: {sender}\n\
         \n\
         TRIP DATA:\n\
         ----------\n\
         Driver: {driver}\n\
         PV: {order_ref}\n\
         Route: {route}\n\
         \n\
         NOTES:\n\
         {remarks}\n\
         \n\
         SUMMARY:\n\
         --------\n\
         Note count: {count}\n\
         Resolved: {resolved}\n\
         \n\
         READINGS:\n\
         {lines}",
        sender = trip.sender.trim(),
        driver = trip.driver.trim(),
        order_ref = trip.order_ref.trim(),
        route = trip.route(),
        count = batch.len(),
        resolved = batch.resolved_count(),
        lines = summary_text(batch.notes()),
    )
}

/// Attachment file name for the note at `index` (zero-based).
pub fn attachment_name(note: &ProcessedNote, index: usize) -> String {
    if note.is_resolved() {
        format!("NF_{}.jpg", note.document_number())
    } else {
        format!("MANUAL_PHOTO_{}.jpg", index + 1)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::{AccessKey, RecognitionMethod};

    const KEY: &str = "35250106998765000150550019876543211000000019";

    fn resolved() -> ProcessedNote {
        let key: AccessKey = KEY.parse().unwrap();
        ProcessedNote::resolved(Arc::from(&b"img"[..]), key, RecognitionMethod::Barcode)
    }

    fn manual() -> ProcessedNote {
        ProcessedNote::manual(Arc::from(&b"img"[..]))
    }

    fn batch(remarks: Option<&str>) -> TripBatch {
        let mut batch = TripBatch::new(TripInfo {
            sender: "Dispatch desk".into(),
            driver: " Driver One ".into(),
            order_ref: "4471".into(),
            origin: Some("Campinas".into()),
            destination: Some("Santos".into()),
            remarks: remarks.map(String::from),
        })
        .unwrap();
        batch.extend([resolved(), manual()]);
        batch
    }

    #[test]
    fn resolved_line_format() {
        assert_eq!(
            summary_line(&resolved()),
            format!("✅ [Barcode] NF:987654321 - KEY: {KEY}")
        );
    }

    #[test]
    fn manual_line_format() {
        assert_eq!(
            summary_line(&manual()),
            "⚠️ [Manual] NF:MANUAL - KEY: UNRESOLVED"
        );
    }

    #[test]
    fn summary_text_keeps_order() {
        let text = summary_text(&[manual(), resolved()]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("⚠️"));
        assert!(lines[1].starts_with("✅"));
    }

    #[test]
    fn subject_uses_order_and_driver() {
        assert_eq!(subject(&batch(None).trip), "PV 4471 - Driver One");
    }

    #[test]
    fn body_lists_trip_and_readings() {
        let body = body(&batch(Some("Broken seal on box 3")));
        assert!(body.contains("SENT BY: Dispatch desk"));
        assert!(body.contains("Route: Campinas -> Santos"));
        assert!(body.contains("Broken seal on box 3"));
        assert!(body.contains("Note count: 2"));
        assert!(body.contains("Resolved: 1"));
        assert!(body.ends_with("KEY: UNRESOLVED\n"));
    }

    #[test]
    fn blank_remarks_render_placeholder() {
        assert!(body(&batch(None)).contains("NOTES:\nNo notes.\n"));
        assert!(body(&batch(Some("   "))).contains("No notes."));
    }

    #[test]
    fn attachment_names() {
        assert_eq!(attachment_name(&resolved(), 0), "NF_987654321.jpg");
        assert_eq!(attachment_name(&manual(), 1), "MANUAL_PHOTO_2.jpg");
    }
}
