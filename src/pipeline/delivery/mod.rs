//! Turns a finished trip batch into an outbound message and hands it to a
//! delivery channel.

pub mod outbox;
pub mod summary;

pub use outbox::*;
pub use summary::*;

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ProcessedNote, TripBatch, TripError};
use crate::pipeline::extraction::{encode_jpeg, JPEG_QUALITY};

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Batch not ready: {0}")]
    Trip(#[from] TripError),
}

/// One re-encoded photo.
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: &'static str,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Everything a channel needs to send one batch.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub batch_id: Uuid,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Where a delivered message ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub location: PathBuf,
    pub attachments: usize,
}

/// Outbound transport for composed messages.
pub trait DeliveryChannel: Send + Sync {
    fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Build the message for a batch. Fails only on an empty batch.
pub fn compose_message(batch: &TripBatch) -> Result<OutboundMessage, DeliveryError> {
    batch.ensure_ready()?;
    Ok(OutboundMessage {
        batch_id: batch.id,
        subject: subject(&batch.trip),
        body: body(batch),
        attachments: build_attachments(batch.notes()),
    })
}

/// Re-encode every note photo as JPEG. Photos that fail are skipped.
///
/// File names are unique within the batch: a repeated document number gets
/// the note's position appended (`NF_000004567_3.jpg`).
pub fn build_attachments(notes: &[ProcessedNote]) -> Vec<Attachment> {
    let mut taken = HashSet::new();
    notes
        .iter()
        .enumerate()
        .filter_map(|(index, note)| match encode_attachment(note.image()) {
            Ok(data) => Some(Attachment {
                file_name: unique_name(attachment_name(note, index), index, &mut taken),
                content_type: "image/jpeg",
                data,
            }),
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping attachment that could not be re-encoded");
                None
            }
        })
        .collect()
}

fn unique_name(name: String, index: usize, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let stem = name.strip_suffix(".jpg").unwrap_or(&name);
    let mut candidate = format!("{stem}_{}.jpg", index + 1);
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{stem}_{}_{n}.jpg", index + 1);
        n += 1;
    }
    tracing::debug!(original = %name, renamed = %candidate, "Attachment name repeated in batch");
    candidate
}

fn encode_attachment(image: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    let decoded = image::load_from_memory(image)
        .map_err(|e| DeliveryError::Encoding(format!("decode failed: {e}")))?;
    encode_jpeg(&decoded, JPEG_QUALITY).map_err(|e| DeliveryError::Encoding(e.to_string()))
}
