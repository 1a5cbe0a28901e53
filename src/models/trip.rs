use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::note::ProcessedNote;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TripError {
    #[error("Missing required trip field: {0}")]
    MissingField(&'static str),

    #[error("Trip batch has no notes to deliver")]
    EmptyBatch,
}

/// Trip metadata entered by whoever is handing in the invoices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TripInfo {
    /// Person submitting the batch.
    pub sender: String,
    pub driver: String,
    /// Sales order ("PV") the trip belongs to.
    pub order_ref: String,
    pub origin: Option<String>,
    pub destination: Option<String>,
    /// Free-text remarks (damaged goods, missing stub, ...).
    pub remarks: Option<String>,
}

impl TripInfo {
    /// Sender, driver and order reference are mandatory.
    pub fn validate(&self) -> Result<(), TripError> {
        if self.sender.trim().is_empty() {
            return Err(TripError::MissingField("sender"));
        }
        if self.driver.trim().is_empty() {
            return Err(TripError::MissingField("driver"));
        }
        if self.order_ref.trim().is_empty() {
            return Err(TripError::MissingField("order_ref"));
        }
        Ok(())
    }

    /// "origin -> destination", blanks rendered as empty.
    pub fn route(&self) -> String {
        format!(
            "{} -> {}",
            self.origin.as_deref().unwrap_or(""),
            self.destination.as_deref().unwrap_or("")
        )
    }
}

/// Ordered notes of one trip plus its metadata, consumed by delivery.
#[derive(Debug, Clone, Serialize)]
pub struct TripBatch {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub trip: TripInfo,
    notes: Vec<ProcessedNote>,
}

impl TripBatch {
    pub fn new(trip: TripInfo) -> Result<Self, TripError> {
        trip.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            trip,
            notes: Vec::new(),
        })
    }

    pub fn push(&mut self, note: ProcessedNote) {
        self.notes.push(note);
    }

    pub fn extend(&mut self, notes: impl IntoIterator<Item = ProcessedNote>) {
        self.notes.extend(notes);
    }

    pub fn notes(&self) -> &[ProcessedNote] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn resolved_count(&self) -> usize {
        self.notes.iter().filter(|n| n.is_resolved()).count()
    }

    /// A batch can only be delivered once it holds at least one note.
    pub fn ensure_ready(&self) -> Result<(), TripError> {
        if self.notes.is_empty() {
            return Err(TripError::EmptyBatch);
        }
        Ok(())
    }
}
