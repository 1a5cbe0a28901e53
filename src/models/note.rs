use std::sync::Arc;

use serde::Serialize;

use super::access_key::AccessKey;
use super::enums::RecognitionMethod;

/// Document number shown for notes that need human review.
pub const MANUAL_DOCUMENT_NUMBER: &str = "MANUAL";

/// Key text shown for notes no recognizer could resolve.
pub const UNRESOLVED_KEY: &str = "UNRESOLVED";

/// Outcome of classifying one photographed document.
///
/// Created once per image and never mutated; the image buffer is shared
/// read-only with the batch that eventually delivers it.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedNote {
    #[serde(skip)]
    image: Arc<[u8]>,
    key: Option<AccessKey>,
    document_number: String,
    method: RecognitionMethod,
}

impl ProcessedNote {
    /// A note whose key was read and validated by `method`.
    pub fn resolved(image: Arc<[u8]>, key: AccessKey, method: RecognitionMethod) -> Self {
        let document_number = key.document_number().to_string();
        Self {
            image,
            key: Some(key),
            document_number,
            method,
        }
    }

    /// A note flagged for human review, either because every recognizer
    /// failed or because the caller attached it directly.
    pub fn manual(image: Arc<[u8]>) -> Self {
        Self {
            image,
            key: None,
            document_number: MANUAL_DOCUMENT_NUMBER.to_string(),
            method: RecognitionMethod::Manual,
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn key(&self) -> Option<&AccessKey> {
        self.key.as_ref()
    }

    /// Key digits, or the unresolved sentinel.
    pub fn key_display(&self) -> &str {
        self.key.as_ref().map_or(UNRESOLVED_KEY, AccessKey::as_str)
    }

    pub fn document_number(&self) -> &str {
        &self.document_number
    }

    pub fn method(&self) -> RecognitionMethod {
        self.method
    }

    pub fn is_resolved(&self) -> bool {
        self.key.is_some()
    }
}
