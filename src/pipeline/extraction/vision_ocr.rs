//! Remote vision stage: asks a multimodal model for the access key.
//!
//! The reply is free text. Every non-digit is stripped and whatever remains
//! is handed back as a single candidate, whatever its length. The model is
//! known to be over-permissive, so the caller validates every reply.

use std::sync::Arc;

use super::key_validator::strip_non_digits;
use super::vision_client::VisionClient;
use super::ExtractionError;

/// Fixed instruction sent with every image.
pub const ACCESS_KEY_PROMPT: &str = "\
This is a photo of a Brazilian electronic invoice (DANFE). \
Find the 44-digit access key (chave de acesso), usually printed near the barcode in groups of four digits. \
Remove every space, dot and separator. \
Reply with the 44 digits only and nothing else.";

pub struct RemoteVisionRecognizer {
    client: Arc<dyn VisionClient>,
}

impl RemoteVisionRecognizer {
    pub fn new(client: Arc<dyn VisionClient>) -> Self {
        Self { client }
    }

    /// One request, no retry. `Ok(None)` when the reply holds no digits.
    pub fn recognize(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Option<String>, ExtractionError> {
        let _span = tracing::info_span!(
            "remote_vision",
            model = %self.client.model_name(),
            image_size = image.len()
        )
        .entered();
        let start = std::time::Instant::now();

        let reply = self
            .client
            .describe_image(ACCESS_KEY_PROMPT, image, mime_type)?;
        let digits = strip_non_digits(&reply);

        tracing::info!(
            reply_chars = reply.len(),
            digits = digits.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Remote vision replied"
        );

        if digits.is_empty() {
            Ok(None)
        } else {
            Ok(Some(digits))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::vision_client::{MockVisionClient, VisionError};

    #[test]
    fn strips_separators_from_reply() {
        let recognizer = RemoteVisionRecognizer::new(Arc::new(MockVisionClient::new(
            "The key is 3525 0106 9987-6500.",
        )));
        let out = recognizer.recognize(b"img", "image/jpeg").unwrap();
        assert_eq!(out.as_deref(), Some("3525010699876500"));
    }

    #[test]
    fn non_numeric_reply_is_no_candidate() {
        let recognizer =
            RemoteVisionRecognizer::new(Arc::new(MockVisionClient::new("I cannot see a key.")));
        assert_eq!(recognizer.recognize(b"img", "image/jpeg").unwrap(), None);
    }

    #[test]
    fn client_errors_propagate() {
        let recognizer = RemoteVisionRecognizer::new(Arc::new(MockVisionClient::api_error(401)));
        let err = recognizer.recognize(b"img", "image/jpeg").unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Vision(VisionError::Api { status: 401, .. })
        ));
    }

    #[test]
    fn prompt_asks_for_digits_only() {
        assert!(ACCESS_KEY_PROMPT.contains("44"));
        assert!(ACCESS_KEY_PROMPT.contains("digits only"));
    }
}
