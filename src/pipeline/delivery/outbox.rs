//! Filesystem delivery channel.
//!
//! **Output structure**:
//! ```text
//! {root}/{batch_id}/
//!   message.txt        subject line, blank line, body
//!   manifest.json      subject, body and attachment names
//!   NF_000004567.jpg
//!   MANUAL_PHOTO_2.jpg
//! ```
//!
//! Something else (a mail relay, a sync job) picks the directory up.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{DeliveryChannel, DeliveryError, DeliveryReceipt, OutboundMessage};

const MESSAGE_FILE: &str = "message.txt";
const MANIFEST_FILE: &str = "manifest.json";

pub struct OutboxDirectory {
    root: PathBuf,
}

impl OutboxDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Files are never overwritten: a name that already exists is an error.
fn write_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(data)
}

impl DeliveryChannel for OutboxDirectory {
    /// Writes into a new directory named after the batch. Delivering the same
    /// batch twice fails rather than overwriting.
    fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        std::fs::create_dir_all(&self.root)?;
        let dir = self.root.join(message.batch_id.to_string());
        std::fs::create_dir(&dir)?;

        let text = format!("{}\n\n{}", message.subject, message.body);
        write_new(&dir.join(MESSAGE_FILE), text.as_bytes())?;

        let manifest = serde_json::to_string_pretty(message)
            .map_err(|e| DeliveryError::Encoding(e.to_string()))?;
        write_new(&dir.join(MANIFEST_FILE), manifest.as_bytes())?;

        for attachment in &message.attachments {
            write_new(&dir.join(&attachment.file_name), &attachment.data)?;
        }

        tracing::info!(
            path = %dir.display(),
            attachments = message.attachments.len(),
            "Batch delivered to outbox"
        );

        Ok(DeliveryReceipt {
            location: dir,
            attachments: message.attachments.len(),
        })
    }
}
