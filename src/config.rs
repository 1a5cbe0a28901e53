use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::extraction::BinarizationRecipe;

/// Application-level constants
pub const APP_NAME: &str = "nf-intake";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Barcode/OCR inputs wider than this are downscaled first.
pub const MAX_BARCODE_WIDTH: u32 = 2000;

/// Hard limit on one remote vision request.
pub const DEFAULT_VISION_TIMEOUT_SECS: u64 = 60;

/// Images recognized concurrently in one batch.
pub const DEFAULT_WORKERS: usize = 4;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "llava";

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "nf_intake=info,warn"
}

/// Per-user data directory, e.g. `~/.local/share/nf-intake` on Linux.
/// `None` when the platform has no notion of one.
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(APP_NAME))
}

/// Default delivery outbox under the data directory.
pub fn default_outbox_dir() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join("outbox"))
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing credential for vision provider '{0}'")]
    MissingCredential(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Remote multimodal model back end.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum VisionProvider {
    #[default]
    Gemini,
    Ollama,
    /// Skip the remote vision stage entirely.
    None,
}

impl VisionProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::None => "none",
        }
    }

    pub fn requires_credential(&self) -> bool {
        matches!(self, Self::Gemini)
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Gemini => GEMINI_BASE_URL,
            Self::Ollama | Self::None => OLLAMA_BASE_URL,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => GEMINI_DEFAULT_MODEL,
            Self::Ollama | Self::None => OLLAMA_DEFAULT_MODEL,
        }
    }
}

impl fmt::Display for VisionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote vision settings. The only part of the configuration that holds a
/// secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub provider: VisionProvider,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl VisionConfig {
    pub fn for_provider(provider: VisionProvider) -> Self {
        Self {
            provider,
            base_url: provider.default_base_url().to_string(),
            model: provider.default_model().to_string(),
            api_key: None,
            timeout_secs: DEFAULT_VISION_TIMEOUT_SECS,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != VisionProvider::None
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let has_key = self
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if self.provider.requires_credential() && !has_key {
            return Err(ConfigError::MissingCredential(self.provider.to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vision timeout",
                reason: "must be at least 1 second".into(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "vision model",
                reason: "must not be empty".into(),
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "vision base url",
                reason: format!("'{}' is not an http(s) URL", self.base_url),
            });
        }
        Ok(())
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self::for_provider(VisionProvider::default())
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Everything the recognition cascade needs, built once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// `None` disables the remote vision stage.
    pub vision: Option<VisionConfig>,
    /// Directory holding `eng.traineddata`. Local OCR is skipped without it.
    pub tessdata_dir: Option<PathBuf>,
    pub binarization: BinarizationRecipe,
    pub max_barcode_width: u32,
    pub workers: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            vision: None,
            tessdata_dir: None,
            binarization: BinarizationRecipe::default(),
            max_barcode_width: MAX_BARCODE_WIDTH,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl RecognitionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_barcode_width == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max barcode width",
                reason: "must be at least 1 pixel".into(),
            });
        }
        if let Some(vision) = &self.vision {
            vision.validate()?;
        }
        Ok(())
    }
}
