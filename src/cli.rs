//! Command-line arguments for `nf-intake`.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{
    RecognitionConfig, VisionConfig, VisionProvider, DEFAULT_VISION_TIMEOUT_SECS, DEFAULT_WORKERS,
    MAX_BARCODE_WIDTH,
};
use crate::models::TripInfo;
use crate::pipeline::extraction::BinarizationRecipe;

/// Read invoice access keys from photos and bundle them for billing.
#[derive(Parser, Debug)]
#[command(name = "nf-intake")]
#[command(version)]
pub struct Cli {
    /// Person submitting the batch
    #[arg(long, env = "NF_SENDER")]
    pub sender: String,

    #[arg(long)]
    pub driver: String,

    /// Sales order (PV) number
    #[arg(long = "order-ref")]
    pub order_ref: String,

    /// Pickup city
    #[arg(long)]
    pub origin: Option<String>,

    /// Delivery city
    #[arg(long)]
    pub destination: Option<String>,

    /// Free-text remarks (damaged goods, missing stub, ...)
    #[arg(long)]
    pub notes: Option<String>,

    /// Write the composed message and photos under DIR (default: the
    /// per-user data directory)
    #[arg(long, value_name = "DIR", num_args = 0..=1)]
    pub outbox: Option<Option<PathBuf>>,

    /// Photos to attach for human review without running recognition
    #[arg(long = "manual", value_name = "IMAGE")]
    pub manual: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = VisionProvider::Gemini, env = "NF_VISION_PROVIDER")]
    pub vision_provider: VisionProvider,

    /// Defaults to the provider's standard model
    #[arg(long, env = "NF_VISION_MODEL")]
    pub vision_model: Option<String>,

    /// Defaults to the provider's public endpoint
    #[arg(long, env = "NF_VISION_BASE_URL")]
    pub vision_base_url: Option<String>,

    #[arg(long, env = "NF_VISION_API_KEY", hide_env_values = true)]
    pub vision_api_key: Option<String>,

    #[arg(long, default_value_t = DEFAULT_VISION_TIMEOUT_SECS, env = "NF_VISION_TIMEOUT_SECS")]
    pub vision_timeout_secs: u64,

    /// Directory containing eng.traineddata (needs the `ocr` build feature)
    #[arg(long, env = "NF_TESSDATA_DIR")]
    pub tessdata_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = BinarizationRecipe::AdaptiveMean, env = "NF_BINARIZATION")]
    pub binarization: BinarizationRecipe,

    #[arg(long, default_value_t = MAX_BARCODE_WIDTH)]
    pub max_width: u32,

    /// Images recognized in parallel
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "NF_WORKERS")]
    pub workers: usize,

    /// Invoice photos, processed in this order
    #[arg(value_name = "IMAGE", required_unless_present = "manual")]
    pub images: Vec<PathBuf>,
}

impl Cli {
    /// Outbox root when delivery was requested.
    pub fn outbox_dir(&self) -> Option<PathBuf> {
        match &self.outbox {
            Some(Some(dir)) => Some(dir.clone()),
            Some(None) => crate::config::default_outbox_dir(),
            None => None,
        }
    }

    pub fn trip_info(&self) -> TripInfo {
        TripInfo {
            sender: self.sender.trim().to_string(),
            driver: self.driver.trim().to_string(),
            order_ref: self.order_ref.trim().to_string(),
            origin: non_blank(&self.origin),
            destination: non_blank(&self.destination),
            remarks: non_blank(&self.notes),
        }
    }

    pub fn recognition_config(&self) -> RecognitionConfig {
        let vision = match self.vision_provider {
            VisionProvider::None => None,
            provider => {
                let defaults = VisionConfig::for_provider(provider);
                Some(VisionConfig {
                    base_url: self.vision_base_url.clone().unwrap_or(defaults.base_url),
                    model: self.vision_model.clone().unwrap_or(defaults.model),
                    api_key: non_blank(&self.vision_api_key),
                    timeout_secs: self.vision_timeout_secs,
                    provider,
                })
            }
        };

        RecognitionConfig {
            vision,
            tessdata_dir: self.tessdata_dir.clone(),
            binarization: self.binarization,
            max_barcode_width: self.max_width,
            workers: self.workers,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
