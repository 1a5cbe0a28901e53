use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;

use nf_intake::cli::Cli;
use nf_intake::config::{self, ConfigError};
use nf_intake::models::{ProcessedNote, TripBatch, TripError};
use nf_intake::pipeline::batch::process_batch;
use nf_intake::pipeline::delivery::{
    compose_message, summary_text, DeliveryChannel, DeliveryError, OutboxDirectory,
};
use nf_intake::pipeline::extraction::{ExtractionError, RecognitionCascade};

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Trip(#[from] TripError),

    #[error("Failed to set up recognition: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("No data directory on this platform; pass --outbox DIR")]
    NoOutbox,

    #[error("Failed to start async runtime: {0}")]
    Runtime(std::io::Error),
}

fn main() -> ExitCode {
    nf_intake::init_tracing();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "nf-intake failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    // Fatal checks first, before any image is touched.
    let trip = cli.trip_info();
    trip.validate()?;
    let config = cli.recognition_config();
    config.validate()?;

    let images = read_images(&cli.images);
    let manual = read_images(&cli.manual);

    // Built outside the runtime: the blocking HTTP client must not be created
    // or dropped on an async thread.
    let cascade = Arc::new(RecognitionCascade::from_config(&config)?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    let notes = runtime.block_on(process_batch(Arc::clone(&cascade), images, config.workers));
    drop(runtime);

    let mut batch = TripBatch::new(trip)?;
    batch.extend(notes);
    batch.extend(manual.into_iter().map(ProcessedNote::manual));
    batch.ensure_ready()?;

    print!("{}", summary_text(batch.notes()));
    tracing::info!(
        batch_id = %batch.id,
        notes = batch.len(),
        resolved = batch.resolved_count(),
        "Batch ready"
    );

    if cli.outbox.is_some() {
        let Some(root) = cli.outbox_dir() else {
            return Err(CliError::NoOutbox);
        };
        let message = compose_message(&batch)?;
        let receipt = OutboxDirectory::new(root).deliver(&message)?;
        println!(
            "Delivered {} attachment(s) to {}",
            receipt.attachments,
            receipt.location.display()
        );
    }
    Ok(())
}

/// Read every file, skipping (with a warning) the ones that cannot be read.
fn read_images(paths: &[impl AsRef<Path>]) -> Vec<Arc<[u8]>> {
    paths
        .iter()
        .filter_map(|path| {
            let path = path.as_ref();
            match std::fs::read(path) {
                Ok(bytes) => Some(Arc::from(bytes)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable image");
                    None
                }
            }
        })
        .collect()
}
