//! `layerdb pull` command.

use clap::Args;
use layerdb_core::config::StoreConfig;
use layerdb_core::event::{EventStream, PullEvent};
use layerdb_store::oci::parse_reference;
use layerdb_store::ImagePuller;

#[derive(Args)]
pub struct PullArgs {
    /// Image reference (e.g., "alpine:latest", "ghcr.io/org/image:tag")
    pub image: String,

    /// Suppress progress output and print only the image digest
    #[arg(short, long)]
    pub quiet: bool,

    /// Ensure every layer even if the image is already cached
    #[arg(long)]
    pub verify_layers: bool,
}

pub async fn execute(
    args: PullArgs,
    config: &StoreConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    // Reject malformed references before the stores are touched.
    let reference = parse_reference(&args.image)?;

    let puller = ImagePuller::from_config(config)?
        .with_verify_layers(config.verify_layers || args.verify_layers);

    let printer = if args.quiet {
        None
    } else {
        Some(tokio::spawn(print_progress(puller.events().subscribe())))
    };

    let result = puller.pull_reference(&reference).await;

    // Dropping the puller closes the event stream so the printer can finish.
    drop(puller);
    if let Some(printer) = printer {
        if let Err(e) = printer.await {
            tracing::warn!(error = %e, "Progress printer failed");
        }
    }

    let report = result?;
    if args.quiet {
        println!("{}", report.digest);
    }

    Ok(())
}

async fn print_progress(mut events: EventStream) {
    while let Some(event) = events.recv().await {
        if let Some(line) = progress_line(&event) {
            println!("{line}");
        }
    }
}

/// Render a pull event as a progress line.
fn progress_line(event: &PullEvent) -> Option<String> {
    let line = match event {
        PullEvent::ImageResolving { reference } => format!("Pulling image: {reference}"),
        PullEvent::ImageCached { .. } => "Image found in cache".to_string(),
        PullEvent::ImageStored { .. } => return None,
        PullEvent::LayerStarted { digest } => format!("Pulling layer: {}", digest_hex(digest)),
        PullEvent::LayerCached { .. } => "Layer found in cache".to_string(),
        PullEvent::LayerFetched { .. } => "Layer pulled".to_string(),
    };
    Some(line)
}

fn digest_hex(digest: &str) -> &str {
    digest.split_once(':').map_or(digest, |(_, hex)| hex)
}
