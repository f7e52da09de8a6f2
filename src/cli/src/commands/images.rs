//! `layerdb images` command.

use clap::Args;
use layerdb_core::config::StoreConfig;
use layerdb_store::{Digest, ImageRecord, ImageStore, LayerStore, OciImageManifest};

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Only show full image digests (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: ImagesArgs,
    config: &StoreConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let headers = ["DIGEST", "LAYERS", "SIZE", "NAME"];
    if !config.image_root.exists() {
        if !args.quiet {
            println!("{}", output::new_table(&headers));
        }
        return Ok(());
    }

    let images = ImageStore::new(&config.image_root)?;
    let digests = images.list()?;

    if args.quiet {
        for digest in &digests {
            println!("{digest}");
        }
        return Ok(());
    }

    let layers = LayerStore::new(&config.layer_root)?;
    let mut table = output::new_table(&headers);
    for digest in &digests {
        match ImageRow::load(&images, &layers, digest) {
            Ok(row) => {
                table.add_row([row.digest, row.layers, row.size, row.name]);
            }
            Err(e) => tracing::warn!(digest = %digest, error = %e, "Skipping unreadable image"),
        }
    }

    println!("{table}");
    Ok(())
}

/// Display fields for a single image row.
struct ImageRow {
    digest: String,
    layers: String,
    size: String,
    name: String,
}

impl ImageRow {
    fn load(
        images: &ImageStore,
        layers: &LayerStore,
        digest: &Digest,
    ) -> layerdb_core::error::Result<Self> {
        let record: ImageRecord<OciImageManifest, serde_json::Value> = images.load(digest)?;
        let manifest = &record.manifest;

        let present = present_layers(layers, manifest);

        let size: i64 = manifest.layers.iter().map(|l| l.size).sum::<i64>() + manifest.config.size;
        let name = manifest
            .annotations
            .as_ref()
            .and_then(|a| a.get("org.opencontainers.image.ref.name"))
            .cloned()
            .unwrap_or_else(|| "<none>".to_string());

        Ok(Self {
            digest: output::short_digest(&digest.to_string()),
            layers: format!("{}/{}", present, manifest.layers.len()),
            size: output::format_bytes(size.max(0) as u64),
            name,
        })
    }
}

/// Number of manifest layers found in the layer store.
///
/// Layers that cannot be checked are logged and counted as missing.
fn present_layers(layers: &LayerStore, manifest: &OciImageManifest) -> usize {
    let mut present = 0;
    for layer in &manifest.layers {
        let digest = match Digest::parse(&layer.digest) {
            Ok(digest) => digest,
            Err(e) => {
                tracing::warn!(layer = %layer.digest, error = %e, "Invalid layer digest");
                continue;
            }
        };
        match layers.contains(&digest) {
            Ok(true) => present += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(layer = %digest, error = %e, "Failed to check layer"),
        }
    }
    present
}
