use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use media_sync::preflight;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Validate a local batch of product descriptors and write a manifest"
)]
struct Args {
    /// JSON (or .yaml/.yml) file holding an array of descriptors
    input: PathBuf,

    /// Directory that receives <batch_id>-manifest.json
    #[arg(long, default_value = "./batches")]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let (manifest, path) = preflight::run(&args.input, &args.output_dir)?;

    println!("Batch {}", manifest.batch_id);
    for item in &manifest.products {
        let label = if item.name.is_empty() { "(unnamed)" } else { item.name.as_str() };
        if item.valid {
            println!("  [{}] OK   {} ({} photos)", item.index + 1, label, item.photos);
        } else {
            println!("  [{}] FAIL {}", item.index + 1, label);
            for err in &item.errors {
                println!("        - {}", err);
            }
        }
    }
    println!(
        "Total: {}  Valid: {}  Invalid: {}  Photos: {}",
        manifest.total_products,
        manifest.valid_products,
        manifest.invalid_products,
        manifest.total_photos
    );
    println!("Manifest: {}", path.display());
    Ok(())
}
