#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqsh::{Codec, ExtractOptions, FsSink, SquashImage, Traversal};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqsh", about = "Read-only SquashFS v4.0 extractor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract an image into an output directory.
    Extract {
        /// Path to the squashfs image.
        image: PathBuf,
        /// Output directory.
        #[arg(short = 'o', long = "output", default_value = "./extracted")]
        output: PathBuf,
        /// Do not apply mode/ownership/mtime/xattr metadata.
        #[arg(long)]
        no_meta: bool,
        /// Downgrade per-entry decode failures to warnings and continue.
        #[arg(long)]
        lenient: bool,
        /// Output the run report in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Inspect an image's superblock.
    Inspect {
        /// Path to the squashfs image.
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Extract {
            image,
            output,
            no_meta,
            lenient,
            json,
        } => extract(&image, output, no_meta, lenient, json),
        Command::Inspect { image, json } => inspect(&image, json),
    }
}

fn extract(image: &PathBuf, output: PathBuf, no_meta: bool, lenient: bool, json: bool) -> Result<()> {
    let image = SquashImage::open(image)
        .with_context(|| format!("failed to open squashfs image {}", image.display()))?;

    let options = ExtractOptions {
        output_root: output.clone(),
        apply_metadata: !no_meta,
        lenient,
    };
    let mut sink = FsSink::new(&options);
    let report = Traversal::new(&image, &options)
        .run(&mut sink)
        .context("extraction failed")?;

    let cache = image.fragment_cache_stats();
    if json {
        let payload = serde_json::json!({
            "output": output,
            "report": report,
            "fragment_cache": { "hits": cache.hits, "misses": cache.misses },
            "refused": sink.refusals().len(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("extracted to {}", output.display());
    println!("  directories     {}", report.dirs);
    println!("  files           {}", report.files);
    println!("  symlinks        {}", report.symlinks);
    println!("  special files   {}", report.specials);
    println!("  bytes written   {}", report.bytes_written);
    println!("  tail fragments  {}", report.tail_fragments);
    println!("  max depth       {}", report.max_depth);
    if report.warnings > 0 {
        println!("  warnings        {}", report.warnings);
    }
    for refusal in sink.refusals() {
        println!("  refused: {refusal}");
    }
    Ok(())
}

fn inspect(image: &PathBuf, json: bool) -> Result<()> {
    let image = SquashImage::open(image)
        .with_context(|| format!("failed to open squashfs image {}", image.display()))?;
    let sb = image.superblock();

    if json {
        println!("{}", serde_json::to_string_pretty(sb)?);
        return Ok(());
    }

    let codec_name = Codec::from_id(sb.compression_id).map_or("unknown", Codec::name);
    println!("squashfs 4.0");
    println!("  block size        {}", sb.block_size);
    println!("  compression       {} ({})", sb.compression_id, codec_name);
    println!("  inodes            {}", sb.inode_count);
    println!("  fragment entries  {}", sb.fragment_entry_count);
    println!("  id entries        {}", sb.id_count);
    println!("  bytes used        {}", sb.bytes_used);
    println!("  root inode        {}", sb.root_inode_ref);
    println!(
        "  xattr store       {}",
        if sb.xattr_id_table_start.is_some() {
            "present"
        } else {
            "absent"
        }
    );
    Ok(())
}
