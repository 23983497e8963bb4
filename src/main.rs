use clap::{Parser, Subcommand};
use multipic::codec::builtin::ReferenceCodec;
use multipic::format::header::SIGNATURE;
use multipic::{
    inspect, Endian, Error, FileProvider, Layout, PictureContainer, RepresentationKind, WriteOptions,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "multipic", about = "Multi-representation picture container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack image files into one container, one representation per format
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Container format version (5-8)
        #[arg(long, default_value = "8")]
        format_version: u32,
        /// Write the byte-reversed (big-endian) layout
        #[arg(long)]
        big_endian: bool,
        /// Attach this file as opaque extra data
        #[arg(long)]
        extra: Option<PathBuf>,
        /// Always write a container, even for a single plain image
        #[arg(long)]
        no_shortcut: bool,
        /// Reject inputs no codec recognizes instead of carrying them as-is
        #[arg(long)]
        strict: bool,
    },
    /// Write every representation out as its own file
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List representations
    List {
        input: PathBuf,
    },
    /// Show container header fields
    Info {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, input, format_version, big_endian, extra, no_shortcut, strict } => {
            let mut pic = PictureContainer::new();
            for path in &input {
                let rep = pic.add_file(path, !strict)?;
                println!("  packed  {}  as {}", path.display(), rep.id());
            }
            if let Some(extra) = extra {
                pic.set_extra_data(Some(std::fs::read(extra)?));
            }
            let opts = WriteOptions {
                version:            format_version,
                endian:             if big_endian { Endian::Big } else { Endian::Little },
                allow_raw_shortcut: !no_shortcut,
            };
            let bytes = pic.to_bytes_with(&opts)?;
            std::fs::write(&output, &bytes)?;
            println!("Created: {} ({} B)", output.display(), bytes.len());
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir } => {
            let pic = PictureContainer::open(&input)?;
            std::fs::create_dir_all(&output_dir)?;
            let stem = file_stem(&input);
            for rep in pic.representations() {
                if rep.kind() == RepresentationKind::Provenance {
                    let target = ReferenceCodec::target(rep).unwrap_or_default();
                    println!("  skipped {} (refers to {})", rep.id(), target);
                    continue;
                }
                let bytes = match rep.encode() {
                    Ok(bytes) => bytes,
                    Err(Error::Unsupported(reason)) => {
                        println!("  skipped {} ({reason})", rep.id());
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let path = output_dir.join(format!("{stem}{}", file_suffix(rep.id())));
                std::fs::write(&path, &bytes)?;
                println!("  wrote   {}", path.display());
            }
            if let Some(extra) = pic.extra_data() {
                let path = output_dir.join(format!("{stem}.extra"));
                std::fs::write(&path, extra)?;
                println!("  wrote   {}", path.display());
            }
            println!("Unpacked to: {}", output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input } => {
            let pic = PictureContainer::open(&input)?;
            println!("Container: {}", input.display());
            println!("{:<30} {:<10} {:>10} {:>11} {:>6}  BLAKE3",
                     "Identifier", "Kind", "Size", "Dimensions", "Frames");
            for rep in pic.representations() {
                let dims = match (rep.width(), rep.height()) {
                    (0, _) | (_, 0) => "-".to_string(),
                    (w, h)          => format!("{w}x{h}"),
                };
                let digest = blake3::hash(rep.payload());
                println!("{:<30} {:<10} {:>10} {:>11} {:>6}  {}",
                    rep.id(), format!("{:?}", rep.kind()), rep.len(), dims,
                    rep.frame_count(), hex::encode(&digest.as_bytes()[..8]));
            }
            if let Some(extra) = pic.extra_data() {
                println!("{:<30} {:<10} {:>10}", "(extra data)", "-", extra.len());
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let layout = inspect(&FileProvider::open(&input)?)?;
            let pic = PictureContainer::open(&input)?;

            println!("── Picture container ────────────────────────────────────");
            println!("  Path             {}", input.display());
            match layout {
                Layout::Empty => println!("  Layout           empty"),
                Layout::Raw   => println!("  Layout           raw single representation"),
                Layout::Container(h) => {
                    let order = match h.endian {
                        Endian::Little => "little-endian",
                        Endian::Big    => "big-endian (byteswapped)",
                    };
                    let sig = match h.endian {
                        Endian::Little => SIGNATURE.to_le_bytes(),
                        Endian::Big    => SIGNATURE.to_be_bytes(),
                    };
                    println!("  Layout           container");
                    println!("  Signature        {}", hex::encode(sig));
                    println!("  Byte order       {order}");
                    println!("  Format version   {}", h.version);
                    println!("  Entries          {}", h.count);
                    println!("  Name table       {} B", h.name_table_size);
                    println!("  Metadata bag     {} B", h.bag_size);
                    println!("  Extra data       {} B", h.extra_size);
                    println!("  Payload region   {} B", h.payload_size);
                }
            }
            println!("  Representations  {}", pic.count_representations());
            println!("  Best (display)   {}", pic.best_for_display().map_or("-", |r| r.id()));
            println!("  Best (printing)  {}", pic.best_for_printing().map_or("-", |r| r.id()));
            if let Some((w, h)) = pic.dimensions() {
                println!("  Dimensions       {w}x{h}");
            }
            if !pic.settings().is_default() {
                println!("  Settings         {}", serde_json::to_string(pic.settings())?);
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "picture".into())
}

/// File suffix for a representation key: extensions as-is, anything else
/// made filesystem-safe.
fn file_suffix(id: &str) -> String {
    if id.starts_with('.') {
        return id.to_string();
    }
    let safe: String = id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(".{safe}")
}
