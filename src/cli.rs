//! The `tilemx` command-line tool.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::summary::{self, SummaryFilter};

#[derive(Parser)]
#[command(name = "tilemx", version, about = "Inspect Tiled TMX/TSX/TX documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a document and log a structural summary.
    Info {
        /// A .tmx map, .tsx tileset, or .tx template.
        file: PathBuf,
        /// Log only the map header, no tilesets/properties/layers.
        #[arg(long)]
        header_only: bool,
    },
    /// Load a document and print it as JSON.
    Dump {
        /// A .tmx map, .tsx tileset, or .tx template.
        file: PathBuf,
        /// Pretty-print the JSON.
        #[arg(long)]
        pretty: bool,
    },
}

/// Entry point for the `tilemx` binary.
///
/// # Errors
///
/// Returns load and serialization failures so the binary can report them.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Info { file, header_only } => {
            let filter = if header_only {
                SummaryFilter::header_only()
            } else {
                SummaryFilter::all()
            };
            match extension(&file)? {
                Format::Map => {
                    let map = crate::load_map(&file)
                        .with_context(|| format!("loading {}", file.display()))?;
                    summary::trace_map(&map, filter);
                }
                Format::Tileset => {
                    let tileset = crate::load_tileset(&file)
                        .with_context(|| format!("loading {}", file.display()))?;
                    tracing::info!(
                        "tileset \"{}\": first GID {}, {} explicit tiles",
                        tileset.name,
                        tileset.first_gid,
                        tileset.tiles.len()
                    );
                }
                Format::Template => {
                    let template = crate::load_template(&file)
                        .with_context(|| format!("loading {}", file.display()))?;
                    tracing::info!(
                        "template object \"{}\" with {} properties",
                        template.object.name,
                        template.object.properties.len()
                    );
                }
            }
        }
        Command::Dump { file, pretty } => {
            let json = match extension(&file)? {
                Format::Map => to_json(&crate::load_map(&file)?, pretty)?,
                Format::Tileset => to_json(&crate::load_tileset(&file)?, pretty)?,
                Format::Template => {
                    let template = crate::load_template(&file)?;
                    let value = serde_json::json!({
                        "object": template.object,
                        "tileset": template.tileset,
                    });
                    to_json(&value, pretty)?
                }
            };
            println!("{json}");
        }
    }
    Ok(())
}

enum Format {
    Map,
    Tileset,
    Template,
}

fn extension(path: &Path) -> anyhow::Result<Format> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("tmx" | "xml") => Ok(Format::Map),
        Some("tsx") => Ok(Format::Tileset),
        Some("tx") => Ok(Format::Template),
        other => bail!("unrecognized document extension: {other:?}"),
    }
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> anyhow::Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}
