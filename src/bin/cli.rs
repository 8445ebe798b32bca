// abyss-core - Segmented video downloader core
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use abyss_core::download::{DownloadConfig, ProgressPublisher, VideoDownloader};
use abyss_core::file::{
    default_download_dir, default_file_name, format_bytes, sanitize_file_name,
    validate_output_path,
};
use abyss_core::error::AbyssError;
use abyss_core::media::{decode_envelope, DecryptedMediaMetadata};
use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "abyss-cli")]
#[command(about = "abyss-cli - Segmented video downloader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt a media envelope and print its metadata as JSON
    Decode {
        /// Base64 envelope, or @FILE to read it from a file
        #[arg(short, long)]
        envelope: String,
    },
    /// List the sources of a media envelope
    Sources {
        /// Base64 envelope, or @FILE to read it from a file
        #[arg(short, long)]
        envelope: String,
    },
    /// Download one source of a media envelope
    Download {
        /// Base64 envelope, or @FILE to read it from a file
        #[arg(short, long)]
        envelope: String,

        /// Page URL the envelope was taken from
        #[arg(short, long)]
        url: Option<String>,

        /// Source label, e.g. 720p
        #[arg(short, long)]
        resolution: Option<String>,

        /// Output file (.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Segments fetched at once
        #[arg(short = 'n', long)]
        connections: Option<usize>,

        /// Extra request header, "Name: value"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// JSON config file; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { envelope } => {
            let metadata = load_metadata(&envelope)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Sources { envelope } => {
            let metadata = load_metadata(&envelope)?;
            print_sources(&metadata);
        }
        Commands::Download {
            envelope,
            url,
            resolution,
            output,
            connections,
            headers,
            config,
        } => {
            let metadata = load_metadata(&envelope)?;

            let mut config = match config {
                Some(path) => DownloadConfig::from_json_file(&path)?,
                None => DownloadConfig::default(),
            };
            if let Some(url) = url {
                config.source_url = url;
            }
            if let Some(resolution) = resolution {
                config.resolution = resolution;
            }
            if let Some(connections) = connections {
                config.max_concurrency = connections;
            }
            config.headers.extend(parse_headers(&headers)?);

            config.output_path = match output {
                Some(path) => sanitize_output(&path)?,
                None if !config.output_path.as_os_str().is_empty() => config.output_path.clone(),
                None => default_download_dir().join(default_file_name(
                    metadata.slug.as_deref(),
                    &config.resolution,
                    chrono::Utc::now().timestamp_millis(),
                )),
            };

            validate_output_path(&config.output_path)?;
            config.validate()?;

            run_download(&config, &metadata).await?;
        }
    }

    Ok(())
}

/// Read the envelope from the argument or from `@FILE`
fn read_envelope(arg: &str) -> anyhow::Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read envelope from {}", path)),
        None => Ok(arg.to_string()),
    }
}

fn load_metadata(arg: &str) -> anyhow::Result<DecryptedMediaMetadata> {
    let envelope = read_envelope(arg)?;
    decode_envelope(&envelope).map_err(user_error)
}

/// Lead with the user-facing message, keep the detailed error as its cause
fn user_error(e: AbyssError) -> anyhow::Error {
    let message = e.user_message();
    anyhow::Error::new(e).context(message)
}

fn parse_headers(raw: &[String]) -> anyhow::Result<HashMap<String, String>> {
    raw.iter()
        .map(|header| {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow!("Invalid header '{}', expected 'Name: value'", header))?;
            let name = name.trim();
            if name.is_empty() {
                bail!("Invalid header '{}', empty name", header);
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Keep the directory, sanitize the file name
fn sanitize_output(path: &Path) -> anyhow::Result<PathBuf> {
    let raw = path.to_string_lossy();
    if raw.ends_with('/') || raw.ends_with('\\') {
        // Let validation report it
        return Ok(path.to_path_buf());
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(sanitize_file_name)
        .ok_or_else(|| anyhow!("No valid file name in {}", path.display()))?;
    Ok(match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    })
}

fn print_sources(metadata: &DecryptedMediaMetadata) {
    println!(
        "{:<10} {:<8} {:>12} {:>9}",
        "LABEL", "CODEC", "SIZE", "SEGMENTS"
    );
    for source in &metadata.sources {
        println!(
            "{:<10} {:<8} {:>12} {:>9}",
            source.label.as_deref().unwrap_or("-"),
            source.codec.as_deref().unwrap_or("-"),
            source
                .size
                .map(|s| format_bytes(s.max(0) as u64))
                .unwrap_or_else(|| "unknown".to_string()),
            source.segment_count()
        );
    }
}

async fn run_download(
    config: &DownloadConfig,
    metadata: &DecryptedMediaMetadata,
) -> anyhow::Result<()> {
    let downloader = VideoDownloader::with_default_transport()?;
    let publisher = ProgressPublisher::new();

    let mut subscription = publisher.subscribe();
    let logger = tokio::spawn(async move {
        while let Some(snapshot) = subscription.next().await {
            info!("{}", snapshot.display_string());
        }
    });

    let result = downloader.download(config, metadata, &publisher).await;
    drop(publisher);
    let _ = logger.await;

    match result {
        Ok(outcome) => {
            info!(
                output = %outcome.output_path.display(),
                size = %format_bytes(outcome.bytes_written),
                resumed = outcome.segments_resumed,
                "Download finished"
            );
            Ok(())
        }
        Err(e) => Err(user_error(e)),
    }
}
