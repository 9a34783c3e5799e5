//! Command-line front end for avatar extension ingestion.
//!
//! # Responsibility
//! - Expose download, import, list, show-image and delete against an
//!   on-disk `avatars` database.
//! - Keep all validation and storage rules inside `avatar_ext_core`.

use avatar_ext_core::{
    default_log_level, init_logging, ExtensionService, HandleCache, HttpFetcher, IngestConfig,
    IngestReport, LocalFile, StoreLocation,
};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Download, import and manage community avatar extensions.
#[derive(Parser)]
#[command(name = "avatar-ext", version, about, long_about = None)]
struct Cli {
    /// Directory holding the `avatars` database
    #[arg(long, env = "AVATAR_EXT_DB_DIR", global = true, default_value = ".avatar_ext")]
    db_dir: PathBuf,

    /// Directory for rolling log files; logging is off when unset
    #[arg(long, env = "AVATAR_EXT_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, env = "AVATAR_EXT_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a manifest and its images from a URL
    Download {
        url: String,
    },

    /// Import manifest and image files from disk
    Import {
        /// Manifest JSON file; repeat for several manifests
        #[arg(short, long = "manifest", required = true)]
        manifests: Vec<PathBuf>,

        /// Image file referenced by a manifest `fileName`
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,
    },

    /// List stored extensions
    List,

    /// Print or export one stored image
    ShowImage {
        extension_key: String,
        image_key: String,

        /// Write the image bytes to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete an extension and all of its images
    Delete {
        extension_key: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(err) = absolute(log_dir).and_then(|dir| init_logging(level, &dir)) {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = IngestConfig::default();
    let fetcher = HttpFetcher::new(&config).map_err(|err| err.to_string())?;
    let cache = HandleCache::new(StoreLocation::Directory(cli.db_dir.clone()));
    let service = ExtensionService::open(&cache, fetcher, config).map_err(|err| err.to_string())?;
    info!(
        "event=cli_start module=cli status=ok db_dir={}",
        cli.db_dir.display()
    );

    match cli.command {
        Command::Download { url } => {
            let report = service
                .download_from_url(&url)
                .await
                .map_err(|err| err.to_string())?;
            print_report(&report);
        }
        Command::Import { manifests, images } => {
            let manifests = read_files(&manifests).await?;
            let images = read_files(&images).await?;
            let reports = service
                .import_from_files(&manifests, &images)
                .await
                .map_err(|err| err.to_string())?;
            reports.iter().for_each(print_report);
        }
        Command::List => {
            let abstracts = service.get_abstracts().await.map_err(|err| err.to_string())?;
            if abstracts.is_empty() {
                println!("no extensions stored");
            }
            for item in abstracts {
                println!(
                    "{}\t{}\t{}",
                    item.key,
                    item.description,
                    item.source.as_deref().unwrap_or("local")
                );
            }
        }
        Command::ShowImage {
            extension_key,
            image_key,
            out,
        } => {
            let image = service
                .get_image(&extension_key, &image_key)
                .await
                .map_err(|err| err.to_string())?
                .ok_or_else(|| format!("no image `{image_key}` for extension `{extension_key}`"))?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, &image.blob)
                        .await
                        .map_err(|err| format!("failed to write `{}`: {err}", path.display()))?;
                    println!("wrote {} bytes to {}", image.blob.len(), path.display());
                }
                None => println!(
                    "{}/{}\t{} bytes\t{}",
                    image.extension_key,
                    image.key,
                    image.blob.len(),
                    image.source_url.as_deref().unwrap_or("local")
                ),
            }
        }
        Command::Delete { extension_key } => {
            service
                .delete(&extension_key)
                .await
                .map_err(|err| err.to_string())?;
            println!("deleted {extension_key}");
        }
    }
    Ok(())
}

async fn read_files(paths: &[PathBuf]) -> Result<Vec<LocalFile>, String> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = LocalFile::from_path(path)
            .await
            .map_err(|err| format!("failed to read `{}`: {err}", path.display()))?;
        files.push(file);
    }
    Ok(files)
}

fn print_report(report: &IngestReport) {
    println!(
        "{}: stored {} image(s), skipped {}",
        report.extension_key,
        report.stored.len(),
        report.skipped.len()
    );
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.image_key, skipped.reason);
    }
}

fn absolute(path: &Path) -> Result<String, String> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|err| format!("failed to resolve current directory: {err}"))?
            .join(path)
    };
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn import_accepts_repeated_files() {
        let cli = Cli::try_parse_from([
            "avatar-ext",
            "--db-dir",
            "/tmp/avatars",
            "import",
            "-m",
            "a.json",
            "--manifest",
            "b.json",
            "-i",
            "cat.png",
        ])
        .unwrap();
        match cli.command {
            Command::Import { manifests, images } => {
                assert_eq!(manifests.len(), 2);
                assert_eq!(images.len(), 1);
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn import_requires_a_manifest() {
        assert!(Cli::try_parse_from(["avatar-ext", "import", "-i", "cat.png"]).is_err());
    }
}
