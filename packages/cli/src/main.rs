#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Uploads one file to the asset service and prints the resulting asset id.
//!
//! Configuration comes from `--config` (TOML) or, without it, from the
//! `DAM_*` environment variables. Ctrl-C cancels the upload.

mod progress;

use std::path::PathBuf;

use clap::Parser;
use dam_upload::backend::BackendKind;
use dam_upload::config::DamConfig;
use dam_upload::orchestrator::UploadOrchestrator;
use dam_upload_models::{Destination, UploadRequestSpec};

use crate::progress::{IndicatifProgress, init_logger};

#[derive(Parser)]
#[command(name = "dam-upload", about = "Upload a file as a new asset or asset version")]
struct Cli {
    /// File to upload
    file: PathBuf,
    /// Brand to create a new asset in
    #[arg(long, conflicts_with = "media_id", required_unless_present = "media_id")]
    brand_id: Option<String>,
    /// Existing asset to add a new version to
    #[arg(long)]
    media_id: Option<String>,
    /// Filename reported to the service (defaults to the file's name)
    #[arg(long)]
    name: Option<String>,
    /// Record the upload in the audit log
    #[arg(long)]
    audit: bool,
    /// Metaproperty selection as `ID=OPTION[,OPTION...]`; repeatable
    #[arg(long = "metaproperty", value_parser = parse_metaproperty)]
    metaproperties: Vec<(String, Vec<String>)>,
    /// Transport backend, `direct` or `staged` (overrides the config)
    #[arg(long, value_parser = parse_backend)]
    backend: Option<BackendKind>,
    /// TOML config file (defaults to `DAM_*` environment variables)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_metaproperty(raw: &str) -> Result<(String, Vec<String>), String> {
    let (id, options) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=OPTION[,OPTION...], got '{raw}'"))?;
    let options: Vec<String> = options
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect();
    if id.trim().is_empty() || options.is_empty() {
        return Err(format!("expected ID=OPTION[,OPTION...], got '{raw}'"));
    }
    Ok((id.trim().to_string(), options))
}

fn parse_backend(raw: &str) -> Result<BackendKind, String> {
    raw.parse()
        .map_err(|_| format!("unknown backend '{raw}', expected 'direct' or 'staged'"))
}

fn build_spec(cli: &Cli) -> Result<UploadRequestSpec, Box<dyn std::error::Error>> {
    let destination = Destination::from_ids(cli.brand_id.clone(), cli.media_id.clone())?;
    let mut spec = UploadRequestSpec::new(cli.file.clone(), destination)?.with_audit(cli.audit);
    if let Some(name) = &cli.name {
        spec = spec.with_filename(name.clone());
    }
    for (id, options) in &cli.metaproperties {
        for option in options {
            spec = spec.with_metaproperty(id.clone(), option.clone());
        }
    }
    Ok(spec)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DamConfig::from_path(path)?,
        None => DamConfig::from_env()?,
    };
    if let Some(backend) = cli.backend {
        config.upload.backend = backend;
    }

    let spec = build_spec(&cli)?;
    let orchestrator = UploadOrchestrator::from_config(&config)?;

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling upload");
            cancel.cancel();
        }
    });

    let bar = IndicatifProgress::bytes_bar(&multi, &format!("Preparing {}", spec.filename()));
    let reference = orchestrator.upload_reporting(&spec, bar).await?;

    match &reference.name {
        Some(name) => println!("{} ({name})", reference.asset_id),
        None => println!("{}", reference.asset_id),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metaproperty_options() {
        assert_eq!(
            parse_metaproperty("mp1=a,b").unwrap(),
            ("mp1".to_string(), vec!["a".to_string(), "b".to_string()])
        );
        assert!(parse_metaproperty("mp1").is_err());
        assert!(parse_metaproperty("mp1=").is_err());
    }

    #[test]
    fn rejects_unknown_backend() {
        assert_eq!(parse_backend("staged").unwrap(), BackendKind::Staged);
        assert!(
            Cli::try_parse_from(["dam-upload", "f.jpg", "--brand-id", "b", "--backend", "s3"])
                .is_err()
        );
    }

    #[test]
    fn brand_and_media_ids_conflict() {
        assert!(
            Cli::try_parse_from(["dam-upload", "f.jpg", "--brand-id", "b", "--media-id", "m"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["dam-upload", "f.jpg"]).is_err());
    }

    #[test]
    fn builds_spec_from_arguments() {
        let cli = Cli::try_parse_from([
            "dam-upload",
            "/data/photo.jpg",
            "--media-id",
            "m-1",
            "--audit",
            "--metaproperty",
            "mp=o1,o2",
            "--backend",
            "direct",
        ])
        .unwrap();
        assert_eq!(cli.backend, Some(BackendKind::Direct));

        let spec = build_spec(&cli).unwrap();
        assert_eq!(spec.filename(), "photo.jpg");
        assert!(spec.audit());
        assert_eq!(spec.metaproperties()["mp"], vec!["o1", "o2"]);
        assert_eq!(
            spec.destination(),
            &Destination::NewVersion {
                media_id: "m-1".to_string()
            }
        );
    }
}
