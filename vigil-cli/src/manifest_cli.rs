//! Integrity manifest commands: generate, verify, show

use anyhow::{Context as _, Result};
use clap::Parser;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use vigil_core::trust::{IntegrityChecker, IntegrityManifest, IntegrityStatus};

use crate::Context;

#[derive(Parser, Debug)]
pub enum ManifestCommand {
    /// Hash the critical files and write a signed manifest
    Generate {
        /// Release version recorded in the manifest
        #[clap(long, default_value = "1.0.0")]
        version: String,

        /// Files to cover, relative to the deploy root (default: configured list)
        #[clap(long, value_delimiter = ',')]
        files: Vec<String>,

        /// Output path (default: configured manifest path)
        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Check the deployment against the manifest
    Verify {
        /// List every covered file, not just failures
        #[clap(long)]
        verbose: bool,
    },

    /// Print the manifest contents
    Show,
}

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "File")]
    path: String,
    #[tabled(rename = "SHA-256")]
    digest: String,
}

impl ManifestCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        match self {
            ManifestCommand::Generate {
                version,
                files,
                output,
            } => generate(ctx, version, files, output.clone()),
            ManifestCommand::Verify { verbose } => verify(ctx, *verbose),
            ManifestCommand::Show => show(ctx),
        }
    }
}

fn generate(ctx: &Context, version: &str, files: &[String], output: Option<PathBuf>) -> Result<()> {
    let config = &ctx.config;
    let files = if files.is_empty() {
        config.manifest_files.as_slice()
    } else {
        files
    };
    let output = output.unwrap_or_else(|| config.manifest_path());

    let built =
        IntegrityManifest::build(&config.deploy_root, files, &config.signing_secret, version);
    built
        .manifest
        .save(&output)
        .with_context(|| format!("Failed to save manifest to {}", output.display()))?;

    if ctx.json {
        return ctx.print_json(&built.manifest);
    }

    println!(
        "✅ Manifest for version {} written to {}",
        version,
        output.display()
    );
    println!("   {} files covered", built.manifest.len());
    for skipped in &built.skipped {
        println!("⚠️  Skipped {skipped} (not found or unreadable)");
    }
    if config.insecure_defaults().contains(&"VIGIL_SIGNING_SECRET") {
        println!("⚠️  Signed with the development secret; set VIGIL_SIGNING_SECRET for releases");
    }
    Ok(())
}

fn verify(ctx: &Context, verbose: bool) -> Result<()> {
    let config = &ctx.config;
    let checker = IntegrityChecker::new(&config.deploy_root, config.signing_secret.clone());
    let report = checker.check_file(&config.manifest_path());

    if ctx.json {
        ctx.print_json(&report)?;
    } else {
        match report.status {
            IntegrityStatus::Verified => println!("✅ {}", report.reason),
            IntegrityStatus::Unverifiable => println!("⚠️  {}", report.reason),
            IntegrityStatus::FilesModified | IntegrityStatus::ManifestTampered => {
                println!("❌ {}", report.reason);
                for file in &report.modified_files {
                    println!("   modified: {file}");
                }
                for file in &report.missing_files {
                    println!("   missing:  {file}");
                }
            }
        }
        if verbose && report.status == IntegrityStatus::Verified {
            if let Ok(manifest) = IntegrityManifest::load(&config.manifest_path()) {
                for path in manifest.files.keys() {
                    println!("   ok: {path}");
                }
            }
        }
    }

    if report.is_tampered() {
        anyhow::bail!("Integrity verification failed");
    }
    Ok(())
}

fn show(ctx: &Context) -> Result<()> {
    let path = ctx.config.manifest_path();
    let manifest = IntegrityManifest::load(&path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;

    if ctx.json {
        return ctx.print_json(&manifest);
    }

    println!("Version:   {}", manifest.version);
    println!("Generated: {}", manifest.generated_at);
    println!(
        "Signature: {}",
        if manifest.verify_signature(&ctx.config.signing_secret) {
            "valid"
        } else {
            "INVALID"
        }
    );

    let rows: Vec<FileRow> = manifest
        .files
        .iter()
        .map(|(path, digest)| FileRow {
            path: path.clone(),
            digest: digest.clone(),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    Ok(())
}
