//! License commands

use anyhow::Result;
use clap::Parser;

use vigil_core::license::{generate_license_key, keygen::DEFAULT_EXPIRY};

use crate::Context;

#[derive(Parser, Debug)]
pub enum LicenseCommand {
    /// Run the validation chain (remote, local table, grace period)
    Validate {
        /// Key to validate (default: the configured license key)
        key: Option<String>,
    },

    /// Issue a key for an institution (vendor side)
    Generate {
        institution: String,

        /// Expiry date, YYYY-MM-DD
        #[clap(default_value = DEFAULT_EXPIRY)]
        expiry: String,
    },
}

impl LicenseCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        match self {
            LicenseCommand::Validate { key } => validate(ctx, key.as_deref()).await,
            LicenseCommand::Generate {
                institution,
                expiry,
            } => generate(ctx, institution, expiry),
        }
    }
}

async fn validate(ctx: &Context, key: Option<&str>) -> Result<()> {
    let plane = ctx.plane()?;
    let key = key.unwrap_or(&ctx.config.license_key);
    let outcome = plane.license().validate(key).await;

    if ctx.json {
        ctx.print_json(&outcome)?;
    } else {
        println!("🔍 Testing license: {key}");
        println!("   Valid:       {}", outcome.is_valid());
        println!("   Status:      {}", outcome.status);
        println!(
            "   Institution: {}",
            outcome.institution.as_deref().unwrap_or("-")
        );
        println!("   Message:     {}", outcome.message);
    }

    if !outcome.is_valid() {
        anyhow::bail!("License is not valid");
    }
    Ok(())
}

fn generate(ctx: &Context, institution: &str, expiry: &str) -> Result<()> {
    chrono::NaiveDate::parse_from_str(expiry, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid expiry date '{expiry}' (expected YYYY-MM-DD)"))?;

    let license = generate_license_key(institution, expiry, &ctx.config.license_salt);

    if ctx.json {
        return ctx.print_json(&license);
    }

    println!("🔑 Generated license key:");
    println!("   Key:         {}", license.license_key);
    println!("   Institution: {}", license.institution);
    println!("   Expires:     {}", license.expires);
    if ctx.config.insecure_defaults().contains(&"VIGIL_LICENSE_SALT") {
        println!("⚠️  Generated with the development salt; set VIGIL_LICENSE_SALT");
    }
    Ok(())
}
