//! The `mandark verify` subcommand.
//!
//! Validates image references against a policy file and reports, per
//! image, the authorities that matched and the classified errors.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::{Result, WrapErr, bail};
use mandark_offline::{OfflineVerifier, SignatureStore};
use mandark_policy::verify::all_passed;
use mandark_policy::{ImageReport, ImageVerdict, UnsupportedEvaluator, Validator, ValidatorConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config;

/// Arguments for `mandark verify`.
#[derive(Args)]
pub struct VerifyArgs {
    /// Image references to verify (in addition to any image reference file).
    #[arg(value_name = "IMAGE")]
    pub images: Vec<String>,

    /// Policy file (ClusterImagePolicy YAML).
    #[arg(short, long, value_name = "PATH", default_value = "policy.yaml")]
    pub policy_file: PathBuf,

    /// YAML file listing image references under `imageReferences`.
    #[arg(short, long, value_name = "PATH")]
    pub image_reference_file: Option<PathBuf>,

    /// Offline signature store to verify against.
    #[arg(short, long, value_name = "PATH")]
    pub signature_store: Option<PathBuf>,

    /// Deadline for validating each image (e.g. `30s`, `2m`).
    #[arg(long, value_name = "DURATION", default_value = "30s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Output results as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the verify command.
pub async fn execute(args: VerifyArgs) -> Result<()> {
    let policy = config::load_policy(&args.policy_file)?;

    let mut images = match &args.image_reference_file {
        Some(path) => config::load_images(path)?,
        None => Vec::new(),
    };
    images.extend(config::parse_images(&args.images)?);
    if images.is_empty() {
        bail!("either an image reference file or image reference argument(s) must be given");
    }

    let store = match &args.signature_store {
        Some(path) => SignatureStore::from_file(path).wrap_err("failed to load signature store")?,
        None => {
            info!("no signature store given; only static authorities can match");
            SignatureStore::new()
        }
    };

    info!(
        policy = %args.policy_file.display(),
        images = images.len(),
        authorities = policy.authorities().len(),
        "verifying image references"
    );

    let validator = Validator::new(
        OfflineVerifier::new(store),
        UnsupportedEvaluator,
        ValidatorConfig {
            timeout: args.timeout,
        },
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling outstanding checks");
            interrupt.cancel();
        }
    });

    let reports = validator.verify_images(&policy, &images, &cancel).await;
    watcher.abort();
    let passed = all_passed(&reports);

    if args.json {
        let json_report = serde_json::json!({
            "passed": passed,
            "policy": policy.name(),
            "images": reports,
        });
        println!("{}", serde_json::to_string_pretty(&json_report)?);
    } else {
        for report in &reports {
            print_report(report);
        }

        println!();
        if passed {
            println!("Verification PASSED");
        } else {
            println!("Verification FAILED");
        }
    }

    if !passed {
        process::exit(1);
    }

    Ok(())
}

fn print_report(report: &ImageReport) {
    let icon = match report.verdict {
        ImageVerdict::Passed => "PASS",
        ImageVerdict::Failed => "FAIL",
        ImageVerdict::Skipped => "SKIP",
    };
    match &report.result {
        Some(result) => {
            let matched: Vec<_> = result.authorities().collect();
            println!("[{icon}] {} (matched: {})", report.image, matched.join(", "));
        }
        None if report.verdict == ImageVerdict::Skipped => {
            println!("[{icon}] {} (not covered by policy)", report.image);
        }
        None => println!("[{icon}] {}", report.image),
    }

    let buckets = [
        ("error", &report.errors.errors),
        ("warning", &report.errors.warnings),
        ("other", &report.errors.other),
    ];
    for (label, messages) in buckets {
        for message in messages {
            println!("       {label}: {}", message.replace('\n', "\n         "));
        }
    }
}
