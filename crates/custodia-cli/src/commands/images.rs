//! The `custodia images` subcommand.
//!
//! Extracts images from a resource file the way the engine would — default
//! Pod walk or rule-declared extractors — and reports which of them each
//! rule's patterns select.

use std::path::PathBuf;
use std::process;

use clap::Args;
use color_eyre::eyre::{Result, WrapErr};

use custodia_engine::context::PolicyContext;
use custodia_engine::matcher;
use custodia_policy::rule::Policy;

/// Arguments for `custodia images`.
#[derive(Args)]
pub struct ImagesArgs {
    /// Path to the resource JSON file (e.g. a Pod manifest).
    pub resource: PathBuf,

    /// Path to the policy JSON file.
    #[arg(long, value_name = "PATH")]
    pub policy: PathBuf,

    /// Output results as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the images command.
pub fn execute(args: &ImagesArgs) -> Result<()> {
    let resource: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&args.resource)
            .wrap_err_with(|| format!("reading {}", args.resource.display()))?,
    )?;
    let policy: Policy = serde_json::from_str(
        &std::fs::read_to_string(&args.policy)
            .wrap_err_with(|| format!("reading {}", args.policy.display()))?,
    )?;

    let pctx = PolicyContext::new(resource);
    let mut report = Vec::new();
    let mut any_matched = false;

    for rule in &policy.rules {
        if rule.verify_images.is_empty() {
            continue;
        }
        let images = match &rule.image_extractors {
            Some(configs) => pctx.custom_image_info(configs)?,
            None => pctx.image_info()?,
        };
        let (matched, patterns) = matcher::matching_images(&images, rule);
        any_matched |= !matched.is_empty();
        report.push((rule.name.clone(), patterns, matched));
    }

    if args.json {
        let json_report: Vec<_> = report
            .iter()
            .map(|(rule, patterns, matched)| {
                serde_json::json!({
                    "rule": rule,
                    "patterns": patterns,
                    "images": matched,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json_report)?);
    } else {
        for (rule, patterns, matched) in &report {
            println!("rule {rule} (patterns: {patterns})");
            if matched.is_empty() {
                println!("  no matching images");
            }
            for info in matched {
                println!("  {} at {}", info.reference(), info.pointer);
            }
        }
    }

    if !any_matched {
        process::exit(1);
    }
    Ok(())
}
