//! The `custodia lint` subcommand.
//!
//! Parses a policy file, normalizes legacy clauses, and reports
//! structural problems before the policy reaches the cluster.

use std::path::PathBuf;
use std::process;

use clap::Args;
use color_eyre::eyre::{Result, WrapErr};

use custodia_policy::rule::Policy;

/// Arguments for `custodia lint`.
#[derive(Args)]
pub struct LintArgs {
    /// Path to the policy JSON file.
    pub policy: PathBuf,
}

/// Execute the lint command.
pub fn execute(args: &LintArgs) -> Result<()> {
    let data = std::fs::read_to_string(&args.policy)
        .wrap_err_with(|| format!("reading {}", args.policy.display()))?;

    let policy = match Policy::from_json(&data) {
        Ok(policy) => policy,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    if let Err(err) = policy.validate() {
        eprintln!("policy is invalid: {err}");
        process::exit(1);
    }

    let rules = policy.rules.len();
    let clauses: usize = policy.rules.iter().map(|r| r.verify_images.len()).sum();
    println!("policy `{}` is valid: {rules} rule(s), {clauses} verification clause(s)", policy.name);
    Ok(())
}
