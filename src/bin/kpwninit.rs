// src/bin/kpwninit.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use kpwninit::{
    CancellationToken,
    cli::Cli,
    core::{files, reporter::Reporter, runfile::Runfile},
    system::prober,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// The main entry point. Sets up logging, parses arguments, runs the pipeline
/// and performs centralized error handling: fatal errors print one red line
/// and exit non-zero, recoverable ones were already reported where they hit.
fn main() {
    env_logger::init();
    let cancellation_token: CancellationToken = Arc::new(AtomicBool::new(false));

    if let Err(e) = run_cli(Cli::parse(), &cancellation_token) {
        eprintln!("\n{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli, cancellation_token: &CancellationToken) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);
    let reporter = Reporter::new(cli.verbose);

    if cli.clean {
        return files::cleanup_files(&reporter);
    }

    let runfile = Runfile::discover(
        expand_path(cli.runfile.as_deref()),
        expand_path(cli.cpio.as_deref()),
        expand_path(cli.bz_image.as_deref()),
        &reporter,
    )?;
    for finding in runfile.analyze() {
        reporter.finding(&finding);
    }

    let extraction = files::create_files(
        &runfile,
        cli.no_files,
        cli.no_vmlinux,
        &reporter,
        cancellation_token,
    )?;

    // A guest that never comes up only costs us the probing, not the files
    // generated above.
    if let Err(e) = prober::run_unintended_checks(&runfile, &reporter) {
        reporter.error(format!("Unintended checks failed due to {e}"));
    }

    if let Some(handle) = extraction {
        // vmlinux extraction may still be running; join instead of tearing the
        // process down underneath it.
        if handle.join().is_err() {
            reporter.error("vmlinux extraction thread panicked");
        }
    }
    Ok(())
}

fn expand_path(path: Option<&str>) -> Option<PathBuf> {
    path.map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
}
