//! # hubroot
//!
//! Pulls an image from a registry, assembles its root filesystem, and runs
//! one command confined to it. Exits with the command's exit code.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use hubroot_common::constants::PIPELINE_FAILURE_EXIT_CODE;

use crate::commands::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match commands::execute(cli) {
        Ok(code) => code,
        Err(e) => {
            output::report_failure(&format!("{e:#}"));
            ExitCode::from(PIPELINE_FAILURE_EXIT_CODE)
        }
    }
}

/// Logs go to stderr so the command's stdout stays untouched.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
