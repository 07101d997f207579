//! Command-line interface definitions for Variant Digest.
//!
//! This module defines the CLI arguments and subcommands using the `clap` crate.
//! The settings file can be provided via flag or environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the Variant Digest application.
///
/// # Examples
///
/// ```sh
/// # Scrape once and save the snapshot
/// variant_digest scrape
///
/// # Print the report from the last snapshot
/// variant_digest report
///
/// # Scrape, render and publish every 24 hours
/// variant_digest --config digest.yaml run
///
/// # Same, but print everything instead of posting it
/// variant_digest --dry-run run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML settings file
    #[arg(short, long, env = "VARIANT_DIGEST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Print channel messages to stdout instead of posting them
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Scrape all variant counts once and save the snapshot
    Scrape,
    /// Print the disclaimer and per-country report
    Report {
        /// Scrape first instead of reading the snapshot
        #[arg(long)]
        fresh: bool,
    },
    /// Fetch and render the classification tables
    Tables,
    /// Purge the channel and publish report and tables once
    Publish {
        /// Scrape first instead of reading the snapshot
        #[arg(long)]
        fresh: bool,
    },
    /// Scrape and publish on a fixed interval until interrupted
    Run,
}
