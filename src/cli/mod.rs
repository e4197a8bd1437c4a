//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "piifilter",
    version,
    about = "Correlates OCR regions with PII terms and publishes the redacted result",
    long_about = "piifilter joins the text regions detected in an image with the PII terms submitted \
                  for it. Both inputs arrive independently on a queue, are held in Redis until the \
                  pair is complete, and the regions that contain no term are published downstream."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/piifilter/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the filter service on the inbound queue
    Serve,

    /// Run the OCR worker that turns images into region sets
    Ocr,

    /// Submit job inputs to the service queues
    Submit {
        #[command(subcommand)]
        action: SubmitAction,
    },

    /// Check connectivity and show queue depths
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SubmitAction {
    /// Submit the PII terms to redact for an image
    Terms {
        /// Job id (a random UUID if omitted)
        #[arg(long)]
        img_id: Option<String>,

        /// Terms to redact
        #[arg(required = true)]
        terms: Vec<String>,
    },

    /// Submit an image for text detection
    Image {
        /// Job id (a random UUID if omitted)
        #[arg(long)]
        img_id: Option<String>,

        /// Path to the image file
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
