use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stylecomp")]
#[command(about = "Compose SCSS-style sheets into flat, per-breakpoint CSS")]
pub struct Cli {
    /// Log composition details (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compose the inputs and write plain CSS.
    Build {
        /// Entry stylesheets; later files override earlier ones.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Theme JSON file or directory of JSON files.
        #[arg(short, long)]
        theme: Option<PathBuf>,
    },
    /// Print the properties a selector receives at a viewport width.
    Resolve {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        selector: String,
        #[arg(short, long)]
        width: u32,
        #[arg(short, long)]
        theme: Option<PathBuf>,
        /// Print a JSON object instead of `property: value` lines.
        #[arg(long)]
        json: bool,
    },
}
