mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::fs;
use std::path::{Path, PathBuf};
use stylecomp_core::{Composer, Theme, emitter, loader};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Build {
            inputs,
            output,
            theme,
        } => {
            let composer = compose(&inputs, theme.as_deref())?;
            let css = emitter::emit_css(&composer);
            match output {
                Some(path) => {
                    fs::write(&path, css)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(output = %path.display(), "wrote css");
                }
                None => print!("{css}"),
            }
        }
        Commands::Resolve {
            inputs,
            selector,
            width,
            theme,
            json,
        } => {
            let composer = compose(&inputs, theme.as_deref())?;
            let styles = composer.resolve(&selector, width);
            if json {
                println!("{}", serde_json::to_string_pretty(&styles)?);
            } else {
                for (property, value) in &styles {
                    println!("{property}: {value}");
                }
            }
        }
    }
    Ok(())
}

fn compose(inputs: &[PathBuf], theme: Option<&Path>) -> Result<Composer> {
    let theme = load_theme(theme)?;
    let sheet = loader::load_stylesheet(inputs).context("failed to load stylesheets")?;
    Composer::new(&sheet, &theme).context("failed to compose stylesheets")
}

fn load_theme(path: Option<&Path>) -> Result<Theme> {
    let Some(path) = path else {
        return Ok(Theme::default());
    };
    let theme = if path.is_dir() {
        Theme::load_from_dir(path)
    } else {
        Theme::load(path)
    };
    theme.with_context(|| format!("failed to load theme from {}", path.display()))
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
