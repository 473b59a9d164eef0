//! Sweeten - hygienic macro expander for a JavaScript-like language
//!
//! # Usage
//!
//! ```bash
//! # Expand a program and print the output tree as JSON
//! sweeten expand main.js
//!
//! # Keep source locations and show fresh names instead of placeholders
//! sweeten expand --locations --fresh-names main.js
//!
//! # Expand, run the phase-0 code and print the globals it leaves behind
//! sweeten eval main.js
//! ```
//!
//! Imports are resolved relative to the directory of the entry file.

use clap::{Parser, Subcommand, ValueEnum};
use diagnostics::ErrorFormatter;
use expander::{logging, ExpandError, Expander, ExpanderConfig, FsLoader, NameRendering};
use log::debug;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "sweeten")]
#[command(version = "0.1.0")]
#[command(about = "Sweeten - hygienic macro expander", long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG wins when unset
    #[arg(long, global = true)]
    log: Option<log::LevelFilter>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a program and print the result
    Expand {
        /// Path to the entry program
        file: PathBuf,

        /// Fill `loc` on every output node
        #[arg(long)]
        locations: bool,

        /// Render renamed bindings with their fresh names
        #[arg(long)]
        fresh_names: bool,

        /// Expander configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },

    /// Expand a program and evaluate its runtime code
    Eval {
        /// Path to the entry program
        file: PathBuf,

        /// Expander configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// The output tree
    Json,
    /// Expansion statistics and macro origins
    Summary,
}

fn main() {
    let cli = Cli::parse();
    match cli.log {
        Some(level) => logging::init_with_level(level),
        None => logging::init_from_env(),
    }

    let result = match cli.command {
        Commands::Expand {
            file,
            locations,
            fresh_names,
            config,
            format,
        } => load_config(config.as_deref()).and_then(|mut config| {
            config.track_locations |= locations;
            if fresh_names {
                config.names = NameRendering::Fresh;
            }
            expand_file(&file, config, format)
        }),
        Commands::Eval { file, config } => {
            load_config(config.as_deref()).and_then(|config| eval_file(&file, config))
        }
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<ExpanderConfig, String> {
    match path {
        Some(path) => ExpanderConfig::from_file(path).map_err(|e| format!("Error: {}", e)),
        None => Ok(ExpanderConfig::default()),
    }
}

/// Read the entry program and build an expander rooted at its directory
fn prepare(file: &Path, config: ExpanderConfig) -> Result<(Expander, String), String> {
    let source = std::fs::read_to_string(file)
        .map_err(|e| format!("Error: cannot read {}: {}", file.display(), e))?;
    let root = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    debug!("resolving imports of {} from {}", file.display(), root.display());
    Ok((Expander::with_config(Box::new(FsLoader::new(root)), config), source))
}

fn report(expander: &Expander, error: &ExpandError) -> String {
    ErrorFormatter::new().format_diagnostic(&error.to_diagnostic(), expander.source_map())
}

fn expand_file(file: &Path, config: ExpanderConfig, format: OutputFormat) -> Result<(), String> {
    let (mut expander, source) = prepare(file, config)?;
    let result = expander
        .expand(&source)
        .map_err(|e| report(&expander, &e))?;

    let formatter = ErrorFormatter::new();
    for diagnostic in &result.diagnostics {
        eprintln!("{}", formatter.format_diagnostic(diagnostic, expander.source_map()));
    }

    match format {
        OutputFormat::Json => {
            let json = result.to_json().map_err(|e| format!("Error: {}", e))?;
            println!("{}", json);
        }
        OutputFormat::Summary => {
            let summary = serde_json::to_string_pretty(&expander.summary())
                .map_err(|e| format!("Error: {}", e))?;
            println!("{}", summary);
            for origin in &result.expansion_origins {
                println!(
                    "{} at {}:{}",
                    origin.macro_name, origin.call_site.start.line, origin.call_site.start.column
                );
            }
        }
    }
    Ok(())
}

fn eval_file(file: &Path, config: ExpanderConfig) -> Result<(), String> {
    let (mut expander, source) = prepare(file, config)?;
    let env = expander
        .evaluate(&source)
        .map_err(|e| report(&expander, &e))?;
    for name in env.visible_names() {
        if let Some(value) = env.get(&name) {
            println!("{} = {}", name, value);
        }
    }
    Ok(())
}
