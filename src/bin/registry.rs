//! Schema Registry CLI
//!
//! Discover, resolve and validate component schemas from the command line.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use component_schemas::{
    BuildOptions, FormatGuard, SchemaConfig, SchemaError, SchemaRegistry, Verdict,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-registry")]
#[command(about = "Discover, compose and validate component schemas")]
struct Cli {
    /// Component root to scan (repeatable)
    #[arg(short, long = "root", global = true)]
    roots: Vec<PathBuf>,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan component roots and list what was registered
    Discover,

    /// Print a schema after merging its extensions
    Resolve {
        name: String,
        /// Print the merged document instead of the compiled one
        #[arg(long)]
        raw: bool,
    },

    /// Validate a JSON instance against a schema
    Validate {
        name: String,
        instance: PathBuf,
    },

    /// Fuzzy search over registered schema names
    Search {
        query: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show how a format pattern would be installed
    CheckFormat { name: String, pattern: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        #[arg(default_value = "schemas.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SchemaConfig> {
    let path = path.map(|p| p.to_string_lossy().into_owned());
    SchemaConfig::load_from(path.as_deref()).context("loading configuration")
}

async fn start_registry(cli: &Cli) -> anyhow::Result<SchemaRegistry> {
    let registry = SchemaRegistry::default();
    let config_path = cli.config.clone();
    let report = registry
        .start(&cli.roots, async move { load_config(config_path.as_ref()) })
        .await;

    for failure in &report.failures {
        eprintln!("  ❌ {} - {}", failure.path.display(), failure.error);
    }
    Ok(registry)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Discover => {
            println!("🔍 Discovering schemas...");
            let registry = start_registry(&cli).await?;

            for name in registry.names() {
                let source = registry
                    .source_of(&name)
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                let extensions = registry.extensions_of(&name).unwrap_or_default();
                if extensions.is_empty() {
                    println!("  ✅ {} ({})", name, source);
                } else {
                    println!("  ✅ {} ({}) + {}", name, source, extensions.join(", "));
                }
            }

            let pending = registry.pending_extensions();
            if !pending.is_empty() {
                println!();
                println!("⏳ Waiting for patch sources:");
                for (source, extensions) in pending {
                    println!("  {} <- {}", source, extensions.join(", "));
                }
            }

            println!();
            println!("📊 {} schemas registered", registry.len());
            Ok(())
        }

        Commands::Resolve { name, raw } => {
            let registry = start_registry(&cli).await?;
            let options = if *raw {
                BuildOptions::raw()
            } else {
                BuildOptions::default()
            };

            match registry.resolve(name, options) {
                Ok(resolved) => {
                    println!("{}", serde_json::to_string_pretty(resolved.document())?);
                    Ok(())
                }
                Err(e @ SchemaError::NotFound { .. }) => {
                    let suggestions = registry.search(name, 3);
                    if !suggestions.is_empty() {
                        eprintln!("Did you mean:");
                        for hit in suggestions {
                            eprintln!("  - {}", hit.name);
                        }
                    }
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            }
        }

        Commands::Validate { name, instance } => {
            let registry = start_registry(&cli).await?;
            let content = std::fs::read_to_string(instance)
                .with_context(|| format!("reading {}", instance.display()))?;
            let value: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", instance.display()))?;

            match registry.validate(name, &value) {
                Ok(()) => {
                    println!("✅ {} is valid against {}", instance.display(), name);
                    Ok(())
                }
                Err(SchemaError::ValidationFailed { errors }) => {
                    println!("❌ {} is invalid against {}", instance.display(), name);
                    for error in &errors {
                        println!("  - {}", error);
                    }
                    bail!("{} validation errors", errors.len())
                }
                Err(e) => Err(e.into()),
            }
        }

        Commands::Search { query, limit } => {
            let registry = start_registry(&cli).await?;
            let hits = registry.search(query, *limit);
            if hits.is_empty() {
                println!("No schemas matching '{}'", query);
            }
            for hit in hits {
                println!("  {:>4}  {}", hit.score, hit.name);
            }
            Ok(())
        }

        Commands::CheckFormat { name, pattern } => {
            let format = FormatGuard::new().check(name, pattern);
            match &format.verdict {
                Verdict::Safe => println!("✅ {} accepted: {}", name, format.installed),
                Verdict::Unsafe { reason } => {
                    println!("⚠️  {} rejected: {}", name, reason);
                    println!("   installed as: {}", format.installed);
                }
            }
            Ok(())
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config(cli.config.as_ref())?;
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Init { path } => {
                if path.exists() {
                    bail!("{} already exists", path.display());
                }
                SchemaConfig::default()
                    .save(&path.to_string_lossy())
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("✅ Wrote {}", path.display());
                Ok(())
            }
        },
    }
}
