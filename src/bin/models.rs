//! Model Inspector CLI
//!
//! Loads model definitions, shows the augmented schemas and the queries a
//! link resolution would issue.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use familiar_models::loader;
use familiar_models::{DocumentId, LinkResolver, ModelRegistry, ModelsConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "familiar-models")]
#[command(about = "Inspect document models, their audit fields and reference links")]
struct Cli {
    /// Configuration file (models.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register model definitions and print their fields and references
    Inspect {
        /// Directory of *.json model definitions
        dir: PathBuf,
        /// Print the augmented fields as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the queries that resolve links to a model's documents
    Links {
        /// Directory of *.json model definitions
        dir: PathBuf,
        /// Model whose inbound links are resolved
        #[arg(short, long)]
        model: String,
        /// Document identifier used in the printed filters
        #[arg(long, default_value = "<id>")]
        id: String,
    },

    /// Print the effective configuration
    Config {
        /// Save to this file instead of printing
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ModelsConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Inspect { dir, json } => {
            let registry = load_registry(&config, &dir)?;

            if json {
                let models: serde_json::Map<String, serde_json::Value> = registry
                    .list_schemas()
                    .map(|(name, schema)| {
                        let fields = schema
                            .fields()
                            .iter()
                            .map(|f| serde_json::json!({ "name": f.name, "type": f.field_type, "kind": f.kind }))
                            .collect();
                        (name.to_string(), serde_json::Value::Array(fields))
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&models)?);
                return Ok(());
            }

            println!("📦 {} model(s) registered from {}", registry.len(), dir.display());
            for (name, schema) in registry.list_schemas() {
                let versioning = schema.versioning();
                println!();
                println!("  {} (connection: {})", name, schema.connection());
                if versioning.disabled {
                    println!("    versions: disabled");
                } else {
                    println!("    versions: last {}", versioning.max_versions);
                }
                for field in schema.fields() {
                    match field.kind.target() {
                        Some(target) => println!("    ├─ {} → {}", field.name, target),
                        None => println!("    ├─ {} ({:?})", field.name, field.field_type),
                    }
                }
            }
            Ok(())
        }

        Commands::Links { dir, model, id } => {
            let registry = load_registry(&config, &dir)?;
            registry.get_schema(&model)?;

            let plan = LinkResolver::plan(&model, &DocumentId::from(id), &registry);
            if plan.is_empty() {
                println!("✅ No model references {}", model);
                return Ok(());
            }

            println!("🔍 {} quer{} resolve links to {}:", plan.len(), if plan.len() == 1 { "y" } else { "ies" }, model);
            for query in &plan {
                println!();
                println!("  {} @ {}", query.model, query.connection);
                println!("    paths:  {}", query.paths.join(", "));
                println!("    filter: {}", serde_json::to_string(&query.filter)?);
            }
            Ok(())
        }

        Commands::Config { output } => {
            match output {
                Some(path) => {
                    config.save(&path).with_context(|| format!("writing {}", path))?;
                    println!("✅ Configuration saved to {}", path);
                }
                None => print!("{}", toml::to_string_pretty(&config)?),
            }
            Ok(())
        }
    }
}

fn load_registry(config: &ModelsConfig, dir: &std::path::Path) -> anyhow::Result<ModelRegistry> {
    let mut registry = ModelRegistry::from_config(config);
    loader::register_directory(&mut registry, dir)
        .with_context(|| format!("loading models from {}", dir.display()))?;
    Ok(registry)
}
