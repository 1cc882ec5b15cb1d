use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crucible_common::{ExecutionRequest, Language};
use crucible_engine::{Engine, SandboxConfigManager, WorkspaceRoot};
use std::path::PathBuf;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "crucible")]
#[command(about = "Run untrusted test suites in a resource-bounded sandbox", long_about = None)]
struct Cli {
    /// Path to languages.json (defaults to config/languages.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a source/test pair and print the JSON result
    Run {
        /// Language name (python, javascript, typescript)
        #[arg(short, long)]
        language: String,

        /// Path to the source file
        source: PathBuf,

        /// Path to the test file
        test: PathBuf,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// List configured languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SandboxConfigManager::load(path)?,
        None => SandboxConfigManager::load_default().unwrap_or_else(|e| {
            warn!("config/languages.json not loaded ({}), using built-in defaults", e);
            SandboxConfigManager::builtin()
        }),
    };

    match cli.command {
        Commands::Run {
            language,
            source,
            test,
            pretty,
        } => {
            let Some(language) = Language::from_str(&language) else {
                error!("Invalid language: {}", language);
                error!("Valid options: python, javascript, typescript");
                std::process::exit(1);
            };

            let source_code = std::fs::read_to_string(&source)
                .with_context(|| format!("reading {}", source.display()))?;
            let test_code = std::fs::read_to_string(&test)
                .with_context(|| format!("reading {}", test.display()))?;

            let engine = Engine::new(config, WorkspaceRoot::default_root())?;
            let request = ExecutionRequest {
                language,
                source_code,
                test_code,
            };

            let result = engine.execute(&request).await;

            let rendered = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{}", rendered);

            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Languages => {
            let mut languages = config.list_languages();
            languages.sort();
            for language in languages {
                println!("{}", language);
            }
        }
    }

    Ok(())
}
