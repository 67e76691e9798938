//! Callisto CLI - headless driver for the script-execution kernel.

mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "callisto")]
#[command(about = "Incremental script-execution kernel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script's cells through the kernel, printing events as JSON lines
    Run {
        /// Path to the script (cells separated by `// %%` lines)
        script: String,
    },

    /// Classify each cell's completeness without evaluating anything
    Check {
        /// Path to the script (cells separated by `// %%` lines)
        script: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let failed = match cli.command {
        Commands::Run { script } => run::execute(&script, false).await?,
        Commands::Check { script } => run::execute(&script, true).await?,
    };

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
