//! Model runner - main entry point

use clap::Parser;
use model_runner::cli::{cmd_cv, cmd_grid_search, cmd_predict, cmd_run, cmd_stack, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "model_runner=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { common, defaults } => cmd_run(&common, defaults)?,
        Commands::Cv { common, folds, defaults, output } => cmd_cv(&common, folds, defaults, output.as_deref())?,
        Commands::GridSearch { common, folds } => cmd_grid_search(&common, folds)?,
        Commands::Stack { common, test, folds, month, refit, output_dir } => {
            cmd_stack(&common, &test, folds, month, refit, &output_dir)?
        }
        Commands::Predict { common, test, month, output } => {
            cmd_predict(&common, &test, month, output.as_deref())?
        }
    }

    Ok(())
}
