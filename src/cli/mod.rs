//! Model runner CLI module
//!
//! Command-line interface for single runs, cross-validation, grid search,
//! stacking features and test-set prediction.

use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::ModelParams;
use crate::data::{FeatureProvider, FeatureSet, PredictionFrame};
use crate::metrics::Metric;
use crate::runner::ModelRunner;
use crate::training::Uniform;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString {
    s.truecolor(100, 100, 100)
}
fn accent(s: &str) -> ColoredString {
    s.truecolor(120, 170, 255)
}
fn muted(s: &str) -> ColoredString {
    s.truecolor(140, 140, 140)
}
fn ok(s: &str) -> ColoredString {
    s.truecolor(100, 210, 120)
}

fn kv(key: &str, val: &str) {
    println!("  {:<16} {}", muted(key), val.white());
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    println!("  {} {}...", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("  {} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "model-runner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fit, evaluate, cross-validate and tune regression models")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Arguments shared by every command
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Training data file (CSV with a header row)
    #[arg(long)]
    pub train: PathBuf,

    /// Target column name
    #[arg(short, long)]
    pub target: String,

    /// Model type (xgb, cat, adaboost, rf, knn, svm, sgd, elas, mlp, extra, lasso, ridge)
    #[arg(short, long)]
    pub model: String,

    /// JSON file with `<model>` and `<model>_grid` entries
    #[arg(short, long)]
    pub config: PathBuf,

    /// Evaluation metric (accuracy, logloss, mae)
    #[arg(long, default_value = "mae")]
    pub metric: String,

    /// Fraction of training rows held out for evaluation
    #[arg(long, default_value = "0.2")]
    pub holdout: f64,

    /// Weight every row equally instead of down-weighting early months
    #[arg(long)]
    pub uniform_weights: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit on the training split and evaluate on the hold-out rows
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Use estimator defaults instead of the configured parameters
        #[arg(long)]
        defaults: bool,
    },

    /// K-fold cross-validation with out-of-fold predictions
    Cv {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of folds
        #[arg(short, long, default_value = "5")]
        folds: usize,

        /// Use estimator defaults instead of the configured parameters
        #[arg(long)]
        defaults: bool,

        /// Write out-of-fold predictions to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Exhaustive search over the `<model>_grid` entry
    GridSearch {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of folds
        #[arg(short, long, default_value = "5")]
        folds: usize,
    },

    /// Out-of-fold train and test meta predictions for a second-stage model
    Stack {
        #[command(flatten)]
        common: CommonArgs,

        /// Unlabelled test data file
        #[arg(long)]
        test: PathBuf,

        /// Number of folds
        #[arg(short, long, default_value = "5")]
        folds: usize,

        /// Restrict test predictions to one month
        #[arg(long)]
        month: Option<u32>,

        /// Refit on all training rows before predicting the test file
        #[arg(long)]
        refit: bool,

        /// Directory for `<model>_train.csv` and `<model>_test.csv`
        #[arg(short, long)]
        output_dir: PathBuf,
    },

    /// Fit on all training rows and predict the test file
    Predict {
        #[command(flatten)]
        common: CommonArgs,

        /// Unlabelled test data file
        #[arg(long)]
        test: PathBuf,

        /// Restrict predictions to one month
        #[arg(long)]
        month: Option<u32>,

        /// Output predictions file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ─── Setup ─────────────────────────────────────────────────────────────────────

fn load_provider(common: &CommonArgs, test: Option<&Path>) -> anyhow::Result<FeatureSet> {
    step_run("Loading data");
    let start = Instant::now();
    let features = FeatureSet::from_csv(&common.train, test, &common.target, common.holdout)?;
    step_done(&format!(
        "{} rows × {} cols in {:?}",
        features.train().nrows(),
        features.train().ncols(),
        start.elapsed()
    ));
    Ok(features)
}

fn build_runner(common: &CommonArgs) -> anyhow::Result<ModelRunner> {
    let params = ModelParams::from_file(&common.config)?;
    let runner = ModelRunner::new(&common.model, params)?;
    Ok(if common.uniform_weights {
        runner.with_weighting(Uniform)
    } else {
        runner
    })
}

fn save_predictions(frame: &PredictionFrame, path: &Path) -> anyhow::Result<()> {
    frame.save_csv(path)?;
    step_ok(&format!("Saved {} predictions → {}", frame.len(), path.display()));
    Ok(())
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_run(common: &CommonArgs, defaults: bool) -> anyhow::Result<()> {
    section("Run");
    let metric: Metric = common.metric.parse()?;
    let features = load_provider(common, None)?;
    let mut runner = build_runner(common)?;

    step_run(&format!("Training {}", common.model.cyan()));
    let start = Instant::now();
    let preds = runner.run_all(&features, metric, !defaults)?;
    step_done(&format!("{} predictions in {:?}", preds.nrows(), start.elapsed()));
    println!();
    Ok(())
}

pub fn cmd_cv(common: &CommonArgs, folds: usize, defaults: bool, output: Option<&Path>) -> anyhow::Result<()> {
    section("Cross-validation");
    let metric: Metric = common.metric.parse()?;
    let features = load_provider(common, None)?;
    let mut runner = build_runner(common)?;

    step_run(&format!("{} folds of {}", folds, common.model.cyan()));
    let start = Instant::now();
    let oof = runner.cross_validation_all(&features, metric, folds, !defaults)?;
    step_done(&format!("{:?}", start.elapsed()));

    if let Some(path) = output {
        save_predictions(&oof, path)?;
    }
    println!();
    Ok(())
}

pub fn cmd_grid_search(common: &CommonArgs, folds: usize) -> anyhow::Result<()> {
    section("Grid search");
    let metric: Metric = common.metric.parse()?;
    let features = load_provider(common, None)?;
    let runner = build_runner(common)?;

    step_run(&format!("Searching {}", common.model.cyan()));
    let result = runner.grid_search_all(&features, metric, folds)?;
    step_done(&format!("{} candidates in {:.2} min", result.candidates.len(), result.elapsed.as_secs_f64() / 60.0));

    println!();
    println!("  {:<6} {:>12} {:>10}  {}", muted("Rank"), muted("Mean"), muted("Std"), muted("Params"));
    println!("  {}", dim(&"─".repeat(56)));
    let mut ranked: Vec<_> = result.candidates.iter().collect();
    ranked.sort_by_key(|c| c.rank);
    for candidate in ranked {
        println!(
            "  {:<6} {:>12.6} {:>10.6}  {}",
            candidate.rank, candidate.mean_score, candidate.std_score, candidate.params
        );
    }

    println!();
    println!("  {} {}", ok("best"), result.best_params.to_string().white().bold());
    kv(&format!("{} score", metric), &format!("{:.6}", result.best_score));
    println!();
    Ok(())
}

pub fn cmd_stack(
    common: &CommonArgs,
    test: &Path,
    folds: usize,
    month: Option<u32>,
    refit: bool,
    output_dir: &Path,
) -> anyhow::Result<()> {
    section("Stacking features");
    let metric: Metric = common.metric.parse()?;
    let mut features = load_provider(common, Some(test))?;
    let mut runner = build_runner(common)?;
    runner.assign_month(&mut features, month);

    step_run(&format!("Building meta features with {}", common.model.cyan()));
    let start = Instant::now();
    let stack = runner.stacking_feature(&features, metric, folds, refit)?;
    step_done(&format!("{:?}", start.elapsed()));

    std::fs::create_dir_all(output_dir)?;
    save_predictions(&stack.train, &output_dir.join(format!("{}_train.csv", runner.model_name())))?;
    save_predictions(&stack.test, &output_dir.join(format!("{}_test.csv", runner.model_name())))?;
    println!();
    Ok(())
}

pub fn cmd_predict(common: &CommonArgs, test: &Path, month: Option<u32>, output: Option<&Path>) -> anyhow::Result<()> {
    section("Predict");
    let mut features = load_provider(common, Some(test))?;
    let mut runner = build_runner(common)?;
    runner.assign_month(&mut features, month);

    step_run(&format!("Fitting {}", common.model.cyan()));
    let start = Instant::now();
    runner.create_fit(&features, true)?;
    let preds = runner.predict_all(&features)?;
    step_done(&format!("{} predictions in {:?}", preds.len(), start.elapsed()));

    match output {
        Some(path) => save_predictions(&preds, path)?,
        None => println!("{}", preds.to_dataframe()?),
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cv_command() {
        let cli = Cli::try_parse_from([
            "model-runner", "cv", "--train", "train.csv", "-t", "y", "-m", "rf", "-c", "params.json", "-f", "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Cv { common, folds, defaults, output } => {
                assert_eq!(common.model, "rf");
                assert_eq!(common.metric, "mae");
                assert_eq!(folds, 3);
                assert!(!defaults);
                assert!(output.is_none());
            }
            _ => panic!("expected cv"),
        }
    }

    #[test]
    fn test_stack_requires_test_file() {
        let parsed = Cli::try_parse_from([
            "model-runner", "stack", "--train", "train.csv", "-t", "y", "-m", "rf", "-c", "params.json", "-o", "out",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_stack_refit_is_opt_in() {
        let args = [
            "model-runner", "stack", "--train", "train.csv", "-t", "y", "-m", "rf", "-c", "params.json", "--test",
            "test.csv", "-o", "out",
        ];
        match Cli::try_parse_from(args).unwrap().command {
            Commands::Stack { refit, .. } => assert!(!refit),
            _ => panic!("expected stack"),
        }
        let with_refit = Cli::try_parse_from(args.iter().copied().chain(["--refit"])).unwrap();
        match with_refit.command {
            Commands::Stack { refit, .. } => assert!(refit),
            _ => panic!("expected stack"),
        }
    }
}
