//! Exhaustive grid search scored by K-fold cross-validation
//!
//! Every combination of the grid is fitted once per fold, without sample
//! weights, and scored in greater-is-better form. Candidates are ranked by mean
//! fold score.

use super::cross_validation::{CVResults, KFold};
use super::{ModelRegistry, ModelType};
use crate::config::{HyperParams, ParamGrid};
use crate::error::{Result, RunnerError};
use crate::metrics::Metric;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cross-validated score of one parameter combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    pub params: HyperParams,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    /// 1 is best; tied means share a rank
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSearchResult {
    /// Candidates in grid order
    pub candidates: Vec<CandidateResult>,
    pub best_params: HyperParams,
    pub best_score: f64,
    pub elapsed: Duration,
}

impl GridSearchResult {
    /// The rank-1 candidate
    pub fn best(&self) -> Option<&CandidateResult> {
        self.candidates.iter().find(|c| c.rank == 1)
    }
}

/// Exhaustive search over a [`ParamGrid`] for one model type
#[derive(Debug, Clone)]
pub struct GridSearch {
    model_type: ModelType,
    grid: ParamGrid,
    metric: Metric,
    kfold: KFold,
}

impl GridSearch {
    pub fn new(model_type: ModelType, grid: ParamGrid, metric: Metric, kfold: KFold) -> Self {
        Self {
            model_type,
            grid,
            metric,
            kfold,
        }
    }

    /// Number of fits the search will run
    pub fn n_fits(&self) -> usize {
        self.grid.n_combinations() * self.kfold.n_splits
    }

    pub fn fit(&self, registry: &ModelRegistry, x: &Array2<f64>, y: &Array1<f64>) -> Result<GridSearchResult> {
        if x.nrows() != y.len() {
            return Err(RunnerError::length_mismatch(x.nrows(), y.len()));
        }
        let start = Instant::now();
        let combinations = self.grid.combinations()?;
        let splits = self.kfold.split(x.nrows())?;

        info!(
            model = %self.model_type,
            candidates = combinations.len(),
            folds = splits.len(),
            "Starting grid search"
        );

        let mut candidates = Vec::with_capacity(combinations.len());
        for params in combinations {
            let mut fold_scores = Vec::with_capacity(splits.len());
            for split in &splits {
                let x_train = x.select(Axis(0), &split.train_indices);
                let y_train = y.select(Axis(0), &split.train_indices);
                let x_test = x.select(Axis(0), &split.test_indices);
                let y_test = y.select(Axis(0), &split.test_indices);

                let mut model = registry.create(self.model_type, &params)?;
                model.fit(&x_train, &y_train, None)?;
                let preds = model.predict(&x_test)?.insert_axis(Axis(1));
                fold_scores.push(self.metric.score(&y_test, preds.view())?);
            }

            let summary = CVResults::from_scores(fold_scores);
            debug!(params = %params, mean = summary.mean_score, std = summary.std_score, "Candidate scored");
            candidates.push(CandidateResult {
                params,
                fold_scores: summary.scores,
                mean_score: summary.mean_score,
                std_score: summary.std_score,
                rank: 0,
            });
        }

        assign_ranks(&mut candidates);
        let best = candidates
            .iter()
            .find(|c| c.rank == 1)
            .ok_or_else(|| RunnerError::ValidationError("grid search produced no candidates".to_string()))?;
        let best_params = best.params.clone();
        let best_score = best.mean_score;
        let elapsed = start.elapsed();

        info!("Best parameters: {}", best_params);
        info!("Best {} score: {:.6}", self.metric, best_score);
        info!("Grid search took {:.2} minutes", elapsed.as_secs_f64() / 60.0);

        Ok(GridSearchResult {
            candidates,
            best_params,
            best_score,
            elapsed,
        })
    }
}

/// Rank by descending mean score. NaN means rank last; ties share the lower
/// rank and the first of them in grid order is taken as best.
fn assign_ranks(candidates: &mut [CandidateResult]) {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    let key = |c: &CandidateResult| if c.mean_score.is_nan() { f64::NEG_INFINITY } else { c.mean_score };
    order.sort_by(|&a, &b| key(&candidates[b]).total_cmp(&key(&candidates[a])).then(a.cmp(&b)));

    let mut rank = 0;
    let mut prev: Option<f64> = None;
    for (pos, &idx) in order.iter().enumerate() {
        let score = key(&candidates[idx]);
        if prev != Some(score) {
            rank = pos + 1;
            prev = Some(score);
        }
        candidates[idx].rank = rank;
    }
}
