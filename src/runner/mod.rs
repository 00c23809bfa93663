//! Model runner: dispatch, fit/predict/evaluate sequencing and fold bookkeeping
//!
//! A [`ModelRunner`] is bound to one model type and a [`ModelParams`]
//! configuration. It owns at most one estimator at a time, created through a
//! [`ModelRegistry`] and replaced wholesale by the next `create_model` call.
//! Data is always passed in explicitly; the `*_all` helpers take a
//! [`FeatureProvider`] per call and never keep it.

use crate::config::{HyperParams, ModelParams, RunnerSettings};
use crate::data::{take_targets, FeatureProvider, Frame, PredictionFrame};
use crate::error::{Result, RunnerError};
use crate::metrics::{ConsoleReporter, Metric, MetricReporter};
use crate::training::{
    GridSearch, GridSearchResult, KFold, ModelRegistry, ModelType, MonthThreshold, Regressor, SampleWeighting,
};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle of the runner's estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerState {
    Uninitialized,
    Created,
    Fitted,
}

/// Out-of-fold training predictions and test predictions for a second-stage
/// model
#[derive(Debug, Clone)]
pub struct StackingFeatures {
    pub train: PredictionFrame,
    pub test: PredictionFrame,
}

/// Orchestrates one estimator family over a fit/predict/evaluate cycle
pub struct ModelRunner {
    model_type: ModelType,
    params: ModelParams,
    fixed_params: Option<HyperParams>,
    model: Option<Box<dyn Regressor>>,
    state: RunnerState,
    registry: Arc<ModelRegistry>,
    weighting: Box<dyn SampleWeighting>,
    reporter: Box<dyn MetricReporter>,
    settings: RunnerSettings,
}

impl fmt::Debug for ModelRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRunner")
            .field("model_type", &self.model_type)
            .field("fixed_params", &self.fixed_params)
            .field("state", &self.state)
            .field("weighting", &self.weighting)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ModelRunner {
    /// Create a runner for the model type identifier `model_type`. The
    /// configuration must hold `<model_type>` or `<model_type>_grid`.
    pub fn new(model_type: &str, params: ModelParams) -> Result<Self> {
        Self::from_type(model_type.parse()?, params)
    }

    pub fn from_type(model_type: ModelType, params: ModelParams) -> Result<Self> {
        if params.fixed(model_type).is_none() && params.grid(model_type).is_none() {
            return Err(RunnerError::ConfigError(format!(
                "no '{}' or '{}_grid' entry in the model configuration",
                model_type, model_type
            )));
        }
        let fixed_params = params.fixed(model_type).cloned();
        Ok(Self {
            model_type,
            params,
            fixed_params,
            model: None,
            state: RunnerState::Uninitialized,
            registry: Arc::new(ModelRegistry::default()),
            weighting: Box::new(MonthThreshold::default()),
            reporter: Box::new(ConsoleReporter),
            settings: RunnerSettings::default(),
        })
    }

    /// Builder method to replace the sample weighting strategy
    pub fn with_weighting(mut self, weighting: impl SampleWeighting + 'static) -> Self {
        self.weighting = Box::new(weighting);
        self
    }

    /// Builder method to replace where metric lines go
    pub fn with_reporter(mut self, reporter: impl MetricReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Builder method to use a custom estimator registry
    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    /// The model type identifier
    pub fn model_name(&self) -> &'static str {
        self.model_type.as_str()
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Hyperparameters `create_model(true)` will use
    pub fn fixed_params(&self) -> Option<&HyperParams> {
        self.fixed_params.as_ref()
    }

    pub fn model(&self) -> Option<&dyn Regressor> {
        self.model.as_deref()
    }

    /// Use `params` for subsequent `create_model(true)` calls, typically the
    /// best parameters of a grid search
    pub fn adopt_params(&mut self, params: HyperParams) {
        info!(model = %self.model_type, params = %params, "Adopting parameters");
        self.fixed_params = Some(params);
    }

    fn kfold(&self, k: usize) -> KFold {
        KFold::new(k)
            .with_shuffle(self.settings.shuffle)
            .with_random_state(Some(self.settings.cv_seed))
    }

    /// Instantiate a fresh estimator, with the fixed parameters or with the
    /// estimator defaults
    pub fn create_model(&mut self, use_fixed_params: bool) -> Result<()> {
        let params = if use_fixed_params {
            self.fixed_params.clone().ok_or_else(|| {
                RunnerError::ConfigError(format!(
                    "no fixed parameters for '{}', only a grid is configured",
                    self.model_type
                ))
            })?
        } else {
            HyperParams::new()
        };

        let model = self.registry.create(self.model_type, &params)?;
        debug!(model = %self.model_type, params = %params, "Created model");
        self.model = Some(model);
        self.state = RunnerState::Created;
        Ok(())
    }

    /// Fit the current estimator. Boosted trees track training MAE per round;
    /// every other family is fitted with the runner's sample weights.
    pub fn fit_model(&mut self, x: &Frame, y: &Array1<f64>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(RunnerError::length_mismatch(x.nrows(), y.len()));
        }
        let model = self.model.as_mut().ok_or(RunnerError::ModelNotCreated)?;
        let start = Instant::now();

        if self.model_type == ModelType::XGBoost {
            model.fit_with_eval(x.values(), y, Metric::Mae, true)?;
        } else {
            let weights = self.weighting.weights(x)?;
            debug!(
                down_weighted = weights.iter().filter(|&&w| w < 1.0).count(),
                rows = weights.len(),
                "Computed sample weights"
            );
            model.fit(x.values(), y, Some(&weights))?;
        }

        info!(
            model = %self.model_type,
            rows = x.nrows(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fitted model"
        );
        self.state = RunnerState::Fitted;
        Ok(())
    }

    /// Predictions as an `(n, 1)` column vector
    pub fn predict_model(&self, x_test: &Frame) -> Result<Array2<f64>> {
        let model = self.model.as_ref().ok_or(RunnerError::ModelNotCreated)?;
        if self.state != RunnerState::Fitted {
            return Err(RunnerError::ModelNotFitted);
        }
        Ok(model.predict(x_test.values())?.insert_axis(Axis(1)))
    }

    /// Create, fit, predict and report `metric` on the test rows
    pub fn run(
        &mut self,
        x: &Frame,
        y: &Array1<f64>,
        x_test: &Frame,
        y_test: &Array1<f64>,
        metric: Metric,
        use_fixed_params: bool,
    ) -> Result<Array2<f64>> {
        let preds = self.predict(x, y, x_test, use_fixed_params)?;
        self.evaluate(metric, y_test, preds.view())?;
        Ok(preds)
    }

    /// Create, fit and predict without evaluating
    pub fn predict(
        &mut self,
        x: &Frame,
        y: &Array1<f64>,
        x_test: &Frame,
        use_fixed_params: bool,
    ) -> Result<Array2<f64>> {
        self.create_model(use_fixed_params)?;
        self.fit_model(x, y)?;
        self.predict_model(x_test)
    }

    /// K-fold out-of-fold predictions, indexed and sorted by source row
    pub fn cross_validation(
        &mut self,
        x: &Frame,
        y: &Array1<f64>,
        metric: Metric,
        k: usize,
        use_fixed_params: bool,
    ) -> Result<PredictionFrame> {
        if x.nrows() != y.len() {
            return Err(RunnerError::length_mismatch(x.nrows(), y.len()));
        }
        let splits = self.kfold(k).split(x.nrows())?;
        let mut oof = PredictionFrame::empty(PredictionFrame::column_name(self.model_name()));

        for split in &splits {
            debug!(fold = split.fold_idx, test_rows = split.test_indices.len(), "Running fold");
            let preds = self.run(
                &x.take_rows(&split.train_indices),
                &take_targets(y, &split.train_indices),
                &x.take_rows(&split.test_indices),
                &take_targets(y, &split.test_indices),
                metric,
                use_fixed_params,
            )?;
            oof.append(&split.test_indices, &preds.column(0).to_owned())?;
        }

        oof.sort_index();
        self.reporter.line("Overall performance:");
        let y_oof = take_targets(y, oof.index());
        self.evaluate(metric, &y_oof, oof.to_column_vector().view())?;
        Ok(oof)
    }

    /// Exhaustive search over the `<model_type>_grid` entry of `params`.
    ///
    /// The runner is not modified; pass `best_params` to
    /// [`ModelRunner::adopt_params`] to use them.
    pub fn grid_search(
        &self,
        x: &Frame,
        y: &Array1<f64>,
        metric: Metric,
        k: usize,
        params: &ModelParams,
    ) -> Result<GridSearchResult> {
        let grid = params.grid(self.model_type).ok_or_else(|| {
            RunnerError::ConfigError(format!("no '{}_grid' entry in the model configuration", self.model_type))
        })?;
        GridSearch::new(self.model_type, grid.clone(), metric, self.kfold(k)).fit(&self.registry, x.values(), y)
    }

    /// Compute `metric` and send it to the reporter
    pub fn evaluate(&self, metric: Metric, y_true: &Array1<f64>, y_pred: ArrayView2<'_, f64>) -> Result<f64> {
        let value = metric.compute(y_true, y_pred)?;
        self.reporter.metric(metric, value);
        Ok(value)
    }

    /// Evaluate by metric name. Unknown names are logged and skipped: nothing
    /// is reported and `Ok(None)` is returned.
    pub fn calc_metrics(&self, metric: &str, y_true: &Array1<f64>, y_pred: ArrayView2<'_, f64>) -> Result<Option<f64>> {
        match metric.parse::<Metric>() {
            Ok(metric) => self.evaluate(metric, y_true, y_pred).map(Some),
            Err(RunnerError::UnsupportedMetric(name)) => {
                warn!(metric = %name, "Unsupported metric, nothing reported");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// `run` on the provider's labelled train/hold-out split
    pub fn run_all(
        &mut self,
        provider: &dyn FeatureProvider,
        metric: Metric,
        use_fixed_params: bool,
    ) -> Result<Array2<f64>> {
        self.run(
            provider.x_train(),
            provider.y_train(),
            provider.x_test(),
            provider.y_test(),
            metric,
            use_fixed_params,
        )
    }

    /// Create and fit on the provider's full training set
    pub fn create_fit(&mut self, provider: &dyn FeatureProvider, use_fixed_params: bool) -> Result<()> {
        self.create_model(use_fixed_params)?;
        self.fit_model(provider.train(), provider.target())
    }

    /// Predict the provider's (month-filtered) test rows with the fitted model
    pub fn predict_all(&self, provider: &dyn FeatureProvider) -> Result<PredictionFrame> {
        let (test, positions) = provider.test()?;
        let preds = self.predict_model(&test)?;
        PredictionFrame::new(
            positions,
            PredictionFrame::column_name(self.model_name()),
            preds.column(0).to_owned(),
        )
    }

    /// `cross_validation` on the provider's full training set
    pub fn cross_validation_all(
        &mut self,
        provider: &dyn FeatureProvider,
        metric: Metric,
        k: usize,
        use_fixed_params: bool,
    ) -> Result<PredictionFrame> {
        self.cross_validation(provider.train(), provider.target(), metric, k, use_fixed_params)
    }

    /// `grid_search` on the provider's training split with the runner's own
    /// configuration
    pub fn grid_search_all(&self, provider: &dyn FeatureProvider, metric: Metric, k: usize) -> Result<GridSearchResult> {
        self.grid_search(provider.x_train(), provider.y_train(), metric, k, &self.params)
    }

    pub fn assign_month(&self, provider: &mut dyn FeatureProvider, month: Option<u32>) {
        provider.assign_test_month(month);
    }

    /// Out-of-fold training predictions plus test predictions.
    ///
    /// Test predictions come from the model fitted on the last fold. With
    /// `refit` the model is first refitted on the full training set, which
    /// changes the test meta features.
    ///
    /// Uses the fixed parameters when the runner has them and estimator
    /// defaults otherwise.
    pub fn stacking_feature(
        &mut self,
        provider: &dyn FeatureProvider,
        metric: Metric,
        k: usize,
        refit: bool,
    ) -> Result<StackingFeatures> {
        let use_fixed = self.fixed_params.is_some();
        let train = self.cross_validation_all(provider, metric, k, use_fixed)?;
        if refit {
            self.create_fit(provider, use_fixed)?;
        }
        let test = self.predict_all(provider)?;
        info!(
            model = %self.model_type,
            train_rows = train.len(),
            test_rows = test.len(),
            refit,
            "Built stacking features"
        );
        Ok(StackingFeatures { train, test })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamGrid;
    use crate::data::FeatureSet;
    use crate::metrics::RecordingReporter;
    use crate::training::Uniform;
    use ndarray::array;

    fn frame(n: usize) -> (Frame, Array1<f64>) {
        let values = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 12 + 1) as f64 });
        let y = values.column(0).mapv(|v| 2.0 * v + 1.0);
        let frame = Frame::new(vec!["x".to_string(), "month".to_string()], values).unwrap();
        (frame, y)
    }

    fn ridge_params() -> ModelParams {
        ModelParams::new().with_fixed(ModelType::Ridge, HyperParams::new().with("alpha", 0.01))
    }

    #[test]
    fn test_missing_config_entry() {
        assert!(matches!(
            ModelRunner::new("rf", ridge_params()),
            Err(RunnerError::ConfigError(_))
        ));
        assert!(ModelRunner::new("gbm", ridge_params()).is_err());
    }

    #[test]
    fn test_state_machine() {
        let (x, y) = frame(30);
        let mut runner = ModelRunner::new("ridge", ridge_params()).unwrap();
        assert_eq!(runner.state(), RunnerState::Uninitialized);
        assert!(matches!(runner.fit_model(&x, &y), Err(RunnerError::ModelNotCreated)));

        runner.create_model(true).unwrap();
        assert_eq!(runner.state(), RunnerState::Created);
        assert!(matches!(runner.predict_model(&x), Err(RunnerError::ModelNotFitted)));

        runner.fit_model(&x, &y).unwrap();
        assert_eq!(runner.state(), RunnerState::Fitted);
        let preds = runner.predict_model(&x).unwrap();
        assert_eq!(preds.dim(), (30, 1));

        runner.create_model(false).unwrap();
        assert_eq!(runner.state(), RunnerState::Created);
    }

    #[test]
    fn test_fit_without_month_column() {
        let x = Frame::from_array(array![[1.0], [2.0], [3.0]]);
        let y = array![1.0, 2.0, 3.0];
        let mut runner = ModelRunner::new("ridge", ridge_params()).unwrap();
        runner.create_model(true).unwrap();
        assert!(matches!(runner.fit_model(&x, &y), Err(RunnerError::FeatureNotFound(_))));

        let mut runner = ModelRunner::new("ridge", ridge_params()).unwrap().with_weighting(Uniform);
        runner.create_model(true).unwrap();
        runner.fit_model(&x, &y).unwrap();
    }

    #[test]
    fn test_cross_validation_covers_every_row() {
        let (x, y) = frame(23);
        let reporter = RecordingReporter::new();
        let mut runner = ModelRunner::new("ridge", ridge_params())
            .unwrap()
            .with_reporter(reporter.clone());

        let oof = runner.cross_validation(&x, &y, Metric::Mae, 5, true).unwrap();
        assert_eq!(oof.index(), (0..23).collect::<Vec<_>>().as_slice());
        assert_eq!(oof.column(), "0_ridge");

        let lines = reporter.lines();
        // one line per fold, the header, then the pooled metric
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[5], "Overall performance:");
        assert!(lines[6].starts_with("mean absolute error: "));
    }

    #[test]
    fn test_grid_search_leaves_runner_untouched() {
        let (x, y) = frame(20);
        let runner = ModelRunner::new("ridge", ridge_params()).unwrap();
        let before = runner.fixed_params().cloned();
        assert!(matches!(
            runner.grid_search(&x, &y, Metric::Mae, 3, &ridge_params()),
            Err(RunnerError::ConfigError(_))
        ));
        assert_eq!(runner.fixed_params().cloned(), before);
    }

    #[test]
    fn test_adopt_params_after_grid_search() {
        let (x, y) = frame(20);
        let params = ModelParams::new().with_grid(ModelType::Ridge, ParamGrid::new().with("alpha", vec![0.1, 1.0]));
        let mut runner = ModelRunner::new("ridge", params.clone()).unwrap();
        assert!(matches!(runner.create_model(true), Err(RunnerError::ConfigError(_))));

        let result = runner.grid_search(&x, &y, Metric::Mae, 4, &params).unwrap();
        assert_eq!(result.candidates.len(), 2);
        runner.adopt_params(result.best_params.clone());
        runner.create_model(true).unwrap();
        assert_eq!(runner.fixed_params(), Some(&result.best_params));
    }

    #[test]
    fn test_calc_metrics() {
        let reporter = RecordingReporter::new();
        let runner = ModelRunner::new("ridge", ridge_params())
            .unwrap()
            .with_reporter(reporter.clone());
        let y_true = array![1.0, 2.0, 3.0];
        let y_pred = array![[1.0], [2.0], [5.0]];

        let mae = runner.calc_metrics("mae", &y_true, y_pred.view()).unwrap().unwrap();
        assert!((mae - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(reporter.lines(), vec!["mean absolute error: 0.666667".to_string()]);

        assert_eq!(runner.calc_metrics("rmse", &y_true, y_pred.view()).unwrap(), None);
        assert_eq!(reporter.lines().len(), 1);
        assert_eq!(runner.state(), RunnerState::Uninitialized);
    }

    #[test]
    fn test_stacking_feature() {
        let (train, target) = frame(30);
        let (test, _) = frame(12);
        let mut provider = FeatureSet::new(train, target, Some(test), 0.2).unwrap();
        let mut runner = ModelRunner::new("ridge", ridge_params())
            .unwrap()
            .with_reporter(RecordingReporter::new());

        runner.assign_month(&mut provider, Some(3));
        let stack = runner.stacking_feature(&provider, Metric::Mae, 3, false).unwrap();
        assert_eq!(stack.train.len(), 30);
        assert_eq!(stack.test.index(), &[2]);
        assert_eq!(stack.test.column(), "0_ridge");
    }

    #[test]
    fn test_stacking_test_features_from_last_fold_unless_refit() {
        let (train, target) = frame(30);
        let (test, _) = frame(12);
        let provider = FeatureSet::new(train.clone(), target.clone(), Some(test.clone()), 0.2).unwrap();
        let mut runner = ModelRunner::new("ridge", ridge_params())
            .unwrap()
            .with_reporter(RecordingReporter::new());

        let last_fold = runner.stacking_feature(&provider, Metric::Mae, 3, false).unwrap();
        let splits = KFold::new(3).with_random_state(Some(10)).split(30).unwrap();
        let last = &splits[2].train_indices;
        let mut direct = ModelRunner::new("ridge", ridge_params()).unwrap();
        let expected = direct
            .predict(&train.take_rows(last), &take_targets(&target, last), &test, true)
            .unwrap();
        assert_eq!(last_fold.test.to_column_vector(), expected);

        let refitted = runner.stacking_feature(&provider, Metric::Mae, 3, true).unwrap();
        let full = direct.predict(&train, &target, &test, true).unwrap();
        assert_eq!(refitted.test.to_column_vector(), full);
        assert_eq!(refitted.train.values(), last_fold.train.values());
    }
}
