//! Factory lookup from model type to estimator constructor

use super::{
    AdaBoostRegressor, CatBoostRegressor, ElasticNetRegression, ExtraTreesRegressor, KNNRegressor,
    LassoRegression, MLPRegressor, ModelType, RandomForestRegressor, Regressor, RidgeRegression, SGDRegressor,
    SVMRegressor, XGBoostRegressor,
};
use crate::config::HyperParams;
use crate::error::{Result, RunnerError};
use std::collections::HashMap;
use std::fmt;

/// Builds an unfitted estimator from hyperparameters
pub type ModelFactory = Box<dyn Fn(&HyperParams) -> Result<Box<dyn Regressor>> + Send + Sync>;

fn boxed<R, F>(build: F) -> ModelFactory
where
    R: Regressor + 'static,
    F: Fn(&HyperParams) -> Result<R> + Send + Sync + 'static,
{
    Box::new(move |params| Ok(Box::new(build(params)?) as Box<dyn Regressor>))
}

/// Maps each model type to the factory that constructs it
pub struct ModelRegistry {
    factories: HashMap<ModelType, ModelFactory>,
}

impl ModelRegistry {
    /// A registry with no factories
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) the factory for `model_type`
    pub fn register(&mut self, model_type: ModelType, factory: ModelFactory) -> &mut Self {
        self.factories.insert(model_type, factory);
        self
    }

    pub fn contains(&self, model_type: ModelType) -> bool {
        self.factories.contains_key(&model_type)
    }

    /// Registered types in identifier order
    pub fn model_types(&self) -> Vec<ModelType> {
        let mut types: Vec<ModelType> = self.factories.keys().copied().collect();
        types.sort();
        types
    }

    /// Construct an unfitted estimator
    pub fn create(&self, model_type: ModelType, params: &HyperParams) -> Result<Box<dyn Regressor>> {
        let factory = self
            .factories
            .get(&model_type)
            .ok_or_else(|| RunnerError::ConfigError(format!("no factory registered for '{}'", model_type)))?;
        factory(params)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(ModelType::XGBoost, boxed(XGBoostRegressor::from_params))
            .register(ModelType::CatBoost, boxed(CatBoostRegressor::from_params))
            .register(ModelType::AdaBoost, boxed(AdaBoostRegressor::from_params))
            .register(ModelType::RandomForest, boxed(RandomForestRegressor::from_params))
            .register(ModelType::KNN, boxed(KNNRegressor::from_params))
            .register(ModelType::SVM, boxed(SVMRegressor::from_params))
            .register(ModelType::SGD, boxed(SGDRegressor::from_params))
            .register(ModelType::ElasticNet, boxed(ElasticNetRegression::from_params))
            .register(ModelType::MLP, boxed(MLPRegressor::from_params))
            .register(ModelType::ExtraTrees, boxed(ExtraTreesRegressor::from_params))
            .register(ModelType::Lasso, boxed(LassoRegression::from_params))
            .register(ModelType::Ridge, boxed(RidgeRegression::from_params));
        registry
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("model_types", &self.model_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    #[test]
    fn test_default_registers_all_families() {
        let registry = ModelRegistry::default();
        for model_type in ModelType::all() {
            let model = registry.create(model_type, &HyperParams::new()).unwrap();
            assert_eq!(model.name(), model_type.as_str());
        }
    }

    #[test]
    fn test_every_family_fits_a_linear_signal() {
        let x = Array2::from_shape_fn((60, 2), |(i, j)| ((i * (j + 2)) % 9) as f64 / 9.0);
        let y: Array1<f64> = x.rows().into_iter().map(|r| r[0] + 0.5 * r[1]).collect();
        let registry = ModelRegistry::default();

        for model_type in ModelType::all() {
            let params = match model_type {
                ModelType::XGBoost | ModelType::CatBoost | ModelType::RandomForest | ModelType::ExtraTrees => {
                    HyperParams::new().with("n_estimators", 10i64)
                }
                ModelType::MLP => HyperParams::new().with("max_iter", 20i64),
                _ => HyperParams::new(),
            };
            let mut model = registry.create(model_type, &params).unwrap();
            model.fit(&x, &y, None).unwrap();
            let preds = model.predict(&x).unwrap();
            assert_eq!(preds.len(), 60, "{}", model_type);
            assert!(preds.iter().all(|p| p.is_finite()), "{}", model_type);
        }
    }

    #[test]
    fn test_unknown_param_rejected() {
        let registry = ModelRegistry::default();
        let params = HyperParams::new().with("not_a_param", 1i64);
        assert!(matches!(
            registry.create(ModelType::Ridge, &params),
            Err(RunnerError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_register_replaces_factory() {
        let mut registry = ModelRegistry::empty();
        assert!(registry.create(ModelType::Ridge, &HyperParams::new()).is_err());
        registry.register(ModelType::Ridge, boxed(|_| Ok(RidgeRegression::new(Default::default()).with_alpha(5.0))));
        assert!(registry.contains(ModelType::Ridge));
        assert_eq!(registry.model_types(), vec![ModelType::Ridge]);
    }
}
