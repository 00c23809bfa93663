//! Integration test: estimators through the registry and the public API

use model_runner::config::{HyperParams, ParamGrid};
use model_runner::metrics::Metric;
use model_runner::training::{
    GridSearch, KFold, ModelRegistry, ModelType, RandomForestConfig, RandomForestRegressor, Regressor,
    RidgeRegression, XGBoostRegressor,
};
use ndarray::{array, Array1, Array2};

fn regression_data() -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_vec(
        (20, 2),
        (1..=20).flat_map(|i| [i as f64 / 20.0, (2 * i % 7) as f64 / 7.0]).collect(),
    )
    .unwrap();
    let y: Array1<f64> = x.rows().into_iter().map(|r| 3.0 * r[0] + r[1]).collect();
    (x, y)
}

#[test]
fn test_model_type_identifiers_round_trip() {
    for model_type in ModelType::all() {
        let parsed: ModelType = model_type.as_str().parse().unwrap();
        assert_eq!(parsed, model_type);
        assert_eq!(parsed.to_string(), model_type.as_str());
    }
    assert!("lightgbm".parse::<ModelType>().is_err());
}

#[test]
fn test_all_families_predict_row_count() {
    let (x, y) = regression_data();
    let registry = ModelRegistry::default();
    for model_type in ModelType::all() {
        let mut model = registry.create(model_type, &HyperParams::new()).unwrap();
        model.fit(&x, &y, None).unwrap();
        let preds = model.predict(&x).unwrap();
        assert_eq!(preds.len(), x.nrows(), "{}", model_type);
    }
}

#[test]
fn test_weighted_fit_all_families() {
    let (x, y) = regression_data();
    let w = Array1::from_iter((0..20).map(|i| if i < 10 { 0.1 } else { 1.0 }));
    let registry = ModelRegistry::default();
    for model_type in ModelType::all() {
        let mut model = registry.create(model_type, &HyperParams::new()).unwrap();
        model.fit(&x, &y, Some(&w)).unwrap();
        assert!(model.predict(&x).unwrap().iter().all(|p| p.is_finite()), "{}", model_type);
    }
}

#[test]
fn test_zero_weight_rows_fit_or_fail_loudly() {
    let x = Array2::from_shape_fn((8, 1), |(i, _)| i as f64);
    let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
    let w = array![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let registry = ModelRegistry::default();
    for model_type in ModelType::all() {
        let mut model = registry.create(model_type, &HyperParams::new()).unwrap();
        if model.fit(&x, &y, Some(&w)).is_ok() {
            let preds = model.predict(&x).unwrap();
            assert_eq!(preds.len(), 8, "{}", model_type);
        }
    }
}

#[test]
fn test_missing_features_boosters_only() {
    let (mut x, y) = regression_data();
    x[[3, 0]] = f64::NAN;
    x[[11, 1]] = f64::NAN;
    let registry = ModelRegistry::default();
    for model_type in ModelType::all() {
        let mut model = registry.create(model_type, &HyperParams::new()).unwrap();
        let fitted = model.fit(&x, &y, None);
        if matches!(model_type, ModelType::XGBoost | ModelType::CatBoost) {
            fitted.unwrap();
            assert!(model.predict(&x).unwrap().iter().all(|p| p.is_finite()), "{}", model_type);
        } else {
            assert!(fitted.is_err(), "{}", model_type);
        }
    }
}

#[test]
fn test_rejects_bad_inputs() {
    let (x, y) = regression_data();
    let mut model = RidgeRegression::from_params(&HyperParams::new()).unwrap();
    assert!(model.fit(&x, &array![1.0, 2.0], None).is_err());
    assert!(model.fit(&x, &y, Some(&Array1::from_elem(20, -1.0))).is_err());
    model.fit(&x, &y, None).unwrap();
    assert!(model.predict(&array![[1.0, 2.0, 3.0]]).is_err());
}

#[test]
fn test_forest_is_reproducible_with_seed() {
    let (x, y) = regression_data();
    let config = RandomForestConfig {
        n_estimators: 10,
        random_state: Some(7),
        ..Default::default()
    };
    let mut a = RandomForestRegressor::new(config.clone());
    let mut b = RandomForestRegressor::new(config);
    a.fit(&x, &y, None).unwrap();
    b.fit(&x, &y, None).unwrap();
    assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
}

#[test]
fn test_xgboost_eval_fit() {
    let (x, y) = regression_data();
    let mut model = XGBoostRegressor::from_params(&HyperParams::new().with("n_estimators", 20i64)).unwrap();
    model.fit_with_eval(&x, &y, Metric::Mae, false).unwrap();
    let preds = model.predict(&x).unwrap();
    let mae = (&preds - &y).mapv(f64::abs).mean().unwrap();
    assert!(mae < 0.5, "MAE too high: {}", mae);
}

#[test]
fn test_grid_product_size() {
    let (x, y) = regression_data();
    let grid = ParamGrid::new()
        .with("n_neighbors", vec![1i64, 3, 5])
        .with("weights", vec!["uniform", "distance"]);
    let result = GridSearch::new(ModelType::KNN, grid, Metric::Mae, KFold::new(4))
        .fit(&ModelRegistry::default(), &x, &y)
        .unwrap();
    assert_eq!(result.candidates.len(), 6);
    assert!(result.candidates.iter().any(|c| c.rank == 1));
    assert_eq!(result.best().unwrap().params, result.best_params);
}
