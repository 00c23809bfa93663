//! Integration test: ModelRunner end-to-end over CSV files and JSON configuration

use model_runner::prelude::*;
use ndarray::{array, Array1, Array2};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn write_file(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

/// 36 rows over three years of months; target = 2 * a - b + month / 12
fn train_csv() -> String {
    let mut csv = String::from("a,b,month,target\n");
    for i in 0..36 {
        let a = (i % 5) as f64;
        let b = (i % 3) as f64;
        let month = (i % 12 + 1) as f64;
        let target = 2.0 * a - b + month / 12.0;
        csv.push_str(&format!("{},{},{},{}\n", a, b, month, target));
    }
    csv
}

fn test_csv() -> String {
    let mut csv = String::from("a,b,month\n");
    for i in 0..12 {
        csv.push_str(&format!("{},{},{}\n", (i % 4) as f64, (i % 2) as f64, (i % 12 + 1) as f64));
    }
    csv
}

fn config() -> ModelParams {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"{
            "ridge": { "alpha": 0.1 },
            "rf": { "n_estimators": 10, "max_depth": 4, "random_state": 3 },
            "knn_grid": { "n_neighbors": [1, 3, 5] }
        }"#,
    )
    .unwrap();
    ModelParams::from_file(file.path()).unwrap()
}

fn features(dir: &TempDir) -> FeatureSet {
    let train = write_file(dir, "train.csv", &train_csv());
    let test = write_file(dir, "test.csv", &test_csv());
    FeatureSet::from_csv(&train, Some(test.as_path()), "target", 0.25).unwrap()
}

#[test]
fn test_unconfigured_model_type() {
    let err = ModelRunner::new("svm", config()).unwrap_err();
    assert!(matches!(err, RunnerError::ConfigError(_)));
}

#[test]
fn test_run_all_reports_metric() {
    let dir = TempDir::new().unwrap();
    let features = features(&dir);
    let reporter = RecordingReporter::new();
    let mut runner = ModelRunner::new("rf", config()).unwrap().with_reporter(reporter.clone());

    let preds = runner.run_all(&features, Metric::Mae, true).unwrap();
    assert_eq!(preds.dim(), (features.x_test().nrows(), 1));
    assert_eq!(preds.nrows(), 9);
    let lines = reporter.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("mean absolute error: "));
}

#[test]
fn test_cross_validation_all_sorted_and_complete() {
    let dir = TempDir::new().unwrap();
    let features = features(&dir);
    let mut runner = ModelRunner::new("ridge", config())
        .unwrap()
        .with_reporter(RecordingReporter::new());

    let oof = runner.cross_validation_all(&features, Metric::Mae, 4, true).unwrap();
    assert_eq!(oof.len(), 36);
    assert_eq!(oof.index(), (0..36).collect::<Vec<_>>().as_slice());
    assert_eq!(oof.column(), "0_ridge");
    assert_eq!(oof.to_column_vector().dim(), (36, 1));
}

#[test]
fn test_grid_search_then_adopt() {
    let dir = TempDir::new().unwrap();
    let features = features(&dir);
    let mut runner = ModelRunner::new("knn", config()).unwrap().with_weighting(Uniform);

    // grid-only configuration: no fixed parameters yet
    assert!(runner.create_model(true).is_err());

    let result = runner.grid_search_all(&features, Metric::Mae, 3).unwrap();
    assert_eq!(result.candidates.len(), 3);
    assert!(result.best_score <= 0.0);

    runner.adopt_params(result.best_params.clone());
    let preds = runner.run_all(&features, Metric::Mae, true).unwrap();
    assert_eq!(preds.nrows(), 9);
}

#[test]
fn test_grid_search_without_grid_entry() {
    let dir = TempDir::new().unwrap();
    let features = features(&dir);
    let runner = ModelRunner::new("ridge", config()).unwrap();
    let before = runner.fixed_params().cloned();
    assert!(matches!(
        runner.grid_search_all(&features, Metric::Mae, 3),
        Err(RunnerError::ConfigError(_))
    ));
    assert_eq!(runner.fixed_params().cloned(), before);
}

#[test]
fn test_month_filter_and_predict_all() {
    let dir = TempDir::new().unwrap();
    let mut features = features(&dir);
    let mut runner = ModelRunner::new("ridge", config()).unwrap();

    runner.create_fit(&features, true).unwrap();
    assert_eq!(runner.predict_all(&features).unwrap().len(), 12);

    runner.assign_month(&mut features, Some(11));
    let preds = runner.predict_all(&features).unwrap();
    assert_eq!(preds.index(), &[10]);
}

#[test]
fn test_stacking_features_to_csv() {
    let dir = TempDir::new().unwrap();
    let features = features(&dir);
    let mut runner = ModelRunner::new("ridge", config())
        .unwrap()
        .with_reporter(RecordingReporter::new());

    let stack = runner.stacking_feature(&features, Metric::Mae, 3, false).unwrap();
    assert_eq!(stack.train.len(), 36);
    assert_eq!(stack.test.len(), 12);

    let out = dir.path().join("ridge_train.csv");
    stack.train.save_csv(&out).unwrap();
    let written = std::fs::read_to_string(&out).unwrap();
    assert!(written.starts_with("index,0_ridge"));
    assert_eq!(written.lines().count(), 37);
}

#[test]
fn test_calc_metrics_contract() {
    let reporter = RecordingReporter::new();
    let runner = ModelRunner::new("ridge", config()).unwrap().with_reporter(reporter.clone());
    let y_true = array![1.0, 2.0, 3.0];
    let y_pred = array![[1.0], [2.0], [5.0]];

    let mae = runner.calc_metrics("mae", &y_true, y_pred.view()).unwrap().unwrap();
    assert!((mae - 0.667).abs() < 1e-3);

    let before = runner.state();
    assert_eq!(runner.calc_metrics("r2", &y_true, y_pred.view()).unwrap(), None);
    assert_eq!(runner.state(), before);
    assert_eq!(reporter.lines().len(), 1);

    assert!(matches!("r2".parse::<Metric>(), Err(RunnerError::UnsupportedMetric(_))));
}

#[test]
fn test_month_weighting_boundary() {
    let x = Frame::new(
        vec!["month".to_string()],
        Array2::from_shape_vec((4, 1), vec![5.0, 9.99, 10.0, 15.0]).unwrap(),
    )
    .unwrap();
    let w = MonthThreshold::default().weights(&x).unwrap();
    assert_eq!(w, Array1::from_vec(vec![0.1, 0.1, 1.0, 1.0]));
}

#[test]
fn test_every_family_through_runner() {
    let x = Frame::new(
        vec!["a".to_string(), "month".to_string()],
        Array2::from_shape_fn((24, 2), |(i, j)| if j == 0 { i as f64 / 24.0 } else { (i % 12 + 1) as f64 }),
    )
    .unwrap();
    let y = x.column("a").unwrap().mapv(|v| 3.0 * v + 1.0);

    for model_type in ModelType::all() {
        let params = ModelParams::new().with_fixed(model_type, HyperParams::new());
        let mut runner = ModelRunner::from_type(model_type, params).unwrap();
        runner.create_model(true).unwrap();
        runner.fit_model(&x, &y).unwrap();
        let preds = runner.predict_model(&x).unwrap();
        assert_eq!(preds.dim(), (24, 1), "{}", model_type);
        assert_eq!(runner.state(), RunnerState::Fitted);
    }
}
