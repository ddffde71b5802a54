use convex_state::{
    StateError,
    config::TrainingConfig,
    driver::{Coordinator, Settings},
    objective::GlmObjective,
    shape::{FactorShape, VectorShape},
    variants::{GlmIgd, GlmNewton, LabeledRow, LmfIgd, MatrixEntry},
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn linear_rows(count: usize) -> Vec<LabeledRow> {
    (0..count)
        .map(|i| {
            let x0 = (i % 7) as f64 / 3.0 - 1.0;
            let x1 = (i % 5) as f64 / 2.0 - 1.0;
            LabeledRow::new(vec![x0, x1, 1.0], 2.0 * x0 - x1 + 0.5)
        })
        .collect()
}

fn shard<T: Clone>(rows: &[T], workers: usize) -> Vec<Vec<T>> {
    let mut shards = vec![Vec::new(); workers];
    for (i, row) in rows.iter().enumerate() {
        shards[i % workers].push(row.clone());
    }
    shards
}

#[test]
fn newton_run_recovers_the_least_squares_fit() {
    init_logger();
    let config = TrainingConfig::from_json(
        r#"{
            "variant": { "kind": "glm_newton", "dimension": 3, "objective": "least_squares" },
            "stepsize": 1.0,
            "max_iterations": 5,
            "tolerance": 1e-9
        }"#,
    )
    .unwrap();

    let coordinator = Coordinator::<GlmNewton>::from_config(&config).unwrap();
    let report = coordinator.run(&shard(&linear_rows(40), 4)).unwrap();

    assert!(report.converged);
    assert!(report.metrics.len() <= 5);
    let model = report.state.model();
    assert!((model[0] - 2.0).abs() < 1e-9);
    assert!((model[1] + 1.0).abs() < 1e-9);
    assert!((model[2] - 0.5).abs() < 1e-9);
    assert!(report.metrics.last().unwrap().value < 1e-12);
}

#[test]
fn igd_run_lowers_the_logistic_loss() {
    init_logger();
    let config = TrainingConfig::from_json(
        r#"{
            "variant": { "kind": "glm_igd", "dimension": 3, "objective": "logistic" },
            "stepsize": 0.1,
            "max_iterations": 15,
            "tolerance": 0.0,
            "seed": 1
        }"#,
    )
    .unwrap();

    let rows: Vec<LabeledRow> = linear_rows(60)
        .into_iter()
        .map(|row| {
            let label = if row.label > 0.0 { 1.0 } else { 0.0 };
            LabeledRow::new(row.features, label)
        })
        .collect();

    let coordinator = Coordinator::<GlmIgd>::from_config(&config).unwrap();
    let report = coordinator.run(&shard(&rows, 3)).unwrap();

    assert!(report.metrics.len() <= 15);
    assert!(report.metrics.last().unwrap().value < report.metrics[0].value);
    assert_eq!(report.metrics[0].num_rows, 60);
    assert!(report.state.predict(&[1.0, -1.0, 1.0]).unwrap() > 0.5);
}

#[test]
fn factorization_run_lowers_the_rmse() {
    init_logger();
    let u = [1.0, 0.5, -0.5, 2.0];
    let v = [1.0, -1.0, 0.5];
    let entries: Vec<MatrixEntry> = (0..4)
        .flat_map(|i| (0..3).map(move |j| MatrixEntry::new(i, j, u[i] * v[j])))
        .collect();

    let settings = Settings {
        stepsize: 0.05,
        max_iterations: 50,
        tolerance: 0.0,
        seed: Some(12),
    };
    let coordinator = Coordinator::new(LmfIgd::new(0.5), FactorShape::new(4, 3, 1), settings);
    let report = coordinator.run(&shard(&entries, 2)).unwrap();

    let first = report.metrics[0].value;
    let last = report.metrics.last().unwrap().value;
    assert!(last < first);
    assert_eq!(report.state.rmse(), last);
}

#[test]
fn iteration_without_rows_has_no_metric() {
    let coordinator = Coordinator::new(
        GlmIgd::new(GlmObjective::LeastSquares),
        VectorShape::new(2),
        Settings {
            stepsize: 0.1,
            max_iterations: 3,
            tolerance: 1e-4,
            seed: None,
        },
    );
    let state = coordinator.initial_state().unwrap();

    assert!(matches!(
        coordinator.iterate(&state, &[]),
        Err(StateError::EmptyIteration)
    ));
    assert!(matches!(
        coordinator.iterate(&state, &[Vec::new(), Vec::new()]),
        Err(StateError::EmptyIteration)
    ));
}

#[test]
fn malformed_row_aborts_the_iteration() {
    let coordinator = Coordinator::new(
        GlmIgd::new(GlmObjective::LeastSquares),
        VectorShape::new(2),
        Settings {
            stepsize: 0.1,
            max_iterations: 3,
            tolerance: 1e-4,
            seed: None,
        },
    );
    let state = coordinator.initial_state().unwrap();
    let shards = vec![
        vec![LabeledRow::new(vec![1.0, 0.0], 1.0)],
        vec![LabeledRow::new(vec![1.0, 0.0, 3.0], 1.0)],
    ];

    assert!(matches!(
        coordinator.iterate(&state, &shards),
        Err(StateError::MalformedRow { .. })
    ));
    assert_eq!(state.num_rows(), 0);
}

#[test]
fn config_of_another_variant_is_rejected() {
    let config = TrainingConfig::from_json(
        r#"{
            "variant": { "kind": "lmf_igd", "row_dim": 2, "col_dim": 2, "max_rank": 1 },
            "stepsize": 0.1
        }"#,
    )
    .unwrap();

    assert!(matches!(
        Coordinator::<GlmIgd>::from_config(&config),
        Err(StateError::Config(_))
    ));
}
