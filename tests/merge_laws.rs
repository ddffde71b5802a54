use convex_state::{
    OptimizerState, StateError, UpdateRule,
    objective::{Activation, GlmObjective},
    shape::{FactorShape, LayeredShape, VectorShape},
    variants::{GlmCg, GlmIgd, GlmNewton, LabeledRow, LmfIgd, MatrixEntry, MlpIgd, MlpRow},
};

const TOLERANCE: f64 = 1e-10;

fn assert_close(a: &[f64], b: &[f64]) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= TOLERANCE * (1.0 + x.abs()), "slot {i}: {x} != {y}");
    }
}

/// Folds each shard into its own copy of `start`.
fn fold<R: UpdateRule>(start: &OptimizerState<R>, shards: &[&[R::Row]]) -> Vec<OptimizerState<R>> {
    shards
        .iter()
        .map(|rows| {
            let mut worker = start.clone();
            for row in rows.iter() {
                worker.transition(row).unwrap();
            }
            worker
        })
        .collect()
}

/// Checks `(a + b) + c == a + (b + c) == (b + a) + c` and returns the first.
fn check_laws<R: UpdateRule>(start: &OptimizerState<R>, rows: &[R::Row]) -> OptimizerState<R> {
    let third = rows.len() / 3;
    let (a, rest) = rows.split_at(third);
    let (b, c) = rest.split_at(third);

    let parts = fold(start, &[a, b, c]);
    let [a, b, c] = [parts[0].clone(), parts[1].clone(), parts[2].clone()];

    let left = a.clone().merge(b.clone()).unwrap().merge(c.clone()).unwrap();
    let right = a.clone().merge(b.clone().merge(c.clone()).unwrap()).unwrap();
    let swapped = b.merge(a).unwrap().merge(c).unwrap();

    assert_close(left.buffer(), right.buffer());
    assert_close(left.buffer(), swapped.buffer());
    assert_eq!(left.num_rows(), rows.len() as u64);

    left
}

fn sequential<R: UpdateRule>(start: &OptimizerState<R>, rows: &[R::Row]) -> OptimizerState<R> {
    fold(start, &[rows]).remove(0)
}

fn labeled_rows(dimension: usize, count: usize) -> Vec<LabeledRow> {
    (0..count)
        .map(|i| {
            let features = (0..dimension)
                .map(|j| ((i * 7 + j * 3) % 11) as f64 / 5.0 - 1.0)
                .collect();
            let label = if i % 3 == 0 { 1.0 } else { -1.0 };
            LabeledRow::new(features, label)
        })
        .collect()
}

#[test]
fn glm_igd_merge_laws() {
    let mut start =
        OptimizerState::allocate(GlmIgd::new(GlmObjective::Logistic), &VectorShape::new(3)).unwrap();
    start.initialize(0.1, Some(0)).unwrap();

    let merged = check_laws(&start, &labeled_rows(3, 12));
    assert_eq!(merged.model(), start.model());
}

#[test]
fn glm_igd_merge_is_a_row_weighted_mean() {
    let mut start =
        OptimizerState::allocate(GlmIgd::new(GlmObjective::LeastSquares), &VectorShape::new(2)).unwrap();
    start.initialize(0.1, Some(0)).unwrap();
    let rows = labeled_rows(2, 4);

    let parts = fold(&start, &[&rows[..1], &rows[1..]]);
    let (a, b) = (parts[0].clone(), parts[1].clone());
    let expected: Vec<f64> = a
        .incr_model()
        .iter()
        .zip(b.incr_model())
        .map(|(x, y)| (1.0 * x + 3.0 * y) / 4.0)
        .collect();
    let loss = a.loss() + b.loss();

    let merged = a.merge(b).unwrap();

    assert_close(merged.incr_model(), &expected);
    assert_eq!(merged.loss(), loss);
    assert_eq!(merged.num_rows(), 4);
}

#[test]
fn glm_cg_merge_matches_a_single_pass() {
    let mut start =
        OptimizerState::allocate(GlmCg::new(GlmObjective::Logistic), &VectorShape::new(4)).unwrap();
    start.initialize(0.5, Some(0)).unwrap();
    let rows = labeled_rows(4, 15);

    let mut merged = check_laws(&start, &rows);
    let mut single = sequential(&start, &rows);
    assert_close(merged.buffer(), single.buffer());

    merged.finalize().unwrap();
    single.finalize().unwrap();
    assert_close(merged.model(), single.model());
}

#[test]
fn glm_newton_merge_matches_a_single_pass() {
    let start =
        OptimizerState::allocate(GlmNewton::new(GlmObjective::Logistic).unwrap(), &VectorShape::new(3))
            .unwrap();
    let rows = labeled_rows(3, 9);

    let mut merged = check_laws(&start, &rows);
    let mut single = sequential(&start, &rows);
    assert_close(merged.buffer(), single.buffer());

    let a = merged.finalize().unwrap();
    let b = single.finalize().unwrap();
    assert_close(merged.model(), single.model());
    assert!((a.value - b.value).abs() < TOLERANCE);
}

#[test]
fn lmf_igd_merge_laws() {
    let mut start = OptimizerState::allocate(LmfIgd::new(0.5), &FactorShape::new(4, 3, 2)).unwrap();
    start.initialize(0.05, Some(21)).unwrap();

    let rows: Vec<MatrixEntry> = (0..12)
        .map(|i| MatrixEntry::new(i % 4, (i * 2) % 3, (i % 5) as f64))
        .collect();

    check_laws(&start, &rows);
}

#[test]
fn mlp_igd_merge_laws() {
    let mut start =
        OptimizerState::allocate(MlpIgd::new(Activation::Sigmoid), &LayeredShape::new(vec![2, 3, 1]))
            .unwrap();
    start.initialize(0.1, Some(4)).unwrap();

    let rows: Vec<MlpRow> = (0..9)
        .map(|i| {
            let x = i as f64 / 9.0;
            MlpRow::new(vec![x, 1.0 - x], vec![x * x])
        })
        .collect();

    check_laws(&start, &rows);
}

/// Checks that merging with a state that saw no rows changes nothing, on
/// either side.
fn check_identity<R: UpdateRule>(start: &OptimizerState<R>, rows: &[R::Row]) {
    let busy = sequential(start, rows);

    let left = busy.clone().merge(start.clone()).unwrap();
    let right = start.clone().merge(busy.clone()).unwrap();

    assert_eq!(left.buffer(), busy.buffer());
    assert_eq!(right.buffer(), busy.buffer());
}

#[test]
fn zero_row_state_is_the_identity() {
    let mut igd =
        OptimizerState::allocate(GlmIgd::new(GlmObjective::Logistic), &VectorShape::new(3)).unwrap();
    igd.initialize(0.1, Some(0)).unwrap();
    check_identity(&igd, &labeled_rows(3, 5));

    let mut cg = OptimizerState::allocate(GlmCg::new(GlmObjective::Hinge), &VectorShape::new(3)).unwrap();
    cg.initialize(0.5, Some(0)).unwrap();
    check_identity(&cg, &labeled_rows(3, 5));

    let newton =
        OptimizerState::allocate(GlmNewton::new(GlmObjective::LeastSquares).unwrap(), &VectorShape::new(3))
            .unwrap();
    check_identity(&newton, &labeled_rows(3, 5));

    let mut lmf = OptimizerState::allocate(LmfIgd::new(0.2), &FactorShape::new(3, 3, 1)).unwrap();
    lmf.initialize(0.1, Some(2)).unwrap();
    check_identity(&lmf, &[MatrixEntry::new(1, 2, 1.5), MatrixEntry::new(0, 0, -0.5)]);

    let mut mlp =
        OptimizerState::allocate(MlpIgd::new(Activation::Tanh), &LayeredShape::new(vec![2, 2, 1]))
            .unwrap();
    mlp.initialize(0.1, Some(6)).unwrap();
    check_identity(&mlp, &[MlpRow::new(vec![0.5, -1.0], vec![0.25])]);
}

#[test]
fn states_of_different_rules_are_incompatible() {
    let shape = VectorShape::new(2);
    let mut a = OptimizerState::allocate(GlmIgd::new(GlmObjective::Logistic), &shape).unwrap();
    let mut b = OptimizerState::allocate(GlmIgd::new(GlmObjective::LeastSquares), &shape).unwrap();
    a.initialize(0.1, Some(0)).unwrap();
    b.initialize(0.1, Some(0)).unwrap();
    a.transition(&LabeledRow::new(vec![1.0, 0.0], 1.0)).unwrap();
    b.transition(&LabeledRow::new(vec![0.0, 1.0], 1.0)).unwrap();

    assert!(matches!(
        a.merge(b),
        Err(StateError::IncompatibleStates { what: "update rule", .. })
    ));
}

#[test]
fn states_of_different_iterations_are_incompatible() {
    let mut a = OptimizerState::allocate(GlmIgd::new(GlmObjective::LeastSquares), &VectorShape::new(2))
        .unwrap();
    a.initialize(0.1, Some(0)).unwrap();
    let mut b = a.clone();

    b.transition(&LabeledRow::new(vec![1.0, 1.0], 1.0)).unwrap();
    b.finalize().unwrap();
    b.transition(&LabeledRow::new(vec![1.0, 0.0], 1.0)).unwrap();
    a.transition(&LabeledRow::new(vec![0.0, 1.0], 1.0)).unwrap();

    assert!(matches!(
        a.merge(b),
        Err(StateError::IncompatibleStates { what: "task state", .. })
    ));
}

#[test]
fn differing_stepsizes_are_incompatible() {
    let shape = VectorShape::new(2);
    let mut a = OptimizerState::allocate(GlmCg::new(GlmObjective::LeastSquares), &shape).unwrap();
    let mut b = OptimizerState::allocate(GlmCg::new(GlmObjective::LeastSquares), &shape).unwrap();
    a.initialize(0.1, Some(0)).unwrap();
    b.initialize(0.2, Some(0)).unwrap();

    assert!(matches!(
        a.merge(b),
        Err(StateError::IncompatibleStates { index: 2, .. })
    ));
}
