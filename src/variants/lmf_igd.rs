use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::{
    Result, StateError, init,
    layout::LmfIgdLayout,
    linalg,
    rule::{Metric, UpdateRule, merge_incremental},
    shape::FactorShape,
    state::OptimizerState,
    view::{Section, StateView},
};

/// One observed entry `(row, col, value)` of the factorized matrix.
/// Indices are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

impl MatrixEntry {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self { row, col, value }
    }

    fn check(&self, shape: &FactorShape) -> Result<()> {
        if self.row >= shape.row_dim {
            return Err(StateError::RowIndexOutOfBounds {
                axis: "row",
                index: self.row,
                len: shape.row_dim,
            });
        }
        if self.col >= shape.col_dim {
            return Err(StateError::RowIndexOutOfBounds {
                axis: "column",
                index: self.col,
                len: shape.col_dim,
            });
        }

        Ok(())
    }
}

/// Incremental gradient descent for low-rank matrix factorization.
///
/// Each entry `a_ij` updates row `i` of `U` and row `j` of `V` along the
/// gradient of `0.5 * (u_i'v_j - a_ij)^2`. The loss accumulates the squared
/// error so the reported metric is the RMSE.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmfIgd {
    scale_factor: f64,
}

impl LmfIgd {
    /// Creates a new `LmfIgd` update rule.
    ///
    /// # Arguments
    /// * `scale_factor` - Half width of the uniform distribution the factors
    ///   are seeded from.
    pub fn new(scale_factor: f64) -> Self {
        Self { scale_factor }
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }
}

impl UpdateRule for LmfIgd {
    type Shape = FactorShape;
    type Layout = LmfIgdLayout;
    type Row = MatrixEntry;

    const NAME: &'static str = "lmf_igd";

    fn layout(shape: &FactorShape) -> Result<LmfIgdLayout> {
        LmfIgdLayout::new(shape)
    }

    fn initialize(
        &self,
        _shape: &FactorShape,
        layout: &LmfIgdLayout,
        task: &mut Section<'_>,
        stepsize: f64,
        rng: &mut StdRng,
    ) -> Result<()> {
        init::uniform(task.get_mut(&layout.model), self.scale_factor, rng)?;
        task.set(layout.stepsize, stepsize);
        task.set(layout.scale_factor, self.scale_factor);
        Ok(())
    }

    fn reset(&self, layout: &LmfIgdLayout, view: &mut StateView<'_>) {
        view.algo.clear();
        view.algo
            .get_mut(&layout.incr_model)
            .copy_from_slice(view.task.get(&layout.model));
    }

    fn transition(
        &self,
        shape: &FactorShape,
        layout: &LmfIgdLayout,
        view: &mut StateView<'_>,
        row: &MatrixEntry,
    ) -> Result<()> {
        row.check(shape)?;

        let rank = shape.max_rank;
        let stepsize = view.task.scalar(layout.stepsize);
        let (u, v) = view
            .algo
            .get_mut(&layout.incr_model)
            .split_at_mut(shape.v_range().start);

        let u_i = &mut u[row.row * rank..(row.row + 1) * rank];
        let v_j = &mut v[row.col * rank..(row.col + 1) * rank];

        let error = linalg::dot(u_i, v_j) - row.value;
        for (u, v) in u_i.iter_mut().zip(v_j.iter_mut()) {
            let previous = *u;
            *u -= stepsize * error * *v;
            *v -= stepsize * error * previous;
        }

        view.algo.add(layout.loss, error * error);
        view.algo.add(layout.num_rows, 1.0);

        Ok(())
    }

    fn merge(&self, layout: &LmfIgdLayout, view: &mut StateView<'_>, other: &[f64]) {
        let my_rows = view.algo.scalar(layout.num_rows);

        merge_incremental(
            view.task.get(&layout.model),
            view.algo.get_mut(&layout.incr_model),
            my_rows,
            &other[layout.incr_model.clone()],
            other[layout.num_rows],
        );
    }

    fn finalize(&self, layout: &LmfIgdLayout, view: &mut StateView<'_>) -> Result<Metric> {
        let rows = view.algo.scalar(layout.num_rows) as u64;
        let metric = Metric::rmse(view.algo.scalar(layout.loss), rows)?;

        view.task
            .get_mut(&layout.model)
            .copy_from_slice(view.algo.get(&layout.incr_model));
        view.task.set(layout.rmse, metric.value);

        Ok(metric)
    }
}

impl OptimizerState<LmfIgd> {
    pub fn stepsize(&self) -> f64 {
        self.buffer()[self.layout().stepsize]
    }

    pub fn scale_factor(&self) -> f64 {
        self.buffer()[self.layout().scale_factor]
    }

    /// Returns the RMSE reported by the last finalized iteration.
    pub fn rmse(&self) -> f64 {
        self.buffer()[self.layout().rmse]
    }

    pub fn model(&self) -> &[f64] {
        &self.buffer()[self.layout().model.clone()]
    }

    /// Returns `U`, `row_dim x max_rank` row-major.
    pub fn u(&self) -> &[f64] {
        &self.model()[self.shape().u_range()]
    }

    /// Returns `V`, `col_dim x max_rank` row-major.
    pub fn v(&self) -> &[f64] {
        &self.model()[self.shape().v_range()]
    }

    pub fn incr_model(&self) -> &[f64] {
        &self.buffer()[self.layout().incr_model.clone()]
    }

    /// Predicts entry `(row, col)` as `u_row'v_col`.
    pub fn predict(&self, row: usize, col: usize) -> Result<f64> {
        let shape = self.shape();
        MatrixEntry::new(row, col, 0.0).check(shape)?;

        let rank = shape.max_rank;
        let u = &self.u()[row * rank..(row + 1) * rank];
        let v = &self.v()[col * rank..(col + 1) * rank];
        Ok(linalg::dot(u, v))
    }
}
