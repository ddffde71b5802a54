use log::debug;
use rand::rngs::StdRng;

use super::{LabeledRow, predict_linear};
use crate::{
    Result,
    layout::GlmIgdLayout,
    linalg,
    objective::GlmObjective,
    rule::{Metric, UpdateRule, merge_incremental},
    shape::VectorShape,
    state::OptimizerState,
    view::{Section, StateView},
};

/// Incremental gradient descent for generalized linear models.
///
/// Every row moves the incremental model by `-stepsize * gradient`, with the
/// gradient evaluated at the incremental model itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlmIgd {
    objective: GlmObjective,
}

impl GlmIgd {
    pub fn new(objective: GlmObjective) -> Self {
        Self { objective }
    }

    pub fn objective(&self) -> GlmObjective {
        self.objective
    }
}

impl UpdateRule for GlmIgd {
    type Shape = VectorShape;
    type Layout = GlmIgdLayout;
    type Row = LabeledRow;

    const NAME: &'static str = "glm_igd";

    fn layout(shape: &VectorShape) -> Result<GlmIgdLayout> {
        GlmIgdLayout::new(shape)
    }

    fn initialize(
        &self,
        _shape: &VectorShape,
        layout: &GlmIgdLayout,
        task: &mut Section<'_>,
        stepsize: f64,
        _rng: &mut StdRng,
    ) -> Result<()> {
        task.set(layout.stepsize, stepsize);
        Ok(())
    }

    fn reset(&self, layout: &GlmIgdLayout, view: &mut StateView<'_>) {
        view.algo.clear();
        view.algo
            .get_mut(&layout.incr_model)
            .copy_from_slice(view.task.get(&layout.model));
    }

    fn transition(
        &self,
        shape: &VectorShape,
        layout: &GlmIgdLayout,
        view: &mut StateView<'_>,
        row: &LabeledRow,
    ) -> Result<()> {
        row.check(shape.dimension)?;

        let x = &row.features;
        let stepsize = view.task.scalar(layout.stepsize);
        let p = linalg::dot(view.algo.get(&layout.incr_model), x);
        let slope = self.objective.slope(p, row.label);

        view.algo.add(layout.loss, self.objective.loss(p, row.label));
        view.algo.add(layout.num_rows, 1.0);
        linalg::axpy(slope, x, view.algo.get_mut(&layout.gradient));
        linalg::axpy(-stepsize * slope, x, view.algo.get_mut(&layout.incr_model));

        Ok(())
    }

    fn merge(&self, layout: &GlmIgdLayout, view: &mut StateView<'_>, other: &[f64]) {
        let my_rows = view.algo.scalar(layout.num_rows);
        let their_rows = other[layout.num_rows];

        merge_incremental(
            view.task.get(&layout.model),
            view.algo.get_mut(&layout.incr_model),
            my_rows,
            &other[layout.incr_model.clone()],
            their_rows,
        );
        linalg::axpy(
            1.0,
            &other[layout.gradient.clone()],
            view.algo.get_mut(&layout.gradient),
        );
    }

    fn finalize(&self, layout: &GlmIgdLayout, view: &mut StateView<'_>) -> Result<Metric> {
        let rows = view.algo.scalar(layout.num_rows) as u64;
        let metric = Metric::mean_loss(view.algo.scalar(layout.loss), rows)?;

        let gradient = view.algo.get(&layout.gradient);
        let norm = linalg::dot(gradient, gradient).sqrt() / rows as f64;
        debug!(gradient_norm = norm; "mean gradient along the iteration");

        view.task
            .get_mut(&layout.model)
            .copy_from_slice(view.algo.get(&layout.incr_model));

        Ok(metric.with_gradient_norm(norm))
    }
}

impl OptimizerState<GlmIgd> {
    pub fn stepsize(&self) -> f64 {
        self.buffer()[self.layout().stepsize]
    }

    pub fn model(&self) -> &[f64] {
        &self.buffer()[self.layout().model.clone()]
    }

    pub fn incr_model(&self) -> &[f64] {
        &self.buffer()[self.layout().incr_model.clone()]
    }

    /// Returns the sum of the row gradients folded in so far.
    pub fn gradient(&self) -> &[f64] {
        &self.buffer()[self.layout().gradient.clone()]
    }

    /// Evaluates the current model on a feature vector.
    pub fn predict(&self, features: &[f64]) -> Result<f64> {
        predict_linear(self.rule().objective(), self.model(), features)
    }
}
