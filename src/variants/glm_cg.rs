use log::debug;
use rand::rngs::StdRng;

use super::{LabeledRow, predict_linear};
use crate::{
    Result,
    layout::GlmCgLayout,
    linalg,
    objective::GlmObjective,
    rule::{Metric, UpdateRule},
    shape::VectorShape,
    state::OptimizerState,
    view::{Section, StateView},
};

/// Nonlinear conjugate gradient for generalized linear models.
///
/// Each iteration accumulates the batch gradient at the current model. The
/// first iteration steps along the steepest descent direction, later ones use
/// the Polak-Ribiere coefficient clamped at zero, which restarts the method
/// whenever conjugacy is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlmCg {
    objective: GlmObjective,
}

impl GlmCg {
    pub fn new(objective: GlmObjective) -> Self {
        Self { objective }
    }

    pub fn objective(&self) -> GlmObjective {
        self.objective
    }
}

/// Computes `max(0, g'(g - g_old) / g_old'g_old)`.
fn polak_ribiere(gradient: &[f64], previous: &[f64]) -> f64 {
    let denominator = linalg::dot(previous, previous);
    if denominator == 0.0 {
        return 0.0;
    }

    let numerator = linalg::dot(gradient, gradient) - linalg::dot(gradient, previous);
    (numerator / denominator).max(0.0)
}

impl UpdateRule for GlmCg {
    type Shape = VectorShape;
    type Layout = GlmCgLayout;
    type Row = LabeledRow;

    const NAME: &'static str = "glm_cg";

    fn layout(shape: &VectorShape) -> Result<GlmCgLayout> {
        GlmCgLayout::new(shape)
    }

    fn initialize(
        &self,
        _shape: &VectorShape,
        layout: &GlmCgLayout,
        task: &mut Section<'_>,
        stepsize: f64,
        _rng: &mut StdRng,
    ) -> Result<()> {
        task.set(layout.stepsize, stepsize);
        task.set(layout.iteration, 0.0);
        Ok(())
    }

    fn reset(&self, _layout: &GlmCgLayout, view: &mut StateView<'_>) {
        view.algo.clear();
    }

    fn transition(
        &self,
        shape: &VectorShape,
        layout: &GlmCgLayout,
        view: &mut StateView<'_>,
        row: &LabeledRow,
    ) -> Result<()> {
        row.check(shape.dimension)?;

        let p = linalg::dot(view.task.get(&layout.model), &row.features);
        let slope = self.objective.slope(p, row.label);

        view.algo.add(layout.loss, self.objective.loss(p, row.label));
        view.algo.add(layout.num_rows, 1.0);
        linalg::axpy(slope, &row.features, view.algo.get_mut(&layout.incr_gradient));

        Ok(())
    }

    fn merge(&self, layout: &GlmCgLayout, view: &mut StateView<'_>, other: &[f64]) {
        linalg::axpy(
            1.0,
            &other[layout.incr_gradient.clone()],
            view.algo.get_mut(&layout.incr_gradient),
        );
    }

    fn finalize(&self, layout: &GlmCgLayout, view: &mut StateView<'_>) -> Result<Metric> {
        let rows = view.algo.scalar(layout.num_rows) as u64;
        let metric = Metric::mean_loss(view.algo.scalar(layout.loss), rows)?;

        let gradient: Vec<f64> = view
            .algo
            .get(&layout.incr_gradient)
            .iter()
            .map(|g| g / rows as f64)
            .collect();

        let iteration = view.task.scalar(layout.iteration);
        let beta = if iteration == 0.0 {
            0.0
        } else {
            polak_ribiere(&gradient, view.task.get(&layout.gradient))
        };
        debug!(iteration = iteration, beta = beta; "conjugate gradient step");

        let direction: Vec<f64> = view
            .task
            .get(&layout.direction)
            .iter()
            .zip(&gradient)
            .map(|(&d, &g)| beta * d - g)
            .collect();

        let stepsize = view.task.scalar(layout.stepsize);
        linalg::axpy(stepsize, &direction, view.task.get_mut(&layout.model));
        view.task.get_mut(&layout.direction).copy_from_slice(&direction);
        view.task.get_mut(&layout.gradient).copy_from_slice(&gradient);
        view.task.set(layout.iteration, iteration + 1.0);

        Ok(metric)
    }
}

impl OptimizerState<GlmCg> {
    pub fn stepsize(&self) -> f64 {
        self.buffer()[self.layout().stepsize]
    }

    /// Returns the amount of finalized iterations.
    pub fn iteration(&self) -> u64 {
        self.buffer()[self.layout().iteration] as u64
    }

    pub fn model(&self) -> &[f64] {
        &self.buffer()[self.layout().model.clone()]
    }

    pub fn direction(&self) -> &[f64] {
        &self.buffer()[self.layout().direction.clone()]
    }

    /// Returns the mean gradient of the previous iteration.
    pub fn previous_gradient(&self) -> &[f64] {
        &self.buffer()[self.layout().gradient.clone()]
    }

    /// Returns the sum of the row gradients folded in so far.
    pub fn incr_gradient(&self) -> &[f64] {
        &self.buffer()[self.layout().incr_gradient.clone()]
    }

    pub fn predict(&self, features: &[f64]) -> Result<f64> {
        predict_linear(self.rule().objective(), self.model(), features)
    }
}
