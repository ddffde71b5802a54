use log::debug;
use rand::rngs::StdRng;

use super::{LabeledRow, predict_linear};
use crate::{
    Result, StateError,
    layout::GlmNewtonLayout,
    linalg,
    objective::GlmObjective,
    rule::{Metric, UpdateRule},
    shape::VectorShape,
    state::OptimizerState,
    view::{Section, StateView},
};

/// Newton's method for generalized linear models.
///
/// Each iteration accumulates the batch gradient and Hessian at the current
/// model and then solves `hessian * delta = -gradient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlmNewton {
    objective: GlmObjective,
}

impl GlmNewton {
    /// Creates a new `GlmNewton` update rule.
    ///
    /// # Returns
    /// `StateError::Unsupported` if the objective has no second derivative.
    pub fn new(objective: GlmObjective) -> Result<Self> {
        if objective.curvature(0.0, 1.0).is_none() {
            return Err(StateError::Unsupported(
                "newton's method needs a twice differentiable objective",
            ));
        }

        Ok(Self { objective })
    }

    pub fn objective(&self) -> GlmObjective {
        self.objective
    }
}

impl UpdateRule for GlmNewton {
    type Shape = VectorShape;
    type Layout = GlmNewtonLayout;
    type Row = LabeledRow;

    const NAME: &'static str = "glm_newton";

    fn layout(shape: &VectorShape) -> Result<GlmNewtonLayout> {
        GlmNewtonLayout::new(shape)
    }

    fn initialize(
        &self,
        _shape: &VectorShape,
        _layout: &GlmNewtonLayout,
        _task: &mut Section<'_>,
        _stepsize: f64,
        _rng: &mut StdRng,
    ) -> Result<()> {
        Ok(())
    }

    fn reset(&self, _layout: &GlmNewtonLayout, view: &mut StateView<'_>) {
        view.algo.clear();
    }

    fn transition(
        &self,
        shape: &VectorShape,
        layout: &GlmNewtonLayout,
        view: &mut StateView<'_>,
        row: &LabeledRow,
    ) -> Result<()> {
        row.check(shape.dimension)?;

        let x = &row.features;
        let p = linalg::dot(view.task.get(&layout.model), x);
        let curvature = self
            .objective
            .curvature(p, row.label)
            .ok_or(StateError::Unsupported("objective has no curvature"))?;
        let slope = self.objective.slope(p, row.label);

        linalg::rank_one_update(view.algo.get_mut(&layout.hessian), curvature, x)?;
        linalg::axpy(slope, x, view.algo.get_mut(&layout.gradient));
        view.algo.add(layout.loss, self.objective.loss(p, row.label));
        view.algo.add(layout.num_rows, 1.0);

        Ok(())
    }

    fn merge(&self, layout: &GlmNewtonLayout, view: &mut StateView<'_>, other: &[f64]) {
        linalg::axpy(
            1.0,
            &other[layout.gradient.clone()],
            view.algo.get_mut(&layout.gradient),
        );
        linalg::axpy(
            1.0,
            &other[layout.hessian.clone()],
            view.algo.get_mut(&layout.hessian),
        );
    }

    fn finalize(&self, layout: &GlmNewtonLayout, view: &mut StateView<'_>) -> Result<Metric> {
        let rows = view.algo.scalar(layout.num_rows) as u64;
        let metric = Metric::mean_loss(view.algo.scalar(layout.loss), rows)?;

        let rhs: Vec<f64> = view.algo.get(&layout.gradient).iter().map(|g| -g).collect();
        let delta = linalg::solve(view.algo.get(&layout.hessian), &rhs)?;
        debug!(step_norm = linalg::dot(&delta, &delta).sqrt(); "newton step");

        linalg::axpy(1.0, &delta, view.task.get_mut(&layout.model));

        Ok(metric)
    }
}

impl OptimizerState<GlmNewton> {
    pub fn model(&self) -> &[f64] {
        &self.buffer()[self.layout().model.clone()]
    }

    pub fn gradient(&self) -> &[f64] {
        &self.buffer()[self.layout().gradient.clone()]
    }

    /// Returns the accumulated Hessian, row-major.
    pub fn hessian(&self) -> &[f64] {
        &self.buffer()[self.layout().hessian.clone()]
    }

    /// Adds `lambda * I` to the accumulated Hessian.
    ///
    /// Meant to be called by the invoker after `finalize` failed with
    /// `StateError::SingularHessian`, before finalizing again.
    pub fn add_ridge(&mut self, lambda: f64) {
        let layout = self.layout().clone();
        let order = layout.order;
        let mut view = self.view();
        let hessian = view.algo.get_mut(&layout.hessian);

        for i in 0..order {
            hessian[i * order + i] += lambda;
        }
    }

    pub fn predict(&self, features: &[f64]) -> Result<f64> {
        predict_linear(self.rule().objective(), self.model(), features)
    }
}
