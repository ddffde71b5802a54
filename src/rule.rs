use rand::rngs::StdRng;
use serde::Serialize;

use crate::{
    Result, StateError,
    layout::Layout,
    shape::Shape,
    view::{Section, StateView},
};

/// The kind of diagnostic reported when an iteration is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// `loss / numRows`.
    MeanLoss,
    /// `sqrt(loss / numRows)`.
    Rmse,
}

/// The convergence diagnostic of one completed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metric {
    pub kind: MetricKind,
    pub value: f64,
    pub num_rows: u64,
    /// Norm of the mean row gradient, for rules that accumulate one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradient_norm: Option<f64>,
}

impl Metric {
    /// Computes the mean loss of an iteration.
    ///
    /// # Returns
    /// `StateError::EmptyIteration` if no row was folded in.
    pub fn mean_loss(loss: f64, num_rows: u64) -> Result<Self> {
        if num_rows == 0 {
            return Err(StateError::EmptyIteration);
        }

        Ok(Self {
            kind: MetricKind::MeanLoss,
            value: loss / num_rows as f64,
            num_rows,
            gradient_norm: None,
        })
    }

    /// Computes the root mean squared error from a sum of squared errors.
    ///
    /// # Returns
    /// `StateError::EmptyIteration` if no row was folded in.
    pub fn rmse(loss: f64, num_rows: u64) -> Result<Self> {
        if num_rows == 0 {
            return Err(StateError::EmptyIteration);
        }

        Ok(Self {
            kind: MetricKind::Rmse,
            value: (loss / num_rows as f64).sqrt(),
            num_rows,
            gradient_norm: None,
        })
    }

    pub fn with_gradient_norm(self, norm: f64) -> Self {
        Self {
            gradient_norm: Some(norm),
            ..self
        }
    }
}

/// The update rule of one optimizer variant: the math that flows through the
/// shared allocate/transition/merge/finalize lifecycle.
///
/// Implementations never see a buffer whose length disagrees with their
/// layout, `OptimizerState` guarantees it.
pub trait UpdateRule: Clone + PartialEq + Send + Sync {
    /// The dimension descriptor of this variant.
    type Shape: Shape;

    /// The offset table of this variant.
    type Layout: Layout;

    /// One training row, as supplied by the invoking runtime.
    type Row: Send + Sync;

    /// Stable name used in logs.
    const NAME: &'static str;

    /// Computes the offset table for a shape.
    fn layout(shape: &Self::Shape) -> Result<Self::Layout>;

    /// Seeds the task state of a freshly allocated state.
    ///
    /// # Arguments
    /// * `shape` - The dimensions of the state.
    /// * `layout` - The offset table of the state.
    /// * `task` - The task section of the buffer.
    /// * `stepsize` - The learning rate of the run.
    /// * `rng` - A random number generator for the initial model.
    fn initialize(
        &self,
        shape: &Self::Shape,
        layout: &Self::Layout,
        task: &mut Section<'_>,
        stepsize: f64,
        rng: &mut StdRng,
    ) -> Result<()>;

    /// Clears the algo state and reseeds it from the task state.
    fn reset(&self, layout: &Self::Layout, view: &mut StateView<'_>);

    /// Folds one row into the algo state.
    ///
    /// # Errors
    /// Returns `StateError::MalformedRow` or `StateError::RowIndexOutOfBounds`
    /// when the row doesn't fit the model, in which case nothing is written.
    fn transition(
        &self,
        shape: &Self::Shape,
        layout: &Self::Layout,
        view: &mut StateView<'_>,
        row: &Self::Row,
    ) -> Result<()>;

    /// Combines the algo state of `other` into `view`.
    ///
    /// Both states share the same task state and both folded in at least one
    /// row. Row counts and losses have not been summed yet.
    fn merge(&self, layout: &Self::Layout, view: &mut StateView<'_>, other: &[f64]);

    /// Promotes the algo state into the next task state.
    ///
    /// Called only when at least one row was folded in. The algo state is
    /// reset by the caller afterwards.
    fn finalize(&self, layout: &Self::Layout, view: &mut StateView<'_>) -> Result<Metric>;
}

/// Combines two incremental models that drifted away from the same reference.
///
/// Each side contributes its displacement `incr - reference` weighted by its
/// share of the rows, so the combination is associative and commutative.
///
/// # Arguments
/// * `reference` - The task state model both sides started from.
/// * `mine` - This side's incremental model, overwritten with the result.
/// * `my_rows` - Rows folded into `mine`.
/// * `theirs` - The other side's incremental model.
/// * `their_rows` - Rows folded into `theirs`.
pub fn merge_incremental(
    reference: &[f64],
    mine: &mut [f64],
    my_rows: f64,
    theirs: &[f64],
    their_rows: f64,
) {
    let total = my_rows + their_rows;
    if total <= 0.0 {
        return;
    }

    let wa = my_rows / total;
    let wb = their_rows / total;

    mine.iter_mut()
        .zip(theirs)
        .zip(reference)
        .for_each(|((m, &t), &r)| {
            *m = r + wa * (*m - r) + wb * (t - r);
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rmse_of_known_loss() {
        let metric = Metric::rmse(18.0, 2).unwrap();
        assert_eq!(metric.value, 3.0);
        assert_eq!(metric.kind, MetricKind::Rmse);
    }

    #[test]
    fn empty_iteration_has_no_metric() {
        assert!(matches!(Metric::rmse(0.0, 0), Err(StateError::EmptyIteration)));
        assert!(matches!(Metric::mean_loss(1.0, 0), Err(StateError::EmptyIteration)));
    }

    #[test]
    fn incremental_merge_weights_by_rows() {
        let reference = [1.0, 1.0];
        let mut mine = [3.0, 1.0];
        let theirs = [1.0, -2.0];

        merge_incremental(&reference, &mut mine, 1.0, &theirs, 2.0);

        assert!((mine[0] - (1.0 + 2.0 / 3.0)).abs() < 1e-12);
        assert!((mine[1] - (1.0 - 2.0)).abs() < 1e-12);
    }

    #[test]
    fn incremental_merge_is_associative() {
        let reference = [0.5, -0.5, 2.0];
        let a = [1.0, 0.0, 2.5];
        let b = [0.0, -1.0, 1.5];
        let c = [0.25, 0.75, 3.0];
        let (na, nb, nc) = (3.0, 1.0, 5.0);

        let mut left = a;
        merge_incremental(&reference, &mut left, na, &b, nb);
        merge_incremental(&reference, &mut left, na + nb, &c, nc);

        let mut bc = b;
        merge_incremental(&reference, &mut bc, nb, &c, nc);
        let mut right = a;
        merge_incremental(&reference, &mut right, na, &bc, nb + nc);

        for (l, r) in left.iter().zip(&right) {
            assert!((l - r).abs() < 1e-12);
        }
    }
}
