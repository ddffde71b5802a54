use ndarray::{Array1, ArrayView1, Axis};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::{
    Result, StateError, init,
    layout::MlpIgdLayout,
    linalg,
    objective::Activation,
    rule::{Metric, UpdateRule, merge_incremental},
    shape::LayeredShape,
    state::OptimizerState,
    view::{Section, StateView},
};

/// A training row of a perceptron: one input and its expected output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpRow {
    pub features: Vec<f64>,
    pub targets: Vec<f64>,
}

impl MlpRow {
    pub fn new(features: Vec<f64>, targets: Vec<f64>) -> Self {
        Self { features, targets }
    }
}

/// The pre-activations and activations of every layer boundary for one input.
struct Trace {
    z: Vec<Array1<f64>>,
    a: Vec<Array1<f64>>,
}

/// Incremental gradient descent for multi-layer perceptrons.
///
/// Hidden layers apply the activation, the output layer is linear and the row
/// loss is `0.5 * |output - target|^2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MlpIgd {
    activation: Activation,
}

impl MlpIgd {
    pub fn new(activation: Activation) -> Self {
        Self { activation }
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Runs one input through the network.
    ///
    /// # Arguments
    /// * `shape` - The layer sizes.
    /// * `model` - One row-major `n_{k-1} x n_k` matrix per stage.
    /// * `x` - The input, of length `n_0`.
    fn forward(&self, shape: &LayeredShape, model: &[f64], x: &[f64]) -> Result<Trace> {
        let layers = shape.layers();
        let mut z = Vec::with_capacity(layers.len());
        let mut a = Vec::with_capacity(layers.len() + 1);
        a.push(Array1::from(x.to_vec()));

        for (k, (dim, range)) in layers.into_iter().enumerate() {
            let w = linalg::matrix(&model[range], dim)?;
            let zk = a[k].dot(&w);
            let ak = if k + 1 == shape.stages() {
                zk.clone()
            } else {
                zk.mapv(|v| self.activation.f(v))
            };
            z.push(zk);
            a.push(ak);
        }

        Ok(Trace { z, a })
    }

    /// Computes the gradient of the row loss with respect to every weight.
    ///
    /// # Returns
    /// The gradient, laid out as the model, and the row loss.
    fn backward(
        &self,
        shape: &LayeredShape,
        model: &[f64],
        row: &MlpRow,
    ) -> Result<(Vec<f64>, f64)> {
        let trace = self.forward(shape, model, &row.features)?;
        let layers = shape.layers();

        let Some(output) = trace.a.last() else {
            return Err(StateError::InvalidDimension("a perceptron needs at least one stage"));
        };
        let mut delta = output - &ArrayView1::from(row.targets.as_slice());
        let loss = 0.5 * delta.dot(&delta);

        let mut gradient = vec![0.0; model.len()];
        for (k, (dim, range)) in layers.into_iter().enumerate().rev() {
            let inputs = trace.a[k].view().insert_axis(Axis(1));
            let outer = inputs.dot(&delta.view().insert_axis(Axis(0)));
            linalg::matrix_mut(&mut gradient[range.clone()], dim)?.assign(&outer);

            if k > 0 {
                let w = linalg::matrix(&model[range], dim)?;
                let mut back = w.dot(&delta);
                back.zip_mut_with(&trace.z[k - 1], |d, &z| *d *= self.activation.df(z));
                delta = back;
            }
        }

        Ok((gradient, loss))
    }
}

fn check_row(shape: &LayeredShape, row: &MlpRow) -> Result<()> {
    if row.features.len() != shape.inputs() {
        return Err(StateError::MalformedRow {
            what: "input vector",
            got: row.features.len(),
            expected: shape.inputs(),
        });
    }
    if row.targets.len() != shape.outputs() {
        return Err(StateError::MalformedRow {
            what: "target vector",
            got: row.targets.len(),
            expected: shape.outputs(),
        });
    }

    Ok(())
}

impl UpdateRule for MlpIgd {
    type Shape = LayeredShape;
    type Layout = MlpIgdLayout;
    type Row = MlpRow;

    const NAME: &'static str = "mlp_igd";

    fn layout(shape: &LayeredShape) -> Result<MlpIgdLayout> {
        MlpIgdLayout::new(shape)
    }

    fn initialize(
        &self,
        shape: &LayeredShape,
        layout: &MlpIgdLayout,
        task: &mut Section<'_>,
        stepsize: f64,
        rng: &mut StdRng,
    ) -> Result<()> {
        init::xavier_uniform(shape, task.get_mut(&layout.model), rng)?;
        task.set(layout.stepsize, stepsize);
        Ok(())
    }

    fn reset(&self, layout: &MlpIgdLayout, view: &mut StateView<'_>) {
        view.algo.clear();
        view.algo
            .get_mut(&layout.incr_model)
            .copy_from_slice(view.task.get(&layout.model));
    }

    fn transition(
        &self,
        shape: &LayeredShape,
        layout: &MlpIgdLayout,
        view: &mut StateView<'_>,
        row: &MlpRow,
    ) -> Result<()> {
        check_row(shape, row)?;

        let stepsize = view.task.scalar(layout.stepsize);
        let (gradient, loss) = self.backward(shape, view.algo.get(&layout.incr_model), row)?;

        linalg::axpy(-stepsize, &gradient, view.algo.get_mut(&layout.incr_model));
        view.algo.add(layout.loss, loss);
        view.algo.add(layout.num_rows, 1.0);

        Ok(())
    }

    fn merge(&self, layout: &MlpIgdLayout, view: &mut StateView<'_>, other: &[f64]) {
        let my_rows = view.algo.scalar(layout.num_rows);

        merge_incremental(
            view.task.get(&layout.model),
            view.algo.get_mut(&layout.incr_model),
            my_rows,
            &other[layout.incr_model.clone()],
            other[layout.num_rows],
        );
    }

    fn finalize(&self, layout: &MlpIgdLayout, view: &mut StateView<'_>) -> Result<Metric> {
        let rows = view.algo.scalar(layout.num_rows) as u64;
        let metric = Metric::mean_loss(view.algo.scalar(layout.loss), rows)?;

        view.task
            .get_mut(&layout.model)
            .copy_from_slice(view.algo.get(&layout.incr_model));

        Ok(metric)
    }
}

impl OptimizerState<MlpIgd> {
    pub fn stepsize(&self) -> f64 {
        self.buffer()[self.layout().stepsize]
    }

    pub fn model(&self) -> &[f64] {
        &self.buffer()[self.layout().model.clone()]
    }

    pub fn incr_model(&self) -> &[f64] {
        &self.buffer()[self.layout().incr_model.clone()]
    }

    /// Runs `features` through the current model.
    ///
    /// # Returns
    /// The output layer or an error if `features` has the wrong length.
    pub fn predict(&self, features: &[f64]) -> Result<Vec<f64>> {
        let shape = self.shape();
        if features.len() != shape.inputs() {
            return Err(StateError::MalformedRow {
                what: "input vector",
                got: features.len(),
                expected: shape.inputs(),
            });
        }

        let trace = self.rule().forward(shape, self.model(), features)?;
        Ok(trace.a.last().map(|a| a.to_vec()).unwrap_or_default())
    }
}
