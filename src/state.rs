use log::{debug, info, warn};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result, StateError,
    buffer::StateBuffer,
    layout::Layout,
    rule::{Metric, UpdateRule},
    shape::Shape,
    view::StateView,
};

/// A packed optimizer state: one flat buffer plus the offset table derived
/// from the dimension fields stored inside of it.
///
/// The descriptor and layout held here are never trusted across a change of
/// the buffer: every operation that replaces buffer contents rebinds them
/// from the buffer itself.
#[derive(Debug, Clone)]
pub struct OptimizerState<R: UpdateRule> {
    rule: R,
    shape: R::Shape,
    layout: R::Layout,
    buffer: StateBuffer,
}

impl<R: UpdateRule> OptimizerState<R> {
    /// Computes the buffer length of a state with the given dimensions.
    pub fn size(shape: &R::Shape) -> Result<usize> {
        Ok(R::layout(shape)?.len())
    }

    /// Allocates a zeroed state.
    ///
    /// The dimension fields are written first, then every other offset is
    /// derived again from the values now stored in the buffer.
    ///
    /// # Arguments
    /// * `rule` - The update rule of the state.
    /// * `shape` - The dimensions of the state.
    ///
    /// # Returns
    /// A ready to use state or an error if the dimensions are invalid or the
    /// buffer couldn't be allocated.
    pub fn allocate(rule: R, shape: &R::Shape) -> Result<Self> {
        let len = Self::size(shape)?;
        let mut buffer = StateBuffer::zeroed(len)?;

        let header_len = shape.header_len();
        shape.write_header(&mut buffer[..header_len]);

        let state = Self::bind(rule, buffer)?;
        debug!(variant = R::NAME, len = len; "allocated state");
        Ok(state)
    }

    /// Interprets an existing buffer as a state.
    ///
    /// Reads the dimension fields already present in `buffer` and rebuilds the
    /// offset table from them. Never writes to the buffer.
    ///
    /// # Returns
    /// `StateError::LengthMismatch` if the buffer length disagrees with its own
    /// dimension fields.
    pub fn bind(rule: R, buffer: StateBuffer) -> Result<Self> {
        let shape = R::Shape::read_header(&buffer)?;
        let layout = R::layout(&shape)?;

        if buffer.len() != layout.len() {
            return Err(StateError::LengthMismatch {
                what: "state buffer",
                got: buffer.len(),
                expected: layout.len(),
            });
        }

        Ok(Self {
            rule,
            shape,
            layout,
            buffer,
        })
    }

    /// Seeds the task state for the first iteration of a run and resets the
    /// algo state from it.
    ///
    /// # Arguments
    /// * `stepsize` - The learning rate (ignored by rules without one).
    /// * `seed` - Seed for the initial model, `None` draws one from the OS.
    pub fn initialize(&mut self, stepsize: f64, seed: Option<u64>) -> Result<()> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let algo_start = self.layout.algo_start();
        let mut view = StateView::new(&mut self.buffer, algo_start);
        self.rule
            .initialize(&self.shape, &self.layout, &mut view.task, stepsize, &mut rng)?;
        self.rule.reset(&self.layout, &mut view);

        Ok(())
    }

    /// Overwrites this state with a verbatim copy of `other`.
    ///
    /// # Returns
    /// An error if both states differ in dimensions, in which case nothing is
    /// written.
    pub fn assign(&mut self, other: &Self) -> Result<()> {
        if self.shape != other.shape {
            return Err(StateError::IncompatibleStates {
                what: "dimension",
                index: 0,
            });
        }

        self.buffer.copy_from(&other.buffer)?;
        self.rebind()
    }

    fn rebind(&mut self) -> Result<()> {
        self.shape = R::Shape::read_header(&self.buffer)?;
        self.layout = R::layout(&self.shape)?;
        Ok(())
    }

    /// Zeroes the algo state and reseeds its accumulators from the task state.
    pub fn reset(&mut self) {
        let algo_start = self.layout.algo_start();
        let mut view = StateView::new(&mut self.buffer, algo_start);
        self.rule.reset(&self.layout, &mut view);
    }

    /// Folds one training row into the algo state.
    ///
    /// # Errors
    /// A row that doesn't fit the model is rejected without touching the state.
    pub fn transition(&mut self, row: &R::Row) -> Result<()> {
        let algo_start = self.layout.algo_start();
        let mut view = StateView::new(&mut self.buffer, algo_start);
        self.rule
            .transition(&self.shape, &self.layout, &mut view, row)
    }

    /// Combines two partial states of the same iteration into one.
    ///
    /// Both inputs are consumed. A state that folded in no rows acts as the
    /// identity.
    ///
    /// # Errors
    /// `StateError::IncompatibleStates` if the update rules differ or the task
    /// states are not bit-identical, detected before any mutation.
    pub fn merge(mut self, other: Self) -> Result<Self> {
        self.check_compatible(&other)?;

        let theirs = other.num_rows();
        if theirs == 0 {
            return Ok(self);
        }
        if self.num_rows() == 0 {
            return Ok(other);
        }

        let num_rows = self.layout.num_rows();
        let loss = self.layout.loss();
        let layout = self.layout.clone();

        let mut view = StateView::new(&mut self.buffer, layout.algo_start());
        self.rule.merge(&layout, &mut view, &other.buffer);
        view.algo.add(num_rows, other.buffer[num_rows]);
        view.algo.add(loss, other.buffer[loss]);

        debug!(variant = R::NAME, rows = self.num_rows(); "merged states");
        Ok(self)
    }

    fn check_compatible(&self, other: &Self) -> Result<()> {
        if self.rule != other.rule {
            return Err(StateError::IncompatibleStates {
                what: "update rule",
                index: 0,
            });
        }

        if self.buffer.len() != other.buffer.len() {
            return Err(StateError::IncompatibleStates {
                what: "buffer length",
                index: self.buffer.len().min(other.buffer.len()),
            });
        }

        let task = ..self.layout.algo_start();
        let mismatch = self.buffer[task]
            .iter()
            .zip(&other.buffer[task])
            .position(|(a, b)| a.to_bits() != b.to_bits());

        match mismatch {
            Some(index) => Err(StateError::IncompatibleStates {
                what: "task state",
                index,
            }),
            None => Ok(()),
        }
    }

    /// Promotes the algo state into the next task state and resets the algo
    /// state for the next iteration.
    ///
    /// # Returns
    /// The diagnostic metric of the completed iteration.
    ///
    /// # Errors
    /// `StateError::EmptyIteration` if no row was folded in, and any failure of
    /// the update rule (e.g. a singular Hessian). The state is left untouched on
    /// error.
    pub fn finalize(&mut self) -> Result<Metric> {
        if self.num_rows() == 0 {
            return Err(StateError::EmptyIteration);
        }

        let layout = self.layout.clone();
        let mut view = StateView::new(&mut self.buffer, layout.algo_start());
        let metric = self.rule.finalize(&layout, &mut view)?;
        self.rule.reset(&layout, &mut view);

        if !metric.value.is_finite() {
            warn!(variant = R::NAME, metric = metric.value; "non-finite metric, the accumulators diverged");
        }
        info!(
            variant = R::NAME,
            rows = metric.num_rows,
            metric = metric.value;
            "finalized iteration"
        );

        Ok(metric)
    }

    /// Returns the amount of rows folded in during the current iteration.
    pub fn num_rows(&self) -> u64 {
        self.buffer[self.layout.num_rows()] as u64
    }

    /// Returns the running loss of the current iteration.
    pub fn loss(&self) -> f64 {
        self.buffer[self.layout.loss()]
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    pub fn shape(&self) -> &R::Shape {
        &self.shape
    }

    pub fn layout(&self) -> &R::Layout {
        &self.layout
    }

    pub fn buffer(&self) -> &StateBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> StateBuffer {
        self.buffer
    }

    /// Returns the inter-iteration slots.
    pub fn task(&self) -> &[f64] {
        &self.buffer[..self.layout.algo_start()]
    }

    /// Returns the intra-iteration slots.
    pub fn algo(&self) -> &[f64] {
        &self.buffer[self.layout.algo_start()..]
    }

    /// Gives a typed overlay over the buffer for direct field access.
    ///
    /// The task section covers the dimension fields, so this stays inside the
    /// crate. Callers edit raw slots through `into_buffer` and `bind`, which
    /// validates the header again.
    pub(crate) fn view(&mut self) -> StateView<'_> {
        let algo_start = self.layout.algo_start();
        StateView::new(&mut self.buffer, algo_start)
    }
}
