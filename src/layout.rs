//! Offset tables of every optimizer state.
//!
//! A layout maps a flat buffer into named fields. It is computed from a
//! dimension descriptor only, so it must be rebuilt whenever the descriptor
//! stored in a buffer is (re)written. The tables below are the persisted
//! representation of a state and must not change.

use std::{fmt, ops::Range};

use crate::{
    Result, StateError,
    shape::{FactorShape, LayeredShape, Shape, VectorShape},
};

/// The offset table of one optimizer variant.
///
/// Every layout is split in two contiguous sections: the task state, carried
/// across iterations, followed by the algo state, rebuilt on every iteration.
pub trait Layout: Clone + PartialEq + fmt::Debug + Send + Sync {
    /// Returns the total amount of doubles in the buffer.
    fn len(&self) -> usize;

    /// Returns the index of the first algo state slot.
    fn algo_start(&self) -> usize;

    /// Returns the index of the row counter.
    fn num_rows(&self) -> usize;

    /// Returns the index of the running loss.
    fn loss(&self) -> usize;

    /// Returns every field in buffer order.
    fn fields(&self) -> Vec<(&'static str, Range<usize>)>;

    /// Sanity check: fields must tile the buffer without gaps or overlaps.
    fn validate(&self) -> Result<()> {
        let mut end = 0;

        for (name, range) in self.fields() {
            if range.start != end || range.end < range.start {
                return Err(StateError::LengthMismatch {
                    what: name,
                    got: range.start,
                    expected: end,
                });
            }
            end = range.end;
        }

        if end != self.len() {
            return Err(StateError::LengthMismatch {
                what: "layout",
                got: end,
                expected: self.len(),
            });
        }

        Ok(())
    }
}

fn slot(index: usize) -> Range<usize> {
    index..index + 1
}

fn checked(len: Option<usize>) -> Result<usize> {
    len.ok_or(StateError::Allocation { len: usize::MAX })
}

/// Layout of incremental gradient descent for generalized linear models.
///
/// Inter-iteration components:
/// - 0: dimension
/// - 1: stepsize
/// - 2: model
///
/// Intra-iteration components:
/// - 2 + dimension: numRows
/// - 3 + dimension: loss
/// - 4 + dimension: gradient (sum of row gradients)
/// - 4 + 2 * dimension: incrModel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlmIgdLayout {
    pub stepsize: usize,
    pub model: Range<usize>,
    pub num_rows: usize,
    pub loss: usize,
    pub gradient: Range<usize>,
    pub incr_model: Range<usize>,
}

impl GlmIgdLayout {
    pub fn new(shape: &VectorShape) -> Result<Self> {
        shape.validate()?;
        let d = shape.dimension;

        Ok(Self {
            stepsize: 1,
            model: 2..2 + d,
            num_rows: 2 + d,
            loss: 3 + d,
            gradient: 4 + d..4 + 2 * d,
            incr_model: 4 + 2 * d..4 + 3 * d,
        })
    }

    /// Closed-form buffer length for a model of `dimension` coefficients.
    pub fn array_size(dimension: usize) -> usize {
        4 + 3 * dimension
    }
}

impl Layout for GlmIgdLayout {
    fn len(&self) -> usize {
        self.incr_model.end
    }

    fn algo_start(&self) -> usize {
        self.num_rows
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn loss(&self) -> usize {
        self.loss
    }

    fn fields(&self) -> Vec<(&'static str, Range<usize>)> {
        vec![
            ("dimension", slot(0)),
            ("stepsize", slot(self.stepsize)),
            ("model", self.model.clone()),
            ("numRows", slot(self.num_rows)),
            ("loss", slot(self.loss)),
            ("gradient", self.gradient.clone()),
            ("incrModel", self.incr_model.clone()),
        ]
    }
}

/// Layout of conjugate gradient for generalized linear models.
///
/// Inter-iteration components:
/// - 0: dimension
/// - 1: iteration
/// - 2: stepsize
/// - 3: model
/// - 3 + dimension: direction
/// - 3 + 2 * dimension: gradient (of the previous iteration)
///
/// Intra-iteration components:
/// - 3 + 3 * dimension: numRows
/// - 4 + 3 * dimension: loss
/// - 5 + 3 * dimension: incrGradient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlmCgLayout {
    pub iteration: usize,
    pub stepsize: usize,
    pub model: Range<usize>,
    pub direction: Range<usize>,
    pub gradient: Range<usize>,
    pub num_rows: usize,
    pub loss: usize,
    pub incr_gradient: Range<usize>,
}

impl GlmCgLayout {
    pub fn new(shape: &VectorShape) -> Result<Self> {
        shape.validate()?;
        let d = shape.dimension;

        Ok(Self {
            iteration: 1,
            stepsize: 2,
            model: 3..3 + d,
            direction: 3 + d..3 + 2 * d,
            gradient: 3 + 2 * d..3 + 3 * d,
            num_rows: 3 + 3 * d,
            loss: 4 + 3 * d,
            incr_gradient: 5 + 3 * d..5 + 4 * d,
        })
    }

    pub fn array_size(dimension: usize) -> usize {
        5 + 4 * dimension
    }
}

impl Layout for GlmCgLayout {
    fn len(&self) -> usize {
        self.incr_gradient.end
    }

    fn algo_start(&self) -> usize {
        self.num_rows
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn loss(&self) -> usize {
        self.loss
    }

    fn fields(&self) -> Vec<(&'static str, Range<usize>)> {
        vec![
            ("dimension", slot(0)),
            ("iteration", slot(self.iteration)),
            ("stepsize", slot(self.stepsize)),
            ("model", self.model.clone()),
            ("direction", self.direction.clone()),
            ("gradient", self.gradient.clone()),
            ("numRows", slot(self.num_rows)),
            ("loss", slot(self.loss)),
            ("incrGradient", self.incr_gradient.clone()),
        ]
    }
}

/// Layout of Newton's method for generalized linear models.
///
/// Inter-iteration components:
/// - 0: dimension
/// - 1: model
///
/// Intra-iteration components:
/// - 1 + dimension: numRows
/// - 2 + dimension: loss
/// - 3 + dimension: gradient
/// - 3 + 2 * dimension: hessian (row-major, dimension x dimension)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlmNewtonLayout {
    /// Side length of the square Hessian.
    pub order: usize,
    pub model: Range<usize>,
    pub num_rows: usize,
    pub loss: usize,
    pub gradient: Range<usize>,
    pub hessian: Range<usize>,
}

impl GlmNewtonLayout {
    pub fn new(shape: &VectorShape) -> Result<Self> {
        shape.validate()?;
        let d = shape.dimension;
        let square = checked(d.checked_mul(d))?;
        let hessian_start = 3 + 2 * d;

        Ok(Self {
            order: d,
            model: 1..1 + d,
            num_rows: 1 + d,
            loss: 2 + d,
            gradient: 3 + d..3 + 2 * d,
            hessian: hessian_start..checked(hessian_start.checked_add(square))?,
        })
    }

    pub fn array_size(dimension: usize) -> usize {
        3 + (dimension + 2) * dimension
    }
}

impl Layout for GlmNewtonLayout {
    fn len(&self) -> usize {
        self.hessian.end
    }

    fn algo_start(&self) -> usize {
        self.num_rows
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn loss(&self) -> usize {
        self.loss
    }

    fn fields(&self) -> Vec<(&'static str, Range<usize>)> {
        vec![
            ("dimension", slot(0)),
            ("model", self.model.clone()),
            ("numRows", slot(self.num_rows)),
            ("loss", slot(self.loss)),
            ("gradient", self.gradient.clone()),
            ("hessian", self.hessian.clone()),
        ]
    }
}

/// Layout of incremental gradient descent for low-rank matrix factorization.
///
/// Inter-iteration components:
/// - 0: rowDim
/// - 1: colDim
/// - 2: maxRank
/// - 3: stepsize
/// - 4: scaleFactor (value scale used to seed the model)
/// - 5: model (U then V, both row-major)
/// - 5 + modelLength: RMSE of the previous iteration
///
/// Intra-iteration components, with `modelLength = (rowDim + colDim) * maxRank`:
/// - 6 + modelLength: numRows
/// - 7 + modelLength: loss (sum of squared errors)
/// - 8 + modelLength: incrModel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmfIgdLayout {
    pub stepsize: usize,
    pub scale_factor: usize,
    pub model: Range<usize>,
    pub rmse: usize,
    pub num_rows: usize,
    pub loss: usize,
    pub incr_model: Range<usize>,
}

impl LmfIgdLayout {
    pub fn new(shape: &FactorShape) -> Result<Self> {
        shape.validate()?;
        let m = shape.model_len()?;
        let end = checked(m.checked_mul(2).and_then(|x| x.checked_add(8)))?;

        Ok(Self {
            stepsize: 3,
            scale_factor: 4,
            model: 5..5 + m,
            rmse: 5 + m,
            num_rows: 6 + m,
            loss: 7 + m,
            incr_model: 8 + m..end,
        })
    }

    pub fn array_size(row_dim: usize, col_dim: usize, max_rank: usize) -> usize {
        8 + 2 * (row_dim + col_dim) * max_rank
    }
}

impl Layout for LmfIgdLayout {
    fn len(&self) -> usize {
        self.incr_model.end
    }

    fn algo_start(&self) -> usize {
        self.num_rows
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn loss(&self) -> usize {
        self.loss
    }

    fn fields(&self) -> Vec<(&'static str, Range<usize>)> {
        vec![
            ("dimensions", 0..3),
            ("stepsize", slot(self.stepsize)),
            ("scaleFactor", slot(self.scale_factor)),
            ("model", self.model.clone()),
            ("RMSE", slot(self.rmse)),
            ("numRows", slot(self.num_rows)),
            ("loss", slot(self.loss)),
            ("incrModel", self.incr_model.clone()),
        ]
    }
}

/// Layout of incremental gradient descent for multi-layer perceptrons.
///
/// Inter-iteration components:
/// - 0: numberOfStages (N)
/// - 1: numbersOfUnits (n_0, ..., n_N)
/// - N + 2: stepsize
/// - N + 3: model (one row-major n_{k-1} x n_k matrix per stage)
///
/// Intra-iteration components, with `sizeOfModel = sum n_{k-1} n_k`:
/// - N + 3 + sizeOfModel: numRows
/// - N + 4 + sizeOfModel: loss
/// - N + 5 + sizeOfModel: incrModel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlpIgdLayout {
    pub header: Range<usize>,
    pub stepsize: usize,
    pub model: Range<usize>,
    pub num_rows: usize,
    pub loss: usize,
    pub incr_model: Range<usize>,
}

impl MlpIgdLayout {
    pub fn new(shape: &LayeredShape) -> Result<Self> {
        shape.validate()?;
        let n = shape.stages();
        let m = shape.model_len()?;
        let model_start = n + 3;
        let end = checked(
            m.checked_mul(2)
                .and_then(|x| x.checked_add(model_start + 2)),
        )?;

        Ok(Self {
            header: 0..shape.header_len(),
            stepsize: n + 2,
            model: model_start..model_start + m,
            num_rows: model_start + m,
            loss: model_start + m + 1,
            incr_model: model_start + m + 2..end,
        })
    }

    /// Closed-form buffer length: `1 + (N + 1) + 1 + sizeOfModel + 1 + 1 + sizeOfModel`.
    pub fn array_size(units: &[usize]) -> usize {
        let stages = units.len().saturating_sub(1);
        let model: usize = units.windows(2).map(|w| w[0] * w[1]).sum();
        1 + (stages + 1) + 1 + model + 1 + 1 + model
    }
}

impl Layout for MlpIgdLayout {
    fn len(&self) -> usize {
        self.incr_model.end
    }

    fn algo_start(&self) -> usize {
        self.num_rows
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn loss(&self) -> usize {
        self.loss
    }

    fn fields(&self) -> Vec<(&'static str, Range<usize>)> {
        vec![
            ("dimensions", self.header.clone()),
            ("stepsize", slot(self.stepsize)),
            ("model", self.model.clone()),
            ("numRows", slot(self.num_rows)),
            ("loss", slot(self.loss)),
            ("incrModel", self.incr_model.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glm_igd_layout_is_valid() {
        for d in [1, 4, 17] {
            let layout = GlmIgdLayout::new(&VectorShape::new(d)).unwrap();
            layout.validate().unwrap();
            assert_eq!(layout.len(), 4 + 3 * d);
            assert_eq!(layout.len(), GlmIgdLayout::array_size(d));
        }
    }

    #[test]
    fn glm_cg_layout_is_valid() {
        for d in [1, 2, 9] {
            let layout = GlmCgLayout::new(&VectorShape::new(d)).unwrap();
            layout.validate().unwrap();
            assert_eq!(layout.len(), 5 + 4 * d);
            assert_eq!(layout.incr_gradient.start, 5 + 3 * d);
        }
    }

    #[test]
    fn glm_newton_layout_is_valid() {
        for d in [1, 2, 6] {
            let layout = GlmNewtonLayout::new(&VectorShape::new(d)).unwrap();
            layout.validate().unwrap();
            assert_eq!(layout.len(), 3 + (d + 2) * d);
            assert_eq!(layout.hessian.len(), d * d);
        }
    }

    #[test]
    fn lmf_igd_layout_is_valid() {
        for (r, c, k) in [(1, 1, 1), (3, 2, 2), (10, 7, 3)] {
            let layout = LmfIgdLayout::new(&FactorShape::new(r, c, k)).unwrap();
            layout.validate().unwrap();
            assert_eq!(layout.len(), 8 + 2 * (r + c) * k);
            assert_eq!(layout.len(), LmfIgdLayout::array_size(r, c, k));
        }
    }

    #[test]
    fn mlp_igd_layout_is_valid() {
        for units in [vec![1, 1], vec![2, 3, 1], vec![4, 5, 5, 2]] {
            let shape = LayeredShape::new(units.clone());
            let layout = MlpIgdLayout::new(&shape).unwrap();
            layout.validate().unwrap();

            let n = units.len() - 1;
            let m = shape.model_len().unwrap();
            assert_eq!(layout.len(), n + 5 + 2 * m);
            assert_eq!(layout.len(), MlpIgdLayout::array_size(&units));
            assert_eq!(layout.model.start, n + 3);
        }
    }

    #[test]
    fn algo_section_follows_task_section() {
        let layout = LmfIgdLayout::new(&FactorShape::new(3, 2, 2)).unwrap();
        assert_eq!(layout.algo_start(), layout.rmse + 1);
        assert_eq!(layout.num_rows, 16);
        assert_eq!(layout.loss, 17);
        assert_eq!(layout.incr_model, 18..28);
    }
}
