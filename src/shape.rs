//! Dimension descriptors: the runtime shape parameters of an optimizer state.
//!
//! A descriptor is written into the leading slots of a buffer (its *header*)
//! and read back from there whenever a buffer is bound. Every other offset of
//! a state is a pure function of the descriptor.

use std::{fmt, ops::Range};

use serde::{Deserialize, Serialize};

use crate::{Result, StateError};

/// Largest value accepted for a single dimension slot.
const MAX_DIMENSION: f64 = u32::MAX as f64;

/// Model shape of an optimizer state.
pub trait Shape: Clone + PartialEq + fmt::Debug + Send + Sync {
    /// Returns the amount of leading slots occupied by the dimension fields.
    fn header_len(&self) -> usize;

    /// Returns the amount of doubles in one copy of the model.
    ///
    /// # Returns
    /// `StateError::Allocation` if the model size doesn't fit in memory.
    fn model_len(&self) -> Result<usize>;

    /// Checks that every dimension is inside of its domain.
    fn validate(&self) -> Result<()>;

    /// Writes the dimension fields into `header`.
    ///
    /// # Arguments
    /// * `header` - The first `header_len()` slots of a buffer.
    fn write_header(&self, header: &mut [f64]);

    /// Reconstructs a descriptor from the leading slots of a buffer.
    ///
    /// # Arguments
    /// * `buffer` - The whole state buffer.
    fn read_header(buffer: &[f64]) -> Result<Self>;
}

/// Reads a dimension slot as a count.
fn read_count(buffer: &[f64], index: usize) -> Result<usize> {
    let value = *buffer.get(index).ok_or(StateError::LengthMismatch {
        what: "dimension header",
        got: buffer.len(),
        expected: index + 1,
    })?;

    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > MAX_DIMENSION {
        return Err(StateError::CorruptHeader { index, value });
    }

    Ok(value as usize)
}

fn overflow(len: usize) -> StateError {
    StateError::Allocation { len }
}

/// The shape of a generalized linear model: a single coefficient vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorShape {
    pub dimension: usize,
}

impl VectorShape {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Shape for VectorShape {
    fn header_len(&self) -> usize {
        1
    }

    fn model_len(&self) -> Result<usize> {
        Ok(self.dimension)
    }

    fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(StateError::InvalidDimension("the model dimension must be positive"));
        }

        Ok(())
    }

    fn write_header(&self, header: &mut [f64]) {
        header[0] = self.dimension as f64;
    }

    fn read_header(buffer: &[f64]) -> Result<Self> {
        let shape = Self::new(read_count(buffer, 0)?);
        shape.validate()?;
        Ok(shape)
    }
}

/// The shape of a low-rank factorization `A ~ U V'` with `U` of
/// `row_dim x max_rank` and `V` of `col_dim x max_rank`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorShape {
    pub row_dim: usize,
    pub col_dim: usize,
    pub max_rank: usize,
}

impl FactorShape {
    pub fn new(row_dim: usize, col_dim: usize, max_rank: usize) -> Self {
        Self {
            row_dim,
            col_dim,
            max_rank,
        }
    }

    /// Returns the range of `U` relative to the start of a model.
    pub fn u_range(&self) -> Range<usize> {
        0..self.row_dim * self.max_rank
    }

    /// Returns the range of `V` relative to the start of a model.
    pub fn v_range(&self) -> Range<usize> {
        let start = self.row_dim * self.max_rank;
        start..start + self.col_dim * self.max_rank
    }
}

impl Shape for FactorShape {
    fn header_len(&self) -> usize {
        3
    }

    fn model_len(&self) -> Result<usize> {
        let dims = self.row_dim.checked_add(self.col_dim).ok_or(overflow(usize::MAX))?;
        dims.checked_mul(self.max_rank).ok_or(overflow(usize::MAX))
    }

    fn validate(&self) -> Result<()> {
        if self.row_dim == 0 || self.col_dim == 0 {
            return Err(StateError::InvalidDimension("the factorized matrix must not be empty"));
        }
        if self.max_rank == 0 {
            return Err(StateError::InvalidDimension("the rank must be positive"));
        }

        Ok(())
    }

    fn write_header(&self, header: &mut [f64]) {
        header[0] = self.row_dim as f64;
        header[1] = self.col_dim as f64;
        header[2] = self.max_rank as f64;
    }

    fn read_header(buffer: &[f64]) -> Result<Self> {
        let shape = Self::new(
            read_count(buffer, 0)?,
            read_count(buffer, 1)?,
            read_count(buffer, 2)?,
        );
        shape.validate()?;
        Ok(shape)
    }
}

/// The shape of a multi-layer perceptron: the unit counts `n_0, ..., n_N`
/// of each of the `N + 1` layer boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayeredShape {
    pub units: Vec<usize>,
}

impl LayeredShape {
    pub fn new(units: Vec<usize>) -> Self {
        Self { units }
    }

    /// Returns the number of stages `N`, one per weight matrix.
    pub fn stages(&self) -> usize {
        self.units.len().saturating_sub(1)
    }

    pub fn inputs(&self) -> usize {
        self.units.first().copied().unwrap_or_default()
    }

    pub fn outputs(&self) -> usize {
        self.units.last().copied().unwrap_or_default()
    }

    /// Returns, for each stage `k`, the dimensions `(n_{k-1}, n_k)` of its weight
    /// matrix and its range relative to the start of a model.
    pub fn layers(&self) -> Vec<((usize, usize), Range<usize>)> {
        let mut offset = 0;

        self.units
            .windows(2)
            .map(|w| {
                let size = w[0] * w[1];
                let range = offset..offset + size;
                offset += size;
                ((w[0], w[1]), range)
            })
            .collect()
    }
}

impl Shape for LayeredShape {
    fn header_len(&self) -> usize {
        1 + self.units.len()
    }

    fn model_len(&self) -> Result<usize> {
        self.units.windows(2).try_fold(0usize, |acc, w| {
            w[0].checked_mul(w[1])
                .and_then(|size| acc.checked_add(size))
                .ok_or(overflow(usize::MAX))
        })
    }

    fn validate(&self) -> Result<()> {
        if self.units.len() < 2 {
            return Err(StateError::InvalidDimension("a perceptron needs at least one stage"));
        }
        if self.units.contains(&0) {
            return Err(StateError::InvalidDimension("every layer needs at least one unit"));
        }

        Ok(())
    }

    fn write_header(&self, header: &mut [f64]) {
        header[0] = self.stages() as f64;
        for (slot, &n) in header[1..].iter_mut().zip(&self.units) {
            *slot = n as f64;
        }
    }

    fn read_header(buffer: &[f64]) -> Result<Self> {
        let stages = read_count(buffer, 0)?;
        if stages == 0 {
            return Err(StateError::InvalidDimension("a perceptron needs at least one stage"));
        }

        let units = (1..=stages + 1)
            .map(|index| read_count(buffer, index))
            .collect::<Result<Vec<_>>>()?;

        let shape = Self::new(units);
        shape.validate()?;
        Ok(shape)
    }
}
