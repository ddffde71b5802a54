//! The update rules of every optimizer variant.

mod glm_cg;
mod glm_igd;
mod glm_newton;
mod lmf_igd;
mod mlp_igd;

pub use glm_cg::GlmCg;
pub use glm_igd::GlmIgd;
pub use glm_newton::GlmNewton;
pub use lmf_igd::{LmfIgd, MatrixEntry};
pub use mlp_igd::{MlpIgd, MlpRow};

use serde::{Deserialize, Serialize};

use crate::{Result, StateError, linalg, objective::GlmObjective};

/// A training row of a generalized linear model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRow {
    pub features: Vec<f64>,
    pub label: f64,
}

impl LabeledRow {
    pub fn new(features: Vec<f64>, label: f64) -> Self {
        Self { features, label }
    }

    /// Checks that the row has one feature per model coefficient.
    pub(crate) fn check(&self, dimension: usize) -> Result<()> {
        if self.features.len() != dimension {
            return Err(StateError::MalformedRow {
                what: "feature vector",
                got: self.features.len(),
                expected: dimension,
            });
        }

        Ok(())
    }
}

/// Evaluates a linear model on a feature vector.
///
/// # Returns
/// The objective's prediction or an error if the lengths disagree.
pub(crate) fn predict_linear(
    objective: GlmObjective,
    model: &[f64],
    features: &[f64],
) -> Result<f64> {
    if features.len() != model.len() {
        return Err(StateError::MalformedRow {
            what: "feature vector",
            got: features.len(),
            expected: model.len(),
        });
    }

    Ok(objective.predict(linalg::dot(model, features)))
}
